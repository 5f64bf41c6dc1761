//! dr-tools: Research tools for deep-research
//!
//! This crate provides the tools a research session binds:
//! - Search: provider-backed web search with content truncation
//! - Reflect: records strategic notes between searches
//! - Handoff: SQLite store for the question and final report

pub mod handoff;
pub mod reflect;
pub mod search;

use std::sync::Arc;

use dr_core::{Tool, ToolRegistry};

pub use handoff::SqliteHandoffStore;
pub use reflect::{ReflectTool, REFLECTION_ACK};
pub use search::{
    format_results, truncate_content, SearchConfig, SearchHit, SearchProvider, SearchQuery,
    SearchResult, SearchTool, SearchTopic, TavilySearch, DEFAULT_TAVILY_URL,
};

/// Create the search and reflection tools (Arc version)
pub fn create_research_tools_arc(
    provider: Arc<dyn SearchProvider>,
    config: SearchConfig,
) -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(SearchTool::new(provider, config)),
        Arc::new(ReflectTool::new()),
    ]
}

/// Registry holding exactly the tools a research session requires.
pub fn research_registry(provider: Arc<dyn SearchProvider>, config: SearchConfig) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    for tool in create_research_tools_arc(provider, config) {
        registry.register(tool);
    }
    registry
}
