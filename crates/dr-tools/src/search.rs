//! Web search tool backed by an external search provider.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use dr_core::{
    run_with_deadline, Deadline, Error, PropertySchema, ResearchConfig, Tool, ToolDefinition,
    ToolOutput, ToolParameters, SEARCH_TOOL,
};

pub const TRUNCATION_MARKER: &str = "... (truncated)";
pub const NO_RESULTS: &str = "No results found.";
const RESULT_SEPARATOR: &str = "\n\n---\n\n";

pub const DEFAULT_TAVILY_URL: &str = "https://api.tavily.com";

// =============================================================================
// Provider boundary
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchTopic {
    #[default]
    General,
    News,
    Finance,
}

impl SearchTopic {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchTopic::General => "general",
            SearchTopic::News => "news",
            SearchTopic::Finance => "finance",
        }
    }
}

impl std::str::FromStr for SearchTopic {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "general" => Ok(SearchTopic::General),
            "news" => Ok(SearchTopic::News),
            "finance" => Ok(SearchTopic::Finance),
            other => Err(Error::config(format!(
                "unknown search topic '{}' (expected general, news or finance)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchQuery {
    pub query: String,
    pub max_results: usize,
    pub topic: SearchTopic,
    pub include_raw_content: bool,
}

/// An unprocessed result as the provider returned it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SearchHit {
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub raw_content: Option<String>,
}

fn default_title() -> String {
    "No Title".to_string()
}

/// Opaque search backend: query in, hits out.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>, Error>;
}

// =============================================================================
// Tavily
// =============================================================================

pub struct TavilySearch {
    client: Client,
    api_key: String,
    base_url: String,
    timeout: Duration,
}

impl TavilySearch {
    /// Fails when the HTTP client cannot be built (for example, no TLS backend).
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self, Error> {
        let client = Client::builder()
            .user_agent("dr-cli/0.1.0")
            .timeout(timeout)
            .build()
            .map_err(|e| Error::config(format!("failed to build search HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: DEFAULT_TAVILY_URL.to_string(),
            timeout,
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }
}

#[derive(Serialize)]
struct TavilyRequest<'a> {
    query: &'a str,
    max_results: usize,
    topic: SearchTopic,
    include_raw_content: bool,
}

#[derive(Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

fn parse_tavily_response(body: &str) -> Result<Vec<SearchHit>, Error> {
    let response: TavilyResponse = serde_json::from_str(body)
        .map_err(|e| Error::search_provider(format!("Failed to parse search response: {}", e)))?;
    Ok(response.results)
}

#[async_trait]
impl SearchProvider for TavilySearch {
    fn name(&self) -> &str {
        "tavily"
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>, Error> {
        let url = format!("{}/search", self.base_url);
        let body = TavilyRequest {
            query: &query.query,
            max_results: query.max_results,
            topic: query.topic,
            include_raw_content: query.include_raw_content,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::search_timeout(&query.query, self.timeout)
                } else {
                    Error::search_provider(format!("Search request failed: {}", e))
                }
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::search_provider(format!("Failed to read search response: {}", e)))?;

        if !status.is_success() {
            return Err(Error::search_provider(format!("Search API error {}: {}", status, text)));
        }

        parse_tavily_response(&text)
    }
}

// =============================================================================
// Search tool
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub content: String,
    pub truncated: bool,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub timeout: Duration,
    pub max_results: usize,
    /// Per-result content cap, in characters.
    pub content_chars: usize,
    pub topic: SearchTopic,
    pub include_raw_content: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self::from_research(&ResearchConfig::default())
    }
}

impl SearchConfig {
    pub fn from_research(config: &ResearchConfig) -> Self {
        Self {
            timeout: config.search_timeout(),
            max_results: config.search_max_results,
            content_chars: config.search_content_chars,
            topic: SearchTopic::General,
            include_raw_content: false,
        }
    }

    pub fn with_topic(mut self, topic: SearchTopic) -> Self {
        self.topic = topic;
        self
    }

    pub fn with_raw_content(mut self, include: bool) -> Self {
        self.include_raw_content = include;
        self
    }
}

/// Cut `content` to at most `max_chars` characters, appending the marker when cut.
pub fn truncate_content(content: &str, max_chars: usize) -> (String, bool) {
    match content.char_indices().nth(max_chars) {
        Some((idx, _)) => (format!("{}{}", &content[..idx], TRUNCATION_MARKER), true),
        None => (content.to_string(), false),
    }
}

pub fn format_results(results: &[SearchResult]) -> String {
    if results.is_empty() {
        return NO_RESULTS.to_string();
    }
    results
        .iter()
        .map(|r| format!("**{}**\nURL: {}\n{}", r.title, r.url, r.content))
        .collect::<Vec<_>>()
        .join(RESULT_SEPARATOR)
}

pub struct SearchTool {
    provider: Arc<dyn SearchProvider>,
    config: SearchConfig,
}

impl SearchTool {
    pub fn new(provider: Arc<dyn SearchProvider>, config: SearchConfig) -> Self {
        Self { provider, config }
    }

    /// Search with the configured topic and content settings.
    pub async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>, Error> {
        self.run(SearchQuery {
            query: query.to_string(),
            max_results,
            topic: self.config.topic,
            include_raw_content: self.config.include_raw_content,
        })
        .await
    }

    async fn run(&self, query: SearchQuery) -> Result<Vec<SearchResult>, Error> {
        if query.max_results == 0 {
            return Err(Error::tool(SEARCH_TOOL, "max_results must be at least 1"));
        }

        debug!(
            provider = self.provider.name(),
            query = %query.query,
            max_results = query.max_results,
            "Searching"
        );

        let provider = Arc::clone(&self.provider);
        let request = query.clone();
        let outcome =
            run_with_deadline(self.config.timeout, async move { provider.search(&request).await }).await?;

        let hits = match outcome {
            Deadline::Completed(result) => result?,
            Deadline::TimedOut(after) => return Err(Error::search_timeout(query.query, after)),
        };

        let fetched_at = Utc::now();
        let results = hits
            .into_iter()
            .take(query.max_results)
            .map(|hit| {
                let body = match hit.raw_content {
                    Some(raw) if query.include_raw_content && !raw.is_empty() => raw,
                    _ => hit.content,
                };
                let (content, truncated) = truncate_content(&body, self.config.content_chars);
                SearchResult {
                    title: hit.title,
                    url: hit.url,
                    content,
                    truncated,
                    fetched_at,
                }
            })
            .collect::<Vec<_>>();

        debug!(results = results.len(), "Search complete");
        Ok(results)
    }
}

#[derive(Deserialize)]
struct SearchArgs {
    query: String,
    #[serde(default)]
    max_results: Option<usize>,
    #[serde(default)]
    topic: Option<SearchTopic>,
    #[serde(default)]
    include_raw_content: Option<bool>,
}

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &str {
        SEARCH_TOOL
    }

    fn description(&self) -> &str {
        "Search the web. Returns result titles, URLs and page content to cite in your report."
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description()).with_parameters(
            ToolParameters::new()
                .add_property("query", PropertySchema::string("The search query"), true)
                .add_property(
                    "max_results",
                    PropertySchema::integer("Maximum number of results")
                        .with_default(serde_json::json!(self.config.max_results)),
                    false,
                )
                .add_property(
                    "topic",
                    PropertySchema::enum_string(
                        "Topic filter",
                        vec!["general".into(), "news".into(), "finance".into()],
                    )
                    .with_default(serde_json::json!(self.config.topic.as_str())),
                    false,
                )
                .add_property(
                    "include_raw_content",
                    PropertySchema::boolean("Return full page content instead of a snippet"),
                    false,
                ),
        )
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, Error> {
        let args: SearchArgs = serde_json::from_value(arguments)
            .map_err(|e| Error::tool(SEARCH_TOOL, format!("Invalid arguments: {}", e)))?;

        let results = self
            .run(SearchQuery {
                query: args.query,
                max_results: args.max_results.unwrap_or(self.config.max_results),
                topic: args.topic.unwrap_or(self.config.topic),
                include_raw_content: args
                    .include_raw_content
                    .unwrap_or(self.config.include_raw_content),
            })
            .await?;

        Ok(ToolOutput::success(format_results(&results)))
    }
}
