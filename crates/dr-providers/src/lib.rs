//! dr-providers: LLM provider implementations for deep-research
//!
//! This crate provides implementations of the Provider trait for
//! OpenAI-compatible chat-completions APIs, including local Ollama servers.

pub mod openai;

pub use openai::{strip_thinking_tags, OpenAIProvider, DEFAULT_BASE_URL};
