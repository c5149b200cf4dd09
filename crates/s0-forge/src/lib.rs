//! Component generation on top of similarity retrieval.
//!
//! Provides the generation pipeline: streaming LLM client, prompt
//! construction, marker-based response parsing, and orchestration with
//! graceful degradation when the model fails.

pub mod llm;
pub mod pipeline;
pub mod prompt;
