//! Component retrieval over dual embedding spaces.
//!
//! Embeds a free-text query with a code-space encoder and a summary-space
//! encoder, queries a vector corpus (pgvector or SQLite) in each space, and
//! merges the ranked results.

pub mod embedding;
pub mod postgres;
pub mod search;
pub mod store;
