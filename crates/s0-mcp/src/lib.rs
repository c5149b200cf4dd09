//! MCP server interface exposing s0 search and generation to IDEs and agents.
//!
//! Implements a Model Context Protocol server using rmcp that exposes the
//! `search_components` and `generate_component` tools over stdio transport.
//!
//! # Examples
//!
//! ```no_run
//! use s0_core::S0Config;
//! use s0_forge::pipeline::GenerationPipeline;
//!
//! # async fn example() -> Result<(), s0_core::S0Error> {
//! let config = S0Config::default();
//! let pipeline = GenerationPipeline::from_config(&config).await?;
//! s0_mcp::server::run_server(pipeline, &config.generation).await?;
//! # Ok(())
//! # }
//! ```

pub mod server;
pub mod tools;
