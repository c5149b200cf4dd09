//! MCP server setup and lifecycle.
//!
//! Provides [`run_server`] which starts the stdio-based MCP server,
//! registering the s0 tools and blocking until the client disconnects.

use rmcp::{model::*, tool_handler, transport::stdio, ServerHandler, ServiceExt};
use s0_core::{GenerationConfig, S0Error};
use s0_forge::pipeline::GenerationPipeline;

use crate::tools::S0Server;

const SERVER_INSTRUCTIONS: &str = "\
s0 retrieves and generates UI components. Use these tools when building interfaces:\n\
- search_components: Find existing components similar to a description\n\
- generate_component: Generate a new HTML, JSX or TSX component grounded on similar ones";

#[tool_handler]
impl ServerHandler for S0Server {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "s0".to_string(),
                title: Some("s0 Component Generator".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: Some(
                    "Similarity search and LLM generation for UI components".to_string(),
                ),
                icons: None,
                website_url: None,
            },
            instructions: Some(SERVER_INSTRUCTIONS.to_string()),
        }
    }
}

/// Start the MCP server on stdio transport.
///
/// This is called by the `s0 mcp` CLI subcommand. It blocks until the
/// client closes stdin.
///
/// # Errors
///
/// Returns [`S0Error::Config`] if the server fails to initialize or
/// encounters a transport error.
pub async fn run_server(
    pipeline: GenerationPipeline,
    generation: &GenerationConfig,
) -> Result<(), S0Error> {
    let server = S0Server::new(pipeline, generation.similar_count);
    let service = server
        .serve(stdio())
        .await
        .map_err(|e| S0Error::Config(format!("MCP server failed to start: {e}")))?;

    tracing::info!("MCP server running on stdio");
    service
        .waiting()
        .await
        .map_err(|e| S0Error::Config(format!("MCP server error: {e}")))?;

    Ok(())
}
