//! Tool implementations for the s0 MCP server.
//!
//! Two tools are exposed: `search_components` and `generate_component`. Both
//! delegate to the shared [`GenerationPipeline`] and return JSON via
//! `CallToolResult`, using the same response shapes as the HTTP API.

use rmcp::{
    handler::server::{tool::ToolRouter, wrapper::Parameters},
    model::*,
    schemars, tool, tool_router, ErrorData as McpError,
};
use s0_core::{OutputFormat, SearchMode};
use s0_forge::pipeline::{GenerateResponse, GenerationPipeline};
use serde::Deserialize;

const DEFAULT_SEARCH_LIMIT: usize = 10;

/// MCP server exposing component search and generation.
#[derive(Clone)]
pub struct S0Server {
    pub(crate) pipeline: GenerationPipeline,
    pub(crate) default_similar_count: usize,
    pub(crate) tool_router: ToolRouter<Self>,
}

// --- Parameter structs ---

/// Parameters for the `search_components` tool.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct SearchComponentsParams {
    /// Natural-language description of the component to find.
    pub query: String,
    /// Maximum results (default: 10).
    pub limit: Option<usize>,
    /// Return one deduplicated list instead of per-space lists (default: false).
    pub merged: Option<bool>,
}

/// Parameters for the `generate_component` tool.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct GenerateComponentParams {
    /// Description of the component to generate.
    pub query: String,
    /// Output format: "html" (default), "jsx-js", or "jsx-ts".
    pub output_format: Option<String>,
    /// Similar components to retrieve as references (default: from config).
    pub similar_count: Option<usize>,
}

fn mcp_err(msg: impl Into<String>) -> McpError {
    McpError::internal_error(msg.into(), None)
}

#[tool_router]
impl S0Server {
    /// Create a server over `pipeline`.
    ///
    /// `default_similar_count` applies when a generate call omits
    /// `similar_count`.
    pub fn new(pipeline: GenerationPipeline, default_similar_count: usize) -> Self {
        Self {
            pipeline,
            default_similar_count,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(
        name = "search_components",
        description = "Find UI components similar to a description. Queries the code and summary embedding spaces and returns ranked matches with their source. Use this to discover existing components before writing a new one."
    )]
    pub async fn search_components(
        &self,
        Parameters(params): Parameters<SearchComponentsParams>,
    ) -> Result<CallToolResult, McpError> {
        let limit = params
            .limit
            .unwrap_or(DEFAULT_SEARCH_LIMIT)
            .min(self.pipeline.max_limit());
        let mode = if params.merged.unwrap_or(false) {
            SearchMode::Merged
        } else {
            SearchMode::PerSpace
        };

        let response = self
            .pipeline
            .search()
            .search(&params.query, limit, mode)
            .await
            .map_err(|e| mcp_err(format!("Search failed: {e}")))?;

        let json = serde_json::to_string_pretty(&response).map_err(|e| mcp_err(e.to_string()))?;
        Ok(CallToolResult::success(vec![Content::text(json)]))
    }

    #[tool(
        name = "generate_component",
        description = "Generate a new UI component from a description, grounded on the most similar components in the corpus. Returns the generated code, an explanation, and the reference components. If the model fails, the reference components are still returned with an error message."
    )]
    pub async fn generate_component(
        &self,
        Parameters(params): Parameters<GenerateComponentParams>,
    ) -> Result<CallToolResult, McpError> {
        let format = match params.output_format.as_deref() {
            Some(raw) => raw
                .parse::<OutputFormat>()
                .map_err(|e| McpError::invalid_params(e, None))?,
            None => OutputFormat::default(),
        };
        let similar_count = params.similar_count.unwrap_or(self.default_similar_count);

        let outcome = self
            .pipeline
            .generate(&params.query, format, similar_count)
            .await
            .map_err(|e| mcp_err(format!("Generation failed: {e}")))?;

        let response = GenerateResponse::from(outcome);
        let json = serde_json::to_string_pretty(&response).map_err(|e| mcp_err(e.to_string()))?;
        Ok(CallToolResult::success(vec![Content::text(json)]))
    }
}
