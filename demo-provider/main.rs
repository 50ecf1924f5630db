#![forbid(unsafe_code)]

//! `agent-relay-demo-provider`: a minimal stdio MCP provider.
//!
//! Exposes an `echo` tool, a `fail` tool that always reports a tool error,
//! and one text resource. Register it in the provider registry to check a
//! relay deployment end to end without installing a third-party provider.

use std::future::Future;
use std::path::PathBuf;

use clap::Parser;
use rmcp::handler::server::ServerHandler;
use rmcp::model::{
    CallToolRequestParam, CallToolResult, Content, ListResourcesResult, ListToolsResult,
    PaginatedRequestParam, ReadResourceRequestParam, ReadResourceResult, Resource,
    ResourceContents, ServerCapabilities, ServerInfo, Tool,
};
use rmcp::service::{RequestContext, RoleServer, ServiceExt};
use rmcp::transport::io::stdio;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::info;
use tracing_subscriber::EnvFilter;

use agent_relay::{AppError, Result};

/// URI of the single resource this provider serves.
const README_URI: &str = "demo://readme";

/// Body of [`README_URI`].
const README_TEXT: &str = "agent-relay demo provider: tools `echo` and `fail`.";

#[derive(Debug, Parser)]
#[command(
    name = "agent-relay-demo-provider",
    about = "Minimal stdio MCP provider for agent-relay",
    version,
    long_about = None
)]
struct Cli {
    /// Write this process's PID to the given file before serving.
    #[arg(long)]
    pid_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy)]
struct DemoProvider;

impl DemoProvider {
    fn tools() -> std::result::Result<Vec<Tool>, rmcp::ErrorData> {
        decode(json!([
            {
                "name": "echo",
                "description": "Return the `text` argument unchanged",
                "inputSchema": {
                    "type": "object",
                    "properties": {"text": {"type": "string"}},
                    "required": ["text"]
                }
            },
            {
                "name": "fail",
                "description": "Always report a tool error",
                "inputSchema": {"type": "object", "properties": {}}
            }
        ]))
    }

    fn resources() -> std::result::Result<Vec<Resource>, rmcp::ErrorData> {
        decode(json!([
            {"uri": README_URI, "name": "readme", "mimeType": "text/plain"}
        ]))
    }
}

impl ServerHandler for DemoProvider {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .build(),
            ..ServerInfo::default()
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = std::result::Result<ListToolsResult, rmcp::ErrorData>> + Send + '_
    {
        std::future::ready(Self::tools().map(ListToolsResult::with_all_items))
    }

    fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = std::result::Result<CallToolResult, rmcp::ErrorData>> + Send + '_
    {
        let result = match request.name.as_ref() {
            "echo" => {
                let text = request
                    .arguments
                    .as_ref()
                    .and_then(|args| args.get("text"))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                Ok(CallToolResult::success(vec![Content::text(text.to_owned())]))
            }
            "fail" => Ok(CallToolResult::error(vec![Content::text(
                "demo tool failure",
            )])),
            other => Err(rmcp::ErrorData::invalid_params(
                format!("unknown tool: {other}"),
                None,
            )),
        };
        std::future::ready(result)
    }

    fn list_resources(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = std::result::Result<ListResourcesResult, rmcp::ErrorData>> + Send + '_
    {
        std::future::ready(Self::resources().map(ListResourcesResult::with_all_items))
    }

    fn read_resource(
        &self,
        request: ReadResourceRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = std::result::Result<ReadResourceResult, rmcp::ErrorData>> + Send + '_
    {
        let result = if request.uri == README_URI {
            Ok(ReadResourceResult {
                contents: vec![ResourceContents::text(README_TEXT, request.uri.clone())],
            })
        } else {
            Err(rmcp::ErrorData::invalid_params(
                format!("unknown resource: {}", request.uri),
                None,
            ))
        };
        std::future::ready(result)
    }
}

fn main() -> Result<()> {
    let args = Cli::parse();

    // stdout carries the protocol; logs go to stderr.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init()
        .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?;

    runtime.block_on(serve(args))
}

async fn serve(args: Cli) -> Result<()> {
    if let Some(ref path) = args.pid_file {
        std::fs::write(path, std::process::id().to_string())?;
    }

    let service = DemoProvider
        .serve(stdio())
        .await
        .map_err(|err| AppError::Provider(format!("demo provider handshake failed: {err}")))?;
    info!("demo provider serving on stdio");

    let reason = service
        .waiting()
        .await
        .map_err(|err| AppError::Provider(format!("demo provider stopped: {err}")))?;
    info!(?reason, "demo provider shut down");
    Ok(())
}

/// Build protocol objects from their wire shape.
fn decode<T: DeserializeOwned>(value: Value) -> std::result::Result<T, rmcp::ErrorData> {
    serde_json::from_value(value)
        .map_err(|err| rmcp::ErrorData::internal_error(err.to_string(), None))
}
