use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use rmcp::{
    ErrorData as McpError, ServerHandler, ServiceExt,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, Implementation, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
    transport::stdio,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::graph::{
    Entity, EntityUpdate, KnowledgeGraph, ObservationDeletion, ObservationInput, Relation,
    RelationRef,
};
use crate::manager::KnowledgeGraphManager;
use crate::store::JsonlStore;

mod graph;
mod logging;
mod manager;
mod search;
mod store;
mod transfer;

use logging::{TransportMode, init_logging};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the memory file (falls back to MEMORY_FILE_PATH, then ./memory.jsonl)
    #[arg(short = 'm', long, value_name = "PATH")]
    memory_path: Option<String>,

    /// Import a JSON graph document into the memory file, then exit
    #[arg(long, value_name = "PATH")]
    import: Option<PathBuf>,

    /// Export the graph as pretty-printed JSON to the given path, then exit
    #[arg(long, value_name = "PATH")]
    export: Option<PathBuf>,

    /// Enable streamable HTTP mode (default: stdio)
    #[arg(short = 's', long = "stream")]
    stream_mode: bool,

    /// HTTP port for stream mode
    #[arg(short = 'p', long, default_value = "8000")]
    port: u16,

    /// Bind address for stream mode
    #[arg(short = 'b', long, default_value = "127.0.0.1")]
    bind: String,

    /// Enable file logging. Optionally specify log file name (default: memory-mcp-rs.log)
    #[arg(short = 'l', long, value_name = "FILE", num_args = 0..=1, default_missing_value = "memory-mcp-rs.log")]
    log: Option<String>,
}

#[derive(Clone)]
struct MemoryServer {
    manager: Arc<KnowledgeGraphManager>,
    tool_router: ToolRouter<Self>,
}

impl MemoryServer {
    fn new(manager: Arc<KnowledgeGraphManager>) -> Self {
        Self {
            manager,
            tool_router: Self::tool_router(),
        }
    }

    fn server_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: Default::default(),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "memory-mcp-rs".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                title: None,
                website_url: None,
                icons: None,
            },
            instructions: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct CreateEntitiesArgs {
    entities: Vec<Entity>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct CreateRelationsArgs {
    relations: Vec<Relation>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct AddObservationsArgs {
    observations: Vec<ObservationInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
struct DeleteEntitiesArgs {
    /// An array of entity names to delete
    entity_names: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct DeleteObservationsArgs {
    deletions: Vec<ObservationDeletion>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct DeleteRelationsArgs {
    /// An array of relations to delete
    relations: Vec<RelationRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct SearchNodesArgs {
    /// The search query to match against entity names, types, and observation content
    query: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct OpenNodesArgs {
    /// An array of entity names to retrieve
    names: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct UpdateEntitiesArgs {
    entities: Vec<EntityUpdate>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct UpdateRelationsArgs {
    relations: Vec<RelationRef>,
}

#[tool_router]
impl MemoryServer {
    #[tool(
        name = "create_entities",
        description = "Create multiple new entities in the knowledge graph"
    )]
    async fn create_entities(
        &self,
        Parameters(CreateEntitiesArgs { entities }): Parameters<CreateEntitiesArgs>,
    ) -> Result<CallToolResult, McpError> {
        let added = self
            .manager
            .create_entities(entities)
            .await
            .map_err(internal_err("Failed to create entities"))?;
        json_result(&added, json!({ "entities": &added }))
    }

    #[tool(
        name = "create_relations",
        description = "Create multiple new relations between entities in the knowledge graph. Relations should be in active voice"
    )]
    async fn create_relations(
        &self,
        Parameters(CreateRelationsArgs { relations }): Parameters<CreateRelationsArgs>,
    ) -> Result<CallToolResult, McpError> {
        let added = self
            .manager
            .create_relations(relations)
            .await
            .map_err(internal_err("Failed to create relations"))?;
        json_result(&added, json!({ "relations": &added }))
    }

    #[tool(
        name = "add_observations",
        description = "Add new observations to existing entities in the knowledge graph"
    )]
    async fn add_observations(
        &self,
        Parameters(AddObservationsArgs { observations }): Parameters<AddObservationsArgs>,
    ) -> Result<CallToolResult, McpError> {
        let results = self
            .manager
            .add_observations(observations)
            .await
            .map_err(internal_err("Failed to add observations"))?;
        json_result(&results, json!({ "results": &results }))
    }

    #[tool(
        name = "delete_entities",
        description = "Delete multiple entities and their associated relations from the knowledge graph"
    )]
    async fn delete_entities(
        &self,
        Parameters(DeleteEntitiesArgs { entity_names }): Parameters<DeleteEntitiesArgs>,
    ) -> Result<CallToolResult, McpError> {
        self.manager
            .delete_entities(entity_names)
            .await
            .map_err(internal_err("Failed to delete entities"))?;
        Ok(CallToolResult::success(vec![Content::text(
            "Entities deleted successfully",
        )]))
    }

    #[tool(
        name = "delete_observations",
        description = "Delete specific observations from entities in the knowledge graph"
    )]
    async fn delete_observations(
        &self,
        Parameters(DeleteObservationsArgs { deletions }): Parameters<DeleteObservationsArgs>,
    ) -> Result<CallToolResult, McpError> {
        self.manager
            .delete_observations(deletions)
            .await
            .map_err(internal_err("Failed to delete observations"))?;
        Ok(CallToolResult::success(vec![Content::text(
            "Observations deleted successfully",
        )]))
    }

    #[tool(
        name = "delete_relations",
        description = "Delete multiple relations from the knowledge graph"
    )]
    async fn delete_relations(
        &self,
        Parameters(DeleteRelationsArgs { relations }): Parameters<DeleteRelationsArgs>,
    ) -> Result<CallToolResult, McpError> {
        self.manager
            .delete_relations(relations)
            .await
            .map_err(internal_err("Failed to delete relations"))?;
        Ok(CallToolResult::success(vec![Content::text(
            "Relations deleted successfully",
        )]))
    }

    #[tool(name = "read_graph", description = "Read the entire knowledge graph")]
    async fn read_graph(&self) -> Result<CallToolResult, McpError> {
        let graph = self
            .manager
            .read_graph()
            .await
            .map_err(internal_err("Failed to read graph"))?;
        graph_result(&graph)
    }

    #[tool(
        name = "search_nodes",
        description = "Search for nodes in the knowledge graph based on a query"
    )]
    async fn search_nodes(
        &self,
        Parameters(SearchNodesArgs { query }): Parameters<SearchNodesArgs>,
    ) -> Result<CallToolResult, McpError> {
        let graph = self
            .manager
            .search_nodes(&query)
            .await
            .map_err(internal_err("Failed to search nodes"))?;
        graph_result(&graph)
    }

    #[tool(
        name = "open_nodes",
        description = "Open specific nodes in the knowledge graph by their names"
    )]
    async fn open_nodes(
        &self,
        Parameters(OpenNodesArgs { names }): Parameters<OpenNodesArgs>,
    ) -> Result<CallToolResult, McpError> {
        let graph = self
            .manager
            .open_nodes(names)
            .await
            .map_err(internal_err("Failed to open nodes"))?;
        graph_result(&graph)
    }

    #[tool(
        name = "update_entities",
        description = "Update multiple existing entities in the knowledge graph"
    )]
    async fn update_entities(
        &self,
        Parameters(UpdateEntitiesArgs { entities }): Parameters<UpdateEntitiesArgs>,
    ) -> Result<CallToolResult, McpError> {
        let updated = self
            .manager
            .update_entities(entities)
            .await
            .map_err(internal_err("Failed to update entities"))?;
        json_result(&updated, json!({ "entities": &updated }))
    }

    #[tool(
        name = "update_relations",
        description = "Update multiple existing relations in the knowledge graph"
    )]
    async fn update_relations(
        &self,
        Parameters(UpdateRelationsArgs { relations }): Parameters<UpdateRelationsArgs>,
    ) -> Result<CallToolResult, McpError> {
        let updated = self
            .manager
            .update_relations(relations)
            .await
            .map_err(internal_err("Failed to update relations"))?;
        json_result(&updated, json!({ "relations": &updated }))
    }
}

#[tool_handler]
impl ServerHandler for MemoryServer {
    fn get_info(&self) -> ServerInfo {
        self.server_info()
    }
}

/// Text content carries the operation's raw result pretty-printed (what
/// stdio clients display); structured content wraps it in an object.
fn json_result<T: Serialize>(
    value: &T,
    structured: serde_json::Value,
) -> Result<CallToolResult, McpError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(internal_err("Failed to serialize result"))?;
    Ok(CallToolResult {
        content: vec![Content::text(text)],
        structured_content: Some(structured),
        is_error: Some(false),
        meta: None,
    })
}

fn graph_result(graph: &KnowledgeGraph) -> Result<CallToolResult, McpError> {
    let structured =
        serde_json::to_value(graph).map_err(internal_err("Failed to serialize graph"))?;
    let text = serde_json::to_string_pretty(&structured)
        .map_err(internal_err("Failed to serialize graph"))?;
    Ok(CallToolResult {
        content: vec![Content::text(text)],
        structured_content: Some(structured),
        is_error: Some(false),
        meta: None,
    })
}

fn internal_err<T: ToString>(message: &'static str) -> impl FnOnce(T) -> McpError + Clone {
    move |err| McpError::internal_error(message, Some(json!({ "error": err.to_string() })))
}

/// Run server in stdio mode (default)
async fn run_stdio_mode(server: MemoryServer) -> Result<(), Box<dyn std::error::Error>> {
    let transport = stdio();
    let svc = server.serve(transport).await?;
    svc.waiting().await?;
    Ok(())
}

/// Run server in streamable HTTP mode
async fn run_stream_mode(
    server: MemoryServer,
    bind: &str,
    port: u16,
) -> Result<(), Box<dyn std::error::Error>> {
    use rmcp::transport::StreamableHttpService;
    use rmcp::transport::streamable_http_server::session::local::LocalSessionManager;

    let addr = format!("{}:{}", bind, port);
    tracing::info!("Starting MCP HTTP server on http://{}/mcp", addr);

    let service = StreamableHttpService::new(
        move || Ok(server.clone()),
        LocalSessionManager::default().into(),
        Default::default(),
    );

    let router = axum::Router::new()
        .nest_service("/mcp", service)
        .route("/health", axum::routing::get(|| async { "OK" }));

    let tcp_listener = tokio::net::TcpListener::bind(&addr).await?;

    axum::serve(tcp_listener, router)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mode = if args.stream_mode {
        TransportMode::Stream
    } else {
        TransportMode::Stdio
    };

    // stdio mode MUST NOT log to stderr: any output during the handshake
    // causes "connection closed" in MCP clients.
    let _log_guard = init_logging(mode, args.log)?;

    let memory_path = args
        .memory_path
        .or_else(|| std::env::var("MEMORY_FILE_PATH").ok());
    let store = JsonlStore::new(store::resolve_memory_path(memory_path.as_deref()));
    let manager = Arc::new(KnowledgeGraphManager::new(store));

    // Import/export run as one-shot CLI operations without a server.
    if args.import.is_some() || args.export.is_some() {
        if let Some(path) = &args.import {
            let summary = transfer::import_graph(&manager, path).await?;
            println!(
                "Imported {} entities and {} relations.",
                summary.entities, summary.relations
            );
        }
        if let Some(path) = &args.export {
            transfer::export_graph(&manager, path).await?;
            println!("Graph exported to {}", path.display());
        }
        return Ok(());
    }

    let server = MemoryServer::new(manager);
    match mode {
        TransportMode::Stdio => run_stdio_mode(server).await,
        TransportMode::Stream => run_stream_mode(server, &args.bind, args.port).await,
    }
}
