use std::sync::Arc;

use sofi_core::workspace::WorkspaceManager;
use sofi_engine::cdb::CdbLibrary;
use sofi_engine::invoker::{CalculationInvoker, InvokerConfig};
use sofi_engine::ResultExtractor;

use crate::config::ServerConfig;
use crate::ws::WsManager;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// WebSocket connection manager (streamed calculation sessions).
    pub ws_manager: Arc<WsManager>,
    /// Registry of live job workspaces.
    pub workspaces: Arc<WorkspaceManager>,
    /// Runs the calculation engine.
    pub invoker: Arc<CalculationInvoker>,
    /// Reads result databases produced by the engine.
    pub extractor: ResultExtractor,
}

impl AppState {
    /// Wire up the job pipeline from configuration and a loaded result
    /// database library.
    pub fn new(config: ServerConfig, cdb_library: Arc<dyn CdbLibrary>) -> Self {
        let invoker_config = InvokerConfig {
            timeout: config.engine.calculation_timeout(),
            ..InvokerConfig::new(&config.engine.executable)
        };

        Self {
            workspaces: Arc::new(WorkspaceManager::new(&config.engine.workspace_root)),
            invoker: Arc::new(CalculationInvoker::new(invoker_config)),
            extractor: ResultExtractor::new(cdb_library).with_load_case(config.engine.load_case),
            ws_manager: Arc::new(WsManager::new()),
            config: Arc::new(config),
        }
    }
}
