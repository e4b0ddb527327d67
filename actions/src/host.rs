use miette::Diagnostic;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// The dashboard around a widget: everything an action can ask it to do.
pub trait DashboardHost: Send + Sync {
    fn open_link(&self, url: &str, new_tab: bool) -> Result<(), HostError>;

    fn navigate(&self, path: &str) -> Result<(), HostError>;

    /// Hand a remote command to the device control channel.
    fn send_rpc(&self, request: &RpcRequest) -> Result<(), HostError>;

    fn update_dashboard_state(&self, update: &StateUpdate) -> Result<(), HostError>;
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcRequest {
    pub method: String,
    pub params: Value,
    pub one_way: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Entity id the action fired for, when the widget passed one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_id: Option<String>,
    /// The variables the action fired with (`entityId`, `entityName`, ...).
    pub params: Value,
}

/// A dashboard host refusing or failing a request.
#[derive(Debug, Error, Diagnostic)]
#[error("{message}")]
#[diagnostic(code(actions::host_error))]
pub struct HostError {
    message: String,
}

impl HostError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Host that only records what it was asked to do in the log.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingHost;

impl DashboardHost for LoggingHost {
    fn open_link(&self, url: &str, new_tab: bool) -> Result<(), HostError> {
        tracing::info!(%url, new_tab, "open link");
        Ok(())
    }

    fn navigate(&self, path: &str) -> Result<(), HostError> {
        tracing::info!(%path, "navigate");
        Ok(())
    }

    fn send_rpc(&self, request: &RpcRequest) -> Result<(), HostError> {
        tracing::info!(method = %request.method, one_way = request.one_way, "rpc");
        Ok(())
    }

    fn update_dashboard_state(&self, update: &StateUpdate) -> Result<(), HostError> {
        tracing::info!(state = ?update.state_id, "update dashboard state");
        Ok(())
    }
}
