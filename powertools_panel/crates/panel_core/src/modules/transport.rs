use crate::modules::error::PanelResult;
use crate::modules::protocol::BackendCall;
use futures_util::future::BoxFuture;
use serde_json::Value;

/// Request/response link to the native backend.
pub trait Transport: Send + Sync {
    /// Resolves once the backend has accepted this client.
    fn handshake(&self) -> BoxFuture<'_, PanelResult<()>>;

    /// Sends one call and resolves with its raw reply value.
    fn call(&self, call: BackendCall) -> BoxFuture<'_, PanelResult<Value>>;
}
