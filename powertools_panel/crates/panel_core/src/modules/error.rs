use crate::modules::protocol::ErrorCode;
use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PanelError {
    #[error("backend is not ready")]
    NotReady,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("backend connection lost")]
    Disconnected,
    #[error("backend error ({code:?}): {msg}")]
    Backend { code: ErrorCode, msg: String },
    #[error("failed to decode reply to {op}: {source}")]
    Decode {
        op: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("catalog request failed: status={status} body={body}")]
    BadStatus { status: StatusCode, body: String },
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("host error: {0}")]
    Host(String),
}

pub type PanelResult<T> = Result<T, PanelError>;
