use thiserror::Error;
use tokio::runtime::TryCurrentError;

use crate::session::ConnectionId;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session {0} is disposed")]
    Disposed(ConnectionId),
    #[error("no app registered as `{0}`")]
    UnknownApp(String),
    #[error("transport failed: {0}")]
    Transport(String),
    #[error("sessions must be created inside a tokio runtime")]
    NotRunning(#[from] TryCurrentError),
}
