use std::time::Duration;

use common::ProtocolError;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("no reply within {0:?}")]
    Timeout(Duration),

    #[error("{0} was rejected by the brick")]
    Rejected(&'static str),

    #[error("unexpected reply: {0}")]
    UnexpectedReply(Value),

    #[error("no {class_name} device matches the query")]
    DeviceNotConnected { class_name: String },
}

pub type Result<T> = std::result::Result<T, ClientError>;
