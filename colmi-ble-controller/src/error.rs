use std::time::Duration;

use crate::session::SessionState;
use crate::transport::Endpoint;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),
    #[error(transparent)]
    Protocol(#[from] colmi_proto::Error),
    #[error("no Bluetooth adapter found")]
    NoAdapter,
    #[error("no compatible ring found")]
    DeviceNotFound,
    #[error("connecting timed out after {0:?}")]
    ConnectTimeout(Duration),
    #[error("{0} characteristic not found")]
    MissingCharacteristic(Endpoint),
    #[error("invalid characteristic UUID {0}")]
    InvalidUuid(&'static str),
    #[error("no response to command 0x{command:02x} within {timeout:?}")]
    Timeout { command: u8, timeout: Duration },
    #[error("big-data transfer 0x{data_id:02x} did not complete within {timeout:?}")]
    BigDataTimeout { data_id: u8, timeout: Duration },
    #[error("ring disconnected")]
    Disconnected,
    #[error("session is {0}, commands need it to be ready")]
    NotReady(SessionState),
    #[error("invalid session transition {from} -> {to}")]
    InvalidTransition { from: SessionState, to: SessionState },
    #[error("could not reach the ring after {attempts} attempts: {source}")]
    ReconnectFailed {
        attempts: u32,
        #[source]
        source: Box<Error>,
    },
    #[error("failed to access config: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
