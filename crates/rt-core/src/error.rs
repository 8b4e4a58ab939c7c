//! Backend error taxonomy

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("no matching device found")]
    NoDevice,

    #[error("device error: {0}")]
    DeviceError(String),

    #[error("audio server unavailable: {0}")]
    ServerUnavailable(String),

    #[error("failed to parse server value: {0}")]
    PodParseError(String),
}

pub type BackendResult<T> = Result<T, BackendError>;
