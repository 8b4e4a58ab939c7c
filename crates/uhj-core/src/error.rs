//! Encoder error taxonomy

use thiserror::Error;

#[derive(Error, Debug)]
pub enum UhjError {
    #[error("unrecognized channel map: {0:?}")]
    UnrecognizedChannelMap(Vec<String>),

    #[error("invalid block: {0}")]
    InvalidBlock(String),
}

pub type UhjResult<T> = Result<T, UhjError>;
