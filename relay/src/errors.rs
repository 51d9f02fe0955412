use crate::config::ValidationError;
use std::io;

#[derive(thiserror::Error, Debug)]
pub enum RelayError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid relay config: {0}")]
    Validation(#[from] ValidationError),
}
