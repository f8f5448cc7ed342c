use thiserror::Error;

use circle_net::ControllerError;
use circle_shared::error::BridgeError;
use circle_store::StoreError;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Preferences error: {0}")]
    Preferences(#[from] BridgeError),

    #[error("Controller error: {0}")]
    Controller(#[from] ControllerError),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, ClientError>;
