use crate::store::StoreError;
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum PanelError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Live feed for {0} ended unexpectedly")]
    FeedClosed(String),

    #[error("Gesture queue for this engine was already taken")]
    GestureQueueTaken,
}

pub type Result<T> = std::result::Result<T, PanelError>;
