use crate::entity::EntityKey;
use crate::grid::ChunkSlot;

/// Lifecycle violations detected by the streamer.
///
/// These mean the join/leave notification sequence was broken by the caller;
/// they are not transient and retrying will not help.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("{0} has no tracker attached (missing join notification?)")]
    Untracked(EntityKey),
    #[error("{0} is already tracked (duplicate join notification?)")]
    AlreadyTracked(EntityKey),
    #[error("{key} is not a member of chunk {slot}")]
    NotInChunk { key: EntityKey, slot: ChunkSlot },
}

/// Errors from loading or validating a [`crate::StreamConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
