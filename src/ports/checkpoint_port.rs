//! Durable checkpoint storage port trait.

use crate::domain::checkpoint::RunCheckpoint;
use crate::domain::error::SlicetraderError;

/// Shared between the driver thread and foreground readers, so
/// implementations serialize their own access.
pub trait CheckpointPort: Send + Sync {
    fn save(&self, checkpoint: &RunCheckpoint) -> Result<(), SlicetraderError>;

    /// Last committed checkpoint, or `None` for a fresh start. Never fails:
    /// unreadable state is logged and treated as absent.
    fn load(&self) -> Option<RunCheckpoint>;
}
