use crate::types::{Cell, Pixel, SparsePixel, Stats, User, UserId};
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("user not found: {0}")]
    UserNotFound(UserId),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence collaborator for cells, users and cooldowns.
///
/// Every call is atomic on its own key; nothing spans several keys. Cells are
/// addressed by `(size, x, y)` so each canvas size is an independent grid.
pub trait CanvasStore: Send + Sync {
    fn upsert_user(&self, user_id: &str, username: &str) -> StoreResult<User>;
    fn get_user(&self, user_id: &str) -> StoreResult<User>;

    /// Last write wins by `timestamp`: a write older than the stored cell is ignored.
    fn set_cell(
        &self,
        size: i32,
        x: i32,
        y: i32,
        color: &str,
        user_id: &str,
        timestamp: DateTime<Utc>,
    ) -> StoreResult<()>;
    fn get_cell(&self, size: i32, x: i32, y: i32) -> StoreResult<Option<Cell>>;

    /// Cells whose color differs from the default, newest first.
    fn sparse_cells(&self, size: i32) -> StoreResult<Vec<SparsePixel>>;
    fn stats(&self, size: i32) -> StoreResult<Stats>;
    /// Newest first, joined with the owner's current display name.
    fn recent_changes(&self, size: i32, limit: usize) -> StoreResult<Vec<Pixel>>;

    fn cooldown(&self, user_id: &str) -> StoreResult<Option<DateTime<Utc>>>;
    fn set_cooldown(&self, user_id: &str, end: DateTime<Utc>) -> StoreResult<()>;
}
