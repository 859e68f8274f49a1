use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type SessionId = u64;
pub type UserId = String;

/// Color of a cell nobody has painted. Cells in this color are left out of
/// sparse snapshots.
pub const DEFAULT_COLOR: &str = "#FFFFFF";

pub fn is_default_color(color: &str) -> bool {
    color.eq_ignore_ascii_case(DEFAULT_COLOR)
}

/// A placed cell as seen by clients, with the owner's display name joined in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pixel {
    pub x: i32,
    pub y: i32,
    pub color: String,
    pub user_id: UserId,
    pub username: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SparsePixel {
    pub x: i32,
    pub y: i32,
    pub color: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub total_pixels: usize,
    pub unique_users: usize,
    pub pixels_placed_now: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CooldownInfo {
    pub can_place: bool,
    pub cooldown_end: Option<DateTime<Utc>>,
}

impl CooldownInfo {
    /// `end` is the stored cooldown record, if any. A user without a record
    /// has never placed and may always place.
    pub fn at(now: DateTime<Utc>, end: Option<DateTime<Utc>>) -> Self {
        Self {
            can_place: end.map_or(true, |end| now >= end),
            cooldown_end: end,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Stored state of one coordinate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    pub color: String,
    pub user_id: UserId,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasSnapshot {
    pub sparse_pixels: Vec<SparsePixel>,
    pub size: i32,
    pub last_update: DateTime<Utc>,
    pub stats: Stats,
    pub recent_changes: Vec<Pixel>,
}

pub fn in_bounds(size: i32, x: i32, y: i32) -> bool {
    (0..size).contains(&x) && (0..size).contains(&y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn it_allows_placing_without_cooldown_record() {
        let info = CooldownInfo::at(Utc::now(), None);
        assert!(info.can_place);
        assert_eq!(info.cooldown_end, None);
    }

    #[test]
    fn it_allows_placing_exactly_at_cooldown_end() {
        let now = Utc::now();
        assert!(CooldownInfo::at(now, Some(now)).can_place);
        assert!(!CooldownInfo::at(now, Some(now + Duration::milliseconds(1))).can_place);
    }

    #[test]
    fn it_checks_bounds() {
        assert!(in_bounds(64, 0, 0));
        assert!(in_bounds(64, 63, 63));
        assert!(!in_bounds(64, 64, 0));
        assert!(!in_bounds(64, 0, -1));
        assert!(!in_bounds(0, 0, 0));
    }

    #[test]
    fn it_treats_white_as_default_in_any_case() {
        assert!(is_default_color("#ffffff"));
        assert!(is_default_color(DEFAULT_COLOR));
        assert!(!is_default_color("#FF0000"));
    }
}
