use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};

use crate::store::{CanvasStore, StoreError, StoreResult};
use crate::types::{is_default_color, Cell, Pixel, SparsePixel, Stats, User, UserId};

type CellKey = (i32, i32, i32);

#[derive(Default)]
struct Tables {
    users: HashMap<UserId, User>,
    cells: HashMap<CellKey, Cell>,
    cooldowns: HashMap<UserId, DateTime<Utc>>,
}

impl Tables {
    fn cells_of(&self, size: i32) -> impl Iterator<Item = (&CellKey, &Cell)> {
        self.cells.iter().filter(move |((s, _, _), _)| *s == size)
    }

    fn newest_first(&self, size: i32) -> Vec<(&CellKey, &Cell)> {
        let mut cells = self.cells_of(size).collect::<Vec<_>>();
        cells.sort_by(|(_, a), (_, b)| b.timestamp.cmp(&a.timestamp));
        cells
    }
}

/// In-process `CanvasStore`. Each call holds one lock for its whole duration,
/// which gives per-key atomic upserts.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))
    }
}

impl CanvasStore for MemoryStore {
    fn upsert_user(&self, user_id: &str, username: &str) -> StoreResult<User> {
        let now = Utc::now();
        let mut tables = self.lock()?;
        let user = tables
            .users
            .entry(user_id.to_owned())
            .and_modify(|user| {
                user.username = username.to_owned();
                user.updated_at = now;
            })
            .or_insert_with(|| User {
                id: user_id.to_owned(),
                username: username.to_owned(),
                created_at: now,
                updated_at: now,
            });
        Ok(user.clone())
    }

    fn get_user(&self, user_id: &str) -> StoreResult<User> {
        self.lock()?
            .users
            .get(user_id)
            .cloned()
            .ok_or_else(|| StoreError::UserNotFound(user_id.to_owned()))
    }

    fn set_cell(
        &self,
        size: i32,
        x: i32,
        y: i32,
        color: &str,
        user_id: &str,
        timestamp: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut tables = self.lock()?;
        let key = (size, x, y);
        if let Some(existing) = tables.cells.get(&key) {
            if existing.timestamp > timestamp {
                log::debug!(
                    "Ignoring stale write to ({}, {}) on canvas {}: {} is older than {}",
                    x,
                    y,
                    size,
                    timestamp,
                    existing.timestamp
                );
                return Ok(());
            }
        }
        tables.cells.insert(
            key,
            Cell {
                color: color.to_owned(),
                user_id: user_id.to_owned(),
                timestamp,
            },
        );
        Ok(())
    }

    fn get_cell(&self, size: i32, x: i32, y: i32) -> StoreResult<Option<Cell>> {
        Ok(self.lock()?.cells.get(&(size, x, y)).cloned())
    }

    fn sparse_cells(&self, size: i32) -> StoreResult<Vec<SparsePixel>> {
        let tables = self.lock()?;
        Ok(tables
            .newest_first(size)
            .into_iter()
            .filter(|(_, cell)| !is_default_color(&cell.color))
            .map(|((_, x, y), cell)| SparsePixel {
                x: *x,
                y: *y,
                color: cell.color.clone(),
            })
            .collect())
    }

    fn stats(&self, size: i32) -> StoreResult<Stats> {
        let an_hour_ago = Utc::now() - Duration::hours(1);
        let tables = self.lock()?;

        let mut stats = Stats::default();
        let mut owners = HashSet::new();
        for (_, cell) in tables.cells_of(size) {
            stats.total_pixels += 1;
            owners.insert(cell.user_id.as_str());
            if cell.timestamp > an_hour_ago {
                stats.pixels_placed_now += 1;
            }
        }
        stats.unique_users = owners.len();
        Ok(stats)
    }

    fn recent_changes(&self, size: i32, limit: usize) -> StoreResult<Vec<Pixel>> {
        let tables = self.lock()?;
        Ok(tables
            .newest_first(size)
            .into_iter()
            .filter_map(|((_, x, y), cell)| {
                // cells whose owner has no user record are not reported
                tables.users.get(&cell.user_id).map(|user| Pixel {
                    x: *x,
                    y: *y,
                    color: cell.color.clone(),
                    user_id: cell.user_id.clone(),
                    username: user.username.clone(),
                    timestamp: cell.timestamp.timestamp_millis(),
                })
            })
            .take(limit)
            .collect())
    }

    fn cooldown(&self, user_id: &str) -> StoreResult<Option<DateTime<Utc>>> {
        Ok(self.lock()?.cooldowns.get(user_id).copied())
    }

    fn set_cooldown(&self, user_id: &str, end: DateTime<Utc>) -> StoreResult<()> {
        self.lock()?.cooldowns.insert(user_id.to_owned(), end);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> DateTime<Utc> {
        Utc::now() - Duration::minutes(10)
    }

    #[test]
    fn it_keeps_the_latest_write_per_cell() {
        let store = MemoryStore::new();
        let t0 = base();
        store.set_cell(64, 3, 4, "#FF0000", "u1", t0).expect("");
        store
            .set_cell(64, 3, 4, "#00FF00", "u2", t0 + Duration::milliseconds(20))
            .expect("");
        store
            .set_cell(64, 3, 4, "#0000FF", "u3", t0 + Duration::milliseconds(10))
            .expect("");

        let cell = store.get_cell(64, 3, 4).expect("").expect("");
        assert_eq!(cell.color, "#00FF00");
        assert_eq!(cell.user_id, "u2");
        assert_eq!(cell.timestamp, t0 + Duration::milliseconds(20));
    }

    #[test]
    fn it_separates_canvas_sizes() {
        let store = MemoryStore::new();
        store.set_cell(8, 1, 1, "#FF0000", "u1", base()).expect("");
        assert!(store.get_cell(16, 1, 1).expect("").is_none());
        assert_eq!(store.sparse_cells(16).expect("").len(), 0);
        assert_eq!(store.stats(8).expect("").total_pixels, 1);
    }

    #[test]
    fn it_leaves_default_cells_out_of_sparse_snapshot() {
        let store = MemoryStore::new();
        let t0 = base();
        store.set_cell(64, 0, 0, "#ffffff", "u1", t0).expect("");
        store
            .set_cell(64, 1, 0, "#FF0000", "u1", t0 + Duration::seconds(1))
            .expect("");
        store
            .set_cell(64, 2, 0, "#000000", "u2", t0 + Duration::seconds(2))
            .expect("");

        let sparse = store.sparse_cells(64).expect("");
        assert_eq!(
            sparse,
            vec![
                SparsePixel {
                    x: 2,
                    y: 0,
                    color: "#000000".into()
                },
                SparsePixel {
                    x: 1,
                    y: 0,
                    color: "#FF0000".into()
                },
            ]
        );

        let stats = store.stats(64).expect("");
        assert_eq!(stats.total_pixels, 3);
        assert_eq!(stats.unique_users, 2);
        assert_eq!(stats.pixels_placed_now, 3);
    }

    #[test]
    fn it_counts_only_last_hour_as_placed_now() {
        let store = MemoryStore::new();
        store
            .set_cell(64, 0, 0, "#FF0000", "u1", Utc::now() - Duration::hours(2))
            .expect("");
        store.set_cell(64, 1, 0, "#FF0000", "u1", base()).expect("");

        let stats = store.stats(64).expect("");
        assert_eq!(stats.total_pixels, 2);
        assert_eq!(stats.pixels_placed_now, 1);
    }

    #[test]
    fn it_lists_recent_changes_newest_first_with_current_names() {
        let store = MemoryStore::new();
        let t0 = base();
        store.upsert_user("u1", "alice").expect("");
        for i in 0..5 {
            store
                .set_cell(64, i, 0, "#FF0000", "u1", t0 + Duration::seconds(i as i64))
                .expect("");
        }
        store.upsert_user("u1", "alice2").expect("");

        let changes = store.recent_changes(64, 3).expect("");
        assert_eq!(
            changes.iter().map(|p| p.x).collect::<Vec<_>>(),
            vec![4, 3, 2]
        );
        assert!(changes.iter().all(|p| p.username == "alice2"));
        assert_eq!(
            changes[0].timestamp,
            (t0 + Duration::seconds(4)).timestamp_millis()
        );
    }

    #[test]
    fn it_upserts_users() {
        let store = MemoryStore::new();
        assert_eq!(
            store.get_user("u1"),
            Err(StoreError::UserNotFound("u1".into()))
        );

        let created = store.upsert_user("u1", "alice").expect("");
        let renamed = store.upsert_user("u1", "bob").expect("");
        assert_eq!(renamed.username, "bob");
        assert_eq!(renamed.created_at, created.created_at);
        assert_eq!(store.get_user("u1").expect("").username, "bob");
    }

    #[test]
    fn it_stores_cooldowns() {
        let store = MemoryStore::new();
        assert_eq!(store.cooldown("u1").expect(""), None);

        let end = Utc::now() + Duration::seconds(5);
        store.set_cooldown("u1", end).expect("");
        assert_eq!(store.cooldown("u1").expect(""), Some(end));
    }
}
