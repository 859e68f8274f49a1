use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use pixel_system::{
    in_bounds, CanvasSnapshot, CanvasStore, ClientRequest, CooldownInfo, Pixel, PlacePixelRequest,
    ServerEvent, SessionId, Stats, StoreError, UpdateUsernameRequest, User,
};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::Config;
use crate::hub::HubHandle;
use crate::session_registry::SessionTx;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Rejections reported to the requester. The display text is the message of
/// the `error` event.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("Invalid pixel coordinates")]
    InvalidCoordinates,
    #[error("Failed to check cooldown")]
    CheckCooldown(#[source] StoreError),
    #[error("Failed to create user")]
    CreateUser(#[source] StoreError),
    #[error("Failed to set pixel")]
    SetPixel(#[source] StoreError),
    #[error("Failed to get canvas")]
    GetCanvas(#[source] StoreError),
    #[error("Failed to update username")]
    UpdateUsername(#[source] StoreError),
    #[error("Failed to get updated user")]
    GetUser(#[source] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    Placed(Pixel),
    CoolingDown { cooldown_end: DateTime<Utc> },
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub cooldown: Duration,
    pub recent_changes_limit: usize,
    pub default_canvas_size: i32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for PipelineSettings {
    fn from(config: &Config) -> Self {
        Self {
            cooldown: config.cooldown(),
            recent_changes_limit: config.recent_changes_limit,
            default_canvas_size: config.default_canvas_size,
        }
    }
}

/// Reply path to the session that sent a request. Replies share the session's
/// outbound queue with broadcasts but never keep that queue open.
#[derive(Debug, Clone)]
pub struct Requester {
    session_id: SessionId,
    tx: mpsc::WeakSender<String>,
}

impl Requester {
    pub fn new(session_id: SessionId, tx: &SessionTx) -> Self {
        Self {
            session_id,
            tx: tx.downgrade(),
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn send(&self, event: &ServerEvent) {
        let frame = match event.encode() {
            Ok(frame) => frame,
            Err(err) => {
                log::error!("Failed to encode {} reply: {}", event.tag(), err);
                return;
            }
        };
        match self.tx.upgrade() {
            Some(tx) => {
                if let Err(err) = tx.try_send(frame) {
                    log::warn!(
                        "Dropped {} reply to session {}: {}",
                        event.tag(),
                        self.session_id,
                        err
                    );
                }
            }
            None => log::debug!(
                "Session {} is closed, dropped {} reply",
                self.session_id,
                event.tag()
            ),
        }
    }
}

pub struct Pipeline {
    store: Arc<dyn CanvasStore>,
    hub: HubHandle,
    clock: Arc<dyn Clock>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(store: Arc<dyn CanvasStore>, hub: HubHandle, settings: PipelineSettings) -> Self {
        Self {
            store,
            hub,
            clock: Arc::new(SystemClock),
            settings,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Handles one decoded request and answers the requester.
    pub fn dispatch(&self, request: ClientRequest, requester: &Requester) {
        let kind = request.kind();
        let reply = match request {
            ClientRequest::PlacePixel(request) => {
                self.place_pixel(&request).map(|placement| match placement {
                    Placement::Placed(pixel) => ServerEvent::PixelPlaced {
                        success: true,
                        pixel,
                    },
                    Placement::CoolingDown { cooldown_end } => {
                        ServerEvent::cooldown_active(cooldown_end)
                    }
                })
            }
            ClientRequest::GetCanvas(request) => {
                self.get_canvas(request.size).map(ServerEvent::CanvasData)
            }
            ClientRequest::CheckCooldown(request) => self
                .check_cooldown(&request.user_id)
                .map(ServerEvent::CooldownStatus),
            ClientRequest::UpdateUsername(request) => {
                self.update_username(&request)
                    .map(|user| ServerEvent::UsernameUpdated {
                        success: true,
                        user,
                    })
            }
        };

        match reply {
            Ok(event) => requester.send(&event),
            Err(err) => {
                match std::error::Error::source(&err) {
                    Some(cause) => log::error!(
                        "{} from session {} failed: {}: {}",
                        kind,
                        requester.session_id(),
                        err,
                        cause
                    ),
                    None => log::debug!(
                        "{} from session {} rejected: {}",
                        kind,
                        requester.session_id(),
                        err
                    ),
                }
                requester.send(&ServerEvent::error(err.to_string()));
            }
        }
    }

    pub fn place_pixel(&self, request: &PlacePixelRequest) -> Result<Placement, RequestError> {
        if !in_bounds(request.size, request.x, request.y) {
            return Err(RequestError::InvalidCoordinates);
        }

        let now = self.clock.now();
        let cooldown_end = self
            .store
            .cooldown(&request.user_id)
            .map_err(RequestError::CheckCooldown)?;
        if !CooldownInfo::at(now, cooldown_end).can_place {
            if let Some(cooldown_end) = cooldown_end {
                log::debug!(
                    "{} is cooling down until {}",
                    request.user_id,
                    cooldown_end
                );
                return Ok(Placement::CoolingDown { cooldown_end });
            }
        }

        let user = self
            .store
            .upsert_user(&request.user_id, &request.username)
            .map_err(RequestError::CreateUser)?;
        self.store
            .set_cell(
                request.size,
                request.x,
                request.y,
                &request.color,
                &request.user_id,
                now,
            )
            .map_err(RequestError::SetPixel)?;
        self.verify_write(request, now);

        // the cell is already committed, a missing cooldown does not undo it
        if let Err(err) = self
            .store
            .set_cooldown(&request.user_id, now + self.settings.cooldown)
        {
            log::error!("Failed to set cooldown for {}: {}", request.user_id, err);
        }

        let pixel = Pixel {
            x: request.x,
            y: request.y,
            color: request.color.clone(),
            user_id: request.user_id.clone(),
            username: user.username,
            timestamp: now.timestamp_millis(),
        };
        self.broadcast(&ServerEvent::PixelUpdate(pixel.clone()));
        self.broadcast_stats(request.size);
        self.broadcast_recent_changes(request.size);

        Ok(Placement::Placed(pixel))
    }

    pub fn get_canvas(&self, size: i32) -> Result<CanvasSnapshot, RequestError> {
        let sparse_pixels = self
            .store
            .sparse_cells(size)
            .map_err(RequestError::GetCanvas)?;
        let stats = self.store.stats(size).unwrap_or_else(|err| {
            log::error!("Failed to get stats for canvas {}: {}", size, err);
            Stats::default()
        });
        let recent_changes = self
            .store
            .recent_changes(size, self.settings.recent_changes_limit)
            .unwrap_or_else(|err| {
                log::error!("Failed to get recent changes for canvas {}: {}", size, err);
                Vec::new()
            });

        Ok(CanvasSnapshot {
            sparse_pixels,
            size,
            last_update: self.clock.now(),
            stats,
            recent_changes,
        })
    }

    pub fn check_cooldown(&self, user_id: &str) -> Result<CooldownInfo, RequestError> {
        let cooldown_end = self
            .store
            .cooldown(user_id)
            .map_err(RequestError::CheckCooldown)?;
        Ok(CooldownInfo::at(self.clock.now(), cooldown_end))
    }

    pub fn update_username(&self, request: &UpdateUsernameRequest) -> Result<User, RequestError> {
        self.store
            .upsert_user(&request.user_id, &request.username)
            .map_err(RequestError::UpdateUsername)?;
        let user = self
            .store
            .get_user(&request.user_id)
            .map_err(RequestError::GetUser)?;

        self.broadcast_recent_changes(request.size.unwrap_or(self.settings.default_canvas_size));
        Ok(user)
    }

    fn verify_write(&self, request: &PlacePixelRequest, timestamp: DateTime<Utc>) {
        match self.store.get_cell(request.size, request.x, request.y) {
            Ok(Some(cell)) if cell.color == request.color && cell.timestamp == timestamp => {}
            Ok(Some(cell)) if cell.timestamp > timestamp => log::debug!(
                "Cell ({}, {}) on canvas {} was overwritten by a later write",
                request.x,
                request.y,
                request.size
            ),
            Ok(cell) => log::warn!(
                "Cell ({}, {}) on canvas {} reads back as {:?} after write",
                request.x,
                request.y,
                request.size,
                cell
            ),
            Err(err) => log::warn!(
                "Could not verify cell ({}, {}) on canvas {}: {}",
                request.x,
                request.y,
                request.size,
                err
            ),
        }
    }

    fn broadcast(&self, event: &ServerEvent) {
        if let Err(err) = self.hub.broadcast(event) {
            log::error!("Failed to broadcast {}: {}", event.tag(), err);
        }
    }

    fn broadcast_stats(&self, size: i32) {
        match self.store.stats(size) {
            Ok(stats) => self.broadcast(&ServerEvent::StatsUpdate(stats)),
            Err(err) => log::error!("Failed to get stats for canvas {}: {}", size, err),
        }
    }

    fn broadcast_recent_changes(&self, size: i32) {
        match self
            .store
            .recent_changes(size, self.settings.recent_changes_limit)
        {
            Ok(changes) => self.broadcast(&ServerEvent::RecentChanges(changes)),
            Err(err) => log::error!("Failed to get recent changes for canvas {}: {}", size, err),
        }
    }
}
