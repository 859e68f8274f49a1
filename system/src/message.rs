use crate::types::{CanvasSnapshot, CooldownInfo, Pixel, Stats, User, UserId};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    PlacePixel,
    GetCanvas,
    CheckCooldown,
    UpdateUsername,
}

impl RequestKind {
    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "place_pixel" => Some(Self::PlacePixel),
            "get_canvas" => Some(Self::GetCanvas),
            "check_cooldown" => Some(Self::CheckCooldown),
            "update_username" => Some(Self::UpdateUsername),
            _ => None,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Self::PlacePixel => "place_pixel",
            Self::GetCanvas => "get_canvas",
            Self::CheckCooldown => "check_cooldown",
            Self::UpdateUsername => "update_username",
        }
    }

    /// Text of the `error` event sent back when the payload has the wrong shape.
    pub fn invalid_request_message(&self) -> &'static str {
        match self {
            Self::PlacePixel => "Invalid place pixel request",
            Self::GetCanvas => "Invalid get canvas request",
            Self::CheckCooldown => "Invalid cooldown check request",
            Self::UpdateUsername => "Invalid username update request",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    /// The frame is not a `{type, data}` envelope at all. Dropped by the session.
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),
    /// A known request type whose payload has the wrong shape.
    #[error("invalid {kind} payload: {source}")]
    InvalidPayload {
        kind: RequestKind,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacePixelRequest {
    pub x: i32,
    pub y: i32,
    pub color: String,
    pub user_id: UserId,
    pub username: String,
    pub size: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GetCanvasRequest {
    pub size: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckCooldownRequest {
    pub user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUsernameRequest {
    pub user_id: UserId,
    pub username: String,
    /// Canvas whose history is re-broadcast after the rename.
    #[serde(default)]
    pub size: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientRequest {
    PlacePixel(PlacePixelRequest),
    GetCanvas(GetCanvasRequest),
    CheckCooldown(CheckCooldownRequest),
    UpdateUsername(UpdateUsernameRequest),
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

fn payload<T: DeserializeOwned>(
    kind: RequestKind,
    data: serde_json::Value,
) -> Result<T, DecodeError> {
    serde_json::from_value(data).map_err(|source| DecodeError::InvalidPayload { kind, source })
}

impl ClientRequest {
    /// Decodes one inbound frame. Unknown request types yield `Ok(None)`.
    pub fn decode(frame: &str) -> Result<Option<Self>, DecodeError> {
        let envelope: Envelope = serde_json::from_str(frame).map_err(DecodeError::Malformed)?;
        let kind = match RequestKind::from_tag(&envelope.kind) {
            Some(kind) => kind,
            None => return Ok(None),
        };

        let request = match kind {
            RequestKind::PlacePixel => Self::PlacePixel(payload(kind, envelope.data)?),
            RequestKind::GetCanvas => Self::GetCanvas(payload(kind, envelope.data)?),
            RequestKind::CheckCooldown => Self::CheckCooldown(payload(kind, envelope.data)?),
            RequestKind::UpdateUsername => Self::UpdateUsername(payload(kind, envelope.data)?),
        };
        Ok(Some(request))
    }

    pub fn kind(&self) -> RequestKind {
        match self {
            Self::PlacePixel(_) => RequestKind::PlacePixel,
            Self::GetCanvas(_) => RequestKind::GetCanvas,
            Self::CheckCooldown(_) => RequestKind::CheckCooldown,
            Self::UpdateUsername(_) => RequestKind::UpdateUsername,
        }
    }
}

pub const WELCOME_MESSAGE: &str = "Connected to PixelTogether";
pub const COOLDOWN_MESSAGE: &str = "You must wait before placing another pixel";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    Connected {
        message: String,
    },
    PixelUpdate(Pixel),
    StatsUpdate(Stats),
    RecentChanges(Vec<Pixel>),
    CooldownStatus(CooldownInfo),
    #[serde(rename_all = "camelCase")]
    CooldownActive {
        cooldown_end: DateTime<Utc>,
        message: String,
    },
    CanvasData(CanvasSnapshot),
    UsernameUpdated {
        success: bool,
        user: User,
    },
    OnlineCount {
        count: usize,
    },
    PixelPlaced {
        success: bool,
        pixel: Pixel,
    },
    Error {
        message: String,
    },
}

impl ServerEvent {
    pub fn welcome() -> Self {
        Self::Connected {
            message: WELCOME_MESSAGE.to_owned(),
        }
    }

    pub fn cooldown_active(cooldown_end: DateTime<Utc>) -> Self {
        Self::CooldownActive {
            cooldown_end,
            message: COOLDOWN_MESSAGE.to_owned(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(frame: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(frame)
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::PixelUpdate(_) => "pixel_update",
            Self::StatsUpdate(_) => "stats_update",
            Self::RecentChanges(_) => "recent_changes",
            Self::CooldownStatus(_) => "cooldown_status",
            Self::CooldownActive { .. } => "cooldown_active",
            Self::CanvasData(_) => "canvas_data",
            Self::UsernameUpdated { .. } => "username_updated",
            Self::OnlineCount { .. } => "online_count",
            Self::PixelPlaced { .. } => "pixel_placed",
            Self::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn it_decodes_place_pixel() {
        let frame = json!({
            "type": "place_pixel",
            "data": {"x": 3, "y": 4, "color": "#FF0000", "userId": "u1", "username": "alice", "size": 64}
        })
        .to_string();

        let request = ClientRequest::decode(&frame).expect("").expect("");
        assert_eq!(
            request,
            ClientRequest::PlacePixel(PlacePixelRequest {
                x: 3,
                y: 4,
                color: "#FF0000".into(),
                user_id: "u1".into(),
                username: "alice".into(),
                size: 64,
            })
        );
    }

    #[test]
    fn it_ignores_unknown_types() {
        let frame = json!({"type": "draw_line", "data": {"x": 1}}).to_string();
        assert!(ClientRequest::decode(&frame).expect("").is_none());
    }

    #[test]
    fn it_reports_malformed_frames() {
        assert!(matches!(
            ClientRequest::decode("{not json"),
            Err(DecodeError::Malformed(_))
        ));
        assert!(matches!(
            ClientRequest::decode(r#"{"data": {}}"#),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn it_reports_invalid_payload_with_its_kind() {
        let frame = json!({"type": "get_canvas", "data": {"size": "big"}}).to_string();
        match ClientRequest::decode(&frame) {
            Err(DecodeError::InvalidPayload { kind, .. }) => {
                assert_eq!(kind, RequestKind::GetCanvas);
                assert_eq!(kind.invalid_request_message(), "Invalid get canvas request");
            }
            other => panic!("unexpected result {:?}", other),
        }

        let missing_data = json!({"type": "check_cooldown"}).to_string();
        assert!(matches!(
            ClientRequest::decode(&missing_data),
            Err(DecodeError::InvalidPayload {
                kind: RequestKind::CheckCooldown,
                ..
            })
        ));
    }

    #[test]
    fn it_defaults_rename_size() {
        let frame =
            json!({"type": "update_username", "data": {"userId": "u1", "username": "bob"}})
                .to_string();
        match ClientRequest::decode(&frame).expect("").expect("") {
            ClientRequest::UpdateUsername(request) => assert_eq!(request.size, None),
            other => panic!("unexpected request {:?}", other),
        }
    }

    #[test]
    fn it_encodes_events_as_tagged_envelopes() {
        let encoded = ServerEvent::OnlineCount { count: 3 }.encode().expect("");
        let value: serde_json::Value = serde_json::from_str(&encoded).expect("");
        assert_eq!(value, json!({"type": "online_count", "data": {"count": 3}}));

        let end = "2024-05-01T12:00:05Z".parse::<DateTime<Utc>>().expect("");
        let encoded = ServerEvent::cooldown_active(end).encode().expect("");
        let value: serde_json::Value = serde_json::from_str(&encoded).expect("");
        assert_eq!(value["type"], "cooldown_active");
        assert_eq!(value["data"]["cooldownEnd"], "2024-05-01T12:00:05Z");
        assert_eq!(value["data"]["message"], COOLDOWN_MESSAGE);

        let pixel = Pixel {
            x: 1,
            y: 2,
            color: "#000000".into(),
            user_id: "u1".into(),
            username: "alice".into(),
            timestamp: 1_700_000_000_000,
        };
        let encoded = ServerEvent::RecentChanges(vec![pixel]).encode().expect("");
        let value: serde_json::Value = serde_json::from_str(&encoded).expect("");
        assert_eq!(value["data"][0]["userId"], "u1");
    }
}
