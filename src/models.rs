use std::{borrow::Borrow, fmt};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

pub const MAX_USERNAME_CHARS: usize = 50;
pub const MAX_CONTENT_CHARS: usize = 1000;
pub const DEFAULT_USERNAME: &str = "anon";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("content must not be empty")]
    EmptyContent,
    #[error("content exceeds {max} characters", max = MAX_CONTENT_CHARS)]
    ContentTooLong,
    #[error("username must not be empty")]
    EmptyUsername,
    #[error("username exceeds {max} characters", max = MAX_USERNAME_CHARS)]
    UsernameTooLong,
    #[error("invalid cursor")]
    InvalidCursor,
    #[error("invalid limit")]
    InvalidLimit,
}

/// A persisted chat message. Immutable once the store has assigned its id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Message {
    pub id: i64,
    pub room: String,
    pub username: String,
    pub content: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub room: String,
    pub username: String,
    pub content: String,
    pub created_at: OffsetDateTime,
}

impl NewMessage {
    pub fn new(room: &str, identity: &Identity, content: Content) -> Self {
        Self {
            room: room.to_owned(),
            username: identity.as_str().to_owned(),
            content: content.into_inner(),
            created_at: OffsetDateTime::now_utc(),
        }
    }
}

/// Display name bound to a connection for its whole lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity(String);

impl Identity {
    /// Lenient form used for the first frame of a session: trimmed, cut at
    /// [`MAX_USERNAME_CHARS`], and [`DEFAULT_USERNAME`] when nothing is left.
    pub fn derive(username: Option<&str>) -> Self {
        let trimmed = username.map(str::trim).unwrap_or_default();
        if trimmed.is_empty() {
            return Self(DEFAULT_USERNAME.to_owned());
        }

        Self(trimmed.chars().take(MAX_USERNAME_CHARS).collect())
    }

    /// Strict form used by the request/response surface.
    pub fn parse(username: &str) -> Result<Self, ValidationError> {
        let trimmed = username.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptyUsername);
        }
        if trimmed.chars().count() > MAX_USERNAME_CHARS {
            return Err(ValidationError::UsernameTooLong);
        }

        Ok(Self(trimmed.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Identity {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Message body that is non-empty after trimming and at most [`MAX_CONTENT_CHARS`] long.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Content(String);

impl Content {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptyContent);
        }
        if trimmed.chars().count() > MAX_CONTENT_CHARS {
            return Err(ValidationError::ContentTooLong);
        }

        Ok(Self(trimmed.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

/// Inbound frame from a live connection. The first frame of a session binds
/// `username`; later ones carry `content` and optionally a private recipient.
#[derive(Debug, Default, Deserialize)]
pub struct ClientFrame {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    History {
        items: Vec<Message>,
    },
    Message {
        item: Message,
    },
    Private {
        from: String,
        content: String,
        #[serde(with = "time::serde::rfc3339")]
        created_at: OffsetDateTime,
    },
    Error {
        msg: String,
    },
}

impl ServerEvent {
    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use time::macros::datetime;

    #[test]
    fn identity_defaults_to_anon_when_absent_or_blank() {
        assert_eq!(Identity::derive(None).as_str(), "anon");
        assert_eq!(Identity::derive(Some("")).as_str(), "anon");
        assert_eq!(Identity::derive(Some("   \t")).as_str(), "anon");
    }

    #[test]
    fn identity_is_trimmed_then_truncated_by_chars() {
        assert_eq!(Identity::derive(Some("  alice  ")).as_str(), "alice");

        let long = "é".repeat(80);
        let identity = Identity::derive(Some(&long));
        assert_eq!(identity.as_str().chars().count(), MAX_USERNAME_CHARS);
    }

    #[test]
    fn strict_identity_rejects_instead_of_truncating() {
        assert_eq!(Identity::parse(" "), Err(ValidationError::EmptyUsername));
        assert_eq!(
            Identity::parse(&"x".repeat(51)),
            Err(ValidationError::UsernameTooLong)
        );
        assert_eq!(Identity::parse(" bob ").unwrap().as_str(), "bob");
    }

    #[test]
    fn content_bounds() {
        assert_eq!(Content::parse("  \n "), Err(ValidationError::EmptyContent));
        assert_eq!(
            Content::parse(&"a".repeat(1001)),
            Err(ValidationError::ContentTooLong)
        );
        assert_eq!(Content::parse(&"a".repeat(1000)).unwrap().as_str().len(), 1000);
        assert_eq!(Content::parse(" hi ").unwrap().as_str(), "hi");
    }

    #[test]
    fn client_frame_fields_are_optional() {
        let frame: ClientFrame = serde_json::from_str("{}").unwrap();
        assert!(frame.username.is_none() && frame.content.is_none() && frame.to.is_none());

        let frame: ClientFrame =
            serde_json::from_str(r#"{"content":"psst","to":"carol","extra":1}"#).unwrap();
        assert_eq!(frame.content.as_deref(), Some("psst"));
        assert_eq!(frame.to.as_deref(), Some("carol"));
    }

    #[test]
    fn events_are_tagged_by_type() {
        let created_at = datetime!(2024-03-01 12:30:00 UTC);
        let item = Message {
            id: 7,
            room: "r1".into(),
            username: "alice".into(),
            content: "hi".into(),
            created_at,
        };

        let json: Value =
            serde_json::from_str(&ServerEvent::Message { item }.encode().unwrap()).unwrap();
        assert_eq!(json["type"], "message");
        assert_eq!(json["item"]["id"], 7);
        assert_eq!(json["item"]["created_at"], "2024-03-01T12:30:00Z");

        let private = ServerEvent::Private {
            from: "alice".into(),
            content: "psst".into(),
            created_at,
        };
        let json: Value = serde_json::from_str(&private.encode().unwrap()).unwrap();
        assert_eq!(json["type"], "private");
        assert_eq!(json["from"], "alice");
        assert!(json.get("id").is_none());

        let error = ServerEvent::Error { msg: "carol is not online".into() };
        let json: Value = serde_json::from_str(&error.encode().unwrap()).unwrap();
        assert_eq!(json, serde_json::json!({"type": "error", "msg": "carol is not online"}));
    }
}
