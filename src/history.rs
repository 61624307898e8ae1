use std::{fmt, num::IntErrorKind, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    db::Store,
    models::{Message, ValidationError},
};

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MIN_PAGE_SIZE: i64 = 1;
pub const MAX_PAGE_SIZE: i64 = 100;

/// Exclusive upper bound for backward pagination. Always a message id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(i64);

impl Cursor {
    pub fn id(self) -> i64 {
        self.0
    }
}

impl FromStr for Cursor {
    type Err = ValidationError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().parse::<i64>() {
            Ok(id) if id > 0 => Ok(Self(id)),
            _ => Err(ValidationError::InvalidCursor),
        }
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One page of history in ascending id order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub items: Vec<Message>,
    pub next_cursor: Option<Cursor>,
}

pub fn clamp_limit(limit: i64) -> i64 {
    limit.clamp(MIN_PAGE_SIZE, MAX_PAGE_SIZE)
}

/// Reads a raw `limit` parameter. Blank means the default; integers outside
/// `i64` saturate into the clamp instead of failing.
pub fn parse_limit(raw: Option<&str>) -> Result<i64, ValidationError> {
    let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return Ok(DEFAULT_PAGE_SIZE);
    };

    match raw.parse::<i64>() {
        Ok(limit) => Ok(clamp_limit(limit)),
        Err(err) => match err.kind() {
            IntErrorKind::PosOverflow => Ok(MAX_PAGE_SIZE),
            IntErrorKind::NegOverflow => Ok(MIN_PAGE_SIZE),
            _ => Err(ValidationError::InvalidLimit),
        },
    }
}

#[derive(Debug, Clone)]
pub struct HistoryPaginator {
    store: Store,
}

impl HistoryPaginator {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Reads the `limit` messages right before `before` (or the newest ones)
    /// and returns them oldest first. `next_cursor` is the first item's id, so
    /// feeding it back walks further into the past without gaps or overlap.
    pub async fn page(
        &self,
        room: &str,
        limit: i64,
        before: Option<Cursor>,
    ) -> Result<Page, sqlx::Error> {
        let mut items = self
            .store
            .find(room, before.map(Cursor::id), clamp_limit(limit))
            .await?;
        items.reverse();

        let next_cursor = items.first().map(|message| Cursor(message.id));
        Ok(Page { items, next_cursor })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Content, Identity, NewMessage};

    async fn room_with(count: usize, room: &str) -> HistoryPaginator {
        let store = Store::in_memory().await.unwrap();
        let identity = Identity::derive(Some("alice"));
        for n in 1..=count {
            let content = Content::parse(&format!("message {n}")).unwrap();
            store.insert(NewMessage::new(room, &identity, content)).await.unwrap();
        }
        HistoryPaginator::new(store)
    }

    fn ids(page: &Page) -> Vec<i64> {
        page.items.iter().map(|m| m.id).collect()
    }

    #[test]
    fn cursor_must_be_a_positive_id() {
        assert_eq!("6".parse::<Cursor>(), Ok(Cursor(6)));
        assert_eq!("abc".parse::<Cursor>(), Err(ValidationError::InvalidCursor));
        assert_eq!("0".parse::<Cursor>(), Err(ValidationError::InvalidCursor));
        assert_eq!("-4".parse::<Cursor>(), Err(ValidationError::InvalidCursor));
        assert_eq!("".parse::<Cursor>(), Err(ValidationError::InvalidCursor));
    }

    #[test]
    fn limit_is_clamped() {
        assert_eq!(clamp_limit(0), 1);
        assert_eq!(clamp_limit(-10), 1);
        assert_eq!(clamp_limit(20), 20);
        assert_eq!(clamp_limit(1000), 100);
    }

    #[test]
    fn raw_limits_saturate_or_default() {
        assert_eq!(parse_limit(None), Ok(DEFAULT_PAGE_SIZE));
        assert_eq!(parse_limit(Some("")), Ok(DEFAULT_PAGE_SIZE));
        assert_eq!(parse_limit(Some(" 7 ")), Ok(7));
        assert_eq!(parse_limit(Some("99999999999999999999")), Ok(MAX_PAGE_SIZE));
        assert_eq!(parse_limit(Some("-99999999999999999999")), Ok(MIN_PAGE_SIZE));
        assert_eq!(parse_limit(Some("ten")), Err(ValidationError::InvalidLimit));
        assert_eq!(parse_limit(Some("2.5")), Err(ValidationError::InvalidLimit));
    }

    #[tokio::test]
    async fn walks_backward_without_gaps() {
        let history = room_with(25, "r2").await;

        let first = history.page("r2", 20, None).await.unwrap();
        assert_eq!(ids(&first), (6..=25).collect::<Vec<_>>());
        assert_eq!(first.next_cursor, Some(Cursor(6)));

        let second = history.page("r2", 20, first.next_cursor).await.unwrap();
        assert_eq!(ids(&second), (1..=5).collect::<Vec<_>>());
        assert_eq!(second.next_cursor, Some(Cursor(1)));

        let third = history.page("r2", 20, second.next_cursor).await.unwrap();
        assert!(third.items.is_empty());
        assert_eq!(third.next_cursor, None);
    }

    #[tokio::test]
    async fn returns_min_of_limit_and_total() {
        let history = room_with(3, "r1").await;
        let page = history.page("r1", 10, None).await.unwrap();
        assert_eq!(ids(&page), vec![1, 2, 3]);

        let page = history.page("r1", 0, None).await.unwrap();
        assert_eq!(ids(&page), vec![3]);
    }

    #[tokio::test]
    async fn oversized_limit_caps_at_max() {
        let history = room_with(120, "busy").await;
        let page = history.page("busy", 500, None).await.unwrap();
        assert_eq!(page.items.len(), MAX_PAGE_SIZE as usize);
        assert_eq!(page.items.last().map(|m| m.id), Some(120));
    }

    #[tokio::test]
    async fn empty_room_has_no_cursor() {
        let history = room_with(2, "r1").await;
        let page = history.page("elsewhere", 20, None).await.unwrap();
        assert!(page.items.is_empty());
        assert!(page.next_cursor.is_none());

        let json = serde_json::to_value(&page).unwrap();
        assert!(json["next_cursor"].is_null());
    }
}
