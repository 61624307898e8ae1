use std::str::FromStr;

use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};

use crate::models::{Message, NewMessage};

/// Append-only message log. Ids come from `AUTOINCREMENT`, so they strictly
/// increase and are never reused.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Private database that lives as long as the returned store.
    pub async fn in_memory() -> Result<Self, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                room TEXT NOT NULL,
                username TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS messages_room_id ON messages (room, id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn insert(&self, message: NewMessage) -> Result<Message, sqlx::Error> {
        let id = sqlx::query("INSERT INTO messages (room,username,content,created_at) VALUES (?,?,?,?)")
            .bind(&message.room)
            .bind(&message.username)
            .bind(&message.content)
            .bind(message.created_at)
            .execute(&self.pool)
            .await?
            .last_insert_rowid();

        let NewMessage { room, username, content, created_at } = message;
        Ok(Message { id, room, username, content, created_at })
    }

    /// Up to `limit` messages of `room` with an id below `before_id`, newest first.
    pub async fn find(
        &self,
        room: &str,
        before_id: Option<i64>,
        limit: i64,
    ) -> Result<Vec<Message>, sqlx::Error> {
        sqlx::query_as::<_, Message>(
            "SELECT id,room,username,content,created_at FROM messages
             WHERE room=? AND id<? ORDER BY id DESC LIMIT ?",
        )
        .bind(room)
        .bind(before_id.unwrap_or(i64::MAX))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }
}
