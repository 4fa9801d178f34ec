use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::domain::{Message, MessageBody, MessageId, Nickname, RequestId, UserId};

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone)]
pub struct StoredUser {
    pub user_id: UserId,
    pub nickname: Nickname,
    pub auth_key: String,
    pub created_at: DateTime<Utc>,
}


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptOutcome {
    Accepted,
    AlreadyFriends,
    NoPending,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        // Every connection to `sqlite::memory:` opens its own database, so an
        // in-memory store must live on a single connection that never expires.
        let pool_options = if database_url.starts_with("sqlite::memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = pool_options
            .connect_with(connect_options)
            .await
            .with_context(|| format!("failed to open database '{database_url}'"))?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run storage migrations")?;
        Ok(Self { pool })
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    /// Inserts a new account. Returns `None` when the nickname is already
    /// registered under any letter case.
    pub async fn create_user(&self, nickname: &Nickname, auth_key: &str) -> Result<Option<UserId>> {
        let row = sqlx::query(
            "INSERT INTO users (nickname, auth_key, created_at) VALUES (?, ?, ?)
             ON CONFLICT(nickname) DO NOTHING
             RETURNING id",
        )
        .bind(nickname.as_str())
        .bind(auth_key)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .context("failed to insert user")?;
        Ok(row.map(|r| UserId(r.get::<i64, _>(0))))
    }

    pub async fn find_user(&self, nickname: &Nickname) -> Result<Option<StoredUser>> {
        let row = sqlx::query(
            "SELECT id, nickname, auth_key, created_at FROM users WHERE nickname = ?",
        )
        .bind(nickname.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| user_from_row(&r)).transpose()
    }

    pub async fn nickname_exists(&self, nickname: &Nickname) -> Result<bool> {
        let exists: i64 = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE nickname = ?)")
            .bind(nickname.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(exists != 0)
    }

    pub async fn list_users(&self) -> Result<Vec<StoredUser>> {
        let rows = sqlx::query("SELECT id, nickname, auth_key, created_at FROM users ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(user_from_row).collect()
    }

    /// Records a pending request. Returns `None` if the same request is
    /// already pending.
    pub async fn insert_friend_request(&self, from: UserId, to: UserId) -> Result<Option<RequestId>> {
        let row = sqlx::query(
            "INSERT INTO friend_requests (from_user_id, to_user_id, created_at) VALUES (?, ?, ?)
             ON CONFLICT(from_user_id, to_user_id) DO NOTHING
             RETURNING id",
        )
        .bind(from.0)
        .bind(to.0)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .context("failed to insert friend request")?;
        Ok(row.map(|r| RequestId(r.get::<i64, _>(0))))
    }

    pub async fn has_pending_request(&self, from: UserId, to: UserId) -> Result<bool> {
        let exists: i64 = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM friend_requests WHERE from_user_id = ? AND to_user_id = ?)",
        )
        .bind(from.0)
        .bind(to.0)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists != 0)
    }

    /// Senders of requests awaiting `user_id`'s answer, oldest first.
    pub async fn incoming_requests(&self, user_id: UserId) -> Result<Vec<Nickname>> {
        let rows = sqlx::query(
            "SELECT u.nickname
             FROM friend_requests r
             INNER JOIN users u ON u.id = r.from_user_id
             WHERE r.to_user_id = ?
             ORDER BY r.id ASC",
        )
        .bind(user_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|r| parse_stored_nickname(r.get::<String, _>(0)))
            .collect()
    }

    /// Targets of requests sent by `user_id` that are still pending, oldest first.
    pub async fn outgoing_requests(&self, user_id: UserId) -> Result<Vec<Nickname>> {
        let rows = sqlx::query(
            "SELECT u.nickname
             FROM friend_requests r
             INNER JOIN users u ON u.id = r.to_user_id
             WHERE r.from_user_id = ?
             ORDER BY r.id ASC",
        )
        .bind(user_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|r| parse_stored_nickname(r.get::<String, _>(0)))
            .collect()
    }

    /// Accepts the request `requester -> accepter`.
    ///
    /// Pending rows in both directions are removed in the same transaction
    /// that creates the friendship.
    pub async fn accept_friend_request(&self, requester: UserId, accepter: UserId) -> Result<AcceptOutcome> {
        let (low, high) = ordered_pair(requester, accepter);
        let mut tx = self.pool.begin().await?;

        let already: i64 = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM friendships WHERE user_low_id = ? AND user_high_id = ?)",
        )
        .bind(low.0)
        .bind(high.0)
        .fetch_one(&mut *tx)
        .await?;
        if already != 0 {
            tx.rollback().await?;
            return Ok(AcceptOutcome::AlreadyFriends);
        }

        let removed = sqlx::query(
            "DELETE FROM friend_requests WHERE from_user_id = ? AND to_user_id = ?",
        )
        .bind(requester.0)
        .bind(accepter.0)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if removed == 0 {
            tx.rollback().await?;
            return Ok(AcceptOutcome::NoPending);
        }

        sqlx::query("DELETE FROM friend_requests WHERE from_user_id = ? AND to_user_id = ?")
            .bind(accepter.0)
            .bind(requester.0)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO friendships (user_low_id, user_high_id, created_at) VALUES (?, ?, ?)",
        )
        .bind(low.0)
        .bind(high.0)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .context("failed to insert friendship")?;

        tx.commit().await?;
        Ok(AcceptOutcome::Accepted)
    }

    pub async fn delete_friend_request(&self, from: UserId, to: UserId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM friend_requests WHERE from_user_id = ? AND to_user_id = ?")
            .bind(from.0)
            .bind(to.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn are_friends(&self, a: UserId, b: UserId) -> Result<bool> {
        let (low, high) = ordered_pair(a, b);
        let exists: i64 = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM friendships WHERE user_low_id = ? AND user_high_id = ?)",
        )
        .bind(low.0)
        .bind(high.0)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists != 0)
    }

    /// Friends of `user_id` in the order the friendships were created.
    pub async fn list_friends(&self, user_id: UserId) -> Result<Vec<Nickname>> {
        let rows = sqlx::query(
            "SELECT u.nickname
             FROM friendships f
             INNER JOIN users u
                ON u.id = CASE WHEN f.user_low_id = ?1 THEN f.user_high_id ELSE f.user_low_id END
             WHERE f.user_low_id = ?1 OR f.user_high_id = ?1
             ORDER BY f.id ASC",
        )
        .bind(user_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|r| parse_stored_nickname(r.get::<String, _>(0)))
            .collect()
    }

    pub async fn insert_message(
        &self,
        sender: UserId,
        recipient: UserId,
        text: &str,
        reply_to: Option<MessageId>,
    ) -> Result<(MessageId, DateTime<Utc>)> {
        let sent_at = Utc::now();
        let row = sqlx::query(
            "INSERT INTO messages (sender_user_id, recipient_user_id, body, reply_to, created_at)
             VALUES (?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(sender.0)
        .bind(recipient.0)
        .bind(text)
        .bind(reply_to.map(|id| id.0))
        .bind(sent_at)
        .fetch_one(&self.pool)
        .await
        .context("failed to insert message")?;
        Ok((MessageId(row.get::<i64, _>(0)), sent_at))
    }

    /// Whether `message_id` belongs to the conversation between `a` and `b`.
    pub async fn message_in_conversation(&self, message_id: MessageId, a: UserId, b: UserId) -> Result<bool> {
        let exists: i64 = sqlx::query_scalar(
            "SELECT EXISTS(
                SELECT 1 FROM messages
                WHERE id = ?1
                  AND ((sender_user_id = ?2 AND recipient_user_id = ?3)
                    OR (sender_user_id = ?3 AND recipient_user_id = ?2))
             )",
        )
        .bind(message_id.0)
        .bind(a.0)
        .bind(b.0)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists != 0)
    }

    /// Full history between `a` and `b`, ascending by id.
    pub async fn list_conversation(&self, a: UserId, b: UserId) -> Result<Vec<Message>> {
        let rows = sqlx::query(
            "SELECT m.id, u.nickname, m.body, m.reply_to, m.created_at
             FROM messages m
             INNER JOIN users u ON u.id = m.sender_user_id
             WHERE (m.sender_user_id = ?1 AND m.recipient_user_id = ?2)
                OR (m.sender_user_id = ?2 AND m.recipient_user_id = ?1)
             ORDER BY m.id ASC",
        )
        .bind(a.0)
        .bind(b.0)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|r| {
                Ok(Message {
                    id: MessageId(r.get::<i64, _>(0)),
                    sender: parse_stored_nickname(r.get::<String, _>(1))?,
                    body: MessageBody {
                        text: r.get::<String, _>(2),
                        reply: r.get::<Option<i64>, _>(3).map(MessageId),
                    },
                    sent_at: r.get::<DateTime<Utc>, _>(4),
                })
            })
            .collect()
    }
}

fn ordered_pair(a: UserId, b: UserId) -> (UserId, UserId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

fn user_from_row(row: &SqliteRow) -> Result<StoredUser> {
    Ok(StoredUser {
        user_id: UserId(row.get::<i64, _>(0)),
        nickname: parse_stored_nickname(row.get::<String, _>(1))?,
        auth_key: row.get::<String, _>(2),
        created_at: row.get::<DateTime<Utc>, _>(3),
    })
}

fn parse_stored_nickname(raw: String) -> Result<Nickname> {
    Nickname::parse(&raw).with_context(|| format!("stored nickname '{raw}' is invalid"))
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
