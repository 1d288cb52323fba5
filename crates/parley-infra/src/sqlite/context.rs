//! SQLite store for precomputed user context and the conversation window.

use chrono::Utc;
use sqlx::Row;

use parley_core::context::store::{ConversationStore, UserContextStore};
use parley_types::context::{ConversationContext, PriorTurn, UserContext};
use parley_types::error::RepositoryError;

use super::pool::DatabasePool;
use super::{format_datetime, query_error};

pub struct SqliteContextRepository {
    pool: DatabasePool,
}

impl SqliteContextRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Insert or replace a user's precomputed context.
    pub async fn save_user_context(&self, user_id: &str, context: &UserContext) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO user_contexts (user_id, summary, topics, preferences, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
                summary = excluded.summary,
                topics = excluded.topics,
                preferences = excluded.preferences,
                updated_at = excluded.updated_at",
        )
        .bind(user_id)
        .bind(context.summary.as_deref())
        .bind(to_json(&context.topics)?)
        .bind(to_json(&context.preferences)?)
        .bind(format_datetime(&Utc::now()))
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;
        Ok(())
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|e| RepositoryError::Query(e.to_string()))
}

fn from_json<T: serde::de::DeserializeOwned>(raw: &str, column: &str) -> Result<T, RepositoryError> {
    serde_json::from_str(raw).map_err(|e| RepositoryError::Query(format!("invalid {column} JSON: {e}")))
}

impl UserContextStore for SqliteContextRepository {
    async fn get_user_context(&self, user_id: &str) -> Result<Option<UserContext>, RepositoryError> {
        let row = sqlx::query("SELECT summary, topics, preferences FROM user_contexts WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let summary: Option<String> = row.try_get("summary").map_err(query_error)?;
        let topics: String = row.try_get("topics").map_err(query_error)?;
        let preferences: String = row.try_get("preferences").map_err(query_error)?;

        Ok(Some(UserContext {
            summary,
            topics: from_json(&topics, "topics")?,
            preferences: from_json(&preferences, "preferences")?,
        }))
    }
}

fn conversation_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<ConversationContext, RepositoryError> {
    let turns: String = row.try_get("turns").map_err(query_error)?;
    let summary: Option<String> = row.try_get("summary").map_err(query_error)?;
    Ok(ConversationContext {
        turns: from_json::<Vec<PriorTurn>>(&turns, "turns")?,
        summary,
    })
}

async fn upsert_conversation(
    conn: &mut sqlx::SqliteConnection,
    user_id: &str,
    context: &ConversationContext,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO conversations (user_id, turns, summary, updated_at)
         VALUES (?, ?, ?, ?)
         ON CONFLICT(user_id) DO UPDATE SET
            turns = excluded.turns,
            summary = excluded.summary,
            updated_at = excluded.updated_at",
    )
    .bind(user_id)
    .bind(to_json(&context.turns)?)
    .bind(context.summary.as_deref())
    .bind(format_datetime(&Utc::now()))
    .execute(conn)
    .await
    .map_err(query_error)?;
    Ok(())
}

impl ConversationStore for SqliteContextRepository {
    async fn get_conversation(&self, user_id: &str) -> Result<Option<ConversationContext>, RepositoryError> {
        let row = sqlx::query("SELECT turns, summary FROM conversations WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        row.as_ref().map(conversation_from_row).transpose()
    }

    async fn save_conversation(&self, user_id: &str, context: &ConversationContext) -> Result<(), RepositoryError> {
        let mut conn = self.pool.writer.acquire().await.map_err(query_error)?;
        upsert_conversation(&mut conn, user_id, context).await
    }

    /// Read and rewrite the window on the single writer connection, inside
    /// one transaction, so concurrent appends for a user never drop turns.
    async fn append_exchange(
        &self,
        user_id: &str,
        user_message: &str,
        assistant_message: &str,
        max_turns: usize,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_error)?;

        let row = sqlx::query("SELECT turns, summary FROM conversations WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(query_error)?;
        let mut conversation = match row {
            Some(row) => conversation_from_row(&row)?,
            None => ConversationContext::default(),
        };
        conversation.push_exchange(user_message, assistant_message, max_turns);
        upsert_conversation(&mut tx, user_id, &conversation).await?;

        tx.commit().await.map_err(query_error)?;
        Ok(())
    }
}
