//! SQLite chat task configuration repository.
//!
//! Implements `TaskConfigRepository` from `parley-core`. A config row points at
//! up to two provider rows (primary and fallback); reads join them back into a
//! [`ChatTaskConfig`], writes upsert the providers and the config in one
//! transaction on the writer pool.

use chrono::Utc;
use sqlx::Row;

use parley_core::repository::task_config::TaskConfigRepository;
use parley_types::error::RepositoryError;
use parley_types::provider::{ChatTaskConfig, StoredProvider};

use super::pool::DatabasePool;
use super::{format_datetime, query_error};

/// SQLite-backed implementation of `TaskConfigRepository`.
pub struct SqliteTaskConfigRepository {
    pool: DatabasePool,
}

impl SqliteTaskConfigRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

fn provider_from_row(
    row: &sqlx::sqlite::SqliteRow,
    prefix: &str,
) -> Result<Option<StoredProvider>, sqlx::Error> {
    let id: Option<String> = row.try_get(format!("{prefix}_id").as_str())?;
    let Some(id) = id else {
        return Ok(None);
    };
    Ok(Some(StoredProvider {
        id,
        name: row.try_get(format!("{prefix}_name").as_str())?,
        api_key: row.try_get(format!("{prefix}_api_key").as_str())?,
        base_url: row.try_get(format!("{prefix}_base_url").as_str())?,
    }))
}

fn config_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<ChatTaskConfig, sqlx::Error> {
    Ok(ChatTaskConfig {
        user_id: row.try_get("user_id")?,
        provider: provider_from_row(row, "p")?,
        model_id: row.try_get("model_id")?,
        fallback_provider: provider_from_row(row, "f")?,
        fallback_model_id: row.try_get("fallback_model_id")?,
    })
}

async fn upsert_provider(
    tx: &mut sqlx::SqliteConnection,
    provider: &StoredProvider,
    now: &str,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO providers (id, name, api_key, base_url, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            api_key = excluded.api_key,
            base_url = excluded.base_url,
            updated_at = excluded.updated_at",
    )
    .bind(&provider.id)
    .bind(&provider.name)
    .bind(&provider.api_key)
    .bind(&provider.base_url)
    .bind(now)
    .bind(now)
    .execute(tx)
    .await
    .map_err(query_error)?;
    Ok(())
}

impl TaskConfigRepository for SqliteTaskConfigRepository {
    async fn get_chat_config(&self, user_id: &str) -> Result<Option<ChatTaskConfig>, RepositoryError> {
        let row = sqlx::query(
            "SELECT c.user_id, c.model_id, c.fallback_model_id,
                    p.id AS p_id, p.name AS p_name, p.api_key AS p_api_key, p.base_url AS p_base_url,
                    f.id AS f_id, f.name AS f_name, f.api_key AS f_api_key, f.base_url AS f_base_url
             FROM chat_task_configs c
             LEFT JOIN providers p ON p.id = c.provider_id
             LEFT JOIN providers f ON f.id = c.fallback_provider_id
             WHERE c.user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_error)?;

        let Some(row) = row else {
            return Ok(None);
        };

        config_from_row(&row).map(Some).map_err(query_error)
    }

    async fn save_chat_config(&self, config: &ChatTaskConfig) -> Result<(), RepositoryError> {
        let now = format_datetime(&Utc::now());
        let mut tx = self.pool.writer.begin().await.map_err(query_error)?;

        for provider in [&config.provider, &config.fallback_provider].into_iter().flatten() {
            upsert_provider(&mut tx, provider, &now).await?;
        }

        sqlx::query(
            "INSERT INTO chat_task_configs (user_id, provider_id, model_id, fallback_provider_id, fallback_model_id, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
                provider_id = excluded.provider_id,
                model_id = excluded.model_id,
                fallback_provider_id = excluded.fallback_provider_id,
                fallback_model_id = excluded.fallback_model_id,
                updated_at = excluded.updated_at",
        )
        .bind(&config.user_id)
        .bind(config.provider.as_ref().map(|p| p.id.as_str()))
        .bind(config.model_id.as_deref())
        .bind(config.fallback_provider.as_ref().map(|p| p.id.as_str()))
        .bind(config.fallback_model_id.as_deref())
        .bind(&now)
        .execute(&mut *tx)
        .await
        .map_err(query_error)?;

        tx.commit().await.map_err(query_error)?;
        Ok(())
    }
}
