//! SQLite memory repository.
//!
//! Implements both sides of long-term memory from `parley-core`:
//! `MemorySink` for write-back and `MemorySearch` for retrieval. The fast
//! path is a keyword `LIKE` match ranked by importance; the semantic path
//! scores the user's recent memories by term overlap with the query.

use std::collections::HashSet;

use sqlx::Row;
use uuid::Uuid;

use parley_core::context::store::MemorySearch;
use parley_core::memory::writer::MemorySink;
use parley_types::error::RepositoryError;
use parley_types::memory::{MemoryCandidate, MemoryHit};

use super::pool::DatabasePool;
use super::{format_datetime, query_error};

const MAX_QUERY_TERMS: usize = 8;
const MIN_TERM_CHARS: usize = 3;

/// SQLite-backed long-term memory.
pub struct SqliteMemoryRepository {
    pool: DatabasePool,
    scan_limit: i64,
}

impl SqliteMemoryRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool, scan_limit: 500 }
    }
}

struct MemoryRow {
    id: String,
    content: String,
    importance: f64,
    tags: String,
    entities: String,
}

impl MemoryRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            content: row.try_get("content")?,
            importance: row.try_get("importance")?,
            tags: row.try_get("tags")?,
            entities: row.try_get("entities")?,
        })
    }

    fn tags(&self) -> Result<Vec<String>, RepositoryError> {
        serde_json::from_str(&self.tags).map_err(|e| RepositoryError::Query(format!("invalid tags JSON: {e}")))
    }

    fn into_hit(self, score: f64) -> Result<MemoryHit, RepositoryError> {
        let tags = self.tags()?;
        Ok(MemoryHit {
            id: self.id,
            content: self.content,
            score: score.clamp(0.0, 1.0),
            tags,
        })
    }
}

/// Lowercased alphanumeric words of at least three characters, deduplicated.
fn terms(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= MIN_TERM_CHARS)
        .map(str::to_lowercase)
        .filter(|w| seen.insert(w.clone()))
        .take(MAX_QUERY_TERMS)
        .collect()
}

impl MemorySearch for SqliteMemoryRepository {
    async fn fast_search(&self, user_id: &str, query: &str, limit: usize) -> Result<Vec<MemoryHit>, RepositoryError> {
        let terms = terms(query);
        if terms.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let like = vec!["lower(content) LIKE ?"; terms.len()].join(" OR ");
        let sql = format!(
            "SELECT id, content, importance, tags, entities FROM memories
             WHERE user_id = ? AND ({like})
             ORDER BY importance DESC, created_at DESC
             LIMIT ?"
        );
        let mut q = sqlx::query(&sql).bind(user_id);
        for term in &terms {
            q = q.bind(format!("%{term}%"));
        }
        let rows = q
            .bind(limit as i64)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_error)?;

        rows.iter()
            .map(|row| {
                let row = MemoryRow::from_row(row).map_err(query_error)?;
                let score = row.importance;
                row.into_hit(score)
            })
            .collect()
    }

    async fn semantic_search(
        &self,
        user_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<MemoryHit>, RepositoryError> {
        let query_terms: HashSet<String> = terms(query).into_iter().collect();
        if query_terms.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            "SELECT id, content, importance, tags, entities FROM memories
             WHERE user_id = ?
             ORDER BY created_at DESC
             LIMIT ?",
        )
        .bind(user_id)
        .bind(self.scan_limit)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        let mut scored = Vec::new();
        for row in &rows {
            let row = MemoryRow::from_row(row).map_err(query_error)?;
            let mut doc = format!("{} {} {}", row.content, row.tags, row.entities);
            doc.make_ascii_lowercase();
            let doc_terms: HashSet<String> = doc
                .split(|c: char| !c.is_alphanumeric())
                .filter(|w| w.chars().count() >= MIN_TERM_CHARS)
                .map(str::to_lowercase)
                .collect();

            let overlap = query_terms.intersection(&doc_terms).count();
            if overlap == 0 {
                continue;
            }
            let score = 0.8 * overlap as f64 / query_terms.len() as f64 + 0.2 * row.importance;
            scored.push((score, row));
        }

        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored
            .into_iter()
            .take(limit)
            .map(|(score, row)| row.into_hit(score))
            .collect()
    }
}

impl MemorySink for SqliteMemoryRepository {
    async fn save_memory(&self, candidate: &MemoryCandidate) -> Result<String, RepositoryError> {
        let id = Uuid::now_v7().to_string();
        let tags = serde_json::to_string(&candidate.tags).map_err(|e| RepositoryError::Query(e.to_string()))?;
        let entities =
            serde_json::to_string(&candidate.entities).map_err(|e| RepositoryError::Query(e.to_string()))?;
        let metadata = serde_json::to_string(&candidate.source_metadata)
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        sqlx::query(
            "INSERT INTO memories (id, user_id, content, importance, tags, entities, metadata, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&candidate.user_id)
        .bind(&candidate.content)
        .bind(candidate.importance_score)
        .bind(&tags)
        .bind(&entities)
        .bind(&metadata)
        .bind(format_datetime(&candidate.source_metadata.created_at))
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        Ok(id)
    }
}
