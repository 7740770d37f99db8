//! SQLite-backed [`ChunkStore`], for durability across process restarts.
//!
//! Grounded in the teacher's `db.rs`/`migrate.rs` split: a `sqlx::SqlitePool` opened in WAL mode,
//! idempotent migrations run once at startup (`crate::migrate::run_migrations`), plain `sqlx::query`
//! (no compile-time-checked macros, matching the teacher's own runtime-query style).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use super::{ChunkStore, DeletedDocument};
use crate::error::{CoreError, CoreResult};
use crate::models::{Chunk, Document, DocumentStatus, Feedback, KgTriple, Proposition, SourceType, Thumbs};

pub struct SqliteChunkStore {
    pool: SqlitePool,
}

impl SqliteChunkStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn source_type_from_str(s: &str) -> SourceType {
    match s {
        "textbook" => SourceType::Textbook,
        "paper" => SourceType::Paper,
        "notes" => SourceType::Notes,
        "code" => SourceType::Code,
        _ => SourceType::General,
    }
}

fn status_from_str(s: &str) -> DocumentStatus {
    match s {
        "processing" => DocumentStatus::Processing,
        "ready" => DocumentStatus::Ready,
        "failed" => DocumentStatus::Failed,
        _ => DocumentStatus::Pending,
    }
}

fn status_to_str(s: DocumentStatus) -> &'static str {
    match s {
        DocumentStatus::Pending => "pending",
        DocumentStatus::Processing => "processing",
        DocumentStatus::Ready => "ready",
        DocumentStatus::Failed => "failed",
    }
}

fn internal(e: sqlx::Error) -> CoreError {
    CoreError::Internal(anyhow::anyhow!(e))
}

async fn bump_version(pool: &SqlitePool, user_id: &str) -> Result<u64, sqlx::Error> {
    sqlx::query(
        "INSERT INTO user_versions (user_id, version) VALUES (?, 1)
         ON CONFLICT(user_id) DO UPDATE SET version = version + 1",
    )
    .bind(user_id)
    .execute(pool)
    .await?;
    let row = sqlx::query("SELECT version FROM user_versions WHERE user_id = ?")
        .bind(user_id)
        .fetch_one(pool)
        .await?;
    Ok(row.get::<i64, _>("version") as u64)
}

#[async_trait]
impl ChunkStore for SqliteChunkStore {
    async fn put_document(&self, doc: Document) -> CoreResult<()> {
        sqlx::query(
            "INSERT INTO documents (id, user_id, title, source_type, page_count, status, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET title = excluded.title, source_type = excluded.source_type,
                page_count = excluded.page_count, status = excluded.status",
        )
        .bind(&doc.id)
        .bind(&doc.user_id)
        .bind(&doc.title)
        .bind(doc.source_type.as_str())
        .bind(doc.page_count.map(|p| p as i64))
        .bind(status_to_str(doc.status))
        .bind(doc.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(internal)?;
        Ok(())
    }

    async fn update_document_status(&self, document_id: &str, status: DocumentStatus) -> CoreResult<()> {
        let result = sqlx::query("UPDATE documents SET status = ? WHERE id = ?")
            .bind(status_to_str(status))
            .bind(document_id)
            .execute(&self.pool)
            .await
            .map_err(internal)?;
        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("document {document_id}")));
        }
        Ok(())
    }

    async fn get_document(&self, document_id: &str) -> CoreResult<Option<Document>> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?")
            .bind(document_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(internal)?;
        Ok(row.map(|r| document_from_row(&r)))
    }

    async fn list_documents_by_user(&self, user_id: &str) -> CoreResult<Vec<Document>> {
        let rows = sqlx::query("SELECT * FROM documents WHERE user_id = ?")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(internal)?;
        Ok(rows.iter().map(document_from_row).collect())
    }

    async fn put_chunks(&self, chunks: Vec<Chunk>) -> CoreResult<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        let user_id = chunks[0].user_id.clone();
        let mut tx = self.pool.begin().await.map_err(internal)?;
        for chunk in &chunks {
            sqlx::query(
                "INSERT INTO chunks (id, document_id, user_id, ordinal, text, page, section_title, parent_id, hash)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET text = excluded.text, hash = excluded.hash",
            )
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(&chunk.user_id)
            .bind(chunk.ordinal)
            .bind(&chunk.text)
            .bind(chunk.page.map(|p| p as i64))
            .bind(&chunk.section_title)
            .bind(&chunk.parent_id)
            .bind(&chunk.hash)
            .execute(&mut *tx)
            .await
            .map_err(internal)?;
        }
        tx.commit().await.map_err(internal)?;
        bump_version(&self.pool, &user_id).await.map_err(internal)?;
        Ok(())
    }

    async fn put_propositions(&self, propositions: Vec<Proposition>) -> CoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(internal)?;
        for prop in propositions {
            sqlx::query("INSERT INTO propositions (id, chunk_id, text) VALUES (?, ?, ?)")
                .bind(&prop.id)
                .bind(&prop.chunk_id)
                .bind(&prop.text)
                .execute(&mut *tx)
                .await
                .map_err(internal)?;
        }
        tx.commit().await.map_err(internal)?;
        Ok(())
    }

    async fn put_triples(&self, triples: Vec<KgTriple>) -> CoreResult<Vec<KgTriple>> {
        if triples.is_empty() {
            return Ok(Vec::new());
        }
        let user_id = triples[0].user_id.clone();
        let existing = self.triples_for_all(&user_id).await?;
        let mut seen: std::collections::HashSet<_> = existing.iter().map(|t| t.dedup_key()).collect();

        let mut inserted = Vec::new();
        let mut tx = self.pool.begin().await.map_err(internal)?;
        for triple in triples {
            if !seen.insert(triple.dedup_key()) {
                continue;
            }
            sqlx::query(
                "INSERT INTO triples (id, user_id, doc_id, chunk_id, subject, predicate, object)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&triple.id)
            .bind(&triple.user_id)
            .bind(&triple.doc_id)
            .bind(&triple.chunk_id)
            .bind(&triple.subject)
            .bind(&triple.predicate)
            .bind(&triple.object)
            .execute(&mut *tx)
            .await
            .map_err(internal)?;
            inserted.push(triple);
        }
        tx.commit().await.map_err(internal)?;
        Ok(inserted)
    }

    async fn get_chunk(&self, chunk_id: &str) -> CoreResult<Option<Chunk>> {
        let row = sqlx::query("SELECT * FROM chunks WHERE id = ?")
            .bind(chunk_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(internal)?;
        Ok(row.map(|r| chunk_from_row(&r)))
    }

    async fn get_adjacent(&self, chunk_id: &str, window: i64) -> CoreResult<Vec<Chunk>> {
        let Some(anchor) = self.get_chunk(chunk_id).await? else {
            return Ok(Vec::new());
        };
        let lo = (anchor.ordinal - window).max(0);
        let hi = anchor.ordinal + window;
        let rows = sqlx::query(
            "SELECT * FROM chunks WHERE document_id = ? AND ordinal >= ? AND ordinal <= ? ORDER BY ordinal ASC",
        )
        .bind(&anchor.document_id)
        .bind(lo)
        .bind(hi)
        .fetch_all(&self.pool)
        .await
        .map_err(internal)?;
        Ok(rows.iter().map(chunk_from_row).collect())
    }

    async fn get_parent(&self, chunk_id: &str) -> CoreResult<Option<Chunk>> {
        let Some(child) = self.get_chunk(chunk_id).await? else {
            return Ok(None);
        };
        let Some(parent_id) = child.parent_id else {
            return Ok(None);
        };
        self.get_chunk(&parent_id).await
    }

    async fn triples_for(&self, user_id: &str, subjects: &[String]) -> CoreResult<Vec<KgTriple>> {
        let wanted: std::collections::HashSet<String> =
            subjects.iter().map(|s| s.to_lowercase()).collect();
        Ok(self
            .triples_for_all(user_id)
            .await?
            .into_iter()
            .filter(|t| wanted.contains(&t.subject.to_lowercase()))
            .collect())
    }

    async fn list_chunks_by_user(&self, user_id: &str) -> CoreResult<Vec<Chunk>> {
        let rows = sqlx::query("SELECT * FROM chunks WHERE user_id = ?")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(internal)?;
        Ok(rows.iter().map(chunk_from_row).collect())
    }

    async fn list_chunks_by_document(&self, document_id: &str) -> CoreResult<Vec<Chunk>> {
        let rows = sqlx::query("SELECT * FROM chunks WHERE document_id = ? ORDER BY ordinal ASC")
            .bind(document_id)
            .fetch_all(&self.pool)
            .await
            .map_err(internal)?;
        Ok(rows.iter().map(chunk_from_row).collect())
    }

    async fn delete_document(&self, user_id: &str, document_id: &str) -> CoreResult<DeletedDocument> {
        let chunk_ids: Vec<String> = self
            .list_chunks_by_document(document_id)
            .await?
            .into_iter()
            .map(|c| c.id)
            .collect();

        let mut tx = self.pool.begin().await.map_err(internal)?;
        for id in &chunk_ids {
            sqlx::query("DELETE FROM propositions WHERE chunk_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(internal)?;
        }
        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(internal)?;
        sqlx::query("DELETE FROM triples WHERE doc_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(internal)?;
        sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(internal)?;
        tx.commit().await.map_err(internal)?;

        let new_version = bump_version(&self.pool, user_id).await.map_err(internal)?;
        Ok(DeletedDocument { chunk_ids, new_version })
    }

    async fn doc_set_version(&self, user_id: &str) -> CoreResult<u64> {
        let row = sqlx::query("SELECT version FROM user_versions WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(internal)?;
        Ok(row.map(|r| r.get::<i64, _>("version") as u64).unwrap_or(0))
    }

    async fn put_feedback(&self, feedback: Feedback) -> CoreResult<()> {
        sqlx::query(
            "INSERT INTO feedback (id, user_id, query_id, thumbs, comment, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&feedback.id)
        .bind(&feedback.user_id)
        .bind(&feedback.query_id)
        .bind(match feedback.thumbs {
            Thumbs::Up => "up",
            Thumbs::Down => "down",
        })
        .bind(&feedback.comment)
        .bind(feedback.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(internal)?;
        Ok(())
    }

    async fn list_feedback(&self, user_id: &str) -> CoreResult<Vec<Feedback>> {
        let rows = sqlx::query("SELECT * FROM feedback WHERE user_id = ?")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(internal)?;
        Ok(rows
            .iter()
            .map(|r| Feedback {
                id: r.get("id"),
                user_id: r.get("user_id"),
                query_id: r.get("query_id"),
                thumbs: if r.get::<String, _>("thumbs") == "up" { Thumbs::Up } else { Thumbs::Down },
                comment: r.get("comment"),
                created_at: parse_ts(r.get("created_at")),
            })
            .collect())
    }
}

impl SqliteChunkStore {
    async fn triples_for_all(&self, user_id: &str) -> CoreResult<Vec<KgTriple>> {
        let rows = sqlx::query("SELECT * FROM triples WHERE user_id = ?")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(internal)?;
        Ok(rows
            .iter()
            .map(|r| KgTriple {
                id: r.get("id"),
                user_id: r.get("user_id"),
                doc_id: r.get("doc_id"),
                chunk_id: r.get("chunk_id"),
                subject: r.get("subject"),
                predicate: r.get("predicate"),
                object: r.get("object"),
            })
            .collect())
    }
}

fn parse_ts(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s).map(|dt| dt.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now())
}

fn document_from_row(r: &sqlx::sqlite::SqliteRow) -> Document {
    Document {
        id: r.get("id"),
        user_id: r.get("user_id"),
        title: r.get("title"),
        source_type: source_type_from_str(&r.get::<String, _>("source_type")),
        page_count: r.get::<Option<i64>, _>("page_count").map(|v| v as u32),
        status: status_from_str(&r.get::<String, _>("status")),
        created_at: parse_ts(r.get("created_at")),
    }
}

fn chunk_from_row(r: &sqlx::sqlite::SqliteRow) -> Chunk {
    Chunk {
        id: r.get("id"),
        document_id: r.get("document_id"),
        user_id: r.get("user_id"),
        ordinal: r.get("ordinal"),
        text: r.get("text"),
        page: r.get::<Option<i64>, _>("page").map(|v| v as u32),
        section_title: r.get("section_title"),
        parent_id: r.get("parent_id"),
        hash: r.get("hash"),
    }
}
