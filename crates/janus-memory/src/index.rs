//! The memory index: markdown files chunked into SQLite, searchable by
//! keyword (FTS5 with temporal decay), by vector (cosine over stored
//! embeddings), or hybrid (RRF fusion of both branches).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use tracing::debug;

use crate::chunker::chunk_markdown;
use crate::hybrid::{
    cosine_similarity, decode_embedding, encode_embedding, reciprocal_rank_fusion,
};
use janus_core::{JanusError, Result, Scope, ScopeKind};
use janus_llm::EmbeddingProvider;
use janus_store::Database;

/// Half-life of the temporal decay applied to keyword scores.
const DECAY_HALF_LIFE_MS: f64 = 30.0 * 24.0 * 3600.0 * 1000.0;

/// Chunks from this source never decay.
const EVERGREEN_SOURCE: &str = "MEMORY.md";

/// Owner value for chunks not belonging to a single user.
pub const OWNER_SHARED: &str = "shared";

/// Scope column values.
pub const SCOPE_GLOBAL: &str = "global";
pub const SCOPE_USER: &str = "user";
pub const SCOPE_FAMILY: &str = "family";

/// A search result.
#[derive(Debug, Clone)]
pub struct ChunkHit {
    pub id: i64,
    pub source: String,
    pub heading: String,
    pub content: String,
    pub updated_at: DateTime<Utc>,
    pub score: f64,
}

pub struct MemoryIndex {
    db: Database,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
}

impl MemoryIndex {
    pub fn new(db: Database) -> Self {
        Self { db, embedder: None }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn has_embedder(&self) -> bool {
        self.embedder.is_some()
    }

    /// Re-index a file: all prior chunks for (source, owner, scope) are
    /// replaced with fresh ones in a single transaction.
    pub fn index_file(
        &self,
        source: &str,
        content: &str,
        owner: &str,
        scope: &str,
        scope_id: Option<&str>,
    ) -> Result<usize> {
        self.replace_chunks(source, content, owner, scope, scope_id, None)
    }

    /// Like [`index_file`], but computes an embedding per chunk first.
    ///
    /// [`index_file`]: MemoryIndex::index_file
    pub async fn index_with_embeddings(
        &self,
        source: &str,
        content: &str,
        owner: &str,
        scope: &str,
        scope_id: Option<&str>,
    ) -> Result<usize> {
        let embedder = self
            .embedder
            .as_ref()
            .ok_or_else(|| JanusError::Memory("no embedding provider configured".into()))?;

        let chunks = chunk_markdown(source, content);
        let texts: Vec<String> = chunks
            .iter()
            .map(|c| format!("{}\n{}", c.heading, c.content))
            .collect();
        let refs: Vec<&str> = texts.iter().map(|s| s.as_str()).collect();
        let embeddings = embedder.embed(&refs).await?;

        self.replace_chunks(source, content, owner, scope, scope_id, Some(&embeddings))
    }

    fn replace_chunks(
        &self,
        source: &str,
        content: &str,
        owner: &str,
        scope: &str,
        scope_id: Option<&str>,
        embeddings: Option<&[Vec<f32>]>,
    ) -> Result<usize> {
        let chunks = chunk_markdown(source, content);
        let now = Utc::now().to_rfc3339();

        let mut conn = self.db.conn();
        let tx = conn
            .transaction()
            .map_err(|e| JanusError::Memory(e.to_string()))?;
        tx.execute(
            "DELETE FROM memory_chunks WHERE source = ?1 AND owner = ?2 AND scope = ?3",
            rusqlite::params![source, owner, scope],
        )
        .map_err(|e| JanusError::Memory(e.to_string()))?;

        for (i, chunk) in chunks.iter().enumerate() {
            let blob: Option<Vec<u8>> = embeddings
                .and_then(|e| e.get(i))
                .map(|v| encode_embedding(v));
            tx.execute(
                "INSERT INTO memory_chunks (source, heading, content, updated_at, embedding, owner, scope, scope_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![source, chunk.heading, chunk.content, now, blob, owner, scope, scope_id],
            )
            .map_err(|e| JanusError::Memory(e.to_string()))?;
        }
        tx.commit().map_err(|e| JanusError::Memory(e.to_string()))?;

        debug!(source, owner, scope, chunks = chunks.len(), "indexed file");
        Ok(chunks.len())
    }

    /// Keyword search: sanitized OR query over the full-text index, 5× the
    /// requested limit as candidates, rescored by BM25 × temporal decay
    /// (half-life 30 days; `MEMORY.md` is evergreen). Empty sanitized
    /// queries return empty.
    pub fn keyword_search(
        &self,
        query: &str,
        limit: usize,
        scope: Option<&Scope>,
    ) -> Result<Vec<ChunkHit>> {
        let fts_query = sanitize_query(query);
        if fts_query.is_empty() {
            return Ok(vec![]);
        }

        let (clause, scope_params) = scope_filter(scope);
        let sql = format!(
            "SELECT c.id, c.source, c.heading, c.content, c.updated_at, bm25(memory_chunks_fts) AS rank
             FROM memory_chunks_fts
             JOIN memory_chunks c ON c.id = memory_chunks_fts.rowid
             WHERE memory_chunks_fts MATCH ?1 AND {clause}
             ORDER BY rank
             LIMIT {candidates}",
            candidates = limit * 5,
        );

        let now = Utc::now();
        let conn = self.db.conn();
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| JanusError::Memory(e.to_string()))?;

        let mut params: Vec<SqlValue> = vec![SqlValue::Text(fts_query)];
        params.extend(scope_params);

        let mut hits: Vec<ChunkHit> = stmt
            .query_map(rusqlite::params_from_iter(params), |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, f64>(5)?,
                ))
            })
            .map_err(|e| JanusError::Memory(e.to_string()))?
            .filter_map(|r| r.ok())
            .map(|(id, source, heading, content, updated_at, rank)| {
                let updated_at = updated_at
                    .parse::<DateTime<Utc>>()
                    .unwrap_or_else(|_| Utc::now());
                // FTS5 bm25() is smaller-is-better; negate so higher wins.
                let base = -rank;
                let decay = if source == EVERGREEN_SOURCE {
                    1.0
                } else {
                    let age_ms = (now - updated_at).num_milliseconds().max(0) as f64;
                    0.5f64.powf(age_ms / DECAY_HALF_LIFE_MS)
                };
                ChunkHit {
                    id,
                    source,
                    heading,
                    content,
                    updated_at,
                    score: base * decay,
                }
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }

    /// Vector search: cosine similarity of the query embedding against all
    /// chunks that carry one, top 2× the requested limit.
    pub async fn vector_search(
        &self,
        query: &str,
        limit: usize,
        scope: Option<&Scope>,
    ) -> Result<Vec<ChunkHit>> {
        let embedder = self
            .embedder
            .as_ref()
            .ok_or_else(|| JanusError::Memory("no embedding provider configured".into()))?;
        let query_embedding = embedder
            .embed(&[query])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| JanusError::Memory("embedding returned no vector".into()))?;

        let (clause, scope_params) = scope_filter(scope);
        let sql = format!(
            "SELECT c.id, c.source, c.heading, c.content, c.updated_at, c.embedding
             FROM memory_chunks c
             WHERE c.embedding IS NOT NULL AND {clause}"
        );

        let rows: Vec<(i64, String, String, String, String, Vec<u8>)> = {
            let conn = self.db.conn();
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| JanusError::Memory(e.to_string()))?;
            stmt.query_map(rusqlite::params_from_iter(scope_params), |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                ))
            })
            .map_err(|e| JanusError::Memory(e.to_string()))?
            .filter_map(|r| r.ok())
            .collect()
        };

        let mut hits: Vec<ChunkHit> = rows
            .into_iter()
            .filter_map(|(id, source, heading, content, updated_at, blob)| {
                let embedding = decode_embedding(&blob)?;
                if embedding.len() != query_embedding.len() {
                    return None;
                }
                Some(ChunkHit {
                    id,
                    source,
                    heading,
                    content,
                    updated_at: updated_at.parse().unwrap_or_else(|_| Utc::now()),
                    score: cosine_similarity(&query_embedding, &embedding),
                })
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit * 2);
        Ok(hits)
    }

    /// Hybrid search: keyword and vector branches (each scope-filtered,
    /// each up to 2× limit) fused with Reciprocal Rank Fusion. A failing
    /// vector branch degrades to keyword-only.
    pub async fn hybrid_search(
        &self,
        query: &str,
        limit: usize,
        scope: Option<&Scope>,
    ) -> Result<Vec<ChunkHit>> {
        let keyword = self.keyword_search(query, limit * 2, scope)?;

        let vector = match self.vector_search(query, limit, scope).await {
            Ok(hits) => hits,
            Err(e) => {
                debug!(error = %e, "vector branch unavailable, keyword-only");
                let mut hits = keyword;
                hits.truncate(limit);
                return Ok(hits);
            }
        };

        let keyword_ids: Vec<i64> = keyword.iter().map(|h| h.id).collect();
        let vector_ids: Vec<i64> = vector.iter().map(|h| h.id).collect();
        let fused = reciprocal_rank_fusion(&[&keyword_ids, &vector_ids]);

        let mut by_id: HashMap<i64, ChunkHit> = HashMap::new();
        for hit in keyword.into_iter().chain(vector.into_iter()) {
            by_id.entry(hit.id).or_insert(hit);
        }

        Ok(fused
            .into_iter()
            .take(limit)
            .filter_map(|(id, score)| {
                by_id.remove(&id).map(|mut hit| {
                    hit.score = score;
                    hit
                })
            })
            .collect())
    }

    /// Count of indexed chunks, for observability output.
    pub fn chunk_count(&self) -> Result<usize> {
        let conn = self.db.conn();
        let count: i64 = conn
            .query_row("SELECT count(*) FROM memory_chunks", [], |row| row.get(0))
            .map_err(|e| JanusError::Memory(e.to_string()))?;
        Ok(count as usize)
    }
}

/// Lowercased alphanumeric words of length ≥ 3, OR-joined for FTS5.
fn sanitize_query(query: &str) -> String {
    let words: Vec<String> = query
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 3)
        .map(|w| w.to_string())
        .collect();
    words.join(" OR ")
}

/// The tenancy filter, as a SQL fragment over the aliased `c` table plus
/// its bound parameters. No scope = no filter (backward compatible).
fn scope_filter(scope: Option<&Scope>) -> (String, Vec<SqlValue>) {
    match scope {
        None => ("1=1".into(), vec![]),
        Some(scope) => match scope.kind {
            ScopeKind::User => (
                "((c.owner = 'shared' AND c.scope = 'global')
                  OR (c.owner = ? AND c.scope = 'user' AND c.scope_id = ?))"
                    .into(),
                vec![
                    SqlValue::Text(scope.id.clone()),
                    SqlValue::Text(scope.id.clone()),
                ],
            ),
            ScopeKind::Family => (
                "((c.owner = 'shared' AND c.scope = 'global')
                  OR (c.owner = 'shared' AND c.scope = 'family' AND c.scope_id = ?))"
                    .into(),
                vec![SqlValue::Text(scope.id.clone())],
            ),
        },
    }
}
