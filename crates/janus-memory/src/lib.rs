//! Long-term memory: markdown files chunked by heading into SQLite and
//! retrieved by hybrid keyword/vector search with temporal decay and
//! multi-tenant scope filtering.

pub mod chunker;
pub mod hybrid;
pub mod index;

pub use chunker::{Chunk, chunk_markdown};
pub use hybrid::{cosine_similarity, reciprocal_rank_fusion};
pub use index::{
    ChunkHit, MemoryIndex, OWNER_SHARED, SCOPE_FAMILY, SCOPE_GLOBAL, SCOPE_USER,
};
