//! Embedding backends and the kind-aware router that feeds the dense index.
pub mod backend;
pub mod device;
pub mod hashed;
pub mod local;
pub mod pool;
pub mod router;
pub mod tokenize;

pub use backend::{build_embedder, build_router, fake_embeddings_forced, EmbeddingBackend};
pub use hashed::HashEmbedder;
pub use local::LocalEncoder;
pub use router::EmbeddingRouter;
