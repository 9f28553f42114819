//! docrag-vector
//!
//! LanceDB-backed dense channel: chunk payloads and embedding vectors in one
//! table, plus a key/value `meta` table recording dimension and metric.
pub mod index;
pub mod schema;
pub mod table;

pub use index::DenseIndex;
