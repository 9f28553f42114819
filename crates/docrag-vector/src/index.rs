//! Dense channel: chunk vectors in a LanceDB table searched by cosine.
use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow_array::{Array, FixedSizeListArray, Float32Array, Int64Array, RecordBatch, RecordBatchIterator, StringArray};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase, Select};
use lancedb::{Connection, DistanceType, Table};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use docrag_core::error::{Error, Result};
use docrag_core::traits::DenseStore;
use docrag_core::types::{Chunk, ChunkId, ChunkMetadata, ContentKind, ScoredChunk};

use crate::schema::{build_arrow_schema, CHUNKS_TABLE, META_TABLE};
use crate::table::{ensure_table, escape_literal, get_meta, open_db, set_meta};

const META_DIM: &str = "dim";
const META_METRIC: &str = "metric";
const META_NEXT_SEQ: &str = "next_seq";
const METRIC: &str = "cosine";
/// Extra rows fetched beyond `k` so equal scores can be ordered by write sequence.
const TIE_SLACK: usize = 16;
const DELETE_CHUNK: usize = 500;

pub struct DenseIndex {
    dir: PathBuf,
    conn: Connection,
    table: Table,
    dim: usize,
    // Serialises writers and owns the next write sequence number.
    next_seq: Mutex<i64>,
}

impl DenseIndex {
    /// Opens or creates the store under `dir`. An existing store built with
    /// another dimension is refused.
    pub async fn open(dir: impl Into<PathBuf>, dim: usize) -> Result<Self> {
        let dir = dir.into();
        if dim == 0 {
            return Err(Error::InvalidConfig("dense dimension must be positive".to_string()));
        }
        std::fs::create_dir_all(&dir)?;
        let conn = open_db(&dir.to_string_lossy()).await?;

        match get_meta(&conn, META_TABLE, META_DIM).await? {
            Some(stored) => {
                let stored: usize = stored.parse().map_err(|_| Error::Storage(format!("corrupt stored dimension '{stored}'")))?;
                if stored != dim {
                    return Err(Error::DimensionMismatch { expected: stored, actual: dim });
                }
            }
            None => {
                set_meta(&conn, META_TABLE, META_DIM, &dim.to_string()).await?;
                set_meta(&conn, META_TABLE, META_METRIC, METRIC).await?;
            }
        }
        ensure_table(&conn, CHUNKS_TABLE, build_arrow_schema(dim)).await?;
        let table = conn.open_table(CHUNKS_TABLE).execute().await.map_err(Error::storage)?;
        let stored_seq: i64 = match get_meta(&conn, META_TABLE, META_NEXT_SEQ).await? {
            Some(v) => v.parse().map_err(|_| Error::Storage(format!("corrupt write sequence '{v}'")))?,
            None => 0,
        };
        // The recorded counter can lag the rows if a write landed but its meta update did not.
        let next_seq = match max_seq(&table).await? {
            Some(max) if max >= stored_seq => {
                warn!(stored = stored_seq, recovered = max + 1, "write sequence behind stored rows; recovering");
                max + 1
            }
            _ => stored_seq,
        };

        let index = Self { dir, conn, table, dim, next_seq: Mutex::new(next_seq) };
        let rows = index.row_count().await?;
        info!(dir = %index.dir.display(), dim, rows, "dense index opened");
        Ok(index)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn row_count(&self) -> Result<usize> {
        self.table.count_rows(None).await.map_err(Error::storage)
    }

    /// Upserts by id; the last occurrence of a repeated id wins.
    pub async fn upsert(&self, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<usize> {
        if chunks.len() != vectors.len() {
            return Err(Error::IndexWrite(format!("{} chunks but {} vectors", chunks.len(), vectors.len())));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dim) {
            return Err(Error::DimensionMismatch { expected: self.dim, actual: bad.len() });
        }
        if chunks.is_empty() {
            return Ok(0);
        }

        let last: HashMap<&str, usize> = chunks.iter().enumerate().map(|(i, c)| (c.id.as_str(), i)).collect();
        let rows: Vec<(&Chunk, &Vec<f32>)> = chunks
            .iter()
            .zip(vectors)
            .enumerate()
            .filter(|(i, (c, _))| last.get(c.id.as_str()) == Some(i))
            .map(|(_, row)| row)
            .collect();

        let mut next_seq = self.next_seq.lock().await;
        let batch = self.to_record_batch(&rows, *next_seq)?;
        let schema = batch.schema();
        let reader = Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema));
        let mut mi = self.table.merge_insert(&["id"]);
        mi.when_matched_update_all(None).when_not_matched_insert_all();
        mi.execute(reader).await.map_err(Error::index_write)?;

        // Rows are committed at this point; a lost counter update is recovered on open.
        *next_seq += rows.len() as i64;
        if let Err(err) = set_meta(&self.conn, META_TABLE, META_NEXT_SEQ, &next_seq.to_string()).await {
            warn!(error = %err, next_seq = *next_seq, "failed to persist dense write sequence");
        }
        debug!(rows = rows.len(), "dense batch upserted");
        Ok(rows.len())
    }

    fn to_record_batch(&self, rows: &[(&Chunk, &Vec<f32>)], first_seq: i64) -> Result<RecordBatch> {
        let mut ids = Vec::with_capacity(rows.len());
        let mut texts = Vec::with_capacity(rows.len());
        let mut kinds = Vec::with_capacity(rows.len());
        let mut paths = Vec::with_capacity(rows.len());
        let mut positions = Vec::with_capacity(rows.len());
        let mut metadata = Vec::with_capacity(rows.len());
        let mut seqs = Vec::with_capacity(rows.len());
        let mut vectors: Vec<Option<Vec<Option<f32>>>> = Vec::with_capacity(rows.len());
        for (i, (c, v)) in rows.iter().enumerate() {
            ids.push(c.id.clone());
            texts.push(c.text.clone());
            kinds.push(c.kind.as_str().to_string());
            paths.push(c.source_path.clone());
            positions.push(c.position as i64);
            metadata.push(c.metadata.to_json()?);
            seqs.push(first_seq + i as i64);
            vectors.push(Some(v.iter().map(|&x| Some(x)).collect()));
        }
        RecordBatch::try_new(
            build_arrow_schema(self.dim),
            vec![
                Arc::new(StringArray::from(ids)),
                Arc::new(StringArray::from(texts)),
                Arc::new(StringArray::from(kinds)),
                Arc::new(StringArray::from(paths)),
                Arc::new(Int64Array::from(positions)),
                Arc::new(StringArray::from(metadata)),
                Arc::new(Int64Array::from(seqs)),
                Arc::new(FixedSizeListArray::from_iter_primitive::<arrow_array::types::Float32Type, _, _>(
                    vectors.into_iter(),
                    self.dim as i32,
                )),
            ],
        )
        .map_err(Error::index_write)
    }

    /// Top-`k` by cosine similarity (`1 - distance`), best first; equal
    /// scores keep write order.
    pub async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        if vector.len() != self.dim {
            return Err(Error::DimensionMismatch { expected: self.dim, actual: vector.len() });
        }
        if k == 0 || self.row_count().await? == 0 {
            return Ok(Vec::new());
        }
        let mut stream = self
            .table
            .vector_search(vector.to_vec())
            .map_err(Error::storage)?
            .distance_type(DistanceType::Cosine)
            .limit(k + TIE_SLACK)
            .execute()
            .await
            .map_err(Error::storage)?;

        let mut scored: Vec<(ScoredChunk, i64)> = Vec::new();
        while let Some(batch) = stream.try_next().await.map_err(Error::storage)? {
            scored.extend(rows_from_batch(&batch)?);
        }
        scored.sort_by(|(a, sa), (b, sb)| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal).then(sa.cmp(sb)));
        scored.truncate(k);
        Ok(scored.into_iter().map(|(hit, _)| hit).collect())
    }

    pub async fn delete(&self, ids: &[ChunkId]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let _guard = self.next_seq.lock().await;
        for group in ids.chunks(DELETE_CHUNK) {
            let list = group.iter().map(|id| format!("'{}'", escape_literal(id))).collect::<Vec<_>>().join(", ");
            self.table.delete(&format!("id IN ({list})")).await.map_err(Error::index_write)?;
        }
        debug!(removed = ids.len(), "dense rows removed");
        Ok(())
    }

    /// Drops every row. Dimension and metric stay recorded.
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.next_seq.lock().await;
        self.table.delete("id IS NOT NULL").await.map_err(Error::index_write)?;
        Ok(())
    }
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| Error::Storage(format!("column '{name}' missing or mistyped")))
}

async fn max_seq(table: &Table) -> Result<Option<i64>> {
    let mut stream = table
        .query()
        .select(Select::columns(&["seq"]))
        .execute()
        .await
        .map_err(Error::storage)?;
    let mut max: Option<i64> = None;
    while let Some(batch) = stream.try_next().await.map_err(Error::storage)? {
        let seqs = column::<Int64Array>(&batch, "seq")?;
        if let Some(batch_max) = column_max(seqs) {
            max = Some(max.map_or(batch_max, |m| m.max(batch_max)));
        }
    }
    Ok(max)
}

fn column_max(values: &Int64Array) -> Option<i64> {
    (0..values.len()).filter(|&i| values.is_valid(i)).map(|i| values.value(i)).max()
}

fn rows_from_batch(batch: &RecordBatch) -> Result<Vec<(ScoredChunk, i64)>> {
    let ids = column::<StringArray>(batch, "id")?;
    let texts = column::<StringArray>(batch, "text")?;
    let kinds = column::<StringArray>(batch, "kind")?;
    let paths = column::<StringArray>(batch, "source_path")?;
    let positions = column::<Int64Array>(batch, "position")?;
    let metadata = column::<StringArray>(batch, "metadata")?;
    let seqs = column::<Int64Array>(batch, "seq")?;
    let distances = column::<Float32Array>(batch, "_distance")?;

    let mut out = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        let kind: ContentKind = kinds.value(i).parse()?;
        let chunk = Chunk {
            id: ids.value(i).to_string(),
            text: texts.value(i).to_string(),
            kind,
            source_path: paths.value(i).to_string(),
            position: positions.value(i).max(0) as usize,
            metadata: ChunkMetadata::from_json(metadata.value(i))?,
        };
        let score = if distances.is_valid(i) { 1.0 - distances.value(i) } else { 0.0 };
        out.push((ScoredChunk { chunk, score }, seqs.value(i)));
    }
    Ok(out)
}

#[async_trait]
impl DenseStore for DenseIndex {
    fn dim(&self) -> usize {
        self.dim
    }

    async fn add(&self, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<usize> {
        self.upsert(chunks, vectors).await
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        self.search(vector, k).await
    }

    async fn remove(&self, ids: &[ChunkId]) -> Result<()> {
        self.delete(ids).await
    }

    async fn count(&self) -> Result<usize> {
        self.row_count().await
    }
}
