use docrag_core::error::Error;
use docrag_core::traits::DenseStore;
use docrag_core::types::{Chunk, ChunkMetadata, ContentKind};
use docrag_vector::schema::META_TABLE;
use docrag_vector::table::open_db;
use docrag_vector::DenseIndex;

const DIM: usize = 4;

fn chunk(id: &str, kind: ContentKind, position: usize) -> Chunk {
    Chunk {
        id: id.into(),
        text: format!("body of {id}"),
        kind,
        source_path: format!("src/{id}.rs"),
        position,
        metadata: ChunkMetadata { language: Some("rust".into()), ..Default::default() },
    }
}

fn unit(v: [f32; DIM]) -> Vec<f32> {
    let n = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    v.iter().map(|x| x / n).collect()
}

fn corpus() -> (Vec<Chunk>, Vec<Vec<f32>>) {
    (
        vec![chunk("a", ContentKind::Code, 0), chunk("b", ContentKind::Prose, 52), chunk("c", ContentKind::Code, 104)],
        vec![unit([1.0, 0.0, 0.0, 0.0]), unit([0.0, 1.0, 0.0, 0.0]), unit([1.0, 1.0, 0.0, 0.0])],
    )
}

#[tokio::test]
async fn stored_vector_is_its_own_nearest_neighbour() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let index = DenseIndex::open(tmp.path().join("dense"), DIM).await?;
    let (chunks, vectors) = corpus();
    assert_eq!(index.add(&chunks, &vectors).await?, 3);

    let hits = index.query(&vectors[1], 3).await?;
    assert_eq!(hits.len(), 3);
    assert_eq!(hits[0].chunk.id, "b");
    assert!((hits[0].score - 1.0).abs() < 1e-4, "score {}", hits[0].score);
    assert_eq!(hits[0].chunk.position, 52);
    assert_eq!(hits[0].chunk.kind, ContentKind::Prose);
    assert_eq!(hits[0].chunk.metadata.language.as_deref(), Some("rust"));
    assert_eq!(hits[1].chunk.id, "c");
    assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    Ok(())
}

#[tokio::test]
async fn upsert_is_idempotent_and_k_truncates() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let index = DenseIndex::open(tmp.path(), DIM).await?;
    let (chunks, vectors) = corpus();
    index.add(&chunks, &vectors).await?;
    index.add(&chunks, &vectors).await?;
    assert_eq!(index.count().await?, 3);
    assert_eq!(index.query(&vectors[0], 1).await?.len(), 1);
    assert!(index.query(&vectors[0], 0).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn empty_store_returns_nothing() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let index = DenseIndex::open(tmp.path(), DIM).await?;
    assert!(index.query(&unit([1.0, 0.0, 0.0, 0.0]), 5).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn wrong_dimension_is_rejected() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let index = DenseIndex::open(tmp.path(), DIM).await?;
    let err = index.add(&[chunk("x", ContentKind::Code, 0)], &[vec![1.0, 0.0]]).await.unwrap_err();
    assert!(matches!(err, Error::DimensionMismatch { expected: 4, actual: 2 }));
    assert!(matches!(index.query(&[1.0], 1).await, Err(Error::DimensionMismatch { .. })));
    Ok(())
}

#[tokio::test]
async fn reopen_keeps_rows_and_checks_dimension() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    {
        let index = DenseIndex::open(tmp.path(), DIM).await?;
        let (chunks, vectors) = corpus();
        index.add(&chunks, &vectors).await?;
    }
    let reopened = DenseIndex::open(tmp.path(), DIM).await?;
    assert_eq!(reopened.count().await?, 3);

    let err = DenseIndex::open(tmp.path(), DIM * 2).await.err();
    assert!(matches!(err, Some(Error::DimensionMismatch { expected: 4, actual: 8 })));
    Ok(())
}

#[tokio::test]
async fn remove_deletes_by_id() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let index = DenseIndex::open(tmp.path(), DIM).await?;
    let (chunks, vectors) = corpus();
    index.add(&chunks, &vectors).await?;
    index.remove(&["a".to_string(), "it's-missing".to_string()]).await?;
    assert_eq!(index.count().await?, 2);
    let ids: Vec<String> = index.query(&vectors[0], 3).await?.into_iter().map(|h| h.chunk.id).collect();
    assert!(!ids.contains(&"a".to_string()));
    Ok(())
}

#[tokio::test]
async fn equal_scores_keep_write_order() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let index = DenseIndex::open(tmp.path(), DIM).await?;
    let v = unit([0.0, 0.0, 1.0, 0.0]);
    index.add(&[chunk("second", ContentKind::Code, 0)], &[v.clone()]).await?;
    index.add(&[chunk("first", ContentKind::Code, 0)], &[v.clone()]).await?;
    let ids: Vec<String> = index.query(&v, 2).await?.into_iter().map(|h| h.chunk.id).collect();
    assert_eq!(ids, vec!["second", "first"]);
    Ok(())
}

#[tokio::test]
async fn lost_sequence_update_is_recovered_on_open() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let v = unit([0.0, 1.0, 1.0, 0.0]);
    {
        let index = DenseIndex::open(tmp.path(), DIM).await?;
        index.add(&[chunk("filler", ContentKind::Code, 0)], &[unit([1.0, 0.0, 0.0, 0.0])]).await?;
        index.add(&[chunk("older", ContentKind::Prose, 0)], &[v.clone()]).await?;
    }
    // rows landed but the counter row did not
    let conn = open_db(&tmp.path().to_string_lossy()).await?;
    conn.open_table(META_TABLE).execute().await?.delete("key = 'next_seq'").await?;

    let index = DenseIndex::open(tmp.path(), DIM).await?;
    index.add(&[chunk("newer", ContentKind::Prose, 0)], &[v.clone()]).await?;
    let ids: Vec<String> = index.query(&v, 2).await?.into_iter().map(|h| h.chunk.id).collect();
    assert_eq!(ids, vec!["older", "newer"]);
    Ok(())
}
