use std::hash::{Hash, Hasher};

use docrag_core::error::Result;
use docrag_core::traits::Embedder;
use twox_hash::XxHash64;

/// Feature-hashing embedder: deterministic, model-free, unit norm.
///
/// Texts sharing terms land on shared buckets, so cosine similarity roughly
/// tracks term overlap. Used for tests and offline setups without weights.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dim: usize,
    seed: u64,
    name: String,
}

impl HashEmbedder {
    pub fn new(dim: usize, seed: u64) -> Self {
        let dim = dim.max(1);
        Self { dim, seed, name: format!("hashed-{dim}-s{seed}") }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dim];
        let tokens = text
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase);
        for token in tokens {
            let mut hasher = XxHash64::with_seed(self.seed);
            token.hash(&mut hasher);
            let h = hasher.finish();
            let idx = (h % self.dim as u64) as usize;
            let sign = if (h >> 63) == 0 { 1.0 } else { -1.0 };
            v[idx] += sign;
        }

        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm == 0.0 {
            // no tokens, or every bucket cancelled out
            v.iter_mut().for_each(|x| *x = 0.0);
            v[(self.seed % self.dim as u64) as usize] = 1.0;
            return v;
        }
        v.iter_mut().for_each(|x| *x /= norm);
        v
    }
}

impl Embedder for HashEmbedder {
    fn name(&self) -> &str {
        &self.name
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn max_len(&self) -> usize {
        usize::MAX
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}
