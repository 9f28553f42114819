//! Rank fusion of the dense and lexical result lists.
//!
//! Every function returns ids best first with ties broken by ascending id,
//! so identical inputs always produce identical output.
use std::cmp::Ordering;
use std::collections::HashMap;

use docrag_core::types::{Channel, ChunkId, HitSource};

/// One ranked channel result: id plus the channel-native score.
#[derive(Debug, Clone, PartialEq)]
pub struct Ranked {
    pub id: ChunkId,
    pub score: f32,
}

impl Ranked {
    pub fn new(id: impl Into<ChunkId>, score: f32) -> Self {
        Self { id: id.into(), score }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fused {
    pub id: ChunkId,
    pub score: f64,
    pub source: HitSource,
}

struct Acc {
    score: f64,
    dense: bool,
    lexical: bool,
}

impl Acc {
    fn source(&self) -> HitSource {
        match (self.dense, self.lexical) {
            (true, true) => HitSource::Fused,
            (true, false) => HitSource::Dense,
            _ => HitSource::Lexical,
        }
    }
}

fn accumulate(acc: &mut HashMap<ChunkId, Acc>, id: &ChunkId, channel: Channel, score: f64) {
    let e = acc.entry(id.clone()).or_insert(Acc { score: 0.0, dense: false, lexical: false });
    e.score += score;
    match channel {
        Channel::Dense => e.dense = true,
        Channel::Lexical => e.lexical = true,
    }
}

fn finish(acc: HashMap<ChunkId, Acc>, k: usize) -> Vec<Fused> {
    let mut out: Vec<Fused> = acc.into_iter().map(|(id, a)| Fused { source: a.source(), score: a.score, id }).collect();
    out.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal).then_with(|| a.id.cmp(&b.id)));
    out.truncate(k);
    out
}

/// Reciprocal rank fusion: `Σ 1 / (c + rank)` with 0-based ranks.
///
/// An id repeated inside one list only counts at its best rank.
pub fn rrf(dense: &[Ranked], lexical: &[Ranked], c: f64, k: usize) -> Vec<Fused> {
    let mut acc: HashMap<ChunkId, Acc> = HashMap::new();
    for (list, channel) in [(dense, Channel::Dense), (lexical, Channel::Lexical)] {
        let mut seen = std::collections::HashSet::new();
        for (rank, r) in list.iter().enumerate() {
            if seen.insert(r.id.as_str()) {
                accumulate(&mut acc, &r.id, channel, 1.0 / (c + rank as f64));
            }
        }
    }
    finish(acc, k)
}

/// Min-max normalised scores blended as `alpha * dense + (1 - alpha) * lexical`.
/// An id missing from a channel contributes 0 for it.
pub fn weighted_blend(dense: &[Ranked], lexical: &[Ranked], alpha_dense: f64, k: usize) -> Vec<Fused> {
    let alpha = alpha_dense.clamp(0.0, 1.0);
    let mut acc: HashMap<ChunkId, Acc> = HashMap::new();
    for (list, channel, weight) in [(dense, Channel::Dense, alpha), (lexical, Channel::Lexical, 1.0 - alpha)] {
        let mut best: HashMap<&str, f64> = HashMap::new();
        for (id, norm) in normalise(list) {
            let e = best.entry(id).or_insert(norm);
            *e = e.max(norm);
        }
        for r in list {
            if let Some(norm) = best.remove(r.id.as_str()) {
                accumulate(&mut acc, &r.id, channel, weight * norm);
            }
        }
    }
    finish(acc, k)
}

/// Compatibility mode: the dense list alone when `alpha_dense >= 0.5`,
/// otherwise the lexical list alone.
pub fn threshold(dense: &[Ranked], lexical: &[Ranked], alpha_dense: f64, k: usize) -> Vec<Fused> {
    if alpha_dense >= 0.5 {
        single(dense, Channel::Dense, k)
    } else {
        single(lexical, Channel::Lexical, k)
    }
}

/// One channel's own ranking, truncated to `k`, duplicates dropped.
pub fn single(list: &[Ranked], channel: Channel, k: usize) -> Vec<Fused> {
    let mut seen = std::collections::HashSet::new();
    list.iter()
        .filter(|r| seen.insert(r.id.as_str()))
        .take(k)
        .map(|r| Fused { id: r.id.clone(), score: f64::from(r.score), source: channel.into() })
        .collect()
}

fn normalise(list: &[Ranked]) -> Vec<(&str, f64)> {
    let (min, max) = list.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), r| {
        let s = f64::from(r.score);
        (lo.min(s), hi.max(s))
    });
    let span = max - min;
    list.iter()
        .map(|r| {
            let norm = if span > 0.0 { (f64::from(r.score) - min) / span } else { 1.0 };
            (r.id.as_str(), norm)
        })
        .collect()
}
