//! Renders retrieval hits into the numbered context block handed to a generator.
use std::fmt::Write;

use docrag_core::types::RetrievalHit;
use tracing::debug;

pub const DEFAULT_TOKEN_BUDGET: usize = 6000;

#[derive(Debug, Clone)]
pub struct ContextAssembler {
    token_budget: usize,
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_BUDGET)
    }
}

impl ContextAssembler {
    pub fn new(token_budget: usize) -> Self {
        Self { token_budget }
    }

    /// One `[Source i] path @ position (channel)` section per hit, in hit
    /// order, separated by a blank line. Packing stops at the first section
    /// that would overflow the budget.
    pub fn build(&self, query: &str, hits: &[RetrievalHit]) -> String {
        self.pack(query, hits).0
    }

    /// Like [`build`](Self::build), also returning how many leading hits made
    /// it into the context.
    pub fn pack(&self, _query: &str, hits: &[RetrievalHit]) -> (String, usize) {
        let mut out = String::new();
        let mut kept = 0usize;
        let mut used = 0usize;
        for (i, hit) in hits.iter().enumerate() {
            let section = render_section(i + 1, hit);
            let cost = estimate_tokens(&section);
            if used + cost > self.token_budget {
                debug!(kept = i, dropped = hits.len() - i, budget = self.token_budget, "context budget reached");
                break;
            }
            used += cost;
            if !out.is_empty() {
                out.push_str("\n\n");
            }
            out.push_str(&section);
            kept += 1;
        }
        (out, kept)
    }
}

fn render_section(n: usize, hit: &RetrievalHit) -> String {
    let mut s = String::new();
    let _ = writeln!(s, "[Source {n}] {} @ {} ({})", hit.chunk.source_path, hit.chunk.position, hit.source);
    s.push_str(hit.chunk.text.trim());
    s
}

/// Whitespace-token count.
pub fn estimate_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}
