//! Resolution of configured embedding backends into trait objects.
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use docrag_core::config::{resolve_with_base, EmbedderSettings, EmbeddingSettings};
use docrag_core::error::{Error, Result};
use docrag_core::traits::Embedder;
use tracing::info;

use crate::hashed::HashEmbedder;
use crate::local::{resolve_model_dir, LocalEncoder};
use crate::router::EmbeddingRouter;

pub const FAKE_EMBEDDINGS_ENV: &str = "DOCRAG_USE_FAKE_EMBEDDINGS";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingBackend {
    Local,
    Hashed,
}

impl FromStr for EmbeddingBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "candle" => Ok(Self::Local),
            "hashed" | "fake" => Ok(Self::Hashed),
            other => Err(Error::InvalidConfig(format!("unknown embedding backend '{other}'"))),
        }
    }
}

/// `DOCRAG_USE_FAKE_EMBEDDINGS=1|true` replaces every backend with the hashed one.
pub fn fake_embeddings_forced() -> bool {
    std::env::var(FAKE_EMBEDDINGS_ENV)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

pub fn build_embedder(settings: &EmbedderSettings, dim: usize, base_dir: &Path) -> Result<Arc<dyn Embedder>> {
    let backend = if fake_embeddings_forced() { EmbeddingBackend::Hashed } else { settings.backend.parse()? };
    match backend {
        EmbeddingBackend::Hashed => Ok(Arc::new(HashEmbedder::new(dim, settings.seed))),
        EmbeddingBackend::Local => {
            let configured = settings.model_dir.as_ref().map(|d| resolve_with_base(base_dir, d));
            let model_dir = resolve_model_dir(configured.as_deref())?;
            let encoder = LocalEncoder::load(&model_dir, settings.max_len)?;
            if encoder.dim() != dim {
                return Err(Error::DimensionMismatch { expected: dim, actual: encoder.dim() });
            }
            Ok(Arc::new(encoder))
        }
    }
}

/// Builds both embedders once; two `local` entries pointing at the same
/// model directory share a single loaded encoder.
pub fn build_router(settings: &EmbeddingSettings, base_dir: &Path) -> Result<EmbeddingRouter> {
    let prose = build_embedder(&settings.text, settings.dim, base_dir)?;
    let same_local_model = !fake_embeddings_forced()
        && settings.code.backend == settings.text.backend
        && settings.code.model_dir == settings.text.model_dir
        && settings.code.max_len == settings.text.max_len
        && matches!(settings.text.backend.parse::<EmbeddingBackend>(), Ok(EmbeddingBackend::Local));
    let code = if same_local_model { prose.clone() } else { build_embedder(&settings.code, settings.dim, base_dir)? };
    info!(prose = prose.name(), code = code.name(), dim = settings.dim, "embedding router ready");
    EmbeddingRouter::new(code, prose)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_names_parse() {
        assert_eq!("local".parse::<EmbeddingBackend>().unwrap(), EmbeddingBackend::Local);
        assert_eq!(" Hashed ".parse::<EmbeddingBackend>().unwrap(), EmbeddingBackend::Hashed);
        assert!(matches!("openai".parse::<EmbeddingBackend>(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn hashed_backend_builds_without_model_files() {
        let settings = EmbedderSettings { backend: "hashed".into(), seed: 7, ..Default::default() };
        let embedder = build_embedder(&settings, 32, Path::new(".")).unwrap();
        assert_eq!(embedder.dim(), 32);
    }
}
