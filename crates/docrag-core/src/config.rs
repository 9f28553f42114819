//! Layered configuration and path helpers.
//!
//! Figment merges built-in defaults, `config.toml`, `config.<env>.toml` and
//! `DOCRAG_*` environment variables (`__` separates nested keys, e.g.
//! `DOCRAG_RETRIEVAL__TOP_K=4`). Paths accept `~` and `${VAR}` and resolve
//! against the directory of the config file.
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub const ENV_PREFIX: &str = "DOCRAG_";

pub struct Config {
    figment: Figment,
    base_dir: PathBuf,
}

impl Config {
    /// Load `config.toml` (plus the `RUST_ENV` overlay) from the working directory.
    pub fn load() -> Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());
        let base_dir = env::current_dir()?;

        let mut figment = Self::defaults().merge(Toml::file("config.toml"));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));
        Ok(Self { figment, base_dir })
    }

    /// Load an explicit config file; relative paths inside it resolve against its directory.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::NotFound(format!("config file {}", path.display())));
        }
        let base_dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => env::current_dir()?,
        };
        let figment = Self::defaults()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        Ok(Self { figment, base_dir })
    }

    /// Defaults only, for tests and embedding the engine without a config file.
    pub fn from_settings(settings: &Settings, base_dir: &Path) -> Self {
        Self { figment: Figment::from(Serialized::defaults(settings)), base_dir: base_dir.to_path_buf() }
    }

    fn defaults() -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
    }

    pub fn get<T>(&self, key: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| Error::InvalidConfig(format!("Failed to get '{key}': {e}")))
    }

    /// Extract and validate the full typed settings tree.
    pub fn settings(&self) -> Result<Settings> {
        let settings: Settings = self
            .figment
            .extract()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub project: ProjectSettings,
    pub ingestion: IngestionSettings,
    pub chunking: ChunkingSettings,
    pub embedding: EmbeddingSettings,
    pub lexical: LexicalSettings,
    pub retrieval: RetrievalSettings,
    pub context: ContextSettings,
    pub llm: LlmSettings,
    pub prompting: PromptSettings,
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(Error::InvalidConfig(msg.to_string()));
        if self.project.id.trim().is_empty() {
            return invalid("project.id must not be empty");
        }
        if self.chunking.prose.max_tokens == 0 {
            return invalid("chunking.prose.max_tokens must be positive");
        }
        if self.chunking.code.max_lines == 0 {
            return invalid("chunking.code.max_lines must be positive");
        }
        if self.ingestion.batch_size == 0 {
            return invalid("ingestion.batch_size must be positive");
        }
        if self.embedding.dim == 0 {
            return invalid("embedding.dim must be positive");
        }
        if self.retrieval.top_k == 0 {
            return invalid("retrieval.top_k must be positive");
        }
        if !(0.0..=1.0).contains(&self.retrieval.alpha_dense) {
            return invalid("retrieval.alpha_dense must be within [0, 1]");
        }
        if !(self.retrieval.rrf_k > 0.0) {
            return invalid("retrieval.rrf_k must be positive");
        }
        Ok(())
    }

    /// On-disk layout for this project's indexes.
    pub fn layout(&self, base_dir: &Path) -> IndexLayout {
        IndexLayout::new(resolve_with_base(base_dir, &self.project.index_dir), &self.project.id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectSettings {
    pub id: String,
    pub root_dir: String,
    pub index_dir: String,
}

impl Default for ProjectSettings {
    fn default() -> Self {
        Self { id: "default".to_string(), root_dir: ".".to_string(), index_dir: ".docrag".to_string() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionSettings {
    pub include_extensions: Vec<String>,
    pub exclude_dirs: Vec<String>,
    pub batch_size: usize,
}

impl Default for IngestionSettings {
    fn default() -> Self {
        Self {
            include_extensions: [".py", ".c", ".cpp", ".h", ".hpp", ".rs", ".go", ".js", ".ts", ".java", ".md", ".txt"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            exclude_dirs: [".git", "node_modules", "target", ".docrag"].iter().map(|s| s.to_string()).collect(),
            batch_size: 256,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChunkingSettings {
    pub prose: ProseWindow,
    pub code: CodeWindow,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProseWindow {
    pub max_tokens: usize,
    pub overlap_tokens: usize,
}

impl Default for ProseWindow {
    fn default() -> Self {
        Self { max_tokens: 200, overlap_tokens: 20 }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CodeWindow {
    pub max_lines: usize,
    pub overlap_lines: usize,
}

impl Default for CodeWindow {
    fn default() -> Self {
        Self { max_lines: 60, overlap_lines: 8 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub dim: usize,
    pub text: EmbedderSettings,
    pub code: EmbedderSettings,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            dim: 1024,
            text: EmbedderSettings::default(),
            code: EmbedderSettings { seed: 1, ..EmbedderSettings::default() },
        }
    }
}

/// One embedding backend. `backend` is `local` (candle encoder loaded from
/// `model_dir`) or `hashed` (deterministic feature hashing, no model files).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedderSettings {
    pub backend: String,
    pub model_dir: Option<String>,
    pub max_len: usize,
    pub seed: u64,
}

impl Default for EmbedderSettings {
    fn default() -> Self {
        Self { backend: "local".to_string(), model_dir: None, max_len: 256, seed: 0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LexicalSettings {
    pub writer_memory_bytes: usize,
}

impl Default for LexicalSettings {
    fn default() -> Self {
        Self { writer_memory_bytes: 50_000_000 }
    }
}

/// How the two channels are reconciled.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FusionMode {
    /// Reciprocal rank fusion.
    #[default]
    Rrf,
    /// Fusion disabled: weighted blend of normalised channel scores.
    Blend,
    /// Fusion disabled, legacy behaviour: one channel chosen by `alpha_dense`.
    Threshold,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub top_k: usize,
    pub candidates: usize,
    pub rrf_k: f64,
    pub fusion: FusionMode,
    pub alpha_dense: f64,
    pub channel_timeout_ms: u64,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self { top_k: 8, candidates: 16, rrf_k: 50.0, fusion: FusionMode::Rrf, alpha_dense: 0.7, channel_timeout_ms: 10_000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextSettings {
    pub token_budget: usize,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self { token_budget: 6000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub backend: String,
    pub model: String,
    pub base_url: String,
    pub max_output_tokens: u32,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            backend: "ollama".to_string(),
            model: "llama3.1".to_string(),
            base_url: "http://localhost:11434".to_string(),
            max_output_tokens: 1024,
            temperature: 0.2,
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptSettings {
    pub system_message: String,
}

impl Default for PromptSettings {
    fn default() -> Self {
        Self {
            system_message: "You answer questions about a project using only the numbered sources in the context. \
                Cite sources as [Source N]. If the context does not contain the answer, say so."
                .to_string(),
        }
    }
}

/// `<index_dir>/<project_id>/{dense,lexical}`.
#[derive(Debug, Clone)]
pub struct IndexLayout {
    root: PathBuf,
}

impl IndexLayout {
    pub fn new(index_dir: PathBuf, project_id: &str) -> Self {
        Self { root: index_dir.join(project_id) }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dense_dir(&self) -> PathBuf {
        self.root.join("dense")
    }

    pub fn lexical_dir(&self) -> PathBuf {
        self.root.join("lexical")
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        Settings::default().validate().unwrap();
    }

    #[test]
    fn rejects_out_of_range_alpha() {
        let mut s = Settings::default();
        s.retrieval.alpha_dense = 1.5;
        assert!(matches!(s.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn layout_nests_project_under_index_dir() {
        let layout = Settings::default().layout(Path::new("/srv/work"));
        assert_eq!(layout.dense_dir(), PathBuf::from("/srv/work/.docrag/default/dense"));
        assert_eq!(layout.lexical_dir(), PathBuf::from("/srv/work/.docrag/default/lexical"));
    }

    #[test]
    fn absolute_paths_ignore_base() {
        assert_eq!(resolve_with_base(Path::new("/base"), "/abs/dir"), PathBuf::from("/abs/dir"));
        assert_eq!(resolve_with_base(Path::new("/base"), "rel"), PathBuf::from("/base/rel"));
    }
}
