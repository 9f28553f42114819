use std::fs;
use std::io::Write;
use tempfile::TempDir;

use docrag_core::chunker::{window_bounds, Chunker};
use docrag_core::config::{ChunkingSettings, CodeWindow, Config, IngestionSettings, ProseWindow};
use docrag_core::error::Error;
use docrag_core::source::SourceLoader;
use docrag_core::types::ContentKind;
use proptest::prelude::*;

#[test]
fn loader_detects_kinds_and_reports_skips() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path();
    fs::create_dir_all(dir.join("src")).unwrap();
    fs::create_dir_all(dir.join("node_modules/pkg")).unwrap();
    fs::write(dir.join("src/lib.rs"), "pub fn answer() -> u32 { 42 }\n").unwrap();
    let mut f = fs::File::create(dir.join("README.md")).unwrap();
    writeln!(f, "Project notes").unwrap();
    fs::write(dir.join("empty.txt"), "   \n").unwrap();
    fs::write(dir.join("node_modules/pkg/index.js"), "module.exports = 1;\n").unwrap();
    fs::write(dir.join("image.png"), [0u8, 1, 2]).unwrap();

    let loaded = SourceLoader::new(dir, &IngestionSettings::default()).with_project_id("demo").load();

    let paths: Vec<&str> = loaded.documents.iter().map(|d| d.path.as_str()).collect();
    assert_eq!(paths, vec!["README.md", "src/lib.rs"]);
    assert_eq!(loaded.documents[0].kind, ContentKind::Prose);
    assert_eq!(loaded.documents[1].kind, ContentKind::Code);
    assert_eq!(loaded.documents[1].metadata.language.as_deref(), Some("rust"));
    assert_eq!(loaded.documents[1].metadata.project_id.as_deref(), Some("demo"));

    assert_eq!(loaded.skipped.len(), 1, "only the empty .txt is read and rejected");
    assert!(matches!(&loaded.skipped[0], Error::IngestionInput { path, .. } if path == "empty.txt"));
}

#[test]
fn unsupported_included_extension_is_skipped() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("paper.pdf"), b"%PDF-1.4").unwrap();
    let settings = IngestionSettings { include_extensions: vec!["*.pdf".into()], ..Default::default() };

    let loaded = SourceLoader::new(tmp.path(), &settings).load();
    assert!(loaded.documents.is_empty());
    assert_eq!(loaded.skipped.len(), 1);
}

#[test]
fn reference_corpus_chunk_counts() {
    let chunker = Chunker::new(ChunkingSettings {
        prose: ProseWindow { max_tokens: 200, overlap_tokens: 20 },
        code: CodeWindow { max_lines: 60, overlap_lines: 8 },
    });
    let code: String = (0..120).map(|i| format!("x = {i}\n")).collect();
    let prose = vec!["word"; 500].join(" ");

    // ceil(120 / 52) and ceil(500 / 180)
    assert_eq!(chunker.chunk(&code, "a.py", ContentKind::Code).len(), 3);
    assert_eq!(chunker.chunk(&prose, "a.md", ContentKind::Prose).len(), 3);
}

#[test]
fn config_file_overrides_defaults() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("docrag.toml");
    fs::write(
        &path,
        "[project]\nid = \"handbook\"\nindex_dir = \"idx\"\n\n[chunking.prose]\nmax_tokens = 120\n\n[retrieval]\nfusion = \"blend\"\n",
    )
    .unwrap();

    let config = Config::from_file(&path).unwrap();
    let settings = config.settings().unwrap();
    assert_eq!(settings.project.id, "handbook");
    assert_eq!(settings.chunking.prose.max_tokens, 120);
    assert_eq!(settings.chunking.prose.overlap_tokens, 20, "unset keys keep defaults");
    assert_eq!(settings.retrieval.fusion, docrag_core::config::FusionMode::Blend);
    assert_eq!(settings.layout(config.base_dir()).root(), tmp.path().join("idx").join("handbook"));
    assert_eq!(config.get::<usize>("chunking.code.max_lines").unwrap(), 60);
}

#[test]
fn missing_config_file_is_not_found() {
    let tmp = TempDir::new().unwrap();
    assert!(matches!(Config::from_file(&tmp.path().join("nope.toml")), Err(Error::NotFound(_))));
}

proptest! {
    #[test]
    fn prose_windows_cover_tokens_without_gaps(len in 0usize..400, size in 1usize..64, overlap in 0usize..80) {
        let tokens: Vec<String> = (0..len).map(|i| format!("t{i}")).collect();
        let chunker = Chunker::new(ChunkingSettings {
            prose: ProseWindow { max_tokens: size, overlap_tokens: overlap },
            code: CodeWindow::default(),
        });
        let chunks = chunker.chunk(&tokens.join(" "), "p.txt", ContentKind::Prose);

        let mut covered_to = 0usize;
        for c in &chunks {
            prop_assert!(!c.text.is_empty());
            prop_assert!(c.position <= covered_to, "gap before {}", c.position);
            let n = c.text.split_whitespace().count();
            prop_assert_eq!(&c.text, &tokens[c.position..c.position + n].join(" "));
            covered_to = covered_to.max(c.position + n);
        }
        prop_assert_eq!(covered_to, len);

        let advance = if overlap < size { size - overlap } else { size };
        let expected = if len == 0 { 0 } else if len <= size { 1 } else { 1 + (len - size).div_ceil(advance) };
        prop_assert_eq!(chunks.len(), expected);
    }

    #[test]
    fn window_bounds_terminate_for_any_overlap(len in 0usize..2000, size in 0usize..50, overlap in 0usize..100) {
        let bounds = window_bounds(len, size, overlap);
        prop_assert!(bounds.len() <= len);
        if let Some(&(_, end)) = bounds.last() {
            prop_assert_eq!(end, len);
        }
    }
}
