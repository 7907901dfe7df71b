//! Bulk loading of a directory of documents.
//!
//! Files are discovered recursively, mapped to a content type by extension and submitted one by
//! one. Hidden entries are not visited and unknown extensions are skipped; a file that fails does not stop the walk.

use crate::ingestion::DocumentSpec;
use crate::service::KnowledgeApi;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::{DirEntry, WalkDir};

/// Errors that stop a directory load before any file is submitted.
#[derive(Debug, Error)]
pub enum LoaderError {
    /// The path does not exist or is not a directory.
    #[error("{0} is not a directory")]
    NotADirectory(PathBuf),
}

/// Scope applied to every document of a directory load.
#[derive(Debug, Clone, Default)]
pub struct LoadScope {
    /// World scope.
    pub world_id: Option<String>,
    /// Room scope.
    pub room_id: Option<String>,
    /// Entity scope.
    pub entity_id: Option<String>,
}

/// What happened during a directory load.
#[derive(Debug, Default)]
pub struct LoadSummary {
    /// Documents ingested for the first time.
    pub ingested: usize,
    /// Documents that were already stored.
    pub deduplicated: usize,
    /// Fragments stored by the newly ingested documents.
    pub fragments: usize,
    /// Files skipped because of their extension.
    pub skipped: Vec<PathBuf>,
    /// Files that failed, with the reason.
    pub failed: Vec<(PathBuf, String)>,
}

/// Content type for a file, or `None` when the extension is not ingestible.
pub fn content_type_for_path(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    let content_type = match extension.as_str() {
        "txt" | "text" | "log" => "text/plain",
        "md" | "markdown" | "mdx" => "text/markdown",
        "html" | "htm" => "text/html",
        "csv" => "text/csv",
        "json" => "application/json",
        "yaml" | "yml" => "application/x-yaml",
        "toml" => "application/toml",
        "xml" => "application/xml",
        "js" | "mjs" => "application/javascript",
        "ts" | "tsx" => "application/typescript",
        "sh" => "application/x-sh",
        "rs" => "text/x-rust",
        "py" => "text/x-python",
        "go" => "text/x-go",
        "java" => "text/x-java",
        "c" | "h" => "text/x-c",
        "cpp" | "hpp" => "text/x-c++",
        _ => return None,
    };
    Some(content_type)
}

/// Submit every ingestible file below `root`.
pub async fn load_directory<S>(
    service: &S,
    root: &Path,
    scope: &LoadScope,
) -> Result<LoadSummary, LoaderError>
where
    S: KnowledgeApi + ?Sized,
{
    if !root.is_dir() {
        return Err(LoaderError::NotADirectory(root.to_path_buf()));
    }

    let mut summary = LoadSummary::default();
    let walker = WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry));
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                tracing::warn!(error = %error, "Skipping unreadable directory entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let Some(content_type) = content_type_for_path(path) else {
            tracing::debug!(path = %path.display(), "Skipping file with unsupported extension");
            summary.skipped.push(path.to_path_buf());
            continue;
        };

        match load_file(service, root, path, content_type, scope).await {
            Ok(outcome) if outcome.deduplicated => summary.deduplicated += 1,
            Ok(outcome) => {
                summary.ingested += 1;
                summary.fragments += outcome.fragment_count;
            }
            Err(reason) => {
                tracing::warn!(path = %path.display(), reason = %reason, "Failed to load document");
                summary.failed.push((path.to_path_buf(), reason));
            }
        }
    }

    tracing::info!(
        root = %root.display(),
        ingested = summary.ingested,
        deduplicated = summary.deduplicated,
        skipped = summary.skipped.len(),
        failed = summary.failed.len(),
        "Directory load finished"
    );
    Ok(summary)
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .is_some_and(|name| name.starts_with('.'))
}

async fn load_file<S>(
    service: &S,
    root: &Path,
    path: &Path,
    content_type: &str,
    scope: &LoadScope,
) -> Result<crate::service::AddKnowledgeOutcome, String>
where
    S: KnowledgeApi + ?Sized,
{
    let content = tokio::fs::read(path)
        .await
        .map_err(|error| format!("read failed: {error}"))?;
    let relative = path.strip_prefix(root).unwrap_or(path);
    let mut metadata = Map::new();
    metadata.insert(
        "path".into(),
        Value::String(relative.to_string_lossy().into_owned()),
    );

    let spec = DocumentSpec {
        content,
        content_type: content_type.to_string(),
        filename: relative.to_string_lossy().into_owned(),
        title: path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned()),
        world_id: scope.world_id.clone(),
        room_id: scope.room_id.clone(),
        entity_id: scope.entity_id.clone(),
        metadata,
    };
    service
        .add_knowledge(spec)
        .await
        .map_err(|error| error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::LocalEmbedder;
    use crate::ingestion::ProviderLimits;
    use crate::service::KnowledgeService;
    use crate::store::InMemoryStore;
    use std::sync::Arc;

    #[test]
    fn extensions_map_to_content_types() {
        assert_eq!(content_type_for_path(Path::new("a/README.MD")), Some("text/markdown"));
        assert_eq!(content_type_for_path(Path::new("lib.rs")), Some("text/x-rust"));
        assert_eq!(content_type_for_path(Path::new("photo.png")), None);
        assert_eq!(content_type_for_path(Path::new("Makefile")), None);
    }

    #[tokio::test]
    async fn missing_directory_is_an_error() {
        let service = KnowledgeService::builder(
            Arc::new(InMemoryStore::new()),
            Arc::new(LocalEmbedder::new(8).unwrap()),
        )
        .build()
        .unwrap();
        let result = load_directory(&service, Path::new("/definitely/not/here"), &LoadScope::default()).await;
        assert!(matches!(result, Err(LoaderError::NotADirectory(_))));
    }

    #[tokio::test]
    async fn loads_supported_files_once() {
        let root = std::env::temp_dir().join(format!("rusty-knowledge-loader-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(root.join("nested")).unwrap();
        std::fs::write(root.join("a.md"), "# Title\nSome markdown body.").unwrap();
        std::fs::write(root.join("nested/b.txt"), "Plain text notes.").unwrap();
        std::fs::write(root.join("image.png"), [0x89, 0x50, 0x4e, 0x47]).unwrap();
        std::fs::create_dir_all(root.join(".git")).unwrap();
        std::fs::write(root.join(".git/config.txt"), "ignored").unwrap();

        let mut limits = ProviderLimits::default();
        limits.rate_limit_enabled = false;
        limits.batch_delay_ms = 0;
        let store = Arc::new(InMemoryStore::new());
        let service = KnowledgeService::builder(store.clone(), Arc::new(LocalEmbedder::new(8).unwrap()))
            .limits(limits)
            .build()
            .unwrap();

        let first = load_directory(&service, &root, &LoadScope::default()).await.unwrap();
        assert_eq!(first.ingested, 2);
        assert_eq!(first.skipped.len(), 1);
        assert!(first.failed.is_empty());

        let second = load_directory(&service, &root, &LoadScope::default()).await.unwrap();
        assert_eq!(second.ingested, 0);
        assert_eq!(second.deduplicated, 2);
        assert_eq!(store.document_count().await, 2);

        std::fs::remove_dir_all(&root).ok();
    }
}
