use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use futures::future::BoxFuture;
use tracing::{debug, warn};

use conductor_core::config::ContextConfig;
use conductor_core::error::Result;
use conductor_core::traits::ContextService;

/// Context service that reads files straight from the worktree.
///
/// Relative paths resolve against the worktree. Content beyond
/// `max_file_bytes` is cut at a char boundary. Unreadable files are left
/// out of the result.
pub struct FsContextService {
    max_file_bytes: usize,
}

impl FsContextService {
    pub fn new(max_file_bytes: usize) -> Self {
        Self { max_file_bytes }
    }

    pub fn from_config(config: &ContextConfig) -> Self {
        Self::new(config.max_file_bytes)
    }
}

impl Default for FsContextService {
    fn default() -> Self {
        Self::from_config(&ContextConfig::default())
    }
}

fn resolve_path(file_path: &str, worktree: &Path) -> PathBuf {
    let path = PathBuf::from(file_path);
    if path.is_absolute() {
        path
    } else {
        worktree.join(path)
    }
}

fn truncate_bytes(mut content: String, max_bytes: usize) -> String {
    if max_bytes == 0 || content.len() <= max_bytes {
        return content;
    }
    let mut cut = max_bytes;
    while !content.is_char_boundary(cut) {
        cut -= 1;
    }
    content.truncate(cut);
    content.push_str("\n... (truncated)");
    content
}

impl ContextService for FsContextService {
    fn get_file_context(
        &self,
        worktree: PathBuf,
        target_files: Vec<String>,
    ) -> BoxFuture<'_, Result<BTreeMap<String, String>>> {
        Box::pin(async move {
            let mut files = BTreeMap::new();
            for file in target_files {
                let path = resolve_path(&file, &worktree);
                match tokio::fs::read_to_string(&path).await {
                    Ok(content) => {
                        debug!(path = %path.display(), bytes = content.len(), "Read context file");
                        files.insert(file, truncate_bytes(content, self.max_file_bytes));
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Context file unavailable");
                    }
                }
            }
            Ok(files)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_relative_and_skips_missing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("docs")).unwrap();
        std::fs::write(dir.path().join("docs/ARCH.md"), "Layered.").unwrap();

        let files = FsContextService::default()
            .get_file_context(
                dir.path().to_path_buf(),
                vec!["docs/ARCH.md".into(), "missing.md".into()],
            )
            .await
            .unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files["docs/ARCH.md"], "Layered.");
    }

    #[tokio::test]
    async fn truncates_large_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("big.txt"), "é".repeat(100)).unwrap();

        let files = FsContextService::new(11)
            .get_file_context(dir.path().to_path_buf(), vec!["big.txt".into()])
            .await
            .unwrap();
        let content = &files["big.txt"];
        assert!(content.starts_with("ééééé"));
        assert!(content.ends_with("(truncated)"));
    }

    #[test]
    fn absolute_paths_are_kept() {
        assert_eq!(
            resolve_path("/etc/hosts", Path::new("/work")),
            PathBuf::from("/etc/hosts")
        );
        assert_eq!(
            resolve_path("src/lib.rs", Path::new("/work")),
            PathBuf::from("/work/src/lib.rs")
        );
    }
}
