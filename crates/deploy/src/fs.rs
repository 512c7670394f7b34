//! File system utils.

use std::{path::Path, time::Duration};

use anyhow::Context;
use notify::{Event, RecursiveMode, Watcher};
use tokio::sync::watch;

pub struct FsHandler;

impl FsHandler {
    // Bind mounts need a writable host directory.
    pub fn create_host_config_directory(path: &Path) -> anyhow::Result<()> {
        std::fs::create_dir_all(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;

        let mut perms = std::fs::metadata(path)
            .context("Failed to get metadata for directory")?
            .permissions();
        perms.set_readonly(false);
        std::fs::set_permissions(path, perms)
            .with_context(|| format!("Failed to set permissions on {}", path.display()))?;

        tracing::debug!(path = %path.display(), "Created host data directory");
        Ok(())
    }

    /// Wait for a file to appear, watching its parent directory.
    pub async fn wait_for_file(path: &Path, timeout: Duration) -> anyhow::Result<()> {
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Ok(());
        }

        tracing::debug!(path = %path.display(), "Waiting for file");

        let parent = path
            .parent()
            .context("File path must have a parent directory")?;

        let (tx, mut rx) = watch::channel(false);

        let target = path.to_path_buf();
        let mut watcher =
            notify::recommended_watcher(move |res: Result<Event, notify::Error>| match res {
                Ok(event)
                    if (event.kind.is_create() || event.kind.is_modify())
                        && event.paths.contains(&target) =>
                {
                    let _ = tx.send(true);
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(err = ?e, path = %target.display(), "File watcher error");
                }
            })
            .context("Failed to create file watcher")?;

        watcher
            .watch(parent, RecursiveMode::NonRecursive)
            .context("Failed to watch directory")?;

        // The file may have appeared between the first check and the watch.
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            tokio::time::timeout(timeout, rx.changed())
                .await
                .with_context(|| format!("Timeout waiting for file: {}", path.display()))?
                .context("File watcher channel closed")?;
        }

        // The watcher can fire before the writer has flushed.
        tokio::time::sleep(Duration::from_millis(100)).await;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_for_existing_file() {
        let dir = tempdir::TempDir::new("vedrome-fs").unwrap();
        let path = dir.path().join("anvil.json");
        std::fs::write(&path, "{}").unwrap();

        FsHandler::wait_for_file(&path, Duration::from_millis(10))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_missing_file_times_out() {
        let dir = tempdir::TempDir::new("vedrome-fs").unwrap();
        let path = dir.path().join("never.json");

        assert!(
            FsHandler::wait_for_file(&path, Duration::from_millis(50))
                .await
                .is_err()
        );
    }

    #[test]
    fn test_create_host_config_directory() {
        let dir = tempdir::TempDir::new("vedrome-fs").unwrap();
        let nested = dir.path().join("devnet").join("anvil");
        FsHandler::create_host_config_directory(&nested).unwrap();
        assert!(nested.is_dir());
    }
}
