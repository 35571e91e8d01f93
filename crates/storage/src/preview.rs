use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use shared::domain::ProjectId;

/// Where decoded frame preview images end up. Keys are relative,
/// slash-separated paths such as `frames/p3_f2_<uuid>.png`.
#[async_trait]
pub trait PreviewStore: Send + Sync {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// Deletes the preview under `key`; a missing preview is not an error.
    async fn remove(&self, key: &str) -> Result<()>;
}

/// Fresh key for a preview of frame `index`; never reused, so cloned frames
/// can keep pointing at their source's image.
pub fn preview_key(project_id: ProjectId, index: i64, extension: &str) -> String {
    format!(
        "frames/p{}_f{}_{}.{extension}",
        project_id.0,
        index,
        uuid::Uuid::new_v4().simple()
    )
}

#[derive(Debug, Clone)]
pub struct FsPreviewStore {
    root: PathBuf,
}

impl FsPreviewStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        if relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_)))
        {
            bail!("preview key '{key}' must be a plain relative path");
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl PreviewStore for FsPreviewStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create '{}'", parent.display()))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("failed to write preview '{}'", path.display()))?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err)
                .with_context(|| format!("failed to remove preview '{}'", path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_carry_extension_and_are_unique() {
        let first = preview_key(ProjectId(3), 2, "webp");
        let second = preview_key(ProjectId(3), 2, "webp");
        assert!(first.starts_with("frames/p3_f2_"));
        assert!(first.ends_with(".webp"));
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn writes_preview_under_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsPreviewStore::new(dir.path());
        store
            .put("frames/p1_f1_x.png", b"\x89PNG")
            .await
            .expect("put");
        let written = std::fs::read(dir.path().join("frames").join("p1_f1_x.png")).expect("read");
        assert_eq!(written, b"\x89PNG");
    }

    #[tokio::test]
    async fn remove_deletes_the_file_and_tolerates_missing_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsPreviewStore::new(dir.path());
        store.put("frames/gone.png", b"x").await.expect("put");
        store.remove("frames/gone.png").await.expect("remove");
        assert!(!dir.path().join("frames").join("gone.png").exists());
        store.remove("frames/gone.png").await.expect("remove again");
        assert!(store.remove("../outside.png").await.is_err());
    }

    #[tokio::test]
    async fn rejects_keys_escaping_the_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsPreviewStore::new(dir.path());
        assert!(store.put("../outside.png", b"x").await.is_err());
        assert!(store.put("/abs.png", b"x").await.is_err());
    }
}
