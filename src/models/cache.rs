//! On-disk model definition cache
//!
//! One file per model source URI, named by the MD5 of the URI. The key
//! identifies the source, not the content, so a refreshed definition
//! overwrites the same slot.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Cache identity key of a model source URI (lowercase hex MD5).
pub fn model_key(uri: &str) -> String {
    format!("{:x}", md5::compute(uri.as_bytes()))
}

#[derive(Debug, Clone)]
pub struct ModelCache {
    dir: PathBuf,
}

impl ModelCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }

    /// Cached definition for `key`; a missing file is `Ok(None)`.
    pub async fn read(&self, key: &str) -> std::io::Result<Option<String>> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Overwrite the slot for `key`, creating the directory if needed.
    pub async fn write(&self, key: &str, contents: &str) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(self.path_for(key), contents).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_uri_same_key() {
        let a = model_key("https://models.example.org/activity.json");
        let b = model_key("https://models.example.org/activity.json");
        let c = model_key("https://models.example.org/sleep.json");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 32);
    }

    #[tokio::test]
    async fn read_missing_is_none_then_round_trips() {
        let dir = tempfile::tempdir().expect("temp dir");
        let cache = ModelCache::new(dir.path().join("persisted_models"));
        let key = model_key("file:///tmp/m.json");

        assert_eq!(cache.read(&key).await.expect("read"), None);
        cache.write(&key, "{\"class\":\"x\"}").await.expect("write");
        assert_eq!(
            cache.read(&key).await.expect("read").as_deref(),
            Some("{\"class\":\"x\"}")
        );
    }
}
