use std::path::PathBuf;

use async_trait::async_trait;
use mailfeed_domain::{CheckpointStore, StableMessageId};
use mailfeed_error::MailError;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::debug;

// One marker file per emitted message. The file name is a hash of the stable
// id so ids containing separators or angle brackets stay inside the directory.
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, MailError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| MailError::checkpoint(format!("create {}: {e}", dir.display())))?;
        debug!(dir = %dir.display(), "checkpoint directory ready");
        Ok(Self { dir })
    }

    fn marker_path(&self, id: &StableMessageId) -> PathBuf {
        let digest = Sha256::digest(id.as_str().as_bytes());
        let name: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        self.dir.join(name)
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn exists(&self, id: &StableMessageId) -> Result<bool, MailError> {
        let path = self.marker_path(id);
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| MailError::checkpoint(format!("stat {}: {e}", path.display())))
    }

    async fn record(&self, id: &StableMessageId) -> Result<(), MailError> {
        let path = self.marker_path(id);
        let mut file = tokio::fs::File::create(&path)
            .await
            .map_err(|e| MailError::checkpoint(format!("create {}: {e}", path.display())))?;
        let line = format!("{id}\n");
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| MailError::checkpoint(format!("write {}: {e}", path.display())))?;
        file.sync_all()
            .await
            .map_err(|e| MailError::checkpoint(format!("sync {}: {e}", path.display())))?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn record_then_exists() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::open(dir.path()).await.unwrap();
        let id = StableMessageId::new("<msg-1@example.com>");

        assert!(!store.exists(&id).await.unwrap());
        store.record(&id).await.unwrap();
        assert!(store.exists(&id).await.unwrap());
    }

    #[tokio::test]
    async fn markers_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let id = StableMessageId::new("<msg-2@example.com>");
        {
            let store = FileCheckpointStore::open(dir.path()).await.unwrap();
            store.record(&id).await.unwrap();
        }
        let store = FileCheckpointStore::open(dir.path()).await.unwrap();
        assert!(store.exists(&id).await.unwrap());
    }

    #[tokio::test]
    async fn ids_with_path_characters_stay_in_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::open(dir.path()).await.unwrap();
        let id = StableMessageId::new("<../../etc/passwd@evil>");

        store.record(&id).await.unwrap();
        assert!(store.exists(&id).await.unwrap());

        let mut entries = std::fs::read_dir(dir.path()).unwrap();
        let entry = entries.next().unwrap().unwrap();
        assert!(entries.next().is_none());
        let name = entry.file_name().into_string().unwrap();
        assert_eq!(name.len(), 64);
        assert!(name.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn distinct_ids_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::open(dir.path()).await.unwrap();
        let one = StableMessageId::new("<one@example.com>");
        let two = StableMessageId::new("<two@example.com>");

        store.record(&one).await.unwrap();
        assert!(store.exists(&one).await.unwrap());
        assert!(!store.exists(&two).await.unwrap());
    }
}
