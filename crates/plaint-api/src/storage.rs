use anyhow::Result;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use uuid::Uuid;

/// On-disk storage for chat attachments.
///
/// Each attachment is a flat file at `{storage_dir}/{attachment_id}`.
pub struct Storage {
    dir: PathBuf,
}

impl Storage {
    pub async fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir).await?;
        info!("Attachment storage directory: {}", dir.display());
        Ok(Self { dir })
    }

    /// Path to the file for a given attachment.
    pub fn file_path(&self, attachment_id: Uuid) -> PathBuf {
        self.dir.join(attachment_id.to_string())
    }

    /// Write an attachment and return the SHA-256 (hex) of its contents.
    pub async fn save(&self, attachment_id: Uuid, data: &[u8]) -> Result<String> {
        let mut hasher = Sha256::new();
        hasher.update(data);
        let sha256 = hex::encode(hasher.finalize());

        let path = self.file_path(attachment_id);
        let mut file = fs::File::create(&path).await?;
        file.write_all(data).await?;
        file.flush().await?;

        Ok(sha256)
    }

    pub async fn read(&self, attachment_id: Uuid) -> Result<Vec<u8>> {
        Ok(fs::read(self.file_path(attachment_id)).await?)
    }

    /// Delete an attachment's file from disk.
    pub async fn delete(&self, attachment_id: Uuid) -> Result<()> {
        let path = self.file_path(attachment_id);
        match fs::remove_file(&path).await {
            Ok(()) => {
                info!("Deleted attachment {}", attachment_id);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Attachment {} already gone", attachment_id);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_read_delete() {
        let dir = std::env::temp_dir().join(format!("plaint-storage-{}", Uuid::new_v4()));
        let storage = Storage::new(dir.clone()).await.unwrap();
        let id = Uuid::new_v4();

        let sha = storage.save(id, b"abc").await.unwrap();
        assert_eq!(sha, "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad");
        assert_eq!(storage.read(id).await.unwrap(), b"abc");

        storage.delete(id).await.unwrap();
        assert!(storage.read(id).await.is_err());
        // Deleting twice is fine.
        storage.delete(id).await.unwrap();

        let _ = std::fs::remove_dir_all(dir);
    }
}
