//! File output with a `lines` codec.
//!
//! Each part is written followed by a newline; a multi-part batch is
//! terminated by one extra blank line so consumers can recover the batch
//! boundaries (the `lines/multipart` input codec reads this format back).

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use weir_sdk::BatchOutput;
use weir_types::{Batch, Error};

#[derive(Debug, Clone, Deserialize)]
pub struct FileOutputConfig {
    pub path: PathBuf,
    /// Truncate instead of append on open.
    #[serde(default)]
    pub truncate: bool,
}

pub struct FileOutput {
    path: PathBuf,
    truncate: bool,
    file: Mutex<Option<File>>,
}

impl FileOutput {
    #[must_use]
    pub fn new(conf: &FileOutputConfig) -> Self {
        Self {
            path: conf.path.clone(),
            truncate: conf.truncate,
            file: Mutex::new(None),
        }
    }
}

#[async_trait]
impl BatchOutput for FileOutput {
    async fn connect(&self) -> Result<(), Error> {
        let mut slot = self.file.lock().await;
        if slot.is_some() {
            return Ok(());
        }
        let mut options = OpenOptions::new();
        options.create(true).write(true);
        if self.truncate {
            options.truncate(true);
        } else {
            options.append(true);
        }
        let file = options
            .open(&self.path)
            .await
            .map_err(|e| Error::Connector(format!("open {}: {e}", self.path.display())))?;
        *slot = Some(file);
        Ok(())
    }

    async fn write_batch(&self, batch: Batch) -> Result<(), Error> {
        let mut slot = self.file.lock().await;
        let Some(file) = slot.as_mut() else {
            return Err(Error::NotConnected);
        };
        let multipart = batch.len() > 1;
        let mut buf = Vec::new();
        for mut part in batch {
            buf.extend_from_slice(part.as_bytes()?);
            buf.push(b'\n');
        }
        if multipart {
            buf.push(b'\n');
        }
        file.write_all(&buf).await.map_err(|e| Error::io(&e))?;
        file.flush().await.map_err(|e| Error::io(&e))?;
        Ok(())
    }

    async fn close(&self) -> Result<(), Error> {
        let mut slot = self.file.lock().await;
        if let Some(mut file) = slot.take() {
            file.shutdown().await.map_err(|e| Error::io(&e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weir_types::Part;

    fn batch_of(contents: &[&str]) -> Batch {
        contents.iter().map(|c| Part::new(c.to_string())).collect()
    }

    async fn written(path: &std::path::Path) -> String {
        tokio::fs::read_to_string(path).await.unwrap()
    }

    #[tokio::test]
    async fn single_part_batches_one_line_each() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let out = FileOutput::new(&FileOutputConfig {
            path: path.clone(),
            truncate: false,
        });
        out.connect().await.unwrap();
        out.write_batch(batch_of(&["a"])).await.unwrap();
        out.write_batch(batch_of(&["b"])).await.unwrap();
        out.close().await.unwrap();
        assert_eq!(written(&path).await, "a\nb\n");
    }

    #[tokio::test]
    async fn multipart_batches_end_with_blank_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let out = FileOutput::new(&FileOutputConfig {
            path: path.clone(),
            truncate: false,
        });
        out.connect().await.unwrap();
        out.write_batch(batch_of(&["hello 1", "hello 2"])).await.unwrap();
        out.write_batch(batch_of(&["hello 3", "hello 4"])).await.unwrap();
        out.close().await.unwrap();
        assert_eq!(written(&path).await, "hello 1\nhello 2\n\nhello 3\nhello 4\n\n");
    }

    #[tokio::test]
    async fn write_before_connect_is_not_connected() {
        let dir = tempfile::tempdir().unwrap();
        let out = FileOutput::new(&FileOutputConfig {
            path: dir.path().join("out.txt"),
            truncate: false,
        });
        assert!(matches!(
            out.write_batch(batch_of(&["x"])).await,
            Err(Error::NotConnected)
        ));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let out = FileOutput::new(&FileOutputConfig {
            path: dir.path().join("out.txt"),
            truncate: false,
        });
        out.connect().await.unwrap();
        out.close().await.unwrap();
        out.close().await.unwrap();
    }
}
