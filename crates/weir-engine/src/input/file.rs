//! File input: consume files line by line.
//!
//! Codecs: `lines` yields one single-part batch per line;
//! `lines/multipart` groups lines into one batch per blank-line-separated
//! section. This source has no per-offset redelivery; a nack is logged
//! and treated as a full nack (documented best-effort behaviour).

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};

use weir_sdk::{ack_fn, Acker, Input};
use weir_types::{Batch, Error, Part};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileCodec {
    #[default]
    Lines,
    #[serde(rename = "lines/multipart")]
    LinesMultipart,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileInputConfig {
    pub paths: Vec<PathBuf>,
    #[serde(default)]
    pub codec: FileCodec,
}

pub struct FileInput {
    paths: std::vec::IntoIter<PathBuf>,
    codec: FileCodec,
    current: Option<Lines<BufReader<File>>>,
    current_path: Option<PathBuf>,
}

impl FileInput {
    /// Build from config.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when no paths are given.
    pub fn new(conf: &FileInputConfig) -> Result<Self, Error> {
        if conf.paths.is_empty() {
            return Err(Error::Config("file input needs at least one path".into()));
        }
        Ok(Self {
            paths: conf.paths.clone().into_iter(),
            codec: conf.codec,
            current: None,
            current_path: None,
        })
    }

    /// Advance to the next file. Returns `false` once all are consumed.
    async fn next_file(&mut self) -> Result<bool, Error> {
        let Some(path) = self.paths.next() else {
            return Ok(false);
        };
        let file = File::open(&path).await.map_err(|e| {
            Error::Connector(format!("open {}: {e}", path.display()))
        })?;
        tracing::debug!(path = %path.display(), "reading file");
        self.current = Some(BufReader::new(file).lines());
        self.current_path = Some(path);
        Ok(true)
    }

    async fn next_line(&mut self) -> Result<Option<String>, Error> {
        loop {
            if self.current.is_none() && !self.next_file().await? {
                return Ok(None);
            }
            let lines = self.current.as_mut().expect("current set above");
            match lines.next_line().await.map_err(|e| Error::io(&e))? {
                Some(line) => return Ok(Some(line)),
                None => {
                    self.current = None;
                    self.current_path = None;
                }
            }
        }
    }

    fn ack(&self) -> Acker {
        ack_fn(|res| async move {
            if let Err(err) = res {
                tracing::warn!("file read nacked, no redelivery possible: {err}");
            }
            Ok(())
        })
    }
}

#[async_trait]
impl Input for FileInput {
    async fn connect(&mut self) -> Result<(), Error> {
        Ok(())
    }

    async fn read_batch(&mut self) -> Result<(Batch, Acker), Error> {
        match self.codec {
            FileCodec::Lines => match self.next_line().await? {
                Some(line) => {
                    let batch: Batch = [Part::new(line)].into_iter().collect();
                    Ok((batch, self.ack()))
                }
                None => Err(Error::TypeClosed),
            },
            FileCodec::LinesMultipart => {
                let mut batch = Batch::new();
                loop {
                    match self.next_line().await? {
                        Some(line) if line.is_empty() => {
                            if !batch.is_empty() {
                                return Ok((batch, self.ack()));
                            }
                        }
                        Some(line) => batch.push(Part::new(line)),
                        None => {
                            if batch.is_empty() {
                                return Err(Error::TypeClosed);
                            }
                            return Ok((batch, self.ack()));
                        }
                    }
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), Error> {
        self.current = None;
        Ok(())
    }
}
