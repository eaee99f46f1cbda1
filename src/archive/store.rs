//! Per-channel archive files behind serialized writer tasks
//!
//! Every channel archive is owned by a single queued writer task, so a bulk
//! overwrite and a live append can never interleave destructively. Callers
//! enqueue a job and await its completion ack.

use dashmap::DashMap;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use crate::archive::history::ArchiveError;

/// Queue depth per channel writer.
const WRITER_QUEUE: usize = 64;

enum WriteJob {
    /// Replace the whole archive with `content`.
    Overwrite {
        content: String,
        ack: oneshot::Sender<std::io::Result<()>>,
    },
    /// Append one already-formatted line, creating the file if absent.
    Append {
        line: String,
        ack: oneshot::Sender<std::io::Result<()>>,
    },
}

/// Store of channel archives under one root directory.
pub struct ArchiveStore {
    root: PathBuf,
    writers: DashMap<String, mpsc::Sender<WriteJob>>,
}

impl ArchiveStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            writers: DashMap::new(),
        }
    }

    /// Path of the archive file for a channel.
    pub fn archive_path(&self, channel_name: &str) -> PathBuf {
        self.root.join(format!("{}.md", sanitize_component(channel_name)))
    }

    /// Overwrite the channel's archive with the full rendered content.
    pub async fn overwrite(&self, channel_name: &str, content: String) -> Result<(), ArchiveError> {
        let (ack, done) = oneshot::channel();
        self.submit(channel_name, WriteJob::Overwrite { content, ack }).await?;
        done.await.map_err(|_| ArchiveError::WriterClosed)??;
        Ok(())
    }

    /// Append one formatted message line to the channel's archive.
    pub async fn append_line(&self, channel_name: &str, line: &str) -> Result<(), ArchiveError> {
        let (ack, done) = oneshot::channel();
        let job = WriteJob::Append {
            line: line.to_string(),
            ack,
        };
        self.submit(channel_name, job).await?;
        done.await.map_err(|_| ArchiveError::WriterClosed)??;
        Ok(())
    }

    async fn submit(&self, channel_name: &str, job: WriteJob) -> Result<(), ArchiveError> {
        let sender = self
            .writers
            .entry(channel_name.to_string())
            .or_insert_with(|| spawn_writer(self.archive_path(channel_name)))
            .clone();
        sender.send(job).await.map_err(|_| ArchiveError::WriterClosed)
    }
}

/// Spawn the writer task owning one channel's archive file.
fn spawn_writer(path: PathBuf) -> mpsc::Sender<WriteJob> {
    let (tx, mut rx) = mpsc::channel(WRITER_QUEUE);

    tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            match job {
                WriteJob::Overwrite { content, ack } => {
                    let result = tokio::fs::write(&path, content).await;
                    if let Err(e) = &result {
                        error!("Failed to overwrite archive {:?}: {}", path, e);
                    } else {
                        debug!("Rewrote archive {:?}", path);
                    }
                    let _ = ack.send(result);
                }
                WriteJob::Append { line, ack } => {
                    let result = append_to(&path, &line).await;
                    if let Err(e) = &result {
                        error!("Failed to append to archive {:?}: {}", path, e);
                    }
                    let _ = ack.send(result);
                }
            }
        }
    });

    tx
}

async fn append_to(path: &Path, line: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    file.write_all(b"\n").await?;
    file.flush().await
}

/// Make a channel or speaker name safe as a single path component.
pub fn sanitize_component(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}
