//! External MP3 transcoding via ffmpeg
//!
//! Finalized WAV recordings are handed to an ffmpeg subprocess. The WAV is
//! deleted only after a successful transcode; on failure it stays on disk
//! for manual recovery.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use thiserror::Error;
use tokio::process::Command;
use tracing::{info, warn};

use crate::config::Config;

#[derive(Error, Debug)]
pub enum TranscodeError {
    #[error("Failed to launch ffmpeg: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("ffmpeg exited with {status}: {stderr}")]
    Failed { status: ExitStatus, stderr: String },
}

/// Fixed-target MP3 transcoder.
#[derive(Debug, Clone)]
pub struct Transcoder {
    ffmpeg: PathBuf,
    channels: u16,
    sample_rate: u32,
    bitrate_kbps: u32,
}

impl Transcoder {
    pub fn new(config: &Config) -> Self {
        Self {
            ffmpeg: config.ffmpeg_path.clone(),
            channels: config.channels,
            sample_rate: config.sample_rate,
            bitrate_kbps: config.mp3_bitrate_kbps,
        }
    }

    fn args(&self, input: &Path, output: &Path) -> Vec<OsString> {
        vec![
            "-y".into(),
            "-loglevel".into(),
            "error".into(),
            "-i".into(),
            input.into(),
            "-ac".into(),
            self.channels.to_string().into(),
            "-ar".into(),
            self.sample_rate.to_string().into(),
            "-b:a".into(),
            format!("{}k", self.bitrate_kbps).into(),
            output.into(),
        ]
    }

    /// Transcode `input` to an MP3 next to it, deleting `input` on success.
    ///
    /// The delete is best-effort: a failure to remove the WAV is logged and
    /// the transcode still counts as successful.
    pub async fn to_mp3(&self, input: &Path) -> Result<PathBuf, TranscodeError> {
        let output = input.with_extension("mp3");

        let result = Command::new(&self.ffmpeg)
            .args(self.args(input, &output))
            .output()
            .await?;

        if !result.status.success() {
            return Err(TranscodeError::Failed {
                status: result.status,
                stderr: String::from_utf8_lossy(&result.stderr).into_owned(),
            });
        }

        info!("Transcoded {:?} to {:?}", input, output);
        if let Err(e) = tokio::fs::remove_file(input).await {
            warn!("Failed to remove intermediate file {:?}: {}", input, e);
        }

        Ok(output)
    }
}
