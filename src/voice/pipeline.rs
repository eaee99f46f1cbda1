//! Per-speaker capture pipelines
//!
//! Each speaker gets one WAV file per session, created lazily on first
//! decoded audio and fed for the whole session, silence included. A failed
//! pipeline only loses its own speaker's audio.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use hound::{SampleFormat, WavSpec, WavWriter};
use parking_lot::Mutex;
use serenity::model::id::UserId;
use std::fs;
use std::io::BufWriter;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::archive::store::sanitize_component;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
}

/// A finalized speaker recording, ready for transcoding.
#[derive(Debug)]
pub struct FinalizedTrack {
    pub speaker: String,
    pub wav_path: PathBuf,
}

struct SpeakerPipeline {
    speaker: String,
    wav_path: PathBuf,
    writer: Option<WavWriter<BufWriter<fs::File>>>,
    failed: bool,
}

/// All speaker pipelines of one recording session.
///
/// Writes happen on the voice event path; each pipeline sits behind its own
/// lock so speakers never block each other.
pub struct SpeakerPipelines {
    dir: PathBuf,
    session_stamp: String,
    spec: WavSpec,
    pipelines: DashMap<UserId, Mutex<SpeakerPipeline>>,
}

impl SpeakerPipelines {
    /// Prepare the session's recording directory.
    pub fn new(
        dir: PathBuf,
        started: DateTime<Utc>,
        sample_rate: u32,
        channels: u16,
    ) -> Result<Self, PipelineError> {
        fs::create_dir_all(&dir)?;

        // Filesystem-safe render of the session start instant.
        let session_stamp = started.format("%Y-%m-%dT%H-%M-%S-%3fZ").to_string();

        Ok(Self {
            dir,
            session_stamp,
            spec: WavSpec {
                channels,
                sample_rate,
                bits_per_sample: 16,
                sample_format: SampleFormat::Int,
            },
            pipelines: DashMap::new(),
        })
    }

    /// Intermediate WAV path for a speaker in this session.
    pub fn wav_path(&self, speaker: &str) -> PathBuf {
        self.dir
            .join(format!("{}-{}.wav", sanitize_component(speaker), self.session_stamp))
    }

    /// Feed decoded PCM for one speaker, opening the pipeline on first audio.
    ///
    /// A write failure marks only this speaker's pipeline as failed; later
    /// audio for the speaker is dropped and sibling pipelines are untouched.
    pub fn write_pcm(&self, user_id: UserId, speaker: &str, pcm: &[i16]) {
        let entry = self
            .pipelines
            .entry(user_id)
            .or_insert_with(|| Mutex::new(self.open_pipeline(speaker)));

        let mut pipeline = entry.lock();
        if pipeline.failed {
            return;
        }
        if let Some(writer) = pipeline.writer.as_mut() {
            for &sample in pcm {
                if let Err(e) = writer.write_sample(sample) {
                    warn!(
                        "Audio write failed for {} ({:?}): {}",
                        pipeline.speaker, pipeline.wav_path, e
                    );
                    pipeline.failed = true;
                    if let Some(writer) = pipeline.writer.take() {
                        let _ = writer.finalize();
                    }
                    break;
                }
            }
        }
    }

    fn open_pipeline(&self, speaker: &str) -> SpeakerPipeline {
        let wav_path = self.wav_path(speaker);
        match WavWriter::create(&wav_path, self.spec) {
            Ok(writer) => {
                info!("Recording {} to {:?}", speaker, wav_path);
                SpeakerPipeline {
                    speaker: speaker.to_string(),
                    wav_path,
                    writer: Some(writer),
                    failed: false,
                }
            }
            Err(e) => {
                error!("Failed to open recording for {} ({:?}): {}", speaker, wav_path, e);
                SpeakerPipeline {
                    speaker: speaker.to_string(),
                    wav_path,
                    writer: None,
                    failed: true,
                }
            }
        }
    }

    /// Number of speakers seen so far, failed pipelines included.
    pub fn speaker_count(&self) -> usize {
        self.pipelines.len()
    }

    /// Close every open pipeline and return the finalized tracks.
    ///
    /// Failed pipelines are dropped with a log line; their partial files are
    /// left on disk.
    pub fn finalize_all(&self) -> Vec<FinalizedTrack> {
        let user_ids: Vec<UserId> = self.pipelines.iter().map(|e| *e.key()).collect();
        let mut tracks = Vec::new();

        for user_id in user_ids {
            if let Some((_, pipeline)) = self.pipelines.remove(&user_id) {
                let pipeline = pipeline.into_inner();
                if pipeline.failed {
                    warn!("Skipping failed pipeline for {}", pipeline.speaker);
                    continue;
                }
                let Some(writer) = pipeline.writer else {
                    continue;
                };
                match writer.finalize() {
                    Ok(()) => {
                        debug!("Finalized {:?}", pipeline.wav_path);
                        tracks.push(FinalizedTrack {
                            speaker: pipeline.speaker,
                            wav_path: pipeline.wav_path,
                        });
                    }
                    Err(e) => {
                        error!("Failed to finalize {:?}: {}", pipeline.wav_path, e);
                    }
                }
            }
        }

        tracks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::tempdir;

    fn pipelines(dir: &Path) -> SpeakerPipelines {
        let started = "2024-05-28T03:08:49.649Z".parse().unwrap();
        SpeakerPipelines::new(dir.to_path_buf(), started, 48000, 2).unwrap()
    }

    #[test]
    fn wav_path_uses_speaker_and_session_start() {
        let dir = tempdir().unwrap();
        let pipelines = pipelines(dir.path());
        let path = pipelines.wav_path("onsimius");
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "onsimius-2024-05-28T03-08-49-649Z.wav"
        );
    }

    #[test]
    fn one_continuous_file_per_speaker() {
        let dir = tempdir().unwrap();
        let pipelines = pipelines(dir.path());
        let alice = UserId::new(1);

        pipelines.write_pcm(alice, "alice", &[0i16; 1920]);
        pipelines.write_pcm(alice, "alice", &[100i16; 1920]);
        assert_eq!(pipelines.speaker_count(), 1);

        let tracks = pipelines.finalize_all();
        assert_eq!(tracks.len(), 1);

        let reader = hound::WavReader::open(&tracks[0].wav_path).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.spec().sample_rate, 48000);
        assert_eq!(reader.len(), 3840);
    }

    #[test]
    fn failed_pipeline_does_not_stop_siblings() {
        let dir = tempdir().unwrap();
        let pipelines = pipelines(dir.path());

        // Occupy bob's WAV path with a directory so his pipeline fails to open.
        fs::create_dir(pipelines.wav_path("bob")).unwrap();

        pipelines.write_pcm(UserId::new(1), "alice", &[7i16; 1920]);
        pipelines.write_pcm(UserId::new(2), "bob", &[9i16; 1920]);
        pipelines.write_pcm(UserId::new(1), "alice", &[7i16; 1920]);

        let tracks = pipelines.finalize_all();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].speaker, "alice");

        let reader = hound::WavReader::open(&tracks[0].wav_path).unwrap();
        assert_eq!(reader.len(), 3840);
    }

    #[test]
    fn finalize_with_no_speech_is_empty() {
        let dir = tempdir().unwrap();
        let pipelines = pipelines(dir.path());
        assert!(pipelines.finalize_all().is_empty());
    }
}
