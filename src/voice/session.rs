//! Recording session lifecycle and the per-guild session registry
//!
//! One session per guild at most; sessions in different guilds are
//! independent. The registry is the single owner of every session, and all
//! state changes go through begin/ingest/finish.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serenity::model::id::{ChannelId, GuildId, UserId};
use songbird::events::context_data::VoiceTick;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::archive::store::sanitize_component;
use crate::config::Config;
use crate::voice::pipeline::{PipelineError, SpeakerPipelines};
use crate::voice::transcode::{TranscodeError, Transcoder};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Already recording in this server")]
    AlreadyRecording,
    #[error("No recording is active in this server")]
    NotRecording,
    #[error("Pipeline setup failed: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Result of finalizing and transcoding one speaker's recording.
#[derive(Debug)]
pub struct TrackOutcome {
    pub speaker: String,
    pub result: Result<PathBuf, TranscodeError>,
}

/// An active voice recording for one guild.
pub struct RecordingSession {
    pub guild_id: GuildId,
    pub voice_channel_id: ChannelId,
    /// Voice channel name, used for the recording directory and replies
    pub channel_label: String,
    pub started: DateTime<Utc>,
    /// Speaker ID to display name mapping
    user_names: DashMap<UserId, String>,
    /// RTP source to speaker mapping, fed by speaking-state updates
    ssrc_map: DashMap<u32, UserId>,
    pipelines: SpeakerPipelines,
}

impl RecordingSession {
    fn new(
        guild_id: GuildId,
        voice_channel_id: ChannelId,
        channel_label: String,
        dir: PathBuf,
        started: DateTime<Utc>,
        sample_rate: u32,
        channels: u16,
    ) -> Result<Self, SessionError> {
        let pipelines = SpeakerPipelines::new(dir, started, sample_rate, channels)?;

        Ok(Self {
            guild_id,
            voice_channel_id,
            channel_label,
            started,
            user_names: DashMap::new(),
            ssrc_map: DashMap::new(),
            pipelines,
        })
    }

    /// Register a speaker's display name.
    pub fn register_speaker(&self, user_id: UserId, name: String) {
        self.user_names.insert(user_id, name);
    }

    /// Display name for a speaker, falling back to the raw ID for speakers
    /// who were never resolved (e.g. joined and left mid-session).
    pub fn speaker_name(&self, user_id: UserId) -> String {
        self.user_names
            .get(&user_id)
            .map(|r| r.value().clone())
            .unwrap_or_else(|| format!("User_{}", user_id))
    }

    /// Record which speaker an RTP source belongs to.
    pub fn map_ssrc(&self, ssrc: u32, user_id: UserId) {
        if self.ssrc_map.insert(ssrc, user_id).is_none() {
            debug!("[{}] SSRC {} is {}", self.guild_id, ssrc, user_id);
        }
    }

    /// Feed one voice tick of decoded audio into the speaker pipelines.
    pub fn ingest_tick(&self, tick: &VoiceTick) {
        for (ssrc, data) in &tick.speaking {
            let Some(user_id) = self.ssrc_map.get(ssrc).map(|r| *r.value()) else {
                debug!("[{}] Audio for unmapped SSRC {}", self.guild_id, ssrc);
                continue;
            };

            // Present under full decode mode; packets we could not decode
            // simply carry no PCM.
            let Some(pcm) = data.decoded_voice.as_deref() else {
                continue;
            };
            if pcm.is_empty() {
                continue;
            }

            let speaker = self.speaker_name(user_id);
            self.pipelines.write_pcm(user_id, &speaker, pcm);
        }
    }

    pub fn speaker_count(&self) -> usize {
        self.pipelines.speaker_count()
    }
}

/// Registry of recording sessions, keyed by guild.
pub struct SessionManager {
    sessions: DashMap<GuildId, Arc<RecordingSession>>,
    config: Arc<Config>,
    transcoder: Transcoder,
}

impl SessionManager {
    pub fn new(config: Arc<Config>) -> Self {
        let transcoder = Transcoder::new(&config);
        Self {
            sessions: DashMap::new(),
            config,
            transcoder,
        }
    }

    pub fn is_recording(&self, guild_id: GuildId) -> bool {
        self.sessions.contains_key(&guild_id)
    }

    /// Begin a session for a guild. Rejects deterministically if one is
    /// already active for that guild; other guilds are unaffected.
    pub fn begin(
        &self,
        guild_id: GuildId,
        voice_channel_id: ChannelId,
        channel_label: &str,
    ) -> Result<Arc<RecordingSession>, SessionError> {
        match self.sessions.entry(guild_id) {
            Entry::Occupied(_) => Err(SessionError::AlreadyRecording),
            Entry::Vacant(slot) => {
                let started = Utc::now();
                let dir = self.config.archive_dir.join(sanitize_component(channel_label));
                let session = Arc::new(RecordingSession::new(
                    guild_id,
                    voice_channel_id,
                    channel_label.to_string(),
                    dir,
                    started,
                    self.config.sample_rate,
                    self.config.channels,
                )?);
                slot.insert(session.clone());
                info!(
                    "[{}] Recording session started in {} ({})",
                    guild_id, channel_label, session.voice_channel_id
                );
                Ok(session)
            }
        }
    }

    /// Drop a session without finalizing anything. Used when the voice
    /// connection could not be established after the slot was reserved.
    pub fn abort(&self, guild_id: GuildId) {
        self.sessions.remove(&guild_id);
    }

    /// Finish a guild's session: finalize every speaker pipeline, transcode
    /// each track, and report per-speaker outcomes.
    ///
    /// Transcoding is awaited, not fire-and-forget: when this returns, all
    /// finalization work is done. A transcode failure leaves that speaker's
    /// WAV in place and never affects the other tracks. Finishing while no
    /// session is active touches no files.
    pub async fn finish(&self, guild_id: GuildId) -> Result<Vec<TrackOutcome>, SessionError> {
        let (_, session) = self
            .sessions
            .remove(&guild_id)
            .ok_or(SessionError::NotRecording)?;

        let speakers = session.speaker_count();
        let tracks = session.pipelines.finalize_all();
        let elapsed = Utc::now().signed_duration_since(session.started);
        info!(
            "[{}] Stopped recording {} after {}s; {} of {} speakers finalized",
            guild_id,
            session.channel_label,
            elapsed.num_seconds(),
            tracks.len(),
            speakers
        );

        let mut outcomes = Vec::with_capacity(tracks.len());
        for track in tracks {
            let result = self.transcoder.to_mp3(&track.wav_path).await;
            outcomes.push(TrackOutcome {
                speaker: track.speaker,
                result,
            });
        }

        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_config(archive_dir: &std::path::Path) -> Arc<Config> {
        Arc::new(Config {
            discord_token: String::new(),
            guild_id: None,
            archive_dir: archive_dir.to_path_buf(),
            ffmpeg_path: "/nonexistent/ffmpeg-binary".into(),
            sample_rate: 48000,
            channels: 2,
            mp3_bitrate_kbps: 128,
        })
    }

    #[test]
    fn second_start_in_same_guild_is_rejected() {
        let dir = tempdir().unwrap();
        let manager = SessionManager::new(test_config(dir.path()));
        let guild = GuildId::new(1);

        manager.begin(guild, ChannelId::new(10), "voice").unwrap();
        let second = manager.begin(guild, ChannelId::new(10), "voice");
        assert!(matches!(second, Err(SessionError::AlreadyRecording)));
    }

    #[test]
    fn guilds_record_independently() {
        let dir = tempdir().unwrap();
        let manager = SessionManager::new(test_config(dir.path()));

        manager.begin(GuildId::new(1), ChannelId::new(10), "voice-a").unwrap();
        manager.begin(GuildId::new(2), ChannelId::new(20), "voice-b").unwrap();
        assert!(manager.is_recording(GuildId::new(1)));
        assert!(manager.is_recording(GuildId::new(2)));
    }

    #[tokio::test]
    async fn finish_while_idle_is_a_no_op() {
        let dir = tempdir().unwrap();
        let manager = SessionManager::new(test_config(dir.path()));

        let result = manager.finish(GuildId::new(1)).await;
        assert!(matches!(result, Err(SessionError::NotRecording)));
        // No session ever existed, so nothing may appear on disk.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn finish_with_no_speech_reports_nothing() {
        let dir = tempdir().unwrap();
        let manager = SessionManager::new(test_config(dir.path()));
        let guild = GuildId::new(1);

        manager.begin(guild, ChannelId::new(10), "voice").unwrap();
        let outcomes = manager.finish(guild).await.unwrap();
        assert!(outcomes.is_empty());
        assert!(!manager.is_recording(guild));
    }

    #[tokio::test]
    async fn failed_transcode_reports_and_keeps_wav() {
        let dir = tempdir().unwrap();
        let manager = SessionManager::new(test_config(dir.path()));
        let guild = GuildId::new(1);

        let session = manager.begin(guild, ChannelId::new(10), "voice").unwrap();
        session.register_speaker(UserId::new(7), "alice".to_string());
        session.map_ssrc(42, UserId::new(7));
        let wav_path = session.pipelines.wav_path("alice");
        session.pipelines.write_pcm(UserId::new(7), "alice", &[1i16; 1920]);

        let outcomes = manager.finish(guild).await.unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].speaker, "alice");
        assert!(outcomes[0].result.is_err());
        assert!(wav_path.exists());
    }

    #[test]
    fn unknown_speaker_falls_back_to_raw_id() {
        let dir = tempdir().unwrap();
        let manager = SessionManager::new(test_config(dir.path()));
        let session = manager.begin(GuildId::new(1), ChannelId::new(10), "voice").unwrap();

        session.register_speaker(UserId::new(7), "alice".to_string());
        assert_eq!(session.speaker_name(UserId::new(7)), "alice");
        assert_eq!(session.speaker_name(UserId::new(8)), "User_8");
    }

    #[test]
    fn restart_after_finish_is_allowed() {
        let dir = tempdir().unwrap();
        let manager = SessionManager::new(test_config(dir.path()));
        let guild = GuildId::new(1);

        manager.begin(guild, ChannelId::new(10), "voice").unwrap();
        manager.abort(guild);
        assert!(manager.begin(guild, ChannelId::new(10), "voice").is_ok());
    }
}
