//! Configuration management for ScribeBot
//!
//! Loads settings from environment variables (.env file)

use std::env;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Discord bot token
    pub discord_token: String,
    /// Optional guild ID for development (faster command sync)
    pub guild_id: Option<u64>,
    /// Root directory for channel archives and recordings
    pub archive_dir: PathBuf,
    /// Path to the ffmpeg binary used for transcoding
    pub ffmpeg_path: PathBuf,
    /// Audio sample rate (Discord uses 48kHz)
    pub sample_rate: u32,
    /// Audio channels (Discord uses stereo)
    pub channels: u16,
    /// MP3 bitrate in kbps for transcoded recordings
    pub mp3_bitrate_kbps: u32,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let discord_token = env::var("DISCORD_TOKEN")
            .map_err(|_| ConfigError::MissingEnvVar("DISCORD_TOKEN".to_string()))?;

        let guild_id = env::var("GUILD_ID")
            .ok()
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<u64>()
                    .map_err(|_| ConfigError::InvalidValue("GUILD_ID".to_string(), s))
            })
            .transpose()?;

        let archive_dir = env::var("ARCHIVE_DIR")
            .unwrap_or_else(|_| "channel_messages".to_string())
            .into();

        let ffmpeg_path = env::var("FFMPEG_PATH")
            .unwrap_or_else(|_| "ffmpeg".to_string())
            .into();

        Ok(Self {
            discord_token,
            guild_id,
            archive_dir,
            ffmpeg_path,
            sample_rate: 48000,
            channels: 2,
            mp3_bitrate_kbps: 128,
        })
    }
}
