//! Voice session recording: per-guild sessions, per-speaker capture
//! pipelines, and external MP3 transcoding

pub mod pipeline;
pub mod session;
pub mod transcode;

pub use session::{RecordingSession, SessionManager};
