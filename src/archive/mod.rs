//! Message archival: paginated history fetch, line formatting, and
//! per-channel serialized archive files

pub mod history;
pub mod store;

pub use history::{archive_channel, format_message, ArchivedMessage, SerenityHistory};
pub use store::ArchiveStore;
