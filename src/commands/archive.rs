//! Archive commands: /fetch, /fetchall

use serenity::all::{
    ChannelType, CommandInteraction, Context, CreateCommand, EditInteractionResponse,
};
use std::sync::Arc;
use tracing::{info, warn};

use crate::archive::{archive_channel, ArchiveStore, SerenityHistory};

/// Register archive commands
pub fn register() -> Vec<CreateCommand> {
    vec![
        CreateCommand::new("fetch")
            .description("Fetches all messages from the channel and saves them to a file"),
        CreateCommand::new("fetchall")
            .description("Fetches all messages from every text channel in the server"),
    ]
}

/// Handle /fetch
pub async fn handle_fetch(
    ctx: &Context,
    command: &CommandInteraction,
    store: Arc<ArchiveStore>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // History paging can easily outlive the 3 second interaction window.
    command.defer(&ctx.http).await?;

    let channel_id = command.channel_id;
    let channel_name = channel_id
        .name(&ctx.http)
        .await
        .unwrap_or_else(|_| channel_id.to_string());

    let source = SerenityHistory::new(ctx.http.clone());
    let content = match archive_channel(&source, &store, channel_id, &channel_name).await {
        Ok(count) => {
            info!("Archived {} messages from #{}", count, channel_name);
            format!(
                "Fetched and saved {} messages to `{}`",
                count,
                store.archive_path(&channel_name).display()
            )
        }
        Err(e) => {
            warn!("Failed to archive #{}: {}", channel_name, e);
            format!("Failed to archive #{}: {}", channel_name, e)
        }
    };

    command
        .edit_response(&ctx.http, EditInteractionResponse::new().content(content))
        .await?;
    Ok(())
}

/// Handle /fetchall
///
/// Archives every text channel in the guild sequentially. One channel
/// failing never aborts the batch; the reply carries a per-channel status.
pub async fn handle_fetchall(
    ctx: &Context,
    command: &CommandInteraction,
    store: Arc<ArchiveStore>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let guild_id = command.guild_id.ok_or("Must be used in a guild")?;

    command.defer(&ctx.http).await?;

    let channels = guild_id.channels(&ctx.http).await?;
    let mut text_channels: Vec<_> = channels
        .into_values()
        .filter(|c| matches!(c.kind, ChannelType::Text | ChannelType::News))
        .collect();
    text_channels.sort_by_key(|c| c.position);

    let source = SerenityHistory::new(ctx.http.clone());
    let mut report = Vec::with_capacity(text_channels.len());
    let mut failures = 0usize;

    for channel in &text_channels {
        match archive_channel(&source, &store, channel.id, &channel.name).await {
            Ok(count) => {
                report.push(format!("✅ #{} - {} messages", channel.name, count));
            }
            Err(e) => {
                warn!("Failed to archive #{}: {}", channel.name, e);
                failures += 1;
                report.push(format!("⚠️ #{} - {}", channel.name, e));
            }
        }
    }

    let mut content = format!(
        "Archived {}/{} channels\n{}",
        text_channels.len() - failures,
        text_channels.len(),
        report.join("\n")
    );
    // Discord rejects messages over 2000 characters.
    if content.len() > 1900 {
        let mut cut = 1900;
        while !content.is_char_boundary(cut) {
            cut -= 1;
        }
        content.truncate(cut);
        content.push_str("\n…");
    }

    command
        .edit_response(&ctx.http, EditInteractionResponse::new().content(content))
        .await?;
    Ok(())
}
