//! Recording commands: /record, /stoprecord

use serenity::all::{
    CommandInteraction, Context, CreateCommand, CreateInteractionResponse,
    CreateInteractionResponseMessage, EditInteractionResponse, UserId,
};
use songbird::CoreEvent;
use std::sync::Arc;
use tracing::info;

use crate::bot::VoiceReceiver;
use crate::voice::session::SessionError;
use crate::voice::SessionManager;

/// Register recording commands
pub fn register() -> Vec<CreateCommand> {
    vec![
        CreateCommand::new("record")
            .description("Starts recording your current voice channel"),
        CreateCommand::new("stoprecord")
            .description("Stops recording and converts each speaker's audio to MP3"),
    ]
}

/// Handle /record
pub async fn handle_record(
    ctx: &Context,
    command: &CommandInteraction,
    session_manager: Arc<SessionManager>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let guild_id = command.guild_id.ok_or("Must be used in a guild")?;

    // Resolve the caller's voice channel and the members already in it
    // from the cache. Cache refs cannot be held across awaits, so the ref
    // is confined to this block and fully dropped before any await below.
    let resolved: Option<(serenity::all::ChannelId, Vec<(UserId, String)>)> = {
        let guild = ctx.cache.guild(guild_id).ok_or("Guild not in cache")?;
        match guild
            .voice_states
            .get(&command.user.id)
            .and_then(|vs| vs.channel_id)
        {
            Some(channel_id) => {
                let members: Vec<(UserId, String)> = guild
                    .voice_states
                    .iter()
                    .filter(|(_, vs)| vs.channel_id == Some(channel_id))
                    .filter_map(|(user_id, _)| {
                        guild
                            .members
                            .get(user_id)
                            .map(|m| (*user_id, m.display_name().to_string()))
                    })
                    .collect();

                Some((channel_id, members))
            }
            None => None,
        }
    };

    let Some((voice_channel_id, members)) = resolved else {
        respond(ctx, command, "Join a voice channel first, then run /record.").await?;
        return Ok(());
    };

    if session_manager.is_recording(guild_id) {
        respond(ctx, command, "Already recording in this server.").await?;
        return Ok(());
    }

    command.defer(&ctx.http).await?;

    let channel_label = ctx
        .cache
        .channel(voice_channel_id)
        .map(|c| c.name.clone())
        .unwrap_or_else(|| voice_channel_id.to_string());

    // Reserve the session slot before joining so a concurrent /record
    // cannot create a second unmanaged connection.
    let session = match session_manager.begin(guild_id, voice_channel_id, &channel_label) {
        Ok(session) => session,
        Err(SessionError::AlreadyRecording) => {
            let response = EditInteractionResponse::new().content("Already recording in this server.");
            command.edit_response(&ctx.http, response).await?;
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    for (user_id, name) in members {
        session.register_speaker(user_id, name);
    }

    let manager = songbird::get(ctx).await.ok_or("Songbird not registered")?;
    match manager.join(guild_id, voice_channel_id).await {
        Ok(call) => {
            let mut handler = call.lock().await;
            handler.add_global_event(
                CoreEvent::SpeakingStateUpdate.into(),
                VoiceReceiver {
                    session: session.clone(),
                },
            );
            handler.add_global_event(
                CoreEvent::VoiceTick.into(),
                VoiceReceiver {
                    session: session.clone(),
                },
            );
        }
        Err(e) => {
            session_manager.abort(guild_id);
            let response = EditInteractionResponse::new()
                .content(format!("Failed to join voice channel: {}", e));
            command.edit_response(&ctx.http, response).await?;
            return Ok(());
        }
    }

    let response = EditInteractionResponse::new().content(format!(
        "🔴 Recording {}. Each speaker is captured to their own file; run /stoprecord to finish.",
        channel_label
    ));
    command.edit_response(&ctx.http, response).await?;

    info!("Started recording in guild {} channel {}", guild_id, voice_channel_id);
    Ok(())
}

/// Handle /stoprecord
pub async fn handle_stop(
    ctx: &Context,
    command: &CommandInteraction,
    session_manager: Arc<SessionManager>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let guild_id = command.guild_id.ok_or("Must be used in a guild")?;

    if !session_manager.is_recording(guild_id) {
        respond(ctx, command, "No recording is active in this server.").await?;
        return Ok(());
    }

    // Transcoding can take a while; defer before finalizing.
    command.defer(&ctx.http).await?;

    // Leave first so no more audio ticks arrive while pipelines finalize.
    let manager = songbird::get(ctx).await.ok_or("Songbird not registered")?;
    let _ = manager.remove(guild_id).await;

    let content = match session_manager.finish(guild_id).await {
        Ok(outcomes) if outcomes.is_empty() => {
            "⏹️ Recording stopped. Nobody spoke, so no files were produced.".to_string()
        }
        Ok(outcomes) => {
            let mut lines = vec!["⏹️ Recording stopped.".to_string()];
            for outcome in outcomes {
                match outcome.result {
                    Ok(mp3) => lines.push(format!("✅ {} - `{}`", outcome.speaker, mp3.display())),
                    Err(e) => lines.push(format!("⚠️ {} - transcode failed: {}", outcome.speaker, e)),
                }
            }
            lines.join("\n")
        }
        Err(SessionError::NotRecording) => "No recording is active in this server.".to_string(),
        Err(e) => format!("Failed to stop recording: {}", e),
    };

    command
        .edit_response(&ctx.http, EditInteractionResponse::new().content(content))
        .await?;

    info!("Stopped recording in guild {}", guild_id);
    Ok(())
}

/// Helper to send a response
async fn respond(
    ctx: &Context,
    command: &CommandInteraction,
    content: &str,
) -> Result<(), serenity::Error> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new().content(content),
            ),
        )
        .await
}
