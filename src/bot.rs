//! Discord Bot event handler and voice receive handler

use crate::archive::{format_message, ArchiveStore, ArchivedMessage};
use crate::commands;
use crate::config::Config;
use crate::voice::{RecordingSession, SessionManager};
use serenity::all::{
    Client, Context, EventHandler, GatewayIntents, GuildId, Interaction, Message, Ready, UserId,
};
use serenity::async_trait;
use songbird::driver::DecodeMode;
use songbird::events::{Event, EventContext, EventHandler as VoiceEventHandler};
use songbird::model::payload::Speaking;
use songbird::SerenityInit;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Bot state shared across handlers
pub struct BotState {
    pub config: Arc<Config>,
    pub store: Arc<ArchiveStore>,
    pub session_manager: Arc<SessionManager>,
}

/// Main event handler for the bot
pub struct Handler {
    pub state: Arc<BotState>,
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("Logged in as {}", ready.user.name);

        // Register commands
        let commands = vec![
            commands::help::register(),
            commands::archive::register(),
            commands::record::register(),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>();

        // If guild ID is set, register to specific guild (faster for dev)
        if let Some(guild_id) = self.state.config.guild_id {
            let guild = GuildId::new(guild_id);
            match guild.set_commands(&ctx.http, commands).await {
                Ok(cmds) => info!("Registered {} guild commands", cmds.len()),
                Err(e) => error!("Failed to register guild commands: {}", e),
            }
        } else {
            // Register globally
            match serenity::all::Command::set_global_commands(&ctx.http, commands).await {
                Ok(cmds) => info!("Registered {} global commands", cmds.len()),
                Err(e) => error!("Failed to register global commands: {}", e),
            }
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command) = interaction {
            let result = match command.data.name.as_str() {
                "help" => commands::help::handle(&ctx, &command).await,
                "fetch" => {
                    commands::archive::handle_fetch(&ctx, &command, self.state.store.clone()).await
                }
                "fetchall" => {
                    commands::archive::handle_fetchall(&ctx, &command, self.state.store.clone())
                        .await
                }
                "record" => {
                    commands::record::handle_record(
                        &ctx,
                        &command,
                        self.state.session_manager.clone(),
                    )
                    .await
                }
                "stoprecord" => {
                    commands::record::handle_stop(
                        &ctx,
                        &command,
                        self.state.session_manager.clone(),
                    )
                    .await
                }
                _ => Ok(()),
            };

            if let Err(e) = result {
                error!("Command error: {}", e);
            }
        }
    }

    /// Live-append hook: every new human message lands in its channel's
    /// archive as soon as it arrives.
    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }

        let channel_name = msg
            .channel_id
            .name(&ctx.http)
            .await
            .unwrap_or_else(|_| msg.channel_id.to_string());

        let line = format_message(&ArchivedMessage::from(&msg));
        if let Err(e) = self.state.store.append_line(&channel_name, &line).await {
            warn!("Failed to append message to #{}: {}", channel_name, e);
        }
    }
}

/// Voice receive event handler, one per recording session
pub struct VoiceReceiver {
    pub session: Arc<RecordingSession>,
}

#[async_trait]
impl VoiceEventHandler for VoiceReceiver {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        match ctx {
            EventContext::SpeakingStateUpdate(Speaking { ssrc, user_id, .. }) => {
                if let Some(user) = user_id {
                    self.session.map_ssrc(*ssrc, UserId::new(user.0));
                }
            }
            EventContext::VoiceTick(tick) => {
                self.session.ingest_tick(tick);
            }
            _ => {}
        }

        None
    }
}

/// Create and run the Discord bot
pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = Arc::new(config);

    let store = Arc::new(ArchiveStore::new(&config.archive_dir));
    let session_manager = Arc::new(SessionManager::new(config.clone()));

    // Create bot state
    let state = Arc::new(BotState {
        config: config.clone(),
        store,
        session_manager,
    });

    // Create handler
    let handler = Handler {
        state: state.clone(),
    };

    // Create client with voice support
    let intents = GatewayIntents::non_privileged()
        | GatewayIntents::MESSAGE_CONTENT
        | GatewayIntents::GUILD_VOICE_STATES;

    // Voice receive needs full Opus decode: 48kHz stereo, 960-sample frames.
    let songbird_config = songbird::Config::default().decode_mode(DecodeMode::Decode);

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_from_config(songbird_config)
        .await?;

    // Store state in client data
    {
        let mut data = client.data.write().await;
        data.insert::<BotStateKey>(state);
    }

    // Start the client
    info!("Starting bot...");
    client.start().await?;

    Ok(())
}

/// Type key for storing BotState in client data
pub struct BotStateKey;

impl serenity::prelude::TypeMapKey for BotStateKey {
    type Value = Arc<BotState>;
}
