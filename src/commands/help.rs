//! Help command: /help

use serenity::all::{
    CommandInteraction, Context, CreateCommand, CreateInteractionResponse,
    CreateInteractionResponseMessage,
};

const HELP_TEXT: &str = "\
**ScribeBot commands**
`/help` - Displays this help message
`/fetch` - Fetches all messages from the channel and saves them to a file
`/fetchall` - Fetches every text channel in the server
`/record` - Starts recording your current voice channel
`/stoprecord` - Stops recording and converts each speaker's audio to MP3";

/// Register the help command
pub fn register() -> Vec<CreateCommand> {
    vec![CreateCommand::new("help").description("Displays this help message")]
}

/// Handle /help
pub async fn handle(
    ctx: &Context,
    command: &CommandInteraction,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .content(HELP_TEXT)
                    .ephemeral(true),
            ),
        )
        .await?;
    Ok(())
}
