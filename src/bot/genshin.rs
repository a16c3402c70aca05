use std::sync::Arc;
use std::time::Duration;

use poise::serenity_prelude::*;
use tracing::{info, warn};

use super::{Context, Result, send_reply};
use crate::handlers::{App, Reply};

#[poise::command(slash_command, prefix_command, aliases("u"))]
/// Game stats card for an account
pub async fn user(
    c: Context<'_>,
    #[description = "account uid"] uid: u64,
) -> Result<()> {
    c.defer_or_broadcast().await?;
    let r = c.data().app.user_card(uid).await;
    send_reply(c, r).await
}

#[poise::command(slash_command, prefix_command, aliases("c"))]
/// One character of an account
pub async fn character(
    c: Context<'_>,
    #[description = "account uid"] uid: u64,
    #[description = "character name or alias"]
    #[rest]
    name: String,
) -> Result<()> {
    c.defer_or_broadcast().await?;
    let r = c.data().app.character_card(uid, &name).await;
    send_reply(c, r).await
}

#[poise::command(slash_command, prefix_command, aliases("n"), owners_only)]
/// Real-time notes of the configured accounts
pub async fn note(c: Context<'_>) -> Result<()> {
    c.defer_or_broadcast().await?;
    let r = c.data().app.notes().await;
    send_reply(c, r).await
}

/// Posts the notes to `channel` every `every`, first one right away.
pub fn spawn_note_timer(http: Arc<Http>, app: Arc<App>, channel: u64, every: Duration) {
    tokio::spawn(async move {
        let channel = ChannelId::new(channel);
        match http.get_channel(channel).await {
            Ok(Channel::Guild(ch)) if ch.kind == ChannelType::Text => {}
            Ok(_) => {
                warn!(%channel, "note channel is not a text channel, timer cancelled");
                return;
            }
            Err(e) => {
                warn!(%channel, error = %e, "note channel unreachable, timer cancelled");
                return;
            }
        }
        info!(%channel, every = %humantime::format_duration(every), "notes timer started");
        let mut tick = tokio::time::interval(every);
        loop {
            tick.tick().await;
            let Reply::Text(text) = app.notes().await else {
                continue;
            };
            if let Err(e) = channel.say(http.as_ref(), text).await {
                warn!(%channel, error = %e, "could not post notes");
            }
        }
    });
}
