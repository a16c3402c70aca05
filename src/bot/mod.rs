mod data;
mod db;
mod genshin;
mod setu;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use poise::serenity_prelude::*;
use poise::CreateReply;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::QUERY_FAILED;
use crate::handlers::{App, Reply};

pub struct Data {
    app: Arc<App>,
    scheduler: setu::Scheduler,
    usage: Option<PathBuf>,
}

type Context<'a> = poise::Context<'a, Data, anyhow::Error>;

/// Every command the bot answers to, registered once at startup.
pub static REGISTRY: [fn() -> poise::Command<Data, anyhow::Error>; 7] = [
    genshin::user,
    genshin::character,
    genshin::note,
    setu::setu,
    setu::skip,
    setu::schedule,
    help,
];

pub async fn send_reply(c: Context<'_>, r: Reply) -> Result<()> {
    match r {
        Reply::Text(t) => {
            c.say(t).await?;
        }
        Reply::Image {
            content,
            filename,
            bytes,
        } => {
            c.send(
                CreateReply::default()
                    .content(content)
                    .attachment(CreateAttachment::bytes(bytes, filename)),
            )
            .await?;
        }
    }
    Ok(())
}

pub struct Bot;
impl Bot {
    pub async fn spawn(config: Config) -> Result<()> {
        info!("bot startup");
        let app = Arc::new(App::from_config(&config)?);
        info!(characters = app.resolver.len(), "app ready");
        let scheduler = setu::Scheduler::new(db::Schedules::open(&config.schedule_db)?);
        let usage = config.usage_log.clone();
        let notes = config.note_channel.map(|ch| (ch, config.note_every));
        let f = poise::Framework::builder()
            .options(poise::FrameworkOptions {
                commands: REGISTRY.iter().map(|c| c()).collect(),
                pre_command: |c| {
                    Box::pin(async move {
                        if let Some(to) = &c.data().usage
                            && let Err(e) = data::log(&c, to)
                        {
                            warn!(error = %e, "usage log");
                        }
                    })
                },
                on_error: |e| Box::pin(on_error(e)),
                prefix_options: poise::PrefixFrameworkOptions {
                    edit_tracker: Some(Arc::new(poise::EditTracker::for_timespan(
                        std::time::Duration::from_secs(2 * 60),
                    ))),
                    prefix: Some(config.prefix.clone()),
                    ..Default::default()
                },
                ..Default::default()
            })
            .setup(move |ctx, ready, framework| {
                Box::pin(async move {
                    poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                    info!(user = %ready.user.name, "registered");
                    if let Err(e) = scheduler.restore(ctx.http.clone(), Arc::clone(&app)) {
                        error!(error = %e, "could not restore schedules");
                    }
                    if let Some((channel, every)) = notes {
                        genshin::spawn_note_timer(ctx.http.clone(), Arc::clone(&app), channel, every);
                    }
                    Ok(Data {
                        app,
                        scheduler,
                        usage,
                    })
                })
            })
            .build();
        ClientBuilder::new(
            &config.discord_token,
            GatewayIntents::non_privileged() | GatewayIntents::MESSAGE_CONTENT,
        )
        .framework(f)
        .await?
        .start()
        .await?;
        Ok(())
    }
}

async fn on_error(error: poise::FrameworkError<'_, Data, anyhow::Error>) {
    use poise::FrameworkError::Command;
    match error {
        Command { error, ctx, .. } => {
            let msg = error
                .chain()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(" from: ");
            error!(command = %ctx.command().name, "{msg}");
            if let Err(e) = ctx.say(QUERY_FAILED).await {
                warn!(error = %e, "could not report failure");
            }
        }
        err => {
            if let Err(e) = poise::builtins::on_error(err).await {
                warn!(error = %e, "error handler failed");
            }
        }
    }
}

#[poise::command(slash_command, prefix_command)]
pub async fn help(
    ctx: Context<'_>,
    #[description = "command to show help about"]
    #[autocomplete = "poise::builtins::autocomplete_command"]
    command: Option<String>,
) -> Result<()> {
    if let Some(command) = command {
        poise::builtins::help(ctx, Some(&command), Default::default()).await?;
        return Ok(());
    }
    ctx.send(
        CreateReply::default()
            .ephemeral(true)
            .content(include_str!("usage.md")),
    )
    .await?;
    Ok(())
}
