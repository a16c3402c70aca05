use std::sync::{Arc, LazyLock};
use std::time::Duration;

use dashmap::DashMap;
use poise::serenity_prelude::*;
use regex::Regex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::db::{Schedule, Schedules};
use super::{Context, Result, send_reply};
use crate::handlers::{App, Reply};

#[poise::command(slash_command, prefix_command, aliases("."))]
/// A random illustration. Comma separated tags, `|` for alternatives.
pub async fn setu(
    c: Context<'_>,
    #[description = "tags"]
    #[rest]
    tags: Option<String>,
) -> Result<()> {
    let nsfw = c.guild_channel().await.is_some_and(|ch| ch.nsfw);
    info!(user = %c.author().name, nsfw, "setu");
    c.defer_or_broadcast().await?;
    let r = c.data().app.random_setu(nsfw, tags.as_deref().unwrap_or("")).await;
    send_reply(c, r).await
}

#[poise::command(slash_command, prefix_command, aliases("d"))]
/// Delete my last message here
pub async fn skip(c: Context<'_>) -> Result<()> {
    let me = c.framework().bot_id;
    let recent = c
        .channel_id()
        .messages(c.serenity_context(), GetMessages::new().limit(20))
        .await?;
    if let Some(m) = recent.into_iter().find(|m| m.author.id == me) {
        m.delete(c.serenity_context()).await?;
    }
    if let poise::Context::Application(_) = c {
        c.send(poise::CreateReply::default().ephemeral(true).content("skipped"))
            .await?;
    }
    Ok(())
}

#[poise::command(
    slash_command,
    prefix_command,
    aliases("s"),
    guild_only,
    check = "owner_or_manager"
)]
/// Post a random illustration on a timer
pub async fn schedule(
    c: Context<'_>,
    #[description = "on or off"] enable: bool,
    #[description = "where to post, defaults to here"] channel: Option<GuildChannel>,
    #[description = "interval like 30m, 6h, 1d"] interval: Option<String>,
) -> Result<()> {
    let Some(guild) = c.guild_id() else {
        return Ok(());
    };
    let d = c.data();
    if !enable {
        d.scheduler.stop(guild.get())?;
        c.say("scheduled posts stopped.").await?;
        return Ok(());
    }
    let Some(every) = parse_interval(interval.as_deref().unwrap_or("1d")) else {
        c.say("bad interval, use something like `9s`, `9m`, `9h` or `9d`.")
            .await?;
        return Ok(());
    };
    let channel = channel.map_or(c.channel_id(), |ch| ch.id);
    d.scheduler.start(
        c.serenity_context().http.clone(),
        Arc::clone(&d.app),
        Schedule {
            guild: guild.get(),
            channel: channel.get(),
            every,
        },
    )?;
    c.say(format!(
        "posting in <#{channel}> every {}.",
        humantime::format_duration(every)
    ))
    .await?;
    Ok(())
}

async fn owner_or_manager(c: Context<'_>) -> Result<bool> {
    let owner = c.framework().options().owners.contains(&c.author().id);
    let perms = match c.author_member().await {
        // interactions carry resolved permissions, prefix messages do not
        Some(m) => m
            .permissions
            .or_else(|| c.guild().map(|g| g.member_permissions(&m))),
        None => None,
    };
    Ok(may_schedule(owner, perms))
}

fn may_schedule(owner: bool, perms: Option<Permissions>) -> bool {
    owner || perms.is_some_and(|p| p.manage_guild())
}

/// `<n><s|m|h|d>`, anything after the unit is ignored.
pub fn parse_interval(s: &str) -> Option<Duration> {
    static RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^([0-9]+)([smhdSMHD])").unwrap());
    let cap = RE.captures(s.trim())?;
    let n: u64 = cap[1].parse().ok()?;
    let unit = match cap[2].to_ascii_lowercase().as_str() {
        "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        _ => 24 * 60 * 60,
    };
    let secs = n.checked_mul(unit)?;
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Running timers, one per guild, mirrored into [`Schedules`].
pub struct Scheduler {
    db: Schedules,
    tasks: DashMap<u64, JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(db: Schedules) -> Self {
        Self {
            db,
            tasks: DashMap::new(),
        }
    }

    /// Replaces whatever the guild had running.
    pub fn start(&self, http: Arc<Http>, app: Arc<App>, s: Schedule) -> Result<()> {
        self.db.set(s)?;
        self.spawn(http, app, s);
        Ok(())
    }

    pub fn stop(&self, guild: u64) -> Result<()> {
        if let Some((_, t)) = self.tasks.remove(&guild) {
            t.abort();
        }
        self.db.remove(guild)?;
        info!(guild, "schedule cancelled");
        Ok(())
    }

    pub fn restore(&self, http: Arc<Http>, app: Arc<App>) -> Result<()> {
        for s in self.db.all()? {
            self.spawn(Arc::clone(&http), Arc::clone(&app), s);
        }
        Ok(())
    }

    fn spawn(&self, http: Arc<Http>, app: Arc<App>, s: Schedule) {
        info!(guild = s.guild, channel = s.channel, every = %humantime::format_duration(s.every), "schedule started");
        let task = tokio::spawn(async move {
            let channel = ChannelId::new(s.channel);
            let mut tick = tokio::time::interval(s.every);
            loop {
                tick.tick().await;
                if let Err(e) = post(&http, &app, channel).await {
                    warn!(channel = s.channel, error = %e, "scheduled post failed");
                }
            }
        });
        if let Some(old) = self.tasks.insert(s.guild, task) {
            old.abort();
        }
    }
}

async fn post(http: &Arc<Http>, app: &App, channel: ChannelId) -> Result<()> {
    let nsfw = http
        .get_channel(channel)
        .await?
        .guild()
        .is_some_and(|ch| ch.nsfw);
    // only pictures, a failure message every interval is noise
    if let Reply::Image { filename, bytes, .. } = app.random_setu(nsfw, "").await {
        channel
            .send_message(http.as_ref(), CreateMessage::new().add_file(CreateAttachment::bytes(bytes, filename)))
            .await?;
    }
    Ok(())
}
