use std::io::Write;
use std::path::Path;

use anyhow::Result;
use serde_json::{Value, json};

use crate::bot::Context;

/// One JSON line per command invocation.
pub fn log(c: &Context<'_>, to: &Path) -> Result<()> {
    let v = json! {{
        "locale": c.author().locale.as_deref().unwrap_or("unknown"),
        "name": c.author().name.clone(),
        "id": c.author().id,
        "cname": &*c.command().name,
        "guild": c.guild_id().map_or(0, |x| x.get()),
        "channel": c.channel_id()
    }};
    push_j(to, &v)
}

pub fn push_j(to: &Path, j: &Value) -> Result<()> {
    let mut f = std::fs::File::options().create(true).append(true).open(to)?;
    writeln!(f, "{}", serde_json::to_string(j)?)?;
    Ok(())
}
