mod assets;
mod bot;
mod cache;
mod card;
mod config;
mod download;
mod error;
mod fetch;
mod genshin;
mod handlers;
mod logging;
mod resolve;
mod setu;

use tracing::info;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = config::Config::from_env();
    logging::init_tracing(&config.log);
    info!(?config, "starting");
    bot::Bot::spawn(config).await
}
