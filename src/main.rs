use anyhow::Result;
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

mod audio;
mod bot;
mod config;
mod error;
mod sources;
mod storage;

use crate::audio::{player::PlaybackEngine, session::VoiceRegistry, transport::SongbirdTransport};
use crate::bot::{announce, handlers::Dispatcher, TrevorBot};
use crate::config::Config;
use crate::sources::{youtube::YtDlpSearch, Resolver};
use crate::storage::{CatViewRecord, CounterStore, JsonFileBackend, LatenessRecord};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("trevorbot=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🤖 Starting TrevorBot v{}", env!("CARGO_PKG_VERSION"));

    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check().await;
    }

    let config = Config::load()?;
    info!("⚙️ {}", config.summary());

    let counters = Arc::new(CounterStore::new(
        JsonFileBackend::new(config.data_dir.clone()).await?,
    ));

    info!(
        "📊 Counters loaded: {} cat viewers, {} lateness subjects",
        counters.load::<CatViewRecord>().await.len(),
        counters.load::<LatenessRecord>().await.len()
    );

    let songbird = Songbird::serenity();
    let registry = Arc::new(VoiceRegistry::new(Arc::new(SongbirdTransport::new(
        songbird.clone(),
    ))));
    let resolver = Resolver::new(Arc::new(YtDlpSearch::new()));
    let engine = Arc::new(PlaybackEngine::new(
        registry.clone(),
        resolver,
        config.voice_ready_timeout,
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        counters,
        registry.clone(),
        engine,
        config.cat_images.clone(),
    ));

    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::GUILD_VOICE_STATES
        | GatewayIntents::MESSAGE_CONTENT
        | GatewayIntents::GUILD_MEMBERS;

    let status_channel = config.status_channel.clone();
    let handler = TrevorBot::new(config.clone(), dispatcher, registry);

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_with(songbird)
        .await?;

    let cache = client.cache.clone();
    let http = client.http.clone();
    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        announce::broadcast(&cache, &http, &status_channel, announce::OFFLINE).await;
        shard_manager.shutdown_all().await;
    });

    info!("🚀 Bot started");
    if let Err(why) = client.start().await {
        error!("Client error: {:?}", why);
    }

    Ok(())
}

/// Resolves on Ctrl+C or, on unix, SIGTERM (pm2 / container stop).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Could not listen for Ctrl+C: {:?}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Could not listen for SIGTERM: {:?}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("⚠️ Received Ctrl+C, closing..."),
        _ = terminate => info!("⚠️ Received terminate signal, closing..."),
    }
}

async fn health_check() -> Result<()> {
    let yt_dlp = YtDlpSearch::verify().await?;

    let ffmpeg = async_process::Command::new("ffmpeg")
        .arg("-version")
        .output()
        .await?;

    if ffmpeg.status.success() {
        println!("OK (yt-dlp {})", yt_dlp);
        Ok(())
    } else {
        anyhow::bail!("ffmpeg is missing");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[cfg(unix)]
    #[tokio::test]
    async fn sigterm_triggers_shutdown() {
        // Keep SIGTERM from killing the test binary whatever the timing.
        let _guard = signal::unix::signal(signal::unix::SignalKind::terminate()).unwrap();

        let shutdown = tokio::spawn(shutdown_signal());
        tokio::time::sleep(Duration::from_millis(50)).await;

        let status = std::process::Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        tokio::time::timeout(Duration::from_secs(5), shutdown)
            .await
            .expect("shutdown did not fire on SIGTERM")
            .unwrap();
    }
}
