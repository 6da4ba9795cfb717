use anyhow::Result;
use async_trait::async_trait;
use rand::seq::SliceRandom;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::{
    audio::{
        player::{PlaybackEngine, ReplySink},
        session::VoiceRegistry,
    },
    bot::commands::{self, Command, HELP_TEXT},
    error::{BotError, BotResult},
    storage::{CatViewRecord, CounterStore, LatenessRecord},
};

const PLAY_NO_CHANNEL: &str = "You must be in a voice channel!";

/// An inbound text message, reduced to what command handling needs.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub author_id: UserId,
    pub author_name: String,
    /// Sent by a bot account, including this one.
    pub is_bot: bool,
    pub content: String,
    pub guild_id: Option<GuildId>,
    /// The author's current voice channel and its display name.
    pub voice_channel: Option<(ChannelId, String)>,
}

/// What a handler can do in response to an event.
#[async_trait]
pub trait EventChannel: Send + Sync {
    /// Replies to the triggering message.
    async fn reply(&self, text: &str) -> Result<()>;

    /// Posts into the channel the message came from.
    async fn send(&self, text: &str) -> Result<()>;

    async fn send_image(&self, url: &str) -> Result<()>;

    async fn direct_message(&self, user_id: UserId, text: &str) -> Result<()>;
}

/// Playback notifications posted into the command's channel.
struct ChannelSink(Arc<dyn EventChannel>);

#[async_trait]
impl ReplySink for ChannelSink {
    async fn notify(&self, text: String) {
        if let Err(e) = self.0.send(&text).await {
            warn!("Could not deliver playback message: {:?}", e);
        }
    }

    async fn answer(&self, text: String) {
        if let Err(e) = self.0.reply(&text).await {
            warn!("Could not deliver playback reply: {:?}", e);
        }
    }
}

/// Routes inbound messages to command handlers. Holds no per-event state.
pub struct Dispatcher {
    counters: Arc<CounterStore>,
    registry: Arc<VoiceRegistry>,
    engine: Arc<PlaybackEngine>,
    cat_images: Vec<String>,
}

impl Dispatcher {
    pub fn new(
        counters: Arc<CounterStore>,
        registry: Arc<VoiceRegistry>,
        engine: Arc<PlaybackEngine>,
        cat_images: Vec<String>,
    ) -> Self {
        Self {
            counters,
            registry,
            engine,
            cat_images,
        }
    }

    pub async fn dispatch(&self, event: &InboundEvent, channel: Arc<dyn EventChannel>) {
        if event.is_bot {
            return;
        }

        let command = match Command::classify(&event.content) {
            None => return,
            Some(Ok(command)) => command,
            Some(Err(e)) => {
                self.report(channel.as_ref(), e).await;
                return;
            }
        };

        info!(
            "📝 !{} used by {} in guild {:?}",
            command.name(),
            event.author_name,
            event.guild_id.map(|g| g.get())
        );

        if let Err(e) = self.execute(command, event, channel.clone()).await {
            self.report(channel.as_ref(), e).await;
        }
    }

    async fn execute(
        &self,
        command: Command,
        event: &InboundEvent,
        channel: Arc<dyn EventChannel>,
    ) -> BotResult<()> {
        match command {
            Command::Canned(text) => channel.reply(text).await?,
            Command::Help => channel.reply(HELP_TEXT).await?,
            Command::Join => self.handle_join(event, channel.as_ref()).await?,
            Command::Leave => self.handle_leave(event, channel.as_ref()).await?,
            Command::Stop => self.handle_stop(event, channel.as_ref()).await?,
            Command::Play { query } => self.handle_play(event, &query, channel).await?,
            Command::Cat => self.handle_cat(event, channel.as_ref()).await?,
            Command::CatLevel => self.handle_cat_level(event, channel.as_ref()).await?,
            Command::LateRecord { name, minutes } => {
                self.counters
                    .update::<LatenessRecord, _>(&name, |record| record.record(minutes))
                    .await;
                channel.reply("Permanent record updated.").await?;
            }
            Command::LateQuery { name } => {
                let text = match self.counters.get::<LatenessRecord>(&name).await {
                    Some(record) => format!(
                        "{} has been late a total of {} minutes over {} instances.",
                        name, record.total_minutes_late, record.late_count
                    ),
                    None => format!("{} has no late records.", name),
                };
                channel.reply(&text).await?;
            }
            Command::Chat { text, user_id } => {
                self.handle_chat(&text, UserId::new(user_id), channel.as_ref()).await?
            }
        }

        Ok(())
    }

    async fn handle_join(&self, event: &InboundEvent, channel: &dyn EventChannel) -> BotResult<()> {
        let guild_id = event.guild_id.ok_or(BotError::NoChannel)?;
        let (voice_channel, name) = event.voice_channel.clone().ok_or(BotError::NoChannel)?;

        let session = self.registry.join(guild_id, Some(voice_channel)).await?;
        debug!(
            "Voice session {} for guild {} in channel {} is {:?} (created {})",
            session.id, session.guild_id, session.channel_id, session.state, session.created_at
        );
        channel.reply(&format!("Joined {}", name)).await?;
        Ok(())
    }

    async fn handle_leave(&self, event: &InboundEvent, channel: &dyn EventChannel) -> BotResult<()> {
        let guild_id = event.guild_id.ok_or(BotError::NotConnected)?;

        if !self.registry.leave(guild_id).await {
            return Err(BotError::NotConnected);
        }
        channel.reply("Left the voice channel.").await?;
        Ok(())
    }

    async fn handle_stop(&self, event: &InboundEvent, channel: &dyn EventChannel) -> BotResult<()> {
        let stopped = match event.guild_id {
            Some(guild_id) => self.engine.stop(guild_id).await,
            None => false,
        };

        let text = if stopped { "Stopped playback." } else { "Nothing is playing." };
        channel.reply(text).await?;
        Ok(())
    }

    async fn handle_play(
        &self,
        event: &InboundEvent,
        query: &str,
        channel: Arc<dyn EventChannel>,
    ) -> BotResult<()> {
        let (Some(guild_id), Some((voice_channel, _))) = (event.guild_id, &event.voice_channel) else {
            channel.reply(PLAY_NO_CHANNEL).await?;
            return Ok(());
        };

        self.registry.ensure_joined(guild_id, Some(*voice_channel)).await?;

        let status = self
            .engine
            .start(guild_id, query, Arc::new(ChannelSink(channel)))
            .await;
        debug!("!tplay in guild {} settled as {:?}", guild_id, status);
        Ok(())
    }

    async fn handle_cat(&self, event: &InboundEvent, channel: &dyn EventChannel) -> BotResult<()> {
        self.counters
            .update::<CatViewRecord, _>(&event.author_id.to_string(), |record| {
                record.record_view(&event.author_name)
            })
            .await;

        let image = self.cat_images.choose(&mut rand::thread_rng()).cloned();
        match image {
            Some(url) => channel.send_image(&url).await?,
            None => warn!("No cat images configured"),
        }
        Ok(())
    }

    async fn handle_cat_level(
        &self,
        event: &InboundEvent,
        channel: &dyn EventChannel,
    ) -> BotResult<()> {
        let text = match self
            .counters
            .get::<CatViewRecord>(&event.author_id.to_string())
            .await
        {
            Some(record) => format!("You've viewed {} cat photo(s)!", record.view_count),
            None => "You haven't viewed any cat photos yet! Try using `!cat`".to_string(),
        };
        channel.reply(&text).await?;
        Ok(())
    }

    async fn handle_chat(
        &self,
        text: &str,
        user_id: UserId,
        channel: &dyn EventChannel,
    ) -> BotResult<()> {
        match channel.direct_message(user_id, text).await {
            Ok(()) => {
                info!("✉️ Relayed message to {}", user_id);
                channel.send(&format!("✅ Sent message to <@{}>", user_id)).await?;
            }
            Err(e) => {
                error!("Failed to send message to {}: {:?}", user_id, e);
                channel
                    .send("❌ Could not send the message. Check the ID and try again.")
                    .await?;
            }
        }
        Ok(())
    }

    async fn report(&self, channel: &dyn EventChannel, err: BotError) {
        if let Some(text) = err.user_message() {
            let delivered = if commands::usage_goes_to_channel(&err) {
                channel.send(&text).await
            } else {
                channel.reply(&text).await
            };
            if let Err(e) = delivered {
                warn!("Could not deliver error reply: {:?}", e);
            }
            return;
        }

        match err {
            BotError::Cancelled => debug!("Command superseded"),
            BotError::Persistence(reason) => warn!("Counter store: {}", reason),
            other => error!("Error handling command: {:?}", other),
        }
    }
}
