//! # Bot Module
//!
//! Serenity-facing side of TrevorBot:
//! - [`TrevorBot`] implements serenity's [`EventHandler`]
//! - [`commands`] classifies message text into commands
//! - [`handlers`] runs them against the counter store and voice stack
//! - [`announce`] posts online/offline notices
//!
//! Serenity runs every event in its own task, so handlers for the same guild
//! can interleave at any await. Voice state is serialized per guild inside
//! [`VoiceRegistry`]; counters per namespace inside
//! [`CounterStore`](crate::storage::CounterStore).

use anyhow::Result;
use serenity::{
    all::{Context, EventHandler, Message, Ready, VoiceState},
    async_trait,
    builder::{CreateAttachment, CreateMessage},
    model::id::{ChannelId, UserId},
};
use std::sync::Arc;
use tracing::info;

pub mod announce;
pub mod commands;
pub mod handlers;

use crate::{audio::session::VoiceRegistry, config::Config};
use handlers::{Dispatcher, EventChannel, InboundEvent};

pub struct TrevorBot {
    config: Arc<Config>,
    dispatcher: Arc<Dispatcher>,
    registry: Arc<VoiceRegistry>,
}

impl TrevorBot {
    pub fn new(config: Config, dispatcher: Arc<Dispatcher>, registry: Arc<VoiceRegistry>) -> Self {
        Self {
            config: Arc::new(config),
            dispatcher,
            registry,
        }
    }
}

/// Builds the structured event from a gateway message, resolving the
/// author's voice channel from the cache.
fn inbound_event(ctx: &Context, msg: &Message) -> InboundEvent {
    let voice_channel = msg.guild_id.and_then(|guild_id| {
        let guild = guild_id.to_guild_cached(&ctx.cache)?;
        let channel_id = guild.voice_states.get(&msg.author.id)?.channel_id?;
        let name = guild
            .channels
            .get(&channel_id)
            .map(|c| c.name.clone())
            .unwrap_or_else(|| channel_id.to_string());
        Some((channel_id, name))
    });

    InboundEvent {
        author_id: msg.author.id,
        author_name: msg.author.name.clone(),
        is_bot: msg.author.bot || msg.author.id == ctx.cache.current_user().id,
        content: msg.content.clone(),
        guild_id: msg.guild_id,
        voice_channel,
    }
}

/// Reply capability bound to one gateway message.
struct MessageChannel {
    ctx: Context,
    message: Message,
}

impl MessageChannel {
    fn channel_id(&self) -> ChannelId {
        self.message.channel_id
    }
}

#[async_trait]
impl EventChannel for MessageChannel {
    async fn reply(&self, text: &str) -> Result<()> {
        self.message.reply(&self.ctx, text).await?;
        Ok(())
    }

    async fn send(&self, text: &str) -> Result<()> {
        self.channel_id().say(&self.ctx.http, text).await?;
        Ok(())
    }

    async fn send_image(&self, url: &str) -> Result<()> {
        let attachment = CreateAttachment::url(&self.ctx.http, url).await?;
        self.channel_id()
            .send_message(&self.ctx, CreateMessage::new().add_file(attachment))
            .await?;
        Ok(())
    }

    async fn direct_message(&self, user_id: UserId, text: &str) -> Result<()> {
        let dm = user_id.create_dm_channel(&self.ctx).await?;
        dm.say(&self.ctx.http, text).await?;
        Ok(())
    }
}

#[async_trait]
impl EventHandler for TrevorBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 Logged in as {}", ready.user.name);
        info!("📊 Connected to {} guilds", ready.guilds.len());

        announce::broadcast(
            &ctx.cache,
            &ctx.http,
            &self.config.status_channel,
            announce::ONLINE,
        )
        .await;
    }

    async fn message(&self, ctx: Context, msg: Message) {
        let event = inbound_event(&ctx, &msg);
        let channel = Arc::new(MessageChannel { ctx, message: msg });
        self.dispatcher.dispatch(&event, channel).await;
    }

    /// Drops the guild's voice session when someone else disconnects the bot.
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let current_user_id = ctx.cache.current_user().id;
        if new.user_id != current_user_id || new.channel_id.is_some() {
            return;
        }
        let (Some(guild_id), Some(left)) = (new.guild_id, old.and_then(|o| o.channel_id)) else {
            return;
        };

        let now_in = ctx
            .cache
            .guild(guild_id)
            .and_then(|guild| guild.voice_states.get(&current_user_id)?.channel_id);

        if self
            .registry
            .disconnected_externally(guild_id, left, now_in)
            .await
        {
            info!("🔌 Disconnected from voice in guild {}", guild_id);
        }
    }
}
