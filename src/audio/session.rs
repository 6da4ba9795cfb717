//! # Voice Session Registry
//!
//! Single source of truth for "is the bot connected in this guild". Each guild
//! gets one slot guarded by an async mutex; every registry and playback
//! operation for that guild runs under it, so at most one non-destroyed
//! [`VoiceSession`] exists per guild at any time.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serenity::model::id::{ChannelId, GuildId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::info;

use crate::audio::player::{PlaybackSession, PlaybackStatus};
use crate::audio::transport::{ConnectionState, StateReporter, VoiceLink, VoiceTransport};
use crate::error::{BotError, BotResult};

/// A guild's voice connection. Owns its link exclusively.
pub struct VoiceSession {
    id: u64,
    guild_id: GuildId,
    channel_id: ChannelId,
    link: Box<dyn VoiceLink>,
    reporter: StateReporter,
    state: watch::Receiver<ConnectionState>,
    created_at: DateTime<Utc>,
}

impl VoiceSession {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub(crate) fn link(&self) -> &dyn VoiceLink {
        self.link.as_ref()
    }

    pub(crate) fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id,
            guild_id: self.guild_id,
            channel_id: self.channel_id,
            state: self.state(),
            created_at: self.created_at,
        }
    }

    async fn destroy(self) {
        self.reporter.destroy();
        self.link.disconnect().await;
        info!(
            "Voice session {} in guild {} closed after {}s",
            self.id,
            self.guild_id,
            (Utc::now() - self.created_at).num_seconds()
        );
    }
}

/// Point-in-time copy of a session, safe to hold across awaits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: u64,
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub state: ConnectionState,
    pub created_at: DateTime<Utc>,
}

/// Everything voice-related for one guild.
#[derive(Default)]
pub struct GuildVoice {
    pub(crate) session: Option<VoiceSession>,
    pub(crate) playback: Option<PlaybackSession>,
}

impl GuildVoice {
    fn teardown_playback(&mut self) {
        if let Some(mut playback) = self.playback.take() {
            playback.terminate(PlaybackStatus::Idle);
        }
    }
}

pub struct VoiceRegistry {
    transport: Arc<dyn VoiceTransport>,
    guilds: DashMap<GuildId, Arc<Mutex<GuildVoice>>>,
    next_id: AtomicU64,
}

impl VoiceRegistry {
    pub fn new(transport: Arc<dyn VoiceTransport>) -> Self {
        Self {
            transport,
            guilds: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// The guild's slot. Slots are never removed, so every caller for a guild
    /// contends on the same mutex.
    pub(crate) fn slot(&self, guild_id: GuildId) -> Arc<Mutex<GuildVoice>> {
        self.guilds.entry(guild_id).or_default().clone()
    }

    /// Connects to `channel`, replacing any existing session in the guild.
    /// Does not wait for the connection to become ready.
    pub async fn join(&self, guild_id: GuildId, channel: Option<ChannelId>) -> BotResult<SessionInfo> {
        let channel_id = channel.ok_or(BotError::NoChannel)?;
        let slot = self.slot(guild_id);
        let mut guild = slot.lock().await;
        self.join_locked(&mut guild, guild_id, channel_id).await
    }

    /// Like [`join`](Self::join), but keeps a live session that is already in
    /// `channel`.
    pub async fn ensure_joined(
        &self,
        guild_id: GuildId,
        channel: Option<ChannelId>,
    ) -> BotResult<SessionInfo> {
        let channel_id = channel.ok_or(BotError::NoChannel)?;
        let slot = self.slot(guild_id);
        let mut guild = slot.lock().await;

        if let Some(session) = guild.session.as_ref() {
            let live = matches!(
                session.state(),
                ConnectionState::Connecting | ConnectionState::Ready
            );
            if live && session.channel_id == channel_id {
                return Ok(session.info());
            }
        }

        self.join_locked(&mut guild, guild_id, channel_id).await
    }

    async fn join_locked(
        &self,
        guild: &mut GuildVoice,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> BotResult<SessionInfo> {
        if let Some(previous) = guild.session.take() {
            info!(
                "🔁 Replacing voice session {} in guild {}",
                previous.id, guild_id
            );
            guild.teardown_playback();
            previous.destroy().await;
        }

        let (reporter, state) = StateReporter::new();
        reporter.report(ConnectionState::Connecting);
        let link = self
            .transport
            .connect(guild_id, channel_id, reporter.clone())
            .await?;

        let session = VoiceSession {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            guild_id,
            channel_id,
            link,
            reporter,
            state,
            created_at: Utc::now(),
        };
        let info = session.info();
        guild.session = Some(session);

        info!("🔊 Joining channel {} in guild {}", channel_id, guild_id);
        Ok(info)
    }

    /// Destroys the guild's session and any playback on it. `false` when there
    /// was nothing to leave.
    pub async fn leave(&self, guild_id: GuildId) -> bool {
        let Some(slot) = self.guilds.get(&guild_id).map(|s| s.clone()) else {
            return false;
        };
        let mut guild = slot.lock().await;

        let Some(session) = guild.session.take() else {
            return false;
        };
        guild.teardown_playback();
        session.destroy().await;
        true
    }

    /// Reacts to the gateway reporting that the bot left `left` without the
    /// registry asking. `now_in` is where the gateway cache currently places
    /// the bot.
    ///
    /// A join that replaces a session in the same channel produces exactly
    /// such an update for the connection it tore down. That update is stale
    /// while the replacement is still connecting, or once the cache shows the
    /// bot back in the session's channel, and is ignored then. Returns `true`
    /// when the session was dropped.
    pub async fn disconnected_externally(
        &self,
        guild_id: GuildId,
        left: ChannelId,
        now_in: Option<ChannelId>,
    ) -> bool {
        let Some(slot) = self.guilds.get(&guild_id).map(|s| s.clone()) else {
            return false;
        };
        let mut guild = slot.lock().await;

        let kicked = guild.session.as_ref().is_some_and(|session| {
            session.channel_id == left
                && now_in != Some(session.channel_id)
                && session.state() != ConnectionState::Connecting
        });
        if !kicked {
            return false;
        }

        let Some(session) = guild.session.take() else {
            return false;
        };
        guild.teardown_playback();
        session.destroy().await;
        true
    }

    #[allow(dead_code)]
    pub async fn lookup(&self, guild_id: GuildId) -> Option<SessionInfo> {
        let slot = self.guilds.get(&guild_id).map(|s| s.clone())?;
        let guild = slot.lock().await;
        guild.session.as_ref().map(VoiceSession::info)
    }
}
