//! Seams between the voice registry / playback engine and the actual voice
//! backend. Production uses songbird; tests plug in in-process fakes.

use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use songbird::{
    input::{Input, YoutubeDl},
    tracks::TrackHandle,
    CoreEvent, Event, Songbird, TrackEvent,
};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::audio::events::{DriverStateHandler, TrackSignalHandler};
use crate::error::{BotError, BotResult};
use crate::sources::SourceDescriptor;

/// Lifecycle of a guild's voice connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Ready,
    Destroyed,
}

/// Out-of-band notifications from a running stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackSignal {
    Finished,
    Failed(String),
}

/// Publishes connection state changes for one session.
///
/// Once a session is `Destroyed` late reports from the backend are dropped.
#[derive(Clone)]
pub struct StateReporter {
    tx: Arc<watch::Sender<ConnectionState>>,
}

impl StateReporter {
    pub fn new() -> (Self, watch::Receiver<ConnectionState>) {
        let (tx, rx) = watch::channel(ConnectionState::Disconnected);
        (Self { tx: Arc::new(tx) }, rx)
    }

    pub fn report(&self, state: ConnectionState) {
        self.tx.send_if_modified(|current| {
            if *current == ConnectionState::Destroyed || *current == state {
                return false;
            }
            *current = state;
            true
        });
    }

    pub(crate) fn destroy(&self) {
        self.tx.send_replace(ConnectionState::Destroyed);
    }

    #[cfg(test)]
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }
}

/// An audio stream bound to a voice link. Dropping it without `release`
/// leaves the stream running.
pub trait StreamResource: Send + Sync {
    fn release(self: Box<Self>);
}

/// A live connection to one guild's voice channel.
#[async_trait]
pub trait VoiceLink: Send + Sync {
    /// Starts streaming `source` into the channel. End-of-stream and player
    /// errors are reported through `signals`.
    async fn stream(
        &self,
        source: &SourceDescriptor,
        signals: mpsc::UnboundedSender<TrackSignal>,
    ) -> BotResult<Box<dyn StreamResource>>;

    async fn disconnect(&self);
}

#[async_trait]
pub trait VoiceTransport: Send + Sync {
    /// Begins connecting to `channel_id`. Returns as soon as the attempt is
    /// under way; readiness is published through `state`.
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        state: StateReporter,
    ) -> BotResult<Box<dyn VoiceLink>>;
}

/// Voice transport backed by songbird.
pub struct SongbirdTransport {
    manager: Arc<Songbird>,
    http: reqwest::Client,
}

impl SongbirdTransport {
    pub fn new(manager: Arc<Songbird>) -> Self {
        Self {
            manager,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl VoiceTransport for SongbirdTransport {
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        state: StateReporter,
    ) -> BotResult<Box<dyn VoiceLink>> {
        let call = self.manager.get_or_insert(guild_id);
        {
            let mut handler = call.lock().await;
            handler.remove_all_global_events();
            handler.add_global_event(
                Event::Core(CoreEvent::DriverConnect),
                DriverStateHandler {
                    guild_id,
                    state: state.clone(),
                    publish: ConnectionState::Ready,
                },
            );
            handler.add_global_event(
                Event::Core(CoreEvent::DriverDisconnect),
                DriverStateHandler {
                    guild_id,
                    state: state.clone(),
                    publish: ConnectionState::Disconnected,
                },
            );
        }

        state.report(ConnectionState::Connecting);

        let manager = self.manager.clone();
        let join_task = tokio::spawn(async move {
            match manager.join(guild_id, channel_id).await {
                Ok(_) => {
                    info!("🔊 Voice connection ready in guild {}", guild_id);
                    state.report(ConnectionState::Ready);
                }
                Err(e) => {
                    warn!("Voice join failed in guild {}: {:?}", guild_id, e);
                    state.report(ConnectionState::Disconnected);
                }
            }
        });

        Ok(Box::new(SongbirdLink {
            manager: self.manager.clone(),
            http: self.http.clone(),
            guild_id,
            call,
            join_task,
        }))
    }
}

struct SongbirdLink {
    manager: Arc<Songbird>,
    http: reqwest::Client,
    guild_id: GuildId,
    call: Arc<Mutex<songbird::Call>>,
    join_task: JoinHandle<()>,
}

#[async_trait]
impl VoiceLink for SongbirdLink {
    async fn stream(
        &self,
        source: &SourceDescriptor,
        signals: mpsc::UnboundedSender<TrackSignal>,
    ) -> BotResult<Box<dyn StreamResource>> {
        let input: Input = YoutubeDl::new(self.http.clone(), source.url().to_string()).into();

        let handle = {
            let mut call = self.call.lock().await;
            call.play_input(input)
        };

        for (event, signal) in [
            (TrackEvent::End, TrackSignal::Finished),
            (TrackEvent::Error, TrackSignal::Failed(String::new())),
        ] {
            handle
                .add_event(
                    Event::Track(event),
                    TrackSignalHandler {
                        guild_id: self.guild_id,
                        signals: signals.clone(),
                        signal,
                    },
                )
                .map_err(|e| BotError::PlaybackFailure(format!("could not watch track: {e}")))?;
        }

        debug!("🎵 Stream bound in guild {}: {}", self.guild_id, source.url());
        Ok(Box::new(SongbirdStream { handle }))
    }

    async fn disconnect(&self) {
        self.join_task.abort();
        if let Err(e) = self.manager.remove(self.guild_id).await {
            debug!("Voice call already gone in guild {}: {:?}", self.guild_id, e);
        }
        info!("👋 Left voice in guild {}", self.guild_id);
    }
}

struct SongbirdStream {
    handle: TrackHandle,
}

impl StreamResource for SongbirdStream {
    fn release(self: Box<Self>) {
        // Already-finished tracks report an error here; nothing left to free.
        let _ = self.handle.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destroyed_state_is_final() {
        let (reporter, rx) = StateReporter::new();
        reporter.report(ConnectionState::Connecting);
        reporter.destroy();
        reporter.report(ConnectionState::Ready);

        assert_eq!(*rx.borrow(), ConnectionState::Destroyed);
    }

    #[test]
    fn repeated_state_does_not_wake_watchers() {
        let (reporter, mut rx) = StateReporter::new();
        reporter.report(ConnectionState::Connecting);
        rx.borrow_and_update();
        reporter.report(ConnectionState::Connecting);

        assert!(!rx.has_changed().unwrap());
    }
}
