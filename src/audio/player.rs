use async_trait::async_trait;
use serenity::model::id::GuildId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    audio::{
        session::{GuildVoice, VoiceRegistry},
        transport::{ConnectionState, StreamResource, TrackSignal},
    },
    error::{BotError, BotResult},
    sources::{Resolver, SourceDescriptor},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackStatus {
    Idle,
    Resolving,
    Buffering,
    Playing,
    Error,
}

/// Where the engine sends user-facing playback messages.
#[async_trait]
pub trait ReplySink: Send + Sync {
    /// Posts into the channel the request came from.
    async fn notify(&self, text: String);

    /// Answers the requester directly.
    async fn answer(&self, text: String);
}

/// One playback attempt bound to a voice session.
pub struct PlaybackSession {
    id: u64,
    /// Id of the [`VoiceSession`](crate::audio::session::VoiceSession) this
    /// attempt plays into.
    owner: u64,
    status: PlaybackStatus,
    source: Option<SourceDescriptor>,
    resource: Option<Box<dyn StreamResource>>,
    cancel: CancellationToken,
}

impl PlaybackSession {
    fn new(id: u64, owner: u64) -> Self {
        Self {
            id,
            owner,
            status: PlaybackStatus::Resolving,
            source: None,
            resource: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn status(&self) -> PlaybackStatus {
        self.status
    }

    pub fn source(&self) -> Option<&SourceDescriptor> {
        self.source.as_ref()
    }

    /// Cancels pending work, releases the stream and settles on `status`.
    pub(crate) fn terminate(&mut self, status: PlaybackStatus) {
        self.cancel.cancel();
        if let Some(resource) = self.resource.take() {
            resource.release();
        }
        self.status = status;
    }
}

pub struct PlaybackEngine {
    registry: Arc<VoiceRegistry>,
    resolver: Resolver,
    ready_timeout: Duration,
    next_id: AtomicU64,
}

impl PlaybackEngine {
    pub fn new(registry: Arc<VoiceRegistry>, resolver: Resolver, ready_timeout: Duration) -> Self {
        Self {
            registry,
            resolver,
            ready_timeout,
            next_id: AtomicU64::new(1),
        }
    }

    /// Resolves `query` and plays it in the guild's voice session, replacing
    /// whatever was playing. All outcomes are reported through `sink`; a
    /// superseded attempt ends quietly as `Idle`.
    pub async fn start(
        &self,
        guild_id: GuildId,
        query: &str,
        sink: Arc<dyn ReplySink>,
    ) -> PlaybackStatus {
        match self.try_start(guild_id, query, sink.clone()).await {
            Ok(source) => {
                sink.notify(format!("Now playing: {}", source.url())).await;
                PlaybackStatus::Playing
            }
            Err(BotError::Cancelled) => {
                debug!("Playback attempt in guild {} was superseded", guild_id);
                PlaybackStatus::Idle
            }
            Err(e) => {
                warn!("Playback failed in guild {}: {}", guild_id, e);
                match (e.user_message(), &e) {
                    (Some(text), BotError::NoResults(_)) => sink.answer(text).await,
                    (Some(text), _) => sink.notify(text).await,
                    (None, _) => {}
                }
                PlaybackStatus::Error
            }
        }
    }

    /// Stops the guild's playback. `false` if nothing was playing.
    pub async fn stop(&self, guild_id: GuildId) -> bool {
        let slot = self.registry.slot(guild_id);
        let mut guild = slot.lock().await;

        match guild.playback.as_mut() {
            Some(playback) if playback.status != PlaybackStatus::Idle => {
                let url = playback.source().map(|s| s.url().to_string());
                playback.terminate(PlaybackStatus::Idle);
                info!("⏹️ Playback stopped in guild {}: {:?}", guild_id, url);
                true
            }
            _ => false,
        }
    }

    #[allow(dead_code)]
    pub async fn status(&self, guild_id: GuildId) -> Option<PlaybackStatus> {
        let slot = self.registry.slot(guild_id);
        let guild = slot.lock().await;
        guild.playback.as_ref().map(PlaybackSession::status)
    }

    async fn try_start(
        &self,
        guild_id: GuildId,
        query: &str,
        sink: Arc<dyn ReplySink>,
    ) -> BotResult<SourceDescriptor> {
        let slot = self.registry.slot(guild_id);

        // Replace any previous attempt before doing anything slow.
        let (id, owner, cancel) = {
            let mut guild = slot.lock().await;
            let owner = guild.session.as_ref().ok_or(BotError::NotConnected)?.id();

            if let Some(mut previous) = guild.playback.take() {
                if previous.status != PlaybackStatus::Idle {
                    info!("⏭️ Replacing playback {} in guild {}", previous.id, guild_id);
                }
                previous.terminate(PlaybackStatus::Idle);
            }

            let playback = PlaybackSession::new(self.next_id.fetch_add(1, Ordering::Relaxed), owner);
            let handle = (playback.id, owner, playback.cancel.clone());
            guild.playback = Some(playback);
            handle
        };

        let resolved = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(BotError::Cancelled),
            resolved = self.resolver.resolve(query) => resolved,
        };
        let source = match resolved {
            Ok(source) => source,
            Err(e) => {
                self.settle(&slot, id, PlaybackStatus::Error).await;
                return Err(e);
            }
        };

        debug!(
            "Resolved `{}` as {:?}: {}",
            source.query(),
            source.kind(),
            source.url()
        );

        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        let connection = {
            let mut guard = slot.lock().await;
            let guild = &mut *guard;
            let (session, playback) = current(guild, id, owner)?;

            playback.status = PlaybackStatus::Buffering;
            playback.source = Some(source.clone());
            match session.link().stream(&source, signals_tx).await {
                Ok(resource) => playback.resource = Some(resource),
                Err(e) => {
                    playback.terminate(PlaybackStatus::Error);
                    return Err(e);
                }
            }
            session.watch_state()
        };

        let ready = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(BotError::Cancelled),
            ready = tokio::time::timeout(self.ready_timeout, wait_ready(connection)) => ready,
        };
        let outcome = match ready {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(BotError::ConnectionTimeout(self.ready_timeout)),
        };
        if let Err(e) = outcome {
            self.settle(&slot, id, PlaybackStatus::Error).await;
            return Err(e);
        }

        {
            let mut guard = slot.lock().await;
            let (_, playback) = current(&mut guard, id, owner)?;
            playback.status = PlaybackStatus::Playing;
        }
        info!(
            "▶️ Playing in guild {}: {} ({})",
            guild_id,
            source.title().unwrap_or("direct link"),
            source.url()
        );

        tokio::spawn(watch_track(slot, guild_id, id, cancel, signals_rx, sink));
        Ok(source)
    }

    /// Terminates attempt `id` if it is still the guild's current one.
    async fn settle(&self, slot: &Mutex<GuildVoice>, id: u64, status: PlaybackStatus) {
        let mut guild = slot.lock().await;
        if let Some(playback) = guild.playback.as_mut().filter(|p| p.id == id) {
            playback.terminate(status);
        }
    }
}

/// Session and playback for attempt `id`, or `Cancelled` if either was
/// replaced or torn down meanwhile.
fn current(
    guild: &mut GuildVoice,
    id: u64,
    owner: u64,
) -> BotResult<(&crate::audio::session::VoiceSession, &mut PlaybackSession)> {
    let session = guild
        .session
        .as_ref()
        .filter(|s| s.id() == owner)
        .ok_or(BotError::Cancelled)?;
    let playback = guild
        .playback
        .as_mut()
        .filter(|p| p.id == id && !p.cancel.is_cancelled())
        .ok_or(BotError::Cancelled)?;
    Ok((session, playback))
}

async fn wait_ready(mut state: watch::Receiver<ConnectionState>) -> BotResult<()> {
    let settled = state
        .wait_for(|s| *s != ConnectionState::Connecting)
        .await
        .map_err(|_| BotError::Cancelled)?;

    match *settled {
        ConnectionState::Ready => Ok(()),
        ConnectionState::Destroyed => Err(BotError::Cancelled),
        ConnectionState::Disconnected | ConnectionState::Connecting => Err(
            BotError::PlaybackFailure("voice connection dropped".into()),
        ),
    }
}

/// Waits for the stream of attempt `id` to end and settles its status.
async fn watch_track(
    slot: Arc<Mutex<GuildVoice>>,
    guild_id: GuildId,
    id: u64,
    cancel: CancellationToken,
    mut signals: mpsc::UnboundedReceiver<TrackSignal>,
    sink: Arc<dyn ReplySink>,
) {
    let signal = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        signal = signals.recv() => signal,
    };
    let Some(signal) = signal else { return };

    let failed = {
        let mut guild = slot.lock().await;
        let Some(playback) = guild.playback.as_mut().filter(|p| p.id == id) else {
            return;
        };
        match signal {
            TrackSignal::Finished => {
                info!("Playback finished in guild {}", guild_id);
                playback.terminate(PlaybackStatus::Idle);
                false
            }
            TrackSignal::Failed(reason) => {
                error!("Audio player error in guild {}: {}", guild_id, reason);
                playback.terminate(PlaybackStatus::Error);
                true
            }
        }
    };

    if failed {
        sink.notify("There was an error playing the audio.".into()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::testing::{FakeTransport, RecordingSink, StaticSearch};
    use pretty_assertions::assert_eq;
    use serenity::model::id::ChannelId;

    const GUILD: GuildId = GuildId::new(7);
    const LOBBY: ChannelId = ChannelId::new(70);

    struct Rig {
        transport: Arc<FakeTransport>,
        registry: Arc<VoiceRegistry>,
        engine: Arc<PlaybackEngine>,
        sink: Arc<RecordingSink>,
    }

    async fn rig(transport: FakeTransport, ready_timeout: Duration) -> Rig {
        let transport = Arc::new(transport);
        let registry = Arc::new(VoiceRegistry::new(transport.clone()));
        let resolver = Resolver::new(Arc::new(StaticSearch));
        let engine = Arc::new(PlaybackEngine::new(registry.clone(), resolver, ready_timeout));
        registry.join(GUILD, Some(LOBBY)).await.unwrap();

        Rig {
            transport,
            registry,
            engine,
            sink: Arc::new(RecordingSink::default()),
        }
    }

    async fn eventually(engine: &PlaybackEngine, expected: PlaybackStatus) {
        for _ in 0..200 {
            if engine.status(GUILD).await == Some(expected) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("playback never reached {:?}", expected);
    }

    #[tokio::test]
    async fn start_plays_resolved_source() {
        let rig = rig(FakeTransport::default(), Duration::from_secs(1)).await;

        let status = rig.engine.start(GUILD, "lofi beats", rig.sink.clone()).await;

        assert_eq!(status, PlaybackStatus::Playing);
        assert_eq!(rig.sink.messages(), vec!["Now playing: https://media.test/lofi-beats"]);
        assert_eq!(
            rig.transport.log(),
            vec!["connect:7:70", "acquire:https://media.test/lofi-beats"]
        );
    }

    #[tokio::test]
    async fn second_start_releases_first_before_acquiring() {
        let rig = rig(FakeTransport::default(), Duration::from_secs(1)).await;

        rig.engine.start(GUILD, "first song", rig.sink.clone()).await;
        rig.engine.start(GUILD, "second song", rig.sink.clone()).await;

        assert_eq!(
            rig.transport.log(),
            vec![
                "connect:7:70",
                "acquire:https://media.test/first-song",
                "release:https://media.test/first-song",
                "acquire:https://media.test/second-song",
            ]
        );
        assert_eq!(rig.engine.status(GUILD).await, Some(PlaybackStatus::Playing));
    }

    #[tokio::test]
    async fn no_results_is_reported_and_recoverable() {
        let rig = rig(FakeTransport::default(), Duration::from_secs(1)).await;

        let status = rig.engine.start(GUILD, "nothing at all", rig.sink.clone()).await;

        assert_eq!(status, PlaybackStatus::Error);
        assert_eq!(rig.sink.messages(), vec!["No results found!"]);
        assert_eq!(rig.sink.answers(), vec!["No results found!"]);
        assert_eq!(rig.transport.log(), vec!["connect:7:70"]);
        assert!(rig.registry.lookup(GUILD).await.is_some());
    }

    #[tokio::test]
    async fn start_without_session_is_not_connected() {
        let transport = Arc::new(FakeTransport::default());
        let registry = Arc::new(VoiceRegistry::new(transport));
        let engine = PlaybackEngine::new(
            registry,
            Resolver::new(Arc::new(StaticSearch)),
            Duration::from_secs(1),
        );
        let sink = Arc::new(RecordingSink::default());

        let status = engine.start(GUILD, "anything", sink.clone()).await;

        assert_eq!(status, PlaybackStatus::Error);
        assert_eq!(sink.messages(), vec!["I am not in a voice channel."]);
    }

    #[tokio::test]
    async fn ready_timeout_releases_stream() {
        let rig = rig(FakeTransport::manual(), Duration::from_millis(50)).await;

        let status = rig.engine.start(GUILD, "slow song", rig.sink.clone()).await;

        assert_eq!(status, PlaybackStatus::Error);
        assert_eq!(rig.sink.messages(), vec!["Could not play audio."]);
        assert!(rig.sink.answers().is_empty());
        assert_eq!(
            rig.transport.log(),
            vec![
                "connect:7:70",
                "acquire:https://media.test/slow-song",
                "release:https://media.test/slow-song",
            ]
        );
        assert_eq!(rig.engine.status(GUILD).await, Some(PlaybackStatus::Error));
    }

    #[tokio::test]
    async fn leave_cancels_pending_start_quietly() {
        let rig = rig(FakeTransport::manual(), Duration::from_secs(5)).await;

        let engine = rig.engine.clone();
        let sink = rig.sink.clone();
        let pending = tokio::spawn(async move { engine.start(GUILD, "long wait", sink).await });

        eventually(&rig.engine, PlaybackStatus::Buffering).await;
        assert!(rig.registry.leave(GUILD).await);

        assert_eq!(pending.await.unwrap(), PlaybackStatus::Idle);
        assert!(rig.sink.messages().is_empty());
        assert_eq!(
            rig.transport.log(),
            vec![
                "connect:7:70",
                "acquire:https://media.test/long-wait",
                "release:https://media.test/long-wait",
                "disconnect:7",
            ]
        );
    }

    #[tokio::test]
    async fn natural_end_returns_to_idle() {
        let rig = rig(FakeTransport::default(), Duration::from_secs(1)).await;
        rig.engine.start(GUILD, "short song", rig.sink.clone()).await;

        rig.transport.signal(TrackSignal::Finished);

        eventually(&rig.engine, PlaybackStatus::Idle).await;
        assert!(rig
            .transport
            .log()
            .contains(&"release:https://media.test/short-song".to_string()));
    }

    #[tokio::test]
    async fn player_error_is_reported() {
        let rig = rig(FakeTransport::default(), Duration::from_secs(1)).await;
        rig.engine.start(GUILD, "broken song", rig.sink.clone()).await;

        rig.transport.signal(TrackSignal::Failed("decoder blew up".into()));

        eventually(&rig.engine, PlaybackStatus::Error).await;
        for _ in 0..200 {
            if rig.sink.messages().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(
            rig.sink.messages(),
            vec![
                "Now playing: https://media.test/broken-song",
                "There was an error playing the audio.",
            ]
        );
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let rig = rig(FakeTransport::default(), Duration::from_secs(1)).await;

        assert!(!rig.engine.stop(GUILD).await);
        rig.engine.start(GUILD, "some song", rig.sink.clone()).await;
        assert!(rig.engine.stop(GUILD).await);
        assert!(!rig.engine.stop(GUILD).await);
        assert_eq!(rig.engine.status(GUILD).await, Some(PlaybackStatus::Idle));
    }
}
