//! In-process stand-ins for the voice backend and search provider.

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use crate::audio::player::ReplySink;
use crate::audio::transport::{
    ConnectionState, StateReporter, StreamResource, TrackSignal, VoiceLink, VoiceTransport,
};
use crate::error::BotResult;
use crate::sources::{SearchHit, SearchProvider, SourceDescriptor};

type Log = Arc<Mutex<Vec<String>>>;

/// Records connect / acquire / release / disconnect in call order.
pub struct FakeTransport {
    auto_ready: bool,
    log: Log,
    reporters: Mutex<Vec<StateReporter>>,
    signals: Arc<Mutex<Option<mpsc::UnboundedSender<TrackSignal>>>>,
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self {
            auto_ready: true,
            log: Log::default(),
            reporters: Mutex::new(Vec::new()),
            signals: Arc::default(),
        }
    }
}

impl FakeTransport {
    /// Connections stay `Connecting` until [`set_state`](Self::set_state).
    pub fn manual() -> Self {
        Self {
            auto_ready: false,
            ..Self::default()
        }
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    pub fn set_state(&self, state: ConnectionState) {
        if let Some(reporter) = self.reporters.lock().last() {
            reporter.report(state);
        }
    }

    pub fn last_state(&self) -> watch::Receiver<ConnectionState> {
        self.reporters
            .lock()
            .last()
            .map(StateReporter::subscribe)
            .expect("no connection made yet")
    }

    /// Delivers `signal` to the most recently started stream.
    pub fn signal(&self, signal: TrackSignal) {
        let signals = self.signals.lock();
        let tx = signals.as_ref().expect("no stream started yet");
        tx.send(signal).expect("playback stopped listening");
    }
}

#[async_trait]
impl VoiceTransport for FakeTransport {
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        state: StateReporter,
    ) -> BotResult<Box<dyn VoiceLink>> {
        self.log.lock().push(format!("connect:{}:{}", guild_id, channel_id));
        if self.auto_ready {
            state.report(ConnectionState::Ready);
        }
        self.reporters.lock().push(state);

        Ok(Box::new(FakeLink {
            guild_id,
            log: self.log.clone(),
            signals: self.signals.clone(),
        }))
    }
}

struct FakeLink {
    guild_id: GuildId,
    log: Log,
    signals: Arc<Mutex<Option<mpsc::UnboundedSender<TrackSignal>>>>,
}

#[async_trait]
impl VoiceLink for FakeLink {
    async fn stream(
        &self,
        source: &SourceDescriptor,
        signals: mpsc::UnboundedSender<TrackSignal>,
    ) -> BotResult<Box<dyn StreamResource>> {
        self.log.lock().push(format!("acquire:{}", source.url()));
        *self.signals.lock() = Some(signals);

        Ok(Box::new(FakeStream {
            url: source.url().to_string(),
            log: self.log.clone(),
        }))
    }

    async fn disconnect(&self) {
        self.log.lock().push(format!("disconnect:{}", self.guild_id));
    }
}

struct FakeStream {
    url: String,
    log: Log,
}

impl StreamResource for FakeStream {
    fn release(self: Box<Self>) {
        self.log.lock().push(format!("release:{}", self.url));
    }
}

/// Search that finds `https://media.test/<query-with-dashes>`, except for
/// queries starting with "nothing".
pub struct StaticSearch;

#[async_trait]
impl SearchProvider for StaticSearch {
    async fn search(&self, query: &str, _limit: usize) -> Result<Vec<SearchHit>> {
        if query.starts_with("nothing") {
            return Ok(Vec::new());
        }

        Ok(vec![SearchHit {
            title: query.to_string(),
            url: format!("https://media.test/{}", query.replace(' ', "-")),
        }])
    }
}

/// Records every message in order; `answers` holds the ones addressed to the
/// requester.
#[derive(Default)]
pub struct RecordingSink {
    messages: Mutex<Vec<String>>,
    answers: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }

    pub fn answers(&self) -> Vec<String> {
        self.answers.lock().clone()
    }
}

#[async_trait]
impl ReplySink for RecordingSink {
    async fn notify(&self, text: String) {
        self.messages.lock().push(text);
    }

    async fn answer(&self, text: String) {
        self.answers.lock().push(text.clone());
        self.messages.lock().push(text);
    }
}
