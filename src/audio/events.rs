use serenity::{async_trait, model::id::GuildId};
use songbird::{Event as VoiceEvent, EventContext, EventHandler as VoiceEventHandler};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::audio::transport::{ConnectionState, StateReporter, TrackSignal};

/// Forwards track end / track error events to the playback engine.
pub struct TrackSignalHandler {
    pub guild_id: GuildId,
    pub signals: mpsc::UnboundedSender<TrackSignal>,
    pub signal: TrackSignal,
}

#[async_trait]
impl VoiceEventHandler for TrackSignalHandler {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<VoiceEvent> {
        let signal = match &self.signal {
            TrackSignal::Finished => {
                info!("🎵 Track finished in guild {}", self.guild_id);
                TrackSignal::Finished
            }
            TrackSignal::Failed(_) => {
                let mut reason = String::from("unknown track error");
                if let EventContext::Track(track_list) = ctx {
                    for (state, _handle) in *track_list {
                        error!(
                            "❌ Track error in guild {}: {:?}",
                            self.guild_id, state.playing
                        );
                        reason = format!("{:?}", state.playing);
                    }
                }
                TrackSignal::Failed(reason)
            }
        };

        if self.signals.send(signal).is_err() {
            debug!("Playback in guild {} no longer listening", self.guild_id);
        }

        None
    }
}

/// Publishes driver connect/disconnect as connection state.
pub struct DriverStateHandler {
    pub guild_id: GuildId,
    pub state: StateReporter,
    pub publish: ConnectionState,
}

#[async_trait]
impl VoiceEventHandler for DriverStateHandler {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<VoiceEvent> {
        match self.publish {
            ConnectionState::Disconnected => {
                warn!("🔌 Voice driver disconnected in guild {}", self.guild_id)
            }
            other => debug!("Voice driver in guild {} is now {:?}", self.guild_id, other),
        }

        self.state.report(self.publish);
        None
    }
}
