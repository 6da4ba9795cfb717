//! # Audio Module
//!
//! Voice connections and playback for the `!tjoin`, `!tleave`, `!tplay` and
//! `!tstop` commands.
//!
//! ## Architecture
//!
//! ### [`session`] - Voice Session Registry
//! - At most one voice session per guild, keyed by guild id
//! - Per-guild async mutex serializing every voice operation for that guild
//!
//! ### [`player`] - Playback Engine
//! - `Idle -> Resolving -> Buffering -> Playing` with `Error` on failure
//! - A new `start` always tears down the previous playback first
//! - `leave`/replacement cancels in-flight resolution and ready waits
//!
//! ### [`transport`] - Voice backend seam
//! - songbird in production, fakes in tests
//!
//! ## Example
//!
//! ```rust,ignore
//! # async fn example(registry: std::sync::Arc<trevorbot::audio::session::VoiceRegistry>,
//! #     engine: trevorbot::audio::player::PlaybackEngine,
//! #     sink: std::sync::Arc<dyn trevorbot::audio::player::ReplySink>) {
//! use serenity::all::{ChannelId, GuildId};
//!
//! let guild_id = GuildId::new(123456789);
//! registry.join(guild_id, Some(ChannelId::new(987654321))).await.ok();
//! engine.start(guild_id, "never gonna give you up", sink).await;
//! # }
//! ```

pub mod events;
pub mod player;
pub mod session;
pub mod transport;

#[cfg(test)]
pub mod testing;
