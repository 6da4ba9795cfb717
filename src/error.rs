//! Error taxonomy shared by the command handlers, the voice registry and the
//! playback engine.

use std::time::Duration;
use thiserror::Error;

/// Failures a command can run into.
///
/// Everything except [`BotError::Unexpected`] is an expected outcome that the
/// detecting handler turns into a reply (or swallows after logging). None of
/// them should ever bring the process down.
#[derive(Debug, Error)]
pub enum BotError {
    /// Malformed command arguments. Carries the usage reply.
    #[error("usage: {0}")]
    Usage(&'static str),

    /// A voice command was issued by someone outside a voice channel.
    #[error("caller is not in a voice channel")]
    NoChannel,

    /// The guild has no voice session (or nothing is playing) to act on.
    #[error("no active voice session")]
    NotConnected,

    /// Search returned zero candidates for the query.
    #[error("no results for query `{0}`")]
    NoResults(String),

    /// The voice connection did not become ready in time.
    #[error("voice connection not ready after {0:?}")]
    ConnectionTimeout(Duration),

    /// The streaming resource failed to start or errored mid-play.
    #[error("playback failed: {0}")]
    PlaybackFailure(String),

    /// The counter store could not persist a mapping.
    #[error("persistence failed: {0}")]
    Persistence(String),

    /// The attempt was superseded by a `leave` or a newer `join`/`start`.
    #[error("superseded by a newer request")]
    Cancelled,

    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl BotError {
    /// Reply text shown to the user, if this failure is user-facing.
    pub fn user_message(&self) -> Option<String> {
        match self {
            Self::Usage(text) => Some((*text).to_string()),
            Self::NoChannel => Some("You need to be in a voice channel to use this command.".into()),
            Self::NotConnected => Some("I am not in a voice channel.".into()),
            Self::NoResults(_) => Some("No results found!".into()),
            Self::ConnectionTimeout(_) | Self::PlaybackFailure(_) => {
                Some("Could not play audio.".into())
            }
            Self::Persistence(_) | Self::Cancelled | Self::Unexpected(_) => None,
        }
    }
}

pub type BotResult<T> = Result<T, BotError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silent_variants_have_no_reply() {
        assert!(BotError::Cancelled.user_message().is_none());
        assert!(BotError::Persistence("disk full".into()).user_message().is_none());
        assert!(BotError::Unexpected(anyhow::anyhow!("boom")).user_message().is_none());
    }

    #[test]
    fn usage_carries_its_own_text() {
        let err = BotError::Usage("Usage: !tlate <name> <minutes> or !tlate <name>");
        assert_eq!(
            err.user_message().as_deref(),
            Some("Usage: !tlate <name> <minutes> or !tlate <name>")
        );
    }
}
