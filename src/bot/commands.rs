//! Text command grammar.
//!
//! Classification is ordered: canned phrases, then argument-less command
//! tokens, then prefixed commands with arguments. The first rule that matches
//! wins; anything else is not a command.

use regex::Regex;
use std::sync::LazyLock;

use crate::error::BotError;

pub const HELP_TEXT: &str = "Available commands: `!tjoin`, `!tleave`, `!tplay <song or link>`, `!tstop`, `!cat`, `!catlevel`, `!tlate <name> <minutes>`, `!tlate <name>`, `!tchat \"message\" userId`";

const CANNED: &[(&str, &str)] = &[
    ("You make me happy TrevorBot", "You make me happy too! :)"),
    ("You make me sad TrevorBot", "I am a construct of your own disappointment."),
];

const PLAY_USAGE: &str = "Please enter a song name or link!";
const LATE_USAGE: &str = "Usage: !tlate <name> <minutes> or !tlate <name>";
const LATE_MINUTES: &str = "Please provide a valid number of minutes.";
const CHAT_USAGE: &str = "❌ Usage: !tchat \"your message here\" userId";

/// `"<message>" <17-19 digit user id>`
static CHAT_ARGS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""([^"]+)"\s+(\d{17,19})\b"#).expect("chat pattern is valid"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Canned(&'static str),
    Join,
    Leave,
    Stop,
    Help,
    Cat,
    CatLevel,
    Play { query: String },
    LateRecord { name: String, minutes: u64 },
    LateQuery { name: String },
    Chat { text: String, user_id: u64 },
}

/// A command taking arguments, matched by the prefix of its first token.
struct Parameterized {
    prefix: &'static str,
    parse: fn(content: &str, args: &[&str]) -> Result<Command, BotError>,
}

const PARAMETERIZED: &[Parameterized] = &[
    Parameterized {
        prefix: "!tplay",
        parse: parse_play,
    },
    Parameterized {
        prefix: "!tlate",
        parse: parse_late,
    },
    Parameterized {
        prefix: "!tchat",
        parse: parse_chat,
    },
];

impl Command {
    /// `None` when `content` is not addressed to the bot. Malformed
    /// arguments come back as [`BotError::Usage`].
    pub fn classify(content: &str) -> Option<Result<Command, BotError>> {
        if let Some((_, reply)) = CANNED.iter().find(|(phrase, _)| *phrase == content) {
            return Some(Ok(Command::Canned(*reply)));
        }

        if let Some(command) = exact(content) {
            return Some(Ok(command));
        }

        let mut tokens = content.split_whitespace();
        let head = tokens.next()?;
        let args: Vec<&str> = tokens.collect();

        PARAMETERIZED
            .iter()
            .find(|rule| head.starts_with(rule.prefix))
            .map(|rule| (rule.parse)(content, &args))
    }

    /// Name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Canned(_) => "canned",
            Command::Join => "tjoin",
            Command::Leave => "tleave",
            Command::Stop => "tstop",
            Command::Help => "thelp",
            Command::Cat => "cat",
            Command::CatLevel => "catlevel",
            Command::Play { .. } => "tplay",
            Command::LateRecord { .. } | Command::LateQuery { .. } => "tlate",
            Command::Chat { .. } => "tchat",
        }
    }
}

/// Usage errors posted to the channel rather than as a reply to the author.
pub fn usage_goes_to_channel(err: &BotError) -> bool {
    matches!(err, BotError::Usage(text) if *text == CHAT_USAGE)
}

fn exact(content: &str) -> Option<Command> {
    let command = match content {
        "!tjoin" => Command::Join,
        "!tleave" => Command::Leave,
        "!tstop" => Command::Stop,
        "!thelp" => Command::Help,
        "!cat" => Command::Cat,
        "!catlevel" => Command::CatLevel,
        _ => return None,
    };
    Some(command)
}

fn parse_play(_content: &str, args: &[&str]) -> Result<Command, BotError> {
    if args.is_empty() {
        return Err(BotError::Usage(PLAY_USAGE));
    }
    Ok(Command::Play {
        query: args.join(" "),
    })
}

fn parse_late(_content: &str, args: &[&str]) -> Result<Command, BotError> {
    match args {
        [name, minutes] => {
            let minutes = minutes
                .parse::<i64>()
                .ok()
                .and_then(|m| u64::try_from(m).ok())
                .ok_or(BotError::Usage(LATE_MINUTES))?;
            Ok(Command::LateRecord {
                name: name.to_string(),
                minutes,
            })
        }
        [name] => Ok(Command::LateQuery {
            name: name.to_string(),
        }),
        _ => Err(BotError::Usage(LATE_USAGE)),
    }
}

fn parse_chat(content: &str, _args: &[&str]) -> Result<Command, BotError> {
    let captures = CHAT_ARGS
        .captures(content)
        .ok_or(BotError::Usage(CHAT_USAGE))?;

    let user_id = captures[2]
        .parse::<u64>()
        .ok()
        .filter(|id| *id != 0)
        .ok_or(BotError::Usage(CHAT_USAGE))?;

    Ok(Command::Chat {
        text: captures[1].to_string(),
        user_id,
    })
}
