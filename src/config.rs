use anyhow::Result;
use std::path::PathBuf;
use std::time::Duration;

/// Images `!cat` picks from when `CAT_IMAGES` is not set.
const DEFAULT_CAT_IMAGES: &[&str] = &[
    "https://pethelpful.com/.image/w_750,q_auto:good,c_fill,ar_4:3/MTk2NzY3MjA5ODc0MjY5ODI2/top-10-cutest-cat-photos-of-all-time.jpg",
    "https://pethelpful.com/.image/w_750,q_auto:good,c_limit/MTc0OTcwMzM5MTYyNzkzOTUy/top-10-cutest-cat-photos-of-all-time.png",
    "https://pethelpful.com/.image/w_750,q_auto:good,c_limit/MTc0OTcwMzM5MTYzNDQ5MzEy/top-10-cutest-cat-photos-of-all-time.png",
    "https://pethelpful.com/.image/w_750,q_auto:good,c_limit/MTc0OTcwMzM5MTYyOTkwNTYw/top-10-cutest-cat-photos-of-all-time.png",
    "https://pethelpful.com/.image/w_750,q_auto:good,c_limit/MTc0OTcwMzM5MTYzMjUyNzA0/top-10-cutest-cat-photos-of-all-time.png",
    "https://pethelpful.com/.image/w_750,q_auto:good,c_limit/MTc0OTcwMzM5MTYyNjYyODgw/top-10-cutest-cat-photos-of-all-time.png",
    "https://pethelpful.com/.image/w_750,q_auto:good,c_limit/MTc0OTcwMzM5MTYzMzgzNzc2/top-10-cutest-cat-photos-of-all-time.png",
    "https://pethelpful.com/.image/w_750,q_auto:good,c_limit/MTc0OTcwMzM5MTYzMDU2MDk2/top-10-cutest-cat-photos-of-all-time.png",
    "https://pethelpful.com/.image/w_750,q_auto:good,c_limit/MTc0OTcwMzM5MTYzMzE4MjQw/top-10-cutest-cat-photos-of-all-time.png",
    "https://pethelpful.com/.image/w_750,q_auto:good,c_limit/MTc0OTcwMzM5MTYzMTIxNjMy/top-10-cutest-cat-photos-of-all-time.png",
    "https://pethelpful.com/.image/w_750,q_auto:good,c_limit/MTc0OTcwMzM5MTYyODU5NDg4/top-10-cutest-cat-photos-of-all-time.png",
    "https://pethelpful.com/.image/w_750,q_auto:good,c_limit/MTc0OTcwMzM5MTYyNzI4NDE2/top-10-cutest-cat-photos-of-all-time.png",
    "https://pethelpful.com/.image/w_750,q_auto:good,c_limit/MTc0OTcwMzM5MTYzNTE0ODQ4/top-10-cutest-cat-photos-of-all-time.png",
    "https://pethelpful.com/.image/w_750,q_auto:good,c_limit/MTc0OTcwMzM5MTYzMTg3MTY4/top-10-cutest-cat-photos-of-all-time.png",
    "https://pethelpful.com/.image/w_750,q_auto:good,c_limit/MTc0OTcwMzM5MTYyOTI1MDI0/top-10-cutest-cat-photos-of-all-time.png",
];

#[derive(Debug, Clone)]
pub struct Config {
    // Discord
    pub discord_token: String,
    /// Text channel name used for online/offline announcements.
    pub status_channel: String,

    // Voice
    pub voice_ready_timeout: Duration,

    // Paths
    pub data_dir: PathBuf,

    pub cat_images: Vec<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            discord_token: std::env::var("DISCORD_TOKEN")?,
            status_channel: std::env::var("STATUS_CHANNEL")
                .unwrap_or_else(|_| "trevorbot-testing".to_string()),

            voice_ready_timeout: humantime::parse_duration(
                &std::env::var("VOICE_READY_TIMEOUT").unwrap_or_else(|_| "30s".to_string()),
            )?,

            data_dir: std::env::var("DATA_DIR")
                .unwrap_or_else(|_| "./json".to_string())
                .into(),

            cat_images: match std::env::var("CAT_IMAGES") {
                Ok(val) if !val.trim().is_empty() => parse_image_list(&val),
                _ => default_cat_images(),
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Sanity checks on values that would otherwise fail late, mid-command.
    pub fn validate(&self) -> Result<()> {
        if self.discord_token.trim().is_empty() {
            anyhow::bail!("DISCORD_TOKEN must not be empty");
        }

        if self.voice_ready_timeout.is_zero() {
            anyhow::bail!("Voice ready timeout must be greater than 0");
        }

        if self.status_channel.trim().is_empty() {
            anyhow::bail!("Status channel name must not be empty");
        }

        if self.cat_images.is_empty() {
            anyhow::bail!("At least one cat image is required");
        }

        Ok(())
    }

    /// Loggable summary; leaves the token out.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Data: {}\n  \
            Voice: ready timeout {}\n  \
            Status channel: #{}\n  \
            Cat images: {}",
            self.data_dir.display(),
            humantime::format_duration(self.voice_ready_timeout),
            self.status_channel,
            self.cat_images.len(),
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            discord_token: String::new(),
            status_channel: "trevorbot-testing".into(),
            voice_ready_timeout: Duration::from_secs(30),
            data_dir: "./json".into(),
            cat_images: default_cat_images(),
        }
    }
}

fn default_cat_images() -> Vec<String> {
    DEFAULT_CAT_IMAGES.iter().map(|s| s.to_string()).collect()
}

fn parse_image_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
