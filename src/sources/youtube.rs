use anyhow::{Context, Result};
use async_process::Command;
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;
use tokio::sync::Semaphore;
use tracing::{debug, info};
use url::Url;

use super::{SearchHit, SearchProvider};

static VIDEO_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^https?://(www\.|m\.|music\.)?(youtube\.com/(watch\?(\S*&)?v=|shorts/|embed/|live/|v/)|youtu\.be/)[\w-]{11}",
    )
    .expect("video url pattern is valid")
});

/// Whether `query` is a link to a single playable video.
pub fn is_direct_link(query: &str) -> bool {
    let Ok(url) = Url::parse(query) else {
        return false;
    };

    matches!(url.scheme(), "http" | "https") && url.host_str().is_some() && VIDEO_URL.is_match(query)
}

/// Entry emitted by `yt-dlp --dump-json --flat-playlist`.
#[derive(Debug, Deserialize)]
struct YtDlpEntry {
    id: String,
    title: Option<String>,
    url: Option<String>,
    webpage_url: Option<String>,
}

impl YtDlpEntry {
    fn into_hit(self) -> SearchHit {
        let url = self
            .webpage_url
            .or(self.url)
            .unwrap_or_else(|| format!("https://www.youtube.com/watch?v={}", self.id));

        SearchHit {
            title: self.title.unwrap_or_else(|| url.clone()),
            url,
        }
    }
}

/// YouTube search through the `yt-dlp` binary.
pub struct YtDlpSearch {
    // yt-dlp gets throttled quickly with parallel lookups
    rate_limiter: Semaphore,
}

impl YtDlpSearch {
    pub fn new() -> Self {
        Self {
            rate_limiter: Semaphore::new(3),
        }
    }

    /// Checks that `yt-dlp` is installed and runnable.
    pub async fn verify() -> Result<String> {
        let output = Command::new("yt-dlp")
            .arg("--version")
            .output()
            .await
            .context("Error running yt-dlp")?;

        if !output.status.success() {
            anyhow::bail!("yt-dlp --version exited with {}", output.status);
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl Default for YtDlpSearch {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_entries(stdout: &str) -> Vec<SearchHit> {
    stdout
        .lines()
        .filter_map(|line| serde_json::from_str::<YtDlpEntry>(line).ok())
        .map(YtDlpEntry::into_hit)
        .collect()
}

#[async_trait]
impl SearchProvider for YtDlpSearch {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let _permit = self.rate_limiter.acquire().await?;

        info!("🔍 Searching YouTube: {}", query);

        let search_query = format!("ytsearch{}:{}", limit, query);

        let output = Command::new("yt-dlp")
            .args([
                "--no-playlist",
                "--dump-json",
                "--flat-playlist",
                "--skip-download",
                "--no-warnings",
                &search_query,
            ])
            .output()
            .await
            .context("Error running yt-dlp")?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("yt-dlp error: {}", error);
        }

        let hits = parse_entries(&String::from_utf8_lossy(&output.stdout));
        debug!("yt-dlp returned {} result(s) for {}", hits.len(), query);

        Ok(hits.into_iter().take(limit).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_links_are_direct() {
        assert!(is_direct_link("https://www.youtube.com/watch?v=dQw4w9WgXcQ"));
        assert!(is_direct_link("https://youtu.be/dQw4w9WgXcQ"));
        assert!(is_direct_link("https://music.youtube.com/watch?v=dQw4w9WgXcQ&si=abc"));
        assert!(is_direct_link("https://www.youtube.com/watch?feature=share&v=dQw4w9WgXcQ"));
        assert!(is_direct_link("https://www.youtube.com/shorts/dQw4w9WgXcQ"));
    }

    #[test]
    fn other_text_is_not_direct() {
        assert!(!is_direct_link("never gonna give you up"));
        assert!(!is_direct_link("dQw4w9WgXcQ"));
        assert!(!is_direct_link("https://example.com/video"));
        assert!(!is_direct_link("https://www.youtube.com/playlist?list=PL123"));
        assert!(!is_direct_link("ftp://youtu.be/dQw4w9WgXcQ"));
    }

    #[test]
    fn flat_playlist_lines_become_hits() {
        let stdout = concat!(
            r#"{"id":"dQw4w9WgXcQ","title":"Never Gonna Give You Up","url":"https://www.youtube.com/watch?v=dQw4w9WgXcQ"}"#,
            "\n",
            "WARNING: ignored line\n",
            r#"{"id":"abcdefghijk"}"#,
            "\n",
        );

        let hits = parse_entries(stdout);

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].title, "Never Gonna Give You Up");
        assert_eq!(hits[1].url, "https://www.youtube.com/watch?v=abcdefghijk");
    }
}
