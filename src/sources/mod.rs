//! # Playback Resolver
//!
//! Turns the free-form text after `!tplay` into a [`SourceDescriptor`].
//! Pasted video links short-circuit to a direct descriptor; anything else is
//! a single top-1 search against the [`SearchProvider`].

pub mod youtube;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{BotError, BotResult};

pub use youtube::YtDlpSearch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    DirectLink,
    SearchResult,
}

/// A resolved, streamable source. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescriptor {
    query: String,
    url: String,
    title: Option<String>,
    kind: SourceKind,
}

impl SourceDescriptor {
    pub fn direct(query: &str) -> Self {
        Self {
            query: query.to_string(),
            url: query.to_string(),
            title: None,
            kind: SourceKind::DirectLink,
        }
    }

    pub fn from_search(query: &str, hit: SearchHit) -> Self {
        Self {
            query: query.to_string(),
            url: hit.url,
            title: Some(hit.title),
            kind: SourceKind::SearchResult,
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }
    pub fn url(&self) -> &str {
        &self.url
    }
    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }
    pub fn kind(&self) -> SourceKind {
        self.kind
    }
}

/// One search candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
}

/// External text search over playable media.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Best matches first, at most `limit` of them.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>>;
}

pub struct Resolver {
    provider: Arc<dyn SearchProvider>,
}

impl Resolver {
    pub fn new(provider: Arc<dyn SearchProvider>) -> Self {
        Self { provider }
    }

    pub async fn resolve(&self, query: &str) -> BotResult<SourceDescriptor> {
        let query = query.trim();

        if youtube::is_direct_link(query) {
            debug!("🔗 Direct link, skipping search: {}", query);
            return Ok(SourceDescriptor::direct(query));
        }

        info!("🔍 Searching: {}", query);
        let hits = self.provider.search(query, 1).await.map_err(|e| {
            warn!("Search provider failed for `{}`: {:?}", query, e);
            BotError::PlaybackFailure(format!("search failed: {e}"))
        })?;

        hits.into_iter()
            .next()
            .map(|hit| SourceDescriptor::from_search(query, hit))
            .ok_or_else(|| BotError::NoResults(query.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn direct_link_never_searches() {
        let mut provider = MockSearchProvider::new();
        provider.expect_search().times(0);
        let resolver = Resolver::new(Arc::new(provider));

        let url = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";
        let source = resolver.resolve(url).await.unwrap();

        assert_eq!(source.kind(), SourceKind::DirectLink);
        assert_eq!(source.url(), url);
    }

    #[tokio::test]
    async fn text_query_searches_once_for_top_result() {
        let mut provider = MockSearchProvider::new();
        provider
            .expect_search()
            .with(eq("never gonna give you up"), eq(1))
            .times(1)
            .returning(|_, _| {
                Ok(vec![SearchHit {
                    title: "Rick Astley - Never Gonna Give You Up".into(),
                    url: "https://www.youtube.com/watch?v=dQw4w9WgXcQ".into(),
                }])
            });
        let resolver = Resolver::new(Arc::new(provider));

        let source = resolver.resolve("never gonna give you up").await.unwrap();

        assert_eq!(source.kind(), SourceKind::SearchResult);
        assert_eq!(source.query(), "never gonna give you up");
        assert_eq!(source.url(), "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
    }

    #[tokio::test]
    async fn empty_search_is_no_results() {
        let mut provider = MockSearchProvider::new();
        provider.expect_search().times(1).returning(|_, _| Ok(Vec::new()));
        let resolver = Resolver::new(Arc::new(provider));

        let err = resolver.resolve("zzzz nothing matches").await.unwrap_err();
        assert!(matches!(err, BotError::NoResults(q) if q == "zzzz nothing matches"));
    }

    #[tokio::test]
    async fn provider_failure_is_playback_failure() {
        let mut provider = MockSearchProvider::new();
        provider
            .expect_search()
            .returning(|_, _| Err(anyhow::anyhow!("yt-dlp not installed")));
        let resolver = Resolver::new(Arc::new(provider));

        let err = resolver.resolve("lofi beats").await.unwrap_err();
        assert!(matches!(err, BotError::PlaybackFailure(_)));
    }
}
