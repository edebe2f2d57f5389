//! Browser session management.
//!
//! A [`SessionProvider`] hands out exclusive [`BrowserSession`]s. Callers hold
//! them through a [`SessionLease`], which gives the session back on every exit
//! path, including early returns, panics and cancelled futures.

use async_trait::async_trait;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use uuid::Uuid;

use crate::config::{BrowserConfig, SessionBackend};
use crate::utils::error::Result;

pub mod chrome;
pub mod http;
pub mod sweep;

pub use chrome::ChromeSessionProvider;
pub use http::HttpSessionProvider;

/// One exclusively owned page handle (a browser process or an HTTP client).
#[async_trait]
pub trait BrowserSession: Send {
    fn id(&self) -> Uuid;

    /// Navigates and returns the rendered markup.
    async fn fetch(&mut self, url: &str, timeout: Duration) -> Result<String>;

    /// Blocks until `selector` matches in the current page or `timeout` elapses.
    async fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<()>;

    async fn run_script(&mut self, script: &str) -> Result<serde_json::Value>;

    async fn click(&mut self, selector: &str, timeout: Duration) -> Result<()>;

    /// Markup of the current page, after any scripts or clicks.
    async fn content(&mut self) -> Result<String>;
}

#[async_trait]
pub trait SessionProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn acquire_session(&self) -> Result<Box<dyn BrowserSession>>;

    /// Untracks and tears down a session. Never fails.
    fn release_session(&self, session: Box<dyn BrowserSession>);

    /// Kills browser processes that no live session owns. Returns the kill count.
    async fn terminate_orphans(&self) -> Result<usize>;

    fn live_sessions(&self) -> usize;
}

/// Scoped session ownership; releases on drop.
pub struct SessionLease<'a> {
    provider: &'a dyn SessionProvider,
    session: Option<Box<dyn BrowserSession>>,
}

impl<'a> SessionLease<'a> {
    pub async fn acquire(provider: &'a dyn SessionProvider) -> Result<Self> {
        let session = provider.acquire_session().await?;
        tracing::debug!("Acquired {} session {}", provider.name(), session.id());
        Ok(Self {
            provider,
            session: Some(session),
        })
    }
}

impl Deref for SessionLease<'_> {
    type Target = dyn BrowserSession;

    fn deref(&self) -> &Self::Target {
        // Only `drop` takes the session out.
        self.session.as_deref().expect("session present until drop")
    }
}

impl DerefMut for SessionLease<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.session.as_deref_mut().expect("session present until drop")
    }
}

impl Drop for SessionLease<'_> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            tracing::debug!("Releasing {} session {}", self.provider.name(), session.id());
            self.provider.release_session(session);
        }
    }
}

/// Round-robin user agent rotation shared by a provider's sessions.
#[derive(Debug)]
pub(crate) struct UserAgentRotation {
    agents: Vec<String>,
    next: AtomicUsize,
}

impl UserAgentRotation {
    pub(crate) fn new(agents: Vec<String>) -> Self {
        Self {
            agents,
            next: AtomicUsize::new(0),
        }
    }

    pub(crate) fn next(&self) -> Option<String> {
        if self.agents.is_empty() {
            return None;
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.agents.len();
        Some(self.agents[index].clone())
    }
}

pub fn build_provider(config: &BrowserConfig) -> Result<Arc<dyn SessionProvider>> {
    Ok(match config.backend {
        SessionBackend::Chrome => Arc::new(ChromeSessionProvider::new(config.clone())),
        SessionBackend::Http => Arc::new(HttpSessionProvider::new(config.clone())?),
    })
}
