use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, ORIGIN, REFERER, USER_AGENT};
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;
use url::Url;
use uuid::Uuid;

use super::{BrowserSession, SessionProvider, UserAgentRotation};
use crate::config::BrowserConfig;
use crate::utils::error::{AppError, Result};

/// Plain HTTP sessions for pages that render server-side. No processes to
/// leak, so the orphan sweep is a no-op.
pub struct HttpSessionProvider {
    client: Client,
    config: BrowserConfig,
    user_agents: UserAgentRotation,
    live: Mutex<HashSet<Uuid>>,
}

pub struct HttpSession {
    id: Uuid,
    client: Client,
    headers: HeaderMap,
    last_markup: Option<String>,
}

impl HttpSessionProvider {
    pub fn new(config: BrowserConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.page_load_timeout())
            .build()?;
        let user_agents = UserAgentRotation::new(config.user_agents.clone());

        Ok(Self {
            client,
            config,
            user_agents,
            live: Mutex::new(HashSet::new()),
        })
    }

    fn session_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/json,text/plain,*/*"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

        if let Some(user_agent) = self.user_agents.next() {
            headers.insert(USER_AGENT, header_value(&user_agent)?);
        }

        if let Some(referer) = &self.config.referer {
            headers.insert(REFERER, header_value(referer)?);
            if let Ok(url) = Url::parse(referer) {
                let origin = url.origin().ascii_serialization();
                headers.insert(ORIGIN, header_value(&origin)?);
            }
        }

        Ok(headers)
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| AppError::Session(format!("Invalid header value '{}': {}", value, e)))
}

fn markup_contains(markup: &str, selector: &str) -> Result<bool> {
    let selector = Selector::parse(selector)
        .map_err(|e| AppError::parse(format!("Invalid CSS selector '{}': {:?}", selector, e)))?;
    let document = Html::parse_document(markup);
    let found = document.select(&selector).next().is_some();
    Ok(found)
}

#[async_trait]
impl SessionProvider for HttpSessionProvider {
    fn name(&self) -> &str {
        "http"
    }

    async fn acquire_session(&self) -> Result<Box<dyn BrowserSession>> {
        let headers = self.session_headers()?;
        let id = Uuid::new_v4();

        if let Ok(mut live) = self.live.lock() {
            live.insert(id);
        }

        Ok(Box::new(HttpSession {
            id,
            client: self.client.clone(),
            headers,
            last_markup: None,
        }))
    }

    fn release_session(&self, session: Box<dyn BrowserSession>) {
        if let Ok(mut live) = self.live.lock() {
            live.remove(&session.id());
        }
    }

    async fn terminate_orphans(&self) -> Result<usize> {
        Ok(0)
    }

    fn live_sessions(&self) -> usize {
        self.live.lock().map(|live| live.len()).unwrap_or(0)
    }
}

#[async_trait]
impl BrowserSession for HttpSession {
    fn id(&self) -> Uuid {
        self.id
    }

    async fn fetch(&mut self, url: &str, timeout: Duration) -> Result<String> {
        let response = self
            .client
            .get(url)
            .headers(self.headers.clone())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Timeout {
                        operation: format!("GET {}", url),
                        seconds: timeout.as_secs(),
                    }
                } else {
                    AppError::Http(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Browser(format!(
                "GET {} returned HTTP {}",
                url, status
            )));
        }

        let body = response.text().await?;
        self.last_markup = Some(body.clone());
        Ok(body)
    }

    async fn wait_for(&mut self, selector: &str, _timeout: Duration) -> Result<()> {
        // Nothing renders after the response arrives, so one check decides.
        let markup = self.last_markup.as_deref().unwrap_or_default();
        if markup_contains(markup, selector)? {
            Ok(())
        } else {
            Err(AppError::ElementNotFound {
                selector: selector.to_string(),
            })
        }
    }

    async fn run_script(&mut self, _script: &str) -> Result<serde_json::Value> {
        Err(AppError::Unsupported {
            backend: "http".to_string(),
            operation: "run_script".to_string(),
        })
    }

    async fn click(&mut self, _selector: &str, _timeout: Duration) -> Result<()> {
        Err(AppError::Unsupported {
            backend: "http".to_string(),
            operation: "click".to_string(),
        })
    }

    async fn content(&mut self) -> Result<String> {
        self.last_markup
            .clone()
            .ok_or_else(|| AppError::Browser("No page fetched in this session".to_string()))
    }
}
