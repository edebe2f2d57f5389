use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::collections::{HashMap, HashSet};
use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use super::sweep;
use super::{BrowserSession, SessionProvider, UserAgentRotation};
use crate::config::BrowserConfig;
use crate::utils::error::{AppError, Result};

// Extra time granted to a blocking CDP call beyond its own timeout before the
// async side gives up on it.
const BLOCKING_GRACE: Duration = Duration::from_secs(5);

/// One headless Chrome process per session.
pub struct ChromeSessionProvider {
    config: BrowserConfig,
    user_agents: UserAgentRotation,
    // session id -> browser pid
    live: Arc<Mutex<HashMap<Uuid, Option<u32>>>>,
}

pub struct ChromeSession {
    id: Uuid,
    // Dropping the browser kills its process.
    _browser: Browser,
    tab: Arc<Tab>,
}

impl ChromeSessionProvider {
    pub fn new(config: BrowserConfig) -> Self {
        let user_agents = UserAgentRotation::new(config.user_agents.clone());
        Self {
            config,
            user_agents,
            live: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn launch_options(config: &BrowserConfig) -> Result<LaunchOptions<'static>> {
        let mut launch_options = LaunchOptions::default_builder()
            .headless(config.headless)
            .sandbox(false) // Often needed in containerized environments
            .window_size(Some((config.window_width, config.window_height)))
            .idle_browser_timeout(config.page_load_timeout() + BLOCKING_GRACE)
            .args(vec![
                OsStr::new("--disable-dev-shm-usage"),
                OsStr::new("--disable-gpu"),
                OsStr::new("--disable-extensions"),
                OsStr::new("--disable-background-timer-throttling"),
                OsStr::new("--disable-backgrounding-occluded-windows"),
                OsStr::new("--disable-renderer-backgrounding"),
            ])
            .build()
            .map_err(|e| AppError::Browser(format!("Failed to create launch options: {}", e)))?;

        // Set Chrome path if provided
        if let Some(chrome_path) = &config.chrome_path {
            launch_options.path = Some(PathBuf::from(chrome_path));
        }

        Ok(launch_options)
    }

    fn tracked_pids(&self) -> HashSet<u32> {
        self.live
            .lock()
            .map(|live| live.values().flatten().copied().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl SessionProvider for ChromeSessionProvider {
    fn name(&self) -> &str {
        "chrome"
    }

    async fn acquire_session(&self) -> Result<Box<dyn BrowserSession>> {
        let config = self.config.clone();
        let user_agent = self.user_agents.next();
        let page_timeout = config.page_load_timeout();

        let launched = tokio::task::spawn_blocking(move || -> Result<(Browser, Arc<Tab>)> {
            let options = Self::launch_options(&config)?;
            let browser = Browser::new(options)
                .map_err(|e| AppError::Session(format!("Failed to launch browser: {}", e)))?;
            let tab = browser
                .new_tab()
                .map_err(|e| AppError::Session(format!("Failed to create tab: {}", e)))?;

            tab.set_default_timeout(page_timeout);
            if let Some(user_agent) = user_agent.as_deref() {
                tab.set_user_agent(user_agent, None, None)
                    .map_err(|e| AppError::Session(format!("Failed to set user agent: {}", e)))?;
            }

            Ok((browser, tab))
        })
        .await
        .map_err(|e| AppError::Session(format!("Browser launch task failed: {}", e)))??;

        let (browser, tab) = launched;
        let id = Uuid::new_v4();
        let pid = browser.get_process_id();

        if let Ok(mut live) = self.live.lock() {
            live.insert(id, pid);
        }
        tracing::debug!("Launched browser session {} (pid {:?})", id, pid);

        Ok(Box::new(ChromeSession {
            id,
            _browser: browser,
            tab,
        }))
    }

    fn release_session(&self, session: Box<dyn BrowserSession>) {
        let id = session.id();
        if let Ok(mut live) = self.live.lock() {
            live.remove(&id);
        }
        drop(session);
    }

    async fn terminate_orphans(&self) -> Result<usize> {
        let tracked = self.tracked_pids();
        let names = self.config.orphan_process_names.clone();

        tokio::task::spawn_blocking(move || sweep::terminate_untracked(&names, &tracked))
            .await
            .map_err(|e| AppError::Internal(format!("Orphan sweep task failed: {}", e)))
    }

    fn live_sessions(&self) -> usize {
        self.live.lock().map(|live| live.len()).unwrap_or(0)
    }
}

/// Runs a blocking CDP call off the async runtime with an outer deadline.
async fn run_blocking<T, F>(
    tab: Arc<Tab>,
    operation: String,
    timeout: Duration,
    call: F,
) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(Arc<Tab>) -> Result<T> + Send + 'static,
{
    let handle = tokio::task::spawn_blocking(move || call(tab));

    match tokio::time::timeout(timeout + BLOCKING_GRACE, handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(AppError::Internal(format!("{} task failed: {}", operation, e))),
        Err(_) => Err(AppError::Timeout {
            operation,
            seconds: timeout.as_secs(),
        }),
    }
}

#[async_trait]
impl BrowserSession for ChromeSession {
    fn id(&self) -> Uuid {
        self.id
    }

    async fn fetch(&mut self, url: &str, timeout: Duration) -> Result<String> {
        let target = url.to_string();
        run_blocking(Arc::clone(&self.tab), format!("navigate {}", url), timeout, move |tab| {
            tab.set_default_timeout(timeout);
            tab.navigate_to(&target)
                .map_err(|e| AppError::Browser(format!("Navigation failed: {}", e)))?;
            tab.wait_until_navigated()
                .map_err(|e| AppError::Browser(format!("Page load failed: {}", e)))?;
            tab.get_content()
                .map_err(|e| AppError::Browser(format!("Failed to get page content: {}", e)))
        })
        .await
    }

    async fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<()> {
        let target = selector.to_string();
        run_blocking(Arc::clone(&self.tab), format!("wait for {}", selector), timeout, move |tab| {
            tab.wait_for_element_with_custom_timeout(&target, timeout)
                .map(|_| ())
                .map_err(|_| AppError::ElementNotFound { selector: target })
        })
        .await
    }

    async fn run_script(&mut self, script: &str) -> Result<serde_json::Value> {
        let script = script.to_string();
        let timeout = Duration::from_secs(30);
        run_blocking(Arc::clone(&self.tab), "evaluate script".to_string(), timeout, move |tab| {
            let result = tab
                .evaluate(&script, false)
                .map_err(|e| AppError::Browser(format!("Script evaluation failed: {}", e)))?;
            Ok(result.value.unwrap_or(serde_json::Value::Null))
        })
        .await
    }

    async fn click(&mut self, selector: &str, timeout: Duration) -> Result<()> {
        let target = selector.to_string();
        run_blocking(Arc::clone(&self.tab), format!("click {}", selector), timeout, move |tab| {
            let element = tab
                .wait_for_element_with_custom_timeout(&target, timeout)
                .map_err(|_| AppError::ElementNotFound {
                    selector: target.clone(),
                })?;
            element
                .click()
                .map(|_| ())
                .map_err(|e| AppError::Browser(format!("Click on '{}' failed: {}", target, e)))
        })
        .await
    }

    async fn content(&mut self) -> Result<String> {
        let timeout = Duration::from_secs(30);
        run_blocking(Arc::clone(&self.tab), "read content".to_string(), timeout, |tab| {
            tab.get_content()
                .map_err(|e| AppError::Browser(format!("Failed to get page content: {}", e)))
        })
        .await
    }
}
