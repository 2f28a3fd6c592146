use anyhow::{anyhow, Result};
use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::{ContentKind, PageFetcher, RawContent};
use crate::config::ScraperConfig;
use crate::models::{NavigationStep, SourceConfig};
use crate::utils::error::FetchError;

/// How often the tab is re-read while waiting for a pager click to land.
const PAGE_CHANGE_POLL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
pub struct BrowserOptions {
    pub headless: bool,
    pub chrome_path: Option<String>,
    pub user_agent: String,
    pub step_timeout: Duration,
    /// Upper bound on how long Chrome may sit idle before the driver gives up on it.
    pub idle_timeout: Duration,
}

impl BrowserOptions {
    pub fn from_config(config: &ScraperConfig) -> Self {
        Self {
            headless: config.headless,
            chrome_path: config.chrome_path.clone(),
            user_agent: config.user_agent.clone(),
            step_timeout: config.step_timeout(),
            idle_timeout: config.request_timeout(),
        }
    }
}

/// One Chrome process plus one tab, scoped to a single source fetch.
///
/// Dropping the session closes the tab and then the `Browser`, which kills
/// the Chrome process. That holds on every exit path, including a panic
/// unwinding out of the blocking task.
pub struct BrowserSession {
    tab: Arc<Tab>,
    // Declared after `tab` so the tab closes before the process goes away.
    _browser: Browser,
    step_timeout: Duration,
}

impl BrowserSession {
    pub fn launch(options: &BrowserOptions) -> Result<Self> {
        let mut launch_options = LaunchOptions::default_builder()
            .headless(options.headless)
            .sandbox(false) // Often needed in containerized environments
            .idle_browser_timeout(options.idle_timeout.max(options.step_timeout))
            .args(vec![
                OsStr::new("--no-sandbox"),
                OsStr::new("--disable-dev-shm-usage"),
                OsStr::new("--disable-gpu"),
                OsStr::new("--disable-extensions"),
                OsStr::new("--disable-background-timer-throttling"),
                OsStr::new("--disable-renderer-backgrounding"),
            ])
            .build()
            .map_err(|e| anyhow!("Failed to create launch options: {}", e))?;

        if let Some(chrome_path) = &options.chrome_path {
            launch_options.path = Some(std::path::PathBuf::from(chrome_path));
        }

        let browser = Browser::new(launch_options).map_err(|e| anyhow!("Failed to launch browser: {}", e))?;

        let tab = browser.new_tab().map_err(|e| anyhow!("Failed to create tab: {}", e))?;
        tab.set_default_timeout(options.step_timeout);
        tab.set_user_agent(&options.user_agent, None, None)
            .map_err(|e| anyhow!("Failed to set user agent: {}", e))?;

        Ok(Self {
            tab,
            _browser: browser,
            step_timeout: options.step_timeout,
        })
    }

    pub fn navigate(&self, url: &str) -> Result<(), FetchError> {
        self.tab
            .navigate_to(url)
            .map_err(|e| FetchError::from_browser("navigate", &e))?;
        self.tab
            .wait_until_navigated()
            .map_err(|e| FetchError::from_browser("page load", &e))?;
        Ok(())
    }

    pub fn wait_for(&self, selector: &str) -> Result<(), FetchError> {
        self.tab
            .wait_for_element_with_custom_timeout(selector, self.step_timeout)
            .map(|_| ())
            .map_err(|e| FetchError::NotReady(format!("wait for '{}': {}", selector, e)))
    }

    pub fn run_step(&self, step: &NavigationStep) -> Result<(), FetchError> {
        debug!(?step, "Running navigation step");
        match step {
            NavigationStep::Click { selector } => {
                let element = self
                    .tab
                    .wait_for_element_with_custom_timeout(selector, self.step_timeout)
                    .map_err(|e| FetchError::NotReady(format!("click '{}': {}", selector, e)))?;
                element
                    .click()
                    .map_err(|e| FetchError::from_browser("click", &e))?;
            }
            NavigationStep::WaitFor { selector } => self.wait_for(selector)?,
            NavigationStep::SleepMs { ms } => std::thread::sleep(sleep_duration(*ms, self.step_timeout)),
            NavigationStep::Evaluate { script } => {
                self.tab
                    .evaluate(script, true)
                    .map_err(|e| FetchError::from_browser("evaluate", &e))?;
            }
        }
        Ok(())
    }

    pub fn content(&self) -> Result<String, FetchError> {
        self.tab
            .get_content()
            .map_err(|e| FetchError::from_browser("read content", &e))
    }

    pub fn current_url(&self, fallback: &str) -> String {
        let url = self.tab.get_url();
        if url.is_empty() || url == "about:blank" {
            fallback.to_string()
        } else {
            url
        }
    }
}

impl Pager for BrowserSession {
    fn click_next(&self, selector: &str) -> Result<bool, FetchError> {
        let element = match self.tab.find_element(selector) {
            Ok(element) => element,
            Err(_) => return Ok(false),
        };
        element
            .click()
            .map_err(|e| FetchError::from_browser("next page", &e))?;
        self.tab
            .wait_until_navigated()
            .map_err(|e| FetchError::from_browser("next page load", &e))?;
        Ok(true)
    }

    fn wait_for(&self, selector: &str) -> Result<(), FetchError> {
        BrowserSession::wait_for(self, selector)
    }

    fn content(&self) -> Result<String, FetchError> {
        BrowserSession::content(self)
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        if let Err(e) = self.tab.close(true) {
            debug!("Tab close on session drop failed: {}", e);
        }
    }
}

/// What pagination needs from a tab.
pub trait Pager {
    /// Click the next-page link. Returns false when there is none.
    fn click_next(&self, selector: &str) -> Result<bool, FetchError>;

    fn wait_for(&self, selector: &str) -> Result<(), FetchError>;

    fn content(&self) -> Result<String, FetchError>;
}

/// A `SleepMs` step never waits longer than one step timeout.
fn sleep_duration(ms: u64, step_timeout: Duration) -> Duration {
    let requested = Duration::from_millis(ms);
    if requested > step_timeout {
        warn!(?requested, ?step_timeout, "Sleep step capped at step timeout");
    }
    requested.min(step_timeout)
}

/// Follow `source.next_page` until the link disappears or `max_pages` pages
/// are held.
///
/// Clicks often update the listing in place, so after each click the content
/// is re-read until it differs from the previous page. A click that leaves
/// the page unchanged for `step_timeout` is `NotReady`.
pub fn follow_pager<P: Pager>(
    pager: &P,
    source: &SourceConfig,
    pages: &mut Vec<String>,
    step_timeout: Duration,
    poll: Duration,
) -> Result<(), FetchError> {
    let Some(next_selector) = source.next_page.as_deref() else {
        return Ok(());
    };

    while pages.len() < source.max_pages {
        if !pager.click_next(next_selector)? {
            debug!(source = %source.name, pages = pages.len(), "No further pages");
            break;
        }

        let deadline = Instant::now() + step_timeout;
        let mut body = pager.content()?;
        while pages.last() == Some(&body) {
            if Instant::now() >= deadline {
                return Err(FetchError::NotReady(format!(
                    "page {} did not change within {:?} after clicking '{}'",
                    pages.len() + 1,
                    step_timeout,
                    next_selector
                )));
            }
            std::thread::sleep(poll);
            body = pager.content()?;
        }

        if let Some(selector) = source.wait_for.as_deref() {
            pager.wait_for(selector)?;
            body = pager.content()?;
        }
        pages.push(body);
    }
    Ok(())
}

/// Renders sources in headless Chrome. A fresh session is launched for
/// every fetch attempt.
#[derive(Clone)]
pub struct BrowserFetcher {
    options: BrowserOptions,
}

impl BrowserFetcher {
    pub fn new(options: BrowserOptions) -> Self {
        Self { options }
    }

    fn fetch_blocking(options: &BrowserOptions, source: &SourceConfig) -> Result<RawContent, FetchError> {
        let session = BrowserSession::launch(options).map_err(|e| {
            FetchError::Browser(format!("launch: {:#}", e))
        })?;

        session.navigate(&source.url)?;

        if let Some(selector) = &source.wait_for {
            session.wait_for(selector)?;
        }

        for step in &source.navigation {
            session.run_step(step)?;
        }

        let mut content = RawContent::single(
            source,
            session.current_url(&source.url),
            ContentKind::Html,
            session.content()?,
        );

        follow_pager(
            &session,
            source,
            &mut content.pages,
            options.step_timeout,
            PAGE_CHANGE_POLL,
        )?;

        debug!(
            source = %source.name,
            pages = content.pages.len(),
            bytes = content.total_bytes(),
            "Browser fetch complete"
        );
        Ok(content)
    }
}

#[async_trait]
impl PageFetcher for BrowserFetcher {
    async fn fetch(&self, source: &SourceConfig) -> Result<RawContent, FetchError> {
        let options = self.options.clone();
        let source = source.clone();

        tokio::task::spawn_blocking(move || Self::fetch_blocking(&options, &source))
            .await
            .map_err(|e| FetchError::Browser(format!("browser task failed: {}", e)))?
    }
}
