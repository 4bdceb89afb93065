//! Page capture using headless Chrome/Chromium.
//!
//! This module owns the browser session around the scroll engine: it loads
//! the target page, picks the document to work on, drives lazy content to
//! completion and saves the result as MHTML or PDF.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::Page;
use futures_util::StreamExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

pub mod cdp_page;
pub mod export;
pub mod frame;
pub mod scripts;

pub use cdp_page::CdpPage;
pub use export::{OutputFormat, PaperFormat, PdfOptions};
pub use frame::{FrameTarget, ResolvedFrame};

use crate::fs_utils::write_artifact;
use crate::scroll::{drive_to_completion, PageHandle, ScrollConfig, ScrollOutcome, StopReason};

/// Default viewport width in pixels.
pub const DEFAULT_VIEWPORT_WIDTH: u32 = 800;

/// Default viewport height in pixels.
pub const DEFAULT_VIEWPORT_HEIGHT: u32 = 600;

/// Default page load timeout in seconds.
pub const DEFAULT_NAVIGATION_TIMEOUT_SECS: u64 = 60;

/// Default pause after load for client-side rendering, in milliseconds.
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 3000;

/// Browser launch and navigation settings.
#[derive(Debug, Clone)]
pub struct BrowserOptions {
    /// Viewport width in pixels.
    pub viewport_width: u32,
    /// Viewport height in pixels.
    pub viewport_height: u32,
    /// Page load timeout.
    pub navigation_timeout: Duration,
    /// Pause after load before anything else touches the page.
    pub settle_delay: Duration,
    /// Path to Chrome/Chromium executable (None for auto-detection).
    pub chrome_path: Option<String>,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            viewport_width: DEFAULT_VIEWPORT_WIDTH,
            viewport_height: DEFAULT_VIEWPORT_HEIGHT,
            navigation_timeout: Duration::from_secs(DEFAULT_NAVIGATION_TIMEOUT_SECS),
            settle_delay: Duration::from_millis(DEFAULT_SETTLE_DELAY_MS),
            chrome_path: None,
        }
    }
}

/// One page to capture.
#[derive(Debug, Clone)]
pub struct CaptureJob {
    pub url: Url,
    pub frame: FrameTarget,
    /// How long to wait for the target iframe to appear.
    pub frame_wait: Duration,
    /// `None` skips scrolling entirely.
    pub scroll: Option<ScrollConfig>,
    /// Overall scroll budget; the engine is cancelled when it runs out.
    pub scroll_budget: Duration,
    pub format: OutputFormat,
    pub pdf: PdfOptions,
    pub output_path: PathBuf,
}

/// What a finished capture produced.
#[derive(Debug, Clone)]
pub struct CaptureReport {
    pub output_path: PathBuf,
    pub size_bytes: usize,
    /// Scroll result, if scrolling ran.
    pub scroll: Option<ScrollOutcome>,
}

/// Page capture service.
///
/// Manages a headless browser instance for capturing pages.
/// The browser is lazily initialized on first use.
pub struct CaptureService {
    options: BrowserOptions,
    browser: Arc<Mutex<Option<Browser>>>,
}

impl CaptureService {
    /// Create a new capture service.
    #[must_use]
    pub fn new(options: BrowserOptions) -> Self {
        Self {
            options,
            browser: Arc::new(Mutex::new(None)),
        }
    }

    fn viewport(&self) -> (u32, u32) {
        (self.options.viewport_width, self.options.viewport_height)
    }

    /// Initialize the browser if not already running.
    async fn ensure_browser(&self) -> Result<()> {
        let mut browser_guard = self.browser.lock().await;
        if browser_guard.is_some() {
            return Ok(());
        }

        info!("Launching headless browser");

        let mut config_builder = BrowserConfig::builder()
            .window_size(self.options.viewport_width, self.options.viewport_height)
            .request_timeout(self.options.navigation_timeout)
            .no_sandbox()
            .disable_default_args()
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-setuid-sandbox")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-extensions")
            .arg("--disable-sync")
            .arg("--mute-audio");

        if let Some(ref chrome_path) = self.options.chrome_path {
            config_builder = config_builder.chrome_executable(chrome_path);
        }

        let browser_config = config_builder
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .context("Failed to launch browser")?;

        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser handler error: {e}");
                }
            }
        });

        *browser_guard = Some(browser);
        info!("Headless browser launched");

        Ok(())
    }

    /// Load `url` in a new page and let it settle.
    async fn open_page(&self, browser: &Browser, url: &str) -> Result<Page> {
        info!(url = %url, "Loading page");

        let navigation = async {
            let page = browser.new_page(url).await?;
            page.wait_for_navigation().await?;
            Ok::<_, chromiumoxide::error::CdpError>(page)
        };
        let page = tokio::time::timeout(self.options.navigation_timeout, navigation)
            .await
            .with_context(|| {
                format!(
                    "Page load timed out after {:?}: {url}",
                    self.options.navigation_timeout
                )
            })?
            .with_context(|| format!("Failed to load page: {url}"))?;

        debug!(delay = ?self.options.settle_delay, "Page loaded, waiting for dynamic content");
        tokio::time::sleep(self.options.settle_delay).await;

        Ok(page)
    }

    /// Capture the page described by `job` and write it to disk.
    pub async fn capture(&self, job: &CaptureJob) -> Result<CaptureReport> {
        self.ensure_browser().await?;

        let browser_guard = self.browser.lock().await;
        let browser = browser_guard.as_ref().context("Browser not initialized")?;

        let page = self.open_page(browser, job.url.as_str()).await?;
        let result = self.capture_loaded(browser, &page, job).await;

        if let Err(e) = page.close().await {
            warn!("Failed to close page: {e}");
        }

        result
    }

    async fn capture_loaded(
        &self,
        browser: &Browser,
        page: &Page,
        job: &CaptureJob,
    ) -> Result<CaptureReport> {
        match frame::resolve(page, &job.frame, job.frame_wait).await? {
            ResolvedFrame::Top => {
                let handle = CdpPage::top(page.clone(), self.viewport());
                self.scroll_and_save(&handle, job).await
            }
            ResolvedFrame::SameOrigin { selector } => {
                info!(selector = %selector, "Capturing same-origin iframe in place");
                let handle = CdpPage::iframe(page.clone(), &selector, self.viewport());
                self.scroll_and_save(&handle, job).await
            }
            ResolvedFrame::CrossOrigin { src } => {
                warn!(src = %src, "Iframe is cross-origin, opening its source directly");
                let frame_page = self.open_page(browser, src.as_str()).await?;
                let handle = CdpPage::top(frame_page.clone(), self.viewport());
                let result = self.scroll_and_save(&handle, job).await;
                if let Err(e) = frame_page.close().await {
                    warn!("Failed to close iframe page: {e}");
                }
                result
            }
        }
    }

    async fn scroll_and_save(&self, handle: &CdpPage, job: &CaptureJob) -> Result<CaptureReport> {
        let scroll = match &job.scroll {
            Some(config) => Some(scroll_page(handle, config, job.scroll_budget).await?),
            None => None,
        };

        info!(format = job.format.extension(), "Exporting page");
        let data = export::export(handle.page(), job.format, &job.pdf).await?;
        write_artifact(&job.output_path, &data).await?;

        info!(
            path = %job.output_path.display(),
            size = data.len(),
            "Snapshot saved"
        );

        Ok(CaptureReport {
            output_path: job.output_path.clone(),
            size_bytes: data.len(),
            scroll,
        })
    }

    /// Shutdown the browser gracefully.
    pub async fn shutdown(&self) {
        let mut browser_guard = self.browser.lock().await;
        if let Some(mut browser) = browser_guard.take() {
            if let Err(e) = browser.close().await {
                error!("Failed to close browser: {e}");
            } else {
                info!("Browser shutdown complete");
            }
        }
    }
}

/// Run the scroll engine under `budget`, skipping it if the target is
/// already populated.
pub async fn scroll_page<P>(page: &P, config: &ScrollConfig, budget: Duration) -> Result<ScrollOutcome>
where
    P: PageHandle + ?Sized,
{
    if let Some(selector) = config.completion_selector.as_deref() {
        match page.query_element_state(selector).await {
            Ok(state) if state.populated => {
                info!(selector = %selector, "Completion target already populated, skipping scroll");
                return Ok(ScrollOutcome {
                    iterations_performed: 0,
                    final_metric: 0.0,
                    reason: StopReason::ConvergedTargetPopulated,
                    transient_failures: 0,
                    cancelled: false,
                });
            }
            Ok(state) => {
                debug!(selector = %selector, present = state.present, "Completion target not populated yet");
            }
            Err(e) => debug!(selector = %selector, error = %e, "Completion target probe failed"),
        }
    }

    let cancel = CancellationToken::new();
    let timer = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(budget).await;
            cancel.cancel();
        })
    };

    let outcome = drive_to_completion(page, config, &cancel).await;
    timer.abort();

    outcome.context("Scrolling failed")
}
