//! Choosing which document inside a page gets scrolled and captured.

use std::time::Duration;

use anyhow::{Context, Result};
use chromiumoxide::Page;
use tracing::{debug, warn};
use url::Url;

use super::scripts;

/// Poll interval while waiting for a selector to appear.
const SELECTOR_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Where the snapshot is taken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameTarget {
    /// The page's own document.
    Top,
    /// The document inside the first iframe matching `selector`.
    Iframe { selector: String },
}

/// How a [`FrameTarget`] is reached on a loaded page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedFrame {
    Top,
    /// Same-origin iframe; its `contentDocument` is scriptable from the page.
    SameOrigin { selector: String },
    /// Cross-origin iframe; it has to be opened on its own.
    CrossOrigin { src: Url },
}

/// Classify an iframe `src` relative to the page that embeds it.
///
/// An empty or `about:` source inherits the embedder's origin.
#[must_use]
pub fn classify_iframe(page_url: &Url, selector: &str, src: &str) -> ResolvedFrame {
    let same_origin = || ResolvedFrame::SameOrigin {
        selector: selector.to_string(),
    };
    if src.is_empty() || src.starts_with("about:") {
        return same_origin();
    }
    match page_url.join(src) {
        Ok(src) if src.origin() == page_url.origin() => same_origin(),
        Ok(src) => ResolvedFrame::CrossOrigin { src },
        Err(e) => {
            warn!(src = %src, error = %e, "Unparseable iframe src, treating as same-origin");
            same_origin()
        }
    }
}

/// Poll until `selector` matches in the top document.
///
/// Returns `false` if `timeout` elapses first.
pub async fn wait_for_selector(page: &Page, selector: &str, timeout: Duration) -> Result<bool> {
    let script = scripts::selector_present(selector);
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match page.evaluate(script.as_str()).await {
            Ok(result) => {
                if result.into_value::<bool>().unwrap_or(false) {
                    return Ok(true);
                }
            }
            Err(e) => debug!(selector = %selector, error = %e, "Selector probe failed"),
        }

        let now = tokio::time::Instant::now();
        if now >= deadline {
            return Ok(false);
        }
        tokio::time::sleep(SELECTOR_POLL_INTERVAL.min(deadline - now)).await;
    }
}

/// Resolve `target` on a loaded page.
///
/// # Errors
///
/// Returns an error if the iframe never appears within `wait`.
pub async fn resolve(page: &Page, target: &FrameTarget, wait: Duration) -> Result<ResolvedFrame> {
    let selector = match target {
        FrameTarget::Top => return Ok(ResolvedFrame::Top),
        FrameTarget::Iframe { selector } => selector,
    };

    if !wait_for_selector(page, selector, wait).await? {
        anyhow::bail!("No iframe matching '{selector}' appeared within {wait:?}");
    }

    let src: Option<String> = page
        .evaluate(scripts::iframe_src(selector))
        .await
        .context("Failed to read iframe src")?
        .into_value()
        .context("Unexpected iframe src value")?;
    let src = src.with_context(|| format!("Iframe '{selector}' disappeared"))?;

    let page_url = page
        .url()
        .await
        .context("Failed to read page URL")?
        .context("Page has no URL")?;
    let page_url = Url::parse(&page_url).with_context(|| format!("Invalid page URL: {page_url}"))?;

    let resolved = classify_iframe(&page_url, selector, &src);
    debug!(src = %src, resolved = ?resolved, "Resolved iframe target");
    Ok(resolved)
}
