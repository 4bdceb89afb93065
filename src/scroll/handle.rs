//! Capabilities the scroll engine needs from a live document.
//!
//! A [`PageHandle`] is borrowed for the duration of one engine run. It can
//! measure the document, dispatch scroll input, probe the completion target
//! and report the scroll ancestry of an element. Browser lifecycle is never
//! its concern.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use super::container::ScrollBox;

/// Interval between probes in the default growth wait.
pub const GROWTH_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Error messages that mean the document context is gone for good.
const FATAL_MARKERS: &[&str] = &[
    "cannot find context with specified id",
    "execution context was destroyed",
    "target closed",
    "no target with given id",
    "session with given id not found",
    "inspected target navigated or closed",
    "channel closed",
];

#[derive(Debug, Error)]
pub enum HandleError {
    /// A single probe failed; the next one may succeed.
    #[error("transient page error: {0}")]
    Transient(String),
    /// The document context has been destroyed or navigated away.
    #[error("page context destroyed: {0}")]
    ContextDestroyed(String),
}

impl HandleError {
    /// Classify a raw driver error message.
    #[must_use]
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if FATAL_MARKERS.iter().any(|marker| lower.contains(marker)) {
            Self::ContextDestroyed(message)
        } else {
            Self::Transient(message)
        }
    }

    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ContextDestroyed(_))
    }
}

/// Which scroller a drive step or offset measurement applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScrollTarget {
    /// The whole-document viewport.
    Viewport,
    /// The ancestor `depth` levels above the element matched by `selector`.
    Ancestor { selector: String, depth: usize },
}

/// A measurable convergence metric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Metric {
    /// `scrollHeight` of the document body.
    DocumentHeight,
    /// `scrollTop` of the given scroller.
    ScrollOffset(ScrollTarget),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollKey {
    PageDown,
    End,
}

impl ScrollKey {
    /// DOM `KeyboardEvent.key` value.
    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            Self::PageDown => "PageDown",
            Self::End => "End",
        }
    }

    /// Windows virtual key code, needed by Chromium to act on the key.
    #[must_use]
    pub fn virtual_key_code(self) -> i64 {
        match self {
            Self::PageDown => 34,
            Self::End => 35,
        }
    }
}

/// One synthetic scroll input.
#[derive(Debug, Clone, PartialEq)]
pub enum ScrollAction {
    /// Mouse wheel event scrolling down by `delta_y` pixels.
    Wheel { delta_y: f64 },
    /// Key press (key down followed by key up).
    Key(ScrollKey),
    /// Direct `scrollTop` increment on a scroller, bypassing input events.
    Offset { target: ScrollTarget, by: f64 },
}

/// Presence and population of the completion target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
pub struct ElementState {
    pub present: bool,
    pub populated: bool,
}

#[async_trait]
pub trait PageHandle: Send + Sync {
    /// Evaluate a read-only measurement against the document.
    async fn measure(&self, metric: &Metric) -> Result<f64, HandleError>;

    /// Synthesize one scroll input.
    async fn dispatch_scroll(&self, action: &ScrollAction) -> Result<(), HandleError>;

    /// Check whether `selector` resolves and holds non-empty data content.
    async fn query_element_state(&self, selector: &str) -> Result<ElementState, HandleError>;

    /// Scroll boxes of the ancestors of the element matched by `selector`,
    /// innermost first, excluding `<body>` and `<html>`.
    ///
    /// Returns `None` when nothing matches.
    async fn scroll_ancestry(&self, selector: &str) -> Result<Option<Vec<ScrollBox>>, HandleError>;

    /// Suspend until `metric` exceeds `previous` or `timeout` elapses.
    ///
    /// Returns `false` on timeout. Transient probe failures during the wait
    /// are swallowed.
    async fn wait_for_growth(
        &self,
        metric: &Metric,
        previous: f64,
        timeout: Duration,
    ) -> Result<bool, HandleError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.measure(metric).await {
                Ok(value) if value > previous => return Ok(true),
                Ok(_) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => debug!(error = %e, "Growth probe failed"),
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(GROWTH_POLL_INTERVAL.min(deadline - now)).await;
        }
    }
}
