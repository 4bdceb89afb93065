//! Scroll-to-completion engine.
//!
//! Drives a document (or frame) forward until lazily loaded content stops
//! growing, a completion target gets populated, or the iteration cap is hit.
//! Running out of iterations is a normal outcome and is reported through
//! [`StopReason::MaxIterationsReached`], never as an error.

use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

mod container;
mod handle;

pub use container::{nearest_scrollable, ScrollBox};
pub use handle::{
    ElementState, HandleError, Metric, PageHandle, ScrollAction, ScrollKey, ScrollTarget,
};

use handle::GROWTH_POLL_INTERVAL;

/// Metrics closer than this are treated as unchanged.
pub const METRIC_TOLERANCE: f64 = 0.5;

/// Default cap on a single growth wait in milliseconds.
pub const DEFAULT_ITERATION_TIMEOUT_MS: u64 = 10_000;

/// How each iteration pushes the document forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveStrategy {
    /// Synthetic mouse wheel event of `step_size` pixels.
    WheelDelta,
    /// Synthetic "PageDown" key press, with a closing "End" press.
    KeyPress,
    /// Direct `scrollTop` increment on the nearest scrollable ancestor of
    /// the completion target.
    ContainerScroll,
}

impl DriveStrategy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WheelDelta => "wheel",
            Self::KeyPress => "key",
            Self::ContainerScroll => "container",
        }
    }
}

/// What happens between a drive step and the next measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    /// Wait until the metric grows, capped at `timeout`.
    Growth { timeout: Duration },
    /// Flat pause.
    Delay(Duration),
}

/// Parameters of one engine run.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrollConfig {
    pub strategy: DriveStrategy,
    /// Pixels per drive step (wheel delta or container offset increment).
    pub step_size: f64,
    pub wait: WaitMode,
    pub max_iterations: u32,
    /// Element whose population is the real completion signal.
    pub completion_selector: Option<String>,
}

impl ScrollConfig {
    /// Defaults that match how each strategy is normally tuned.
    #[must_use]
    pub fn preset(strategy: DriveStrategy) -> Self {
        let (step_size, wait, max_iterations) = match strategy {
            DriveStrategy::WheelDelta => (
                500.0,
                WaitMode::Growth {
                    timeout: Duration::from_millis(DEFAULT_ITERATION_TIMEOUT_MS),
                },
                20,
            ),
            DriveStrategy::KeyPress => (500.0, WaitMode::Delay(Duration::from_millis(1500)), 30),
            DriveStrategy::ContainerScroll => {
                (200.0, WaitMode::Delay(Duration::from_millis(100)), 30)
            }
        };
        Self {
            strategy,
            step_size,
            wait,
            max_iterations,
            completion_selector: None,
        }
    }

    /// Reject configurations the engine must never run with.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfig`] for a zero iteration cap, a
    /// non-positive step or an empty completion selector.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.max_iterations == 0 {
            return Err(EngineError::InvalidConfig {
                field: "max_iterations",
                message: "must be at least 1".to_string(),
            });
        }
        if !self.step_size.is_finite() || self.step_size <= 0.0 {
            return Err(EngineError::InvalidConfig {
                field: "step_size",
                message: format!("must be a positive pixel amount, got {}", self.step_size),
            });
        }
        if self
            .completion_selector
            .as_deref()
            .is_some_and(|s| s.trim().is_empty())
        {
            return Err(EngineError::InvalidConfig {
                field: "completion_selector",
                message: "cannot be empty".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The metric did not move across one drive step.
    ConvergedStable,
    /// The completion target holds data.
    ConvergedTargetPopulated,
    /// Iteration cap reached (or the run was cancelled).
    MaxIterationsReached,
}

impl StopReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConvergedStable => "converged_stable",
            Self::ConvergedTargetPopulated => "converged_target_populated",
            Self::MaxIterationsReached => "max_iterations_reached",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a completed engine run.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrollOutcome {
    pub iterations_performed: u32,
    /// Last successfully observed metric (0 if none was ever observed).
    pub final_metric: f64,
    pub reason: StopReason,
    /// Probes that failed and were skipped.
    pub transient_failures: u32,
    /// The run stopped because its cancellation token fired.
    pub cancelled: bool,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid scroll configuration for {field}: {message}")]
    InvalidConfig {
        field: &'static str,
        message: String,
    },
    #[error("page context lost while scrolling")]
    PageLost(#[source] HandleError),
}

/// Per-run mutable state.
#[derive(Debug, Default)]
struct ScrollState {
    previous: Option<f64>,
    last_observed: Option<f64>,
    attempts: u32,
    transient_failures: u32,
    target: Option<ScrollTarget>,
}

impl ScrollState {
    /// Record a probe failure, or escalate it if the page is gone.
    fn absorb(&mut self, stage: &str, err: HandleError) -> Result<(), EngineError> {
        if err.is_fatal() {
            return Err(EngineError::PageLost(err));
        }
        warn!(iteration = self.attempts, stage, error = %err, "Scroll probe failed, skipping round");
        self.transient_failures += 1;
        Ok(())
    }

    fn finish(&self, reason: StopReason, cancelled: bool) -> ScrollOutcome {
        ScrollOutcome {
            iterations_performed: self.attempts,
            final_metric: self.last_observed.unwrap_or_default(),
            reason,
            transient_failures: self.transient_failures,
            cancelled,
        }
    }
}

/// Drive `page` forward until its content converges.
///
/// The page is only borrowed: its scroll position changes, nothing else is
/// cleaned up or closed here.
///
/// # Errors
///
/// Returns [`EngineError::InvalidConfig`] before touching the page when the
/// configuration is unusable, and [`EngineError::PageLost`] when the document
/// context disappears mid-run.
pub async fn drive_to_completion<P>(
    page: &P,
    config: &ScrollConfig,
    cancel: &CancellationToken,
) -> Result<ScrollOutcome, EngineError>
where
    P: PageHandle + ?Sized,
{
    config.validate()?;

    debug!(
        strategy = config.strategy.as_str(),
        step = config.step_size,
        max_iterations = config.max_iterations,
        selector = ?config.completion_selector,
        "Starting scroll to completion"
    );

    let outcome = run_loop(page, config, cancel).await?;

    if config.strategy == DriveStrategy::KeyPress {
        if let Err(e) = page.dispatch_scroll(&ScrollAction::Key(ScrollKey::End)).await {
            debug!(error = %e, "Final End key press failed");
        }
    }

    if outcome.reason == StopReason::MaxIterationsReached {
        warn!(
            iterations = outcome.iterations_performed,
            final_metric = outcome.final_metric,
            cancelled = outcome.cancelled,
            "Scrolling stopped before content converged"
        );
    } else {
        info!(
            iterations = outcome.iterations_performed,
            final_metric = outcome.final_metric,
            reason = %outcome.reason,
            "Scrolling converged"
        );
    }

    Ok(outcome)
}

async fn run_loop<P>(
    page: &P,
    config: &ScrollConfig,
    cancel: &CancellationToken,
) -> Result<ScrollOutcome, EngineError>
where
    P: PageHandle + ?Sized,
{
    let mut state = ScrollState::default();

    if config.strategy == DriveStrategy::ContainerScroll {
        match locate_container(page, config.completion_selector.as_deref()).await {
            Ok(target) => state.target = Some(target),
            Err(e) => state.absorb("locate", e)?,
        }
    }
    if let Some(metric) = metric_for(config, state.target.as_ref()) {
        match page.measure(&metric).await {
            Ok(value) => {
                state.previous = Some(value);
                state.last_observed = Some(value);
            }
            Err(e) => state.absorb("measure", e)?,
        }
    }

    while state.attempts < config.max_iterations {
        if cancel.is_cancelled() {
            return Ok(state.finish(StopReason::MaxIterationsReached, true));
        }

        let step = drive_step(page, config, &mut state).await?;
        state.attempts += 1;
        let drove = step.is_some();

        // A failed drive still waits before the next round.
        let metric = step.or_else(|| metric_for(config, state.target.as_ref()));
        match pause(page, config, metric.as_ref(), state.previous, cancel).await {
            None => return Ok(state.finish(StopReason::MaxIterationsReached, true)),
            Some(Err(e)) => {
                state.absorb("wait", e)?;
                continue;
            }
            Some(Ok(())) => {}
        }
        let (true, Some(metric)) = (drove, metric) else {
            continue;
        };

        let current = match page.measure(&metric).await {
            Ok(value) => value,
            Err(e) => {
                state.absorb("measure", e)?;
                continue;
            }
        };
        state.last_observed = Some(current);
        debug!(iteration = state.attempts, metric = current, "Scroll iteration");

        if let Some(selector) = config.completion_selector.as_deref() {
            match page.query_element_state(selector).await {
                Ok(element) if element.populated => {
                    return Ok(state.finish(StopReason::ConvergedTargetPopulated, false));
                }
                Ok(_) => {}
                Err(e) => {
                    state.absorb("query", e)?;
                    state.previous = Some(current);
                    continue;
                }
            }
        }

        if state
            .previous
            .is_some_and(|previous| (current - previous).abs() < METRIC_TOLERANCE)
        {
            return Ok(state.finish(StopReason::ConvergedStable, false));
        }
        state.previous = Some(current);
    }

    Ok(state.finish(StopReason::MaxIterationsReached, false))
}

/// Give the page time to react to a drive step.
///
/// `None` means the run was cancelled during the wait.
async fn pause<P>(
    page: &P,
    config: &ScrollConfig,
    metric: Option<&Metric>,
    previous: Option<f64>,
    cancel: &CancellationToken,
) -> Option<Result<(), HandleError>>
where
    P: PageHandle + ?Sized,
{
    match (config.wait, metric, previous) {
        (WaitMode::Growth { timeout }, Some(metric), Some(previous)) => tokio::select! {
            () = cancel.cancelled() => None,
            grown = page.wait_for_growth(metric, previous, timeout) => Some(grown.map(|_| ())),
        },
        // No baseline to grow from yet.
        (WaitMode::Growth { timeout }, _, _) => tokio::select! {
            () = cancel.cancelled() => None,
            () = tokio::time::sleep(GROWTH_POLL_INTERVAL.min(timeout)) => Some(Ok(())),
        },
        (WaitMode::Delay(delay), _, _) => tokio::select! {
            () = cancel.cancelled() => None,
            () = tokio::time::sleep(delay) => Some(Ok(())),
        },
    }
}

/// Dispatch one drive step and return the metric to observe afterwards.
///
/// `None` means the step failed transiently and the round is consumed.
async fn drive_step<P>(
    page: &P,
    config: &ScrollConfig,
    state: &mut ScrollState,
) -> Result<Option<Metric>, EngineError>
where
    P: PageHandle + ?Sized,
{
    let action = match config.strategy {
        DriveStrategy::WheelDelta => ScrollAction::Wheel {
            delta_y: config.step_size,
        },
        DriveStrategy::KeyPress => ScrollAction::Key(ScrollKey::PageDown),
        DriveStrategy::ContainerScroll => {
            let target = match locate_container(page, config.completion_selector.as_deref()).await
            {
                Ok(target) => target,
                Err(e) => {
                    state.absorb("locate", e)?;
                    return Ok(None);
                }
            };
            if state.target.as_ref() != Some(&target) {
                debug!(container = ?target, "Scroll container changed");
                state.previous = None;
                state.target = Some(target.clone());
            }
            ScrollAction::Offset {
                target,
                by: config.step_size,
            }
        }
    };

    if let Err(e) = page.dispatch_scroll(&action).await {
        state.absorb("drive", e)?;
        return Ok(None);
    }

    Ok(metric_for(config, state.target.as_ref()))
}

fn metric_for(config: &ScrollConfig, target: Option<&ScrollTarget>) -> Option<Metric> {
    match config.strategy {
        DriveStrategy::WheelDelta | DriveStrategy::KeyPress => Some(Metric::DocumentHeight),
        DriveStrategy::ContainerScroll => target.cloned().map(Metric::ScrollOffset),
    }
}

/// Find the scroller the container strategy should move.
async fn locate_container<P>(page: &P, selector: Option<&str>) -> Result<ScrollTarget, HandleError>
where
    P: PageHandle + ?Sized,
{
    let Some(selector) = selector else {
        return Ok(ScrollTarget::Viewport);
    };
    let chain = page.scroll_ancestry(selector).await?;
    Ok(chain
        .as_deref()
        .and_then(nearest_scrollable)
        .map_or(ScrollTarget::Viewport, |depth| ScrollTarget::Ancestor {
            selector: selector.to_string(),
            depth,
        }))
}
