//! Scroll engine behaviour against scripted in-memory pages.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use webpage_snapshot::capture::scroll_page;
use webpage_snapshot::scroll::{
    drive_to_completion, DriveStrategy, ElementState, EngineError, HandleError, Metric,
    PageHandle, ScrollAction, ScrollBox, ScrollConfig, ScrollKey, ScrollTarget, StopReason,
    WaitMode,
};

/// A page whose document height follows a fixed script.
///
/// The first value is the initial measurement; each later measurement takes
/// the next value, repeating the last one once the script runs out.
#[derive(Default)]
struct ScriptedPage {
    heights: Mutex<VecDeque<f64>>,
    last_height: Mutex<f64>,
    /// Drive step from which the target reads as populated.
    populated_from: Option<u32>,
    /// Drive steps whose measurement fails transiently (1-based).
    failing_measurements: Vec<u32>,
    /// Drive attempts that fail transiently (1-based).
    failing_drives: Vec<u32>,
    /// Drive steps whose growth wait fails transiently (1-based).
    failing_waits: Vec<u32>,
    /// Drive steps whose target probe fails transiently (1-based).
    failing_queries: Vec<u32>,
    /// Drive step at which the context is destroyed.
    destroyed_at: Option<u32>,
    attempts: Mutex<u32>,
    drives: Mutex<u32>,
    actions: Mutex<Vec<ScrollAction>>,
    queries: Mutex<u32>,
}

impl ScriptedPage {
    fn with_heights(heights: &[f64]) -> Self {
        Self {
            heights: Mutex::new(heights.iter().copied().collect()),
            ..Self::default()
        }
    }

    fn drives(&self) -> u32 {
        *self.drives.lock().unwrap()
    }

    fn actions(&self) -> Vec<ScrollAction> {
        self.actions.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageHandle for ScriptedPage {
    async fn measure(&self, metric: &Metric) -> Result<f64, HandleError> {
        assert_eq!(metric, &Metric::DocumentHeight);
        let drives = self.drives();
        if self.destroyed_at.is_some_and(|at| drives >= at) {
            return Err(HandleError::classify("Execution context was destroyed."));
        }
        if self.failing_measurements.contains(&drives) {
            return Err(HandleError::Transient("evaluation timed out".to_string()));
        }
        let mut last = self.last_height.lock().unwrap();
        if let Some(next) = self.heights.lock().unwrap().pop_front() {
            *last = next;
        }
        Ok(*last)
    }

    async fn dispatch_scroll(&self, action: &ScrollAction) -> Result<(), HandleError> {
        self.actions.lock().unwrap().push(action.clone());
        if !matches!(action, ScrollAction::Key(ScrollKey::End)) {
            let mut attempts = self.attempts.lock().unwrap();
            *attempts += 1;
            if self.failing_drives.contains(&*attempts) {
                return Err(HandleError::Transient("input dispatch timed out".to_string()));
            }
            *self.drives.lock().unwrap() += 1;
        }
        Ok(())
    }

    async fn query_element_state(&self, _selector: &str) -> Result<ElementState, HandleError> {
        *self.queries.lock().unwrap() += 1;
        if self.failing_queries.contains(&self.drives()) {
            return Err(HandleError::Transient("selector probe timed out".to_string()));
        }
        let populated = self.populated_from.is_some_and(|from| self.drives() >= from);
        Ok(ElementState {
            present: self.populated_from.is_some(),
            populated,
        })
    }

    async fn scroll_ancestry(&self, _selector: &str) -> Result<Option<Vec<ScrollBox>>, HandleError> {
        Ok(None)
    }

    async fn wait_for_growth(
        &self,
        _metric: &Metric,
        _previous: f64,
        _timeout: Duration,
    ) -> Result<bool, HandleError> {
        if self.failing_waits.contains(&self.drives()) {
            return Err(HandleError::Transient("growth probe timed out".to_string()));
        }
        Ok(true)
    }
}

fn fast_config(strategy: DriveStrategy, max_iterations: u32) -> ScrollConfig {
    ScrollConfig {
        wait: WaitMode::Delay(Duration::ZERO),
        max_iterations,
        ..ScrollConfig::preset(strategy)
    }
}

#[tokio::test]
async fn test_stops_when_height_stops_changing() {
    let page = ScriptedPage::with_heights(&[100.0, 300.0, 500.0, 500.0]);
    let config = ScrollConfig {
        step_size: 200.0,
        ..fast_config(DriveStrategy::WheelDelta, 3)
    };

    let outcome = drive_to_completion(&page, &config, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.iterations_performed, 3);
    assert!((outcome.final_metric - 500.0).abs() < f64::EPSILON);
    assert_eq!(outcome.reason, StopReason::ConvergedStable);
    assert!(!outcome.cancelled);
    assert_eq!(page.drives(), 3);
    assert!(page
        .actions()
        .iter()
        .all(|a| *a == ScrollAction::Wheel { delta_y: 200.0 }));
}

#[tokio::test]
async fn test_converges_one_step_after_growth_ends() {
    for k in 0..6_u32 {
        let mut heights: Vec<f64> = (0..=k).map(|i| 1000.0 + f64::from(i) * 250.0).collect();
        let plateau = heights[heights.len() - 1];
        heights.extend([plateau; 3]);
        let page = ScriptedPage::with_heights(&heights);

        let outcome = drive_to_completion(
            &page,
            &fast_config(DriveStrategy::WheelDelta, 10),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.reason, StopReason::ConvergedStable, "k = {k}");
        assert_eq!(outcome.iterations_performed, k + 1, "k = {k}");
    }
}

#[tokio::test]
async fn test_exhausts_iterations_when_height_keeps_growing() {
    let heights: Vec<f64> = (0..50).map(|i| f64::from(i) * 100.0).collect();
    let page = ScriptedPage::with_heights(&heights);

    let outcome = drive_to_completion(
        &page,
        &fast_config(DriveStrategy::WheelDelta, 7),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(outcome.reason, StopReason::MaxIterationsReached);
    assert_eq!(outcome.iterations_performed, 7);
    assert_eq!(page.drives(), 7);
    assert!((outcome.final_metric - 700.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_never_exceeds_iteration_cap() {
    for max in 1..=5_u32 {
        let heights: Vec<f64> = (0..20).map(f64::from).map(|h| h * 10.0).collect();
        let page = ScriptedPage::with_heights(&heights);
        let outcome = drive_to_completion(
            &page,
            &fast_config(DriveStrategy::KeyPress, max),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert!(outcome.iterations_performed <= max);
        assert!(page.drives() <= max);
    }
}

#[tokio::test]
async fn test_target_population_wins_over_growth() {
    let heights: Vec<f64> = (0..50).map(|i| f64::from(i) * 100.0).collect();
    let page = ScriptedPage {
        populated_from: Some(4),
        ..ScriptedPage::with_heights(&heights)
    };
    let config = ScrollConfig {
        completion_selector: Some("table".to_string()),
        ..fast_config(DriveStrategy::WheelDelta, 20)
    };

    let outcome = drive_to_completion(&page, &config, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.reason, StopReason::ConvergedTargetPopulated);
    assert_eq!(outcome.iterations_performed, 4);
}

#[tokio::test]
async fn test_missing_target_falls_back_to_metric() {
    let page = ScriptedPage::with_heights(&[100.0, 200.0, 300.0, 300.0]);
    let config = ScrollConfig {
        completion_selector: Some("table".to_string()),
        ..fast_config(DriveStrategy::WheelDelta, 10)
    };

    let outcome = drive_to_completion(&page, &config, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.reason, StopReason::ConvergedStable);
    assert_eq!(outcome.iterations_performed, 3);
    assert_eq!(*page.queries.lock().unwrap(), 3);
}

#[tokio::test]
async fn test_missing_target_with_growth_exhausts() {
    let heights: Vec<f64> = (0..50).map(|i| f64::from(i) * 100.0).collect();
    let page = ScriptedPage::with_heights(&heights);
    let config = ScrollConfig {
        completion_selector: Some("table".to_string()),
        ..fast_config(DriveStrategy::WheelDelta, 5)
    };

    let outcome = drive_to_completion(&page, &config, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.reason, StopReason::MaxIterationsReached);
    assert_eq!(outcome.iterations_performed, 5);
}

#[tokio::test]
async fn test_key_press_ends_with_end_key() {
    let page = ScriptedPage::with_heights(&[100.0, 400.0, 400.0]);

    let outcome = drive_to_completion(
        &page,
        &fast_config(DriveStrategy::KeyPress, 30),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(outcome.reason, StopReason::ConvergedStable);
    assert_eq!(outcome.iterations_performed, 2);
    assert_eq!(
        page.actions(),
        vec![
            ScrollAction::Key(ScrollKey::PageDown),
            ScrollAction::Key(ScrollKey::PageDown),
            ScrollAction::Key(ScrollKey::End),
        ]
    );
}

#[tokio::test]
async fn test_wheel_does_not_press_end() {
    let page = ScriptedPage::with_heights(&[100.0, 100.0]);

    drive_to_completion(
        &page,
        &fast_config(DriveStrategy::WheelDelta, 5),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert!(!page
        .actions()
        .contains(&ScrollAction::Key(ScrollKey::End)));
}

#[tokio::test]
async fn test_invalid_config_never_touches_page() {
    let page = ScriptedPage::with_heights(&[100.0]);
    let config = fast_config(DriveStrategy::WheelDelta, 0);

    let err = drive_to_completion(&page, &config, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::InvalidConfig { .. }));
    assert!(page.actions().is_empty());
}

#[tokio::test]
async fn test_transient_measurement_failure_is_skipped() {
    // Measurement after drive 2 fails; the plateau is only detected after a
    // successful comparison.
    let page = ScriptedPage {
        failing_measurements: vec![2],
        ..ScriptedPage::with_heights(&[100.0, 200.0, 300.0, 300.0])
    };

    let outcome = drive_to_completion(
        &page,
        &fast_config(DriveStrategy::WheelDelta, 10),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(outcome.transient_failures, 1);
    assert_eq!(outcome.reason, StopReason::ConvergedStable);
    assert_eq!(outcome.iterations_performed, 4);
    assert!((outcome.final_metric - 300.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_failed_target_probe_skips_convergence_check() {
    // The flat 100 -> 100 step coincides with the failed probe and must not
    // end the run.
    let page = ScriptedPage {
        failing_queries: vec![1],
        ..ScriptedPage::with_heights(&[100.0, 100.0, 200.0, 200.0])
    };
    let config = ScrollConfig {
        completion_selector: Some("table".to_string()),
        ..fast_config(DriveStrategy::WheelDelta, 10)
    };

    let outcome = drive_to_completion(&page, &config, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.transient_failures, 1);
    assert_eq!(outcome.reason, StopReason::ConvergedStable);
    assert_eq!(outcome.iterations_performed, 3);
    assert!((outcome.final_metric - 200.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_always_failing_target_probe_never_converges() {
    let page = ScriptedPage {
        failing_queries: (0..=10).collect(),
        ..ScriptedPage::with_heights(&[100.0, 100.0, 200.0])
    };
    let config = ScrollConfig {
        completion_selector: Some("table".to_string()),
        ..fast_config(DriveStrategy::WheelDelta, 4)
    };

    let outcome = drive_to_completion(&page, &config, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.reason, StopReason::MaxIterationsReached);
    assert_eq!(outcome.iterations_performed, 4);
    assert_eq!(outcome.transient_failures, 4);
}

#[tokio::test]
async fn test_failed_growth_wait_skips_round() {
    let page = ScriptedPage {
        failing_waits: vec![1],
        ..ScriptedPage::with_heights(&[100.0, 100.0, 100.0])
    };
    let config = ScrollConfig {
        wait: WaitMode::Growth {
            timeout: Duration::from_secs(1),
        },
        ..fast_config(DriveStrategy::WheelDelta, 10)
    };

    let outcome = drive_to_completion(&page, &config, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.transient_failures, 1);
    assert_eq!(outcome.reason, StopReason::ConvergedStable);
    assert_eq!(outcome.iterations_performed, 2);
}

#[tokio::test]
async fn test_failed_drive_still_waits() {
    let page = ScriptedPage {
        failing_drives: vec![1, 2, 3],
        ..ScriptedPage::with_heights(&[100.0, 200.0])
    };
    let config = ScrollConfig {
        wait: WaitMode::Delay(Duration::from_millis(60)),
        ..fast_config(DriveStrategy::KeyPress, 3)
    };

    let started = Instant::now();
    let outcome = drive_to_completion(&page, &config, &CancellationToken::new())
        .await
        .unwrap();

    assert!(started.elapsed() >= Duration::from_millis(180));
    assert_eq!(outcome.reason, StopReason::MaxIterationsReached);
    assert_eq!(outcome.iterations_performed, 3);
    assert_eq!(outcome.transient_failures, 3);
    assert_eq!(page.drives(), 0);
}

#[tokio::test]
async fn test_recovers_after_failed_drives() {
    let page = ScriptedPage {
        failing_drives: vec![1, 2],
        ..ScriptedPage::with_heights(&[100.0, 200.0, 300.0, 300.0])
    };
    let config = ScrollConfig {
        wait: WaitMode::Delay(Duration::from_millis(50)),
        ..fast_config(DriveStrategy::KeyPress, 5)
    };

    let started = Instant::now();
    let outcome = drive_to_completion(&page, &config, &CancellationToken::new())
        .await
        .unwrap();

    assert!(started.elapsed() >= Duration::from_millis(250));
    assert_eq!(outcome.reason, StopReason::ConvergedStable);
    assert_eq!(outcome.iterations_performed, 5);
    assert_eq!(outcome.transient_failures, 2);
    assert!((outcome.final_metric - 300.0).abs() < f64::EPSILON);
    assert_eq!(page.drives(), 3);
}

#[tokio::test]
async fn test_destroyed_context_is_fatal() {
    let heights: Vec<f64> = (0..50).map(|i| f64::from(i) * 100.0).collect();
    let page = ScriptedPage {
        destroyed_at: Some(3),
        ..ScriptedPage::with_heights(&heights)
    };

    let err = drive_to_completion(
        &page,
        &fast_config(DriveStrategy::KeyPress, 10),
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, EngineError::PageLost(_)));
    assert!(!page
        .actions()
        .contains(&ScrollAction::Key(ScrollKey::End)));
}

#[tokio::test]
async fn test_cancelled_run_reports_progress() {
    let heights: Vec<f64> = (0..50).map(|i| f64::from(i) * 100.0).collect();
    let page = ScriptedPage::with_heights(&heights);
    let config = ScrollConfig {
        wait: WaitMode::Delay(Duration::from_millis(40)),
        ..fast_config(DriveStrategy::WheelDelta, 1000)
    };
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        trigger.cancel();
    });

    let outcome = drive_to_completion(&page, &config, &cancel).await.unwrap();

    assert!(outcome.cancelled);
    assert_eq!(outcome.reason, StopReason::MaxIterationsReached);
    assert!(outcome.iterations_performed >= 1);
    assert!(outcome.iterations_performed < 1000);
    assert_eq!(outcome.iterations_performed, page.drives());
}

#[tokio::test]
async fn test_pre_cancelled_run_does_nothing() {
    let page = ScriptedPage::with_heights(&[100.0, 200.0]);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = drive_to_completion(&page, &fast_config(DriveStrategy::WheelDelta, 5), &cancel)
        .await
        .unwrap();

    assert!(outcome.cancelled);
    assert_eq!(outcome.iterations_performed, 0);
    assert_eq!(page.drives(), 0);
}

#[tokio::test]
async fn test_scroll_page_skips_populated_target() {
    let page = ScriptedPage {
        populated_from: Some(0),
        ..ScriptedPage::with_heights(&[100.0, 200.0])
    };
    let config = ScrollConfig {
        completion_selector: Some("table".to_string()),
        ..fast_config(DriveStrategy::WheelDelta, 5)
    };

    let outcome = scroll_page(&page, &config, Duration::from_secs(5)).await.unwrap();

    assert_eq!(outcome.reason, StopReason::ConvergedTargetPopulated);
    assert_eq!(outcome.iterations_performed, 0);
    assert_eq!(page.drives(), 0);
}

/// Growth wait that relies on the trait's polling default.
struct GrowingPage {
    probes: Mutex<u32>,
    grows_after: Option<u32>,
}

#[async_trait]
impl PageHandle for GrowingPage {
    async fn measure(&self, _metric: &Metric) -> Result<f64, HandleError> {
        let mut probes = self.probes.lock().unwrap();
        *probes += 1;
        Ok(if self.grows_after.is_some_and(|n| *probes > n) {
            2000.0
        } else {
            1000.0
        })
    }

    async fn dispatch_scroll(&self, _action: &ScrollAction) -> Result<(), HandleError> {
        Ok(())
    }

    async fn query_element_state(&self, _selector: &str) -> Result<ElementState, HandleError> {
        Ok(ElementState::default())
    }

    async fn scroll_ancestry(&self, _selector: &str) -> Result<Option<Vec<ScrollBox>>, HandleError> {
        Ok(None)
    }
}

#[tokio::test]
async fn test_default_growth_wait_sees_growth() {
    let page = GrowingPage {
        probes: Mutex::new(0),
        grows_after: Some(2),
    };
    let grew = page
        .wait_for_growth(&Metric::DocumentHeight, 1000.0, Duration::from_secs(5))
        .await
        .unwrap();
    assert!(grew);
    assert_eq!(*page.probes.lock().unwrap(), 3);
}

#[tokio::test]
async fn test_default_growth_wait_times_out() {
    let page = GrowingPage {
        probes: Mutex::new(0),
        grows_after: None,
    };
    let grew = page
        .wait_for_growth(&Metric::DocumentHeight, 1000.0, Duration::from_millis(250))
        .await
        .unwrap();
    assert!(!grew);
    assert!(*page.probes.lock().unwrap() >= 2);
}

#[tokio::test]
async fn test_growth_wait_timeout_converges_stable() {
    let page = GrowingPage {
        probes: Mutex::new(0),
        grows_after: None,
    };
    let config = ScrollConfig {
        wait: WaitMode::Growth {
            timeout: Duration::from_millis(150),
        },
        ..ScrollConfig::preset(DriveStrategy::WheelDelta)
    };

    let outcome = drive_to_completion(&page, &config, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.reason, StopReason::ConvergedStable);
    assert_eq!(outcome.iterations_performed, 1);
}

/// Synthetic DOM: a target inside a fixed-height scrolling panel.
struct PanelPage {
    viewport_top: Mutex<f64>,
    panel_top: Mutex<f64>,
    panel_scroll_height: f64,
    panel_client_height: f64,
}

impl PanelPage {
    fn new() -> Self {
        Self {
            viewport_top: Mutex::new(0.0),
            panel_top: Mutex::new(0.0),
            panel_scroll_height: 1000.0,
            panel_client_height: 400.0,
        }
    }

    fn chain(&self) -> Vec<ScrollBox> {
        vec![
            // tbody wrapper
            ScrollBox {
                overflow_y: "visible".to_string(),
                scroll_height: 1000.0,
                client_height: 1000.0,
            },
            // scrolling panel
            ScrollBox {
                overflow_y: "auto".to_string(),
                scroll_height: self.panel_scroll_height,
                client_height: self.panel_client_height,
            },
            // page section, also overflowing but not scrollable
            ScrollBox {
                overflow_y: "visible".to_string(),
                scroll_height: 3000.0,
                client_height: 600.0,
            },
        ]
    }
}

#[async_trait]
impl PageHandle for PanelPage {
    async fn measure(&self, metric: &Metric) -> Result<f64, HandleError> {
        match metric {
            Metric::ScrollOffset(ScrollTarget::Ancestor { depth: 2, .. }) => {
                Ok(*self.panel_top.lock().unwrap())
            }
            Metric::ScrollOffset(ScrollTarget::Viewport) => Ok(*self.viewport_top.lock().unwrap()),
            other => panic!("unexpected metric {other:?}"),
        }
    }

    async fn dispatch_scroll(&self, action: &ScrollAction) -> Result<(), HandleError> {
        match action {
            ScrollAction::Offset {
                target: ScrollTarget::Ancestor { depth: 2, .. },
                by,
            } => {
                let max = self.panel_scroll_height - self.panel_client_height;
                let mut top = self.panel_top.lock().unwrap();
                *top = (*top + by).min(max);
                Ok(())
            }
            ScrollAction::Offset {
                target: ScrollTarget::Viewport,
                by,
            } => {
                *self.viewport_top.lock().unwrap() += by;
                Ok(())
            }
            other => panic!("unexpected action {other:?}"),
        }
    }

    async fn query_element_state(&self, _selector: &str) -> Result<ElementState, HandleError> {
        Ok(ElementState {
            present: true,
            populated: false,
        })
    }

    async fn scroll_ancestry(&self, selector: &str) -> Result<Option<Vec<ScrollBox>>, HandleError> {
        Ok((selector == "table").then(|| self.chain()))
    }
}

#[tokio::test]
async fn test_container_scroll_moves_inner_panel_only() {
    let page = PanelPage::new();
    let config = ScrollConfig {
        completion_selector: Some("table".to_string()),
        ..fast_config(DriveStrategy::ContainerScroll, 30)
    };

    let outcome = drive_to_completion(&page, &config, &CancellationToken::new())
        .await
        .unwrap();

    // 0 -> 200 -> 400 -> 600 -> 600 (clamped at scrollHeight - clientHeight)
    assert_eq!(outcome.reason, StopReason::ConvergedStable);
    assert_eq!(outcome.iterations_performed, 4);
    assert!((outcome.final_metric - 600.0).abs() < f64::EPSILON);
    assert!((*page.panel_top.lock().unwrap() - 600.0).abs() < f64::EPSILON);
    assert!(page.viewport_top.lock().unwrap().abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_container_scroll_without_selector_uses_viewport() {
    let page = PanelPage::new();

    let outcome = drive_to_completion(
        &page,
        &fast_config(DriveStrategy::ContainerScroll, 3),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(outcome.reason, StopReason::MaxIterationsReached);
    assert!((*page.viewport_top.lock().unwrap() - 600.0).abs() < f64::EPSILON);
    assert!(page.panel_top.lock().unwrap().abs() < f64::EPSILON);
}
