//! [`PageHandle`] over a live Chromium page.

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchKeyEventParams, DispatchKeyEventType, DispatchMouseEventParams,
    DispatchMouseEventType,
};
use chromiumoxide::error::CdpError;
use chromiumoxide::Page;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::scripts;
use crate::scroll::{
    ElementState, HandleError, Metric, PageHandle, ScrollAction, ScrollBox, ScrollKey,
};

#[derive(Debug, Deserialize)]
struct AncestryReply {
    found: bool,
    chain: Vec<ScrollBox>,
}

/// Bounding box of an element in top-level viewport coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct FrameRect {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

/// Centre of the part of `rect` that lies inside a `viewport` sized window.
///
/// `None` when no part of it is visible.
#[must_use]
pub fn visible_centre(rect: &FrameRect, (width, height): (u32, u32)) -> Option<(f64, f64)> {
    let left = rect.left.max(0.0);
    let top = rect.top.max(0.0);
    let right = rect.right.min(f64::from(width));
    let bottom = rect.bottom.min(f64::from(height));
    if right <= left || bottom <= top {
        return None;
    }
    Some(((left + right) / 2.0, (top + bottom) / 2.0))
}

/// A Chromium page, scoped to either its own document or a same-origin iframe.
#[derive(Clone)]
pub struct CdpPage {
    page: Page,
    root: String,
    /// Selector of the iframe whose document `root` points into.
    frame: Option<String>,
    viewport: (u32, u32),
}

impl CdpPage {
    /// Handle on the page's top-level document.
    ///
    /// Wheel events are dispatched at the centre of a `viewport` sized window.
    #[must_use]
    pub fn top(page: Page, viewport: (u32, u32)) -> Self {
        Self {
            page,
            root: scripts::TOP_DOCUMENT.to_string(),
            frame: None,
            viewport,
        }
    }

    /// Handle on the content document of the iframe matching `selector`.
    ///
    /// Wheel events are aimed at the visible centre of the iframe and key
    /// presses go to its focused window.
    #[must_use]
    pub fn iframe(page: Page, selector: &str, viewport: (u32, u32)) -> Self {
        Self {
            page,
            root: scripts::iframe_document(selector),
            frame: Some(selector.to_string()),
            viewport,
        }
    }

    /// The underlying page, for export once scrolling is done.
    #[must_use]
    pub fn page(&self) -> &Page {
        &self.page
    }

    async fn eval<T: DeserializeOwned>(&self, script: String) -> Result<T, HandleError> {
        let value = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| cdp_error(&e))?
            .into_value::<Option<T>>()
            .map_err(|e| HandleError::Transient(format!("unexpected script result: {e}")))?;
        value.ok_or_else(|| HandleError::Transient("document is not available".to_string()))
    }

    /// Where wheel events are dispatched.
    async fn wheel_point(&self) -> Result<(f64, f64), HandleError> {
        let Some(selector) = &self.frame else {
            let (width, height) = self.viewport;
            return Ok((f64::from(width) / 2.0, f64::from(height) / 2.0));
        };
        let rect: FrameRect = self.eval(scripts::frame_rect(selector)).await?;
        visible_centre(&rect, self.viewport).ok_or_else(|| {
            HandleError::Transient(format!("iframe '{selector}' is outside the viewport"))
        })
    }

    async fn press(&self, key: ScrollKey) -> Result<(), HandleError> {
        if let Some(selector) = &self.frame {
            let _: bool = self.eval(scripts::focus_frame(selector)).await?;
        }
        for kind in [DispatchKeyEventType::KeyDown, DispatchKeyEventType::KeyUp] {
            let params = DispatchKeyEventParams::builder()
                .r#type(kind)
                .key(key.key())
                .code(key.key())
                .windows_virtual_key_code(key.virtual_key_code())
                .native_virtual_key_code(key.virtual_key_code())
                .build()
                .map_err(HandleError::Transient)?;
            self.page.execute(params).await.map_err(|e| cdp_error(&e))?;
        }
        Ok(())
    }
}

fn cdp_error(err: &CdpError) -> HandleError {
    HandleError::classify(err.to_string())
}

#[async_trait]
impl PageHandle for CdpPage {
    async fn measure(&self, metric: &Metric) -> Result<f64, HandleError> {
        let script = match metric {
            Metric::DocumentHeight => scripts::document_height(&self.root),
            Metric::ScrollOffset(target) => scripts::scroll_offset(&self.root, target),
        };
        self.eval(script).await
    }

    async fn dispatch_scroll(&self, action: &ScrollAction) -> Result<(), HandleError> {
        match action {
            ScrollAction::Wheel { delta_y } => {
                let (x, y) = self.wheel_point().await?;
                let params = DispatchMouseEventParams::builder()
                    .r#type(DispatchMouseEventType::MouseWheel)
                    .x(x)
                    .y(y)
                    .delta_x(0.0)
                    .delta_y(*delta_y)
                    .build()
                    .map_err(HandleError::Transient)?;
                self.page.execute(params).await.map_err(|e| cdp_error(&e))?;
                Ok(())
            }
            ScrollAction::Key(key) => self.press(*key).await,
            ScrollAction::Offset { target, by } => {
                let found: bool = self.eval(scripts::scroll_by(&self.root, target, *by)).await?;
                if found {
                    Ok(())
                } else {
                    Err(HandleError::Transient(format!(
                        "scroll container {target:?} is not in the document"
                    )))
                }
            }
        }
    }

    async fn query_element_state(&self, selector: &str) -> Result<ElementState, HandleError> {
        self.eval(scripts::element_state(&self.root, selector)).await
    }

    async fn scroll_ancestry(
        &self,
        selector: &str,
    ) -> Result<Option<Vec<ScrollBox>>, HandleError> {
        let reply: AncestryReply = self
            .eval(scripts::scroll_ancestry(&self.root, selector))
            .await?;
        Ok(reply.found.then_some(reply.chain))
    }
}
