//! Scrollable-ancestor discovery for the container-scroll strategy.

use serde::Deserialize;

/// Scroll geometry of one element, as reported by the page.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrollBox {
    /// Computed `overflow-y` style.
    pub overflow_y: String,
    pub scroll_height: f64,
    pub client_height: f64,
}

impl ScrollBox {
    /// Whether the element scrolls its own content.
    #[must_use]
    pub fn is_scrollable(&self) -> bool {
        matches!(self.overflow_y.as_str(), "auto" | "scroll" | "overlay")
            && self.scroll_height > self.client_height
    }
}

/// Depth of the innermost scrollable ancestor in `chain`.
///
/// `chain[0]` is the parent of the target element, so a match at index `i`
/// lies `i + 1` levels up. `None` means the viewport is the scroller.
#[must_use]
pub fn nearest_scrollable(chain: &[ScrollBox]) -> Option<usize> {
    chain.iter().position(ScrollBox::is_scrollable).map(|i| i + 1)
}
