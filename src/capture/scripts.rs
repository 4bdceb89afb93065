//! JavaScript evaluated inside the captured document.
//!
//! Every script is an expression over a document root (`document` or an
//! iframe's `contentDocument`) and yields `null` when that root is missing,
//! so a detached frame reads as a failed probe rather than a thrown error.

use crate::scroll::ScrollTarget;

/// Root expression for the top-level document.
pub const TOP_DOCUMENT: &str = "document";

/// Root expression for the content document of the first iframe matching `selector`.
#[must_use]
pub fn iframe_document(selector: &str) -> String {
    format!(
        "(() => {{ const f = document.querySelector({}); return f ? f.contentDocument : null; }})()",
        js_string(selector)
    )
}

/// Encode `value` as a JavaScript string literal.
#[must_use]
pub fn js_string(value: &str) -> String {
    // A JSON string is a valid JS string literal.
    serde_json::Value::String(value.to_string()).to_string()
}

#[must_use]
pub fn document_height(root: &str) -> String {
    format!(
        r#"(() => {{
    const d = {root};
    if (!d || !d.body) return null;
    return d.body.scrollHeight;
}})()"#
    )
}

/// Expression resolving to the element a [`ScrollTarget`] designates.
fn scroller(root: &str, target: &ScrollTarget) -> String {
    match target {
        ScrollTarget::Viewport => format!("(d => d.scrollingElement || d.documentElement)({root})"),
        ScrollTarget::Ancestor { selector, depth } => format!(
            r"((d, depth) => {{
        let n = d.querySelector({sel});
        for (let i = 0; n && i < depth; i++) n = n.parentElement;
        return n;
    }})({root}, {depth})",
            sel = js_string(selector),
        ),
    }
}

#[must_use]
pub fn scroll_offset(root: &str, target: &ScrollTarget) -> String {
    format!(
        r#"(() => {{
    const d = {root};
    if (!d) return null;
    const el = {el};
    return el ? el.scrollTop : null;
}})()"#,
        el = scroller("d", target)
    )
}

/// Increment a scroller's `scrollTop` by `by` pixels and return whether it exists.
#[must_use]
pub fn scroll_by(root: &str, target: &ScrollTarget, by: f64) -> String {
    format!(
        r#"(() => {{
    const d = {root};
    if (!d) return null;
    const el = {el};
    if (!el) return false;
    el.scrollTop = el.scrollTop + {by};
    return true;
}})()"#,
        el = scroller("d", target)
    )
}

/// Presence and population of the completion target.
///
/// Header cells never count as data.
#[must_use]
pub fn element_state(root: &str, selector: &str) -> String {
    format!(
        r#"(() => {{
    const d = {root};
    if (!d) return null;
    const el = d.querySelector({sel});
    if (!el) return {{ present: false, populated: false }};
    const cells = el.querySelectorAll('td, tbody tr, li, [role=row], [role=cell], [role=gridcell]');
    const populated = Array.from(cells).some(c => c.textContent.trim().length > 0);
    return {{ present: true, populated }};
}})()"#,
        sel = js_string(selector)
    )
}

/// Scroll geometry of each ancestor of the target, innermost first,
/// stopping before `<body>` and `<html>`.
#[must_use]
pub fn scroll_ancestry(root: &str, selector: &str) -> String {
    format!(
        r#"(() => {{
    const d = {root};
    if (!d) return null;
    const el = d.querySelector({sel});
    if (!el) return {{ found: false, chain: [] }};
    const chain = [];
    for (let n = el.parentElement; n && n !== d.body && n !== d.documentElement; n = n.parentElement) {{
        const style = d.defaultView.getComputedStyle(n);
        chain.push({{ overflowY: style.overflowY, scrollHeight: n.scrollHeight, clientHeight: n.clientHeight }});
    }}
    return {{ found: true, chain }};
}})()"#,
        sel = js_string(selector)
    )
}

/// Resolved `src` of the first iframe matching `selector`, or `null`.
#[must_use]
pub fn iframe_src(selector: &str) -> String {
    format!(
        r"(() => {{
    const f = document.querySelector({sel});
    return f ? (f.src || '') : null;
}})()",
        sel = js_string(selector)
    )
}

/// Bring the first iframe matching `selector` into view and return its
/// bounding box in top-level viewport coordinates.
#[must_use]
pub fn frame_rect(selector: &str) -> String {
    format!(
        r"(() => {{
    const f = document.querySelector({sel});
    if (!f) return null;
    f.scrollIntoView({{ block: 'nearest', inline: 'nearest' }});
    const r = f.getBoundingClientRect();
    return {{ left: r.left, top: r.top, right: r.right, bottom: r.bottom }};
}})()",
        sel = js_string(selector)
    )
}

/// Move keyboard focus into the first iframe matching `selector`.
#[must_use]
pub fn focus_frame(selector: &str) -> String {
    format!(
        r"(() => {{
    const f = document.querySelector({sel});
    if (!f || !f.contentWindow) return null;
    f.focus();
    f.contentWindow.focus();
    return true;
}})()",
        sel = js_string(selector)
    )
}

#[must_use]
pub fn selector_present(selector: &str) -> String {
    format!("document.querySelector({}) !== null", js_string(selector))
}
