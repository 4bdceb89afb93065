//! Webpage snapshot library.
//!
//! Loads a JavaScript-heavy page in headless Chromium, scrolls it until
//! lazily loaded content has finished rendering, and saves the final DOM as
//! an MHTML archive or a paginated PDF.

// Allow raw string hashes for safety - they're harmless and prevent issues if scripts change
#![allow(clippy::needless_raw_string_hashes)]

pub mod capture;
pub mod config;
pub mod fs_utils;
pub mod scroll;
