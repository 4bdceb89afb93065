//! Turning a rendered page into an MHTML or PDF artifact.

use anyhow::{Context, Result};
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureSnapshotFormat, CaptureSnapshotParams, PrintToPdfParams,
};
use chromiumoxide::Page;

/// Artifact produced from the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Single-file web archive of the DOM and its resources.
    Mhtml,
    /// Paginated print rendering.
    Pdf,
}

impl OutputFormat {
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Mhtml => "mhtml",
            Self::Pdf => "pdf",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaperFormat {
    A3,
    A4,
    A5,
    Letter,
    Legal,
    Tabloid,
}

impl PaperFormat {
    /// Portrait width and height in inches.
    #[must_use]
    pub fn dimensions_in(self) -> (f64, f64) {
        match self {
            Self::A3 => (11.69, 16.54),
            Self::A4 => (8.27, 11.69),
            Self::A5 => (5.83, 8.27),
            Self::Letter => (8.5, 11.0),
            Self::Legal => (8.5, 14.0),
            Self::Tabloid => (11.0, 17.0),
        }
    }
}

/// PDF render options.
#[derive(Debug, Clone, PartialEq)]
pub struct PdfOptions {
    pub paper: PaperFormat,
    pub landscape: bool,
    /// Rendering scale, 0.1 to 2.0.
    pub scale: f64,
    pub print_background: bool,
}

impl Default for PdfOptions {
    fn default() -> Self {
        Self {
            paper: PaperFormat::A4,
            landscape: false,
            scale: 0.8,
            print_background: true,
        }
    }
}

impl PdfOptions {
    /// CDP parameters for `Page.printToPDF`.
    ///
    /// Paper size stays portrait; Chromium swaps the axes for landscape.
    #[must_use]
    pub fn to_params(&self) -> PrintToPdfParams {
        let (width, height) = self.paper.dimensions_in();
        PrintToPdfParams::builder()
            .landscape(self.landscape)
            .print_background(self.print_background)
            .scale(self.scale)
            .paper_width(width)
            .paper_height(height)
            .build()
    }
}

/// Capture the page as MHTML.
pub async fn capture_mhtml(page: &Page) -> Result<Vec<u8>> {
    let params = CaptureSnapshotParams::builder()
        .format(CaptureSnapshotFormat::Mhtml)
        .build();
    let snapshot = page
        .execute(params)
        .await
        .context("Failed to capture MHTML snapshot")?;
    Ok(snapshot.result.data.into_bytes())
}

/// Render the page to PDF.
pub async fn render_pdf(page: &Page, options: &PdfOptions) -> Result<Vec<u8>> {
    page.pdf(options.to_params())
        .await
        .context("Failed to render PDF")
}

/// Produce the artifact for `format`.
pub async fn export(page: &Page, format: OutputFormat, pdf: &PdfOptions) -> Result<Vec<u8>> {
    match format {
        OutputFormat::Mhtml => capture_mhtml(page).await,
        OutputFormat::Pdf => render_pdf(page, pdf).await,
    }
}
