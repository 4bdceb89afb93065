use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::capture::{
    BrowserOptions, CaptureJob, FrameTarget, OutputFormat, PaperFormat, PdfOptions,
    DEFAULT_NAVIGATION_TIMEOUT_SECS, DEFAULT_SETTLE_DELAY_MS, DEFAULT_VIEWPORT_HEIGHT,
    DEFAULT_VIEWPORT_WIDTH,
};
use crate::scroll::{DriveStrategy, ScrollConfig, WaitMode, DEFAULT_ITERATION_TIMEOUT_MS};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("failed to parse {name} as number: {source}")]
    ParseFloat {
        name: String,
        #[source]
        source: std::num::ParseFloatError,
    },
    #[error("failed to parse {name} as boolean: {value}")]
    ParseBool { name: String, value: String },
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Target
    pub webpage_url: Url,
    pub target_frame: FrameTarget,
    pub frame_wait_timeout: Duration,

    // Output
    pub output_format: OutputFormat,
    pub output_path: PathBuf,
    pub pdf: PdfOptions,

    // Browser
    pub chrome_path: Option<String>,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub navigation_timeout: Duration,
    pub settle_delay: Duration,

    // Scrolling
    pub scroll_enabled: bool,
    pub scroll: ScrollConfig,
    pub scroll_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        let webpage_url = required_env("WEBPAGE_URL")?;
        let webpage_url = Url::parse(&webpage_url).map_err(|e| ConfigError::InvalidValue {
            name: "WEBPAGE_URL".to_string(),
            message: format!("'{webpage_url}' is not an absolute URL: {e}"),
        })?;

        let output_format = parse_output_format(&env_or_default("OUTPUT_FORMAT", "mhtml"))?;
        let default_output = format!("output/webpage.{}", output_format.extension());

        Ok(Self {
            // Target
            webpage_url,
            target_frame: parse_target_frame(
                &env_or_default("TARGET_FRAME", "top"),
                env_or_default("IFRAME_SELECTOR", "iframe"),
            )?,
            frame_wait_timeout: Duration::from_secs(parse_env_u64("FRAME_WAIT_TIMEOUT_SECS", 15)?),

            // Output
            output_format,
            output_path: PathBuf::from(env_or_default("OUTPUT_PATH", &default_output)),
            pdf: PdfOptions {
                paper: parse_paper_format(&env_or_default("PDF_FORMAT", "A4"))?,
                landscape: parse_env_bool("PDF_LANDSCAPE", false)?,
                scale: parse_env_f64("PDF_SCALE", 0.8)?,
                print_background: parse_env_bool("PDF_PRINT_BACKGROUND", true)?,
            },

            // Browser
            chrome_path: optional_env("CHROME_PATH"),
            viewport_width: parse_env_u32("VIEWPORT_WIDTH", DEFAULT_VIEWPORT_WIDTH)?,
            viewport_height: parse_env_u32("VIEWPORT_HEIGHT", DEFAULT_VIEWPORT_HEIGHT)?,
            navigation_timeout: Duration::from_secs(parse_env_u64(
                "NAVIGATION_TIMEOUT_SECS",
                DEFAULT_NAVIGATION_TIMEOUT_SECS,
            )?),
            settle_delay: Duration::from_millis(parse_env_u64(
                "SETTLE_DELAY_MS",
                DEFAULT_SETTLE_DELAY_MS,
            )?),

            // Scrolling
            scroll_enabled: parse_env_bool("SCROLL_ENABLED", true)?,
            scroll: scroll_config_from_env()?,
            scroll_timeout: Duration::from_secs(parse_env_u64("SCROLL_TIMEOUT_SECS", 300)?),
        })
    }

    /// Validate that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.viewport_width == 0 || self.viewport_height == 0 {
            return Err(ConfigError::InvalidValue {
                name: "VIEWPORT_WIDTH/VIEWPORT_HEIGHT".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if !(0.1..=2.0).contains(&self.pdf.scale) {
            return Err(ConfigError::InvalidValue {
                name: "PDF_SCALE".to_string(),
                message: format!("must be between 0.1 and 2.0, got {}", self.pdf.scale),
            });
        }
        if let FrameTarget::Iframe { selector } = &self.target_frame {
            if selector.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    name: "IFRAME_SELECTOR".to_string(),
                    message: "cannot be empty".to_string(),
                });
            }
        }
        if self.output_path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "OUTPUT_PATH".to_string(),
                message: "cannot be empty".to_string(),
            });
        }
        self.scroll
            .validate()
            .map_err(|e| ConfigError::InvalidValue {
                name: "SCROLL_*".to_string(),
                message: e.to_string(),
            })
    }

    /// Browser settings for the capture service.
    #[must_use]
    pub fn browser_options(&self) -> BrowserOptions {
        BrowserOptions {
            viewport_width: self.viewport_width,
            viewport_height: self.viewport_height,
            navigation_timeout: self.navigation_timeout,
            settle_delay: self.settle_delay,
            chrome_path: self.chrome_path.clone(),
        }
    }

    /// The capture this configuration describes.
    #[must_use]
    pub fn capture_job(&self) -> CaptureJob {
        CaptureJob {
            url: self.webpage_url.clone(),
            frame: self.target_frame.clone(),
            frame_wait: self.frame_wait_timeout,
            scroll: self.scroll_enabled.then(|| self.scroll.clone()),
            scroll_budget: self.scroll_timeout,
            format: self.output_format,
            pdf: self.pdf.clone(),
            output_path: self.output_path.clone(),
        }
    }
}

/// Strategy preset overlaid with any `SCROLL_*` overrides.
fn scroll_config_from_env() -> Result<ScrollConfig, ConfigError> {
    let strategy = parse_scroll_strategy(&env_or_default("SCROLL_STRATEGY", "wheel"))?;
    let preset = ScrollConfig::preset(strategy);

    let (preset_wait, preset_delay) = match preset.wait {
        WaitMode::Growth { .. } => ("growth", 1000),
        WaitMode::Delay(delay) => ("delay", u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)),
    };
    let delay = Duration::from_millis(parse_env_u64("SCROLL_DELAY_MS", preset_delay)?);
    let timeout = Duration::from_millis(parse_env_u64(
        "SCROLL_ITERATION_TIMEOUT_MS",
        DEFAULT_ITERATION_TIMEOUT_MS,
    )?);
    let wait = match env_or_default("SCROLL_WAIT", preset_wait).to_lowercase().as_str() {
        "growth" => WaitMode::Growth { timeout },
        "delay" => WaitMode::Delay(delay),
        other => {
            return Err(ConfigError::InvalidValue {
                name: "SCROLL_WAIT".to_string(),
                message: format!("must be 'growth' or 'delay', got '{other}'"),
            })
        }
    };

    Ok(ScrollConfig {
        strategy,
        step_size: parse_env_f64("SCROLL_STEP_PX", preset.step_size)?,
        wait,
        max_iterations: parse_env_u32("SCROLL_MAX_ITERATIONS", preset.max_iterations)?,
        completion_selector: optional_env("COMPLETION_SELECTOR"),
    })
}

fn required_env(name: &str) -> Result<String, ConfigError> {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_or_default(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_u32(name: &str, default: u32) -> Result<u32, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_f64(name: &str, default: f64) -> Result<f64, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseFloat {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_bool(name: &str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => match val.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::ParseBool {
                name: name.to_string(),
                value: val,
            }),
        },
        _ => Ok(default),
    }
}

fn parse_output_format(value: &str) -> Result<OutputFormat, ConfigError> {
    match value.to_lowercase().as_str() {
        "mhtml" | "mht" => Ok(OutputFormat::Mhtml),
        "pdf" => Ok(OutputFormat::Pdf),
        _ => Err(ConfigError::InvalidValue {
            name: "OUTPUT_FORMAT".to_string(),
            message: format!("must be 'mhtml' or 'pdf', got '{value}'"),
        }),
    }
}

fn parse_scroll_strategy(value: &str) -> Result<DriveStrategy, ConfigError> {
    match value.to_lowercase().as_str() {
        "wheel" => Ok(DriveStrategy::WheelDelta),
        "key" | "keyboard" => Ok(DriveStrategy::KeyPress),
        "container" => Ok(DriveStrategy::ContainerScroll),
        _ => Err(ConfigError::InvalidValue {
            name: "SCROLL_STRATEGY".to_string(),
            message: format!("must be 'wheel', 'key' or 'container', got '{value}'"),
        }),
    }
}

fn parse_target_frame(value: &str, selector: String) -> Result<FrameTarget, ConfigError> {
    match value.to_lowercase().as_str() {
        "top" => Ok(FrameTarget::Top),
        "iframe" => Ok(FrameTarget::Iframe { selector }),
        _ => Err(ConfigError::InvalidValue {
            name: "TARGET_FRAME".to_string(),
            message: format!("must be 'top' or 'iframe', got '{value}'"),
        }),
    }
}

fn parse_paper_format(value: &str) -> Result<PaperFormat, ConfigError> {
    match value.to_lowercase().as_str() {
        "a3" => Ok(PaperFormat::A3),
        "a4" => Ok(PaperFormat::A4),
        "a5" => Ok(PaperFormat::A5),
        "letter" => Ok(PaperFormat::Letter),
        "legal" => Ok(PaperFormat::Legal),
        "tabloid" => Ok(PaperFormat::Tabloid),
        _ => Err(ConfigError::InvalidValue {
            name: "PDF_FORMAT".to_string(),
            message: format!("unsupported paper format '{value}'"),
        }),
    }
}
