//! Browser driver capability boundary.
//!
//! The session driver, scroller, and extractor only ever see these traits,
//! never `chromiumoxide` types, so the scraping heuristics stay unit-testable
//! against a fake DOM provider while the real CDP implementation lives in
//! [`chrome`].

pub mod chrome;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("browser launch failed: {0}")]
    Launch(String),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("element interaction failed ({selector}): {message}")]
    Input { selector: String, message: String },

    #[error("script evaluation failed: {0}")]
    Eval(String),

    #[error("browser session closed unexpectedly: {0}")]
    Closed(String),
}

/// The capability set the core consumes. Kept deliberately small: anything a
/// page flow needs must be expressible through these calls.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Navigate and wait for the load to commit.
    async fn goto(&self, url: &str) -> Result<(), DriverError>;

    /// Click the element matching `selector`, then type `text` into it.
    async fn type_text(&self, selector: &str, text: &str) -> Result<(), DriverError>;

    /// Click the first element matching `selector`.
    async fn click(&self, selector: &str) -> Result<(), DriverError>;

    /// Poll for `selector` until it appears or `timeout` elapses.
    ///
    /// Absence is an answer, not a fault: returns `Ok(false)` on timeout so
    /// callers can treat a missing affordance as "feature not available".
    async fn wait_for_selector(&self, selector: &str, timeout: Duration)
        -> Result<bool, DriverError>;

    /// Number of elements currently matching `selector`.
    async fn count_matches(&self, selector: &str) -> Result<usize, DriverError>;

    /// Scroll forward by one viewport height.
    async fn scroll_by_viewport(&self) -> Result<(), DriverError>;

    /// Click the first element whose `aria-label` contains `needle`
    /// (document order). Returns whether anything was clicked.
    async fn click_by_label_contains(&self, needle: &str) -> Result<bool, DriverError>;

    /// Click the first element whose trimmed text equals `text` exactly.
    /// Returns whether anything was clicked.
    async fn click_by_text(&self, text: &str) -> Result<bool, DriverError>;

    /// Serialized snapshot of the live document.
    async fn content(&self) -> Result<String, DriverError>;

    /// The page's current URL.
    async fn current_url(&self) -> Result<String, DriverError>;

    /// Tear the underlying browser session down. Idempotent.
    async fn close(&self) -> Result<(), DriverError>;
}

/// Creates driver instances; this is the seam where tests substitute a scripted
/// fake for a real Chromium process.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn BrowserDriver>, DriverError>;
}
