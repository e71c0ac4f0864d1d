//! Lazy-load convergence scroller.
//!
//! Forces a virtualized listing to fully materialize without knowing the
//! total count in advance: scroll a viewport, let the page settle, count the
//! matching elements, and stop once the count has been flat for
//! `idle_threshold` consecutive rounds. `max_rounds` bounds the loop against
//! a page that never stabilizes (infinite feeds, busy widgets).

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::browser::{BrowserDriver, DriverError};

#[derive(Debug, Clone)]
pub struct ScrollSettings {
    /// Consecutive unchanged-count rounds that mean "fully loaded".
    pub idle_threshold: u32,
    /// Settle time between rounds.
    pub settle_interval: Duration,
    /// Hard cap on total rounds.
    pub max_rounds: u32,
}

impl Default for ScrollSettings {
    fn default() -> Self {
        Self {
            idle_threshold: 3,
            settle_interval: Duration::from_millis(1500),
            max_rounds: 120,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrollOutcome {
    pub final_count: usize,
    pub rounds: u32,
    /// False when the loop hit `max_rounds` before the count settled.
    pub converged: bool,
}

/// Run the convergence loop against the live page.
///
/// A listing with zero matching elements still terminates after
/// `idle_threshold` idle rounds at count 0; empty is a valid outcome, not
/// an error.
pub async fn scroll_until_settled(
    driver: &dyn BrowserDriver,
    selector: &str,
    settings: &ScrollSettings,
) -> Result<ScrollOutcome, DriverError> {
    let mut previous_count = 0usize;
    let mut idle_rounds = 0u32;
    let mut rounds = 0u32;

    loop {
        rounds += 1;
        let count = driver.count_matches(selector).await?;
        debug!("scroll round {}: {} matching elements", rounds, count);

        if count == previous_count {
            idle_rounds += 1;
        } else {
            idle_rounds = 0;
            previous_count = count;
        }

        if idle_rounds >= settings.idle_threshold {
            info!(
                "✅ listing settled at {} elements after {} rounds",
                count, rounds
            );
            return Ok(ScrollOutcome {
                final_count: count,
                rounds,
                converged: true,
            });
        }

        if rounds >= settings.max_rounds {
            warn!(
                "scroll loop hit the {}-round cap at {} elements without settling",
                settings.max_rounds, count
            );
            return Ok(ScrollOutcome {
                final_count: count,
                rounds,
                converged: false,
            });
        }

        driver.scroll_by_viewport().await?;
        tokio::time::sleep(settings.settle_interval).await;
    }
}
