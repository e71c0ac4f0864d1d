//! Session driver: carries one harvesting or posting attempt from start to
//! a terminal job state through an external, slow, semi-interactive browser.
//!
//! One driver task exists per run. Every browser call is a suspension point,
//! so the polling API keeps serving while the session grinds along. The 2FA
//! checkpoint is a genuine async suspension: the task parks on a one-shot
//! channel the `/continue` endpoint resolves. Operator reset raises an abort
//! flag the task observes between phases and inside waits.
//!
//! Nothing escapes the outermost scope un-normalized: any fault becomes the
//! `error` terminal state with a message string, and the browser session is
//! force-closed on the way out.

use std::sync::Arc;
use std::time::Duration;

use rand::RngExt;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::browser::{BrowserDriver, DriverError};
use crate::core::app_state::AppState;
use crate::core::config::{Credentials, HarvesterConfig};
use crate::core::job_state::{JobStateError, RunSignals};
use crate::core::types::{GroupRecord, SessionGoal};
use crate::harvest::{extract_groups, scroll_until_settled, ExtractSettings, ScrollSettings};

const EMAIL_SELECTOR: &str = "#email";
const PASSWORD_SELECTOR: &str = "#pass";
const LOGIN_BUTTON_SELECTOR: &str = "button[name='login']";
const AVATAR_SELECTOR: &str = "div[aria-label='Account'], div[aria-label='Your profile']";
const COMPOSER_SELECTOR: &str = "div[role='textbox']";
const POST_BUTTON_TEXT: &str = "Post";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("login failed: {0}")]
    LoginFailure(String),

    #[error("browser automation fault: {0}")]
    Driver(#[from] DriverError),

    #[error("session aborted by operator")]
    Aborted,
}

/// Why a run could not be kicked off at all.
#[derive(Debug, Error)]
pub enum StartError {
    #[error(transparent)]
    State(#[from] JobStateError),

    #[error("account credentials are not configured")]
    MissingCredentials,
}

enum SessionOutcome {
    Harvested(Vec<GroupRecord>),
    Posted { posted: usize, total: usize },
}

pub struct SessionDriver;

impl SessionDriver {
    /// Begin a new run: claim the job store, then detach the session task.
    ///
    /// Fails fast, before any browser exists, when a session is already
    /// live or the credentials cannot be resolved.
    pub fn spawn(state: Arc<AppState>, goal: SessionGoal) -> Result<(), StartError> {
        let credentials = state
            .config
            .resolve_credentials()
            .ok_or(StartError::MissingCredentials)?;
        let signals = state.job.begin(&goal)?;
        tokio::spawn(run_session(state, goal, credentials, signals));
        Ok(())
    }
}

async fn run_session(
    state: Arc<AppState>,
    goal: SessionGoal,
    credentials: Credentials,
    mut signals: RunSignals,
) {
    let run = signals.run_id;
    info!("session {}: {} run starting", run, goal);

    let driver = match state.launcher.launch().await {
        Ok(d) => d,
        Err(e) => {
            error!("session {}: browser launch failed: {}", run, e);
            state
                .job
                .finish_err(run, &format!("failed to launch browser: {e}"));
            return;
        }
    };

    let outcome = drive(driver.as_ref(), &state, &goal, &credentials, &mut signals).await;

    // The session is force-closed no matter how the run ended; a close error
    // must not shadow the run's own outcome.
    if let Err(e) = driver.close().await {
        warn!("session {}: browser close error (non-fatal): {}", run, e);
    }

    match outcome {
        Ok(SessionOutcome::Harvested(groups)) => {
            info!("session {}: harvested {} groups", run, groups.len());
            let summary = format!("✅ harvest complete — {} groups found", groups.len());
            state.job.finish_ok(run, &summary, Some(groups));
        }
        Ok(SessionOutcome::Posted { posted, total }) => {
            info!("session {}: posted to {}/{} groups", run, posted, total);
            let summary = format!("✅ posting complete — {posted} of {total} groups");
            state.job.finish_ok(run, &summary, None);
        }
        Err(SessionError::Aborted) => {
            // Reset already rewound the store; the run-id guard makes this a
            // no-op unless the task aborted for another reason.
            info!("session {}: aborted", run);
            state.job.finish_err(run, "session aborted");
        }
        Err(e) => {
            error!("session {}: {}", run, e);
            state.job.finish_err(run, &e.to_string());
        }
    }
}

async fn drive(
    driver: &dyn BrowserDriver,
    state: &AppState,
    goal: &SessionGoal,
    credentials: &Credentials,
    signals: &mut RunSignals,
) -> Result<SessionOutcome, SessionError> {
    authenticate(driver, state, credentials, signals).await?;
    match goal {
        SessionGoal::Harvest => harvest(driver, state, signals).await,
        SessionGoal::Post { targets, message } => {
            post_to_groups(driver, state, signals, targets, message).await
        }
    }
}

// ── Login and the 2FA checkpoint ─────────────────────────────────────────────

async fn authenticate(
    driver: &dyn BrowserDriver,
    state: &AppState,
    credentials: &Credentials,
    signals: &mut RunSignals,
) -> Result<(), SessionError> {
    let cfg = &state.config;
    let run = signals.run_id;

    state.job.append_output(run, "➡️ logging in…");
    driver.goto(&cfg.resolve_login_url()).await?;
    ensure_not_aborted(&signals.abort_rx)?;

    if !driver
        .wait_for_selector(EMAIL_SELECTOR, Duration::from_secs(10))
        .await?
    {
        return Err(SessionError::LoginFailure(
            "login form did not appear".to_string(),
        ));
    }

    driver.type_text(EMAIL_SELECTOR, &credentials.email).await?;
    field_jitter().await;
    driver
        .type_text(PASSWORD_SELECTOR, &credentials.password)
        .await?;
    driver.click(LOGIN_BUTTON_SELECTOR).await?;

    // Cooperative suspension checkpoint: halt until the operator signals
    // continuation (or the configured degenerate fallback delay elapses).
    state.job.mark_waiting(run);
    state.job.append_output(
        run,
        "⚠️ complete CAPTCHA or 2FA in the browser, then POST /continue",
    );
    wait_for_continuation(state, signals).await?;
    state
        .job
        .append_output(run, "▶️ resuming after two-factor checkpoint");
    tokio::time::sleep(cfg.resolve_nav_settle()).await;

    let here = driver.current_url().await?;
    if here.contains("/login") {
        return Err(SessionError::LoginFailure(format!(
            "still on the login page after continuation ({here})"
        )));
    }

    // Best-effort account switch: never fatal, absence of the affordance is
    // an answer.
    if let Some(target) = cfg.resolve_target_account() {
        state
            .job
            .append_output(run, &format!("➡️ attempting switch to \"{target}\"…"));
        match switch_account(driver, &target).await {
            Ok(true) => {
                state.job.append_output(run, &format!("✅ switched to {target}"));
                tokio::time::sleep(cfg.resolve_nav_settle()).await;
            }
            Ok(false) => {
                warn!("no switch control found for {:?}", target);
                state.job.append_output(
                    run,
                    &format!("⚠️ no switch control found for {target} — continuing as-is"),
                );
            }
            Err(e) => {
                warn!("account switch failed: {}", e);
                state.job.append_output(
                    run,
                    &format!("⚠️ account switch failed ({e}) — continuing as-is"),
                );
            }
        }
    }

    Ok(())
}

/// Park at the 2FA checkpoint until one of: the operator's continue signal,
/// an operator reset, or the optional auto-continue fallback.
async fn wait_for_continuation(
    state: &AppState,
    signals: &mut RunSignals,
) -> Result<(), SessionError> {
    let run = signals.run_id;
    let auto = state.config.resolve_auto_continue();
    let resume_rx = &mut signals.resume_rx;
    let abort_rx = &mut signals.abort_rx;

    tokio::select! {
        res = resume_rx => match res {
            // `resume()` already moved the status back to running.
            Ok(()) => Ok(()),
            // Sender dropped without firing: the handle was torn down.
            Err(_) => Err(SessionError::Aborted),
        },
        _ = wait_aborted(abort_rx) => Err(SessionError::Aborted),
        _ = sleep_or_forever(auto) => {
            state.job.mark_running(run);
            state.job.append_output(
                run,
                "⏰ auto-continue delay elapsed — resuming without an operator signal",
            );
            Ok(())
        }
    }
}

async fn sleep_or_forever(duration: Option<Duration>) {
    match duration {
        Some(d) => tokio::time::sleep(d).await,
        None => futures::future::pending::<()>().await,
    }
}

async fn wait_aborted(abort_rx: &mut watch::Receiver<bool>) {
    loop {
        if *abort_rx.borrow() {
            return;
        }
        if abort_rx.changed().await.is_err() {
            // Sender gone without raising the flag; nothing to wait for.
            futures::future::pending::<()>().await;
        }
    }
}

fn ensure_not_aborted(abort_rx: &watch::Receiver<bool>) -> Result<(), SessionError> {
    if *abort_rx.borrow() {
        Err(SessionError::Aborted)
    } else {
        Ok(())
    }
}

/// Small human-ish pause between credential fields.
async fn field_jitter() {
    let ms: u64 = { rand::rng().random_range(60..180) };
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

async fn switch_account(driver: &dyn BrowserDriver, target: &str) -> Result<bool, DriverError> {
    if !driver
        .wait_for_selector(AVATAR_SELECTOR, Duration::from_secs(1))
        .await?
    {
        return Ok(false);
    }
    driver.click(AVATAR_SELECTOR).await?;
    tokio::time::sleep(Duration::from_secs(2)).await;

    let label = format!("Switch to {target}");
    let exact_selector = format!(r#"[aria-label="{label}"]"#);
    if driver.click(&exact_selector).await.is_ok() {
        return Ok(true);
    }
    // Exact selector missed (or the label carries decorations); substring
    // scan in document order.
    driver.click_by_label_contains(&label).await
}

// ── Harvest goal ─────────────────────────────────────────────────────────────

async fn harvest(
    driver: &dyn BrowserDriver,
    state: &AppState,
    signals: &mut RunSignals,
) -> Result<SessionOutcome, SessionError> {
    let cfg = &state.config;
    let run = signals.run_id;

    state.job.append_output(run, "➡️ fetching joined groups…");
    driver.goto(&cfg.resolve_groups_url()).await?;
    tokio::time::sleep(cfg.resolve_nav_settle()).await;
    ensure_not_aborted(&signals.abort_rx)?;

    state.job.append_output(run, "🌀 scrolling to load all groups…");
    let selector = cfg.resolve_anchor_selector();
    let scroll = ScrollSettings {
        idle_threshold: cfg.resolve_idle_threshold(),
        settle_interval: cfg.resolve_settle_interval(),
        max_rounds: cfg.resolve_max_scroll_rounds(),
    };
    let outcome = scroll_until_settled(driver, &selector, &scroll).await?;
    if outcome.converged {
        state.job.append_output(
            run,
            &format!(
                "loaded {} candidate entries in {} rounds",
                outcome.final_count, outcome.rounds
            ),
        );
    } else {
        state.job.append_output(
            run,
            &format!(
                "⚠️ listing never settled — proceeding with {} loaded entries",
                outcome.final_count
            ),
        );
    }
    ensure_not_aborted(&signals.abort_rx)?;

    state.job.append_output(run, "🔍 extracting group details…");
    let html = driver.content().await?;
    let settings = ExtractSettings {
        anchor_selector: selector,
        base_url: base_origin(&cfg.resolve_groups_url()),
        id_denylist: cfg.resolve_id_denylist(),
        name_denylist: cfg.resolve_name_denylist(),
    };
    let groups = extract_groups(&html, &settings);

    // Structure drift degrades to a partial or empty result; the run still
    // completes with whatever was found.
    if groups.is_empty() && outcome.final_count > 0 {
        warn!(
            "extraction found no records despite {} loaded anchors",
            outcome.final_count
        );
        state.job.append_output(
            run,
            "⚠️ no records extracted despite loaded anchors — page structure may have drifted",
        );
    }

    Ok(SessionOutcome::Harvested(groups))
}

fn base_origin(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.join("/").ok())
        .map(|u| u.to_string())
        .unwrap_or_else(|| url.to_string())
}

// ── Post goal ────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
enum PostStepError {
    #[error("post composer not found")]
    ComposerNotFound,

    #[error("post button not found")]
    ButtonNotFound,

    #[error(transparent)]
    Driver(#[from] DriverError),
}

async fn post_to_groups(
    driver: &dyn BrowserDriver,
    state: &AppState,
    signals: &mut RunSignals,
    targets: &[String],
    message: &str,
) -> Result<SessionOutcome, SessionError> {
    let run = signals.run_id;
    let total = targets.len();
    let mut posted = 0usize;

    for (index, target) in targets.iter().enumerate() {
        ensure_not_aborted(&signals.abort_rx)?;
        state.job.append_output(
            run,
            &format!("📝 posting to {} ({}/{})", target, index + 1, total),
        );
        // Per-group failures are absorbed: log, record, move on.
        match post_once(driver, &state.config, target, message).await {
            Ok(()) => posted += 1,
            Err(e) => {
                warn!("posting to {} failed: {}", target, e);
                state
                    .job
                    .append_output(run, &format!("⚠️ could not post to {target}: {e}"));
            }
        }
    }

    Ok(SessionOutcome::Posted { posted, total })
}

async fn post_once(
    driver: &dyn BrowserDriver,
    cfg: &HarvesterConfig,
    url: &str,
    message: &str,
) -> Result<(), PostStepError> {
    driver.goto(url).await?;
    tokio::time::sleep(cfg.resolve_nav_settle()).await;

    if !driver
        .wait_for_selector(COMPOSER_SELECTOR, Duration::from_secs(8))
        .await?
    {
        return Err(PostStepError::ComposerNotFound);
    }
    driver.type_text(COMPOSER_SELECTOR, message).await?;
    field_jitter().await;

    if !driver.click_by_text(POST_BUTTON_TEXT).await? {
        return Err(PostStepError::ButtonNotFound);
    }
    // Let the submission land before moving to the next group.
    tokio::time::sleep(cfg.resolve_nav_settle()).await;
    Ok(())
}
