//! File-based config loader (`group-scout.json`) with env-var fallback.
//!
//! Every field is optional in the file; each `resolve_*` accessor applies the
//! `JSON field → env var → default` chain, so a bare environment-only
//! deployment works without any file at all.

use std::path::Path;
use std::time::Duration;

/// Credentials are supplied as trusted configuration. The password is never
/// logged.
#[derive(Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Top-level config loaded from `group-scout.json`.
#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct HarvesterConfig {
    /// Account email used on the login form.
    pub account_email: Option<String>,
    /// Account password used on the login form.
    pub account_password: Option<String>,
    /// Display name of the profile to switch to after login (best-effort).
    pub target_account: Option<String>,
    /// Login page URL.
    pub login_url: Option<String>,
    /// Joined-groups listing URL.
    pub groups_url: Option<String>,
    /// CSS selector matching group anchors on the listing page.
    pub anchor_selector: Option<String>,
    /// Consecutive unchanged-count rounds before the scroller stops.
    pub idle_threshold: Option<u32>,
    /// Milliseconds to let the page settle between scroll rounds.
    pub settle_interval_ms: Option<u64>,
    /// Hard cap on scroll rounds against a page that never stabilizes.
    pub max_scroll_rounds: Option<u32>,
    /// Milliseconds to let the page settle after a navigation.
    pub nav_settle_ms: Option<u64>,
    /// Seconds after which the 2FA checkpoint auto-continues without an
    /// operator signal. Unset (the default) waits indefinitely.
    pub auto_continue_secs: Option<u64>,
    /// Path-segment ids that are navigation chrome, not groups.
    pub id_denylist: Option<Vec<String>>,
    /// Label substrings that mark an anchor as navigation chrome.
    pub name_denylist: Option<Vec<String>>,
    /// Default message body for the post action.
    pub post_message: Option<String>,
    /// Run the browser headless. Off by default; the operator completes 2FA
    /// in the visible window.
    pub headless: Option<bool>,
}

pub const ENV_CONFIG_PATH: &str = "GROUP_SCOUT_CONFIG";
pub const ENV_ACCOUNT_EMAIL: &str = "GROUP_SCOUT_EMAIL";
pub const ENV_ACCOUNT_PASSWORD: &str = "GROUP_SCOUT_PASSWORD";
pub const ENV_TARGET_ACCOUNT: &str = "TARGET_ACCOUNT_NAME";
pub const ENV_CHROME_EXECUTABLE: &str = "CHROME_EXECUTABLE";

const DEFAULT_LOGIN_URL: &str = "https://www.facebook.com/login";
const DEFAULT_GROUPS_URL: &str =
    "https://www.facebook.com/groups/joins/?nav_source=tab&ordering=viewer_added";
const DEFAULT_ANCHOR_SELECTOR: &str = r#"a[href*="/groups/"]"#;
const DEFAULT_ID_DENYLIST: &[&str] = &["feed", "discover", "joins", "create"];
const DEFAULT_NAME_DENYLIST: &[&str] = &["feed", "discover", "create"];

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().and_then(|v| {
        let v = v.trim().to_string();
        if v.is_empty() {
            None
        } else {
            Some(v)
        }
    })
}

impl HarvesterConfig {
    /// Both credential halves, or `None` when either is missing; a start
    /// request without resolvable credentials fails before a browser is
    /// launched.
    pub fn resolve_credentials(&self) -> Option<Credentials> {
        let email = self
            .account_email
            .clone()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| env_nonempty(ENV_ACCOUNT_EMAIL))?;
        let password = self
            .account_password
            .clone()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| env_nonempty(ENV_ACCOUNT_PASSWORD))?;
        Some(Credentials { email, password })
    }

    pub fn resolve_target_account(&self) -> Option<String> {
        self.target_account
            .clone()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| env_nonempty(ENV_TARGET_ACCOUNT))
    }

    pub fn resolve_login_url(&self) -> String {
        self.login_url
            .clone()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LOGIN_URL.to_string())
    }

    pub fn resolve_groups_url(&self) -> String {
        self.groups_url
            .clone()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_GROUPS_URL.to_string())
    }

    pub fn resolve_anchor_selector(&self) -> String {
        self.anchor_selector
            .clone()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ANCHOR_SELECTOR.to_string())
    }

    /// Idle threshold: JSON field → `GROUP_SCOUT_IDLE_THRESHOLD` env → 3.
    pub fn resolve_idle_threshold(&self) -> u32 {
        if let Some(n) = self.idle_threshold {
            return n.max(1);
        }
        std::env::var("GROUP_SCOUT_IDLE_THRESHOLD")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3)
    }

    /// Settle interval: JSON field → `GROUP_SCOUT_SETTLE_MS` env → 1500 ms.
    pub fn resolve_settle_interval(&self) -> Duration {
        let ms = if let Some(ms) = self.settle_interval_ms {
            ms
        } else {
            std::env::var("GROUP_SCOUT_SETTLE_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1500)
        };
        Duration::from_millis(ms)
    }

    pub fn resolve_max_scroll_rounds(&self) -> u32 {
        self.max_scroll_rounds.unwrap_or(120).max(1)
    }

    pub fn resolve_nav_settle(&self) -> Duration {
        Duration::from_millis(self.nav_settle_ms.unwrap_or(3000))
    }

    pub fn resolve_auto_continue(&self) -> Option<Duration> {
        self.auto_continue_secs.map(Duration::from_secs)
    }

    pub fn resolve_id_denylist(&self) -> Vec<String> {
        match &self.id_denylist {
            Some(list) if !list.is_empty() => list.clone(),
            _ => DEFAULT_ID_DENYLIST.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn resolve_name_denylist(&self) -> Vec<String> {
        match &self.name_denylist {
            Some(list) if !list.is_empty() => list.clone(),
            _ => DEFAULT_NAME_DENYLIST
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    pub fn resolve_post_message(&self) -> Option<String> {
        self.post_message.clone().filter(|v| !v.trim().is_empty())
    }

    pub fn resolve_headless(&self) -> bool {
        self.headless.unwrap_or(false)
    }
}

/// Optional override for the Chromium-family browser executable.
///
/// Default behavior is auto-discovery (see `browser::chrome`). This only
/// returns a value when `CHROME_EXECUTABLE` points at an existing path.
pub fn chrome_executable_override() -> Option<String> {
    let p = std::env::var(ENV_CHROME_EXECUTABLE).ok()?;
    let p = p.trim();
    if p.is_empty() {
        return None;
    }
    if Path::new(p).exists() {
        Some(p.to_string())
    } else {
        None
    }
}

/// Load `group-scout.json` from standard locations.
///
/// Search order (first found wins):
/// 1. `GROUP_SCOUT_CONFIG` env var path
/// 2. `./group-scout.json`
/// 3. `../group-scout.json`
///
/// Missing file → defaults (silent, env-var fallbacks apply per field).
/// Parse error → log a warning, return defaults.
pub fn load_config() -> HarvesterConfig {
    let candidates: Vec<std::path::PathBuf> = {
        let mut v = vec![
            std::path::PathBuf::from("group-scout.json"),
            std::path::PathBuf::from("../group-scout.json"),
        ];
        if let Ok(env_path) = std::env::var(ENV_CONFIG_PATH) {
            v.insert(0, std::path::PathBuf::from(env_path));
        }
        v
    };

    for path in &candidates {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<HarvesterConfig>(&contents) {
                Ok(cfg) => {
                    tracing::info!("group-scout.json loaded from {}", path.display());
                    return cfg;
                }
                Err(e) => {
                    tracing::warn!(
                        "group-scout.json parse error at {}: {} — using defaults",
                        path.display(),
                        e
                    );
                    return HarvesterConfig::default();
                }
            },
            Err(_) => continue, // not at this path, try next
        }
    }

    HarvesterConfig::default()
}
