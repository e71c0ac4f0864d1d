use serde::{Deserialize, Serialize};

/// One harvested community entry.
///
/// `url` is canonical (query string and fragment stripped) and acts as the
/// dedup key across a harvest. `id` is the path segment after the groups
/// prefix, deterministic from `url`, but only `(id, url)` together identify
/// a record when the site reuses path segments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupRecord {
    pub id: String,
    pub name: String,
    pub url: String,
    /// Secondary descriptive text when the listing shows one ("1.2K members").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member_count: Option<String>,
}

/// Lifecycle of the process-wide automation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    #[serde(rename = "idle")]
    Idle,
    #[serde(rename = "running")]
    Running,
    #[serde(rename = "waiting-2fa")]
    Waiting2fa,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "error")]
    Error,
}

impl JobStatus {
    /// Terminal states stay put until an operator reset.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Idle => "idle",
            JobStatus::Running => "running",
            JobStatus::Waiting2fa => "waiting-2fa",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// What a session run is trying to accomplish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionGoal {
    /// Log in, load the full joined-groups listing, extract the records.
    Harvest,
    /// Log in, then post `message` to each target group URL in order.
    Post {
        targets: Vec<String>,
        message: String,
    },
}

impl std::fmt::Display for SessionGoal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionGoal::Harvest => f.write_str("harvest"),
            SessionGoal::Post { .. } => f.write_str("post"),
        }
    }
}

// ───────────────────────────────────────────────────────────────────────────
// Polling API wire types
// ───────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub status: JobStatus,
    pub output: String,
    pub is_running: bool,
    pub timestamp: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartResponse {
    pub message: String,
    pub status: JobStatus,
    pub output: String,
}

/// 400 body for `/start` and `/post`; echoes the current status and output
/// so a poller that raced the rejection still sees the live run.
#[derive(Debug, Serialize, Deserialize)]
pub struct StartRejected {
    pub error: String,
    pub status: JobStatus,
    pub output: String,
}

/// 500 body when a run could not even be kicked off.
#[derive(Debug, Serialize, Deserialize)]
pub struct StartFailed {
    pub error: String,
    pub message: String,
    pub status: JobStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ContinueResponse {
    pub message: String,
    pub status: JobStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ContinueRejected {
    pub error: String,
    pub status: JobStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GroupsResponse {
    pub success: bool,
    pub groups: Vec<GroupRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PostRequest {
    /// Canonical group URLs to post into. Empty → fall back to the last
    /// harvested list.
    #[serde(default)]
    pub groups: Vec<String>,
    /// Message body; falls back to the configured default.
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
