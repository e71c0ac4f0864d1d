use std::sync::Arc;

use crate::browser::chrome::ChromeLauncher;
use crate::browser::BrowserLauncher;
use crate::core::config::HarvesterConfig;
use crate::core::job_state::JobStore;

#[derive(Clone)]
pub struct AppState {
    /// Singleton job record; the session task writes, handlers read snapshots.
    pub job: Arc<JobStore>,
    /// Creates one browser session per run; swapped for a fake in tests.
    pub launcher: Arc<dyn BrowserLauncher>,
    pub config: Arc<HarvesterConfig>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("job", &self.job.snapshot().status)
            .field("credentials_configured", &self.config.resolve_credentials().is_some())
            .finish()
    }
}

impl AppState {
    pub fn new(config: HarvesterConfig) -> Self {
        let config = Arc::new(config);
        Self {
            job: Arc::new(JobStore::new()),
            launcher: Arc::new(ChromeLauncher::new(config.clone())),
            config,
        }
    }

    /// Substitute the browser launcher (tests inject a scripted fake here).
    pub fn with_launcher(mut self, launcher: Arc<dyn BrowserLauncher>) -> Self {
        self.launcher = launcher;
        self
    }
}
