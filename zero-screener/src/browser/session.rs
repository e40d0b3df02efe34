//! Persistent browser session management.
//!
//! One authenticated page is shared by every fetch. Exclusive use goes
//! through a FIFO mutex: `acquire` waits its turn, initializes or recovers
//! the session when needed, and hands out a `SessionHandle` that must be
//! returned through `release` with the outcome of the work.
//!
//! State transitions:
//!
//! ```text
//! UNINITIALIZED ──init──▶ READY ──failure──▶ DEGRADED ──acquire/monitor──▶ RECOVERING
//!                                                                          │
//!                             READY ◀──success── RECOVERING ──budget spent──▶ UNINITIALIZED
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::cookies::CookieJar;
use super::driver::{BrowserLauncher, BrowserPage};
use crate::error::{Result, ScreenerError};

/// Poll interval while waiting for the signed-in indicator.
const LOGIN_POLL_INTERVAL: Duration = Duration::from_millis(500);

// ============================================================================
// Types
// ============================================================================

/// Lifecycle state of the shared session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Uninitialized,
    Ready,
    Degraded,
    Recovering,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Uninitialized => "UNINITIALIZED",
            SessionState::Ready => "READY",
            SessionState::Degraded => "DEGRADED",
            SessionState::Recovering => "RECOVERING",
        };
        f.write_str(s)
    }
}

/// Session lifecycle settings.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub cookies_path: PathBuf,
    pub required_cookies: Vec<String>,
    /// Bound on one launch + login check
    pub init_timeout: Duration,
    /// Launch attempts per recovery
    pub recovery_attempts: u32,
    pub probe_timeout: Duration,
    /// Background monitor interval; zero disables it
    pub health_check_interval: Duration,
}

impl SessionSettings {
    pub fn from_config(config: &zero_common::ScreenerConfig) -> Self {
        Self {
            cookies_path: config.cookies_file(),
            required_cookies: config.required_cookies.clone(),
            init_timeout: Duration::from_secs(config.session.init_timeout_secs),
            recovery_attempts: config.session.recovery_attempts,
            probe_timeout: Duration::from_secs(config.session.probe_timeout_secs),
            health_check_interval: Duration::from_secs(config.session.health_check_interval_secs),
        }
    }
}

/// What happened while a handle was held.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Success,
    Failure(String),
}

/// Health report for the shared session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionHealth {
    pub state: SessionState,
    /// Probe result; `None` when the probe was skipped because a fetch
    /// holds the session
    pub alive: Option<bool>,
    pub in_use: bool,
    #[serde(rename = "uptime")]
    pub uptime_secs: Option<u64>,
    pub created_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub request_count: u64,
    pub recovery_count: u64,
}

#[derive(Debug)]
struct SessionMeta {
    state: SessionState,
    created_at: Option<Instant>,
    created_at_wall: Option<DateTime<Utc>>,
    last_success_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    in_use: bool,
    request_count: u64,
    recovery_count: u64,
}

impl Default for SessionMeta {
    fn default() -> Self {
        Self {
            state: SessionState::Uninitialized,
            created_at: None,
            created_at_wall: None,
            last_success_at: None,
            last_error: None,
            in_use: false,
            request_count: 0,
            recovery_count: 0,
        }
    }
}

type Slot = Option<Box<dyn BrowserPage>>;

fn read_meta(meta: &RwLock<SessionMeta>) -> RwLockReadGuard<'_, SessionMeta> {
    meta.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_meta(meta: &RwLock<SessionMeta>) -> RwLockWriteGuard<'_, SessionMeta> {
    meta.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// Session Handle
// ============================================================================

/// Exclusive access to the live page for the duration of one fetch.
///
/// Dropping a handle without `SessionManager::release` counts as a failure.
pub struct SessionHandle {
    guard: OwnedMutexGuard<Slot>,
    meta: Arc<RwLock<SessionMeta>>,
    released: bool,
}

impl SessionHandle {
    /// The page to drive.
    pub fn page(&mut self) -> Result<&mut (dyn BrowserPage + 'static)> {
        self.guard
            .as_deref_mut()
            .ok_or_else(|| ScreenerError::SessionUnavailable("session slot is empty".into()))
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let mut meta = write_meta(&self.meta);
        meta.in_use = false;
        meta.state = SessionState::Degraded;
        meta.last_error = Some("session handle dropped without release".into());
        warn!("Session handle dropped without release, marking degraded");
    }
}

// ============================================================================
// Session Manager
// ============================================================================

/// Owns the single browser session.
#[derive(Clone)]
pub struct SessionManager {
    launcher: Arc<dyn BrowserLauncher>,
    settings: Arc<SessionSettings>,
    slot: Arc<Mutex<Slot>>,
    meta: Arc<RwLock<SessionMeta>>,
    stop_flag: Arc<tokio::sync::RwLock<bool>>,
}

impl SessionManager {
    pub fn new(launcher: Arc<dyn BrowserLauncher>, settings: SessionSettings) -> Self {
        Self {
            launcher,
            settings: Arc::new(settings),
            slot: Arc::new(Mutex::new(None)),
            meta: Arc::new(RwLock::new(SessionMeta::default())),
            stop_flag: Arc::new(tokio::sync::RwLock::new(false)),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        read_meta(&self.meta).state
    }

    /// Initialize the session if it has never been started.
    pub async fn initialize(&self) -> Result<SessionState> {
        let mut slot = self.slot.clone().lock_owned().await;
        if slot.is_none() || self.state() != SessionState::Ready {
            self.recover(&mut slot).await?;
        }
        Ok(self.state())
    }

    /// Wait (FIFO) for exclusive use of the session.
    ///
    /// Initializes or recovers the session first when it is not READY.
    pub async fn acquire(&self) -> Result<SessionHandle> {
        let mut slot = self.slot.clone().lock_owned().await;

        if slot.is_none() || self.state() != SessionState::Ready {
            self.recover(&mut slot).await?;
        }

        {
            let mut meta = write_meta(&self.meta);
            meta.in_use = true;
            meta.request_count += 1;
        }

        Ok(SessionHandle {
            guard: slot,
            meta: self.meta.clone(),
            released: false,
        })
    }

    /// Return a handle. A failure marks the session DEGRADED so the next
    /// `acquire` rebuilds it.
    pub fn release(&self, mut handle: SessionHandle, outcome: ReleaseOutcome) {
        handle.released = true;
        let mut meta = write_meta(&self.meta);
        meta.in_use = false;
        match outcome {
            ReleaseOutcome::Success => {
                meta.last_success_at = Some(Utc::now());
                meta.last_error = None;
            }
            ReleaseOutcome::Failure(reason) => {
                warn!(reason = %reason, "Session released after failure, marking degraded");
                meta.state = SessionState::Degraded;
                meta.last_error = Some(reason);
            }
        }
    }

    /// Probe liveness without waiting behind an in-flight fetch.
    ///
    /// A successful probe leaves the state untouched; a failed one marks
    /// the session DEGRADED. So does an empty slot outside UNINITIALIZED,
    /// which is what an abandoned recovery leaves behind.
    pub async fn health_check(&self) -> SessionHealth {
        let Ok(mut slot) = self.slot.clone().try_lock_owned() else {
            debug!("Session busy, reporting state without probing");
            return self.report(None);
        };

        let alive = match slot.as_deref_mut() {
            Some(page) => match tokio::time::timeout(self.settings.probe_timeout, page.title()).await {
                Ok(Ok(title)) => {
                    debug!(title = %title, "Session probe succeeded");
                    true
                }
                Ok(Err(e)) => {
                    self.mark_degraded(format!("liveness probe failed: {e}"));
                    false
                }
                Err(_) => {
                    self.mark_degraded(format!(
                        "liveness probe timed out after {}s",
                        self.settings.probe_timeout.as_secs()
                    ));
                    false
                }
            },
            None => {
                if self.state() != SessionState::Uninitialized {
                    self.mark_degraded("no live browser behind the session".into());
                }
                false
            }
        };

        drop(slot);
        self.report(Some(alive))
    }

    /// Tear down and rebuild the session unconditionally.
    pub async fn force_refresh(&self) -> Result<SessionState> {
        let mut slot = self.slot.clone().lock_owned().await;
        info!("Forcing session refresh");
        self.recover(&mut slot).await?;
        Ok(self.state())
    }

    /// Close the browser; the next `acquire` starts a new one.
    pub async fn shutdown(&self) {
        self.stop_monitor().await;
        let mut slot = self.slot.clone().lock_owned().await;
        if let Some(mut page) = slot.take() {
            if let Err(e) = page.close().await {
                warn!(error = %e, "Error closing browser during shutdown");
            }
        }
        write_meta(&self.meta).state = SessionState::Uninitialized;
        info!("Session shut down");
    }

    /// Spawn the periodic liveness monitor.
    ///
    /// A DEGRADED session is rebuilt proactively so the next fetch does not
    /// pay for recovery. Returns `None` when the interval is zero.
    pub fn start_background_monitor(&self) -> Option<tokio::task::JoinHandle<()>> {
        let interval = self.settings.health_check_interval;
        if interval.is_zero() {
            return None;
        }

        let manager = self.clone();
        Some(tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "Starting session health monitor");

            loop {
                tokio::time::sleep(interval).await;

                if *manager.stop_flag.read().await {
                    info!("Session health monitor stopping");
                    break;
                }

                let health = manager.health_check().await;
                if health.state == SessionState::Degraded && !health.in_use {
                    if let Err(e) = manager.recover_if_degraded().await {
                        warn!(error = %e, "Background session recovery failed");
                    }
                }
            }
        }))
    }

    /// Rebuild the session only if it is still DEGRADED once the slot is
    /// ours; a fetch may have recovered it since the last probe.
    async fn recover_if_degraded(&self) -> Result<SessionState> {
        let mut slot = self.slot.clone().lock_owned().await;
        if self.state() != SessionState::Degraded {
            debug!(state = %self.state(), "Session no longer degraded, skipping recovery");
            return Ok(self.state());
        }
        info!("Recovering degraded session");
        self.recover(&mut slot).await?;
        Ok(self.state())
    }

    /// Stop the background monitor after its current sleep.
    pub async fn stop_monitor(&self) {
        *self.stop_flag.write().await = true;
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn report(&self, alive: Option<bool>) -> SessionHealth {
        let meta = read_meta(&self.meta);
        SessionHealth {
            state: meta.state,
            alive,
            in_use: meta.in_use,
            uptime_secs: meta
                .created_at
                .filter(|_| meta.state != SessionState::Uninitialized)
                .map(|t| Instant::now().saturating_duration_since(t).as_secs()),
            created_at: meta.created_at_wall,
            last_success_at: meta.last_success_at,
            last_error: meta.last_error.clone(),
            request_count: meta.request_count,
            recovery_count: meta.recovery_count,
        }
    }

    fn set_state(&self, state: SessionState) {
        write_meta(&self.meta).state = state;
    }

    fn mark_degraded(&self, reason: String) {
        warn!(reason = %reason, "Session degraded");
        let mut meta = write_meta(&self.meta);
        meta.state = SessionState::Degraded;
        meta.last_error = Some(reason);
    }

    fn fail_init(&self, err: &ScreenerError) {
        let mut meta = write_meta(&self.meta);
        meta.state = SessionState::Uninitialized;
        meta.created_at = None;
        meta.created_at_wall = None;
        meta.last_error = Some(err.to_string());
    }

    /// Rebuild the session in `slot`. Callers hold the slot lock.
    ///
    /// Authentication problems are fatal for this call and are not retried;
    /// anything else is retried up to the configured budget.
    async fn recover(&self, slot: &mut Slot) -> Result<()> {
        self.set_state(SessionState::Recovering);

        if let Some(mut old) = slot.take() {
            if let Err(e) = old.close().await {
                debug!(error = %e, "Error closing previous browser");
            }
        }

        let jar = match CookieJar::load(&self.settings.cookies_path, &self.settings.required_cookies)
        {
            Ok(jar) => jar,
            Err(e) => {
                warn!(error = %e, path = %self.settings.cookies_path.display(), "Cookie artifact rejected");
                self.fail_init(&e);
                return Err(e);
            }
        };

        let budget = self.settings.recovery_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=budget {
            match tokio::time::timeout(self.settings.init_timeout, self.launch_verified(&jar)).await {
                Ok(Ok(page)) => {
                    *slot = Some(page);
                    let mut meta = write_meta(&self.meta);
                    meta.state = SessionState::Ready;
                    meta.created_at = Some(Instant::now());
                    meta.created_at_wall = Some(Utc::now());
                    meta.last_error = None;
                    meta.recovery_count += 1;
                    info!(attempt, "Browser session ready");
                    return Ok(());
                }
                Ok(Err(e @ ScreenerError::Authentication(_))) => {
                    warn!(error = %e, "Session authentication failed");
                    self.fail_init(&e);
                    return Err(e);
                }
                Ok(Err(e)) => {
                    warn!(attempt, budget, error = %e, "Session initialization failed");
                    last_error = e.to_string();
                }
                Err(_) => {
                    warn!(
                        attempt,
                        budget,
                        timeout_secs = self.settings.init_timeout.as_secs(),
                        "Session initialization timed out"
                    );
                    last_error = format!(
                        "initialization timed out after {}s",
                        self.settings.init_timeout.as_secs()
                    );
                }
            }
        }

        let err = ScreenerError::SessionUnavailable(format!(
            "gave up after {budget} attempts: {last_error}"
        ));
        self.fail_init(&err);
        Err(err)
    }

    async fn launch_verified(&self, jar: &CookieJar) -> Result<Box<dyn BrowserPage>> {
        let mut page = self.launcher.launch(jar).await?;

        match self.wait_for_login(page.as_mut()).await {
            Ok(true) => Ok(page),
            Ok(false) => {
                let _ = page.close().await;
                Err(ScreenerError::Authentication(
                    "signed-in indicator absent after cookie injection".into(),
                ))
            }
            Err(e) => {
                let _ = page.close().await;
                Err(e)
            }
        }
    }

    async fn wait_for_login(&self, page: &mut dyn BrowserPage) -> Result<bool> {
        let deadline = Instant::now() + self.settings.probe_timeout;
        loop {
            if page.is_logged_in().await? {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(LOGIN_POLL_INTERVAL).await;
        }
    }
}
