//! Session manager: caches credential-validation results, tracks per-session
//! failure streaks, pauses misbehaving sessions, and diagnoses whether a
//! failure wave is session-specific or site-wide.
//!
//! State lives under one mutex; the lock is never held across network calls.

use crate::extractor::CookieBag;
use crate::utils::{item_url, sanitize_log, TARGET_DOMAIN};
use crate::Config;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

pub const VALIDATION_CACHE_TTL: Duration = Duration::from_secs(600);
pub const AUTH_ERROR_THRESHOLD: u32 = 2;
pub const PAUSE_THRESHOLD: u32 = 3;
pub const FAILURE_COOLDOWN: Duration = Duration::from_secs(20);
pub const PROBE_CACHE_TTL: Duration = Duration::from_secs(60);
pub const MAX_CACHED_SESSIONS: usize = 100;

/// Recovery actions an operator may take on a paused session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    Resume,
    CancelItem,
    CancelAll,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionPausedEvent {
    pub session_id: String,
    pub user_id: String,
    pub failure_count: u32,
    pub failed_items: Vec<String>,
    pub pending_count: usize,
    pub actions: Vec<RecoveryAction>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionInvalidatedEvent {
    pub session_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct ValidationOptions {
    pub force_revalidate: bool,
    pub structure_only: bool,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub valid: bool,
    pub reason: Option<String>,
    pub should_notify: bool,
}

#[derive(Debug, Clone)]
pub struct CookieFailureOutcome {
    pub should_retry: bool,
    pub is_paused: bool,
    pub cooldown: Option<Duration>,
    pub failure_count: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct CooldownState {
    pub in_cooldown: bool,
    pub remaining: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutageReason {
    CookiesExpired,
    MfcOverloaded,
    NetworkError,
    Unknown,
}

#[derive(Debug, Clone, Serialize)]
pub struct Diagnosis {
    pub reason: OutageReason,
    pub confidence: f64,
    pub explanation: String,
    pub mfc_reachable: bool,
    pub last_probe_success: Option<bool>,
    #[serde(skip)]
    pub last_probe_time: Option<SystemTime>,
}

/// Projection of one session for the HTTP surface.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub paused: bool,
    pub in_cooldown: bool,
    pub consecutive_failures: u32,
    pub failed_item_count: usize,
    pub user_count: usize,
}

#[derive(Debug, Default)]
struct SessionRecord {
    validated_at: Option<Instant>,
    last_valid: Option<bool>,
    last_reason: Option<String>,
    cookie_names: Vec<String>,
    auth_error_count: u32,
    consecutive_failures: u32,
    failed_items: BTreeSet<String>,
    last_failure: Option<Instant>,
    paused: bool,
    user_ids: BTreeSet<String>,
}

#[derive(Debug)]
enum ProbeOutcome {
    Reachable,
    Unreachable(String),
    NetworkError(String),
}

#[derive(Default)]
struct ProbeState {
    last_result: Option<(Instant, bool)>,
    last_error: Option<String>,
    probing: bool,
}

struct SessionState {
    sessions: HashMap<String, SessionRecord>,
    inflight: HashMap<String, Arc<Notify>>,
    probe: ProbeState,
}

type PausedCallback = Arc<dyn Fn(&SessionPausedEvent) + Send + Sync>;
type InvalidationCallback = Arc<dyn Fn(&SessionInvalidatedEvent) + Send + Sync>;

/// Handle returned by the subscribe methods; pass it back to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionHandle(u64);

pub struct SessionManager {
    config: Arc<Config>,
    state: Mutex<SessionState>,
    http: reqwest::Client,
    probe_done: Arc<Notify>,
    paused_callbacks: Mutex<Vec<(u64, PausedCallback)>>,
    invalidation_callbacks: Mutex<Vec<(u64, InvalidationCallback)>>,
    next_callback_id: AtomicU64,
}

impl SessionManager {
    pub fn new(config: Arc<Config>) -> Arc<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Arc::new(Self {
            config,
            state: Mutex::new(SessionState {
                sessions: HashMap::new(),
                inflight: HashMap::new(),
                probe: ProbeState::default(),
            }),
            http,
            probe_done: Arc::new(Notify::new()),
            paused_callbacks: Mutex::new(Vec::new()),
            invalidation_callbacks: Mutex::new(Vec::new()),
            next_callback_id: AtomicU64::new(1),
        })
    }

    // ---- validation ----

    /// Validate a session's cookies, answering from the cache when fresh.
    /// Concurrent validations for the same session id share one network
    /// round trip.
    pub async fn is_valid(
        &self,
        session_id: &str,
        cookies: &CookieBag,
        options: ValidationOptions,
    ) -> ValidationResult {
        let required = &self.config.session_cookie_name;
        let structurally_ok = cookies
            .0
            .get(required)
            .map(|v| !v.is_empty())
            .unwrap_or(false);
        if !structurally_ok {
            return ValidationResult {
                valid: false,
                reason: Some(format!("missing required cookie {required}")),
                should_notify: false,
            };
        }
        if options.structure_only {
            return ValidationResult {
                valid: true,
                reason: None,
                should_notify: false,
            };
        }

        let names = cookies.names();

        loop {
            let waiter = {
                let mut state = self.state.lock().unwrap();
                let record = state.sessions.entry(session_id.to_string()).or_default();
                if let Some(user) = &options.user_id {
                    record.user_ids.insert(user.clone());
                }

                let fresh = !options.force_revalidate
                    && record.cookie_names == names
                    && record.auth_error_count < AUTH_ERROR_THRESHOLD
                    && record
                        .validated_at
                        .is_some_and(|at| at.elapsed() < VALIDATION_CACHE_TTL);
                if fresh {
                    if let Some(valid) = record.last_valid {
                        return ValidationResult {
                            valid,
                            reason: record.last_reason.clone(),
                            should_notify: false,
                        };
                    }
                }

                match state.inflight.get(session_id) {
                    Some(notify) => Some(Arc::clone(notify)),
                    None => {
                        state
                            .inflight
                            .insert(session_id.to_string(), Arc::new(Notify::new()));
                        None
                    }
                }
            };

            match waiter {
                Some(notify) => {
                    // Another caller owns the validation; wait for it and
                    // re-read the cache. The timeout guards against a lost
                    // wakeup.
                    let _ = tokio::time::timeout(Duration::from_secs(15), notify.notified()).await;
                    continue;
                }
                None => break,
            }
        }

        let outcome = self.validate_over_network(cookies).await;

        let (result, notify) = {
            let mut state = self.state.lock().unwrap();
            let record = state.sessions.entry(session_id.to_string()).or_default();

            let was_valid = record.last_valid == Some(true);
            record.validated_at = Some(Instant::now());
            record.last_valid = Some(outcome.0);
            record.last_reason = outcome.1.clone();
            record.cookie_names = names;
            record.auth_error_count = 0;

            evict_lru(&mut state.sessions, session_id);

            let notify = state.inflight.remove(session_id);
            (
                ValidationResult {
                    valid: outcome.0,
                    reason: outcome.1,
                    should_notify: was_valid && !outcome.0,
                },
                notify,
            )
        };

        if let Some(notify) = notify {
            notify.notify_waiters();
        }

        debug!(
            "validated session {}: valid={}",
            sanitize_log(session_id),
            result.valid
        );
        result
    }

    async fn validate_over_network(&self, cookies: &CookieBag) -> (bool, Option<String>) {
        if self.config.test_mode {
            return (true, None);
        }

        let cookie_header = cookies
            .0
            .iter()
            .filter(|(name, value)| self.config.cookie_allowed(name) && !value.is_empty())
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ");

        let url = format!("https://{TARGET_DOMAIN}/");
        match self
            .http
            .get(&url)
            .header(reqwest::header::COOKIE, cookie_header)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                let body = response.text().await.unwrap_or_default();
                if body.contains("class=\"login\"") && !body.contains("logout") {
                    (false, Some("session not recognized by the site".to_string()))
                } else {
                    (true, None)
                }
            }
            Ok(response) => (
                false,
                Some(format!("validation request failed: {}", response.status())),
            ),
            Err(e) => (false, Some(format!("validation network error: {e}"))),
        }
    }

    // ---- failure accounting ----

    /// Record an auth error. Returns true once the threshold is reached and
    /// the cached validation has been invalidated.
    pub fn report_auth_error(&self, session_id: &str, error_message: &str) -> bool {
        let event = {
            let mut state = self.state.lock().unwrap();
            let record = state.sessions.entry(session_id.to_string()).or_default();
            record.auth_error_count += 1;

            if record.auth_error_count >= AUTH_ERROR_THRESHOLD {
                record.validated_at = None;
                record.last_valid = Some(false);
                record.last_reason = Some("repeated auth errors".to_string());
                Some(SessionInvalidatedEvent {
                    session_id: session_id.to_string(),
                    reason: sanitize_log(error_message),
                })
            } else {
                None
            }
        };

        match event {
            Some(event) => {
                warn!(
                    "session {} invalidated after repeated auth errors",
                    sanitize_log(session_id)
                );
                self.emit_invalidated(&event);
                true
            }
            None => false,
        }
    }

    /// Record a credentialed scrape failure. At the pause threshold the
    /// session is paused and a paused event goes out carrying the allowed
    /// recovery actions; below it the caller gets a fixed cooldown.
    pub fn report_cookie_failure(
        &self,
        session_id: &str,
        fingerprint: &str,
        user_id: &str,
        pending_count: usize,
    ) -> CookieFailureOutcome {
        let (outcome, event) = {
            let mut state = self.state.lock().unwrap();
            let record = state.sessions.entry(session_id.to_string()).or_default();

            record.consecutive_failures += 1;
            record.failed_items.insert(fingerprint.to_string());
            record.last_failure = Some(Instant::now());
            record.user_ids.insert(user_id.to_string());

            let cooldown = self.config.failure_cooldown;
            if record.consecutive_failures >= PAUSE_THRESHOLD {
                record.paused = true;
                let event = SessionPausedEvent {
                    session_id: session_id.to_string(),
                    user_id: user_id.to_string(),
                    failure_count: record.consecutive_failures,
                    failed_items: record.failed_items.iter().cloned().collect(),
                    pending_count,
                    actions: vec![
                        RecoveryAction::Resume,
                        RecoveryAction::CancelItem,
                        RecoveryAction::CancelAll,
                    ],
                };
                (
                    CookieFailureOutcome {
                        should_retry: false,
                        is_paused: true,
                        cooldown: None,
                        failure_count: record.consecutive_failures,
                    },
                    Some(event),
                )
            } else {
                (
                    CookieFailureOutcome {
                        should_retry: true,
                        is_paused: false,
                        cooldown: Some(cooldown),
                        failure_count: record.consecutive_failures,
                    },
                    None,
                )
            }
        };

        if let Some(event) = event {
            warn!(
                "session {} paused after {} consecutive failures",
                sanitize_log(session_id),
                event.failure_count
            );
            self.emit_paused(&event);
        }

        outcome
    }

    /// A successful credentialed scrape resets the failure streak. It never
    /// clears the paused flag; only an explicit resume does that.
    pub fn report_success(&self, session_id: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(record) = state.sessions.get_mut(session_id) {
            record.consecutive_failures = 0;
            record.failed_items.clear();
        }
    }

    /// Informational: the site rate-limited or challenged this session.
    pub fn report_rate_limit_block(&self, session_id: &str, is_cloudflare: bool) {
        info!(
            "session {} hit a rate-limit block (cloudflare={})",
            sanitize_log(session_id),
            is_cloudflare
        );
    }

    // ---- queries ----

    pub fn is_paused(&self, session_id: &str) -> bool {
        let state = self.state.lock().unwrap();
        state
            .sessions
            .get(session_id)
            .map(|r| r.paused)
            .unwrap_or(false)
    }

    pub fn cooldown_state(&self, session_id: &str) -> CooldownState {
        let state = self.state.lock().unwrap();
        let record = match state.sessions.get(session_id) {
            Some(r) => r,
            None => {
                return CooldownState {
                    in_cooldown: false,
                    remaining: Duration::ZERO,
                }
            }
        };

        // Paused is an operator state, cooldown an automatic one; they are
        // mutually exclusive.
        if record.paused || record.consecutive_failures == 0 {
            return CooldownState {
                in_cooldown: false,
                remaining: Duration::ZERO,
            };
        }

        let cooldown = self.config.failure_cooldown;
        match record.last_failure {
            Some(at) if at.elapsed() < cooldown => CooldownState {
                in_cooldown: true,
                remaining: cooldown - at.elapsed(),
            },
            _ => CooldownState {
                in_cooldown: false,
                remaining: Duration::ZERO,
            },
        }
    }

    pub fn get_failed_items(&self, session_id: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .sessions
            .get(session_id)
            .map(|r| r.failed_items.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn sessions_snapshot(&self) -> Vec<SessionSummary> {
        let ids: Vec<String> = {
            let state = self.state.lock().unwrap();
            state.sessions.keys().cloned().collect()
        };
        ids.into_iter()
            .filter_map(|id| {
                let cooldown = self.cooldown_state(&id);
                let state = self.state.lock().unwrap();
                let record = state.sessions.get(&id)?;
                Some(SessionSummary {
                    paused: record.paused,
                    in_cooldown: cooldown.in_cooldown,
                    consecutive_failures: record.consecutive_failures,
                    failed_item_count: record.failed_items.len(),
                    user_count: record.user_ids.len(),
                    id,
                })
            })
            .collect()
    }

    // ---- recovery ----

    /// Clear the paused flag and all failure state. Idempotent; unknown
    /// session ids are a no-op.
    pub fn resume(&self, session_id: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(record) = state.sessions.get_mut(session_id) {
            if record.paused {
                info!("session {} resumed", sanitize_log(session_id));
            }
            record.paused = false;
            record.consecutive_failures = 0;
            record.failed_items.clear();
            record.last_failure = None;
        }
    }

    pub fn clear_session(&self, session_id: &str) {
        let mut state = self.state.lock().unwrap();
        state.sessions.remove(session_id);
    }

    // ---- diagnosis ----

    /// Decide whether recent failures look session-specific or site-wide by
    /// probing a known-public item. At most one probe runs at a time and
    /// its result is cached briefly.
    pub async fn diagnose(&self, session_id: &str) -> Diagnosis {
        let run_probe = loop {
            let should_wait = {
                let mut state = self.state.lock().unwrap();
                let cached_fresh = matches!(
                    state.probe.last_result,
                    Some((at, _)) if at.elapsed() < PROBE_CACHE_TTL
                );
                if cached_fresh {
                    break false;
                } else if state.probe.probing {
                    // Someone else is probing; fall through to wait.
                    true
                } else {
                    state.probe.probing = true;
                    break true;
                }
            };

            if should_wait {
                let _ = tokio::time::timeout(Duration::from_secs(15), self.probe_done.notified())
                    .await;
            }
        };

        if run_probe {
            let outcome = self.run_probe().await;
            let mut state = self.state.lock().unwrap();
            let ok = matches!(outcome, ProbeOutcome::Reachable);
            state.probe.last_result = Some((Instant::now(), ok));
            state.probe.last_error = match outcome {
                ProbeOutcome::Reachable => None,
                ProbeOutcome::Unreachable(e) | ProbeOutcome::NetworkError(e) => Some(e),
            };
            state.probe.probing = false;
            drop(state);
            self.probe_done.notify_waiters();
        }

        let state = self.state.lock().unwrap();
        let (probe_ok, probe_at) = match state.probe.last_result {
            Some((at, ok)) => (Some(ok), Some(at)),
            None => (None, None),
        };
        let probe_error = state.probe.last_error.clone();
        let has_recent_failures = state
            .sessions
            .get(session_id)
            .map(|r| r.consecutive_failures > 0 || !r.failed_items.is_empty())
            .unwrap_or(false);
        drop(state);

        let reachable = probe_ok == Some(true);
        let (reason, confidence, explanation) = match (probe_ok, has_recent_failures) {
            (Some(true), true) => (
                OutageReason::CookiesExpired,
                0.8,
                "the site answers public requests but this session keeps failing; its cookies have most likely expired".to_string(),
            ),
            (Some(true), false) => (
                OutageReason::Unknown,
                0.4,
                "the site is reachable and this session has no recent failures".to_string(),
            ),
            (Some(false), _) => match probe_error.as_deref() {
                Some(e) if e.contains("network") => (
                    OutageReason::NetworkError,
                    0.6,
                    format!("the connectivity probe failed at the network layer: {e}"),
                ),
                _ => (
                    OutageReason::MfcOverloaded,
                    0.7,
                    "the public connectivity probe failed; the site itself appears to be struggling".to_string(),
                ),
            },
            (None, _) => (
                OutageReason::Unknown,
                0.2,
                "no probe result is available".to_string(),
            ),
        };

        Diagnosis {
            reason,
            confidence,
            explanation,
            mfc_reachable: reachable,
            last_probe_success: probe_ok,
            last_probe_time: probe_at.map(|at| SystemTime::now() - at.elapsed()),
        }
    }

    async fn run_probe(&self) -> ProbeOutcome {
        if self.config.test_mode {
            return ProbeOutcome::Reachable;
        }

        let url = item_url(&self.config.probe_item_id);
        match self.http.get(&url).send().await {
            Ok(response) if response.status().is_success() => ProbeOutcome::Reachable,
            Ok(response) => ProbeOutcome::Unreachable(format!("probe status {}", response.status())),
            Err(e) => ProbeOutcome::NetworkError(format!("probe network error: {e}")),
        }
    }

    // ---- events ----

    pub fn on_paused(
        &self,
        callback: impl Fn(&SessionPausedEvent) + Send + Sync + 'static,
    ) -> SubscriptionHandle {
        let id = self.next_callback_id.fetch_add(1, Ordering::Relaxed);
        self.paused_callbacks
            .lock()
            .unwrap()
            .push((id, Arc::new(callback)));
        SubscriptionHandle(id)
    }

    pub fn on_invalidation(
        &self,
        callback: impl Fn(&SessionInvalidatedEvent) + Send + Sync + 'static,
    ) -> SubscriptionHandle {
        let id = self.next_callback_id.fetch_add(1, Ordering::Relaxed);
        self.invalidation_callbacks
            .lock()
            .unwrap()
            .push((id, Arc::new(callback)));
        SubscriptionHandle(id)
    }

    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.paused_callbacks
            .lock()
            .unwrap()
            .retain(|(id, _)| *id != handle.0);
        self.invalidation_callbacks
            .lock()
            .unwrap()
            .retain(|(id, _)| *id != handle.0);
    }

    fn emit_paused(&self, event: &SessionPausedEvent) {
        let callbacks: Vec<PausedCallback> = self
            .paused_callbacks
            .lock()
            .unwrap()
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                error!("paused-event callback panicked");
            }
        }
    }

    fn emit_invalidated(&self, event: &SessionInvalidatedEvent) {
        let callbacks: Vec<InvalidationCallback> = self
            .invalidation_callbacks
            .lock()
            .unwrap()
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                error!("invalidation-event callback panicked");
            }
        }
    }
}

/// Drop the least-recently-validated sessions once the cache outgrows its
/// cap. The session being touched right now is never the victim.
fn evict_lru(sessions: &mut HashMap<String, SessionRecord>, keep: &str) {
    while sessions.len() > MAX_CACHED_SESSIONS {
        let victim = sessions
            .iter()
            .filter(|(id, _)| id.as_str() != keep)
            .min_by_key(|(_, r)| r.validated_at)
            .map(|(id, _)| id.clone());
        match victim {
            Some(id) => {
                debug!("evicting session {} from the validation cache", sanitize_log(&id));
                sessions.remove(&id);
            }
            None => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_manager() -> Arc<SessionManager> {
        SessionManager::new(Arc::new(Config {
            test_mode: true,
            ..Default::default()
        }))
    }

    fn good_cookies() -> CookieBag {
        CookieBag::from([("PHPSESSID", "abc123")])
    }

    #[tokio::test]
    async fn structure_check_rejects_missing_session_cookie() {
        let manager = test_manager();
        let result = manager
            .is_valid("s1", &CookieBag::from([("remember", "1")]), ValidationOptions::default())
            .await;
        assert!(!result.valid);
        assert!(result.reason.unwrap().contains("PHPSESSID"));
    }

    #[tokio::test]
    async fn structure_only_short_circuits() {
        let manager = test_manager();
        let result = manager
            .is_valid(
                "s1",
                &good_cookies(),
                ValidationOptions {
                    structure_only: true,
                    ..Default::default()
                },
            )
            .await;
        assert!(result.valid);
    }

    #[tokio::test]
    async fn validation_result_is_cached() {
        let manager = test_manager();
        let first = manager
            .is_valid("s1", &good_cookies(), ValidationOptions::default())
            .await;
        assert!(first.valid);

        // Second call must answer from the cache (test mode network always
        // succeeds, so the observable check is that it stays valid).
        let second = manager
            .is_valid("s1", &good_cookies(), ValidationOptions::default())
            .await;
        assert!(second.valid);
        assert!(!second.should_notify);
    }

    #[tokio::test]
    async fn auth_errors_invalidate_at_threshold() {
        let manager = test_manager();
        let fired = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let fired_clone = Arc::clone(&fired);
        manager.on_invalidation(move |event| {
            assert_eq!(event.session_id, "s1");
            fired_clone.store(true, Ordering::Relaxed);
        });

        assert!(!manager.report_auth_error("s1", "AUTH failure"));
        assert!(manager.report_auth_error("s1", "AUTH failure"));
        assert!(fired.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn cookie_failures_pause_at_threshold() {
        let manager = test_manager();
        let paused_events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&paused_events);
        manager.on_paused(move |event| {
            sink.lock().unwrap().push(event.clone());
        });

        let first = manager.report_cookie_failure("s1", "100", "alice", 3);
        assert!(first.should_retry);
        assert_eq!(first.cooldown, Some(FAILURE_COOLDOWN));
        assert!(!first.is_paused);

        manager.report_cookie_failure("s1", "101", "alice", 3);
        let third = manager.report_cookie_failure("s1", "102", "alice", 3);
        assert!(third.is_paused);
        assert!(!third.should_retry);
        assert_eq!(third.failure_count, 3);
        assert!(manager.is_paused("s1"));

        let events = paused_events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].failure_count, 3);
        assert_eq!(events[0].failed_items, vec!["100", "101", "102"]);
        assert_eq!(
            events[0].actions,
            vec![
                RecoveryAction::Resume,
                RecoveryAction::CancelItem,
                RecoveryAction::CancelAll
            ]
        );
    }

    #[tokio::test]
    async fn success_resets_streak_but_not_paused() {
        let manager = test_manager();
        for fp in ["1", "2", "3"] {
            manager.report_cookie_failure("s1", fp, "alice", 1);
        }
        assert!(manager.is_paused("s1"));

        manager.report_success("s1");
        assert!(manager.get_failed_items("s1").is_empty());
        assert!(manager.is_paused("s1"), "success must not unpause");

        manager.resume("s1");
        assert!(!manager.is_paused("s1"));
    }

    #[tokio::test]
    async fn cooldown_excludes_paused_sessions() {
        let manager = test_manager();
        manager.report_cookie_failure("s1", "1", "alice", 1);
        assert!(manager.cooldown_state("s1").in_cooldown);

        manager.report_cookie_failure("s1", "2", "alice", 1);
        manager.report_cookie_failure("s1", "3", "alice", 1);
        assert!(manager.is_paused("s1"));
        assert!(!manager.cooldown_state("s1").in_cooldown);
    }

    #[tokio::test]
    async fn resume_is_idempotent_on_unknown_sessions() {
        let manager = test_manager();
        manager.resume("never-seen");
        assert!(!manager.is_paused("never-seen"));
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let manager = test_manager();
        let count = Arc::new(std::sync::atomic::AtomicU64::new(0));
        let counter = Arc::clone(&count);
        let handle = manager.on_paused(move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        });

        for fp in ["1", "2", "3"] {
            manager.report_cookie_failure("s1", fp, "alice", 1);
        }
        assert_eq!(count.load(Ordering::Relaxed), 1);

        manager.unsubscribe(handle);
        manager.resume("s1");
        for fp in ["4", "5", "6"] {
            manager.report_cookie_failure("s1", fp, "alice", 1);
        }
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn callback_panic_is_contained() {
        let manager = test_manager();
        manager.on_paused(|_| panic!("listener bug"));
        for fp in ["1", "2", "3"] {
            manager.report_cookie_failure("s1", fp, "alice", 1);
        }
        // Still alive and paused despite the panicking listener.
        assert!(manager.is_paused("s1"));
    }

    #[tokio::test]
    async fn diagnose_blames_cookies_when_site_is_reachable() {
        let manager = test_manager();
        manager.report_cookie_failure("s1", "1", "alice", 1);

        let diagnosis = manager.diagnose("s1").await;
        assert_eq!(diagnosis.reason, OutageReason::CookiesExpired);
        assert!(diagnosis.mfc_reachable);
        assert_eq!(diagnosis.last_probe_success, Some(true));
    }

    #[tokio::test]
    async fn eviction_keeps_cache_bounded() {
        let manager = test_manager();
        for i in 0..(MAX_CACHED_SESSIONS + 10) {
            manager
                .is_valid(&format!("s{i}"), &good_cookies(), ValidationOptions::default())
                .await;
        }
        let snapshot = manager.sessions_snapshot();
        assert!(snapshot.len() <= MAX_CACHED_SESSIONS);
    }
}
