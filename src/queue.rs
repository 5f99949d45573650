//! The scrape queue: three priority lanes, request coalescing, score-based
//! ordering, and the single-writer processing loop that drives everything.
//!
//! All queue state (lanes, pending index, counters, rate limiter) lives
//! under one mutex. External callers mutate through short critical
//! sections; the processing loop releases the lock across every await.

use crate::extractor::{CookieBag, ItemScraper, ScrapeJob};
use crate::parsers::FigureRecord;
use crate::rate_limiter::AdaptiveRateLimiter;
use crate::session::SessionManager;
use crate::utils::{item_url, sanitize_log};
use crate::webhook::Notifier;
use crate::{metrics, Config, ErrorKind, ScrapeError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Retry timer armed when every queued item is currently skippable.
pub const SELECTION_RETRY_INTERVAL: Duration = Duration::from_secs(5);

pub const DEFAULT_USER_ID: &str = "anonymous";

pub type ScrapeOutcome = Result<FigureRecord, ScrapeError>;

/// Priority lanes, highest first at dispatch. Ordered so that
/// `Hot > Warm > Cold` under the derived ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Cold,
    Warm,
    Hot,
}

impl Priority {
    fn lane(self) -> usize {
        match self {
            Priority::Hot => 0,
            Priority::Warm => 1,
            Priority::Cold => 2,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Warm
    }
}

/// Collection status of the requesting user, used only for scoring and
/// completion counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusTag {
    Owned,
    Ordered,
    Wished,
}

impl StatusTag {
    fn bonus(self) -> u32 {
        match self {
            StatusTag::Owned => 30,
            StatusTag::Ordered => 20,
            StatusTag::Wished => 10,
        }
    }

    fn index(self) -> usize {
        match self {
            StatusTag::Owned => 0,
            StatusTag::Ordered => 1,
            StatusTag::Wished => 2,
        }
    }
}

impl Default for StatusTag {
    fn default() -> Self {
        StatusTag::Wished
    }
}

#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    pub priority: Priority,
    pub status: Option<StatusTag>,
    pub cookies: Option<CookieBag>,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub max_retries: Option<u32>,
}

/// What the caller gets back from `enqueue`: the item id, whether the
/// request coalesced onto an existing item, the approximate queue position,
/// and a receiver that fires exactly once with the outcome.
pub struct EnqueueResult {
    pub id: String,
    pub deduplicated: bool,
    pub position: usize,
    pub receiver: oneshot::Receiver<ScrapeOutcome>,
}

#[derive(Debug)]
struct QueueItem {
    id: String,
    fingerprint: String,
    url: String,
    priority: Priority,
    status: StatusTag,
    cookies: Option<CookieBag>,
    session_id: Option<String>,
    retry_count: u32,
    max_retries: u32,
    enqueued_at: Instant,
    waiting_users: BTreeSet<String>,
    subscribers: Vec<oneshot::Sender<ScrapeOutcome>>,
    last_error: Option<String>,
    error_kind: Option<ErrorKind>,
}

impl QueueItem {
    fn has_credentials(&self) -> bool {
        self.cookies.as_ref().is_some_and(|c| !c.is_empty())
    }

    fn is_credentialed(&self) -> bool {
        self.has_credentials() && self.session_id.is_some()
    }

    /// Sort key within a lane, higher first: status bonus, active-session
    /// bonus, popularity, age.
    fn score(&self, now: Instant) -> u32 {
        let status_bonus = self.status.bonus();
        let session_bonus = if self.is_credentialed() { 20 } else { 0 };
        let popularity = (5 * self.waiting_users.len() as u32).min(20);
        let age_minutes = now.duration_since(self.enqueued_at).as_secs() / 60;
        let age_bonus = (age_minutes as u32).min(10);
        status_bonus + session_bonus + popularity + age_bonus
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub active: bool,
    pub idle: bool,
    pub hot: usize,
    pub warm: usize,
    pub cold: usize,
    pub in_flight: Option<String>,
    pub completed: u64,
    pub failed: u64,
    pub completed_by_status: [u64; 3],
    pub failed_by_status: [u64; 3],
    pub current_delay_ms: u64,
    pub is_rate_limited: bool,
}

struct QueueState {
    lanes: [VecDeque<QueueItem>; 3],
    in_flight: Option<QueueItem>,
    pending: HashSet<String>,
    rate: AdaptiveRateLimiter,
    active: bool,
    idle: bool,
    cooldown_timer_armed: bool,
    retry_timer_armed: bool,
    completed_count: u64,
    failed_count: u64,
    completed_by_status: [u64; 3],
    failed_by_status: [u64; 3],
}

impl QueueState {
    fn depth(&self) -> usize {
        self.lanes.iter().map(VecDeque::len).sum()
    }

    fn find_queued(&self, fingerprint: &str) -> Option<(usize, usize)> {
        for (lane_idx, lane) in self.lanes.iter().enumerate() {
            for (item_idx, item) in lane.iter().enumerate() {
                if item.fingerprint == fingerprint {
                    return Some((lane_idx, item_idx));
                }
            }
        }
        None
    }

    /// Insert at the first position whose score is strictly lower; ties
    /// keep insertion order. Returns the approximate cross-lane position.
    fn insert_by_score(&mut self, item: QueueItem) -> usize {
        let now = Instant::now();
        let score = item.score(now);
        let lane_idx = item.priority.lane();

        let lane = &mut self.lanes[lane_idx];
        let insert_at = lane
            .iter()
            .position(|existing| existing.score(now) < score)
            .unwrap_or(lane.len());
        lane.insert(insert_at, item);

        let ahead: usize = self.lanes[..lane_idx].iter().map(VecDeque::len).sum();
        ahead + insert_at + usize::from(self.in_flight.is_some())
    }
}

enum Decision {
    /// Loop is already covered elsewhere (busy, inactive, timer armed).
    Stop,
    /// Lanes are empty; go idle until the next enqueue.
    Idle,
    /// Rate pacing: wait out the remainder, then try again.
    Pace(Duration),
    /// Everything queued is skippable right now; retry after a fixed delay.
    RetrySelection,
    Dispatch(ScrapeJob),
}

pub struct ScrapeQueue {
    config: Arc<Config>,
    state: Mutex<QueueState>,
    sessions: Arc<SessionManager>,
    scraper: Arc<dyn ItemScraper>,
    notifier: Arc<Notifier>,
}

impl ScrapeQueue {
    pub fn new(
        config: Arc<Config>,
        sessions: Arc<SessionManager>,
        scraper: Arc<dyn ItemScraper>,
        notifier: Arc<Notifier>,
    ) -> Arc<Self> {
        let rate = AdaptiveRateLimiter::new(config.rate_limit.clone());
        Arc::new(Self {
            config,
            state: Mutex::new(QueueState {
                lanes: [VecDeque::new(), VecDeque::new(), VecDeque::new()],
                in_flight: None,
                pending: HashSet::new(),
                rate,
                active: false,
                idle: true,
                cooldown_timer_armed: false,
                retry_timer_armed: false,
                completed_count: 0,
                failed_count: 0,
                completed_by_status: [0; 3],
                failed_by_status: [0; 3],
            }),
            sessions,
            scraper,
            notifier,
        })
    }

    pub fn start(self: &Arc<Self>) {
        {
            let mut state = self.state.lock().unwrap();
            if state.active {
                return;
            }
            state.active = true;
        }
        info!("scrape queue started");
        self.wake();
    }

    pub fn stop(&self) {
        let mut state = self.state.lock().unwrap();
        state.active = false;
    }

    /// Enqueue a scrape for `fingerprint`. Requests against an already
    /// pending fingerprint coalesce: the caller becomes another waiter on
    /// the same item, upgrading its priority or attaching credentials as
    /// the options allow.
    pub fn enqueue(self: &Arc<Self>, fingerprint: &str, options: EnqueueOptions) -> EnqueueResult {
        let (sender, receiver) = oneshot::channel();
        let user_id = options
            .user_id
            .clone()
            .unwrap_or_else(|| DEFAULT_USER_ID.to_string());
        let has_cookies = options.cookies.as_ref().is_some_and(|c| !c.is_empty());

        // Credentialed requests jump to HOT unless explicitly COLD.
        let effective_priority = if has_cookies && options.priority != Priority::Cold {
            Priority::Hot
        } else {
            options.priority
        };

        let mut state = self.state.lock().unwrap();

        if state.pending.contains(fingerprint) {
            // In-flight item: just attach; its lane membership is gone.
            if let Some(item) = state
                .in_flight
                .as_mut()
                .filter(|item| item.fingerprint == fingerprint)
            {
                attach_to_item(item, user_id, effective_priority, options, sender);
                let id = item.id.clone();
                debug!("request for {} coalesced onto in-flight item", sanitize_log(fingerprint));
                return EnqueueResult {
                    id,
                    deduplicated: true,
                    position: 0,
                    receiver,
                };
            }

            if let Some((lane_idx, item_idx)) = state.find_queued(fingerprint) {
                let mut item = state.lanes[lane_idx]
                    .remove(item_idx)
                    .expect("index from find_queued");
                attach_to_item(&mut item, user_id, effective_priority, options, sender);
                let id = item.id.clone();
                let position = state.insert_by_score(item);
                metrics::set_queue_depth(state.depth());
                drop(state);
                debug!("request for {} coalesced, position {}", sanitize_log(fingerprint), position);
                self.wake();
                return EnqueueResult {
                    id,
                    deduplicated: true,
                    position,
                    receiver,
                };
            }

            // Index said pending but nothing was found; heal the index and
            // fall through to a fresh insert.
            warn!("pending index out of sync for {}", sanitize_log(fingerprint));
            state.pending.remove(fingerprint);
        }

        let item = QueueItem {
            id: new_item_id(fingerprint),
            fingerprint: fingerprint.to_string(),
            url: item_url(fingerprint),
            priority: effective_priority,
            status: options.status.unwrap_or_default(),
            cookies: options.cookies,
            session_id: options.session_id,
            retry_count: 0,
            max_retries: options.max_retries.unwrap_or(self.config.max_retries),
            enqueued_at: Instant::now(),
            waiting_users: BTreeSet::from([user_id]),
            subscribers: vec![sender],
            last_error: None,
            error_kind: None,
        };
        let id = item.id.clone();

        state.pending.insert(fingerprint.to_string());
        state.idle = false;
        let position = state.insert_by_score(item);
        metrics::set_queue_depth(state.depth());
        drop(state);

        debug!("enqueued {} at position {}", sanitize_log(fingerprint), position);
        self.wake();
        EnqueueResult {
            id,
            deduplicated: false,
            position,
            receiver,
        }
    }

    /// Kick the processing loop. Cheap to call on every mutation; a loop
    /// already running or waiting simply ignores the extra wakeup.
    fn wake(self: &Arc<Self>) {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            queue.run_loop().await;
        });
    }

    /// The single-writer processing loop. Only one instance makes progress
    /// at a time: competing wakeups bail out at the first decision point.
    async fn run_loop(self: &Arc<Self>) {
        loop {
            let decision = self.decide();

            match decision {
                Decision::Stop | Decision::Idle => return,
                Decision::Pace(remaining) => {
                    tokio::time::sleep(remaining).await;
                    self.state.lock().unwrap().cooldown_timer_armed = false;
                }
                Decision::RetrySelection => {
                    tokio::time::sleep(SELECTION_RETRY_INTERVAL).await;
                    self.state.lock().unwrap().retry_timer_armed = false;
                }
                Decision::Dispatch(job) => {
                    let started = Instant::now();
                    let result = self.scraper.scrape(&job).await;
                    self.complete(result, started.elapsed());
                }
            }
        }
    }

    fn decide(&self) -> Decision {
        let mut state = self.state.lock().unwrap();

        if !state.active || state.in_flight.is_some() {
            return Decision::Stop;
        }

        let now = Instant::now();
        if let Some(remaining) = state.rate.time_until_ready(now) {
            if state.cooldown_timer_armed {
                return Decision::Stop;
            }
            state.cooldown_timer_armed = true;
            return Decision::Pace(remaining);
        }

        match self.select_next(&mut state) {
            Selection::Item(item) => {
                let job = ScrapeJob {
                    item_id: item.fingerprint.clone(),
                    url: item.url.clone(),
                    cookies: item.cookies.clone(),
                    session_id: item.session_id.clone(),
                };
                state.rate.mark_dispatched(now);
                state.in_flight = Some(item);
                metrics::set_queue_depth(state.depth());
                Decision::Dispatch(job)
            }
            Selection::AllSkipped => {
                if state.retry_timer_armed {
                    return Decision::Stop;
                }
                state.retry_timer_armed = true;
                Decision::RetrySelection
            }
            Selection::Empty => {
                state.idle = true;
                Decision::Idle
            }
        }
    }

    /// Scan lanes HOT, WARM, COLD and pull the first dispatchable item.
    /// Items whose session is paused or cooling down stay queued.
    fn select_next(&self, state: &mut QueueState) -> Selection {
        let mut any_skipped = false;

        for lane_idx in 0..state.lanes.len() {
            let mut item_idx = 0;
            while item_idx < state.lanes[lane_idx].len() {
                let skip = {
                    let item = &state.lanes[lane_idx][item_idx];
                    match (&item.session_id, item.has_credentials()) {
                        (Some(session_id), true) => {
                            self.sessions.is_paused(session_id)
                                || self.sessions.cooldown_state(session_id).in_cooldown
                        }
                        _ => false,
                    }
                };

                if skip {
                    any_skipped = true;
                    item_idx += 1;
                    continue;
                }

                let item = state.lanes[lane_idx]
                    .remove(item_idx)
                    .expect("index bounded by lane length");
                return Selection::Item(item);
            }
        }

        if any_skipped {
            Selection::AllSkipped
        } else {
            Selection::Empty
        }
    }

    /// Post-scrape bookkeeping: success handling (§counters, rate recovery,
    /// webhook, subscriber resolution) or the failure policy.
    fn complete(self: &Arc<Self>, result: ScrapeOutcome, elapsed: Duration) {
        let item = {
            let mut state = self.state.lock().unwrap();
            state.in_flight.take()
        };
        let item = match item {
            Some(item) => item,
            None => {
                warn!("scrape completed with no in-flight item");
                return;
            }
        };

        match result {
            Ok(record) => self.handle_success(item, record, elapsed),
            Err(error) => self.handle_failure(item, error),
        }
    }

    fn handle_success(&self, item: QueueItem, record: FigureRecord, elapsed: Duration) {
        {
            let mut state = self.state.lock().unwrap();
            state.completed_count += 1;
            state.completed_by_status[item.status.index()] += 1;
            if state.rate.record_success() {
                debug!(
                    "rate limiter recovered, delay now {:?}",
                    state.rate.current_delay()
                );
            }
            metrics::set_rate_limit_delay(state.rate.current_delay());
            state.pending.remove(&item.fingerprint);
        }
        metrics::record_scrape_completed(elapsed);

        if let Some(session_id) = item.session_id.as_deref().filter(|_| item.has_credentials()) {
            self.sessions.report_success(session_id);
        }

        self.notifier.item_completed(&record);

        info!("scraped item {} in {:?}", sanitize_log(&item.fingerprint), elapsed);
        for subscriber in item.subscribers {
            let _ = subscriber.send(Ok(record.clone()));
        }
    }

    fn handle_failure(&self, mut item: QueueItem, error: ScrapeError) {
        let kind = error.kind();
        let message = error.to_string();

        item.retry_count += 1;
        item.last_error = Some(message.clone());
        item.error_kind = Some(kind);
        metrics::record_scrape_failed(kind);

        warn!(
            "scrape of {} failed ({}): {}",
            sanitize_log(&item.fingerprint),
            kind,
            sanitize_log(&message)
        );

        {
            let mut state = self.state.lock().unwrap();
            state.rate.record_failure();
            if kind == ErrorKind::RateLimited {
                state.rate.record_rate_limited();
                metrics::set_rate_limit_delay(state.rate.current_delay());
            }
        }

        let credentialed = item.is_credentialed();
        if kind == ErrorKind::RateLimited && credentialed {
            if let Some(session_id) = item.session_id.as_deref() {
                let is_cloudflare = message.to_lowercase().contains("cloudflare");
                self.sessions.report_rate_limit_block(session_id, is_cloudflare);
            }
        }
        if kind == ErrorKind::AuthRequired && credentialed {
            if let Some(session_id) = item.session_id.as_deref() {
                self.sessions.report_auth_error(session_id, &message);
            }
        }

        // Session policy wins over the generic retry predicate whenever the
        // item carries credentials someone is waiting on.
        if credentialed && !item.waiting_users.is_empty() {
            let session_id = item
                .session_id
                .clone()
                .unwrap_or_default();
            let user_id = item
                .waiting_users
                .iter()
                .next()
                .cloned()
                .unwrap_or_else(|| DEFAULT_USER_ID.to_string());
            let pending_count = {
                let state = self.state.lock().unwrap();
                state.pending.len()
            };

            let outcome = self.sessions.report_cookie_failure(
                &session_id,
                &item.fingerprint,
                &user_id,
                pending_count,
            );

            if outcome.is_paused {
                metrics::record_item_skipped();
                self.notifier
                    .item_skipped(&item.fingerprint, "session paused");
                let mut state = self.state.lock().unwrap();
                state.insert_by_score(item);
                metrics::set_queue_depth(state.depth());
                return;
            }
            if outcome.should_retry {
                metrics::record_retry();
                // Cooldown is enforced at selection time.
                let mut state = self.state.lock().unwrap();
                state.insert_by_score(item);
                metrics::set_queue_depth(state.depth());
                return;
            }
        }

        if kind.is_retryable() && item.retry_count <= item.max_retries {
            metrics::record_retry();
            debug!(
                "re-queueing {} (attempt {}/{})",
                sanitize_log(&item.fingerprint),
                item.retry_count,
                item.max_retries
            );
            let mut state = self.state.lock().unwrap();
            state.insert_by_score(item);
            metrics::set_queue_depth(state.depth());
            return;
        }

        {
            let mut state = self.state.lock().unwrap();
            state.failed_count += 1;
            state.failed_by_status[item.status.index()] += 1;
            state.pending.remove(&item.fingerprint);
            metrics::set_queue_depth(state.depth());
        }

        self.notifier.item_failed(&item.fingerprint, kind, &message);

        let composed = compose_failure(&item.fingerprint, kind, &message, item.retry_count);
        for subscriber in item.subscribers {
            let _ = subscriber.send(Err(composed.clone()));
        }
    }

    /// Cancel a queued item. In-flight items are never aborted: a racing
    /// cancel returns false and the item completes normally.
    pub fn cancel(&self, fingerprint: &str) -> bool {
        let item = {
            let mut state = self.state.lock().unwrap();
            match state.find_queued(fingerprint) {
                Some((lane_idx, item_idx)) => {
                    let item = state.lanes[lane_idx]
                        .remove(item_idx)
                        .expect("index from find_queued");
                    state.pending.remove(fingerprint);
                    metrics::set_queue_depth(state.depth());
                    Some(item)
                }
                None => None,
            }
        };

        match item {
            Some(item) => {
                info!("cancelled queued item {}", sanitize_log(fingerprint));
                reject_subscribers(item, &format!("item {fingerprint} cancelled"));
                true
            }
            None => false,
        }
    }

    /// Cancel every queued item carrying `session_id`, then forget the
    /// session entirely.
    pub fn cancel_all_for_session(&self, session_id: &str) -> usize {
        let fingerprints: Vec<String> = {
            let state = self.state.lock().unwrap();
            state
                .lanes
                .iter()
                .flatten()
                .filter(|item| item.session_id.as_deref() == Some(session_id))
                .map(|item| item.fingerprint.clone())
                .collect()
        };

        let mut cancelled = 0;
        for fingerprint in &fingerprints {
            if self.cancel(fingerprint) {
                cancelled += 1;
            }
        }
        self.sessions.clear_session(session_id);
        cancelled
    }

    /// Cancel the items that failed during the session's current streak,
    /// then resume the session.
    pub fn cancel_failed_items(&self, session_id: &str) -> usize {
        let failed = self.sessions.get_failed_items(session_id);
        let mut cancelled = 0;
        for fingerprint in &failed {
            if self.cancel(fingerprint) {
                cancelled += 1;
            }
        }
        self.sessions.resume(session_id);
        cancelled
    }

    pub fn resume_session(self: &Arc<Self>, session_id: &str) {
        self.sessions.resume(session_id);
        self.wake();
    }

    /// Empty all lanes. Pending subscribers are rejected, except in test
    /// mode where they are dropped silently.
    pub fn clear(&self) {
        let (items, in_flight_fp) = {
            let mut state = self.state.lock().unwrap();
            let items: Vec<QueueItem> = state.lanes.iter_mut().flat_map(std::mem::take).collect();
            let in_flight_fp = state.in_flight.as_ref().map(|i| i.fingerprint.clone());
            state.pending.clear();
            if let Some(fp) = &in_flight_fp {
                state.pending.insert(fp.clone());
            }
            metrics::set_queue_depth(0);
            (items, in_flight_fp)
        };

        info!(
            "queue cleared, {} items dropped{}",
            items.len(),
            in_flight_fp
                .map(|fp| format!(" (item {} still in flight)", sanitize_log(&fp)))
                .unwrap_or_default()
        );

        for item in items {
            if self.config.test_mode {
                drop(item.subscribers);
            } else {
                let fingerprint = item.fingerprint.clone();
                reject_subscribers(item, &format!("item {fingerprint} cancelled: queue cleared"));
            }
        }
    }

    pub fn status(&self) -> QueueStatus {
        let state = self.state.lock().unwrap();
        QueueStatus {
            active: state.active,
            idle: state.idle,
            hot: state.lanes[0].len(),
            warm: state.lanes[1].len(),
            cold: state.lanes[2].len(),
            in_flight: state.in_flight.as_ref().map(|i| i.fingerprint.clone()),
            completed: state.completed_count,
            failed: state.failed_count,
            completed_by_status: state.completed_by_status,
            failed_by_status: state.failed_by_status,
            current_delay_ms: state.rate.current_delay().as_millis() as u64,
            is_rate_limited: state.rate.is_rate_limited(),
        }
    }

    /// Test/diagnostic hook: lane and priority of a queued fingerprint.
    pub fn queued_priority(&self, fingerprint: &str) -> Option<Priority> {
        let state = self.state.lock().unwrap();
        state
            .find_queued(fingerprint)
            .map(|(lane_idx, item_idx)| state.lanes[lane_idx][item_idx].priority)
    }

    /// Test/diagnostic hook: last recorded failure of a pending fingerprint.
    pub fn last_error(&self, fingerprint: &str) -> Option<(ErrorKind, String)> {
        let state = self.state.lock().unwrap();
        let item = match state.find_queued(fingerprint) {
            Some((lane_idx, item_idx)) => &state.lanes[lane_idx][item_idx],
            None => state
                .in_flight
                .as_ref()
                .filter(|i| i.fingerprint == fingerprint)?,
        };
        match (&item.error_kind, &item.last_error) {
            (Some(kind), Some(message)) => Some((*kind, message.clone())),
            _ => None,
        }
    }

    /// Test/diagnostic hook: the waiting users of a pending fingerprint.
    pub fn waiting_users(&self, fingerprint: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        if let Some(item) = state
            .in_flight
            .as_ref()
            .filter(|i| i.fingerprint == fingerprint)
        {
            return item.waiting_users.iter().cloned().collect();
        }
        state
            .find_queued(fingerprint)
            .map(|(lane_idx, item_idx)| {
                state.lanes[lane_idx][item_idx]
                    .waiting_users
                    .iter()
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

enum Selection {
    Item(QueueItem),
    AllSkipped,
    Empty,
}

/// Apply a coalesced enqueue to an existing item: new waiter, possible
/// priority upgrade, possible credential attach. Never downgrades.
fn attach_to_item(
    item: &mut QueueItem,
    user_id: String,
    effective_priority: Priority,
    options: EnqueueOptions,
    sender: oneshot::Sender<ScrapeOutcome>,
) {
    item.waiting_users.insert(user_id);

    if effective_priority > item.priority {
        item.priority = effective_priority;
    }

    let has_cookies = options.cookies.as_ref().is_some_and(|c| !c.is_empty());
    if has_cookies && !item.has_credentials() {
        item.cookies = options.cookies;
        if options.session_id.is_some() {
            item.session_id = options.session_id;
        }
        if options.priority != Priority::Cold && item.priority < Priority::Hot {
            item.priority = Priority::Hot;
        }
    }

    item.subscribers.push(sender);
}

fn reject_subscribers(item: QueueItem, message: &str) {
    let error = ScrapeError::Cancelled(message.to_string());
    for subscriber in item.subscribers {
        let _ = subscriber.send(Err(error.clone()));
    }
}

fn compose_failure(fingerprint: &str, kind: ErrorKind, message: &str, attempts: u32) -> ScrapeError {
    let composed = format!("item {fingerprint} failed after {attempts} attempt(s) [{kind}]: {message}");
    match kind {
        ErrorKind::Timeout => ScrapeError::Timeout(composed),
        ErrorKind::NotFound => ScrapeError::NotFound(composed),
        ErrorKind::RateLimited => ScrapeError::RateLimited(composed),
        ErrorKind::AuthRequired => ScrapeError::AuthRequired(composed),
        ErrorKind::NotAccessible => ScrapeError::NotAccessible(composed),
        ErrorKind::Network => ScrapeError::Network(composed),
        ErrorKind::Cancelled => ScrapeError::Cancelled(composed),
        ErrorKind::Unknown => ScrapeError::Other(composed),
    }
}

/// Item ids are `<fingerprint>-<timestamp>-<random>`; only the fingerprint
/// prefix is contractual, the rest is opaque.
fn new_item_id(fingerprint: &str) -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let suffix: u32 = rand::random::<u32>() & 0xff_ffff;
    format!("{fingerprint}-{millis}-{suffix:06x}")
}
