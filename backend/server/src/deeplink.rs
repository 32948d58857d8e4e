//! # Deep-link handoff
//!
//! Shareable detail pages try to open the same screen in the native app before settling on
//! the web page.
//!
//! ## Contract
//! - At most one attempt per browser session, guarded by a [`TriedFlag`]
//! - The flag is claimed before the app URI is navigated to
//! - Fallback to the web URI when the timer fires and less than `threshold` has passed since
//!   the attempt, meaning the page was never suspended by the app taking over
//! - Visibility turning hidden first cancels the fallback
//! - Teardown cancels both the timer and the visibility observation
//!
//! ## Rendering
//! Pages served over HTTP carry a [`HandoffPlan`] and the browser runs the same contract.
//! [`Handoff`] runs it in-process against a [`Navigator`].
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::{
    sync::{oneshot, watch},
    task::JoinHandle,
    time::{Instant, sleep_until},
};
use tracing::{debug, info};

use crate::session::SessionStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Product,
    Worker,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Product => "product",
            TargetKind::Worker => "worker",
        }
    }

    fn web_path(&self) -> &'static str {
        match self {
            TargetKind::Product => "products",
            TargetKind::Worker => "workers",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandoffTiming {
    pub delay: Duration,
    pub threshold: Duration,
}

impl Default for HandoffTiming {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(1500),
            threshold: Duration::from_millis(1600),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeepLinkAttempt {
    pub target_id: String,
    pub app_uri: String,
    pub web_fallback_uri: String,
    pub attempted_at: Option<Instant>,
}

impl DeepLinkAttempt {
    pub fn new(kind: TargetKind, target_id: &str, scheme: &str, base_url: &str) -> Self {
        Self {
            target_id: target_id.to_string(),
            app_uri: format!("{scheme}://{}/{target_id}", kind.as_str()),
            web_fallback_uri: format!(
                "{}/{}/{target_id}",
                base_url.trim_end_matches('/'),
                kind.web_path()
            ),
            attempted_at: None,
        }
    }
}

/// What a rendered detail page needs to run the handoff in the browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoffPlan {
    pub app_uri: String,
    pub web_fallback_uri: String,
    pub delay_ms: u128,
    pub threshold_ms: u128,
}

impl HandoffPlan {
    pub fn new(attempt: &DeepLinkAttempt, timing: HandoffTiming) -> Self {
        Self {
            app_uri: attempt.app_uri.clone(),
            web_fallback_uri: attempt.web_fallback_uri.clone(),
            delay_ms: timing.delay.as_millis(),
            threshold_ms: timing.threshold.as_millis(),
        }
    }
}

/// Session-scoped "already tried" marker.
pub trait TriedFlag: Send + Sync {
    fn is_tried(&self) -> bool;

    /// Sets the flag. `true` only for the caller that flipped it.
    fn claim(&self) -> bool;
}

#[derive(Debug, Clone, Default)]
pub struct MemoryTriedFlag(Arc<AtomicBool>);

impl MemoryTriedFlag {
    pub fn tried() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }
}

impl TriedFlag for MemoryTriedFlag {
    fn is_tried(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn claim(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }
}

/// Flag kept on the server-side browser session.
#[derive(Clone)]
pub struct SessionTriedFlag {
    sessions: SessionStore,
    session_id: String,
}

impl SessionTriedFlag {
    pub fn new(sessions: SessionStore, session_id: &str) -> Self {
        Self {
            sessions,
            session_id: session_id.to_string(),
        }
    }
}

impl TriedFlag for SessionTriedFlag {
    fn is_tried(&self) -> bool {
        self.sessions
            .get(&self.session_id)
            .is_some_and(|session| session.handoff_tried)
    }

    fn claim(&self) -> bool {
        self.sessions.claim_handoff(&self.session_id)
    }
}

pub trait Navigator: Send + Sync {
    fn navigate(&self, uri: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoffOutcome {
    /// Visibility went hidden, or the page was suspended past the threshold.
    AppOpened,
    FellBack,
    TornDown,
}

pub struct Handoff {
    flag: Arc<dyn TriedFlag>,
    navigator: Arc<dyn Navigator>,
    timing: HandoffTiming,
}

impl Handoff {
    pub fn new(
        flag: Arc<dyn TriedFlag>,
        navigator: Arc<dyn Navigator>,
        timing: HandoffTiming,
    ) -> Self {
        Self {
            flag,
            navigator,
            timing,
        }
    }

    /// Starts an attempt unless this session already made one. Must be called from within a
    /// tokio runtime.
    pub fn arm(
        &self,
        mut attempt: DeepLinkAttempt,
        visibility: watch::Receiver<Visibility>,
    ) -> Option<HandoffTask> {
        if !self.flag.claim() {
            debug!("Deep link for {} skipped, already tried", attempt.target_id);
            return None;
        }

        let started = Instant::now();
        attempt.attempted_at = Some(started);
        self.navigator.navigate(&attempt.app_uri);

        let (teardown, teardown_rx) = oneshot::channel();
        let handle = tokio::spawn(await_takeover(
            attempt,
            started,
            Arc::clone(&self.navigator),
            self.timing,
            visibility,
            teardown_rx,
        ));

        Some(HandoffTask {
            handle,
            teardown: Some(teardown),
        })
    }
}

async fn await_takeover(
    attempt: DeepLinkAttempt,
    started: Instant,
    navigator: Arc<dyn Navigator>,
    timing: HandoffTiming,
    mut visibility: watch::Receiver<Visibility>,
    mut teardown: oneshot::Receiver<()>,
) -> HandoffOutcome {
    let timer = sleep_until(started + timing.delay);
    tokio::pin!(timer);

    visibility.borrow_and_update();
    let mut watching = true;

    loop {
        tokio::select! {
            _ = &mut timer => {
                if started.elapsed() < timing.threshold {
                    info!("App did not take over {}, falling back", attempt.app_uri);
                    navigator.navigate(&attempt.web_fallback_uri);

                    return HandoffOutcome::FellBack;
                }

                return HandoffOutcome::AppOpened;
            }
            changed = visibility.changed(), if watching => match changed {
                Ok(()) => {
                    if *visibility.borrow_and_update() == Visibility::Hidden {
                        debug!("Page hidden, {} handed to the app", attempt.target_id);
                        return HandoffOutcome::AppOpened;
                    }
                }
                Err(_) => watching = false,
            },
            _ = &mut teardown => return HandoffOutcome::TornDown,
        }
    }
}

/// A running attempt. Dropping it tears the attempt down.
pub struct HandoffTask {
    handle: JoinHandle<HandoffOutcome>,
    teardown: Option<oneshot::Sender<()>>,
}

impl HandoffTask {
    pub async fn teardown(mut self) -> HandoffOutcome {
        if let Some(teardown) = self.teardown.take() {
            let _ = teardown.send(());
        }

        self.join().await
    }

    pub async fn outcome(mut self) -> HandoffOutcome {
        self.join().await
    }

    async fn join(&mut self) -> HandoffOutcome {
        (&mut self.handle).await.unwrap_or(HandoffOutcome::TornDown)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use tokio::time::sleep;

    use super::*;

    #[derive(Default)]
    struct RecordingNavigator(Mutex<Vec<String>>);

    impl RecordingNavigator {
        fn visited(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    impl Navigator for RecordingNavigator {
        fn navigate(&self, uri: &str) {
            self.0.lock().unwrap().push(uri.to_string());
        }
    }

    fn attempt() -> DeepLinkAttempt {
        DeepLinkAttempt::new(TargetKind::Product, "p1", "hillsgo", "https://hillsgo.rw/")
    }

    fn handoff(flag: MemoryTriedFlag) -> (Handoff, Arc<RecordingNavigator>) {
        let navigator = Arc::new(RecordingNavigator::default());
        let handoff = Handoff::new(
            Arc::new(flag),
            navigator.clone(),
            HandoffTiming::default(),
        );

        (handoff, navigator)
    }

    #[test]
    fn test_attempt_uris() {
        let attempt =
            DeepLinkAttempt::new(TargetKind::Worker, "w9", "hillsgo", "https://hillsgo.rw/");
        assert_eq!(attempt.app_uri, "hillsgo://worker/w9");
        assert_eq!(attempt.web_fallback_uri, "https://hillsgo.rw/workers/w9");
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_fires_at_delay() {
        let (handoff, navigator) = handoff(MemoryTriedFlag::default());
        let (_visibility, rx) = watch::channel(Visibility::Visible);
        let start = Instant::now();

        let task = handoff.arm(attempt(), rx).unwrap();
        assert_eq!(navigator.visited(), vec!["hillsgo://product/p1"]);

        sleep(Duration::from_millis(1499)).await;
        assert_eq!(navigator.visited().len(), 1);

        assert_eq!(task.outcome().await, HandoffOutcome::FellBack);
        assert!(start.elapsed() >= Duration::from_millis(1500));
        assert_eq!(
            navigator.visited(),
            vec!["hillsgo://product/p1", "https://hillsgo.rw/products/p1"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_hidden_page_suppresses_fallback() {
        let (handoff, navigator) = handoff(MemoryTriedFlag::default());
        let (visibility, rx) = watch::channel(Visibility::Visible);

        let task = handoff.arm(attempt(), rx).unwrap();
        sleep(Duration::from_millis(400)).await;
        visibility.send_replace(Visibility::Hidden);

        assert_eq!(task.outcome().await, HandoffOutcome::AppOpened);
        sleep(Duration::from_secs(5)).await;
        assert_eq!(navigator.visited(), vec!["hillsgo://product/p1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_cancels_timer() {
        let (handoff, navigator) = handoff(MemoryTriedFlag::default());
        let (_visibility, rx) = watch::channel(Visibility::Visible);

        let task = handoff.arm(attempt(), rx).unwrap();
        sleep(Duration::from_millis(200)).await;

        assert_eq!(task.teardown().await, HandoffOutcome::TornDown);
        sleep(Duration::from_secs(5)).await;
        assert_eq!(navigator.visited().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_visibility_still_falls_back() {
        let (handoff, navigator) = handoff(MemoryTriedFlag::default());
        let (visibility, rx) = watch::channel(Visibility::Visible);

        let task = handoff.arm(attempt(), rx).unwrap();
        drop(visibility);

        assert_eq!(task.outcome().await, HandoffOutcome::FellBack);
        assert_eq!(navigator.visited().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_at_most_once_per_session() {
        let (handoff, navigator) = handoff(MemoryTriedFlag::default());

        let (_first_visibility, first_rx) = watch::channel(Visibility::Visible);
        let first = handoff.arm(attempt(), first_rx);
        assert!(first.is_some());

        for id in ["p2", "p3"] {
            let (_visibility, rx) = watch::channel(Visibility::Visible);
            let again =
                DeepLinkAttempt::new(TargetKind::Product, id, "hillsgo", "https://hillsgo.rw");
            assert!(handoff.arm(again, rx).is_none());
        }

        let app_navigations = navigator
            .visited()
            .iter()
            .filter(|uri| uri.starts_with("hillsgo://"))
            .count();
        assert_eq!(app_navigations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_tried_session_skips() {
        let (handoff, navigator) = handoff(MemoryTriedFlag::tried());
        let (_visibility, rx) = watch::channel(Visibility::Visible);

        assert!(handoff.arm(attempt(), rx).is_none());
        assert!(navigator.visited().is_empty());
    }

    #[test]
    fn test_session_flag() {
        let sessions = SessionStore::default();
        let id = sessions.create();
        let flag = SessionTriedFlag::new(sessions.clone(), &id);

        assert!(!flag.is_tried());
        assert!(flag.claim());
        assert!(flag.is_tried());
        assert!(!SessionTriedFlag::new(sessions, &id).claim());
    }

    #[test]
    fn test_plan_carries_timing() {
        let plan = HandoffPlan::new(&attempt(), HandoffTiming::default());
        assert_eq!(plan.delay_ms, 1500);
        assert_eq!(plan.threshold_ms, 1600);
        assert_eq!(plan.app_uri, "hillsgo://product/p1");
    }
}
