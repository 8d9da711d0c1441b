//! Reload controller
//!
//! Owns the retry/backoff state machine for full reloads (teardown plus a new
//! resolution, negotiation and attachment pass):
//!
//! ```text
//!   Idle ──request──▶ ReloadPending ──begin──▶ Reloading ──complete──▶ Idle
//!                          │                        │
//!                          └──────── cancel ────────┘
//! ```
//!
//! At most one reload is ever pending or in flight; requests arriving in any
//! other state than `Idle` are swallowed. The attempt counter is bounded for
//! the lifetime of the session and never resets.

use crate::classify::ErrorRecord;
use crate::types::ResumeSnapshot;
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Message shown while waiting to retry
pub const RELOADING_MESSAGE: &str = "Something went wrong, reloading player...";

/// Timing and bounds for automatic recovery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RecoveryPolicy {
    /// Generic backoff before a reload
    pub reload_delay_ms: u64,
    /// Backoff before reloading after a 5xx response
    pub server_error_delay_ms: u64,
    /// Backoff before reloading after a buffer-full watchdog fires
    pub buffer_full_delay_ms: u64,
    /// Time a buffer-full condition may persist before reloading
    pub buffer_full_grace_ms: u64,
    /// Observation window for stall detection
    pub stall_window_ms: u64,
    /// Lifetime ceiling on reload attempts
    pub max_reloads: u32,
    /// Consecutive errors before unclassified errors escalate
    pub escalation_threshold: u32,
    /// Delay before retrying a blocked autoplay muted
    pub muted_autoplay_delay_ms: u64,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            reload_delay_ms: 6_000,
            server_error_delay_ms: 10_000,
            buffer_full_delay_ms: 5_000,
            buffer_full_grace_ms: 3_000,
            stall_window_ms: 5_000,
            max_reloads: 10,
            escalation_threshold: crate::classify::DEFAULT_ESCALATION_THRESHOLD,
            muted_autoplay_delay_ms: 250,
        }
    }
}

impl RecoveryPolicy {
    pub fn stall_window(&self) -> Duration {
        Duration::from_millis(self.stall_window_ms)
    }

    pub fn buffer_full_grace(&self) -> Duration {
        Duration::from_millis(self.buffer_full_grace_ms)
    }

    pub fn muted_autoplay_delay(&self) -> Duration {
        Duration::from_millis(self.muted_autoplay_delay_ms)
    }

    /// Delay selected for a reload cause
    pub fn delay_for(&self, cause: &ReloadCause) -> Duration {
        let ms = match cause {
            ReloadCause::ServerError => self.server_error_delay_ms,
            ReloadCause::Stall { .. } => 0,
            ReloadCause::BufferFull => self.buffer_full_delay_ms,
            ReloadCause::Fatal => self.reload_delay_ms,
        };
        Duration::from_millis(ms)
    }
}

/// Why a reload was requested
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReloadCause {
    /// 5xx from the engine or content resolution
    ServerError,
    /// Fatal or escalated error
    Fatal,
    /// Stall that survived in-place recovery; resume from the last good time
    Stall { resume_at: f64 },
    /// Source buffer stayed full past its grace period
    BufferFull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReloadState {
    Idle,
    ReloadPending,
    Reloading,
}

/// Result of asking the controller for a reload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadDecision {
    /// Transitioned to `ReloadPending`; wait `delay` then reload
    Scheduled { delay: Duration },
    /// A reload is already pending or running, or the controller gave up earlier
    Swallowed,
    /// The ceiling was just reached; surface a terminal error
    Exhausted,
}

/// Retry/backoff state machine
#[derive(Debug, Clone)]
pub struct ReloadController {
    state: ReloadState,
    reloads: u32,
    max_reloads: u32,
    given_up: bool,
}

impl ReloadController {
    pub fn new(max_reloads: u32) -> Self {
        Self {
            state: ReloadState::Idle,
            reloads: 0,
            max_reloads,
            given_up: false,
        }
    }

    pub fn state(&self) -> ReloadState {
        self.state
    }

    /// Reloads started over the session's lifetime
    pub fn reloads(&self) -> u32 {
        self.reloads
    }

    pub fn has_given_up(&self) -> bool {
        self.given_up
    }

    pub fn is_busy(&self) -> bool {
        self.state != ReloadState::Idle
    }

    /// `Idle → ReloadPending`, guarded against overlap and the lifetime ceiling
    pub fn request(&mut self, cause: &ReloadCause, policy: &RecoveryPolicy) -> ReloadDecision {
        if self.given_up || self.state != ReloadState::Idle {
            return ReloadDecision::Swallowed;
        }

        if self.reloads >= self.max_reloads {
            self.given_up = true;
            return ReloadDecision::Exhausted;
        }

        self.state = ReloadState::ReloadPending;
        ReloadDecision::Scheduled {
            delay: policy.delay_for(cause),
        }
    }

    /// `ReloadPending → Reloading`; returns the attempt number
    pub fn begin(&mut self) -> Option<u32> {
        if self.state != ReloadState::ReloadPending {
            return None;
        }
        self.reloads += 1;
        self.state = ReloadState::Reloading;
        Some(self.reloads)
    }

    /// `Reloading → Idle` once the new initialization pass has attached an engine
    pub fn complete(&mut self) {
        if self.state == ReloadState::Reloading {
            self.state = ReloadState::Idle;
        }
    }

    /// Abandon a pending or running reload without counting it as success
    pub fn cancel(&mut self) {
        self.state = ReloadState::Idle;
    }
}

/// Verdict of the host's restart hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartVerdict {
    Continue,
    /// Destroy the session instead of reloading
    Abort,
}

/// Host-supplied veto consulted before each reload
#[async_trait]
pub trait RestartHook: Send + Sync {
    async fn on_restart(&self, error: &ErrorRecord) -> Result<RestartVerdict>;
}

/// What a reload reinitializes; implemented by the session
#[async_trait]
pub trait ReloadTarget: Send + Sync {
    fn is_destroyed(&self) -> bool;

    /// Media sink state to restore after re-attachment
    fn capture_snapshot(&self) -> Option<ResumeSnapshot>;

    fn show_message(&self, message: Option<String>);

    /// Tear the session down instead of reloading
    fn abort(&self);

    /// Forget cached endpoints so the next resolution picks fresh ones
    async fn reset_region(&self);

    /// Run a full initialization pass
    async fn reinitialize(&self, snapshot: Option<ResumeSnapshot>) -> Result<()>;
}

/// How a reload run ended
#[derive(Debug)]
pub enum ReloadOutcome {
    /// New engine attached; controller is back to `Idle`
    Reinitialized { attempt: u32 },
    /// The restart hook vetoed the reload and the session was torn down
    Aborted,
    /// Destroy or cancellation interrupted the reload
    Cancelled,
    /// The initialization pass failed; controller returned to `Idle`
    Failed(Error),
}

/// Drive a scheduled reload from `ReloadPending` through reinitialization.
///
/// The hook is consulted first; a hook failure is logged and treated as
/// `Continue`. The delay is cancelable, and the destroyed flag is rechecked
/// after every suspension point.
#[instrument(skip_all, fields(kind = %record.kind, delay_ms = delay.as_millis() as u64))]
pub async fn run_reload<T: ReloadTarget + ?Sized>(
    controller: &Mutex<ReloadController>,
    target: &T,
    record: &ErrorRecord,
    cause: ReloadCause,
    delay: Duration,
    hook: Option<&dyn RestartHook>,
    cancel: &CancellationToken,
) -> ReloadOutcome {
    if let Some(hook) = hook {
        match hook.on_restart(record).await {
            Ok(RestartVerdict::Abort) => {
                info!("Restart hook aborted reload, destroying session");
                controller.lock().cancel();
                target.abort();
                return ReloadOutcome::Aborted;
            }
            Ok(RestartVerdict::Continue) => {}
            Err(error) => warn!(%error, "Restart hook failed"),
        }
    }

    if target.is_destroyed() {
        controller.lock().cancel();
        return ReloadOutcome::Cancelled;
    }

    target.show_message(Some(
        record
            .raw
            .message
            .clone()
            .unwrap_or_else(|| RELOADING_MESSAGE.to_string()),
    ));

    tokio::select! {
        _ = tokio::time::sleep(delay) => {}
        _ = cancel.cancelled() => {
            controller.lock().cancel();
            return ReloadOutcome::Cancelled;
        }
    }

    if target.is_destroyed() {
        controller.lock().cancel();
        return ReloadOutcome::Cancelled;
    }

    let Some(attempt) = controller.lock().begin() else {
        return ReloadOutcome::Cancelled;
    };
    info!(attempt, "Reloading stream");

    target.reset_region().await;
    if target.is_destroyed() {
        controller.lock().cancel();
        return ReloadOutcome::Cancelled;
    }

    let mut snapshot = target.capture_snapshot();
    if let (ReloadCause::Stall { resume_at }, Some(snapshot)) = (cause, snapshot.as_mut()) {
        snapshot.current_time = Some(resume_at);
    }

    target.show_message(None);
    match target.reinitialize(snapshot).await {
        Ok(()) => {
            // Errors from the new engine must be able to schedule the next reload
            controller.lock().complete();
            ReloadOutcome::Reinitialized { attempt }
        }
        Err(error) => {
            warn!(attempt, %error, "Reload initialization failed");
            controller.lock().cancel();
            ReloadOutcome::Failed(error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{EngineErrorType, ErrorClassifier, RawError};
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    fn record() -> ErrorRecord {
        ErrorClassifier::default().classify(RawError::new(EngineErrorType::Network, "levelLoadError").fatal())
    }

    #[test]
    fn test_overlapping_requests_are_swallowed() {
        let policy = RecoveryPolicy::default();
        let mut controller = ReloadController::new(10);

        assert!(matches!(
            controller.request(&ReloadCause::Fatal, &policy),
            ReloadDecision::Scheduled { .. }
        ));
        assert_eq!(controller.request(&ReloadCause::Fatal, &policy), ReloadDecision::Swallowed);

        controller.begin();
        assert_eq!(controller.request(&ReloadCause::ServerError, &policy), ReloadDecision::Swallowed);

        controller.complete();
        assert_eq!(controller.state(), ReloadState::Idle);
    }

    #[test]
    fn test_ceiling_is_lifetime_bounded() {
        let policy = RecoveryPolicy::default();
        let mut controller = ReloadController::new(10);

        for attempt in 1..=10 {
            assert!(matches!(
                controller.request(&ReloadCause::Fatal, &policy),
                ReloadDecision::Scheduled { .. }
            ));
            assert_eq!(controller.begin(), Some(attempt));
            controller.complete();
        }

        assert_eq!(controller.request(&ReloadCause::Fatal, &policy), ReloadDecision::Exhausted);
        assert!(controller.has_given_up());
        assert_eq!(controller.request(&ReloadCause::Fatal, &policy), ReloadDecision::Swallowed);
        assert_eq!(controller.reloads(), 10);
    }

    #[test]
    fn test_delay_selection() {
        let policy = RecoveryPolicy::default();
        assert_eq!(policy.delay_for(&ReloadCause::ServerError), Duration::from_secs(10));
        assert_eq!(policy.delay_for(&ReloadCause::Fatal), Duration::from_secs(6));
        assert_eq!(policy.delay_for(&ReloadCause::Stall { resume_at: 3.0 }), Duration::ZERO);
    }

    #[test]
    fn test_begin_requires_pending() {
        let mut controller = ReloadController::new(3);
        assert_eq!(controller.begin(), None);
        assert_eq!(controller.reloads(), 0);
    }

    #[derive(Default)]
    struct Target {
        destroyed: AtomicBool,
        aborted: AtomicBool,
        reinitialized: AtomicU32,
        resumed_at: Mutex<Option<f64>>,
    }

    #[async_trait]
    impl ReloadTarget for Target {
        fn is_destroyed(&self) -> bool {
            self.destroyed.load(Ordering::SeqCst)
        }

        fn capture_snapshot(&self) -> Option<ResumeSnapshot> {
            Some(ResumeSnapshot {
                muted: false,
                volume: 0.5,
                current_time: Some(99.0),
                playing: true,
            })
        }

        fn show_message(&self, _message: Option<String>) {}

        fn abort(&self) {
            self.aborted.store(true, Ordering::SeqCst);
        }

        async fn reset_region(&self) {}

        async fn reinitialize(&self, snapshot: Option<ResumeSnapshot>) -> Result<()> {
            self.reinitialized.fetch_add(1, Ordering::SeqCst);
            *self.resumed_at.lock() = snapshot.and_then(|s| s.current_time);
            Ok(())
        }
    }

    struct AbortHook;

    #[async_trait]
    impl RestartHook for AbortHook {
        async fn on_restart(&self, _error: &ErrorRecord) -> Result<RestartVerdict> {
            Ok(RestartVerdict::Abort)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stall_reload_resumes_from_captured_time() {
        let controller = Mutex::new(ReloadController::new(10));
        let target = Target::default();
        let cause = ReloadCause::Stall { resume_at: 42.0 };
        let ReloadDecision::Scheduled { delay } = controller.lock().request(&cause, &RecoveryPolicy::default()) else {
            panic!("reload should be scheduled");
        };

        let outcome = run_reload(&controller, &target, &record(), cause, delay, None, &CancellationToken::new()).await;

        assert!(matches!(outcome, ReloadOutcome::Reinitialized { attempt: 1 }));
        assert_eq!(*target.resumed_at.lock(), Some(42.0));
        assert_eq!(controller.lock().state(), ReloadState::Idle);
        assert_eq!(controller.lock().reloads(), 1);
    }

    #[tokio::test]
    async fn test_hook_abort_tears_down() {
        let controller = Mutex::new(ReloadController::new(10));
        controller.lock().request(&ReloadCause::Fatal, &RecoveryPolicy::default());
        let target = Target::default();

        let outcome = run_reload(
            &controller,
            &target,
            &record(),
            ReloadCause::Fatal,
            Duration::from_secs(6),
            Some(&AbortHook),
            &CancellationToken::new(),
        )
        .await;

        assert!(matches!(outcome, ReloadOutcome::Aborted));
        assert!(target.aborted.load(Ordering::SeqCst));
        assert_eq!(target.reinitialized.load(Ordering::SeqCst), 0);
        assert_eq!(controller.lock().reloads(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_delay() {
        let controller = Mutex::new(ReloadController::new(10));
        controller.lock().request(&ReloadCause::Fatal, &RecoveryPolicy::default());
        let target = Target::default();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = run_reload(
            &controller,
            &target,
            &record(),
            ReloadCause::Fatal,
            Duration::from_secs(6),
            None,
            &cancel,
        )
        .await;

        assert!(matches!(outcome, ReloadOutcome::Cancelled));
        assert_eq!(target.reinitialized.load(Ordering::SeqCst), 0);
        assert_eq!(controller.lock().state(), ReloadState::Idle);
    }
}
