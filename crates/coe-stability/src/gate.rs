//! Quiet-period gate over reported file changes

use coe_core::config::StabilityConfig;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

/// Session identifier, allocated from a per-gate counter
pub type SessionId = u64;

/// Notification scoped to one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StabilityEvent {
    /// A watched file changed; the quiet period restarts
    Reset { session_id: SessionId, path: String },
    /// The session finished, naturally or forced
    Completed {
        session_id: SessionId,
        elapsed: Duration,
        timed_out: bool,
    },
}

/// Result of waiting on a session
///
/// `timed_out` means the session was forced: the maximum wait elapsed or
/// the gate was cancelled. It is a warning, not a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StabilityOutcome {
    pub session_id: SessionId,
    pub elapsed: Duration,
    pub timed_out: bool,
}

#[derive(Debug)]
enum Signal {
    Changed { path: String, at: Instant },
    Cancel,
}

struct SessionEntry {
    files: Vec<String>,
    signals: mpsc::UnboundedSender<Signal>,
}

struct GateInner {
    next_id: AtomicU64,
    sessions: Mutex<HashMap<SessionId, SessionEntry>>,
    defaults: StabilityConfig,
}

impl GateInner {
    fn unregister(&self, id: SessionId) {
        self.sessions.lock().remove(&id);
    }
}

/// Tracks concurrent stability sessions
///
/// Cheap to clone; clones share the same sessions. The registry lock is
/// only held to register, look up or remove a session. Each session's
/// timers live inside its own waiting future.
#[derive(Clone)]
pub struct StabilityGate {
    inner: Arc<GateInner>,
}

impl Default for StabilityGate {
    fn default() -> Self {
        Self::new(StabilityConfig::default())
    }
}

impl std::fmt::Debug for StabilityGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StabilityGate")
            .field("active_sessions", &self.active_session_count())
            .field("defaults", &self.inner.defaults)
            .finish()
    }
}

impl StabilityGate {
    /// Create a gate whose `wait_with_defaults` uses `defaults`
    pub fn new(defaults: StabilityConfig) -> Self {
        Self {
            inner: Arc::new(GateInner {
                next_id: AtomicU64::new(1),
                sessions: Mutex::new(HashMap::new()),
                defaults,
            }),
        }
    }

    pub fn defaults(&self) -> &StabilityConfig {
        &self.inner.defaults
    }

    /// Register a session without waiting on it yet
    ///
    /// The session's clock starts now. Changes reported before
    /// [`StabilitySession::wait`] is polled are queued and still count.
    pub fn open_session(&self, files: Vec<String>) -> StabilitySession {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.sessions.lock().insert(
            id,
            SessionEntry {
                files: files.clone(),
                signals: tx,
            },
        );
        debug!(session_id = id, files = ?files, "Stability session opened");

        let now = Instant::now();
        StabilitySession {
            id,
            files,
            started_at: now,
            last_change: now,
            stable: false,
            signals: rx,
            events: None,
            gate: Arc::clone(&self.inner),
        }
    }

    /// Resolve once `files` have been quiet for `delay`, or after `max_wait`
    pub async fn wait_for_stability(
        &self,
        files: Vec<String>,
        delay: Duration,
        max_wait: Duration,
    ) -> StabilityOutcome {
        self.open_session(files).wait(delay, max_wait).await
    }

    /// [`wait_for_stability`](Self::wait_for_stability) with the configured durations
    pub async fn wait_with_defaults(&self, files: Vec<String>) -> StabilityOutcome {
        let delay = self.inner.defaults.delay();
        let max_wait = self.inner.defaults.max_wait();
        self.wait_for_stability(files, delay, max_wait).await
    }

    /// Restart the quiet period of every session watching `path`
    ///
    /// Matching is a bidirectional substring test: the reported path contains
    /// a watched entry, or a watched entry contains the reported path. This
    /// can cross-match unrelated files whose names nest; it is not a path
    /// equality check. Empty strings never match.
    ///
    /// Returns the number of sessions reset.
    pub fn report_file_change(&self, path: &str) -> usize {
        let at = Instant::now();
        let sessions = self.inner.sessions.lock();
        let mut reset = 0;
        for (id, entry) in sessions.iter() {
            if !entry.files.iter().any(|watched| paths_match(watched, path)) {
                continue;
            }
            let signal = Signal::Changed {
                path: path.to_string(),
                at,
            };
            if entry.signals.send(signal).is_ok() {
                debug!(session_id = id, path, "Quiet period reset");
                reset += 1;
            }
        }
        reset
    }

    /// Force-complete every active session
    ///
    /// Sessions are removed from the registry immediately; their waiting
    /// futures resolve with `timed_out = true`. Returns how many were
    /// cancelled.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<(SessionId, SessionEntry)> = self.inner.sessions.lock().drain().collect();
        for (_, entry) in &drained {
            let _ = entry.signals.send(Signal::Cancel);
        }
        if !drained.is_empty() {
            info!(count = drained.len(), "Cancelled all stability sessions");
        }
        drained.len()
    }

    pub fn active_session_count(&self) -> usize {
        self.inner.sessions.lock().len()
    }
}

fn paths_match(watched: &str, reported: &str) -> bool {
    if watched.is_empty() || reported.is_empty() {
        return false;
    }
    reported.contains(watched) || watched.contains(reported)
}

/// One registered wait over a file list
///
/// Dropping the session, or the future returned by [`wait`](Self::wait),
/// removes it from the gate.
pub struct StabilitySession {
    id: SessionId,
    files: Vec<String>,
    started_at: Instant,
    last_change: Instant,
    stable: bool,
    signals: mpsc::UnboundedReceiver<Signal>,
    events: Option<mpsc::UnboundedSender<StabilityEvent>>,
    gate: Arc<GateInner>,
}

impl StabilitySession {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn files(&self) -> &[String] {
        &self.files
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn last_change(&self) -> Instant {
        self.last_change
    }

    pub fn is_stable(&self) -> bool {
        self.stable
    }

    /// Receive this session's `Reset` and `Completed` events
    ///
    /// Only the most recent subscriber receives events. The channel closes
    /// when the session ends.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<StabilityEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.events = Some(tx);
        rx
    }

    /// Run the session to completion
    pub async fn wait(mut self, delay: Duration, max_wait: Duration) -> StabilityOutcome {
        let deadline = self.started_at + max_wait;
        let mut quiet_until = self.last_change + delay;

        let timed_out = loop {
            tokio::select! {
                biased;

                signal = self.signals.recv() => match signal {
                    Some(Signal::Changed { path, at }) => {
                        self.last_change = at;
                        quiet_until = at + delay;
                        self.emit(StabilityEvent::Reset {
                            session_id: self.id,
                            path,
                        });
                    }
                    Some(Signal::Cancel) | None => {
                        info!(session_id = self.id, "Stability session cancelled");
                        break true;
                    }
                },
                _ = sleep_until(quiet_until) => break false,
                _ = sleep_until(deadline) => {
                    warn!(
                        session_id = self.id,
                        max_wait_ms = max_wait.as_millis() as u64,
                        "Files did not settle before max wait; proceeding anyway"
                    );
                    break true;
                }
            }
        };

        self.stable = true;
        self.gate.unregister(self.id);

        let elapsed = Instant::now().saturating_duration_since(self.started_at);
        debug!(
            session_id = self.id,
            elapsed_ms = elapsed.as_millis() as u64,
            timed_out,
            "Stability session completed"
        );
        self.emit(StabilityEvent::Completed {
            session_id: self.id,
            elapsed,
            timed_out,
        });

        StabilityOutcome {
            session_id: self.id,
            elapsed,
            timed_out,
        }
    }

    fn emit(&self, event: StabilityEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

impl Drop for StabilitySession {
    fn drop(&mut self) {
        self.gate.unregister(self.id);
    }
}

impl std::fmt::Debug for StabilitySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StabilitySession")
            .field("id", &self.id)
            .field("files", &self.files)
            .field("stable", &self.stable)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DELAY: Duration = Duration::from_secs(60);
    const MAX_WAIT: Duration = Duration::from_secs(300);

    fn files(paths: &[&str]) -> Vec<String> {
        paths.iter().map(|p| p.to_string()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolves_after_quiet_period() {
        let gate = StabilityGate::default();
        let outcome = gate
            .wait_for_stability(files(&["a.ts"]), DELAY, MAX_WAIT)
            .await;

        assert!(!outcome.timed_out);
        assert!(outcome.elapsed >= DELAY && outcome.elapsed < DELAY + Duration::from_secs(1));
        assert_eq!(gate.active_session_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_changes_every_50s_hold_the_gate_open() {
        let gate = StabilityGate::default();
        let session = gate.open_session(files(&["a.ts"]));
        let handle = tokio::spawn(session.wait(DELAY, Duration::from_secs(100_000)));

        for _ in 0..20 {
            tokio::time::sleep(Duration::from_secs(50)).await;
            assert!(!handle.is_finished());
            assert_eq!(gate.report_file_change("a.ts"), 1);
        }

        let outcome = handle.await.unwrap();
        assert!(!outcome.timed_out);
        // Last report at 1000s, quiet for 60s afterwards
        assert!(outcome.elapsed >= Duration::from_secs(1060));
        assert!(outcome.elapsed < Duration::from_secs(1061));
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_wait_forces_completion() {
        let gate = StabilityGate::default();
        let session = gate.open_session(files(&["a.ts"]));
        let handle = tokio::spawn(session.wait(DELAY, Duration::from_secs(120)));

        let reporter = {
            let gate = gate.clone();
            tokio::spawn(async move {
                for _ in 0..30 {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    gate.report_file_change("src/a.ts");
                }
            })
        };

        let outcome = handle.await.unwrap();
        assert!(outcome.timed_out);
        assert!(outcome.elapsed >= Duration::from_secs(120));
        assert!(outcome.elapsed < Duration::from_secs(121));
        assert_eq!(gate.active_session_count(), 0);
        reporter.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_force_completes() {
        let gate = StabilityGate::default();
        let first = tokio::spawn(gate.open_session(files(&["a.ts"])).wait(DELAY, MAX_WAIT));
        let second = tokio::spawn(gate.open_session(files(&["b.ts"])).wait(DELAY, MAX_WAIT));
        assert_eq!(gate.active_session_count(), 2);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(gate.cancel_all(), 2);
        assert_eq!(gate.active_session_count(), 0);

        assert!(first.await.unwrap().timed_out);
        assert!(second.await.unwrap().timed_out);
        assert_eq!(gate.cancel_all(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_session_leaves_no_entry() {
        let gate = StabilityGate::default();

        let session = gate.open_session(files(&["a.ts"]));
        assert_eq!(gate.active_session_count(), 1);
        drop(session);
        assert_eq!(gate.active_session_count(), 0);

        let handle = tokio::spawn(gate.open_session(files(&["a.ts"])).wait(DELAY, MAX_WAIT));
        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());
        assert_eq!(gate.active_session_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_sessions_are_independent() {
        let gate = StabilityGate::default();
        let a = gate.open_session(files(&["src/a.ts"]));
        let b = gate.open_session(files(&["src/b.ts"]));
        assert!(b.id() > a.id());

        assert_eq!(gate.report_file_change("/repo/src/a.ts"), 1);
        // Watched entries contain the reported path
        assert_eq!(gate.report_file_change("src"), 2);
        assert_eq!(gate.report_file_change("lib/c.ts"), 0);
        assert_eq!(gate.report_file_change(""), 0);

        let a = tokio::spawn(a.wait(DELAY, MAX_WAIT));
        let b = tokio::spawn(b.wait(Duration::from_secs(10), MAX_WAIT));
        let b = b.await.unwrap();
        assert!(!b.timed_out);
        assert!(!a.is_finished());
        assert_eq!(gate.active_session_count(), 1);

        assert!(!a.await.unwrap().timed_out);
        assert_eq!(gate.active_session_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_events() {
        let gate = StabilityGate::default();
        let mut session = gate.open_session(files(&["a.ts"]));
        let mut events = session.subscribe();
        let id = session.id();
        let handle = tokio::spawn(session.wait(DELAY, MAX_WAIT));

        tokio::time::sleep(Duration::from_secs(10)).await;
        gate.report_file_change("a.ts");
        let outcome = handle.await.unwrap();
        assert!(outcome.elapsed >= Duration::from_secs(70));

        assert_eq!(
            events.recv().await,
            Some(StabilityEvent::Reset {
                session_id: id,
                path: "a.ts".to_string(),
            })
        );
        match events.recv().await {
            Some(StabilityEvent::Completed {
                session_id,
                timed_out,
                ..
            }) => {
                assert_eq!(session_id, id);
                assert!(!timed_out);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(events.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_defaults_come_from_config() {
        let gate = StabilityGate::new(StabilityConfig {
            delay_ms: 5_000,
            max_wait_ms: 20_000,
        });
        let outcome = gate.wait_with_defaults(files(&["a.ts"])).await;
        assert!(!outcome.timed_out);
        assert!(outcome.elapsed >= Duration::from_secs(5));
        assert!(outcome.elapsed < Duration::from_secs(6));
    }
}
