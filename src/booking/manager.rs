//! Owner of every open booking session.
//!
//! All session mutation, including the timeout sweep, goes through the one
//! `sessions` lock, so an input and an expiry for the same user are never both
//! applied.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::catalog::Catalog;
use super::machine::{BookingRecord, Session, Transition, transition};
use super::state::BookingState;
use crate::clock::Clock;
use crate::notify::BookingNotifier;

/// What handling one input produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingOutcome {
    /// A step to show: a new step after a valid input, or the first step.
    Step(Session),
    /// Input rejected; the session is unchanged apart from its activity time.
    Rejected { reason: String, session: Session },
    Confirmed(BookingRecord),
    Cancelled,
    /// The session timed out before this input arrived.
    Expired,
    /// No session and nothing owed to this user.
    NoSession,
}

/// In-memory booking sessions, one per user.
pub struct BookingManager {
    sessions: Mutex<HashMap<String, Session>>,
    /// Users whose session was swept and who have not been told yet.
    expired_notices: Mutex<HashSet<String>>,
    catalog: Catalog,
    clock: Arc<dyn Clock>,
    timeout: Duration,
    notifier: Arc<dyn BookingNotifier>,
}

impl BookingManager {
    pub fn new(
        catalog: Catalog,
        clock: Arc<dyn Clock>,
        timeout: Duration,
        notifier: Arc<dyn BookingNotifier>,
    ) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            expired_notices: Mutex::new(HashSet::new()),
            catalog,
            clock,
            timeout,
            notifier,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Open a session at the course step, replacing any existing one.
    pub async fn start(&self, user_id: &str) -> Session {
        let session = Session::new(user_id, self.clock.now());
        let replaced = self
            .sessions
            .lock()
            .await
            .insert(user_id.to_string(), session.clone());
        self.expired_notices.lock().await.remove(user_id);

        if replaced.is_some() {
            info!(user_id, "Booking restarted");
        } else {
            info!(user_id, "Booking started");
        }
        session
    }

    /// Feed one input to the user's session.
    pub async fn handle(&self, user_id: &str, input: &str) -> BookingOutcome {
        let now = self.clock.now();
        let mut sessions = self.sessions.lock().await;

        let Some(session) = sessions.get_mut(user_id) else {
            return if self.take_expired_notice(user_id).await {
                BookingOutcome::Expired
            } else {
                BookingOutcome::NoSession
            };
        };

        if session.is_expired(now, self.timeout) {
            sessions.remove(user_id);
            info!(user_id, "Booking session expired");
            return BookingOutcome::Expired;
        }

        let from = session.state;
        let decision = transition(session, input, &self.catalog);
        session.apply(&decision, now);

        match decision {
            Transition::Advance { to, .. } => {
                debug!(user_id, from = %from, to = %to, "Booking advanced");
                BookingOutcome::Step(session.clone())
            }
            Transition::Reprompt { reason } => {
                debug!(user_id, state = %from, %reason, "Booking input rejected");
                BookingOutcome::Rejected {
                    reason,
                    session: session.clone(),
                }
            }
            Transition::Cancelled => {
                sessions.remove(user_id);
                info!(user_id, state = %from, "Booking cancelled");
                BookingOutcome::Cancelled
            }
            Transition::Confirmed => {
                let Some(finished) = sessions.remove(user_id) else {
                    return BookingOutcome::NoSession;
                };
                drop(sessions);

                let Some(record) = finished.to_record(now) else {
                    error!(user_id, "Confirmed booking is missing fields, discarding");
                    return BookingOutcome::Cancelled;
                };
                info!(user_id, booking_id = %record.id, "Booking confirmed");
                if let Err(e) = self.notifier.notify(&record).await {
                    warn!(booking_id = %record.id, error = %e, "Booking notification failed");
                }
                BookingOutcome::Confirmed(record)
            }
        }
    }

    /// Drop the user's session. Returns whether one was open.
    pub async fn cancel(&self, user_id: &str) -> bool {
        let removed = self.sessions.lock().await.remove(user_id).is_some();
        if removed {
            info!(user_id, "Booking cancelled");
        }
        removed
    }

    /// Forget everything about the user, including an owed expiry notice.
    pub async fn reset(&self, user_id: &str) {
        self.sessions.lock().await.remove(user_id);
        self.expired_notices.lock().await.remove(user_id);
    }

    /// Whether the user has an open, unexpired session.
    pub async fn has_session(&self, user_id: &str) -> bool {
        let now = self.clock.now();
        self.sessions
            .lock()
            .await
            .get(user_id)
            .is_some_and(|s| !s.is_expired(now, self.timeout))
    }

    /// Current step, if a session is open.
    pub async fn state_of(&self, user_id: &str) -> BookingState {
        self.sessions
            .lock()
            .await
            .get(user_id)
            .map(|s| s.state)
            .unwrap_or_default()
    }

    /// Settle a timed-out session before anything else runs for the user.
    /// Returns true if the user is owed an expiry notice, either because their
    /// session has just been found idle or because the sweep removed it.
    pub async fn take_expiry(&self, user_id: &str) -> bool {
        let now = self.clock.now();
        let mut sessions = self.sessions.lock().await;
        if sessions
            .get(user_id)
            .is_some_and(|s| s.is_expired(now, self.timeout))
        {
            sessions.remove(user_id);
            info!(user_id, "Booking session expired");
            return true;
        }
        drop(sessions);
        self.take_expired_notice(user_id).await
    }

    /// Consume a pending expiry notice for the user.
    pub async fn take_expired_notice(&self, user_id: &str) -> bool {
        self.expired_notices.lock().await.remove(user_id)
    }

    /// Remove sessions idle past the timeout. Returns how many were removed.
    pub async fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let mut sessions = self.sessions.lock().await;
        let expired: Vec<String> = sessions
            .iter()
            .filter(|(_, s)| s.is_expired(now, self.timeout))
            .map(|(id, _)| id.clone())
            .collect();
        if expired.is_empty() {
            return 0;
        }

        // Notices are recorded before the session lock is released so the
        // user's next event sees one or the other.
        let mut notices = self.expired_notices.lock().await;
        for user_id in &expired {
            sessions.remove(user_id);
            notices.insert(user_id.clone());
        }
        info!(count = expired.len(), "Expired idle booking sessions");
        expired.len()
    }

    pub async fn active_sessions(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

/// Spawn a background task that periodically expires idle sessions.
pub fn spawn_sweep_task(
    manager: Arc<BookingManager>,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            manager.sweep_expired().await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::notify::ChannelNotifier;

    const TIMEOUT: Duration = Duration::from_secs(600);

    fn manager() -> (
        BookingManager,
        Arc<ManualClock>,
        tokio::sync::mpsc::UnboundedReceiver<BookingRecord>,
    ) {
        let clock = Arc::new(ManualClock::default());
        let (notifier, rx) = ChannelNotifier::new();
        let manager = BookingManager::new(
            Catalog::school_default(),
            clock.clone(),
            TIMEOUT,
            Arc::new(notifier),
        );
        (manager, clock, rx)
    }

    async fn fill(manager: &BookingManager, user: &str) {
        manager.start(user).await;
        for input in ["Conversational English", "Mon 18:00", "Alice", "alice@example.com", "+1234567"] {
            manager.handle(user, input).await;
        }
    }

    #[tokio::test]
    async fn confirm_notifies_exactly_once() {
        let (manager, _clock, mut rx) = manager();
        fill(&manager, "u1").await;
        assert_eq!(manager.state_of("u1").await, BookingState::Confirm);

        let outcome = manager.handle("u1", "confirm").await;
        let BookingOutcome::Confirmed(record) = outcome else {
            panic!("expected confirmation, got {outcome:?}");
        };
        assert_eq!(record.name, "Alice");
        assert_eq!(rx.recv().await.unwrap().id, record.id);
        assert!(rx.try_recv().is_err());

        assert!(!manager.has_session("u1").await);
        assert_eq!(manager.handle("u1", "confirm").await, BookingOutcome::NoSession);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn rejected_input_keeps_state() {
        let (manager, _clock, _rx) = manager();
        manager.start("u1").await;
        manager.handle("u1", "1").await;
        manager.handle("u1", "1").await;
        assert_eq!(manager.state_of("u1").await, BookingState::EnterName);

        let outcome = manager.handle("u1", "A").await;
        assert!(matches!(outcome, BookingOutcome::Rejected { .. }));
        assert_eq!(manager.state_of("u1").await, BookingState::EnterName);
    }

    #[tokio::test]
    async fn cancel_destroys_session() {
        let (manager, _clock, mut rx) = manager();
        manager.start("u1").await;
        assert_eq!(manager.handle("u1", "cancel").await, BookingOutcome::Cancelled);
        assert!(!manager.has_session("u1").await);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn next_event_after_timeout_sees_expiry() {
        let (manager, clock, _rx) = manager();
        manager.start("u1").await;
        clock.advance(TIMEOUT + Duration::from_secs(1));

        assert!(!manager.has_session("u1").await);
        assert_eq!(manager.handle("u1", "IT English").await, BookingOutcome::Expired);
        assert_eq!(manager.state_of("u1").await, BookingState::Idle);
        assert_eq!(manager.handle("u1", "IT English").await, BookingOutcome::NoSession);
    }

    #[tokio::test]
    async fn sweep_removes_idle_and_leaves_notice() {
        let (manager, clock, _rx) = manager();
        manager.start("idle").await;
        clock.advance(Duration::from_secs(400));
        manager.start("busy").await;
        clock.advance(Duration::from_secs(201));

        assert_eq!(manager.sweep_expired().await, 1);
        assert_eq!(manager.active_sessions().await, 1);
        assert!(manager.has_session("busy").await);

        assert_eq!(manager.handle("idle", "hello").await, BookingOutcome::Expired);
        assert_eq!(manager.handle("idle", "hello").await, BookingOutcome::NoSession);
    }

    #[tokio::test]
    async fn start_clears_pending_notice() {
        let (manager, clock, _rx) = manager();
        manager.start("u1").await;
        clock.advance(TIMEOUT * 2);
        manager.sweep_expired().await;

        manager.start("u1").await;
        assert!(matches!(manager.handle("u1", "1").await, BookingOutcome::Step(_)));
    }

    #[tokio::test]
    async fn activity_keeps_session_alive() {
        let (manager, clock, _rx) = manager();
        manager.start("u1").await;
        for _ in 0..3 {
            clock.advance(Duration::from_secs(500));
            manager.handle("u1", "not a course").await;
        }
        assert_eq!(manager.sweep_expired().await, 0);
        assert!(manager.has_session("u1").await);
    }

    #[tokio::test]
    async fn take_expiry_reports_once() {
        let (manager, clock, _rx) = manager();
        manager.start("lazy").await;
        manager.start("swept").await;
        assert!(!manager.take_expiry("lazy").await);

        clock.advance(TIMEOUT + Duration::from_secs(1));
        assert!(manager.take_expiry("lazy").await);
        assert!(!manager.take_expiry("lazy").await);

        manager.sweep_expired().await;
        assert!(manager.take_expiry("swept").await);
        assert!(!manager.take_expiry("swept").await);
    }

    #[tokio::test]
    async fn reset_forgets_session_and_notice() {
        let (manager, clock, _rx) = manager();
        manager.start("u1").await;
        clock.advance(TIMEOUT * 2);
        manager.sweep_expired().await;
        manager.reset("u1").await;
        assert_eq!(manager.handle("u1", "hi").await, BookingOutcome::NoSession);
    }
}
