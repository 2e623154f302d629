//! Single-use, time-bounded yes/no gate for destructive commands.
//!
//! The command layer calls [`ConfirmationGate::request`], shows two buttons carrying
//! [`callback_data`], and awaits [`PendingConfirmation::wait`]. A button press is routed
//! back through [`ConfirmationGate::resolve`] (or `resolve_by` when only the requester
//! may answer).

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use tokio::sync::oneshot;

const CALLBACK_PREFIX: &str = "confirm";

struct Waiter {
    owner: Option<i64>,
    tx: oneshot::Sender<bool>,
}

type PendingMap = Arc<Mutex<HashMap<u64, Waiter>>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Confirmed,
    Declined,
    TimedOut,
}

/// Outcome of a button press.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resolution {
    Accepted,
    /// Unknown, expired or already answered.
    Stale,
    /// Pressed by someone other than the requester; the request stays open.
    NotOwner,
}

#[derive(Default)]
pub struct ConfirmationGate {
    next_id: AtomicU64,
    pending: PendingMap,
}

impl ConfirmationGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new pending confirmation that expires after `ttl`.
    pub fn request(&self, ttl: Duration) -> (u64, PendingConfirmation) {
        self.register(ttl, None)
    }

    /// Like [`request`](Self::request), but only `owner` may answer.
    pub fn request_for(&self, owner: i64, ttl: Duration) -> (u64, PendingConfirmation) {
        self.register(ttl, Some(owner))
    }

    fn register(&self, ttl: Duration, owner: Option<i64>) -> (u64, PendingConfirmation) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id, Waiter { owner, tx });
        (
            id,
            PendingConfirmation {
                id,
                ttl,
                rx,
                pending: self.pending.clone(),
            },
        )
    }

    /// Deliver an answer. Returns false for unknown, expired or already answered ids.
    pub fn resolve(&self, id: u64, confirmed: bool) -> bool {
        let Some(waiter) = lock(&self.pending).remove(&id) else {
            return false;
        };
        waiter.tx.send(confirmed).is_ok()
    }

    /// Deliver an answer from `user`, honouring the request's owner.
    pub fn resolve_by(&self, id: u64, user: i64, confirmed: bool) -> Resolution {
        let waiter = {
            let mut map = lock(&self.pending);
            let owner = match map.get(&id) {
                None => return Resolution::Stale,
                Some(w) => w.owner,
            };
            if owner.is_some_and(|o| o != user) {
                return Resolution::NotOwner;
            }
            map.remove(&id)
        };
        match waiter {
            Some(w) => {
                if w.tx.send(confirmed).is_ok() {
                    Resolution::Accepted
                } else {
                    Resolution::Stale
                }
            }
            None => Resolution::Stale,
        }
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }
}

/// Waiting side of one confirmation. Dropping it withdraws the request.
pub struct PendingConfirmation {
    id: u64,
    ttl: Duration,
    rx: oneshot::Receiver<bool>,
    pending: PendingMap,
}

impl PendingConfirmation {
    pub async fn wait(mut self) -> Decision {
        match tokio::time::timeout(self.ttl, &mut self.rx).await {
            Ok(Ok(true)) => Decision::Confirmed,
            Ok(Ok(false)) => Decision::Declined,
            // Sender gone without an answer, or the clock ran out.
            Ok(Err(_)) | Err(_) => Decision::TimedOut,
        }
    }
}

impl Drop for PendingConfirmation {
    fn drop(&mut self) {
        lock(&self.pending).remove(&self.id);
    }
}

fn lock(m: &Mutex<HashMap<u64, Waiter>>) -> std::sync::MutexGuard<'_, HashMap<u64, Waiter>> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Button payload: `confirm:<id>:yes` / `confirm:<id>:no`.
pub fn callback_data(id: u64, confirmed: bool) -> String {
    let answer = if confirmed { "yes" } else { "no" };
    format!("{CALLBACK_PREFIX}:{id}:{answer}")
}

/// Inverse of [`callback_data`].
pub fn parse_callback_data(data: &str) -> Option<(u64, bool)> {
    let mut parts = data.split(':');
    if parts.next()? != CALLBACK_PREFIX {
        return None;
    }
    let id = parts.next()?.parse::<u64>().ok()?;
    let confirmed = match parts.next()? {
        "yes" => true,
        "no" => false,
        _ => return None,
    };
    if parts.next().is_some() {
        return None;
    }
    Some((id, confirmed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn confirmed_and_declined() {
        let gate = ConfirmationGate::new();

        let (id, pending) = gate.request(Duration::from_secs(5));
        assert!(gate.resolve(id, true));
        assert_eq!(pending.wait().await, Decision::Confirmed);

        let (id, pending) = gate.request(Duration::from_secs(5));
        assert!(gate.resolve(id, false));
        assert_eq!(pending.wait().await, Decision::Declined);
        assert_eq!(gate.pending_count(), 0);
    }

    #[tokio::test]
    async fn answers_are_single_use() {
        let gate = ConfirmationGate::new();
        let (id, pending) = gate.request(Duration::from_secs(5));
        assert!(gate.resolve(id, false));
        assert!(!gate.resolve(id, true));
        assert_eq!(pending.wait().await, Decision::Declined);
        assert!(!gate.resolve(999, true));
    }

    #[tokio::test]
    async fn resolve_from_another_task() {
        let gate = Arc::new(ConfirmationGate::new());
        let (id, pending) = gate.request(Duration::from_secs(5));

        let g = gate.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            g.resolve(id, true);
        });
        assert_eq!(pending.wait().await, Decision::Confirmed);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_and_rejects_late_answers() {
        let gate = ConfirmationGate::new();
        let (id, pending) = gate.request(Duration::from_secs(60));

        assert_eq!(pending.wait().await, Decision::TimedOut);
        assert!(!gate.resolve(id, true));
        assert_eq!(gate.pending_count(), 0);
    }

    #[tokio::test]
    async fn only_the_owner_may_answer() {
        let gate = ConfirmationGate::new();
        let (id, pending) = gate.request_for(42, Duration::from_secs(5));

        assert_eq!(gate.resolve_by(id, 7, true), Resolution::NotOwner);
        assert_eq!(gate.pending_count(), 1);
        assert_eq!(gate.resolve_by(id, 42, true), Resolution::Accepted);
        assert_eq!(gate.resolve_by(id, 42, true), Resolution::Stale);
        assert_eq!(pending.wait().await, Decision::Confirmed);
    }

    #[tokio::test]
    async fn resolve_by_delivers_once_then_reports_stale() {
        let gate = ConfirmationGate::new();
        let (id, pending) = gate.request(Duration::from_secs(5));

        assert_eq!(gate.resolve_by(id, 99, false), Resolution::Accepted);
        assert_eq!(gate.resolve_by(id, 99, true), Resolution::Stale);
        assert_eq!(pending.wait().await, Decision::Declined);

        let (id, pending) = gate.request_for(1, Duration::from_secs(5));
        drop(pending);
        assert_eq!(gate.resolve_by(id, 1, true), Resolution::Stale);
    }

    #[test]
    fn ids_are_unique() {
        let gate = ConfirmationGate::new();
        let (a, _pa) = gate.request(Duration::from_secs(1));
        let (b, _pb) = gate.request(Duration::from_secs(1));
        assert_ne!(a, b);
        assert_eq!(gate.pending_count(), 2);
    }

    #[test]
    fn callback_data_parses_back() {
        assert_eq!(callback_data(7, true), "confirm:7:yes");
        assert_eq!(parse_callback_data("confirm:7:yes"), Some((7, true)));
        assert_eq!(parse_callback_data("confirm:12:no"), Some((12, false)));
        assert_eq!(parse_callback_data("confirm:x:no"), None);
        assert_eq!(parse_callback_data("confirm:1:maybe"), None);
        assert_eq!(parse_callback_data("confirm:1:no:extra"), None);
        assert_eq!(parse_callback_data("askuser:1:0"), None);
    }
}
