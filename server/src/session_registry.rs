use pixel_system::SessionId;
use std::collections::HashMap;
use tokio::sync::mpsc::{self, error::TrySendError};

/// Producer side of a session's bounded outbound queue. The registry holds the
/// only strong sender, so removing an entry closes the queue.
pub type SessionTx = mpsc::Sender<String>;

pub struct SessionRegistry {
    session_txs: HashMap<SessionId, SessionTx>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            session_txs: HashMap::new(),
        }
    }

    /// Returns false and keeps the existing entry if `session_id` is already registered.
    pub fn insert(&mut self, session_id: SessionId, tx: SessionTx) -> bool {
        if self.session_txs.contains_key(&session_id) {
            return false;
        }
        self.session_txs.insert(session_id, tx);
        true
    }

    pub fn remove(&mut self, session_id: &SessionId) -> Option<SessionTx> {
        self.session_txs.remove(session_id)
    }

    pub fn len(&self) -> usize {
        self.session_txs.len()
    }

    pub fn ids(&self) -> Vec<SessionId> {
        let mut ids = self.session_txs.keys().copied().collect::<Vec<_>>();
        ids.sort_unstable();
        ids
    }

    /// Never waits: a full queue hands the frame back in the error.
    pub fn try_send_to(
        &self,
        session_id: &SessionId,
        frame: String,
    ) -> Result<(), TrySendError<String>> {
        match self.session_txs.get(session_id) {
            Some(tx) => tx.try_send(frame),
            None => Err(TrySendError::Closed(frame)),
        }
    }

    /// Offers `frame` to every session without waiting. Sessions whose queue is
    /// full or whose receiver is gone are removed, and their ids returned.
    pub fn broadcast(&mut self, frame: &str) -> Vec<SessionId> {
        let evicted = self
            .session_txs
            .iter()
            .filter_map(|(session_id, tx)| match tx.try_send(frame.to_owned()) {
                Ok(()) => None,
                Err(_) => Some(*session_id),
            })
            .collect::<Vec<_>>();

        for session_id in &evicted {
            self.session_txs.remove(session_id);
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::error::TryRecvError;

    #[test]
    fn it_ignores_duplicate_registration() {
        let mut registry = SessionRegistry::new();
        let (first_tx, mut first_rx) = mpsc::channel(4);
        let (second_tx, mut second_rx) = mpsc::channel(4);

        assert!(registry.insert(1, first_tx));
        assert!(!registry.insert(1, second_tx));
        assert_eq!(registry.len(), 1);

        registry.broadcast("hello");
        assert_eq!(first_rx.try_recv().expect(""), "hello");
        assert_eq!(second_rx.try_recv(), Err(TryRecvError::Disconnected));
    }

    #[test]
    fn it_removes_idempotently() {
        let mut registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::channel(4);
        registry.insert(7, tx);

        assert!(registry.remove(&7).is_some());
        assert!(registry.remove(&7).is_none());
        assert!(registry.ids().is_empty());
    }

    #[test]
    fn it_closes_the_queue_on_remove() {
        let mut registry = SessionRegistry::new();
        let (tx, mut rx) = mpsc::channel(4);
        registry.insert(1, tx);
        registry.try_send_to(&1, "welcome".into()).expect("");

        drop(registry.remove(&1));
        assert_eq!(rx.try_recv().expect(""), "welcome");
        assert_eq!(rx.try_recv(), Err(TryRecvError::Disconnected));
    }

    #[test]
    fn it_evicts_saturated_sessions_only() {
        let mut registry = SessionRegistry::new();
        let (slow_tx, mut slow_rx) = mpsc::channel(1);
        let (fast_tx, mut fast_rx) = mpsc::channel(8);
        registry.insert(1, slow_tx);
        registry.insert(2, fast_tx);

        assert!(registry.broadcast("a").is_empty());
        assert_eq!(registry.broadcast("b"), vec![1]);
        assert_eq!(registry.ids(), vec![2]);

        assert_eq!(slow_rx.try_recv().expect(""), "a");
        assert_eq!(slow_rx.try_recv(), Err(TryRecvError::Disconnected));
        assert_eq!(fast_rx.try_recv().expect(""), "a");
        assert_eq!(fast_rx.try_recv().expect(""), "b");
    }

    #[test]
    fn it_evicts_sessions_whose_receiver_is_gone() {
        let mut registry = SessionRegistry::new();
        let (tx, rx) = mpsc::channel(8);
        registry.insert(3, tx);
        drop(rx);

        assert_eq!(registry.broadcast("a"), vec![3]);
        assert!(registry.ids().is_empty());
    }

    #[test]
    fn it_reports_missing_session_as_closed() {
        let registry = SessionRegistry::new();
        assert!(matches!(
            registry.try_send_to(&42, "x".into()),
            Err(TrySendError::Closed(_))
        ));
    }
}
