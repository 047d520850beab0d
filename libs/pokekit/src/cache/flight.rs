use crate::error::ApiError;
use crate::key::RequestKey;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

pub type Outcome = Result<Arc<Value>, ApiError>;

pub enum Lookup {
    Hit(Arc<Value>),
    Join(broadcast::Receiver<Outcome>),
    Lead,
}

/// Registry of in-flight fetches, one broadcast channel per key.
///
/// Joiners subscribe under the registry lock, so a result sent after the
/// entry is removed still reaches every one of them.
#[derive(Default)]
pub struct FlightRegistry {
    pending: Mutex<HashMap<RequestKey, broadcast::Sender<Outcome>>>,
}

impl FlightRegistry {
    /// Atomically: consult `cached`, join a pending flight, or register as leader.
    pub(crate) fn lookup<C>(&self, key: &RequestKey, cached: C) -> Lookup
    where
        C: FnOnce() -> Option<Arc<Value>>,
    {
        let mut pending = self.pending.lock();

        if let Some(value) = cached() {
            return Lookup::Hit(value);
        }

        if let Some(tx) = pending.get(key) {
            return Lookup::Join(tx.subscribe());
        }

        let (tx, _) = broadcast::channel(1);
        pending.insert(key.clone(), tx);
        Lookup::Lead
    }

    /// Remove the flight, run `on_success` under the same lock, then release joiners.
    pub(crate) fn complete<S>(&self, key: &RequestKey, outcome: &Outcome, on_success: S)
    where
        S: FnOnce(&Arc<Value>),
    {
        let tx = {
            let mut pending = self.pending.lock();
            if let Ok(value) = outcome {
                on_success(value);
            }
            pending.remove(key)
        };

        if let Some(tx) = tx
            && tx.send(outcome.clone()).is_err()
        {
            tracing::trace!(key = %key, "no joiners waiting");
        }
    }

    /// Drop the flight without a result; joiners see a closed channel.
    fn abandon(&self, key: &RequestKey) {
        if self.pending.lock().remove(key).is_some() {
            tracing::debug!(key = %key, "fetch cancelled; releasing joiners");
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.lock().len()
    }
}

/// Removes the leader's registry entry if its future is dropped mid-fetch.
pub struct LeaderGuard<'a> {
    registry: &'a FlightRegistry,
    key: &'a RequestKey,
    armed: bool,
}

impl<'a> LeaderGuard<'a> {
    pub(crate) fn new(registry: &'a FlightRegistry, key: &'a RequestKey) -> Self {
        Self {
            registry,
            key,
            armed: true,
        }
    }

    pub(crate) fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.registry.abandon(self.key);
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn first_caller_leads_second_joins() {
        let registry = FlightRegistry::default();
        let key = RequestKey::from("k");

        assert!(matches!(registry.lookup(&key, || None), Lookup::Lead));
        assert!(matches!(registry.lookup(&key, || None), Lookup::Join(_)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn cached_value_wins() {
        let registry = FlightRegistry::default();
        let key = RequestKey::from("k");
        let value = Arc::new(json!(1));
        assert!(matches!(
            registry.lookup(&key, || Some(value.clone())),
            Lookup::Hit(_)
        ));
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn complete_releases_joiners() {
        let registry = FlightRegistry::default();
        let key = RequestKey::from("k");
        assert!(matches!(registry.lookup(&key, || None), Lookup::Lead));
        let Lookup::Join(mut rx) = registry.lookup(&key, || None) else {
            panic!("expected join");
        };

        let outcome: Outcome = Ok(Arc::new(json!({"id": 25})));
        let mut stored = false;
        registry.complete(&key, &outcome, |_| stored = true);

        assert!(stored);
        assert_eq!(registry.len(), 0);
        assert_eq!(rx.recv().await.unwrap().unwrap()["id"], 25);
    }

    #[tokio::test]
    async fn dropped_guard_closes_channel() {
        let registry = FlightRegistry::default();
        let key = RequestKey::from("k");
        assert!(matches!(registry.lookup(&key, || None), Lookup::Lead));
        let Lookup::Join(mut rx) = registry.lookup(&key, || None) else {
            panic!("expected join");
        };

        drop(LeaderGuard::new(&registry, &key));

        assert_eq!(registry.len(), 0);
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }

    #[test]
    fn errors_skip_on_success() {
        let registry = FlightRegistry::default();
        let key = RequestKey::from("k");
        assert!(matches!(registry.lookup(&key, || None), Lookup::Lead));

        let outcome: Outcome = Err(ApiError::Connection {
            message: "reset".to_owned(),
        });
        registry.complete(&key, &outcome, |_| panic!("errors must not be stored"));
        assert_eq!(registry.len(), 0);
    }
}
