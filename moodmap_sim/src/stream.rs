//! Simulated remote document collection with fault injection.

use async_trait::async_trait;
use moodmap_env::{
    DocumentChange, EnvError, FaultController, QueryKey, RecordStream, Subscription, SubscriptionId,
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::debug;

use crate::context::lock;

type Delivery = Result<DocumentChange, EnvError>;

/// A registered listener.
struct Listener {
    id: SubscriptionId,
    query: QueryKey,
    tx: mpsc::UnboundedSender<Delivery>,
}

struct CollectionState {
    name: String,
    documents: BTreeMap<String, Value>,
    listeners: Vec<Listener>,
    available: bool,
    subscriptions_opened: u64,
}

impl CollectionState {
    fn fan_out(&mut self, change: &DocumentChange) -> usize {
        // Listeners whose receiver is gone are pruned on the way
        self.listeners.retain(|listener| {
            if !query_matches(&listener.query, change) {
                return true;
            }
            listener.tx.send(Ok(change.clone())).is_ok()
        });
        self.listeners.len()
    }
}

/// True if `change` belongs to the query's result set.
fn query_matches(query: &QueryKey, change: &DocumentChange) -> bool {
    if query.owners.is_empty() {
        return true;
    }
    match change.payload.as_ref().and_then(|p| p.get("userId")).and_then(Value::as_str) {
        Some(owner) => query.owners.iter().any(|o| o == owner),
        // Removals carry no payload; owners filter cannot exclude them
        None => change.payload.is_none(),
    }
}

/// In-memory document collection standing in for the cloud database.
///
/// Writes fan out to every live listener; new listeners first receive the
/// current contents as `added` events, just like a real snapshot listener.
#[derive(Clone)]
pub struct SimCollection {
    state: Arc<Mutex<CollectionState>>,
}

impl SimCollection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            state: Arc::new(Mutex::new(CollectionState {
                name: name.into(),
                documents: BTreeMap::new(),
                listeners: Vec::new(),
                available: true,
                subscriptions_opened: 0,
            })),
        }
    }

    /// A `RecordStream` reading from this collection.
    pub fn stream(&self) -> SimRecordStream {
        SimRecordStream {
            state: Arc::clone(&self.state),
        }
    }

    /// A fault controller for this collection.
    pub fn controller(&self) -> SimStreamController {
        SimStreamController {
            state: Arc::clone(&self.state),
        }
    }

    /// Creates or replaces a document and notifies listeners.
    pub fn put(&self, id: &str, payload: Value) {
        let mut state = lock(&self.state);
        let change = match state.documents.insert(id.to_string(), payload.clone()) {
            Some(_) => DocumentChange::modified(id, payload),
            None => DocumentChange::added(id, payload),
        };
        state.fan_out(&change);
    }

    /// Deletes a document. Returns false if it did not exist.
    pub fn delete(&self, id: &str) -> bool {
        let mut state = lock(&self.state);
        if state.documents.remove(id).is_none() {
            return false;
        }
        state.fan_out(&DocumentChange::removed(id));
        true
    }

    /// Delivers an arbitrary change without storing it (malformed input).
    pub fn inject(&self, change: DocumentChange) {
        lock(&self.state).fan_out(&change);
    }

    /// Re-delivers the current version of a document (duplicate delivery).
    pub fn redeliver(&self, id: &str) -> bool {
        let mut state = lock(&self.state);
        let Some(payload) = state.documents.get(id).cloned() else {
            return false;
        };
        state.fan_out(&DocumentChange::modified(id, payload));
        true
    }

    pub fn get(&self, id: &str) -> Option<Value> {
        lock(&self.state).documents.get(id).cloned()
    }

    /// Current contents, sorted by id.
    pub fn documents(&self) -> Vec<(String, Value)> {
        lock(&self.state)
            .documents
            .iter()
            .map(|(id, doc)| (id.clone(), doc.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.state).documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total successful subscriptions so far.
    pub fn subscriptions_opened(&self) -> u64 {
        lock(&self.state).subscriptions_opened
    }
}

// ============================================================================
// RECORD STREAM
// ============================================================================

/// `RecordStream` over a [`SimCollection`].
pub struct SimRecordStream {
    state: Arc<Mutex<CollectionState>>,
}

#[async_trait]
impl RecordStream for SimRecordStream {
    async fn subscribe(&self, query: &QueryKey) -> Result<Box<dyn Subscription>, EnvError> {
        let mut state = lock(&self.state);
        if !state.available {
            return Err(EnvError::subscription("collection unavailable"));
        }
        if query.collection != state.name {
            return Err(EnvError::subscription(format!(
                "unknown collection {}",
                query.collection
            )));
        }

        state.subscriptions_opened += 1;
        let id = SubscriptionId::from_seed(state.subscriptions_opened);
        let (tx, rx) = mpsc::unbounded_channel();

        // Initial snapshot
        for (doc_id, payload) in &state.documents {
            let change = DocumentChange::added(doc_id.clone(), payload.clone());
            if query_matches(query, &change) {
                let _ = tx.send(Ok(change));
            }
        }

        state.listeners.push(Listener {
            id,
            query: query.clone(),
            tx,
        });
        debug!(subscription = %id, %query, "sim listener registered");

        Ok(Box::new(SimSubscription {
            id,
            rx,
            state: Arc::clone(&self.state),
        }))
    }
}

/// A live listener; deregisters on drop.
pub struct SimSubscription {
    id: SubscriptionId,
    rx: mpsc::UnboundedReceiver<Delivery>,
    state: Arc<Mutex<CollectionState>>,
}

#[async_trait]
impl Subscription for SimSubscription {
    async fn next(&mut self) -> Option<Result<DocumentChange, EnvError>> {
        self.rx.recv().await
    }

    fn id(&self) -> SubscriptionId {
        self.id
    }
}

impl Drop for SimSubscription {
    fn drop(&mut self) {
        let id = self.id;
        lock(&self.state).listeners.retain(|l| l.id != id);
    }
}

// ============================================================================
// FAULT CONTROLLER
// ============================================================================

/// Injects listener failures into a [`SimCollection`].
pub struct SimStreamController {
    state: Arc<Mutex<CollectionState>>,
}

impl SimStreamController {
    /// Sends an error to every listener and drops them.
    pub fn fail_all(&self, reason: &str) {
        let mut state = lock(&self.state);
        for listener in state.listeners.drain(..) {
            let _ = listener.tx.send(Err(EnvError::closed(reason)));
        }
    }

    pub fn is_available(&self) -> bool {
        lock(&self.state).available
    }
}

impl FaultController for SimStreamController {
    fn disconnect_all(&self) {
        // Dropping the senders ends every receiver
        lock(&self.state).listeners.clear();
    }

    fn set_available(&self, available: bool) {
        lock(&self.state).available = available;
    }

    fn active_subscriptions(&self) -> usize {
        lock(&self.state).listeners.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use moodmap_env::ChangeKind;
    use serde_json::json;

    fn doc(time: i64) -> Value {
        json!({ "latitude": 1.0, "longitude": 2.0, "time": time })
    }

    #[tokio::test]
    async fn test_subscribe_replays_current_documents() {
        let collection = SimCollection::new("moods");
        collection.put("b", doc(1));
        collection.put("a", doc(1));

        let stream = collection.stream();
        let mut sub = stream.subscribe(&QueryKey::new("moods")).await.unwrap();
        let first = sub.next().await.unwrap().unwrap();
        let second = sub.next().await.unwrap().unwrap();
        assert_eq!(first.document_id, "a");
        assert_eq!(second.document_id, "b");
        assert_eq!(first.kind, ChangeKind::Added);
    }

    #[tokio::test]
    async fn test_writes_fan_out() {
        let collection = SimCollection::new("moods");
        let stream = collection.stream();
        let mut sub = stream.subscribe(&QueryKey::new("moods")).await.unwrap();

        collection.put("a", doc(1));
        collection.put("a", doc(2));
        assert!(collection.delete("a"));
        assert!(!collection.delete("a"));

        let kinds: Vec<ChangeKind> = vec![
            sub.next().await.unwrap().unwrap().kind,
            sub.next().await.unwrap().unwrap().kind,
            sub.next().await.unwrap().unwrap().kind,
        ];
        assert_eq!(kinds, vec![ChangeKind::Added, ChangeKind::Modified, ChangeKind::Removed]);
    }

    #[tokio::test]
    async fn test_disconnect_ends_subscriptions() {
        let collection = SimCollection::new("moods");
        let controller = collection.controller();
        let stream = collection.stream();
        let mut sub = stream.subscribe(&QueryKey::new("moods")).await.unwrap();
        assert_eq!(controller.active_subscriptions(), 1);

        controller.disconnect_all();
        assert!(sub.next().await.is_none());
        assert_eq!(controller.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_fail_all_delivers_error() {
        let collection = SimCollection::new("moods");
        let controller = collection.controller();
        let stream = collection.stream();
        let mut sub = stream.subscribe(&QueryKey::new("moods")).await.unwrap();

        controller.fail_all("quota exceeded");
        assert!(matches!(sub.next().await, Some(Err(EnvError::StreamClosed(_)))));
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn test_unavailable_and_unknown_collection() {
        let collection = SimCollection::new("moods");
        let controller = collection.controller();
        let stream = collection.stream();

        assert!(stream.subscribe(&QueryKey::new("users")).await.is_err());
        controller.set_available(false);
        assert!(stream.subscribe(&QueryKey::new("moods")).await.is_err());
        controller.set_available(true);
        assert!(stream.subscribe(&QueryKey::new("moods")).await.is_ok());
        assert_eq!(collection.subscriptions_opened(), 1);
    }

    #[tokio::test]
    async fn test_drop_deregisters() {
        let collection = SimCollection::new("moods");
        let controller = collection.controller();
        let stream = collection.stream();
        let sub = stream.subscribe(&QueryKey::new("moods")).await.unwrap();
        assert_eq!(controller.active_subscriptions(), 1);
        drop(sub);
        assert_eq!(controller.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_owner_filter() {
        let collection = SimCollection::new("moods");
        collection.put("mine", json!({ "latitude": 1.0, "longitude": 1.0, "time": 1, "userId": "u1" }));
        collection.put("theirs", json!({ "latitude": 1.0, "longitude": 1.0, "time": 1, "userId": "u2" }));

        let stream = collection.stream();
        let mut sub = stream
            .subscribe(&QueryKey::new("moods").with_owners(["u1"]))
            .await
            .unwrap();
        assert_eq!(sub.next().await.unwrap().unwrap().document_id, "mine");

        collection.put("theirs", json!({ "latitude": 2.0, "longitude": 2.0, "time": 2, "userId": "u2" }));
        collection.delete("mine");
        assert_eq!(sub.next().await.unwrap().unwrap().kind, ChangeKind::Removed);
    }
}
