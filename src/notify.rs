//! Change notification: commits that touch notify-flagged classes are
//! deduplicated per `(class, subject, kind)` and fanned out to subscribers
//! filtered by class IRI.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChangeEvent {
    pub class: String,
    pub subject: i64,
    pub kind: ChangeKind,
}

const CHANNEL_CAPACITY: usize = 1024;

struct Subscription {
    class_filter: HashSet<String>,
    sender: broadcast::Sender<Vec<ChangeEvent>>,
}

/// In-process pub/sub keyed by class IRI. One [`ChangeNotifier`] per open
/// database; subscribers hold a [`broadcast::Receiver`] and see events for
/// their subscribed classes in commit order.
#[derive(Clone)]
pub struct ChangeNotifier {
    subscriptions: Arc<Mutex<HashMap<u64, Subscription>>>,
    next_id: Arc<Mutex<u64>>,
}

pub struct Subscriber {
    id: u64,
    receiver: broadcast::Receiver<Vec<ChangeEvent>>,
    notifier: ChangeNotifier,
}

impl Subscriber {
    pub async fn recv(&mut self) -> Option<Vec<ChangeEvent>> {
        self.receiver.recv().await.ok()
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.notifier.unsubscribe(self.id);
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self {
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(Mutex::new(0)),
        }
    }

    /// Subscribes to changes on the given classes (empty = all classes).
    pub fn subscribe(&self, classes: impl IntoIterator<Item = String>) -> Subscriber {
        let (sender, receiver) = broadcast::channel(CHANNEL_CAPACITY);
        let mut id_guard = self.next_id.lock().unwrap();
        let id = *id_guard;
        *id_guard += 1;
        drop(id_guard);

        self.subscriptions.lock().unwrap().insert(
            id,
            Subscription {
                class_filter: classes.into_iter().collect(),
                sender,
            },
        );

        Subscriber {
            id,
            receiver,
            notifier: self.clone(),
        }
    }

    fn unsubscribe(&self, id: u64) {
        self.subscriptions.lock().unwrap().remove(&id);
    }

    /// Publishes a commit's events, deduplicated by `(class, subject, kind)`
    /// and split per subscriber by class filter.
    pub fn notify(&self, events: Vec<ChangeEvent>) {
        let mut seen = HashSet::new();
        let deduped: Vec<ChangeEvent> = events
            .into_iter()
            .filter(|e| seen.insert((e.class.clone(), e.subject, e.kind)))
            .collect();
        if deduped.is_empty() {
            return;
        }

        for sub in self.subscriptions.lock().unwrap().values() {
            let relevant: Vec<ChangeEvent> = if sub.class_filter.is_empty() {
                deduped.clone()
            } else {
                deduped
                    .iter()
                    .filter(|e| sub.class_filter.contains(&e.class))
                    .cloned()
                    .collect()
            };
            if !relevant.is_empty() {
                let _ = sub.sender.send(relevant);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_only_filtered_classes() {
        let notifier = ChangeNotifier::new();
        let mut sub = notifier.subscribe(vec!["http://example.org/Person".to_string()]);

        notifier.notify(vec![
            ChangeEvent { class: "http://example.org/Person".to_string(), subject: 1, kind: ChangeKind::Create },
            ChangeEvent { class: "http://example.org/Other".to_string(), subject: 2, kind: ChangeKind::Create },
        ]);

        let events = sub.recv().await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].subject, 1);
    }

    #[tokio::test]
    async fn duplicate_events_in_one_commit_are_collapsed() {
        let notifier = ChangeNotifier::new();
        let mut sub = notifier.subscribe(Vec::<String>::new());

        notifier.notify(vec![
            ChangeEvent { class: "http://example.org/Person".to_string(), subject: 1, kind: ChangeKind::Update },
            ChangeEvent { class: "http://example.org/Person".to_string(), subject: 1, kind: ChangeKind::Update },
        ]);

        let events = sub.recv().await.unwrap();
        assert_eq!(events.len(), 1);
    }
}
