use std::collections::VecDeque;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;

use super::models::{EventKind, ProgressEvent, Run};

/// Per-run fan-out of [`ProgressEvent`]s.
///
/// A channel exists only while someone is subscribed. Nothing is buffered
/// for late subscribers: a subscription sees events published after it was
/// created and nothing earlier. Publishing `done` drops the channel, which
/// ends every open subscription once it has drained.
#[derive(Clone)]
pub struct ProgressBroadcaster {
    channels: Arc<DashMap<String, broadcast::Sender<ProgressEvent>>>,
    capacity: usize,
}

impl ProgressBroadcaster {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Deliver an event to current subscribers of its run. No-op without any.
    pub fn publish(&self, event: ProgressEvent) {
        let run_id = event.run_id().to_string();
        let is_done = event.kind() == EventKind::Done;

        // The map guard must be released before `remove` below.
        if let Some(tx) = self.channels.get(&run_id) {
            let _ = tx.send(event);
        }

        if is_done {
            self.channels.remove(&run_id);
        }
    }

    pub fn subscribe(&self, run_id: &str) -> Subscription {
        let rx = self
            .channels
            .entry(run_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();
        Subscription {
            run_id: run_id.to_string(),
            rx: Some(rx),
            channels: self.channels.clone(),
        }
    }

    pub fn has_channel(&self, run_id: &str) -> bool {
        self.channels.contains_key(run_id)
    }

    pub fn subscriber_count(&self, run_id: &str) -> usize {
        self.channels
            .get(run_id)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

/// A live view of one run's events. Dropping it unsubscribes.
pub struct Subscription {
    run_id: String,
    /// `None` only while dropping.
    rx: Option<broadcast::Receiver<ProgressEvent>>,
    channels: Arc<DashMap<String, broadcast::Sender<ProgressEvent>>>,
}

impl Subscription {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Next event, or `None` once the run's channel is gone.
    ///
    /// A subscriber that falls behind skips what it missed.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        let rx = self.rx.as_mut()?;
        loop {
            match rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(run_id = %self.run_id, skipped, "Subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // Release our receiver first so concurrent drops cannot each see
        // the other one still counted.
        drop(self.rx.take());
        self.channels
            .remove_if(&self.run_id, |_, tx| tx.receiver_count() == 0);
    }
}

/// What a stream endpoint forwards: a snapshot of the run, then live events
/// until `done`.
///
/// The subscription must be opened before the snapshot is read, otherwise a
/// transition landing in between would be lost. A run that is already
/// terminal yields its status and `done`, then ends.
pub struct RunFeed {
    pending: VecDeque<ProgressEvent>,
    live: Option<Subscription>,
    finished: bool,
}

impl RunFeed {
    pub fn new(subscription: Subscription, snapshot: &Run) -> Self {
        let mut pending = VecDeque::from([ProgressEvent::status(snapshot)]);
        let live = if snapshot.status.is_terminal() {
            pending.push_back(ProgressEvent::done(snapshot));
            None
        } else {
            Some(subscription)
        };
        Self {
            pending,
            live,
            finished: false,
        }
    }

    /// Next event to forward. `None` after `done` or when the channel closes.
    pub async fn next(&mut self) -> Option<ProgressEvent> {
        if self.finished {
            return None;
        }
        let event = match self.pending.pop_front() {
            Some(event) => Some(event),
            None => match self.live.as_mut() {
                Some(sub) => sub.recv().await,
                None => None,
            },
        };
        match event {
            Some(event) => {
                if event.kind() == EventKind::Done {
                    self.finished = true;
                    self.live = None;
                }
                Some(event)
            }
            None => {
                self.finished = true;
                None
            }
        }
    }
}
