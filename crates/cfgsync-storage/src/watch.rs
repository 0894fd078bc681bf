//! Watch subscriptions.
//!
//! Every backend owns a [`WatchHub`]. Writes publish their event into the hub
//! while the backend lock is held, so subscribers observe events in index
//! order. The hub retains a bounded history for replay; a subscription asking
//! for an index older than that history fails with `WatchExpired`.
//!
//! A [`Subscription`] is a channel receiver. It ends when it is cancelled
//! (explicitly or through a [`WatchCanceller`]) or when the store is closed
//! or dropped. Only the hub holds a strong sender, so dropping the store
//! disconnects every subscription.

use std::collections::VecDeque;

use cfgsync_core::path;
use tokio::sync::mpsc::{
    self, error::TryRecvError, UnboundedReceiver, UnboundedSender, WeakUnboundedSender,
};
use tracing::warn;

use crate::error::{ErrorCode, StorageError};
use crate::traits::KvTransport;
use crate::types::{Action, WatchEvent, WatchOptions};

#[derive(Debug)]
enum Message {
    Event(WatchEvent),
    Cancelled,
    Closed,
}

#[derive(Debug)]
struct Watcher {
    key: String,
    recursive: bool,
    tx: UnboundedSender<Message>,
}

impl Watcher {
    fn matches(&self, event: &WatchEvent) -> bool {
        let changed = event.node.key.as_str();
        if changed == self.key || (self.recursive && path::is_within(changed, &self.key)) {
            return true;
        }
        // Removing a directory removes everything watched beneath it.
        matches!(
            event.action,
            Action::Delete | Action::CompareAndDelete | Action::Expire
        ) && event.node.dir
            && path::is_within(&self.key, changed)
    }
}

/// Event fan-out and replay history of one store.
#[derive(Debug)]
pub(crate) struct WatchHub {
    history: VecDeque<WatchEvent>,
    capacity: usize,
    /// Index of the newest event evicted from the history.
    evicted_through: u64,
    watchers: Vec<Watcher>,
}

impl WatchHub {
    pub(crate) fn new(capacity: usize) -> Self {
        WatchHub {
            history: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
            evicted_through: 0,
            watchers: Vec::new(),
        }
    }

    pub(crate) fn publish(&mut self, event: WatchEvent) {
        // Receivers dropped or cancelled since the last publish.
        self.watchers.retain(|watcher| !watcher.tx.is_closed());
        for watcher in self.watchers.iter().filter(|w| w.matches(&event)) {
            let _ = watcher.tx.send(Message::Event(event.clone()));
        }
        if self.history.len() == self.capacity {
            if let Some(oldest) = self.history.pop_front() {
                self.evicted_through = oldest.index;
            }
        }
        self.history.push_back(event);
    }

    pub(crate) fn subscribe(
        &mut self,
        key: &str,
        options: &WatchOptions,
    ) -> Result<Subscription, StorageError> {
        if let Some(after) = options.after_index {
            if after < self.evicted_through {
                return Err(StorageError::store(ErrorCode::WatchExpired, key));
            }
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let weak = tx.downgrade();
        let watcher = Watcher {
            key: key.to_string(),
            recursive: options.recursive,
            tx,
        };
        if let Some(after) = options.after_index {
            for event in self.history.iter().filter(|e| e.index > after) {
                if watcher.matches(event) {
                    let _ = watcher.tx.send(Message::Event(event.clone()));
                }
            }
        }
        self.watchers.push(watcher);
        Ok(Subscription {
            key: key.to_string(),
            rx,
            tx: weak,
            end: None,
        })
    }

    /// Ends every subscription.
    pub(crate) fn close(&mut self) {
        for watcher in self.watchers.drain(..) {
            let _ = watcher.tx.send(Message::Closed);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum End {
    Cancelled,
    Closed,
}

/// A stream of changes beneath one key.
///
/// Receiving returns `Ok(Some(event))` for each change, `Ok(None)` once the
/// subscription is cancelled, and `Err(StorageError::Closed)` once the store
/// is closed or dropped.
#[derive(Debug)]
pub struct Subscription {
    key: String,
    rx: UnboundedReceiver<Message>,
    tx: WeakUnboundedSender<Message>,
    end: Option<End>,
}

impl Subscription {
    /// The watched key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Waits for the next change.
    pub async fn recv(&mut self) -> Result<Option<WatchEvent>, StorageError> {
        if let Some(end) = self.end {
            return end_result(end);
        }
        let message = self.rx.recv().await;
        self.accept(message)
    }

    /// Waits for the next change, blocking the current thread.
    ///
    /// Must not be called from within an async runtime.
    pub fn blocking_recv(&mut self) -> Result<Option<WatchEvent>, StorageError> {
        if let Some(end) = self.end {
            return end_result(end);
        }
        let message = self.rx.blocking_recv();
        self.accept(message)
    }

    /// Returns a pending change without waiting; `Ok(None)` if there is none.
    pub fn try_recv(&mut self) -> Result<Option<WatchEvent>, StorageError> {
        if let Some(end) = self.end {
            return end_result(end);
        }
        match self.rx.try_recv() {
            Ok(message) => self.accept(Some(message)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => self.accept(None),
        }
    }

    /// Ends the subscription. Pending changes are discarded.
    pub fn cancel(&mut self) {
        self.finish(End::Cancelled);
    }

    /// Returns a handle that can cancel this subscription from elsewhere.
    pub fn canceller(&self) -> WatchCanceller {
        WatchCanceller {
            tx: self.tx.clone(),
        }
    }

    fn accept(&mut self, message: Option<Message>) -> Result<Option<WatchEvent>, StorageError> {
        match message {
            Some(Message::Event(event)) => Ok(Some(event)),
            Some(Message::Cancelled) => {
                self.finish(End::Cancelled);
                Ok(None)
            }
            Some(Message::Closed) | None => {
                self.finish(End::Closed);
                Err(StorageError::Closed)
            }
        }
    }

    fn finish(&mut self, end: End) {
        if self.end.is_none() {
            self.end = Some(end);
            // Lets the hub drop this watcher on its next publish.
            self.rx.close();
        }
    }
}

fn end_result(end: End) -> Result<Option<WatchEvent>, StorageError> {
    match end {
        End::Cancelled => Ok(None),
        End::Closed => Err(StorageError::Closed),
    }
}

/// Cancels a [`Subscription`] from another task or thread.
#[derive(Debug, Clone)]
pub struct WatchCanceller {
    tx: WeakUnboundedSender<Message>,
}

impl WatchCanceller {
    /// No effect once the store is gone; the subscription has ended anyway.
    pub fn cancel(&self) {
        if let Some(tx) = self.tx.upgrade() {
            let _ = tx.send(Message::Cancelled);
        }
    }
}

/// Watches `key` until `on_change` returns `true`.
///
/// If the requested history has been cleared, the watch is re-established
/// from the store's current index. Returns `Ok(())` when the callback asks
/// to stop, and `Err(StorageError::Closed)` when the store is closed.
///
/// Blocks the current thread; must not be called from within an async
/// runtime.
pub fn watch_until<T, F>(
    transport: &T,
    key: &str,
    options: &WatchOptions,
    mut on_change: F,
) -> Result<(), StorageError>
where
    T: KvTransport + ?Sized,
    F: FnMut(&WatchEvent) -> bool,
{
    let mut options = options.clone();
    let mut subscription = loop {
        match transport.watch(key, &options) {
            Ok(subscription) => break subscription,
            Err(err) if err.is_watch_expired() => {
                let index = transport.index()?;
                warn!(key, after_index = ?options.after_index, index, "watch history cleared, resubscribing");
                options.after_index = Some(index);
            }
            Err(err) => return Err(err),
        }
    };
    loop {
        match subscription.blocking_recv()? {
            Some(event) => {
                if on_change(&event) {
                    subscription.cancel();
                    return Ok(());
                }
            }
            None => return Ok(()),
        }
    }
}
