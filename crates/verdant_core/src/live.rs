//! Live queries.
//!
//! A [`LiveQuery`] holds the current result set of a [`Query`] and receives a
//! fresh one after every commit that touched its collection. Results are
//! computed by a single notifier thread: commits only post the names of the
//! collections they touched, and the notifier folds everything queued since
//! its last pass into one re-evaluation against the latest committed state.
//! A burst of writes may therefore produce fewer result sets than commits,
//! but the last result set delivered always reflects the last commit.

use crate::record::Record;
use crate::state::StoreState;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::debug;

type Predicate = Arc<dyn Fn(&Record) -> bool + Send + Sync>;

/// A predicate over one collection. Tombstones never match.
#[derive(Clone)]
pub struct Query {
    collection: String,
    predicate: Option<Predicate>,
}

impl Query {
    /// Matches every live record of `collection`.
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            predicate: None,
        }
    }

    /// Restricts the query to records matching `predicate`.
    #[must_use]
    pub fn filter(mut self, predicate: impl Fn(&Record) -> bool + Send + Sync + 'static) -> Self {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Returns the queried collection.
    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Returns true if `record` belongs to the result set.
    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        record.collection == self.collection
            && !record.deleted
            && self.predicate.as_ref().map_or(true, |p| p(record))
    }

    pub(crate) fn evaluate(&self, state: &StoreState) -> Vec<Record> {
        state
            .collection(&self.collection)
            .filter(|r| self.matches(r))
            .cloned()
            .collect()
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("collection", &self.collection)
            .field("filtered", &self.predicate.is_some())
            .finish()
    }
}

/// A subscribed query with its latest result set.
#[derive(Debug)]
pub struct LiveQuery {
    query: Query,
    current: Vec<Record>,
    receiver: Receiver<Vec<Record>>,
}

impl LiveQuery {
    /// Returns the query.
    #[must_use]
    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Returns the latest result set seen.
    #[must_use]
    pub fn current(&self) -> &[Record] {
        &self.current
    }

    /// Blocks until the next result set arrives.
    ///
    /// Returns `None` once the store is closed.
    pub fn recv(&mut self) -> Option<&[Record]> {
        let next = self.receiver.recv().ok()?;
        self.current = next;
        self.drain();
        Some(&self.current)
    }

    /// Like [`recv`](Self::recv), giving up after `timeout`.
    pub fn recv_timeout(&mut self, timeout: Duration) -> Option<&[Record]> {
        match self.receiver.recv_timeout(timeout) {
            Ok(next) => {
                self.current = next;
                self.drain();
                Some(&self.current)
            }
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Takes the newest queued result set without blocking.
    pub fn try_recv(&mut self) -> Option<&[Record]> {
        self.drain().then_some(&self.current)
    }

    /// Waits until the result set satisfies `condition`.
    ///
    /// Returns false on timeout or when the store closes.
    pub fn wait_for(&mut self, timeout: Duration, condition: impl Fn(&[Record]) -> bool) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            if condition(&self.current) {
                return true;
            }
            let left = deadline.saturating_duration_since(std::time::Instant::now());
            if left.is_zero() || self.recv_timeout(left).is_none() {
                return condition(&self.current);
            }
        }
    }

    fn drain(&mut self) -> bool {
        let mut updated = false;
        loop {
            match self.receiver.try_recv() {
                Ok(next) => {
                    self.current = next;
                    updated = true;
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => return updated,
            }
        }
    }
}

struct Subscription {
    query: Query,
    sender: Sender<Vec<Record>>,
}

enum Message {
    Committed(BTreeSet<String>),
    Subscribe(Subscription),
    Shutdown,
}

/// Owner of the notifier thread.
pub(crate) struct Notifier {
    sender: Mutex<Option<Sender<Message>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Notifier {
    pub fn spawn(state: Arc<RwLock<StoreState>>) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("verdant-notifier".into())
            .spawn(move || run(&state, &rx))?;
        Ok(Self {
            sender: Mutex::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn subscribe(&self, query: Query, state: &StoreState) -> LiveQuery {
        let (tx, rx) = mpsc::channel();
        let current = query.evaluate(state);
        if let Some(sender) = self.sender.lock().as_ref() {
            let _ = sender.send(Message::Subscribe(Subscription {
                query: query.clone(),
                sender: tx,
            }));
        }
        LiveQuery {
            query,
            current,
            receiver: rx,
        }
    }

    pub fn committed(&self, collections: BTreeSet<String>) {
        if collections.is_empty() {
            return;
        }
        if let Some(sender) = self.sender.lock().as_ref() {
            let _ = sender.send(Message::Committed(collections));
        }
    }

    pub fn shutdown(&self) {
        if let Some(sender) = self.sender.lock().take() {
            let _ = sender.send(Message::Shutdown);
        }
        if let Some(handle) = self.handle.lock().take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

fn run(state: &RwLock<StoreState>, rx: &Receiver<Message>) {
    let mut subscriptions: Vec<Subscription> = Vec::new();

    while let Ok(first) = rx.recv() {
        let mut dirty = BTreeSet::new();
        let mut joined = Vec::new();
        let mut shutdown = false;

        let mut handle = |message| match message {
            Message::Committed(collections) => dirty.extend(collections),
            Message::Subscribe(sub) => joined.push(sub),
            Message::Shutdown => shutdown = true,
        };
        handle(first);
        while let Ok(next) = rx.try_recv() {
            handle(next);
        }

        if !shutdown {
            let state = state.read();
            subscriptions.retain(|sub| {
                !dirty.contains(sub.query.collection())
                    || sub.sender.send(sub.query.evaluate(&state)).is_ok()
            });
            // Fresh subscribers get the state as of now, covering any commit
            // that raced with their registration.
            for sub in joined {
                if sub.sender.send(sub.query.evaluate(&state)).is_ok() {
                    subscriptions.push(sub);
                }
            }
        }

        if shutdown {
            break;
        }
    }
    debug!("live query notifier stopped");
}
