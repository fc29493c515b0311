//! Change observers for `ListenChanges` and `PollChanges`.

use {
    crate::error::{DispatchError, DispatchResult},
    blindbackup_protocol::{ChangeEvent, ChangeKind, ObserverId, RelativePath},
    parking_lot::Mutex,
    rand::RngCore,
    std::{
        collections::{HashMap, VecDeque},
        sync::Arc,
        time::{Duration, Instant},
    },
    tokio::{
        sync::Notify,
        task::JoinHandle,
        time::{self, interval},
    },
    tracing::{debug, warn},
};

/// Older events are dropped once an observer has this many pending.
const MAX_QUEUED_EVENTS: usize = 10_000;

#[derive(Debug)]
struct Observer {
    owner: String,
    home: RelativePath,
    /// Observed subtree, relative to the backup root.
    root: RelativePath,
    events: VecDeque<ChangeEvent>,
    last_polled: Instant,
    notify: Arc<Notify>,
}

impl Observer {
    fn is_affected(&self, changed: &RelativePath, kind: ChangeKind) -> bool {
        changed.starts_with(&self.root)
            || (kind == ChangeKind::Delete && self.root.starts_with(changed))
    }
}

#[derive(Debug, Default)]
pub struct ChangeHub {
    observers: Mutex<HashMap<ObserverId, Observer>>,
}

impl ChangeHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an observer of `root` (relative to the backup root) owned by `owner`.
    pub fn listen(&self, owner: &str, home: &RelativePath, root: &RelativePath) -> ObserverId {
        let mut bytes = [0_u8; 16];
        rand::rng().fill_bytes(&mut bytes);
        let id = ObserverId(hex::encode(bytes));
        self.observers.lock().insert(
            id.clone(),
            Observer {
                owner: owner.to_owned(),
                home: home.clone(),
                root: root.clone(),
                events: VecDeque::new(),
                last_polled: Instant::now(),
                notify: Arc::new(Notify::new()),
            },
        );
        debug!(%id, owner, %root, "observer registered");
        id
    }

    /// Delivers a change of `changed` (relative to the backup root) to all observers
    /// of a subtree that contains it.
    pub fn record(&self, changed: &RelativePath, kind: ChangeKind, origin: Option<&ObserverId>) {
        let mut observers = self.observers.lock();
        for (id, observer) in observers.iter_mut() {
            if !observer.is_affected(changed, kind) {
                continue;
            }
            let Some(path) = changed.strip_prefix(&observer.home) else {
                continue;
            };
            if observer.events.len() >= MAX_QUEUED_EVENTS {
                warn!(%id, "too many pending change events, dropping the oldest");
                observer.events.pop_front();
            }
            observer.events.push_back(ChangeEvent {
                path,
                kind,
                origin: origin.cloned(),
            });
            observer.notify.notify_one();
        }
    }

    /// Returns pending events of the observer, waiting up to `wait` for the first one.
    pub async fn poll(&self, owner: &str, id: &ObserverId, wait: Duration) -> DispatchResult<Vec<ChangeEvent>> {
        let deadline = time::Instant::now() + wait;
        loop {
            let notify = {
                let mut observers = self.observers.lock();
                let observer = get_owned(&mut observers, owner, id)?;
                observer.last_polled = Instant::now();
                if !observer.events.is_empty() {
                    return Ok(Vec::from(std::mem::take(&mut observer.events)));
                }
                if time::Instant::now() >= deadline {
                    return Ok(Vec::new());
                }
                Arc::clone(&observer.notify)
            };
            // A permit left by events that were already taken wakes this up early.
            let _ = time::timeout_at(deadline, notify.notified()).await;
        }
    }

    /// Removes observers that were not polled during `max_idle`. Returns the number removed.
    pub fn expire(&self, max_idle: Duration) -> usize {
        let mut observers = self.observers.lock();
        let before = observers.len();
        observers.retain(|id, observer| {
            let keep = observer.last_polled.elapsed() <= max_idle;
            if !keep {
                debug!(%id, "observer expired");
            }
            keep
        });
        before.saturating_sub(observers.len())
    }

    pub fn len(&self) -> usize {
        self.observers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Observers expire after twice the poll timeout without a poll.
    pub fn spawn_expiry_task(self: &Arc<Self>, poll_timeout: Duration) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let max_idle = poll_timeout.saturating_mul(2);
        tokio::spawn(async move {
            let mut interval = interval(poll_timeout);
            loop {
                interval.tick().await;
                this.expire(max_idle);
            }
        })
    }
}

/// Unknown ids and ids of other users are indistinguishable.
fn get_owned<'a>(
    observers: &'a mut HashMap<ObserverId, Observer>,
    owner: &str,
    id: &ObserverId,
) -> DispatchResult<&'a mut Observer> {
    observers
        .get_mut(id)
        .filter(|observer| observer.owner == owner)
        .ok_or(DispatchError::NotFound)
}
