//! Target/watcher registry
//!
//! Maps logical target addresses to backend target identifiers and to the set of
//! watchers (logical clients) currently interested in them. Every operation runs
//! under one mutex so deduplication decisions and watcher-count transitions are
//! atomic with respect to concurrent requests.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Idle time after which a watcher is considered stale.
pub const DEFAULT_WATCHER_TTL: Duration = Duration::from_secs(5 * 60);

/// Backend binding of a target as seen from outside the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingState {
    /// No backend target yet and nobody is creating one.
    Pending,
    /// A creation call is in flight for this address.
    Creating,
    /// Backend confirmed creation.
    Bound(String),
}

impl BindingState {
    pub fn backend_id(&self) -> Option<&str> {
        match self {
            BindingState::Bound(id) => Some(id),
            _ => None,
        }
    }
}

/// Snapshot of one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetView {
    pub address: String,
    /// Zero-based position among live targets in arrival order.
    pub order: usize,
    pub binding: BindingState,
    /// Watcher identifiers, sorted.
    pub watchers: Vec<String>,
}

/// What the caller of [`TargetRegistry::resolve_or_create`] has to do next.
#[derive(Debug)]
pub enum Claim {
    /// Already bound; no backend call needed.
    Bound(String),
    /// The caller owns the creation and must submit it to the backend, then call
    /// [`TargetRegistry::attach_backend_id`] or [`TargetRegistry::abandon_creation`]
    /// with the ticket.
    Create(CreationTicket),
    /// Another request is creating this target.
    Wait(CreationWaiter),
}

#[derive(Debug)]
pub struct Resolution {
    pub target: TargetView,
    pub claim: Claim,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    Attached,
    /// An identifier was already bound; it is left unchanged.
    AlreadyBound,
    /// The target was removed, or its creation was handed to another request,
    /// while this creation was in flight.
    Orphaned,
}

/// Proof of ownership of one creation. Only the holder can bind or abandon it, so
/// a request that outlived its target cannot touch a newer creation for the same
/// address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreationTicket {
    address: String,
    id: u64,
}

impl CreationTicket {
    pub fn address(&self) -> &str {
        &self.address
    }
}

/// Handle on an in-flight creation owned by another request.
#[derive(Debug)]
pub struct CreationWaiter {
    rx: watch::Receiver<Option<String>>,
}

impl CreationWaiter {
    /// Resolves to the backend identifier once bound, or `None` if the creation
    /// was abandoned or the target went away.
    pub async fn wait(mut self) -> Option<String> {
        loop {
            let current = self.rx.borrow_and_update().clone();
            if current.is_some() {
                return current;
            }
            if self.rx.changed().await.is_err() {
                return self.rx.borrow().clone();
            }
        }
    }
}

enum Binding {
    Pending,
    Creating {
        ticket: u64,
        tx: watch::Sender<Option<String>>,
    },
    Bound(String),
}

impl Binding {
    fn state(&self) -> BindingState {
        match self {
            Binding::Pending => BindingState::Pending,
            Binding::Creating { .. } => BindingState::Creating,
            Binding::Bound(id) => BindingState::Bound(id.clone()),
        }
    }
}

struct TargetEntry {
    address: String,
    binding: Binding,
    /// watcher id -> last seen
    watchers: HashMap<String, Instant>,
    /// Loaded from the backend at startup and not claimed by any watcher yet
    seeded: bool,
}

impl TargetEntry {
    fn new(address: &str, binding: Binding) -> Self {
        Self {
            address: address.to_string(),
            binding,
            watchers: HashMap::new(),
            seeded: false,
        }
    }

    fn view(&self, order: usize) -> TargetView {
        let mut watchers: Vec<String> = self.watchers.keys().cloned().collect();
        watchers.sort();
        TargetView {
            address: self.address.clone(),
            order,
            binding: self.binding.state(),
            watchers,
        }
    }

    fn owns_creation(&self, ticket: &CreationTicket) -> bool {
        matches!(self.binding, Binding::Creating { ticket: id, .. } if id == ticket.id)
    }

    fn has_live_watchers(&self, now: Instant, ttl: Duration) -> bool {
        self.watchers
            .values()
            .any(|last_seen| now.saturating_duration_since(*last_seen) <= ttl)
    }
}

#[derive(Default)]
struct RegistryState {
    next_seq: u64,
    next_ticket: u64,
    /// arrival sequence -> target
    targets: BTreeMap<u64, TargetEntry>,
    /// address -> arrival sequence
    by_address: HashMap<String, u64>,
}

impl RegistryState {
    fn order_of(&self, seq: u64) -> usize {
        self.targets.range(..seq).count()
    }

    fn view(&self, seq: u64) -> Option<TargetView> {
        let entry = self.targets.get(&seq)?;
        Some(entry.view(self.order_of(seq)))
    }

    fn insert(&mut self, address: &str, binding: Binding) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.targets.insert(seq, TargetEntry::new(address, binding));
        self.by_address.insert(address.to_string(), seq);
        seq
    }

    fn remove(&mut self, seq: u64) {
        if let Some(entry) = self.targets.remove(&seq) {
            self.by_address.remove(&entry.address);
        }
    }

    fn entry_mut(&mut self, address: &str) -> Option<&mut TargetEntry> {
        let seq = *self.by_address.get(address)?;
        self.targets.get_mut(&seq)
    }

    fn collect_garbage(&mut self, now: Instant, ttl: Duration) -> usize {
        let mut emptied = Vec::new();
        for (seq, entry) in self.targets.iter_mut() {
            entry
                .watchers
                .retain(|_, last_seen| now.saturating_duration_since(*last_seen) <= ttl);
            // seeds stay until a watcher claims them or their backend target is evicted
            if entry.watchers.is_empty() && !entry.seeded {
                emptied.push(*seq);
            }
        }
        for seq in &emptied {
            if let Some(entry) = self.targets.get(seq) {
                tracing::debug!("Dropping target {} (no live watchers)", entry.address);
            }
            self.remove(*seq);
        }
        emptied.len()
    }
}

pub struct TargetRegistry {
    state: Mutex<RegistryState>,
    watcher_ttl: Duration,
}

impl TargetRegistry {
    pub fn new(watcher_ttl: Duration) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            watcher_ttl,
        }
    }

    pub fn watcher_ttl(&self) -> Duration {
        self.watcher_ttl
    }

    /// Look up or create the target for `address` and attach `watcher` to it.
    pub async fn resolve_or_create(&self, address: &str, watcher: &str) -> Resolution {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        state.collect_garbage(now, self.watcher_ttl);

        let seq = match state.by_address.get(address) {
            Some(seq) => *seq,
            None => {
                tracing::debug!("Registering new target {}", address);
                state.insert(address, Binding::Pending)
            }
        };

        let order = state.order_of(seq);
        let ticket_id = state.next_ticket;
        let entry = state
            .targets
            .entry(seq)
            .or_insert_with(|| TargetEntry::new(address, Binding::Pending));
        entry.watchers.insert(watcher.to_string(), now);
        entry.seeded = false;
        let claim = match &entry.binding {
            Binding::Bound(id) => Claim::Bound(id.clone()),
            Binding::Creating { tx, .. } => Claim::Wait(CreationWaiter { rx: tx.subscribe() }),
            Binding::Pending => Claim::Create(CreationTicket {
                address: address.to_string(),
                id: ticket_id,
            }),
        };
        let creating = matches!(claim, Claim::Create(_));
        if creating {
            let (tx, _rx) = watch::channel(None);
            entry.binding = Binding::Creating {
                ticket: ticket_id,
                tx,
            };
        }
        let target = entry.view(order);

        if creating {
            state.next_ticket += 1;
        }
        Resolution { target, claim }
    }

    /// Record the backend identifier once the backend confirmed the creation owned
    /// by `ticket`.
    pub async fn attach_backend_id(&self, ticket: &CreationTicket, backend_id: &str) -> AttachOutcome {
        let mut state = self.state.lock().await;
        let Some(entry) = state.entry_mut(&ticket.address) else {
            tracing::debug!(
                "Target {} is gone, backend id {} is orphaned",
                ticket.address,
                backend_id
            );
            return AttachOutcome::Orphaned;
        };

        if let Binding::Bound(_) = entry.binding {
            return AttachOutcome::AlreadyBound;
        }
        if !entry.owns_creation(ticket) {
            tracing::debug!(
                "Creation of {} moved to another request, backend id {} is orphaned",
                ticket.address,
                backend_id
            );
            return AttachOutcome::Orphaned;
        }

        if let Binding::Creating { tx, .. } = &entry.binding {
            let _ = tx.send(Some(backend_id.to_string()));
        }
        entry.binding = Binding::Bound(backend_id.to_string());
        AttachOutcome::Attached
    }

    /// Give up on the creation owned by `ticket`. Waiters observe no identifier.
    /// A no-op once the creation is bound or owned by another request.
    pub async fn abandon_creation(&self, ticket: &CreationTicket) {
        let mut state = self.state.lock().await;
        if let Some(entry) = state.entry_mut(&ticket.address) {
            if entry.owns_creation(ticket) {
                // dropping the sender wakes every waiter
                entry.binding = Binding::Pending;
            }
        }
    }

    /// Remove `watcher` from the target at `address`. Returns `true` when that was the
    /// last watcher and the target itself was removed.
    pub async fn release(&self, address: &str, watcher: &str) -> bool {
        let mut state = self.state.lock().await;
        state.collect_garbage(Instant::now(), self.watcher_ttl);

        let Some(seq) = state.by_address.get(address).copied() else {
            tracing::debug!("Release of unknown target {} by {}", address, watcher);
            return false;
        };
        let now_empty = match state.targets.get_mut(&seq) {
            Some(entry) => entry.watchers.remove(watcher).is_some() && entry.watchers.is_empty(),
            None => false,
        };
        if now_empty {
            state.remove(seq);
            tracing::debug!("Target {} released by its last watcher {}", address, watcher);
        }
        now_empty
    }

    /// Drop stale watchers everywhere and remove targets left without any.
    pub async fn garbage_collect(&self) -> usize {
        let mut state = self.state.lock().await;
        state.collect_garbage(Instant::now(), self.watcher_ttl)
    }

    pub async fn list_targets(&self) -> Vec<TargetView> {
        let state = self.state.lock().await;
        state
            .targets
            .keys()
            .filter_map(|seq| state.view(*seq))
            .collect()
    }

    /// Current position of `address` in arrival order, if it is still registered.
    pub async fn order_of(&self, address: &str) -> Option<usize> {
        let state = self.state.lock().await;
        let seq = *state.by_address.get(address)?;
        Some(state.order_of(seq))
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.targets.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// A backend target may be deleted only if no local target with its address
    /// still has a live watcher.
    pub async fn is_releasable(&self, address: &str) -> bool {
        let now = Instant::now();
        let state = self.state.lock().await;
        match state.by_address.get(address).and_then(|seq| state.targets.get(seq)) {
            Some(entry) => !entry.has_live_watchers(now, self.watcher_ttl),
            None => true,
        }
    }

    /// Drop the target at `address` if nobody is watching it, after its backend
    /// target was evicted.
    pub async fn forget_idle(&self, address: &str) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        let Some(seq) = state.by_address.get(address).copied() else {
            return false;
        };
        let idle = state
            .targets
            .get(&seq)
            .map(|entry| !entry.has_live_watchers(now, self.watcher_ttl))
            .unwrap_or(false);
        if idle {
            state.remove(seq);
        }
        idle
    }

    /// Refresh the last-seen time of `watcher` on every target it references.
    pub async fn touch(&self, watcher: &str) {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        for entry in state.targets.values_mut() {
            if let Some(last_seen) = entry.watchers.get_mut(watcher) {
                *last_seen = now;
            }
        }
    }

    /// Pre-seed bound targets (address, backend id) known to the backend at startup.
    /// They carry no watchers but survive collection until a watcher claims them,
    /// after which the usual rules apply.
    pub async fn seed<I>(&self, targets: I) -> usize
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut state = self.state.lock().await;
        let mut added = 0;
        for (address, backend_id) in targets {
            if state.by_address.contains_key(&address) {
                continue;
            }
            let seq = state.insert(&address, Binding::Bound(backend_id));
            if let Some(entry) = state.targets.get_mut(&seq) {
                entry.seeded = true;
            }
            added += 1;
        }
        added
    }

    /// Periodic sweep bounding memory held by abandoned watchers.
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.tick().await;
            loop {
                tick.tick().await;
                let removed = self.garbage_collect().await;
                if removed > 0 {
                    tracing::info!("Watcher sweep removed {} idle target(s)", removed);
                }
            }
        })
    }
}

impl Default for TargetRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_WATCHER_TTL)
    }
}
