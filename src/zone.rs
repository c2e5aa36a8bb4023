//! The routing zone tree: a self-balancing binary tree of k-buckets whose
//! shape is determined by XOR distance to the local identifier.
//!
//! Grounded on `network/kad/router/zone.go`'s `Zone`, generalized the way
//! `protocols/kad/src/kbucket`'s `Swamp`/`Weighted` generalize a single
//! bucket: each zone owns either a leaf bucket or two child zones, guarded
//! by one `parking_lot::Mutex` per node (the same lock type
//! `KademliaControllerPrototype`'s shared state uses in
//! `libp2p-kad/src/high_level.rs`). Traversals lock hand-over-hand —
//! acquire the child, drop the parent — so concurrent structural
//! transitions on sibling branches never contend on the same mutex.

use std::net::Ipv4Addr;
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::Mutex;
use rand::Rng;
use tokio::task::JoinHandle;

use crate::address::PeerAddress;
use crate::config::{self, K, MAX_LEVEL, MAX_SPLITTABLE_LEVELS};
use crate::contact::Contact;
use crate::error::Error;
use crate::event::{LookupRequest, UpdateRequest};
use crate::identifier::Identifier;
use crate::kbucket::KBucket;
use crate::router::RouterShared;

enum NodeState {
    Leaf(KBucket),
    Internal { left: Zone, right: Zone },
}

struct TimerHandles {
    lookup: JoinHandle<()>,
    maintenance: JoinHandle<()>,
}

impl TimerHandles {
    fn abort(self) {
        self.lookup.abort();
        self.maintenance.abort();
    }
}

struct ZoneInner {
    local_id: Identifier,
    zone_index: Identifier,
    level: u8,
    parent: Option<Weak<ZoneInner>>,
    shared: Arc<RouterShared>,
    state: Mutex<NodeState>,
    timers: Mutex<Option<TimerHandles>>,
}

/// A node of the routing tree. Cheap to clone: internally an `Arc`, the same
/// way a connection-pool handle shares its inner state.
#[derive(Clone)]
pub struct Zone(Arc<ZoneInner>);

impl Zone {
    /// Builds the root zone and starts its timers. Must be called from
    /// within a Tokio runtime context.
    pub(crate) fn new_root(local_id: Identifier, shared: Arc<RouterShared>) -> Zone {
        let inner = Arc::new(ZoneInner {
            local_id,
            zone_index: Identifier::zero(),
            level: 0,
            parent: None,
            shared,
            state: Mutex::new(NodeState::Leaf(KBucket::new())),
            timers: Mutex::new(None),
        });
        let zone = Zone(inner);
        zone.start_timers();
        zone
    }

    fn new_child(parent: &Zone, side: u64) -> Zone {
        let inner = Arc::new(ZoneInner {
            local_id: parent.0.local_id,
            zone_index: parent.0.zone_index.shift_left(1) | Identifier::from_u64(side),
            level: parent.0.level + 1,
            parent: Some(Arc::downgrade(&parent.0)),
            shared: parent.0.shared.clone(),
            state: Mutex::new(NodeState::Leaf(KBucket::new())),
            timers: Mutex::new(None),
        });
        Zone(inner)
    }

    pub fn level(&self) -> u8 {
        self.0.level
    }

    pub fn zone_index(&self) -> Identifier {
        self.0.zone_index
    }

    pub fn is_leaf(&self) -> bool {
        matches!(&*self.0.state.lock(), NodeState::Leaf(_))
    }

    /// Number of contacts stored in this subtree.
    pub fn count_peers(&self) -> usize {
        match &*self.0.state.lock() {
            NodeState::Leaf(b) => b.len(),
            NodeState::Internal { left, right } => {
                let (left, right) = (left.clone(), right.clone());
                left.count_peers() + right.count_peers()
            }
        }
    }

    // ---- insertion ----------------------------------------------------

    /// Inserts `contact`, splitting leaves as necessary. Fails with
    /// `Error::SelfInsertion` if `contact.id() == local_id`, or with
    /// `Error::BucketFullAndUnsplittable` if the destination leaf is full
    /// and has reached `MAX_SPLITTABLE_LEVELS`.
    pub fn add(&self, contact: Contact) -> Result<(), Error> {
        if contact.id() == self.0.local_id {
            return Err(Error::SelfInsertion);
        }
        loop {
            let mut guard = self.0.state.lock();
            match &mut *guard {
                NodeState::Internal { left, right } => {
                    let child = self.child_for(&contact.id(), left, right);
                    drop(guard);
                    return child.add(contact);
                }
                NodeState::Leaf(bucket) => {
                    if let Ok(existing) = bucket.get_by_id_mut(contact.id()) {
                        return existing.update_from(&contact);
                    }
                    match bucket.add(contact.clone()) {
                        Ok(()) => return Ok(()),
                        Err(Error::Full) => {
                            if self.can_split() {
                                drop(guard);
                                self.split();
                                continue;
                            }
                            log::warn!(
                                "dropping contact {}: bucket full and zone at level {} cannot split further",
                                contact.id(),
                                self.0.level
                            );
                            return Err(Error::BucketFullAndUnsplittable);
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }
    }

    fn child_for(&self, id: &Identifier, left: &Zone, right: &Zone) -> Zone {
        if id.distance(&self.0.local_id).bit(self.0.level as u32) {
            right.clone()
        } else {
            left.clone()
        }
    }

    fn can_split(&self) -> bool {
        self.0.level < MAX_LEVEL && self.0.level < MAX_SPLITTABLE_LEVELS - 1
    }

    /// Splits this leaf into an internal node with two fresh leaf children,
    /// redistributing its contacts by the XOR bit at this zone's level. A
    /// no-op if another thread already split this zone.
    fn split(&self) {
        let mut guard = self.0.state.lock();
        let bucket = match &mut *guard {
            NodeState::Internal { .. } => return,
            NodeState::Leaf(bucket) => std::mem::take(bucket),
        };
        self.stop_timers();
        log::debug!(
            "splitting zone at level {} ({} contacts)",
            self.0.level,
            bucket.len()
        );

        let left = Zone::new_child(self, 0);
        let right = Zone::new_child(self, 1);
        for contact in bucket.into_contacts() {
            let target = self.child_for(&contact.id(), &left, &right);
            let mut child_guard = target.0.state.lock();
            if let NodeState::Leaf(child_bucket) = &mut *child_guard {
                // Capacity/IP-quota violations here would mean the parent
                // bucket already violated its own invariants; cannot happen.
                let _ = child_bucket.add(contact);
            }
        }
        *guard = NodeState::Internal {
            left: left.clone(),
            right: right.clone(),
        };
        drop(guard);
        left.start_timers();
        right.start_timers();
    }

    /// Merges this internal node's children back into a single leaf bucket,
    /// provided both children are leaves whose combined size is below
    /// `K / 2`. Recurses into children first (depth-first); see
    /// `DESIGN.md` for how this crate decides when to call it, since
    /// nothing upstream triggers it automatically.
    pub fn consolidate(&self) {
        let children = match &*self.0.state.lock() {
            NodeState::Leaf(_) => return,
            NodeState::Internal { left, right } => Some((left.clone(), right.clone())),
        };
        let (left, right) = match children {
            Some(c) => c,
            None => return,
        };
        left.consolidate();
        right.consolidate();

        let left_count = left.leaf_len();
        let right_count = right.leaf_len();
        let (left_count, right_count) = match (left_count, right_count) {
            (Some(l), Some(r)) => (l, r),
            _ => return,
        };
        if left_count + right_count >= K / 2 {
            return;
        }

        let mut guard = self.0.state.lock();
        if !matches!(&*guard, NodeState::Internal { .. }) {
            return; // raced with another structural change
        }
        log::debug!(
            "consolidating zone at level {} ({} + {} contacts)",
            self.0.level,
            left_count,
            right_count
        );
        left.stop_timers();
        right.stop_timers();
        let mut merged = KBucket::new();
        for contact in left.drain_leaf_contacts() {
            let _ = merged.add(contact);
        }
        for contact in right.drain_leaf_contacts() {
            let _ = merged.add(contact);
        }
        *guard = NodeState::Leaf(merged);
        drop(guard);
        self.start_timers();
    }

    fn leaf_len(&self) -> Option<usize> {
        match &*self.0.state.lock() {
            NodeState::Leaf(b) => Some(b.len()),
            NodeState::Internal { .. } => None,
        }
    }

    fn drain_leaf_contacts(&self) -> Vec<Contact> {
        let mut guard = self.0.state.lock();
        match &mut *guard {
            NodeState::Leaf(b) => std::mem::take(b).into_contacts(),
            NodeState::Internal { .. } => Vec::new(),
        }
    }

    fn try_consolidate_parent(&self) {
        if let Some(parent) = self.0.parent.as_ref().and_then(Weak::upgrade) {
            Zone(parent).consolidate();
        }
    }

    // ---- queries --------------------------------------------------------

    pub fn find_by_id(&self, id: Identifier) -> Result<Contact, Error> {
        let guard = self.0.state.lock();
        match &*guard {
            NodeState::Leaf(bucket) => bucket.get_by_id(id).cloned(),
            NodeState::Internal { left, right } => {
                let child = self.child_for(&id, left, right);
                drop(guard);
                child.find_by_id(id)
            }
        }
    }

    /// Recursive DFS preferring the left subtree, returning the first match.
    pub fn find_by_address(&self, addr: &PeerAddress) -> Result<Contact, Error> {
        let guard = self.0.state.lock();
        match &*guard {
            NodeState::Leaf(bucket) => bucket.get_by_address(addr).cloned(),
            NodeState::Internal { left, right } => {
                let (left, right) = (left.clone(), right.clone());
                drop(guard);
                match left.find_by_address(addr) {
                    Ok(contact) => Ok(contact),
                    Err(_) => right.find_by_address(addr),
                }
            }
        }
    }

    pub fn contains(&self, id: Identifier) -> bool {
        self.find_by_id(id).is_ok()
    }

    pub fn verify_peer(&self, id: Identifier, ip: Ipv4Addr) -> Result<bool, Error> {
        let mut guard = self.0.state.lock();
        match &mut *guard {
            NodeState::Leaf(bucket) => Ok(bucket.get_by_id_mut(id)?.verify_ip(ip)),
            NodeState::Internal { left, right } => {
                let child = self.child_for(&id, left, right);
                drop(guard);
                child.verify_peer(id, ip)
            }
        }
    }

    /// Picks a child uniformly at each internal node; falls back to the
    /// other side if the chosen subtree has nothing to offer. Uses the
    /// Router's shared, internally-synchronized RNG, correcting the
    /// upstream bug where the equivalent call always picked index 0.
    pub fn random_contact(&self) -> Result<Contact, Error> {
        let guard = self.0.state.lock();
        match &*guard {
            NodeState::Leaf(bucket) => {
                bucket.random_contact(&mut *self.0.shared.rng.lock()).cloned()
            }
            NodeState::Internal { left, right } => {
                let (left, right) = (left.clone(), right.clone());
                drop(guard);
                let (first, second) = if self.coin_flip() {
                    (right, left)
                } else {
                    (left, right)
                };
                first.random_contact().or_else(|_| second.random_contact())
            }
        }
    }

    fn coin_flip(&self) -> bool {
        self.0.shared.rng.lock().gen_range(0, 2) == 1
    }

    pub fn all_contacts(&self) -> Vec<Contact> {
        let guard = self.0.state.lock();
        match &*guard {
            NodeState::Leaf(bucket) => bucket.contacts().to_vec(),
            NodeState::Internal { left, right } => {
                let (left, right) = (left.clone(), right.clone());
                drop(guard);
                let mut contacts = left.all_contacts();
                contacts.extend(right.all_contacts());
                contacts
            }
        }
    }

    /// If this is a leaf (or `depth <= 0`), returns its bucket's contacts —
    /// drilling down through a single randomly-chosen child at a time once
    /// `depth` bottoms out. Otherwise fans out into both children with
    /// `depth - 1`.
    pub fn depth_sample(&self, depth: i32) -> Vec<Contact> {
        let guard = self.0.state.lock();
        match &*guard {
            NodeState::Leaf(bucket) => bucket.contacts().to_vec(),
            NodeState::Internal { left, right } => {
                let (left, right) = (left.clone(), right.clone());
                drop(guard);
                if depth <= 0 {
                    let chosen = if self.coin_flip() { right } else { left };
                    chosen.depth_sample(0)
                } else {
                    let mut contacts = left.depth_sample(depth - 1);
                    contacts.extend(right.depth_sample(depth - 1));
                    contacts
                }
            }
        }
    }

    /// Takes up to `max` contacts, left subtree first regardless of any
    /// target id — a known bias inherited from upstream's `GetTopPeers`,
    /// preserved deliberately (see `DESIGN.md`). Falls back to a single
    /// `depth_sample` once `max_depth` is exhausted.
    pub fn top_contacts(&self, max: usize, max_depth: i32) -> Vec<Contact> {
        if max_depth <= 0 {
            let mut contacts = self.depth_sample(0);
            contacts.truncate(max);
            return contacts;
        }
        let guard = self.0.state.lock();
        match &*guard {
            NodeState::Leaf(bucket) => {
                let mut contacts = bucket.contacts().to_vec();
                contacts.truncate(max);
                contacts
            }
            NodeState::Internal { left, right } => {
                let (left, right) = (left.clone(), right.clone());
                drop(guard);
                let mut contacts = left.top_contacts(max, max_depth - 1);
                if contacts.len() < max {
                    contacts.extend(right.top_contacts(max - contacts.len(), max_depth - 1));
                }
                contacts.truncate(max);
                contacts
            }
        }
    }

    /// `top_contacts(max, 5)`. `_target` is accepted for forward
    /// compatibility; the upstream sampling bias means it is currently
    /// unused (see `DESIGN.md`).
    pub fn bootstrap_sample(&self, max: usize, _target: Identifier) -> Vec<Contact> {
        self.top_contacts(max, 5)
    }

    /// Closest `max` alive, IP-verified contacts to `to`, merged from the
    /// nearer subtree first, sorted ascending by XOR distance.
    pub fn closest(&self, to: &Identifier, max: usize) -> Vec<Contact> {
        let now = Instant::now();
        let mut contacts = self.closest_inner(to, max, now);
        contacts.sort_by_key(|c| c.distance(to));
        contacts.truncate(max);
        contacts
    }

    fn closest_inner(&self, to: &Identifier, max: usize, now: Instant) -> Vec<Contact> {
        let guard = self.0.state.lock();
        match &*guard {
            NodeState::Leaf(bucket) => bucket.closest(to, max, now),
            NodeState::Internal { left, right } => {
                let (left, right) = (left.clone(), right.clone());
                drop(guard);
                let (near, far) = if to.distance(&self.0.local_id).bit(self.0.level as u32) {
                    (right, left)
                } else {
                    (left, right)
                };
                let mut contacts = near.closest_inner(to, max, now);
                if contacts.len() < max {
                    contacts.extend(far.closest_inner(to, max - contacts.len(), now));
                }
                contacts
            }
        }
    }

    // ---- timers -----------------------------------------------------------

    fn start_timers(&self) {
        let lookup_zone = self.clone();
        let lookup_interval = self.0.shared.config.lookup_interval;
        let lookup = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(lookup_interval);
            loop {
                ticker.tick().await;
                lookup_zone.on_lookup_tick();
            }
        });

        let maintenance_zone = self.clone();
        let interval = self
            .0
            .shared
            .config
            .clamp_maintenance(self.0.local_id.to_u64());
        let maintenance = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                maintenance_zone.on_maintenance_tick();
            }
        });

        *self.0.timers.lock() = Some(TimerHandles { lookup, maintenance });
    }

    pub(crate) fn stop_timers(&self) {
        if let Some(handles) = self.0.timers.lock().take() {
            handles.abort();
        }
    }

    /// Stops every timer and empties every bucket in this subtree, releasing
    /// all contacts. Used by `Router::shutdown`.
    pub(crate) fn drain_subtree(&self) {
        self.stop_timers();
        let children = {
            let mut guard = self.0.state.lock();
            match &mut *guard {
                NodeState::Leaf(bucket) => {
                    let _ = std::mem::take(bucket);
                    None
                }
                NodeState::Internal { left, right } => Some((left.clone(), right.clone())),
            }
        };
        if let Some((left, right)) = children {
            left.drain_subtree();
            right.drain_subtree();
        }
    }

    fn on_lookup_tick(&self) {
        let should_fire = match &*self.0.state.lock() {
            NodeState::Leaf(bucket) => {
                let fullness = bucket.len() as f32 / K as f32;
                self.0.level < MAX_SPLITTABLE_LEVELS
                    || fullness >= config::LOOKUP_FULLNESS_THRESHOLD
            }
            NodeState::Internal { .. } => false,
        };
        if !should_fire {
            return;
        }
        let probe = self
            .0
            .zone_index
            .shift_left(self.0.level as u32)
            .distance(&self.0.local_id);
        log::trace!("leaf at level {} emitting lookup probe {}", self.0.level, probe);
        self.0.shared.lookup_request.emit(LookupRequest { id: probe });
    }

    fn on_maintenance_tick(&self) {
        let now = Instant::now();
        let mut guard = self.0.state.lock();
        let bucket = match &mut *guard {
            NodeState::Leaf(bucket) => bucket,
            NodeState::Internal { .. } => return,
        };

        let ids: Vec<Identifier> = bucket.contacts().iter().map(Contact::id).collect();
        for id in ids {
            if let Ok(contact) = bucket.get_by_id_mut(id) {
                let alive = contact.is_alive(now);
                if !alive && !contact.in_use() {
                    log::debug!("purging dead contact {}", id);
                    let _ = bucket.remove(id);
                } else if alive {
                    let soon = now + std::time::Duration::from_micros(1);
                    contact.ensure_expiry(soon);
                }
            }
        }

        let mut update_target: Option<Contact> = None;
        if let Ok(oldest_id) = bucket.oldest_contact().map(Contact::id) {
            if let Ok(oldest) = bucket.get_by_id_mut(oldest_id) {
                let alive = oldest.is_alive(now);
                let not_yet_expired = oldest.expires_at().map_or(true, |e| e >= now);
                if alive && not_yet_expired {
                    let _ = bucket.push_to_tail(oldest_id);
                } else {
                    oldest.degrade_type(now);
                    if oldest.protocol_version() >= 2 {
                        update_target = Some(oldest.clone());
                    }
                }
            }
        }
        drop(guard);

        if let Some(contact) = update_target {
            self.0
                .shared
                .update_request
                .emit_sync(UpdateRequest { contact });
        }
        self.try_consolidate_parent();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::Router;
    use std::net::Ipv4Addr;

    fn contact_for(id: u64, octet: u8) -> Contact {
        Contact::new(
            Identifier::from_u64(id),
            Ipv4Addr::new(10, 0, 0, octet),
            4672,
            4662,
            Instant::now(),
        )
    }

    #[tokio::test]
    async fn leaf_splits_when_full_and_unsplittable_when_not() {
        let router = Router::new_seeded(Identifier::zero(), 7);
        // 16 contacts whose high bit is 0 keep the root at capacity without splitting.
        for i in 1..=16u64 {
            router.add(contact_for(i, i as u8)).unwrap();
        }
        assert_eq!(router.count(), 16);
        // a 17th contact forces a split; after that all 17 must be retrievable.
        router.add(contact_for(17, 17)).unwrap();
        assert_eq!(router.count(), 17);
        for i in 1..=17u64 {
            assert!(router.contains(Identifier::from_u64(i)));
        }
    }

    #[tokio::test]
    async fn self_insertion_is_rejected() {
        let local_id = Identifier::from_u64(0xff00ff);
        let router = Router::new_seeded(local_id, 1);
        let self_contact = Contact::new(local_id, Ipv4Addr::new(10, 0, 0, 1), 1, 1, Instant::now());
        assert_eq!(router.add(self_contact), Err(Error::SelfInsertion));
        assert_eq!(router.count(), 0);
    }

    #[tokio::test]
    async fn repeated_inserts_of_same_id_update_instead_of_duplicating() {
        let router = Router::new_seeded(Identifier::from_u64(0xff00ff), 2);
        let id = Identifier::from_u64(0);
        for port in 1..=5u16 {
            let c = Contact::new(id, Ipv4Addr::new(1, 2, 3, 4), port, port, Instant::now());
            router.add(c).unwrap();
        }
        assert_eq!(router.count(), 1);
    }
}
