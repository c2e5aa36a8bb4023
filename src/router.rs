//! The routing table's public entry point: owns the root zone, the shared
//! RNG, and the two event hubs the zone tree's timers publish to.
//!
//! Grounded on `network/kad/router/router.go`'s `Router` (which embeds a
//! `Zone` directly) and, for the shared-mutable-state-behind-one-handle
//! shape, on `libp2p-kad/src/high_level.rs`'s `KademliaControllerPrototype`
//! wrapping an `Arc<Mutex<Inner>>`.

use std::net::Ipv4Addr;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::address::PeerAddress;
use crate::config::RouterConfig;
use crate::contact::Contact;
use crate::error::Error;
use crate::event::{EventHub, LookupRequest, SubscriptionHandle, UpdateRequest};
use crate::identifier::Identifier;
use crate::zone::Zone;

/// State shared by every [`Zone`] in the tree: the RNG backing
/// `random_contact`/`depth_sample`'s coin flips, the two event hubs fed by
/// each leaf's timers, and the timer-period overrides each zone reads when
/// it starts its own timers.
pub(crate) struct RouterShared {
    pub(crate) rng: Mutex<StdRng>,
    pub(crate) lookup_request: EventHub<LookupRequest>,
    pub(crate) update_request: EventHub<UpdateRequest>,
    pub(crate) config: RouterConfig,
}

/// A self-balancing k-bucket routing table for the peer identified by
/// `local_id`. Cloning a `Router` shares the same tree; construction must
/// happen inside a Tokio runtime since the root zone starts its own timers
/// immediately.
#[derive(Clone)]
pub struct Router {
    local_id: Identifier,
    root: Zone,
    shared: Arc<RouterShared>,
}

impl Router {
    pub fn new(local_id: Identifier) -> Router {
        Self::build(local_id, StdRng::from_entropy(), RouterConfig::default())
    }

    /// Deterministic construction for tests: the RNG is seeded rather than
    /// pulled from the OS.
    pub fn new_seeded(local_id: Identifier, seed: u64) -> Router {
        Self::build(local_id, StdRng::seed_from_u64(seed), RouterConfig::default())
    }

    /// Like [`Router::new`], but with the lookup/maintenance timer periods
    /// overridden instead of defaulted.
    pub fn with_config(local_id: Identifier, config: RouterConfig) -> Router {
        Self::build(local_id, StdRng::from_entropy(), config)
    }

    fn build(local_id: Identifier, rng: StdRng, config: RouterConfig) -> Router {
        let shared = Arc::new(RouterShared {
            rng: Mutex::new(rng),
            lookup_request: EventHub::new(),
            update_request: EventHub::new(),
            config,
        });
        let root = Zone::new_root(local_id, shared.clone());
        Router { local_id, root, shared }
    }

    pub fn local_id(&self) -> Identifier {
        self.local_id
    }

    pub fn add(&self, contact: Contact) -> Result<(), Error> {
        self.root.add(contact)
    }

    pub fn find_by_id(&self, id: Identifier) -> Result<Contact, Error> {
        self.root.find_by_id(id)
    }

    pub fn find_by_address(&self, addr: &PeerAddress) -> Result<Contact, Error> {
        self.root.find_by_address(addr)
    }

    pub fn contains(&self, id: Identifier) -> bool {
        self.root.contains(id)
    }

    pub fn count(&self) -> usize {
        self.root.count_peers()
    }

    pub fn verify_peer(&self, id: Identifier, ip: Ipv4Addr) -> Result<bool, Error> {
        self.root.verify_peer(id, ip)
    }

    pub fn random_contact(&self) -> Result<Contact, Error> {
        self.root.random_contact()
    }

    /// Up to `n` alive, IP-verified contacts closest to `target`.
    pub fn closest(&self, target: &Identifier, n: usize) -> Vec<Contact> {
        self.root.closest(target, n)
    }

    /// Candidate peers to seed a bootstrap lookup toward `target`.
    pub fn bootstrap_sample(&self, n: usize, target: Identifier) -> Vec<Contact> {
        self.root.bootstrap_sample(n, target)
    }

    pub fn all_contacts(&self) -> Vec<Contact> {
        self.root.all_contacts()
    }

    /// Attempts to merge thin sibling leaves throughout the tree back into
    /// single buckets. The per-leaf maintenance timer already does this for
    /// its own parent after a purge; this is the manual, whole-tree version
    /// for a caller doing its own periodic housekeeping.
    pub fn consolidate(&self) {
        self.root.consolidate();
    }

    pub fn subscribe_lookup_request<F>(&self, callback: F) -> SubscriptionHandle
    where
        F: Fn(LookupRequest) + Send + Sync + 'static,
    {
        self.shared.lookup_request.subscribe(callback)
    }

    pub fn unsubscribe_lookup_request(&self, handle: SubscriptionHandle) {
        self.shared.lookup_request.unsubscribe(handle);
    }

    pub fn subscribe_update_request<F>(&self, callback: F) -> SubscriptionHandle
    where
        F: Fn(UpdateRequest) + Send + Sync + 'static,
    {
        self.shared.update_request.subscribe(callback)
    }

    pub fn unsubscribe_update_request(&self, handle: SubscriptionHandle) {
        self.shared.update_request.unsubscribe(handle);
    }

    /// Stops every timer task in the tree and releases every contact.
    /// The `Router` handle itself remains valid afterwards (it still answers
    /// queries, just against an empty table) but produces no further
    /// lookup/update events.
    pub fn shutdown(&self) {
        self.root.drain_subtree();
    }

    /// Persists the table to disk. Not implemented upstream either
    /// (`router.go`'s `SaveFile` is a stub); kept as an explicit error
    /// rather than a silent no-op so callers don't mistake this for success.
    pub fn save(&self, _path: &std::path::Path) -> Result<(), Error> {
        Err(Error::NotImplemented)
    }

    pub fn load(&self, _path: &std::path::Path) -> Result<(), Error> {
        Err(Error::NotImplemented)
    }
}
