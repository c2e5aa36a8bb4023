//! Self-balancing k-bucket routing table for a Kad2-compatible peer-to-peer
//! node: the XOR-distance-addressed binary tree of k-buckets that tracks
//! known peers, decides when to split or merge, and periodically refreshes
//! itself and its stale contacts.
//!
//! Structured the way `protocols/kad`'s `kbucket` module is structured:
//! a bucket type ([`kbucket::KBucket`]) wrapped by something that knows how
//! to address it ([`zone::Zone`]), wrapped by the crate's public handle
//! ([`router::Router`]).

pub mod address;
pub mod config;
pub mod contact;
pub mod error;
pub mod event;
pub mod identifier;
pub mod kbucket;
pub mod router;
pub mod zone;

pub use address::PeerAddress;
pub use contact::{Contact, ContactType};
pub use error::Error;
pub use event::{LookupRequest, SubscriptionHandle, UpdateRequest};
pub use identifier::Identifier;
pub use router::Router;
