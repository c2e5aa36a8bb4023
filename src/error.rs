//! Typed errors for the routing subsystem, one variant per failure mode the
//! core can raise. The core never panics on remote-data defects; callers
//! decide how to react.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// Caller bug: a malformed argument such as a zero divisor or an
    /// oversized byte/hex encoding.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// `Zone::add` was called with a contact whose id equals the local id.
    #[error("cannot insert a contact with the local node's own id")]
    SelfInsertion,

    /// `KBucket::add` found a contact with the same id already present.
    #[error("a contact with this id is already present")]
    AlreadyPresent,

    /// `KBucket::add` would exceed the per-IP contact cap.
    #[error("too many contacts already registered for this IP address")]
    IpQuota,

    /// `KBucket::add` found the bucket at capacity.
    #[error("the bucket is full")]
    Full,

    /// `Zone::add` could not split an already-full, unsplittable leaf.
    #[error("bucket is full and this zone cannot split any further")]
    BucketFullAndUnsplittable,

    /// A lookup or removal found nothing matching.
    #[error("not found")]
    NotFound,

    /// `KBucket::get_by_address` was given an address that is neither a TCP
    /// nor a UDP IPv4 endpoint.
    #[error("unsupported address family")]
    UnsupportedAddressFamily,

    /// `Contact::update_from` was called with a contact of a different id.
    #[error("cannot update a contact from another contact with a different id")]
    IdMismatch,

    /// `KBucket::random_contact` was called on an empty bucket.
    #[error("bucket is empty")]
    Empty,

    /// Declared but unimplemented upstream: tree persistence and
    /// compressed-packet decompression.
    #[error("not implemented")]
    NotImplemented,
}
