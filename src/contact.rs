//! A known remote peer and its freshness lifecycle.
//!
//! Grounded on `network/kad/types/peer.go`'s `peerImp`, translated from Go's
//! interface-with-one-implementation idiom into a concrete struct: there is
//! exactly one representation of a contact and no subtype polymorphism here
//! (see `DESIGN.md`), matching a preference for concrete
//! `Node<TKey, TVal>` structs over trait objects in `protocols/kad/src/kbucket`.

use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use crate::address::PeerAddress;
use crate::error::Error;
use crate::identifier::Identifier;

/// Freshness class of a contact. Degrades monotonically from `LongTime`
/// towards `Expired`; only [`Contact::update_type`] resets it downward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ContactType {
    LongTime = 0,
    TwoHour = 1,
    OneHour = 2,
    New = 3,
    Expired = 4,
}

impl ContactType {
    fn saturating_increment(self) -> Self {
        match self {
            ContactType::LongTime => ContactType::TwoHour,
            ContactType::TwoHour => ContactType::OneHour,
            ContactType::OneHour => ContactType::New,
            ContactType::New | ContactType::Expired => ContactType::Expired,
        }
    }

    /// The re-derivable expiry window for types produced by `update_type`.
    fn window(self) -> Option<Duration> {
        match self {
            ContactType::OneHour => Some(Duration::from_secs(60 * 60)),
            ContactType::TwoHour => Some(Duration::from_secs(90 * 60)),
            ContactType::LongTime => Some(Duration::from_secs(2 * 60 * 60)),
            ContactType::New | ContactType::Expired => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Contact {
    id: Identifier,
    ip: Ipv4Addr,
    udp_port: u16,
    tcp_port: u16,
    protocol_version: u8,
    ip_verified: bool,
    created_at: Instant,
    expires_at: Option<Instant>,
    type_code: ContactType,
    type_updated_at: Instant,
    use_count: u32,
}

impl Contact {
    pub fn new(id: Identifier, ip: Ipv4Addr, udp_port: u16, tcp_port: u16, now: Instant) -> Self {
        Contact {
            id,
            ip,
            udp_port,
            tcp_port,
            protocol_version: 0,
            ip_verified: false,
            created_at: now,
            expires_at: None,
            type_code: ContactType::New,
            type_updated_at: now,
            use_count: 0,
        }
    }

    pub fn id(&self) -> Identifier {
        self.id
    }

    pub fn ip(&self) -> Ipv4Addr {
        self.ip
    }

    pub fn udp_port(&self) -> u16 {
        self.udp_port
    }

    pub fn tcp_port(&self) -> u16 {
        self.tcp_port
    }

    pub fn protocol_version(&self) -> u8 {
        self.protocol_version
    }

    pub fn set_protocol_version(&mut self, version: u8) {
        self.protocol_version = version;
    }

    pub fn ip_verified(&self) -> bool {
        self.ip_verified
    }

    pub fn type_code(&self) -> ContactType {
        self.type_code
    }

    pub fn use_count(&self) -> u32 {
        self.use_count
    }

    pub fn in_use(&self) -> bool {
        self.use_count > 0
    }

    pub fn add_use(&mut self) {
        self.use_count += 1;
    }

    pub fn release_use(&mut self) {
        self.use_count = self.use_count.saturating_sub(1);
    }

    pub fn udp_address(&self) -> PeerAddress {
        PeerAddress::Udp(self.ip, self.udp_port)
    }

    pub fn tcp_address(&self) -> PeerAddress {
        PeerAddress::Tcp(self.ip, self.tcp_port)
    }

    pub fn matches_address(&self, addr: &PeerAddress) -> bool {
        match addr {
            PeerAddress::Tcp(ip, port) => *ip == self.ip && *port == self.tcp_port,
            PeerAddress::Udp(ip, port) => *ip == self.ip && *port == self.udp_port,
        }
    }

    /// XOR distance between this contact and `to`. Pure.
    pub fn distance(&self, to: &Identifier) -> Identifier {
        self.id.distance(to)
    }

    /// Copies address, ports, version, verification, timestamps and type
    /// fields from `other`. Fails with [`Error::IdMismatch`] unless
    /// `self.id == other.id`.
    pub fn update_from(&mut self, other: &Contact) -> Result<(), Error> {
        if self.id != other.id {
            return Err(Error::IdMismatch);
        }
        self.ip = other.ip;
        self.udp_port = other.udp_port;
        self.tcp_port = other.tcp_port;
        self.protocol_version = other.protocol_version;
        self.ip_verified = other.ip_verified;
        self.created_at = other.created_at;
        self.expires_at = other.expires_at;
        self.type_code = other.type_code;
        self.type_updated_at = other.type_updated_at;
        Ok(())
    }

    /// Sets `ip_verified = (candidate == self.ip)` and returns that value.
    pub fn verify_ip(&mut self, candidate: Ipv4Addr) -> bool {
        self.ip_verified = candidate == self.ip;
        self.ip_verified
    }

    /// No-op if re-checked within the last [`crate::config::DEGRADE_COOLDOWN`]
    /// or already `Expired`; otherwise advances `type_code` by one step.
    pub fn degrade_type(&mut self, now: Instant) {
        if now.saturating_duration_since(self.type_updated_at) < crate::config::DEGRADE_COOLDOWN
            || self.type_code == ContactType::Expired
        {
            return;
        }
        self.type_updated_at = now;
        self.type_code = self.type_code.saturating_increment();
    }

    /// Recomputes `type_code` and `expires_at` from how long this contact
    /// has been known.
    pub fn update_type(&mut self, now: Instant) {
        let hours_online = now.saturating_duration_since(self.created_at);
        if hours_online > Duration::from_secs(2 * 60 * 60) {
            self.type_code = ContactType::LongTime;
            self.expires_at = Some(now + Duration::from_secs(2 * 60 * 60));
        } else if hours_online > Duration::from_secs(60 * 60) {
            self.type_code = ContactType::TwoHour;
            self.expires_at = Some(now + Duration::from_secs(90 * 60));
        } else {
            self.type_code = ContactType::OneHour;
            self.expires_at = Some(now + Duration::from_secs(60 * 60));
        }
    }

    /// `type_code != Expired` and (`expires_at` unset or not yet passed).
    ///
    /// As a side effect, an `Expired` contact with no `expires_at` gets one
    /// set one microsecond in the past, so a subsequent `last_seen` call is
    /// well-defined.
    pub fn is_alive(&mut self, now: Instant) -> bool {
        if self.type_code == ContactType::Expired {
            if self.expires_at.is_none() {
                self.expires_at = now.checked_sub(Duration::from_micros(1));
            }
            return false;
        }
        match self.expires_at {
            None => true,
            Some(expires_at) => expires_at >= now,
        }
    }

    /// `expires_at` minus the window implied by `type_code`, if both are
    /// defined; `None` otherwise.
    pub fn last_seen(&self) -> Option<Instant> {
        let expires_at = self.expires_at?;
        let window = self.type_code.window()?;
        expires_at.checked_sub(window)
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn expires_at(&self) -> Option<Instant> {
        self.expires_at
    }

    /// Sets `expires_at` if it is currently unset. Used by the maintenance
    /// pass to give a freshly-alive-but-unscheduled contact a concrete
    /// expiry to check next tick, without otherwise touching its type.
    pub fn ensure_expiry(&mut self, at: Instant) {
        if self.expires_at.is_none() {
            self.expires_at = Some(at);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_contact(now: Instant) -> Contact {
        Contact::new(Identifier::from_u64(1), Ipv4Addr::new(10, 0, 0, 1), 4672, 4662, now)
    }

    #[test]
    fn update_from_requires_matching_id() {
        let now = Instant::now();
        let mut a = new_contact(now);
        let b = Contact::new(Identifier::from_u64(2), Ipv4Addr::new(10, 0, 0, 2), 1, 1, now);
        assert_eq!(a.update_from(&b), Err(Error::IdMismatch));
    }

    #[test]
    fn update_from_copies_fields() {
        let now = Instant::now();
        let mut a = new_contact(now);
        let mut b = a.clone();
        b.set_protocol_version(5);
        b.verify_ip(Ipv4Addr::new(10, 0, 0, 1));
        a.update_from(&b).unwrap();
        assert_eq!(a.protocol_version(), 5);
        assert!(a.ip_verified());
    }

    #[test]
    fn verify_ip_mismatch_clears_flag() {
        let now = Instant::now();
        let mut c = new_contact(now);
        assert!(c.verify_ip(Ipv4Addr::new(10, 0, 0, 1)));
        assert!(!c.verify_ip(Ipv4Addr::new(10, 0, 0, 2)));
        assert!(!c.ip_verified());
    }

    #[test]
    fn degrade_type_is_rate_limited() {
        let now = Instant::now();
        let mut c = new_contact(now);
        c.update_type(now); // OneHour
        c.degrade_type(now);
        assert_eq!(c.type_code(), ContactType::OneHour, "too soon, must be a no-op");
        let later = now + Duration::from_secs(11);
        c.degrade_type(later);
        assert_eq!(c.type_code(), ContactType::New);
    }

    #[test]
    fn degrade_type_saturates_at_expired() {
        let now = Instant::now();
        let mut c = new_contact(now);
        let mut t = now;
        for _ in 0..10 {
            t += Duration::from_secs(11);
            c.degrade_type(t);
        }
        assert_eq!(c.type_code(), ContactType::Expired);
    }

    #[test]
    fn update_type_buckets_by_age() {
        let now = Instant::now();
        let mut c = new_contact(now);
        c.update_type(now);
        assert_eq!(c.type_code(), ContactType::OneHour);

        let mut c2 = new_contact(now - Duration::from_secs(2 * 60 * 60 + 1));
        c2.update_type(now);
        assert_eq!(c2.type_code(), ContactType::LongTime);

        let mut c3 = new_contact(now - Duration::from_secs(60 * 60 + 1));
        c3.update_type(now);
        assert_eq!(c3.type_code(), ContactType::TwoHour);
    }

    #[test]
    fn is_alive_respects_expiry() {
        let now = Instant::now();
        let mut c = new_contact(now);
        c.update_type(now);
        assert!(c.is_alive(now));
        let expires_at = c.expires_at().unwrap();
        assert!(!c.is_alive(expires_at + Duration::from_secs(1)));
    }

    #[test]
    fn in_use_contacts_report_use_count() {
        let now = Instant::now();
        let mut c = new_contact(now);
        assert!(!c.in_use());
        c.add_use();
        assert!(c.in_use());
        c.release_use();
        assert!(!c.in_use());
    }
}
