//! A single fixed-capacity bucket of contacts.
//!
//! Structurally this plays the role of `protocols/kad/src/kbucket/swamp.rs`'s
//! `Swamp<TKey, TVal>`: an ordered list owned and mutated by whatever holds
//! the enclosing lock (here, the owning [`crate::zone::Zone`]) rather than
//! synchronizing itself. `swamp.rs` additionally tracks a pending-replacement
//! slot for connected/disconnected status; this routing table has no
//! connection concept, so that half of that design doesn't carry
//! over — contacts are appended, pushed to tail, or dropped outright.

use std::net::Ipv4Addr;

use rand::Rng;

use crate::address::PeerAddress;
use crate::config::{K, MAX_PER_IP};
use crate::contact::Contact;
use crate::error::Error;
use crate::identifier::Identifier;

#[derive(Debug, Default)]
pub struct KBucket {
    contacts: Vec<Contact>,
}

impl KBucket {
    pub fn new() -> Self {
        KBucket {
            contacts: Vec::with_capacity(K),
        }
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.contacts.len() >= K
    }

    pub fn contacts(&self) -> &[Contact] {
        &self.contacts
    }

    /// Consumes the bucket, returning its contacts in order. Used when
    /// splitting or consolidating a zone.
    pub fn into_contacts(self) -> Vec<Contact> {
        self.contacts
    }

    fn count_same_ip(&self, ip: Ipv4Addr) -> usize {
        self.contacts.iter().filter(|c| c.ip() == ip).count()
    }

    /// Appends `contact` to the tail. Fails with [`Error::AlreadyPresent`],
    /// [`Error::IpQuota`] or [`Error::Full`].
    pub fn add(&mut self, contact: Contact) -> Result<(), Error> {
        if self.contacts.iter().any(|c| c.id() == contact.id()) {
            return Err(Error::AlreadyPresent);
        }
        if self.count_same_ip(contact.ip()) >= MAX_PER_IP {
            return Err(Error::IpQuota);
        }
        if self.is_full() {
            return Err(Error::Full);
        }
        self.contacts.push(contact);
        Ok(())
    }

    /// Removes the contact with this id, preserving the order of the rest.
    pub fn remove(&mut self, id: Identifier) -> Result<Contact, Error> {
        let pos = self
            .contacts
            .iter()
            .position(|c| c.id() == id)
            .ok_or(Error::NotFound)?;
        Ok(self.contacts.remove(pos))
    }

    pub fn get_by_id(&self, id: Identifier) -> Result<&Contact, Error> {
        self.contacts
            .iter()
            .find(|c| c.id() == id)
            .ok_or(Error::NotFound)
    }

    pub fn get_by_id_mut(&mut self, id: Identifier) -> Result<&mut Contact, Error> {
        self.contacts
            .iter_mut()
            .find(|c| c.id() == id)
            .ok_or(Error::NotFound)
    }

    pub fn get_by_address(&self, addr: &PeerAddress) -> Result<&Contact, Error> {
        self.contacts
            .iter()
            .find(|c| c.matches_address(addr))
            .ok_or(Error::NotFound)
    }

    pub fn random_contact<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<&Contact, Error> {
        if self.contacts.is_empty() {
            return Err(Error::Empty);
        }
        let index = rng.gen_range(0, self.contacts.len());
        Ok(&self.contacts[index])
    }

    pub fn oldest_contact(&self) -> Result<&Contact, Error> {
        self.contacts.first().ok_or(Error::NotFound)
    }

    /// Moves the contact with this id to the tail, preserving the relative
    /// order of the rest.
    pub fn push_to_tail(&mut self, id: Identifier) -> Result<(), Error> {
        let pos = self
            .contacts
            .iter()
            .position(|c| c.id() == id)
            .ok_or(Error::NotFound)?;
        let contact = self.contacts.remove(pos);
        self.contacts.push(contact);
        Ok(())
    }

    /// Calls `update_type` on the contact then pushes it to the tail.
    pub fn set_alive(&mut self, id: Identifier, now: std::time::Instant) -> Result<(), Error> {
        self.get_by_id_mut(id)?.update_type(now);
        self.push_to_tail(id)
    }

    /// Up to `n` alive, IP-verified contacts closest to `to`, ascending by
    /// XOR distance; ties broken by insertion order (a stable sort
    /// preserves that automatically).
    pub fn closest(&self, to: &Identifier, n: usize, now: std::time::Instant) -> Vec<Contact> {
        let mut candidates: Vec<Contact> = self
            .contacts
            .iter()
            .cloned()
            .filter(|c| c.ip_verified())
            .filter(|c| {
                let mut c = c.clone();
                c.is_alive(now)
            })
            .collect();
        candidates.sort_by_key(|c| c.distance(to));
        candidates.truncate(n);
        candidates
    }
}
