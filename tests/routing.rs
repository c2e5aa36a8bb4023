//! Scenario-level tests against the public `Router` API, one per behavior
//! called out in the teaching material this crate was built against: split
//! growth, duplicate-id updates, self-insertion rejection, IP quota
//! enforcement, and closest-n correctness over a larger tree.

use std::net::Ipv4Addr;
use std::time::Instant;

use kad_routing::{Contact, Error, Identifier, Router};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn contact(id: u64, octet: u8) -> Contact {
    Contact::new(
        Identifier::from_u64(id),
        Ipv4Addr::new(10, 0, (octet / 250) as u8, (octet % 250) as u8),
        4672,
        4662,
        Instant::now(),
    )
}

#[tokio::test]
async fn seventeen_inserts_force_a_split_and_all_remain_retrievable() {
    let router = Router::new_seeded(Identifier::zero(), 1);
    for i in 1..=17u64 {
        router.add(contact(i, i as u8)).unwrap();
    }
    assert_eq!(router.count(), 17);
    for i in 1..=17u64 {
        assert!(
            router.contains(Identifier::from_u64(i)),
            "contact {} missing after split",
            i
        );
    }
}

#[tokio::test]
async fn random_peers_are_all_retrievable_by_id() {
    let local_id = Identifier::from_u64(0x5ead_beef);
    let router = Router::new_seeded(local_id, 2024);
    let mut rng = StdRng::seed_from_u64(2024);

    let mut ids = Vec::new();
    for i in 0..17u64 {
        let raw: u64 = rng.gen();
        let id = Identifier::from_u64(raw ^ i);
        if id == local_id {
            continue;
        }
        ids.push(id);
        let c = Contact::new(
            id,
            Ipv4Addr::new(10, 1, (i / 250) as u8, (i % 250) as u8),
            4672,
            4662,
            Instant::now(),
        );
        router.add(c).unwrap();
    }

    for id in ids {
        assert!(router.contains(id));
        assert_eq!(router.find_by_id(id).unwrap().id(), id);
    }
}

#[tokio::test]
async fn self_insertion_is_rejected_and_duplicate_ids_update_in_place() {
    let local_id = Identifier::from_u64(777);
    let router = Router::new_seeded(local_id, 3);

    let self_contact = Contact::new(local_id, Ipv4Addr::new(1, 1, 1, 1), 1, 1, Instant::now());
    assert_eq!(router.add(self_contact), Err(Error::SelfInsertion));
    assert_eq!(router.count(), 0);

    let id = Identifier::from_u64(1);
    let first = Contact::new(id, Ipv4Addr::new(9, 9, 9, 9), 100, 100, Instant::now());
    router.add(first).unwrap();

    let mut second = Contact::new(id, Ipv4Addr::new(9, 9, 9, 10), 200, 200, Instant::now());
    second.set_protocol_version(9);
    router.add(second).unwrap();

    assert_eq!(router.count(), 1);
    let stored = router.find_by_id(id).unwrap();
    assert_eq!(stored.ip(), Ipv4Addr::new(9, 9, 9, 10));
    assert_eq!(stored.protocol_version(), 9);
}

#[tokio::test]
async fn ip_quota_is_enforced_through_the_router() {
    let router = Router::new_seeded(Identifier::zero(), 4);
    let ip = Ipv4Addr::new(192, 168, 1, 1);
    for i in 1..=3u64 {
        let c = Contact::new(Identifier::from_u64(i), ip, 4672, 4662, Instant::now());
        router.add(c).unwrap();
    }
    let fourth = Contact::new(Identifier::from_u64(99), ip, 4672, 4662, Instant::now());
    assert_eq!(router.add(fourth), Err(Error::IpQuota));
    assert_eq!(router.count(), 3);
}

#[tokio::test]
async fn closest_eight_of_sixty_four_are_correct_and_sorted() {
    let local_id = Identifier::from_u64(0);
    let router = Router::new_seeded(local_id, 5);
    let mut all_ids = Vec::new();
    for i in 1..=64u64 {
        let id = Identifier::from_u64(i * 0x1000 + i);
        all_ids.push(id);
        let mut c = Contact::new(
            id,
            Ipv4Addr::new(10, 2, (i / 250) as u8, (i % 250) as u8),
            4672,
            4662,
            Instant::now(),
        );
        c.verify_ip(c.ip());
        c.update_type(Instant::now());
        router.add(c).unwrap();
    }
    assert_eq!(router.count(), 64);

    let target = Identifier::from_u64(0x5000 + 5);
    let closest = router.closest(&target, 8);
    assert_eq!(closest.len(), 8);

    let mut expected = all_ids.clone();
    expected.sort_by_key(|id| id.distance(&target));
    let expected_top8: Vec<Identifier> = expected.into_iter().take(8).collect();
    let actual: Vec<Identifier> = closest.iter().map(|c| c.id()).collect();
    assert_eq!(actual, expected_top8);
}

#[test]
fn identifier_bit_string_and_shift_match_known_vector() {
    let hex = "ff0000ff0000f000f000800008007300";
    let id = Identifier::from_hex(&hex[..32]).unwrap();
    assert_eq!(id.to_hex_string(), &hex[..32]);
    let bits = id.to_bit_string();
    assert_eq!(bits.len(), 128);
    // Byte 14 is 0x73; bits 112..119 (MSB-first) are its bits.
    assert_eq!(&bits[112..120], "01110011");
    assert_eq!(id.shift_left(128), Identifier::zero());
}
