//! Test to verify test infrastructure works correctly

mod common;

use common::builders::{EntryBuilder, SnapshotBuilder};
use common::fakes::SharedLock;
use onionoo_rs::lock::AdvisoryLock;
use onionoo_rs::NodeKind;

#[test]
fn test_infrastructure_setup() {
    let snapshot = SnapshotBuilder::bridges(5)
        .entry(EntryBuilder::new("AAAA").address("10.0.0.1").flags(&["Running"]))
        .build();

    assert_eq!(snapshot.kind, NodeKind::Bridge);
    assert_eq!(snapshot.entries[0].fingerprint, common::fp("AAAA").as_str());
    assert_eq!(snapshot.entries[0].nickname, "nodeaaaa");
}

#[test]
fn test_shared_lock_is_exclusive() {
    let lock = SharedLock::new();
    let other = lock.clone();
    assert!(lock.acquire().unwrap());
    assert!(!other.acquire().unwrap());
    assert!(lock.release().unwrap());
    assert!(!other.is_held());
}

#[test]
fn test_float_comparison() {
    common::assert_float_eq(1.0, 1.0000001, 0.001);
}

#[test]
#[should_panic]
fn test_float_comparison_fails() {
    common::assert_float_eq(1.0, 2.0, 0.001);
}
