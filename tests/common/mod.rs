//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod fakes;

use onionoo_rs::Fingerprint;

/// Fixed "now" used across integration tests (2023-11-14 22:13:20 UTC)
pub const NOW: i64 = 1_700_000_000_000;

/// A valid fingerprint made by repeating a 4-character prefix
pub fn fp(prefix: &str) -> Fingerprint {
    Fingerprint::parse(&prefix.repeat(10)).expect("valid test fingerprint")
}

/// Assert two floats are approximately equal
pub fn assert_float_eq(a: f64, b: f64, epsilon: f64) {
    assert!(
        (a - b).abs() < epsilon,
        "Expected {} to be approximately equal to {} (epsilon: {})",
        a,
        b,
        epsilon
    );
}
