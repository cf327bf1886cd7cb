//! System-test harness for a permissionless ledger network.
//!
//! Provisions an ephemeral cluster of peers on Kubernetes, injects network
//! faults while it runs, and checks that every peer converges on the same
//! state by consuming each peer's event streams concurrently.

pub mod chaos;
pub mod cluster;
pub mod collect;
pub mod context;
pub mod ctl;
pub mod flags;
pub mod node;
pub mod peer;
pub mod platform;
pub mod readiness;
pub mod settings;
pub mod trace;
pub mod verify;

pub mod pb {
    #![allow(clippy::all)]
    tonic::include_proto!("mesh.v1");
}

pub use systest_macros::test;

/// `0x`-prefixed lowercase hex, the format digests and ids are logged in.
pub fn pretty_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}
