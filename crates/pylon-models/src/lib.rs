//! Shared data types for the pylon control plane.
//!
//! Every other crate in the workspace depends on this one for the shapes
//! that cross component boundaries: secret-client configuration, SSH and
//! provisioning descriptors, RKE2 inventory/credentials, object-store
//! deployment declarations, and cloud-provider credential envelopes.
//! This crate has no async runtime dependency and does no I/O.

pub mod config;
pub mod provider;
pub mod provisioning;
pub mod rke2;
pub mod ssh;
pub mod storeauth;
