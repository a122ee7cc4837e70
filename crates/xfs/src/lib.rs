#![forbid(unsafe_code)]
//! Read-only XFS reader public API.
//!
//! Re-exports `xfs-core` through a stable external interface. Downstream
//! consumers such as the inspector CLI depend on this crate only.

pub use xfs_core::*;
