//! Umbrella crate re-exporting the pruned block dispatcher workspace's
//! published crates behind feature flags, so a dependent can pull in just
//! the shared types or the full dispatcher.
#![warn(missing_docs)]

#[cfg(feature = "dispatcher-common")]
pub use pbd_common as common;

#[cfg(feature = "dispatcher-core")]
pub use pbd_dispatcher as dispatcher;
