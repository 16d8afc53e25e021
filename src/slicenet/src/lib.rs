pub mod bandwidth;

pub mod error;
pub use error::{Error, Result};

pub mod topology;
pub mod ident;
pub mod fabric;
pub mod link_index;
pub mod builder;

pub mod slice;
pub mod allocator;

pub mod shaper;
pub mod reconcile;
pub mod flowspace;

pub mod config;

/// Identifies a shaper queue on every interface. Each slice owns one; 0 is
/// reserved for unclassified traffic.
pub type QueueId = u32;
