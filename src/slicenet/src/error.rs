use thiserror::Error;

use crate::bandwidth::Bandwidth;
use crate::fabric::FabricError;
use crate::topology::{NodeKind, Tier};
use crate::QueueId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid topology parameter {name}: {value}")]
    InvalidTopologyParameter { name: &'static str, value: i64 },
    #[error("identifier space exhausted for {0:?} nodes")]
    IdentifierExhausted(NodeKind),
    #[error("fabric runtime unavailable: {0}")]
    FabricUnavailable(#[from] FabricError),
    #[error("queue id {0} is already owned by slice {1}")]
    DuplicateQueueId(QueueId, String),
    #[error("slice {0} is already registered")]
    DuplicateSliceName(String),
    #[error("host {host} is already assigned to slice {owner}")]
    HostAlreadyAssigned { host: String, owner: String },
    #[error("invalid queue id {0}, queue ids start at 1")]
    InvalidQueueId(QueueId),
    #[error("slice {slice} maps an address for host {host} it does not own")]
    ForeignAddress { slice: String, host: String },
    #[error("unknown slice: {0}")]
    UnknownSlice(String),
    #[error("unknown host: {0}")]
    UnknownHost(String),
    #[error("capacity exceeded on {tier} link {link}: requested {requested}, ceiling {ceiling}")]
    CapacityExceeded {
        link: String,
        tier: Tier,
        requested: Bandwidth,
        ceiling: Bandwidth,
    },
    #[error("no link between {0} and {1}")]
    LinkNotFound(String, String),
    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
