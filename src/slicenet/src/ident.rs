use crate::error::{Error, Result};
use crate::topology::{Dpid, NodeKind};

/// Datapath ids are 64 bits on the wire but mininet-style fabrics derive MAC
/// addresses from them, so stay within 48 bits.
pub const MAX_DPID: u64 = (1 << 48) - 1;
pub const MAX_HOST_ID: u64 = u32::MAX as u64;

/// Hands out switch and host names. One counter per node kind, starting at 1.
/// Identifiers are never reused.
#[derive(Debug, Clone)]
pub struct IdAllocator {
    switch_cnt: u64,
    host_cnt: u64,
    max_switch: u64,
    max_host: u64,
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::with_ceiling(MAX_DPID, MAX_HOST_ID)
    }

    pub fn with_ceiling(max_switch: u64, max_host: u64) -> Self {
        IdAllocator {
            switch_cnt: 0,
            host_cnt: 0,
            max_switch,
            max_host,
        }
    }

    pub fn next_switch(&mut self) -> Result<(String, Dpid)> {
        if self.switch_cnt >= self.max_switch {
            return Err(Error::IdentifierExhausted(NodeKind::Switch));
        }
        self.switch_cnt += 1;
        Ok((format!("s{}", self.switch_cnt), Dpid(self.switch_cnt)))
    }

    pub fn next_host(&mut self) -> Result<String> {
        if self.host_cnt >= self.max_host {
            return Err(Error::IdentifierExhausted(NodeKind::Host));
        }
        self.host_cnt += 1;
        Ok(format!("h{}", self.host_cnt))
    }

    #[inline]
    pub fn num_switches(&self) -> u64 {
        self.switch_cnt
    }

    #[inline]
    pub fn num_hosts(&self) -> u64 {
        self.host_cnt
    }
}
