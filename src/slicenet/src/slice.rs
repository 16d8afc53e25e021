use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;

use fnv::FnvHashMap as HashMap;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::bandwidth::Bandwidth;
use crate::error::{Error, Result};
use crate::fabric::Fabric;
use crate::topology::{Tier, Topology};
use crate::QueueId;

/// Flow-space permission bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permissions(pub u8);

impl Permissions {
    pub const DELEGATE: Permissions = Permissions(1);
    pub const READ: Permissions = Permissions(2);
    pub const WRITE: Permissions = Permissions(4);
    pub const ALL: Permissions = Permissions(7);

    #[inline]
    pub fn contains(self, other: Permissions) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for Permissions {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Permissions(self.0 | rhs.0)
    }
}

impl std::fmt::Display for Permissions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which switches an access rule is installed on. A switch with a host
/// attached is an edge switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SwitchScope {
    Edge,
    NonEdge,
    All,
}

impl SwitchScope {
    #[inline]
    pub fn admits(self, is_edge: bool) -> bool {
        match self {
            SwitchScope::Edge => is_edge,
            SwitchScope::NonEdge => !is_edge,
            SwitchScope::All => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccessRule {
    pub name: String,
    /// flow match, e.g. `nw_src=10.0.0.0/24`
    #[serde(rename = "match")]
    pub match_str: String,
    pub priority: u32,
    pub scope: SwitchScope,
    pub queue_id: QueueId,
    pub permissions: Permissions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerEndpoint {
    pub ip: String,
    pub port: u16,
}

impl std::fmt::Display for ControllerEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tcp:{}:{}", self.ip, self.port)
    }
}

/// A tenant with its own hosts, addresses, access rules and a bandwidth
/// guarantee per link tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Slice {
    pub name: String,
    #[serde(default)]
    pub email: String,
    pub controller: ControllerEndpoint,
    /// the shaper queue carrying this slice's traffic on every link
    pub queue_id: QueueId,
    pub hosts: BTreeSet<String>,
    /// static addresses of the slice's hosts
    #[serde(default)]
    pub addresses: BTreeMap<String, Ipv4Addr>,
    #[serde(default, rename = "rule")]
    pub rules: Vec<AccessRule>,
    /// guaranteed rate on every link of a tier; tiers absent here are not shaped
    #[serde(default)]
    pub rates: BTreeMap<Tier, Bandwidth>,
}

impl Slice {
    #[inline]
    pub fn rate_on(&self, tier: Tier) -> Option<Bandwidth> {
        self.rates.get(&tier).copied()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SliceRegistry {
    slices: IndexMap<String, Slice>,
    by_queue: HashMap<QueueId, String>,
    host_owner: HashMap<String, String>,
}

impl SliceRegistry {
    pub fn new() -> Self {
        Default::default()
    }

    /// Register a slice. Every check runs before anything is inserted, so a
    /// rejected slice leaves the registry as it was.
    pub fn register(&mut self, slice: Slice) -> Result<()> {
        if self.slices.contains_key(&slice.name) {
            return Err(Error::DuplicateSliceName(slice.name));
        }
        if slice.queue_id == 0 {
            return Err(Error::InvalidQueueId(slice.queue_id));
        }
        if let Some(owner) = self.by_queue.get(&slice.queue_id) {
            return Err(Error::DuplicateQueueId(slice.queue_id, owner.clone()));
        }
        for host in &slice.hosts {
            if let Some(owner) = self.host_owner.get(host) {
                return Err(Error::HostAlreadyAssigned {
                    host: host.clone(),
                    owner: owner.clone(),
                });
            }
        }
        if let Some(host) = slice.addresses.keys().find(|h| !slice.hosts.contains(*h)) {
            return Err(Error::ForeignAddress {
                slice: slice.name.clone(),
                host: host.clone(),
            });
        }

        log::info!(
            "registered slice {} queue {} hosts {:?}",
            slice.name,
            slice.queue_id,
            slice.hosts
        );
        self.by_queue.insert(slice.queue_id, slice.name.clone());
        for host in &slice.hosts {
            self.host_owner.insert(host.clone(), slice.name.clone());
        }
        self.slices.insert(slice.name.clone(), slice);
        Ok(())
    }

    /// All slices in registration order.
    pub fn all_slices(&self) -> impl Iterator<Item = &Slice> + '_ {
        self.slices.values()
    }

    pub fn get(&self, name: &str) -> Option<&Slice> {
        self.slices.get(name)
    }

    pub fn hosts_of(&self, name: &str) -> Result<&BTreeSet<String>> {
        self.slices
            .get(name)
            .map(|s| &s.hosts)
            .ok_or_else(|| Error::UnknownSlice(name.to_owned()))
    }

    pub fn owner_of(&self, host: &str) -> Option<&str> {
        self.host_owner.get(host).map(|s| s.as_str())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slices.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    /// Check that every host a slice claims is a host of `topo`.
    pub fn check_hosts(&self, topo: &Topology) -> Result<()> {
        for host in self.host_owner.keys() {
            match topo.get_node_index(host) {
                Some(ix) if topo[ix].is_host() => {}
                _ => return Err(Error::UnknownHost(host.clone())),
            }
        }
        Ok(())
    }

    /// Push the static address maps of all slices to the fabric. Returns the
    /// number of addresses set.
    pub fn apply_addresses<F: Fabric>(&self, fabric: &mut F) -> Result<usize> {
        let mut n = 0;
        for slice in self.all_slices() {
            for (host, &addr) in &slice.addresses {
                log::debug!("{}: {} -> {}", slice.name, host, addr);
                fabric.set_host_address(host, addr)?;
                n += 1;
            }
        }
        Ok(n)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::bandwidth::BandwidthTrait;

    pub(crate) fn slice(name: &str, queue_id: QueueId, hosts: &[&str]) -> Slice {
        Slice {
            name: name.to_owned(),
            email: format!("{}.net", name),
            controller: ControllerEndpoint {
                ip: "localhost".to_owned(),
                port: 11000 + queue_id as u16,
            },
            queue_id,
            hosts: hosts.iter().map(|h| h.to_string()).collect(),
            addresses: BTreeMap::new(),
            rules: Vec::new(),
            rates: BTreeMap::new(),
        }
    }

    #[test]
    fn duplicate_queue_id_leaves_registry_unchanged() {
        let mut reg = SliceRegistry::new();
        reg.register(slice("comcast", 1, &["h1", "h3"])).unwrap();
        let err = reg.register(slice("verizon", 1, &["h2", "h4"])).unwrap_err();
        assert!(matches!(err, Error::DuplicateQueueId(1, ref owner) if owner == "comcast"));
        assert_eq!(reg.len(), 1);
        assert!(reg.get("comcast").is_some());
        assert!(reg.get("verizon").is_none());
        assert_eq!(reg.owner_of("h2"), None);
        // the corrected registration goes through
        reg.register(slice("verizon", 2, &["h2", "h4"])).unwrap();
        let names: Vec<_> = reg.all_slices().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["comcast", "verizon"]);
    }

    #[test]
    fn duplicate_name_and_host() {
        let mut reg = SliceRegistry::new();
        reg.register(slice("comcast", 1, &["h1"])).unwrap();
        assert!(matches!(
            reg.register(slice("comcast", 2, &["h2"])),
            Err(Error::DuplicateSliceName(_))
        ));
        match reg.register(slice("verizon", 2, &["h2", "h1"])) {
            Err(Error::HostAlreadyAssigned { host, owner }) => {
                assert_eq!(host, "h1");
                assert_eq!(owner, "comcast");
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(reg.owner_of("h2"), None);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn queue_zero_and_foreign_addresses() {
        let mut reg = SliceRegistry::new();
        assert!(matches!(
            reg.register(slice("a", 0, &["h1"])),
            Err(Error::InvalidQueueId(0))
        ));
        let mut s = slice("a", 1, &["h1"]);
        s.addresses.insert("h2".to_owned(), Ipv4Addr::new(10, 0, 0, 2));
        assert!(matches!(reg.register(s), Err(Error::ForeignAddress { .. })));
        assert!(reg.is_empty());
    }

    #[test]
    fn hosts_of_and_rates() {
        let mut reg = SliceRegistry::new();
        let mut s = slice("comcast", 1, &["h3", "h5"]);
        s.rates.insert(Tier::Home, 50.mbps());
        reg.register(s).unwrap();
        let hosts: Vec<_> = reg.hosts_of("comcast").unwrap().iter().cloned().collect();
        assert_eq!(hosts, vec!["h3", "h5"]);
        assert!(matches!(reg.hosts_of("att"), Err(Error::UnknownSlice(_))));
        let s = reg.get("comcast").unwrap();
        assert_eq!(s.rate_on(Tier::Home), Some(50.mbps()));
        assert_eq!(s.rate_on(Tier::Core), None);
    }

    #[test]
    fn permissions_bits() {
        let p = Permissions::DELEGATE | Permissions::READ | Permissions::WRITE;
        assert_eq!(p, Permissions::ALL);
        assert!(p.contains(Permissions::WRITE));
        assert!(!Permissions::READ.contains(Permissions::WRITE));
        assert!(SwitchScope::NonEdge.admits(false));
        assert!(!SwitchScope::NonEdge.admits(true));
        assert!(SwitchScope::All.admits(true));
    }
}
