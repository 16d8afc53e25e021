//! The runtime that instantiates the topology: switches, hosts and the links
//! between them. The builder drives it through [`Fabric`].

use std::net::Ipv4Addr;

use fnv::FnvHashMap as HashMap;
use thiserror::Error;

use crate::topology::{Dpid, LinkConfig};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FabricError {
    #[error("failed to create switch {0}: {1}")]
    Switch(String, String),
    #[error("failed to create host {0}: {1}")]
    Host(String, String),
    #[error("failed to link {0} and {1}: {2}")]
    Link(String, String, String),
    #[error("unknown node: {0}")]
    UnknownNode(String),
    #[error("fabric runtime: {0}")]
    Runtime(String),
}

pub trait Fabric {
    fn create_switch(&mut self, name: &str, dpid: Dpid) -> Result<(), FabricError>;
    fn create_host(&mut self, name: &str) -> Result<(), FabricError>;
    /// Returns the interface names of the new link at `a` and at `b`.
    fn create_link(
        &mut self,
        a: &str,
        b: &str,
        config: &LinkConfig,
    ) -> Result<(String, String), FabricError>;
    fn set_host_address(&mut self, host: &str, addr: Ipv4Addr) -> Result<(), FabricError>;
    fn start(&mut self) -> Result<(), FabricError>;
    fn stop(&mut self) -> Result<(), FabricError>;
}

#[derive(Debug, Clone)]
struct VirtualNode {
    is_host: bool,
    /// next free port number
    next_port: usize,
    addr: Option<Ipv4Addr>,
}

/// An in-process fabric that only does the bookkeeping: it names interfaces
/// the way mininet does (`s3-eth1`, `h1-eth0`) and remembers host addresses.
#[derive(Debug, Clone, Default)]
pub struct VirtualFabric {
    nodes: HashMap<String, VirtualNode>,
    links: Vec<(String, String, LinkConfig)>,
    running: bool,
}

impl VirtualFabric {
    pub fn new() -> Self {
        Default::default()
    }

    fn add(&mut self, name: &str, is_host: bool) -> bool {
        if self.nodes.contains_key(name) {
            return false;
        }
        // switch ports start at 1, host ports at 0
        let next_port = if is_host { 0 } else { 1 };
        self.nodes.insert(
            name.to_owned(),
            VirtualNode {
                is_host,
                next_port,
                addr: None,
            },
        );
        true
    }

    fn alloc_iface(&mut self, name: &str) -> Result<String, FabricError> {
        let node = self
            .nodes
            .get_mut(name)
            .ok_or_else(|| FabricError::UnknownNode(name.to_owned()))?;
        let iface = format!("{}-eth{}", name, node.next_port);
        node.next_port += 1;
        Ok(iface)
    }

    pub fn address_of(&self, host: &str) -> Option<Ipv4Addr> {
        self.nodes.get(host).and_then(|n| n.addr)
    }

    pub fn num_links(&self) -> usize {
        self.links.len()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }
}

impl Fabric for VirtualFabric {
    fn create_switch(&mut self, name: &str, dpid: Dpid) -> Result<(), FabricError> {
        log::trace!("virtual fabric: switch {} dpid {}", name, dpid);
        if !self.add(name, false) {
            return Err(FabricError::Switch(name.to_owned(), "exists".to_owned()));
        }
        Ok(())
    }

    fn create_host(&mut self, name: &str) -> Result<(), FabricError> {
        log::trace!("virtual fabric: host {}", name);
        if !self.add(name, true) {
            return Err(FabricError::Host(name.to_owned(), "exists".to_owned()));
        }
        Ok(())
    }

    fn create_link(
        &mut self,
        a: &str,
        b: &str,
        config: &LinkConfig,
    ) -> Result<(String, String), FabricError> {
        if !self.nodes.contains_key(a) || !self.nodes.contains_key(b) {
            return Err(FabricError::Link(
                a.to_owned(),
                b.to_owned(),
                "endpoint missing".to_owned(),
            ));
        }
        let ia = self.alloc_iface(a)?;
        let ib = self.alloc_iface(b)?;
        self.links.push((a.to_owned(), b.to_owned(), config.clone()));
        Ok((ia, ib))
    }

    fn set_host_address(&mut self, host: &str, addr: Ipv4Addr) -> Result<(), FabricError> {
        match self.nodes.get_mut(host) {
            Some(node) if node.is_host => {
                node.addr = Some(addr);
                Ok(())
            }
            _ => Err(FabricError::UnknownNode(host.to_owned())),
        }
    }

    fn start(&mut self) -> Result<(), FabricError> {
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), FabricError> {
        self.running = false;
        Ok(())
    }
}
