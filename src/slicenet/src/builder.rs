use std::collections::BTreeMap;
use std::convert::TryFrom;

use serde::{Deserialize, Serialize};
use structopt::StructOpt;

use crate::error::{Error, Result};
use crate::fabric::Fabric;
use crate::ident::IdAllocator;
use crate::link_index::{IndexedLink, LinkIndex};
use crate::topology::{LinkConfig, NodeIx, Node, Role, Tier, Topology};

/// Link parameters per tier. Tiers without an entry get the default config.
pub type TierConfig = BTreeMap<Tier, LinkConfig>;

/// Zones hang off the cores in pairs: A and B under the second core, C and D
/// under the third.
const ZONE_PAIRS: [[char; 2]; 2] = [['A', 'B'], ['C', 'D']];

#[derive(Debug, Clone, StructOpt, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TopoArgs {
    /// Number of homes in each of the four zones
    #[structopt(long = "homes", default_value = "2")]
    pub num_homes_per_zone: i64,
    /// Number of ISP hosts attached to the first core switch
    #[structopt(long = "isps", default_value = "2")]
    pub num_isps: i64,
}

impl std::fmt::Display for TopoArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "homeaccess_{}h_{}isp", self.num_homes_per_zone, self.num_isps)
    }
}

fn check_param(name: &'static str, value: i64) -> Result<usize> {
    usize::try_from(value).map_err(|_| Error::InvalidTopologyParameter { name, value })
}

struct Builder<'a, F: Fabric> {
    fabric: &'a mut F,
    tier_config: &'a TierConfig,
    ids: IdAllocator,
    topo: Topology,
    index: LinkIndex,
}

impl<'a, F: Fabric> Builder<'a, F> {
    fn add_switch(&mut self, label: String, role: Role) -> Result<NodeIx> {
        let (name, dpid) = self.ids.next_switch()?;
        self.fabric.create_switch(&name, dpid)?;
        log::debug!("switch {} dpid {} ({})", name, dpid, label);
        Ok(self.topo.add_node(Node::switch(name, label, dpid, role)))
    }

    fn add_host(&mut self, label: String, role: Role) -> Result<NodeIx> {
        let name = self.ids.next_host()?;
        self.fabric.create_host(&name)?;
        log::debug!("host {} ({})", name, label);
        Ok(self.topo.add_node(Node::host(name, label, role)))
    }

    fn connect(&mut self, a: NodeIx, b: NodeIx) -> Result<()> {
        let tier = Tier::classify(self.topo[a].role, self.topo[b].role).unwrap_or_else(|| {
            panic!("no link tier between {} and {}", self.topo[a], self.topo[b])
        });
        let config = self.tier_config.get(&tier).cloned().unwrap_or_default();
        let (na, nb) = (self.topo[a].name.clone(), self.topo[b].name.clone());

        let ifaces = self.fabric.create_link(&na, &nb, &config)?;
        log::debug!("{} link {} <-> {} via {:?}", tier, na, nb, ifaces);

        let ix = self.topo.add_link(a, b, config, ifaces.clone());
        self.index.insert(IndexedLink {
            ix,
            tier,
            nodes: (na, nb),
            ifaces,
        });
        Ok(())
    }

    /// One aggregation switch with `nhomes` home switches below it, one leaf
    /// host per home.
    fn build_zone(&mut self, zone: char, nhomes: usize) -> Result<NodeIx> {
        let agg = self.add_switch(format!("aggregation-{}", zone), Role::Aggregation)?;
        for i in 1..=nhomes {
            let home = self.add_switch(format!("home-{}{}", zone, i), Role::Home)?;
            self.connect(agg, home)?;
            let host = self.add_host(format!("host-{}{}", zone, i), Role::LeafHost)?;
            self.connect(home, host)?;
        }
        Ok(agg)
    }

    fn populate(&mut self, nhomes: usize, nisps: usize) -> Result<()> {
        let core1 = self.add_switch("core-1".to_owned(), Role::Core)?;
        for i in 1..=nisps {
            let isp = self.add_host(format!("isp-{}", i), Role::Isp)?;
            self.connect(core1, isp)?;
        }

        let mut cores = vec![core1];
        for (k, zones) in ZONE_PAIRS.iter().enumerate() {
            let aggs = zones
                .iter()
                .map(|&zone| self.build_zone(zone, nhomes))
                .collect::<Result<Vec<_>>>()?;
            let core = self.add_switch(format!("core-{}", k + 2), Role::Core)?;
            for agg in aggs {
                self.connect(core, agg)?;
            }
            cores.push(core);
        }

        // close the core triangle
        for i in 0..cores.len() {
            self.connect(cores[i], cores[(i + 1) % cores.len()])?;
        }

        Ok(())
    }
}

/// Build the four-zone home access network and realize it on `fabric`.
///
/// On a fabric failure the fabric is stopped and nothing is returned, so a
/// half-built topology is never handed out.
pub fn build_home_access<F: Fabric>(
    args: &TopoArgs,
    tier_config: &TierConfig,
    fabric: &mut F,
) -> Result<(Topology, LinkIndex)> {
    let nhomes = check_param("num_homes_per_zone", args.num_homes_per_zone)?;
    let nisps = check_param("num_isps", args.num_isps)?;

    let mut builder = Builder {
        fabric,
        tier_config,
        ids: IdAllocator::new(),
        topo: Topology::new(),
        index: LinkIndex::new(),
    };

    if let Err(e) = builder.populate(nhomes, nisps) {
        log::error!("topology construction failed: {}", e);
        if let Err(stop_err) = builder.fabric.stop() {
            log::warn!("failed to stop fabric after error: {}", stop_err);
        }
        return Err(e);
    }

    log::info!(
        "built {}: {} switches, {} hosts, {} links",
        args,
        builder.topo.num_switches(),
        builder.topo.num_hosts(),
        builder.topo.num_links()
    );

    Ok((builder.topo, builder.index))
}
