use std::ops::Index;

use fnv::FnvHashMap as HashMap;
use petgraph::{
    dot::Dot,
    graph::{EdgeIndex, NodeIndex, UnGraph},
};
use serde::{Deserialize, Serialize};

use crate::bandwidth::Bandwidth;

pub type LinkIx = EdgeIndex;
pub type NodeIx = NodeIndex;

/// Link classification. The declaration order is leaf first, which is also
/// the order the allocation engine visits tiers in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Host,
    Home,
    Aggregation,
    Isp,
    Core,
}

impl Tier {
    pub const ALL: [Tier; 5] = [
        Tier::Host,
        Tier::Home,
        Tier::Aggregation,
        Tier::Isp,
        Tier::Core,
    ];

    /// The tier of the links that feed into a link of this tier from below.
    pub fn child(self) -> Option<Tier> {
        match self {
            Tier::Aggregation => Some(Tier::Home),
            Tier::Home => Some(Tier::Host),
            Tier::Host | Tier::Isp | Tier::Core => None,
        }
    }

    /// The tier of a link between two nodes, or `None` if the hierarchy has
    /// no such link.
    pub fn classify(a: Role, b: Role) -> Option<Tier> {
        use Role::*;
        let (hi, lo) = if a.depth() <= b.depth() { (a, b) } else { (b, a) };
        match (hi, lo) {
            (Core, Isp) => Some(Tier::Isp),
            (Core, Core) => Some(Tier::Core),
            (Core, Aggregation) => Some(Tier::Aggregation),
            (Aggregation, Home) => Some(Tier::Home),
            (Home, LeafHost) => Some(Tier::Host),
            _ => None,
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Tier::Host => "host",
            Tier::Home => "home",
            Tier::Aggregation => "aggregation",
            Tier::Isp => "isp",
            Tier::Core => "core",
        };
        f.pad(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    Switch,
    Host,
}

/// The position of a node in the access hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Role {
    Isp,
    Core,
    Aggregation,
    Home,
    LeafHost,
}

impl Role {
    #[inline]
    pub fn kind(self) -> NodeKind {
        match self {
            Role::Isp | Role::LeafHost => NodeKind::Host,
            Role::Core | Role::Aggregation | Role::Home => NodeKind::Switch,
        }
    }

    // 1: core, 2: agg or isp, 3: home, 4: leaf host
    #[inline]
    pub fn depth(self) -> usize {
        match self {
            Role::Core => 1,
            Role::Aggregation | Role::Isp => 2,
            Role::Home => 3,
            Role::LeafHost => 4,
        }
    }
}

/// OpenFlow datapath id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Dpid(pub u64);

impl std::fmt::Display for Dpid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// allocated name, e.g. `s8` or `h3`
    pub name: String,
    /// where the node sits in the hierarchy, e.g. `core-2` or `home-B1`
    pub label: String,
    pub dpid: Option<Dpid>,
    pub role: Role,
}

impl Node {
    #[inline]
    pub fn switch(name: String, label: String, dpid: Dpid, role: Role) -> Node {
        debug_assert_eq!(role.kind(), NodeKind::Switch);
        Node {
            name,
            label,
            dpid: Some(dpid),
            role,
        }
    }

    #[inline]
    pub fn host(name: String, label: String, role: Role) -> Node {
        debug_assert_eq!(role.kind(), NodeKind::Host);
        Node {
            name,
            label,
            dpid: None,
            role,
        }
    }

    #[inline]
    pub fn kind(&self) -> NodeKind {
        self.role.kind()
    }

    #[inline]
    pub fn is_host(&self) -> bool {
        matches!(self.kind(), NodeKind::Host)
    }
}

impl std::fmt::Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.label)
    }
}

/// Per-tier link parameters handed to the fabric runtime. Everything but the
/// bandwidth is passed through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinkConfig {
    /// declared capacity of the link
    #[serde(default)]
    pub bandwidth: Option<Bandwidth>,
    /// e.g. "5ms"
    #[serde(default)]
    pub delay: Option<String>,
    /// loss in percent
    #[serde(default)]
    pub loss: Option<f64>,
    #[serde(default)]
    pub max_queue_size: Option<u32>,
    #[serde(default)]
    pub use_htb: bool,
}

#[derive(Debug, Clone)]
pub struct Link {
    pub tier: Tier,
    pub config: LinkConfig,
    /// interface names, in the (source, target) order of the graph edge
    pub ifaces: (String, String),
}

impl std::fmt::Display for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.config.bandwidth {
            Some(bw) => write!(f, "{} {}", self.tier, bw),
            None => write!(f, "{}", self.tier),
        }
    }
}

/// The switches, hosts and links of the access network.
#[derive(Debug, Default, Clone)]
pub struct Topology {
    graph: UnGraph<Node, Link>,
    node_map: HashMap<String, NodeIx>,
    num_hosts: usize,
}

impl Topology {
    pub fn new() -> Self {
        Default::default()
    }

    #[inline]
    pub fn add_node(&mut self, node: Node) -> NodeIx {
        if node.is_host() {
            self.num_hosts += 1;
        }
        let name = node.name.clone();
        let node_ix = self.graph.add_node(node);
        let old = self.node_map.insert(name.clone(), node_ix);
        assert!(old.is_none(), "repeated key: {}", name);
        node_ix
    }

    /// Connect two existing nodes. The tier is derived from the endpoint roles.
    pub fn add_link(
        &mut self,
        a: NodeIx,
        b: NodeIx,
        config: LinkConfig,
        ifaces: (String, String),
    ) -> LinkIx {
        let tier = Tier::classify(self.graph[a].role, self.graph[b].role).unwrap_or_else(|| {
            panic!(
                "no link tier between {} and {}",
                self.graph[a], self.graph[b]
            )
        });
        self.graph.add_edge(a, b, Link { tier, config, ifaces })
    }

    #[inline]
    pub fn get_node_index(&self, name: &str) -> Option<NodeIx> {
        self.node_map.get(name).copied()
    }

    #[inline]
    pub fn endpoints(&self, ix: LinkIx) -> (NodeIx, NodeIx) {
        self.graph
            .edge_endpoints(ix)
            .unwrap_or_else(|| panic!("invalid index: {:?}", ix))
    }

    /// The deeper endpoint of a hierarchical link, `None` for peer links.
    pub fn lower_endpoint(&self, ix: LinkIx) -> Option<NodeIx> {
        let (a, b) = self.endpoints(ix);
        let (da, db) = (self.graph[a].role.depth(), self.graph[b].role.depth());
        if da > db {
            Some(a)
        } else if db > da {
            Some(b)
        } else {
            None
        }
    }

    /// Links of `tier` that hang below `ix`.
    pub fn downlinks(&self, ix: NodeIx, tier: Tier) -> Vec<LinkIx> {
        let depth = self.graph[ix].role.depth();
        self.graph
            .neighbors(ix)
            .filter(|&n| self.graph[n].role.depth() > depth)
            .filter_map(|n| self.graph.find_edge(ix, n))
            .filter(|&l| self.graph[l].tier == tier)
            .collect()
    }

    pub fn find_link(&self, a: NodeIx, b: NodeIx) -> Option<LinkIx> {
        self.graph.find_edge(a, b)
    }

    pub fn all_nodes(&self) -> impl Iterator<Item = NodeIx> + '_ {
        self.graph.node_indices()
    }

    pub fn switches(&self) -> impl Iterator<Item = &Node> + '_ {
        self.graph.raw_nodes().iter().map(|n| &n.weight).filter(|n| !n.is_host())
    }

    /// A switch with at least one host attached.
    pub fn is_edge_switch(&self, ix: NodeIx) -> bool {
        !self.graph[ix].is_host() && self.graph.neighbors(ix).any(|n| self.graph[n].is_host())
    }

    #[inline]
    pub fn num_hosts(&self) -> usize {
        self.num_hosts
    }

    #[inline]
    pub fn num_switches(&self) -> usize {
        self.graph.node_count() - self.num_hosts
    }

    #[inline]
    pub fn num_links(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn to_dot(&self) -> Dot<&UnGraph<Node, Link>> {
        Dot::with_config(&self.graph, &[])
    }
}

impl Index<NodeIx> for Topology {
    type Output = Node;
    fn index(&self, index: NodeIx) -> &Self::Output {
        &self.graph[index]
    }
}

impl Index<LinkIx> for Topology {
    type Output = Link;
    fn index(&self, index: LinkIx) -> &Self::Output {
        &self.graph[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn switch(t: &mut Topology, n: u64, role: Role) -> NodeIx {
        t.add_node(Node::switch(
            format!("s{}", n),
            format!("{:?}", role),
            Dpid(n),
            role,
        ))
    }

    #[test]
    fn classify_is_symmetric() {
        use Role::*;
        for &a in &[Isp, Core, Aggregation, Home, LeafHost] {
            for &b in &[Isp, Core, Aggregation, Home, LeafHost] {
                assert_eq!(Tier::classify(a, b), Tier::classify(b, a));
            }
        }
        assert_eq!(Tier::classify(Home, Aggregation), Some(Tier::Home));
        assert_eq!(Tier::classify(Core, Home), None);
        assert_eq!(Tier::classify(Isp, LeafHost), None);
    }

    #[test]
    fn edge_switches_and_downlinks() {
        let mut t = Topology::new();
        let core = switch(&mut t, 1, Role::Core);
        let agg = switch(&mut t, 2, Role::Aggregation);
        let home = switch(&mut t, 3, Role::Home);
        let host = t.add_node(Node::host("h1".into(), "host-A1".into(), Role::LeafHost));
        let ifaces = |a: &str, b: &str| (a.to_owned(), b.to_owned());
        let up = t.add_link(core, agg, LinkConfig::default(), ifaces("s1-eth1", "s2-eth1"));
        let mid = t.add_link(agg, home, LinkConfig::default(), ifaces("s2-eth2", "s3-eth1"));
        t.add_link(home, host, LinkConfig::default(), ifaces("s3-eth2", "h1-eth0"));

        assert_eq!(t[up].tier, Tier::Aggregation);
        assert_eq!(t.lower_endpoint(up), Some(agg));
        assert_eq!(t.downlinks(agg, Tier::Home), vec![mid]);
        assert!(t.downlinks(agg, Tier::Aggregation).is_empty());
        assert!(t.is_edge_switch(home));
        assert!(!t.is_edge_switch(agg));
        assert!(!t.is_edge_switch(host));
        assert_eq!(t.num_switches(), 3);
        assert_eq!(t.num_hosts(), 1);
    }

    #[test]
    #[should_panic(expected = "no link tier")]
    fn inconsistent_link_is_rejected() {
        let mut t = Topology::new();
        let core = switch(&mut t, 1, Role::Core);
        let home = switch(&mut t, 2, Role::Home);
        t.add_link(core, home, LinkConfig::default(), ("a".into(), "b".into()));
    }
}
