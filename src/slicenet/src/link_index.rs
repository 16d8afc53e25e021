use fnv::FnvHashMap as HashMap;

use crate::error::{Error, Result};
use crate::topology::{LinkIx, Tier};

/// A link as seen by the index: who it connects and through which interfaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedLink {
    pub ix: LinkIx,
    pub tier: Tier,
    pub nodes: (String, String),
    /// `ifaces.0` sits on `nodes.0`, `ifaces.1` on `nodes.1`
    pub ifaces: (String, String),
}

impl IndexedLink {
    pub fn name(&self) -> String {
        format!("{}-{}", self.nodes.0, self.nodes.1)
    }
}

/// Maps node pairs to the interfaces realizing the link between them. Filled
/// by the topology builder while it creates links, read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct LinkIndex {
    links: Vec<IndexedLink>,
    by_pair: HashMap<(String, String), usize>,
    by_tier: HashMap<Tier, Vec<usize>>,
    by_ix: HashMap<LinkIx, usize>,
}

#[inline]
fn pair_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_owned(), b.to_owned())
    } else {
        (b.to_owned(), a.to_owned())
    }
}

impl LinkIndex {
    pub fn new() -> Self {
        Default::default()
    }

    pub(crate) fn insert(&mut self, link: IndexedLink) {
        let pos = self.links.len();
        let key = pair_key(&link.nodes.0, &link.nodes.1);
        let old = self.by_pair.insert(key, pos);
        assert!(old.is_none(), "repeated link: {}", link.name());
        self.by_tier.entry(link.tier).or_default().push(pos);
        self.by_ix.insert(link.ix, pos);
        self.links.push(link);
    }

    pub fn find(&self, a: &str, b: &str) -> Option<&IndexedLink> {
        self.by_pair.get(&pair_key(a, b)).map(|&pos| &self.links[pos])
    }

    /// The interfaces of the link between `a` and `b`, in argument order.
    pub fn endpoints_for(&self, a: &str, b: &str) -> Result<(&str, &str)> {
        let link = self
            .find(a, b)
            .ok_or_else(|| Error::LinkNotFound(a.to_owned(), b.to_owned()))?;
        if link.nodes.0 == a {
            Ok((&link.ifaces.0, &link.ifaces.1))
        } else {
            Ok((&link.ifaces.1, &link.ifaces.0))
        }
    }

    /// Links of one tier in creation order. Call again to restart.
    pub fn links_of_tier(&self, tier: Tier) -> impl Iterator<Item = &IndexedLink> + '_ {
        self.by_tier
            .get(&tier)
            .into_iter()
            .flatten()
            .map(move |&pos| &self.links[pos])
    }

    pub fn get(&self, ix: LinkIx) -> Option<&IndexedLink> {
        self.by_ix.get(&ix).map(|&pos| &self.links[pos])
    }

    pub fn iter(&self) -> std::slice::Iter<'_, IndexedLink> {
        self.links.iter()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.links.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}
