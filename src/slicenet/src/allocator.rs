//! Turns per-tier slice guarantees into a per-link, per-queue rate plan.
//!
//! Every slice that declares a rate for a tier gets exactly that rate on every
//! link of the tier. Nothing is scaled or clamped: if the requests do not fit
//! under a link's ceiling, the plan is rejected with
//! [`Error::CapacityExceeded`] and the caller has to change the inputs.
//!
//! Two checks are made:
//! 1. per link, the sum of slice rates on the link fits its ceiling;
//! 2. per hierarchical link, everything requested on the child-tier links
//!    below its lower endpoint fits the link's ceiling, since all of that
//!    traffic is funneled through it.

use std::collections::BTreeMap;

use crate::bandwidth::{self, Bandwidth};
use crate::error::{Error, Result};
use crate::link_index::{IndexedLink, LinkIndex};
use crate::slice::SliceRegistry;
use crate::topology::{LinkIx, Tier, Topology};
use crate::QueueId;

/// Capacity ceiling per tier.
pub type Ceilings = BTreeMap<Tier, Bandwidth>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanEntry {
    pub link: LinkIx,
    pub tier: Tier,
    /// the two endpoint node names, used to resolve interfaces
    pub nodes: (String, String),
    pub queue_id: QueueId,
    pub slice: String,
    pub rate: Bandwidth,
}

impl PlanEntry {
    pub fn link_name(&self) -> String {
        format!("{}-{}", self.nodes.0, self.nodes.1)
    }
}

/// Target rate for each (link, queue). Immutable once computed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllocationPlan {
    entries: BTreeMap<(LinkIx, QueueId), PlanEntry>,
}

impl AllocationPlan {
    pub fn get(&self, link: LinkIx, queue_id: QueueId) -> Option<Bandwidth> {
        self.entries.get(&(link, queue_id)).map(|e| e.rate)
    }

    /// Entries ordered by link, then queue.
    pub fn entries(&self) -> impl Iterator<Item = &PlanEntry> + '_ {
        self.entries.values()
    }

    /// Sum of all queue rates on `link`.
    pub fn load_on(&self, link: LinkIx) -> Bandwidth {
        self.entries
            .range((link, QueueId::MIN)..=(link, QueueId::MAX))
            .map(|(_, e)| e.rate)
            .sum()
    }

    pub fn links(&self) -> impl Iterator<Item = LinkIx> + '_ {
        let mut last = None;
        self.entries.keys().filter_map(move |&(link, _)| {
            if last == Some(link) {
                None
            } else {
                last = Some(link);
                Some(link)
            }
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The smaller of the tier ceiling and the link's declared capacity.
/// `None` means the link is unbounded.
pub fn link_ceiling(topo: &Topology, link: &IndexedLink, ceilings: &Ceilings) -> Option<Bandwidth> {
    let tier_cap = ceilings.get(&link.tier).copied();
    let declared = topo[link.ix].config.bandwidth;
    match (tier_cap, declared) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn check_fits(link: &IndexedLink, requested: Bandwidth, ceiling: Option<Bandwidth>) -> Result<()> {
    match ceiling {
        Some(ceiling) if requested > ceiling => Err(Error::CapacityExceeded {
            link: link.name(),
            tier: link.tier,
            requested,
            ceiling,
        }),
        _ => Ok(()),
    }
}

pub fn compute_plan(
    topo: &Topology,
    index: &LinkIndex,
    slices: &SliceRegistry,
    ceilings: &Ceilings,
) -> Result<AllocationPlan> {
    let mut plan = AllocationPlan::default();

    for &tier in Tier::ALL.iter() {
        for link in index.links_of_tier(tier) {
            let mut load = bandwidth::ZERO;
            for slice in slices.all_slices() {
                let rate = match slice.rate_on(tier) {
                    Some(rate) => rate,
                    None => continue,
                };
                load = load.saturating_add(rate);
                plan.entries.insert(
                    (link.ix, slice.queue_id),
                    PlanEntry {
                        link: link.ix,
                        tier,
                        nodes: link.nodes.clone(),
                        queue_id: slice.queue_id,
                        slice: slice.name.clone(),
                        rate,
                    },
                );
            }
            check_fits(link, load, link_ceiling(topo, link, ceilings))?;
        }
    }

    // all per-link loads are known now, check what funnels into each uplink
    for &tier in Tier::ALL.iter() {
        let child = match tier.child() {
            Some(child) => child,
            None => continue,
        };
        for link in index.links_of_tier(tier) {
            let lower = match topo.lower_endpoint(link.ix) {
                Some(lower) => lower,
                None => continue,
            };
            let funneled: Bandwidth = topo
                .downlinks(lower, child)
                .into_iter()
                .map(|l| plan.load_on(l))
                .sum();
            log::trace!("{} link {}: {} funneled from below", tier, link.name(), funneled);
            check_fits(link, funneled, link_ceiling(topo, link, ceilings))?;
        }
    }

    log::info!(
        "allocation plan: {} queue entries on {} links",
        plan.len(),
        plan.links().count()
    );
    Ok(plan)
}
