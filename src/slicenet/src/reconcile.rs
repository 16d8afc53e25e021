use std::sync::atomic::{AtomicBool, Ordering::SeqCst};
use std::sync::Arc;
use std::time::Duration;

use rayon::prelude::*;

use crate::allocator::{AllocationPlan, PlanEntry};
use crate::bandwidth::Bandwidth;
use crate::link_index::LinkIndex;
use crate::shaper::TrafficShaper;
use crate::topology::{Tier, Topology};
use crate::QueueId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    Failed(String),
    Skipped(String),
}

/// What happened to one endpoint of one (link, queue) entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyResult {
    pub link: String,
    pub tier: Tier,
    pub node: String,
    /// `None` when the interface could not be resolved
    pub iface: Option<String>,
    pub queue_id: QueueId,
    pub rate: Bandwidth,
    pub outcome: Outcome,
}

impl ApplyResult {
    #[inline]
    pub fn is_applied(&self) -> bool {
        matches!(self.outcome, Outcome::Applied)
    }
}

/// Called between two successive shaper invocations.
pub trait Pacer {
    fn pace(&mut self);
}

impl<F: FnMut()> Pacer for F {
    fn pace(&mut self) {
        self()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoPacing;

impl Pacer for NoPacing {
    fn pace(&mut self) {}
}

#[derive(Debug, Clone, Copy)]
pub struct FixedDelay(pub Duration);

impl Pacer for FixedDelay {
    fn pace(&mut self) {
        std::thread::sleep(self.0);
    }
}

/// Skips the pacer before the very first invocation.
struct Paced<'p, P: Pacer> {
    pacer: &'p mut P,
    started: bool,
}

impl<'p, P: Pacer> Paced<'p, P> {
    fn new(pacer: &'p mut P) -> Self {
        Paced {
            pacer,
            started: false,
        }
    }

    fn tick(&mut self) {
        if self.started {
            self.pacer.pace();
        }
        self.started = true;
    }
}

/// Stops a reconciliation pass between two shaper invocations. Calls that
/// were already issued are not undone.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, SeqCst);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TierSummary {
    pub applied: usize,
    pub failed: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    pub results: Vec<ApplyResult>,
}

impl ReconcileReport {
    /// True when every endpoint was applied.
    pub fn is_success(&self) -> bool {
        self.results.iter().all(ApplyResult::is_applied)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ApplyResult> + '_ {
        self.results.iter().filter(|r| !r.is_applied())
    }

    pub fn summary(&self) -> Vec<(Tier, TierSummary)> {
        utils::algo::group_by_key(self.results.iter(), |r| r.tier)
            .into_iter()
            .map(|(tier, results)| {
                let mut s = TierSummary::default();
                for r in results {
                    match r.outcome {
                        Outcome::Applied => s.applied += 1,
                        Outcome::Failed(_) => s.failed += 1,
                        Outcome::Skipped(_) => s.skipped += 1,
                    }
                }
                (tier, s)
            })
            .collect()
    }
}

/// Retry budget for [`Reconciler::converge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// number of full passes, including the first one
    pub max_rounds: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_rounds: 1,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
        }
    }
}

/// Exponentially growing delays, capped at a maximum.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    backoff: Duration,
    max: Duration,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        ExponentialBackoff {
            backoff: initial,
            max,
        }
    }
}

impl Iterator for ExponentialBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let cur = self.backoff.min(self.max);
        self.backoff = (self.backoff * 2).min(self.max);
        Some(cur)
    }
}

#[derive(Debug, Clone)]
pub struct Convergence {
    /// passes actually run
    pub rounds: usize,
    /// the report of the last pass
    pub report: ReconcileReport,
}

/// Applies allocation plans to live interfaces through a [`TrafficShaper`].
#[derive(Debug, Clone)]
pub struct Reconciler<'a> {
    index: &'a LinkIndex,
    cancel: CancelToken,
}

impl<'a> Reconciler<'a> {
    pub fn new(index: &'a LinkIndex) -> Self {
        Reconciler {
            index,
            cancel: CancelToken::new(),
        }
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    fn apply_entry<S, P, K>(
        &self,
        entry: &PlanEntry,
        shaper: &S,
        paced: &mut Paced<'_, P>,
        sink: &mut K,
    ) where
        S: TrafficShaper + ?Sized,
        P: Pacer,
        K: FnMut(ApplyResult),
    {
        let result = |node: &str, iface: Option<&str>, outcome: Outcome| ApplyResult {
            link: entry.link_name(),
            tier: entry.tier,
            node: node.to_owned(),
            iface: iface.map(|s| s.to_owned()),
            queue_id: entry.queue_id,
            rate: entry.rate,
            outcome,
        };

        let (ia, ib) = match self.index.endpoints_for(&entry.nodes.0, &entry.nodes.1) {
            Ok(ifaces) => ifaces,
            Err(e) => {
                log::error!("plan entry {} queue {}: {}", entry.link_name(), entry.queue_id, e);
                sink(result(&entry.nodes.0, None, Outcome::Skipped(e.to_string())));
                sink(result(&entry.nodes.1, None, Outcome::Skipped(e.to_string())));
                return;
            }
        };

        // the two endpoints are independent, a failure on one does not stop the other
        for (node, iface) in vec![(&entry.nodes.0, ia), (&entry.nodes.1, ib)] {
            if self.cancel.is_cancelled() {
                sink(result(node, Some(iface), Outcome::Skipped("cancelled".to_owned())));
                continue;
            }
            paced.tick();
            // a cancel that arrived while pacing still holds this call back
            if self.cancel.is_cancelled() {
                sink(result(node, Some(iface), Outcome::Skipped("cancelled".to_owned())));
                continue;
            }
            let outcome = match shaper.set_rate(iface, entry.queue_id, entry.rate) {
                Ok(()) => Outcome::Applied,
                Err(e) => {
                    log::warn!(
                        "failed to set {} on {} queue {}: {}",
                        entry.rate,
                        iface,
                        entry.queue_id,
                        e
                    );
                    Outcome::Failed(e.to_string())
                }
            };
            sink(result(node, Some(iface), outcome));
        }
    }

    /// One pass over `plan`, streaming every result into `sink` as soon as it
    /// is known. No entry is retried within the pass.
    pub fn apply_each<S, P, K>(
        &self,
        plan: &AllocationPlan,
        shaper: &S,
        pacer: &mut P,
        mut sink: K,
    ) where
        S: TrafficShaper + ?Sized,
        P: Pacer,
        K: FnMut(ApplyResult),
    {
        let mut paced = Paced::new(pacer);
        for entry in plan.entries() {
            self.apply_entry(entry, shaper, &mut paced, &mut sink);
        }
    }

    pub fn apply<S, P>(&self, plan: &AllocationPlan, shaper: &S, pacer: &mut P) -> ReconcileReport
    where
        S: TrafficShaper + ?Sized,
        P: Pacer,
    {
        let mut report = ReconcileReport::default();
        self.apply_each(plan, shaper, pacer, |r| report.results.push(r));
        report
    }

    /// Like [`apply`](Self::apply) but spreads the entries over `nthreads`
    /// workers. Each worker paces its own invocations with a clone of
    /// `pacer`. Results are not ordered across links.
    pub fn apply_parallel<S, P>(
        &self,
        plan: &AllocationPlan,
        shaper: &S,
        pacer: &P,
        nthreads: usize,
    ) -> Result<ReconcileReport, rayon::ThreadPoolBuildError>
    where
        S: TrafficShaper + Sync + ?Sized,
        P: Pacer + Clone + Send + Sync,
    {
        let entries: Vec<&PlanEntry> = plan.entries().collect();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(nthreads)
            .build()?;

        let results: Vec<Vec<ApplyResult>> = pool.install(|| {
            entries
                .par_iter()
                .map_init(
                    || pacer.clone(),
                    |pacer, entry| {
                        let mut paced = Paced::new(pacer);
                        let mut out = Vec::with_capacity(2);
                        self.apply_entry(entry, shaper, &mut paced, &mut |r| out.push(r));
                        out
                    },
                )
                .collect()
        });

        Ok(ReconcileReport {
            results: results.into_iter().flatten().collect(),
        })
    }

    /// Re-run full passes until one succeeds completely, the round budget is
    /// spent, or the pass is cancelled. Waits with exponential backoff between
    /// passes. A cancel during the wait returns the last completed pass.
    pub fn converge<S, P>(
        &self,
        plan: &AllocationPlan,
        shaper: &S,
        pacer: &mut P,
        policy: &RetryPolicy,
    ) -> Convergence
    where
        S: TrafficShaper + ?Sized,
        P: Pacer,
    {
        let mut backoff = ExponentialBackoff::new(policy.initial_backoff, policy.max_backoff);

        let mut rounds = 0;
        loop {
            let report = self.apply(plan, shaper, pacer);
            rounds += 1;

            let failed = report.failures().count();
            if failed == 0 || rounds >= policy.max_rounds.max(1) || self.cancel.is_cancelled() {
                log::info!("reconciliation finished after {} round(s), {} failed", rounds, failed);
                return Convergence { rounds, report };
            }

            let wait = backoff.next().unwrap_or_default();
            log::warn!(
                "round {}: {} endpoint(s) failed, retrying in {:?}",
                rounds,
                failed,
                wait
            );
            std::thread::sleep(wait);

            if self.cancel.is_cancelled() {
                log::info!(
                    "reconciliation cancelled after {} round(s), {} failed",
                    rounds,
                    failed
                );
                return Convergence { rounds, report };
            }
        }
    }
}

/// Result of [`bootstrap_queues`].
#[derive(Debug, Clone, Default)]
pub struct BootstrapReport {
    pub installed: Vec<String>,
    pub failed: Vec<(String, String)>,
}

/// Install the queue hierarchy on every interface of every non-edge switch.
/// Failures are collected, not fatal.
pub fn bootstrap_queues<S>(
    topo: &Topology,
    index: &LinkIndex,
    shaper: &S,
    max_rate: Bandwidth,
    queues: &[(QueueId, Bandwidth)],
) -> BootstrapReport
where
    S: TrafficShaper + ?Sized,
{
    let mut report = BootstrapReport::default();
    for link in index.iter() {
        let ends = vec![(&link.nodes.0, &link.ifaces.0), (&link.nodes.1, &link.ifaces.1)];
        for (node, iface) in ends {
            let ix = match topo.get_node_index(node) {
                Some(ix) => ix,
                None => continue,
            };
            if topo[ix].is_host() || topo.is_edge_switch(ix) {
                continue;
            }
            match shaper.install_queues(iface, max_rate, queues) {
                Ok(()) => report.installed.push(iface.clone()),
                Err(e) => {
                    log::warn!("failed to install queues on {}: {}", iface, e);
                    report.failed.push((iface.clone(), e.to_string()));
                }
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::{compute_plan, Ceilings};
    use crate::bandwidth::BandwidthTrait;
    use crate::builder::{build_home_access, TierConfig, TopoArgs};
    use crate::fabric::VirtualFabric;
    use crate::shaper::ShaperError;
    use crate::slice::{tests::slice, SliceRegistry};
    use std::sync::Mutex;

    /// Records every call and fails on the listed interfaces.
    #[derive(Default)]
    struct FakeShaper {
        broken: Vec<String>,
        calls: Mutex<Vec<(String, QueueId, Bandwidth)>>,
    }

    impl TrafficShaper for FakeShaper {
        fn set_rate(
            &self,
            iface: &str,
            queue_id: QueueId,
            rate: Bandwidth,
        ) -> Result<(), ShaperError> {
            self.calls.lock().unwrap().push((iface.to_owned(), queue_id, rate));
            if self.broken.iter().any(|b| b == iface) {
                return Err(ShaperError::InterfaceDown(iface.to_owned()));
            }
            Ok(())
        }
    }

    fn setup() -> (Topology, LinkIndex, AllocationPlan) {
        let args = TopoArgs {
            num_homes_per_zone: 1,
            num_isps: 1,
        };
        let (topo, index) =
            build_home_access(&args, &TierConfig::new(), &mut VirtualFabric::new()).unwrap();
        let mut reg = SliceRegistry::new();
        let mut a = slice("comcast", 1, &["h1"]);
        a.rates.insert(Tier::Core, 100.mbps());
        reg.register(a).unwrap();
        let mut b = slice("verizon", 2, &["h2"]);
        b.rates.insert(Tier::Core, 200.mbps());
        reg.register(b).unwrap();
        let plan = compute_plan(&topo, &index, &reg, &Ceilings::new()).unwrap();
        (topo, index, plan)
    }

    #[test]
    fn both_endpoints_of_every_entry_are_shaped() {
        let (_topo, index, plan) = setup();
        let shaper = FakeShaper::default();
        let report = Reconciler::new(&index).apply(&plan, &shaper, &mut NoPacing);
        // 3 core links x 2 queues x 2 endpoints
        assert_eq!(report.results.len(), 12);
        assert!(report.is_success());
        let calls = shaper.calls.lock().unwrap();
        assert!(calls.contains(&("s1-eth2".to_owned(), 1, 100.mbps())));
        assert!(calls.contains(&("s1-eth2".to_owned(), 2, 200.mbps())));
    }

    #[test]
    fn one_failing_endpoint_does_not_block_the_other() {
        let (_topo, index, plan) = setup();
        let (broken, healthy) = index.endpoints_for("s1", "s6").unwrap();
        let shaper = FakeShaper {
            broken: vec![broken.to_owned()],
            ..Default::default()
        };
        let report = Reconciler::new(&index).apply(&plan, &shaper, &mut NoPacing);
        assert_eq!(report.results.len(), 12);
        assert!(!report.is_success());

        let failed: Vec<_> = report.failures().collect();
        assert_eq!(failed.len(), 2);
        assert!(failed.iter().all(|r| {
            r.iface.as_deref() == Some(broken) && matches!(r.outcome, Outcome::Failed(_))
        }));
        let peer_applied = report
            .results
            .iter()
            .filter(|r| r.iface.as_deref() == Some(healthy) && r.is_applied())
            .count();
        assert_eq!(peer_applied, 2);

        let summary = report.summary();
        assert_eq!(
            summary,
            vec![(
                Tier::Core,
                TierSummary {
                    applied: 10,
                    failed: 2,
                    skipped: 0
                }
            )]
        );
    }

    #[test]
    fn pacer_runs_between_invocations() {
        let (_topo, index, plan) = setup();
        let shaper = FakeShaper::default();
        let mut paced = 0;
        let mut pacer = || paced += 1;
        let mut seen = 0;
        Reconciler::new(&index).apply_each(&plan, &shaper, &mut pacer, |_| seen += 1);
        assert_eq!(seen, 12);
        assert_eq!(paced, 11);
    }

    #[test]
    fn cancellation_skips_the_rest() {
        let (_topo, index, plan) = setup();
        let shaper = FakeShaper::default();
        let reconciler = Reconciler::new(&index);
        let token = reconciler.cancel_token().clone();
        let mut issued = 0;
        let mut pacer = || {
            issued += 1;
            if issued == 3 {
                token.cancel();
            }
        };
        let report = reconciler.apply(&plan, &shaper, &mut pacer);
        assert_eq!(report.results.len(), 12);
        // the 3rd pace runs right before the 4th call, which is held back
        let applied = report.results.iter().filter(|r| r.is_applied()).count();
        assert_eq!(applied, 3);
        assert_eq!(shaper.calls.lock().unwrap().len(), 3);
        assert!(report
            .failures()
            .all(|r| r.outcome == Outcome::Skipped("cancelled".to_owned())));
    }

    #[test]
    fn cancel_in_the_first_pacing_gap_stops_the_second_call() {
        let (_topo, index, plan) = setup();
        let shaper = FakeShaper::default();
        let reconciler = Reconciler::new(&index);
        let token = reconciler.cancel_token().clone();
        let mut pacer = || token.cancel();
        let report = reconciler.apply(&plan, &shaper, &mut pacer);
        assert_eq!(shaper.calls.lock().unwrap().len(), 1);
        assert_eq!(report.results.len(), 12);
        assert_eq!(report.results.iter().filter(|r| r.is_applied()).count(), 1);
    }

    #[test]
    fn unknown_link_is_skipped() {
        let (_topo, _index, plan) = setup();
        let other = LinkIndex::new();
        let shaper = FakeShaper::default();
        let report = Reconciler::new(&other).apply(&plan, &shaper, &mut NoPacing);
        assert_eq!(report.results.len(), 12);
        assert!(report
            .results
            .iter()
            .all(|r| r.iface.is_none() && matches!(r.outcome, Outcome::Skipped(_))));
        assert!(shaper.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn parallel_pass_matches_sequential_pass() {
        let (_topo, index, plan) = setup();
        let (broken, _) = index.endpoints_for("s6", "s11").unwrap();
        let shaper = FakeShaper {
            broken: vec![broken.to_owned()],
            ..Default::default()
        };
        let reconciler = Reconciler::new(&index);
        let seq = reconciler.apply(&plan, &shaper, &mut NoPacing);
        let par = reconciler.apply_parallel(&plan, &shaper, &NoPacing, 4).unwrap();
        let mut a = seq.results.clone();
        let mut b = par.results.clone();
        let key = |r: &ApplyResult| (r.link.clone(), r.node.clone(), r.queue_id);
        a.sort_by_key(key);
        b.sort_by_key(key);
        assert_eq!(a, b);
    }

    #[test]
    fn converge_retries_until_budget() {
        let (_topo, index, plan) = setup();
        let (broken, _) = index.endpoints_for("s1", "s6").unwrap();
        let shaper = FakeShaper {
            broken: vec![broken.to_owned()],
            ..Default::default()
        };
        let policy = RetryPolicy {
            max_rounds: 3,
            initial_backoff: Duration::from_millis(0),
            max_backoff: Duration::from_millis(0),
        };
        let c = Reconciler::new(&index).converge(&plan, &shaper, &mut NoPacing, &policy);
        assert_eq!(c.rounds, 3);
        assert_eq!(c.report.failures().count(), 2);
        assert_eq!(shaper.calls.lock().unwrap().len(), 36);

        let healthy = FakeShaper::default();
        let c = Reconciler::new(&index).converge(&plan, &healthy, &mut NoPacing, &policy);
        assert_eq!(c.rounds, 1);
        assert!(c.report.is_success());
    }

    #[test]
    fn cancel_during_backoff_keeps_the_last_pass() {
        let (_topo, index, plan) = setup();
        let (broken, _) = index.endpoints_for("s1", "s6").unwrap();
        let shaper = FakeShaper {
            broken: vec![broken.to_owned()],
            ..Default::default()
        };
        let policy = RetryPolicy {
            max_rounds: 5,
            initial_backoff: Duration::from_millis(400),
            max_backoff: Duration::from_millis(400),
        };
        let reconciler = Reconciler::new(&index);
        let token = reconciler.cancel_token().clone();
        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            token.cancel();
        });
        let c = reconciler.converge(&plan, &shaper, &mut NoPacing, &policy);
        canceller.join().unwrap();

        assert_eq!(c.rounds, 1);
        assert_eq!(shaper.calls.lock().unwrap().len(), 12);
        assert_eq!(c.report.results.len(), 12);
        assert_eq!(c.report.results.iter().filter(|r| r.is_applied()).count(), 10);
        assert!(c
            .report
            .failures()
            .all(|r| matches!(r.outcome, Outcome::Failed(_))));
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let delays: Vec<_> =
            ExponentialBackoff::new(Duration::from_millis(100), Duration::from_millis(500))
                .take(5)
                .collect();
        let ms: Vec<_> = delays.iter().map(|d| d.as_millis()).collect();
        assert_eq!(ms, vec![100, 200, 400, 500, 500]);
    }

    #[derive(Default)]
    struct QueueRecorder {
        ifaces: Mutex<Vec<String>>,
    }

    impl TrafficShaper for QueueRecorder {
        fn set_rate(&self, _: &str, _: QueueId, _: Bandwidth) -> Result<(), ShaperError> {
            Ok(())
        }

        fn install_queues(
            &self,
            iface: &str,
            _max_rate: Bandwidth,
            _queues: &[(QueueId, Bandwidth)],
        ) -> Result<(), ShaperError> {
            self.ifaces.lock().unwrap().push(iface.to_owned());
            Ok(())
        }
    }

    #[test]
    fn queues_go_on_non_edge_switches_only() {
        let (topo, index, _plan) = setup();
        let shaper = QueueRecorder::default();
        let report = bootstrap_queues(&topo, &index, &shaper, 1.gbps(), &[(1, 500.mbps())]);
        assert!(report.failed.is_empty());
        let ifaces = shaper.ifaces.lock().unwrap();
        // s1 has an ISP host and every home switch has a leaf host: both are edge
        assert!(ifaces.iter().all(|i| !i.starts_with("s1-") && !i.starts_with('h')));
        // core-2 (s6) and core-3 (s11) have 2 aggregation + 2 core ports each,
        // the four aggregation switches have 1 uplink + 1 home port each
        assert_eq!(ifaces.len(), 16);
    }
}
