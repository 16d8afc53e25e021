use std::path::PathBuf;

use structopt::StructOpt;

use slicenet::allocator::compute_plan;
use slicenet::builder::build_home_access;
use slicenet::config::{read_config, set_env_vars, Config};
use slicenet::fabric::{Fabric, VirtualFabric};
use slicenet::flowspace::{FlowSpaceController, FvctlController};
use slicenet::link_index::LinkIndex;
use slicenet::reconcile::{bootstrap_queues, FixedDelay, ReconcileReport, Reconciler};
use slicenet::shaper::{DryRunShaper, TcShaper, TrafficShaper};
use slicenet::slice::SliceRegistry;
use slicenet::topology::Topology;

#[derive(Debug, Clone, StructOpt)]
#[structopt(name = "slicenet", about = "Home access network slicing")]
pub struct Opt {
    /// The configure file
    #[structopt(short = "c", long = "config")]
    pub config: PathBuf,

    /// Register the slices with the flow-space controller
    #[structopt(long)]
    pub fv: bool,

    /// Only log the shaper calls instead of running tc
    #[structopt(long)]
    pub dry_run: bool,

    /// Number of reconciliation workers, overrides the config file
    #[structopt(short = "P", long = "parallel")]
    pub parallel: Option<usize>,

    /// Reconciliation rounds, overrides the config file
    #[structopt(long)]
    pub rounds: Option<usize>,
}

fn main() -> anyhow::Result<()> {
    logging::init_log();

    let opt = Opt::from_args();
    log::info!("Opts: {:#?}", opt);

    log::info!("parsing configuration from file: {:?}", opt.config);
    let mut config = read_config(&opt.config)?;
    if let Some(parallel) = opt.parallel {
        config.reconcile.parallel = parallel;
    }
    if let Some(rounds) = opt.rounds {
        config.reconcile.max_rounds = rounds;
    }
    log::debug!("config: {:#?}", config);

    set_env_vars(&config);

    // 1. build the topology
    let mut fabric = VirtualFabric::new();
    let (topo, index) = build_home_access(&config.topology, &config.links, &mut fabric)?;
    log::debug!("topology:\n{}", topo.to_dot());

    let report = with_fabric(&mut fabric, |fabric| run(&opt, &config, &topo, &index, fabric))?;

    for (tier, s) in report.summary() {
        log::info!(
            "{:>12}: {} applied, {} failed, {} skipped",
            tier,
            s.applied,
            s.failed,
            s.skipped
        );
    }
    for r in report.failures() {
        log::error!(
            "{} {} queue {} rate {}: {:?}",
            r.link,
            r.iface.as_deref().unwrap_or(&r.node),
            r.queue_id,
            r.rate,
            r.outcome
        );
    }

    if !report.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

/// Starts `fabric`, runs `f` on it and stops it again, also when `f` fails.
fn with_fabric<F, T>(
    fabric: &mut F,
    f: impl FnOnce(&mut F) -> anyhow::Result<T>,
) -> anyhow::Result<T>
where
    F: Fabric,
{
    fabric.start()?;
    let result = f(fabric);
    if let Err(e) = fabric.stop() {
        log::warn!("failed to stop the fabric: {}", e);
    }
    result
}

/// Everything that runs on a started fabric.
fn run(
    opt: &Opt,
    config: &Config,
    topo: &Topology,
    index: &LinkIndex,
    fabric: &mut VirtualFabric,
) -> anyhow::Result<ReconcileReport> {
    // 2. slices and their addresses
    let mut registry = SliceRegistry::new();
    for slice in config.slices.iter().cloned() {
        registry.register(slice)?;
    }
    registry.check_hosts(topo)?;
    let naddrs = registry.apply_addresses(fabric)?;
    log::info!("{} slices, {} static addresses", registry.len(), naddrs);

    // 3. flowspace
    if opt.fv {
        let ctrl_config = config
            .controller
            .clone()
            .ok_or_else(|| anyhow::anyhow!("--fv needs a [controller] section"))?;
        let mut ctrl = FvctlController::new(ctrl_config);
        if let Err(e) = ctrl.install_rules(topo, &registry) {
            log::error!("flowspace installation failed: {}", e);
        }
    }

    let shaper: Box<dyn TrafficShaper + Sync> = if opt.dry_run {
        Box::new(DryRunShaper)
    } else {
        let mut tc = TcShaper::new(config.reconcile.sudo);
        if let Some(queues) = &config.queues {
            tc = tc.with_root_rate(queues.max_rate);
        }
        Box::new(tc)
    };

    // 4. queues on the non-edge switches
    if let Some(queues) = &config.queues {
        let missing = config.unconfigured_queues();
        if !missing.is_empty() {
            log::warn!("slice queues without a bootstrap cap: {:?}", missing);
        }
        let report = bootstrap_queues(topo, index, &*shaper, queues.max_rate, &queues.caps());
        log::info!(
            "queues installed on {} interfaces, {} failed",
            report.installed.len(),
            report.failed.len()
        );
    }

    // 5. plan and shape
    let plan = compute_plan(topo, index, &registry, &config.ceilings)?;
    let reconciler = Reconciler::new(index);
    let pacer = FixedDelay(config.reconcile.pace());
    let report = if config.reconcile.parallel > 1 {
        reconciler.apply_parallel(&plan, &*shaper, &pacer, config.reconcile.parallel)?
    } else {
        let policy = config.reconcile.retry_policy();
        reconciler.converge(&plan, &*shaper, &mut pacer.clone(), &policy).report
    };
    Ok(report)
}
