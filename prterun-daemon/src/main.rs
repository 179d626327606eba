//! Manual smoke-test harness for `prterun-oob` and `prterun-rmaps`.

mod config;
mod mapper_callbacks;
mod rml;

use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::{Cli, Command, ListenArgs, MapArgs};
use mapper_callbacks::LoggingMapCallbacks;
use prterun_oob::{Reactor, TransportConfig};
use prterun_proc::ProcId;
use prterun_rmaps::{
    AppContext, DensityKnobs, Job, MappingDirective, MappingPolicy, MappingSelector, Node, ObjType,
    ObjectId, Topology,
};
use rml::LoggingRml;

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

/// A synthetic two-package, four-PU-per-package topology, standing in for
/// the hwloc query this crate deliberately does not implement.
struct SyntheticTopology {
    packages: usize,
    npus_per_package: u32,
}

impl Topology for SyntheticTopology {
    fn count_objs(&self, target: ObjType, _cache_level: u32) -> usize {
        match target {
            ObjType::Package => self.packages,
            ObjType::Numa => self.packages,
            ObjType::Core => self.packages * self.npus_per_package as usize,
        }
    }

    fn npus(&self, _target: ObjType, _cache_level: u32, _obj: ObjectId) -> u32 {
        self.npus_per_package
    }

    fn root_obj(&self) -> ObjectId {
        0
    }
}

fn run_map(args: MapArgs) {
    let mut nodes: Vec<Node> = (0..args.nodes)
        .map(|i| {
            let mut node = Node::new(format!("node{}", i), args.slots_per_node);
            if args.policy == "object" {
                node = node.with_topology(Box::new(SyntheticTopology {
                    packages: 2,
                    npus_per_package: 4,
                }));
            }
            node
        })
        .collect();

    let mut directive = MappingDirective::empty();
    if !args.allow_oversubscribe {
        directive.insert(MappingDirective::NO_OVERSUBSCRIBE);
    }
    if args.span {
        directive.insert(MappingDirective::SPAN);
    }

    let selector = match args.policy.as_str() {
        "slot" => MappingSelector::BySlot,
        "node" => MappingSelector::ByNode,
        "object" => MappingSelector::ByObject {
            target: ObjType::Package,
            cache_level: 0,
        },
        other => {
            eprintln!("unknown policy {:?}, expected slot|node|object", other);
            std::process::exit(2);
        }
    };

    let policy = MappingPolicy {
        directive,
        selector,
        density: DensityKnobs::default(),
    };

    let app = AppContext {
        idx: 0,
        app_name: "smoke-test".into(),
        num_procs: args.num_procs,
    };
    let mut job = Job::new(1);
    let mut cb = LoggingMapCallbacks::new(job.job_id);

    match prterun_rmaps::map(&mut job, &app, &mut nodes, &policy, &mut cb) {
        Ok(()) => {
            for node in &nodes {
                println!("{}: {} procs (slots={})", node.name, node.num_procs, node.slots);
            }
            println!("oversubscribed: {}", job.oversubscribed);
        }
        Err(e) => {
            eprintln!("mapping failed: {}", e);
            std::process::exit(1);
        }
    }
}

fn run_listen(args: ListenArgs) {
    let config = TransportConfig {
        local: ProcId::new(args.job_id, args.vpid),
    };
    let mut reactor = Reactor::new(config).expect("failed to create reactor");
    reactor.listen(args.addr).expect("failed to bind listener");
    info!(addr = %args.addr, "listening");

    let mut rml = LoggingRml::default();
    loop {
        if let Err(e) = reactor.turn(&mut rml, Some(Duration::from_secs(1))) {
            tracing::error!(error = %e, "reactor turn failed");
        }
    }
}

fn main() {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Command::Map(args) => run_map(args),
        Command::Listen(args) => run_listen(args),
    }
}
