//! switchd orchestration daemon entry point.

use clap::Parser;
use log::info;
use std::process::ExitCode;
use std::sync::Arc;
use switchd_orch_common::{Db, OrchContext, Subject, WarmRestartHelper, WarmRestartState};
use switchd_orchd::asic_channel::AsicChannel;
use switchd_orchd::copp::{CoppOrch, CoppOrchCallbacks};
use switchd_orchd::daemon::{OrchDaemon, OrchDaemonConfig};
use switchd_orchd::debug_counter::{DebugCounterOrch, DebugCounterOrchCallbacks};
use switchd_orchd::kernel::KernelClient;
use switchd_orchd::macsec::{
    MacsecOrch, MkaSessionManager, UnixSocketTransport, WpaSupplicantSpawner,
};
use switchd_orchd::neigh::{NeighOrch, NeighOrchCallbacks};
use switchd_orchd::vlan::VlanOrch;
use switchd_orchd::vxlan::VxlanOrch;

/// switchd orchestration daemon
#[derive(Parser, Debug)]
#[command(name = "orchd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Switch MAC address (otherwise learned from the state tables)
    #[arg(short = 'm', long)]
    mac_address: Option<String>,

    /// Batch size for consumer table operations
    #[arg(short = 'b', long, default_value = "128")]
    batch_size: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Heartbeat interval in milliseconds
    #[arg(long, default_value = "1000")]
    heartbeat_interval: u64,

    /// Periodic timer interval, in heartbeats
    #[arg(long, default_value = "5")]
    timer_beats: u64,

    /// Enable warm boot mode
    #[arg(long)]
    warm_boot: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .init();

    info!("====================================================================");
    info!("starting switchd orchestration daemon");
    info!("====================================================================");
    info!("batch size: {}", args.batch_size);
    info!("heartbeat interval: {}ms", args.heartbeat_interval);
    if args.warm_boot {
        info!("warm boot mode: ENABLED");
    }

    let app_db = Db::new();
    let state_db = Db::new();
    let counter_db = Db::new();
    let asic_db = Db::new();

    let system_mac = match args.mac_address.as_deref().map(str::parse) {
        Some(Ok(mac)) => Some(mac),
        Some(Err(e)) => {
            eprintln!("invalid --mac-address: {}", e);
            return ExitCode::FAILURE;
        }
        None => None,
    };
    let ctx = OrchContext {
        system_mac,
        batch_size: args.batch_size,
        warm_boot_in_progress: args.warm_boot,
    }
    .into_shared();

    let asic = Arc::new(AsicChannel::new(asic_db, counter_db.clone()));
    let restart = WarmRestartHelper::new(state_db.clone(), "orchd");

    let mut port_subject = Subject::new();
    let debug_counter_events = port_subject.attach("debug_counter");

    let vlan_orch = VlanOrch::new(&app_db, &state_db, ctx.clone(), KernelClient::new());
    let mut vxlan_orch = VxlanOrch::new(&app_db, &state_db, ctx.clone(), KernelClient::new());
    let neigh_orch = NeighOrch::new(
        &app_db,
        &state_db,
        ctx.clone(),
        Arc::clone(&asic) as Arc<dyn NeighOrchCallbacks>,
    );
    let copp_orch = CoppOrch::new(
        &app_db,
        &counter_db,
        ctx.clone(),
        Arc::clone(&asic) as Arc<dyn CoppOrchCallbacks>,
    );
    let debug_counter_orch = DebugCounterOrch::new(
        &app_db,
        &counter_db,
        ctx.clone(),
        Arc::clone(&asic) as Arc<dyn DebugCounterOrchCallbacks>,
        debug_counter_events,
    );
    let sessions = MkaSessionManager::new(
        Box::new(WpaSupplicantSpawner::default()),
        Box::new(UnixSocketTransport),
    );
    let macsec_orch = MacsecOrch::new(&app_db, &state_db, ctx.clone(), sessions);

    if args.warm_boot {
        restart.set_state(WarmRestartState::Restoring);
        vxlan_orch.begin_reconciliation().await;
        restart.set_state(WarmRestartState::Restored);
    } else {
        restart.set_state(WarmRestartState::Initialized);
    }

    let daemon_config = OrchDaemonConfig {
        heartbeat_interval_ms: args.heartbeat_interval,
        timer_beats: args.timer_beats,
        warm_boot: args.warm_boot,
    };
    let mut daemon = OrchDaemon::new(daemon_config, ctx, port_subject, &state_db);

    daemon.register_orch(Box::new(vlan_orch));
    daemon.register_orch(Box::new(neigh_orch));
    daemon.register_orch(Box::new(vxlan_orch));
    daemon.register_orch(Box::new(copp_orch));
    daemon.register_orch(Box::new(macsec_orch));
    daemon.register_orch(Box::new(debug_counter_orch));

    if args.warm_boot {
        daemon.prepare_warm_boot();
    }

    tokio::select! {
        _ = daemon.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
        }
    }

    daemon.stop();
    daemon.shutdown().await;
    restart.set_state(WarmRestartState::Reconciled);

    info!("orchd exiting");
    ExitCode::SUCCESS
}
