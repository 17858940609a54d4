use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing_subscriber::EnvFilter;

use mesh_core::{
    CipherContext, EventLoop, FileStatusSink, LoopOutcome, MultiContext, SignalLatch, TunnelKind,
    VirtualAddressPool,
};

use crate::config::{Config, DeviceKind, TransportKind};
use crate::context::PassthroughContext;
use crate::tun_device::LinuxTunDevice;
use crate::transport::UdpTransport;

mod config;
mod constants;
mod context;
mod transport;
mod tun_device;

#[derive(Parser)]
struct Cli {
    /// Sets a custom config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Overrides the listen address from the config file
    #[arg(short, long, value_name = "ADDR")]
    listen: Option<SocketAddr>,

    /// Enables verbose output on STDOUT
    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut cfg = Config::from_file(cli.config.unwrap_or_else(Config::default_path))
        .context("loading configuration")?;
    if let Some(listen) = cli.listen {
        cfg.listen = listen;
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building the tokio runtime")?;

    let local = tokio::task::LocalSet::new();
    runtime.block_on(local.run_until(run(cfg)))
}

async fn run(cfg: Config) -> Result<()> {
    let transport = match cfg.transport {
        TransportKind::Udp => UdpTransport::bind(cfg.listen)
            .await
            .with_context(|| format!("binding UDP socket on {}", cfg.listen))?,
        TransportKind::Tcp => {
            anyhow::bail!("tcp transport has no concrete implementation wired in yet")
        }
    };

    let tunnel_kind = match cfg.device_kind {
        DeviceKind::Tun => TunnelKind::Tun,
        DeviceKind::Tap => TunnelKind::Tap,
    };
    let tun = LinuxTunDevice::open(&cfg.device, tunnel_kind)
        .with_context(|| format!("opening virtual interface {}", cfg.device))?;

    let pool = VirtualAddressPool::new(cfg.pool_network, cfg.pool_netmask);
    let ctx = MultiContext::new(pool, cfg.core_config());

    let signals = SignalLatch::new();
    spawn_signal_listeners(signals.clone()).context("installing signal handlers")?;

    let mut event_loop = EventLoop::new(ctx, transport, tun, signals, |_from| {
        Box::new(PassthroughContext::default()) as Box<dyn CipherContext>
    });

    if let Some(path) = cfg.status_file.clone() {
        event_loop =
            event_loop.with_status_sink(Box::new(FileStatusSink::new(path)), cfg.status_file_version);
    }

    tracing::info!(
        listen = %cfg.listen,
        device = %cfg.device,
        c2c = cfg.enable_c2c,
        "meshgated starting"
    );
    match event_loop.run().await? {
        LoopOutcome::Terminate => tracing::info!("meshgated exiting"),
        LoopOutcome::Restart => tracing::info!("meshgated exiting for hard restart, expecting re-exec by supervisor"),
        LoopOutcome::Continue => unreachable!("run() only returns once draining completes"),
    }
    Ok(())
}

/// Wires the three OS signals the event loop cares about to the shared
/// [`SignalLatch`], spawned as a local task since the latch is `Rc`-backed
/// and the runtime is single-threaded.
fn spawn_signal_listeners(latch: SignalLatch) -> Result<()> {
    let mut term = signal(SignalKind::terminate())?;
    let mut int = signal(SignalKind::interrupt())?;
    let mut hup = signal(SignalKind::hangup())?;
    let mut usr1 = signal(SignalKind::user_defined1())?;

    tokio::task::spawn_local(async move {
        loop {
            tokio::select! {
                Some(()) = term.recv() => latch.request_terminate(),
                Some(()) = int.recv() => latch.request_terminate(),
                Some(()) = hup.recv() => latch.request_reload(),
                Some(()) = usr1.recv() => latch.request_soft_restart(),
                else => break,
            }
        }
    });
    Ok(())
}
