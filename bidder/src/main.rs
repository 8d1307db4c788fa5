#![cfg_attr(
    not(test),
    warn(clippy::print_stdout, clippy::dbg_macro),
    deny(clippy::unwrap_used, clippy::expect_used)
)]

use std::{net::IpAddr, path::PathBuf, sync::Arc, time::Duration};

use rama::{
    error::{BoxError, ErrorContext as _},
    graceful,
    net::address::SocketAddress,
    telemetry::tracing::{self, Instrument as _},
};

use clap::Parser;

use crate::{
    bid::BidEndpoint,
    config::{Scenario, TuningArgs, TuningConfig},
    server::bid::BidListener,
};

pub mod bid;
pub mod config;
pub mod server;
pub mod utils;

#[cfg(target_family = "unix")]
#[global_allocator]
static ALLOC: jemallocator::Jemalloc = jemallocator::Jemalloc;

#[cfg(target_os = "windows")]
#[global_allocator]
static ALLOC: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[cfg(test)]
pub mod test;

/// CLI arguments for configuring the stub bidder.
#[derive(Debug, Clone, Parser)]
#[command(name = "stub-bidder")]
#[command(bin_name = "stub-bidder")]
#[command(version, about, long_about = None)]
pub struct Args {
    /// ports to serve the bid endpoint on, one listener per port
    #[arg(
        long,
        env = "PORTS",
        value_name = "PORT,..",
        value_delimiter = ',',
        value_parser = config::parse_port,
        default_value = "9100,9101,9102,9103,9104"
    )]
    pub ports: Vec<u16>,

    /// ip address to bind all listeners to
    #[arg(long, env = "BIND_IP", value_name = "IP", default_value = "0.0.0.0")]
    pub ip: IpAddr,

    /// Scenario to use as base tuning,
    /// manually defined tuning knobs overwrite scenario knobs.
    #[arg(long, env = "SCENARIO")]
    pub scenario: Option<Scenario>,

    #[command(flatten)]
    pub tuning: TuningArgs,

    /// debug logging of bid decisions instead of Info; use RUST_LOG env for more options
    #[arg(long, short = 'v', default_value_t = false)]
    pub verbose: bool,

    /// enable pretty logging (format for humans)
    #[arg(long, default_value_t = false)]
    pub pretty: bool,

    /// directory in which the bound listener addresses are written
    #[arg(long, short = 'D', default_value = ".stub-bidder")]
    pub data: PathBuf,

    /// write the tracing output to the provided (log) file instead of stderr
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,

    #[arg(long, value_name = "SECONDS", default_value_t = 1.)]
    /// the graceful shutdown timeout (<= 0.0 = no timeout)
    pub graceful: f64,

    #[cfg(target_family = "unix")]
    /// Set the limit of max open file descriptors for this process and its children.
    #[arg(long, value_name = "N", default_value_t = 262_144)]
    pub ulimit: utils::os::rlim_t,
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let args = Args::parse();

    utils::telemetry::init_tracing(&args)?;

    #[cfg(target_family = "unix")]
    raise_nofile_limit(args.ulimit)?;

    let base_shutdown_signal = graceful::default_signal();
    if let Err(err) = run_with_args(base_shutdown_signal, args).await {
        eprintln!("🚩 exit with error: {err}");
        std::process::exit(1);
    }

    Ok(())
}

#[cfg(target_family = "unix")]
fn raise_nofile_limit(target: utils::os::rlim_t) -> Result<(), BoxError> {
    let nofile = utils::os::raise_nofile(target).context("set file descriptor limit")?;
    if nofile < target {
        tracing::warn!(
            ulimit.requested = target,
            ulimit.effective = nofile,
            "open file limit caps the number of concurrent bids",
        );
    }
    Ok(())
}

/// Binds all bid listeners and serves them until
/// the (graceful) shutdown has been initiated.
///
/// Invalid tuning and unavailable ports are returned as errors
/// before any listener starts serving.
///
/// This entry point is used by both the (binary) `main` function as well as
/// for the e2e test suite found in the test module.
async fn run_with_args<F>(base_shutdown_signal: F, args: Args) -> Result<(), BoxError>
where
    F: Future<Output: Send + 'static> + Send + 'static,
{
    if args.ports.is_empty() {
        return Err(BoxError::from("at least one listener port is required"));
    }

    let tuning = TuningConfig::try_resolve(args.scenario, args.tuning.clone())
        .context("resolve tuning config")?;
    tracing::info!(
        tuning.min_delay_ms = tuning.min_delay_ms,
        tuning.headroom_ms = tuning.headroom_ms,
        tuning.late_fraction = tuning.late_fraction,
        tuning.late_span_ms = ?tuning.late_span_ms,
        tuning.blob_bytes = tuning.blob_bytes,
        tuning.gzip = tuning.gzip_enabled,
        tuning.fallback_tmax = tuning.fallback_tmax,
        tuning.upstream = %tuning.upstream,
        "bid endpoint tuning resolved"
    );

    tokio::fs::create_dir_all(&args.data)
        .await
        .context("create data directory")
        .with_context_debug_field("path", || args.data.clone())?;
    tracing::info!(path = ?args.data, "data directory ready to be used");

    let graceful_timeout = (args.graceful > 0.).then(|| Duration::from_secs_f64(args.graceful));
    let graceful = graceful::Shutdown::new(base_shutdown_signal);

    // bind all listeners up front: an unavailable port is a startup error
    let mut listeners = Vec::with_capacity(args.ports.len());
    for (index, port) in args.ports.iter().copied().enumerate() {
        let bind = SocketAddress::new(args.ip, port);
        listeners.push(BidListener::bind(graceful.guard(), bind, index, &args.data).await?);
    }

    let endpoint = Arc::new(BidEndpoint::new(&tuning));
    for listener in listeners {
        let endpoint = endpoint.clone();
        graceful.spawn_task_fn(move |_guard| serve_bid_listener(listener, endpoint));
    }

    let delay = match graceful_timeout {
        Some(duration) => graceful.shutdown_with_limit(duration).await?,
        None => graceful.shutdown().await,
    };

    let stats = endpoint.stats();
    tracing::info!(
        bids.responded = stats.responded,
        bids.aborted = stats.aborted,
        "gracefully shutdown with a delay of: {delay:?}"
    );
    Ok(())
}

async fn serve_bid_listener(listener: BidListener, endpoint: Arc<BidEndpoint>) {
    let span = tracing::debug_span!(
        "bid server lifetime",
        server.service.name = utils::env::project_name(),
        server.address = %listener.local_addr(),
        bid.listener = listener.index(),
        otel.kind = "server",
        network.protocol.name = "http",
    );
    listener.serve(endpoint).instrument(span).await;
}
