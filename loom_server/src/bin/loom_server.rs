use anyhow::Context;
use clap::Parser;
use crossbeam_channel::bounded;
use loom_server::config::{default_db_path, DEFAULT_ADDR, DEFAULT_NUM_SHAFTS};
use loom_server::{LoomPort, MainLoop, NetworkThread, ServerConfig};
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "loom_server", about = "Control server for a dobby loom")]
struct Args {
    /// `mock`, or `host:port` of a serial-over-TCP bridge to the loom.
    port: String,

    #[arg(long, default_value = "example")]
    name: String,

    #[arg(long, default_value_t = DEFAULT_NUM_SHAFTS)]
    num_shafts: u32,

    /// Pattern database. Defaults to a file in the temp directory.
    #[arg(long, value_name = "PATH")]
    db_path: Option<PathBuf>,

    /// Delete the pattern database before starting.
    #[arg(long, default_value_t = false)]
    reset_db: bool,

    #[arg(long, short, default_value_t = false)]
    verbose: bool,

    #[arg(long, env = "LOOM_SERVER_ADDR", default_value = DEFAULT_ADDR)]
    addr: String,

    /// Write the bound websocket address here once listening.
    #[arg(long, value_name = "PATH")]
    addr_file: Option<PathBuf>,

    /// Exit after this many milliseconds.
    #[arg(long)]
    run_for_ms: Option<u64>,
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "loom_server=debug,info"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    if args.num_shafts == 0 || args.num_shafts > loom_server::reduce::MAX_SHAFTS {
        anyhow::bail!(
            "--num-shafts must be between 1 and {}",
            loom_server::reduce::MAX_SHAFTS
        );
    }

    let mut config = ServerConfig::new(
        LoomPort::parse(&args.port),
        args.db_path.unwrap_or_else(default_db_path),
    );
    config.loom_name = args.name;
    config.num_shafts = args.num_shafts;
    config.reset_db = args.reset_db;
    config.addr = args.addr;

    let (in_tx, in_rx) = bounded(config.inbound_cap);
    let (out_tx, out_rx) = bounded(config.outbound_cap);

    let mut main_loop = MainLoop::open(&config, in_tx.clone(), in_rx, out_tx)
        .with_context(|| format!("cannot open pattern database {}", config.db_path.display()))?;

    let net = NetworkThread::spawn_with_addr(&config.addr, in_tx, out_rx)
        .with_context(|| format!("cannot listen on {}", config.addr))?;

    if let Some(path) = &args.addr_file {
        fs::write(path, net.listen_addr().to_string())
            .with_context(|| format!("cannot write {}", path.display()))?;
    }

    info!(
        addr = %net.listen_addr(),
        port = %args.port,
        db = %config.db_path.display(),
        "loom_server running"
    );

    let deadline = args
        .run_for_ms
        .map(|ms| Instant::now() + Duration::from_millis(ms));
    main_loop.run(deadline);

    main_loop.shutdown();
    net.shutdown();
    Ok(())
}
