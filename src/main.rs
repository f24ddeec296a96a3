use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use wbridge::cli::{Cli, Commands, run_ipc_command};
use wbridge::config::SharedConfig;
use wbridge::history::{DEFAULT_HISTORY_MAX, HistoryStore};
use wbridge::host::{HostLoop, MemoryHost, SelectionHost, SystemHost, watch_config_dir};
use wbridge::ipc::dispatch::Dispatcher;
use wbridge::ipc::server::IpcServerHandle;
use wbridge::ipc::UiBridge;
use wbridge::{logging, platform};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Serve => serve().await,
        command => {
            let timeout = Duration::from_secs(cli.timeout.max(1));
            let code = run_ipc_command(command, timeout).await;
            std::process::exit(code);
        }
    }
}

/// Run the bridge application: the host loop owns the selections on this
/// thread, the IPC server runs on its own dedicated thread.
async fn serve() -> anyhow::Result<()> {
    logging::init();
    platform::ensure_dirs()?;

    let config_dir = platform::config_dir();
    let config = Arc::new(SharedConfig::from_dir(&config_dir));
    let settings = config.current().settings.clone();
    let history_max = settings.get_usize("general", "history_max", DEFAULT_HISTORY_MAX);
    let poll_ms = settings.get_u64("general", "poll_interval_ms", 300);
    let history = Arc::new(Mutex::new(HistoryStore::new(history_max)));

    let (bridge, tasks) = UiBridge::channel();
    let dispatcher = Dispatcher::new(history.clone(), config.clone(), bridge);

    // A bind failure leaves the host running without IPC.
    let socket_path = platform::socket_path();
    let mut server = match IpcServerHandle::spawn(socket_path.clone(), dispatcher) {
        Ok(server) => {
            info!("listening on {:?}", socket_path);
            Some(server)
        }
        Err(e) => {
            warn!("ipc server unavailable: {e:#}");
            None
        }
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let flag = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutting down");
                flag.store(true, Ordering::SeqCst);
            }
        });
    }

    let (reload_tx, reload_rx) = std::sync::mpsc::channel();
    let _watcher = watch_config_dir(&config_dir, reload_tx);

    let host: Box<dyn SelectionHost> = match SystemHost::new() {
        Ok(host) => Box::new(host),
        Err(e) => {
            warn!("clipboard backend unavailable ({e}); using in-memory selections");
            Box::new(MemoryHost::default())
        }
    };

    let host_loop = HostLoop::new(host, tasks, history, config, shutdown.clone())
        .with_poll_interval(Duration::from_millis(poll_ms))
        .with_reload(reload_rx);

    // The host loop blocks this thread until shutdown is signalled.
    tokio::task::block_in_place(|| host_loop.run());

    if let Some(server) = server.as_mut() {
        server.stop();
    }
    info!("stopped");
    Ok(())
}
