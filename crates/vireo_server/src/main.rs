//! vireo_server: a length-prefixed request-dispatch server in front of a
//! search/indexing worker pool.
//!
//! Usage:
//!     vireo_server -i 127.0.0.1 -p 9000 -s 4 -u 2 -l /var/log/vireo.log
//!     vireo_server --stdio

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use vireo_logging::Logger;
use vireo_server::dispatch::SearchDispatcher;
use vireo_server::event_loop::{self, EventLoopConfig};
use vireo_server::pool::{WorkerFactory, WorkerPool};
use vireo_server::server::{wake_pipe, OutboundQueue, QueueResponseSink, ServerState};
use vireo_server::signals::spawn_shutdown_watcher;
use vireo_server::workers::EchoSearchWorker;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "vireo_server", version = VERSION, about = "Request-dispatch server for a search/indexing backend")]
struct Args {
    /// Address to bind the TCP listener on
    #[arg(short = 'i', long, default_value = "127.0.0.1")]
    host: String,

    /// Port to bind the TCP listener on
    #[arg(short = 'p', long, default_value_t = 9000)]
    port: u16,

    /// Maximum concurrent search workers
    #[arg(short = 's', long, default_value_t = vireo_server::pool::DEFAULT_MAX_WORKERS_PER_GROUP)]
    searchers: usize,

    /// Maximum concurrent indexer workers, per database
    #[arg(short = 'u', long, default_value_t = vireo_server::pool::DEFAULT_MAX_WORKERS_PER_GROUP)]
    updaters: usize,

    /// Log file path; omit to disable logging
    #[arg(short = 'l', long)]
    logfile: Option<PathBuf>,

    /// Speak the protocol over stdio instead of (or in addition to) TCP
    #[arg(long)]
    stdio: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.searchers == 0 || args.updaters == 0 {
        eprintln!("vireo_server: --searchers and --updaters must be at least 1");
        std::process::exit(1);
    }

    let logger = Arc::new(Logger::new(args.logfile.clone()));
    logger.info(&format!("vireo_server {VERSION} starting"));

    let state = ServerState::new(logger.clone());
    let (wake, wake_receiver) = wake_pipe().context("failed to create wake pipe")?;
    let outbound = OutboundQueue::new();
    let response_sink = Arc::new(QueueResponseSink::new(outbound.clone(), wake.clone()));

    let searchers = args.searchers;
    let updaters = args.updaters;
    let factory: Arc<WorkerFactory> = Arc::new(move |group: &str| {
        Box::new(EchoSearchWorker::new(group.to_string())) as Box<dyn vireo_worker::Worker>
    });

    let group_cap: Arc<vireo_server::pool::GroupCap> = Arc::new(move |group: &str| {
        if group == "search" {
            searchers
        } else {
            updaters
        }
    });
    let pool = WorkerPool::new(group_cap, factory, response_sink.clone(), logger.clone());
    let dispatcher = SearchDispatcher::new(VERSION, pool.clone(), response_sink.clone());

    let _signal_handle = spawn_shutdown_watcher(wake.clone(), state.clone(), logger.clone())
        .context("failed to install signal handlers")?;

    let bind: Option<SocketAddr> = if args.stdio {
        None
    } else {
        Some(format!("{}:{}", args.host, args.port).parse().context("invalid bind address")?)
    };

    let config = EventLoopConfig { stdio: args.stdio, bind };

    let result = event_loop::run(config, wake_receiver, dispatcher, &state, &outbound, &logger);

    pool.stop_and_join_all();

    match result {
        Ok(()) => {
            logger.info("vireo_server shut down cleanly");
            Ok(())
        }
        Err(e) => {
            logger.fatal(&format!("event loop exited with error: {e}"));
            Err(e.into())
        }
    }
}
