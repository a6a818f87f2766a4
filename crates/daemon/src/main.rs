// SPDX-License-Identifier: MIT

//! satcheld: the satchel PIM storage server binary.

use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use satchel_daemon::{config::ServerConfig, lifecycle, ServerContext};

fn init_tracing(config: &ServerConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let Some(log_dir) = config.log_path.parent() else {
        tracing_subscriber::registry().with(filter).with(fmt::layer()).init();
        return None;
    };
    let file_name = config
        .log_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "satcheld.log".to_string());
    let appender = tracing_appender::rolling::never(log_dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_ansi(false).with_writer(writer))
        .init();
    Some(guard)
}

#[tokio::main]
async fn main() {
    let config = match ServerConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("satcheld: {e}");
            std::process::exit(1);
        }
    };
    if let Err(e) = std::fs::create_dir_all(&config.state_dir) {
        eprintln!("satcheld: cannot create state directory: {e}");
        std::process::exit(1);
    }
    let _log_guard = init_tracing(&config);

    let server = match lifecycle::startup(config).await {
        Ok(server) => server,
        Err(e) => {
            error!("startup failed: {e}");
            eprintln!("satcheld: {e}");
            std::process::exit(e.exit_code());
        }
    };

    spawn_signal_handler(&server.context);
    info!("satcheld ready");
    server.run().await;
}

/// SIGINT/SIGTERM trigger the same graceful shutdown the supervisor
/// loss does.
fn spawn_signal_handler(context: &std::sync::Arc<ServerContext>) {
    let shutdown = context.shutdown.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            {
                Ok(term) => term,
                Err(e) => {
                    error!("cannot install SIGTERM handler: {e}");
                    let _ = ctrl_c.await;
                    shutdown.cancel();
                    return;
                }
            };
            tokio::select! {
                _ = ctrl_c => {}
                _ = term.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
        shutdown.cancel();
    });
}
