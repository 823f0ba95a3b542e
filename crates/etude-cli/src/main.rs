use clap::Parser;
use etude_core::{Config, Server};
use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser)]
#[command(name = "etude")]
#[command(about = "Serve static files over HTTP/1.1 from an epoll reactor")]
#[command(version)]
struct Cli {
    /// TCP port to listen on (all interfaces)
    port: u16,
}

fn main() {
    let cli = Cli::parse();

    etude_core::logging::init_logging();
    let config = Config::from_env();

    let server = match Server::bind(cli.port, config) {
        Ok(server) => server,
        Err(e) => {
            tracing::error!("failed to start: {}", e);
            std::process::exit(1);
        }
    };

    let handle = server.shutdown_handle();
    if let Err(e) = ctrlc::set_handler(move || {
        tracing::info!("received termination signal, shutting down");
        handle.shutdown();
    }) {
        tracing::error!("failed to install signal handler: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = server.run() {
        tracing::error!("server stopped with an error: {}", e);
        std::process::exit(1);
    }
}
