use cas_server::ServerBuilder;
use cas_server::config::loader::{DEFAULT_CONFIG_FILE, load_config};
use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "cas-server", version, about = "CAS ticket registry service")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "CAS_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: String,
}

#[tokio::main]
async fn main() {
    // Load .env file if present (before anything else)
    if let Err(e) = dotenvy::dotenv() {
        // Not an error if .env doesn't exist - it's optional
        if !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
        {
            eprintln!("Warning: Failed to load .env file: {e}");
        }
    }

    let cli = Cli::parse();

    // Initialize tracing early with the default level
    cas_server::observability::init_tracing();

    let cfg = match load_config(Some(cli.config.as_str())) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(2);
        }
    };

    tracing::info!(
        path = %cli.config,
        backend = ?cfg.storage.backend,
        "Configuration loaded"
    );
    cas_server::observability::apply_logging_level(&cfg.logging.level);

    let server = match ServerBuilder::new().with_config(cfg).build().await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Server initialization failed: {e:#}");
            std::process::exit(2);
        }
    };

    if let Err(err) = server.run().await {
        eprintln!("Server error: {err:#}");
    }
}
