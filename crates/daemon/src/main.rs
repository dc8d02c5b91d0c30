use clap::Parser;

use countersign_daemon::cli::{Args, Command};
use countersign_daemon::service_config::Config;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    match args.command {
        Command::Serve { config } => {
            let config = match Config::load(&config) {
                Ok(config) => config,
                Err(err) => {
                    eprintln!("Error: {err}");
                    std::process::exit(1);
                }
            };
            countersign_daemon::process::spawn_service(&config).await;
        }
        Command::Version => {
            println!("countersign {}", env!("CARGO_PKG_VERSION"));
        }
    }
}
