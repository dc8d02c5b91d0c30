pub use clap::Parser;

use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "countersign")]
#[command(about = "Signing-metadata proxy multiplexing trust roots", version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the operator and admin servers.
    Serve {
        /// Path to the configuration file.
        #[arg(long)]
        config: PathBuf,
    },
    /// Print the build version.
    Version,
}
