use clap::{Parser, Subcommand};
use notebook::{LaunchOptions, Mode};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "notebook",
    about = "8085 assembly notebook",
    version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_COMMIT"), ")")
)]
struct Args {
    /// Simulator backend URL. Falls back to user settings if not specified.
    #[arg(long, global = true)]
    backend_url: Option<String>,

    /// Per-request timeout in milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Notebook session file (defaults to the user data directory)
    #[arg(long, global = true)]
    session: Option<PathBuf>,

    /// Log filter, e.g. warn, info, notebook=debug. RUST_LOG takes precedence.
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Import an exported notebook and run all code cells
    Run {
        /// Export file to run
        file: PathBuf,
        /// Print cells with outputs as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check that the simulator backend is reachable
    Health,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .init();

    let options = LaunchOptions {
        backend_url: args.backend_url,
        timeout_ms: args.timeout_ms,
        session_path: args.session,
    };
    let mode = match args.command {
        None => Mode::Repl,
        Some(Commands::Run { file, json }) => Mode::Run { file, json },
        Some(Commands::Health) => Mode::Health,
    };

    notebook::run(options, mode).await
}
