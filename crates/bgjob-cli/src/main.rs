mod commands;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use libbgjob::Config;

#[derive(Parser)]
#[command(name = "bgjob", about = "Run shell commands as supervised, encrypted background jobs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a command as a background job
    Start {
        /// The command to run (joined and handed to `sh -c`)
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Stop a job by signalling its process group
    Stop {
        /// Job id (or unique prefix)
        job: String,
    },

    /// List jobs, reconciling recorded status against live pids
    List,

    /// Decrypt and print a job's captured output
    Logs {
        /// Job id (or unique prefix)
        job: String,

        /// Lines to show from the end; 0 or less shows everything
        #[arg(short = 'n', long = "lines", default_value_t = 20)]
        lines: i64,
    },

    /// Send keystroke-style input to a running job
    Send {
        /// Job id (or unique prefix)
        job: String,

        /// Text to send
        text: String,

        /// Do not append a trailing newline
        #[arg(short = 'n', long)]
        no_newline: bool,
    },

    /// Internal: supervise one job (spawned by `start`)
    #[command(hide = true)]
    Supervise {
        #[arg(long)]
        command: String,

        #[arg(long)]
        log_file: PathBuf,

        #[arg(long)]
        input_file: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bgjob=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("bgjob needs a passphrase")?;

    match cli.command {
        Commands::Start { command } => commands::start(&config, &command),
        Commands::Stop { job } => commands::stop(&config, &job),
        Commands::List => commands::list(&config),
        Commands::Logs { job, lines } => commands::logs(&config, &job, lines),
        Commands::Send {
            job,
            text,
            no_newline,
        } => commands::send(&config, &job, &text, no_newline),
        Commands::Supervise {
            command,
            log_file,
            input_file,
        } => commands::supervise(&config, command, log_file, input_file),
    }
}
