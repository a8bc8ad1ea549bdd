use std::path::PathBuf;

use clap::{ArgAction, Parser};
use nexum_scd::{ScdConfig, WatchMode};
use tracing::debug;

mod commands;
mod utils;

use commands::Commands;

#[derive(Parser)]
#[command(version, about = "Inspect and manage smart cards through gpg-agent")]
struct Cli {
    /// The agent's control socket (default: asks gpgconf)
    #[arg(long, env = "SCD_AGENT_SOCKET", global = true)]
    socket: Option<PathBuf>,

    /// GnuPG home directory
    #[arg(long, env = "GNUPGHOME", global = true)]
    homedir: Option<PathBuf>,

    /// Do not start gpg-agent if it is not running
    #[arg(long, global = true)]
    no_autostart: bool,

    /// Only ask for the current card (for gpg before 2.3)
    #[arg(long, global = true)]
    legacy: bool,

    /// How to notice card changes in `watch`
    #[arg(long = "watch", default_value = "status-files", global = true)]
    watch_mode: WatchMode,

    /// Log more, `-vv` for protocol traces
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn config(&self) -> ScdConfig {
        let mut config = match &self.homedir {
            Some(homedir) => ScdConfig::default().with_gnupg_home(homedir),
            None => ScdConfig::from_env(),
        };
        if let Some(socket) = &self.socket {
            config = config.with_agent_socket(socket);
        }
        config
            .with_autostart(!self.no_autostart)
            .with_multi_app(!self.legacy)
            .with_watch_mode(self.watch_mode)
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(true)
        .init();

    let config = cli.config();
    debug!("Using agent socket {}", config.agent_socket.display());

    match cli.command {
        Commands::Status { details } => commands::status_command(&config, details),
        Commands::Watch => commands::watch_command(config),
        Commands::Exec { card, command } => {
            commands::exec_command(config, &card.card_app(), &command.join(" "))
        }
        Commands::SetAttr { card, name, value } => {
            commands::set_attr_command(config, &card.card_app(), name, value)
        }
        Commands::Passwd {
            card,
            key_ref,
            reset,
            nullpin,
        } => commands::passwd_command(config, &card.card_app(), key_ref, reset, nullpin),
        Commands::GenKey {
            card,
            key_ref,
            algorithm,
            force,
        } => commands::genkey_command(config, &card.card_app(), key_ref, algorithm, force),
        Commands::WriteCert {
            card,
            key_ref,
            file,
        } => commands::write_cert_command(config, &card.card_app(), key_ref, &file),
    }
}
