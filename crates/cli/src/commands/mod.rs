use std::path::PathBuf;

use clap::Subcommand;

use crate::utils::CardArgs;

mod card_operations;
mod status;

pub use card_operations::*;
pub use status::*;

/// Define subcommands for the CLI
#[derive(Subcommand)]
pub enum Commands {
    /// Scan all cards once and show what is on them
    Status {
        /// Also show key grips and certificates
        #[arg(short, long)]
        details: bool,
    },

    /// Print card changes as they happen
    Watch,

    /// Run a raw agent command against a card application
    Exec {
        #[command(flatten)]
        card: CardArgs,

        /// The command line, e.g. `SCD GETATTR KEY-FPR`
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Set a card attribute
    SetAttr {
        #[command(flatten)]
        card: CardArgs,

        /// Attribute name, e.g. `DISP-NAME`
        #[arg(required = true)]
        name: String,

        /// New value
        #[arg(required = true)]
        value: String,
    },

    /// Change, reset or set a PIN
    Passwd {
        #[command(flatten)]
        card: CardArgs,

        /// PIN reference, e.g. `OPENPGP.1` or `PIV.80`
        #[arg(required = true)]
        key_ref: String,

        /// Unblock the PIN with the PUK or reset code
        #[arg(long, conflicts_with = "nullpin")]
        reset: bool,

        /// Replace the transport PIN of a NetKey card
        #[arg(long)]
        nullpin: bool,
    },

    /// Generate a key on the card
    #[command(name = "genkey")]
    GenKey {
        #[command(flatten)]
        card: CardArgs,

        /// Key slot, e.g. `OPENPGP.1` or `PIV.9A`
        #[arg(required = true)]
        key_ref: String,

        /// Key algorithm, e.g. `rsa2048` or `nistp256`
        #[arg(long)]
        algorithm: Option<String>,

        /// Overwrite an existing key
        #[arg(long)]
        force: bool,
    },

    /// Store a DER certificate on the card
    WriteCert {
        #[command(flatten)]
        card: CardArgs,

        /// Key slot the certificate belongs to
        #[arg(required = true)]
        key_ref: String,

        /// Path to the DER encoded certificate
        #[arg(short, long, required = true)]
        file: PathBuf,
    },
}
