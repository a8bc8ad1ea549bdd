//! Smart card reader status tracking for gpg-agent.
//!
//! This crate talks to `gpg-agent` (and through it to `scdaemon`) over the
//! Assuan protocol, keeps an up-to-date snapshot of the inserted smart card
//! applications and serializes every card operation through one worker
//! thread.
//!
//! The main entry point is [`ReaderStatus`]:
//!
//! ```no_run
//! use nexum_scd::{ReaderStatus, ReaderStatusEvent, ScdConfig};
//!
//! let config = ScdConfig::from_env();
//! let status = ReaderStatus::new(config);
//! let events = status.subscribe();
//! status.start_monitoring()?;
//!
//! for event in events.iter() {
//!     if let ReaderStatusEvent::CardAdded(id) = event {
//!         println!("card inserted: {id}");
//!     }
//! }
//! # Ok::<(), nexum_scd::Error>(())
//! ```

mod config;
mod devinfo;
mod error;
mod events;
mod reader_status;
mod watcher;
mod worker;

pub mod assuan;
pub mod card;
pub mod commands;
pub mod scan;
pub mod types;

pub use assuan::{
    AgentConnection, AgentConnector, AssuanTransaction, DefaultTransaction, SocketConnection,
    SocketConnector,
};
pub use card::{AppCard, Card, CardKind, NetKeyCard, OpenPgpCard, P15Card, PivCard};
pub use commands::{PasswdMode, ScdCommand, WriteCertTransaction};
pub use config::{ScdConfig, WatchMode};
pub use devinfo::DevInfoWatcher;
pub use error::{AgentError, Error, ErrorSource, NotPresentPolicy, Result, code};
pub use events::{EventReceiver, ReaderStatusEvent};
pub use reader_status::{ReaderStatus, TransactionCallback};
pub use scan::{CardApps, KnownKeys, ScanOptions, Scanner};
pub use types::{
    Action, AlgorithmInfo, AppType, CardApp, CardStatus, KeyPairInfo, PinState, StatusLine,
};
pub use watcher::StatusFileWatcher;
pub use worker::{CardChange, diff_cards};
