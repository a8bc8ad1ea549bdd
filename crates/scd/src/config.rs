//! Configuration for [`ReaderStatus`](crate::ReaderStatus)

use std::path::{Path, PathBuf};
use std::process::Command;
use std::str::FromStr;
use std::time::Duration;

use tracing::debug;

use crate::assuan::SocketConnector;
use crate::assuan::escape::unescape;
use crate::error::{Error, NotPresentPolicy};
use crate::scan::ScanOptions;

/// How changes of the inserted cards are noticed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WatchMode {
    /// Poll the `reader_*.status` files scdaemon writes into the GnuPG home
    #[default]
    StatusFiles,
    /// Run `SCD DEVINFO --watch` on a second agent connection
    DevInfo,
    /// Only scan when asked to
    Disabled,
}

impl FromStr for WatchMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "status-files" | "files" => Ok(Self::StatusFiles),
            "devinfo" => Ok(Self::DevInfo),
            "disabled" | "none" => Ok(Self::Disabled),
            _ => Err(Error::Config(format!("unknown watch mode {s:?}"))),
        }
    }
}

/// Configuration options for reader status tracking
#[derive(Debug, Clone)]
pub struct ScdConfig {
    /// GnuPG home directory, watched for `reader_*.status` files
    pub gnupg_home: PathBuf,

    /// The agent's control socket
    pub agent_socket: PathBuf,

    /// Start the agent if connecting fails
    pub autostart_agent: bool,

    /// Enumerate all cards and applications (gpg 2.3 and later)
    pub multi_app: bool,

    pub watch_mode: WatchMode,

    /// Delay between a detected change and the triggered update
    pub watch_delay: Duration,

    /// How often the status files are checked
    pub poll_interval: Duration,

    /// How long to wait for the worker thread when shutting down
    pub shutdown_timeout: Duration,

    /// Which errors mean that there is no card
    pub not_present: NotPresentPolicy,
}

impl Default for ScdConfig {
    fn default() -> Self {
        let gnupg_home = default_gnupg_home();
        Self {
            agent_socket: gnupg_home.join("S.gpg-agent"),
            gnupg_home,
            autostart_agent: true,
            multi_app: true,
            watch_mode: WatchMode::StatusFiles,
            watch_delay: Duration::from_millis(100),
            poll_interval: Duration::from_millis(500),
            shutdown_timeout: Duration::from_millis(100),
            not_present: NotPresentPolicy::default(),
        }
    }
}

impl ScdConfig {
    /// Resolve paths the way GnuPG does
    ///
    /// Asks `gpgconf --list-dirs` first and falls back to `$GNUPGHOME` and
    /// `~/.gnupg` if gpgconf is not available.
    pub fn from_env() -> Self {
        let gnupg_home = gpgconf_dir("homedir").unwrap_or_else(default_gnupg_home);
        let agent_socket =
            gpgconf_dir("agent-socket").unwrap_or_else(|| gnupg_home.join("S.gpg-agent"));
        debug!(
            "GnuPG home {}, agent socket {}",
            gnupg_home.display(),
            agent_socket.display()
        );

        Self {
            gnupg_home,
            agent_socket,
            ..Self::default()
        }
    }

    /// Use another GnuPG home; the socket moves along with it
    pub fn with_gnupg_home(mut self, gnupg_home: impl Into<PathBuf>) -> Self {
        self.gnupg_home = gnupg_home.into();
        self.agent_socket = self.gnupg_home.join("S.gpg-agent");
        self
    }

    pub fn with_agent_socket(mut self, agent_socket: impl Into<PathBuf>) -> Self {
        self.agent_socket = agent_socket.into();
        self
    }

    pub const fn with_autostart(mut self, autostart_agent: bool) -> Self {
        self.autostart_agent = autostart_agent;
        self
    }

    pub const fn with_multi_app(mut self, multi_app: bool) -> Self {
        self.multi_app = multi_app;
        self
    }

    pub const fn with_watch_mode(mut self, watch_mode: WatchMode) -> Self {
        self.watch_mode = watch_mode;
        self
    }

    pub const fn with_watch_delay(mut self, watch_delay: Duration) -> Self {
        self.watch_delay = watch_delay;
        self
    }

    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub const fn with_shutdown_timeout(mut self, shutdown_timeout: Duration) -> Self {
        self.shutdown_timeout = shutdown_timeout;
        self
    }

    pub fn with_not_present(mut self, not_present: NotPresentPolicy) -> Self {
        self.not_present = not_present;
        self
    }

    /// Connector for the configured socket
    pub fn connector(&self) -> SocketConnector {
        SocketConnector::new(&self.agent_socket).with_autostart(self.autostart_agent)
    }

    /// Scan options matching this configuration, without a key lookup
    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            not_present: self.not_present.clone(),
            multi_app: self.multi_app,
            known_keys: None,
        }
    }
}

fn default_gnupg_home() -> PathBuf {
    if let Some(home) = std::env::var_os("GNUPGHOME").filter(|home| !home.is_empty()) {
        return PathBuf::from(home);
    }
    std::env::var_os("HOME")
        .map(|home| Path::new(&home).join(".gnupg"))
        .unwrap_or_else(|| PathBuf::from(".gnupg"))
}

/// One entry of `gpgconf --list-dirs`
fn gpgconf_dir(name: &str) -> Option<PathBuf> {
    let output = Command::new("gpgconf")
        .args(["--list-dirs", name])
        .output()
        .inspect_err(|e| debug!("Failed to run gpgconf: {}", e))
        .ok()?;
    if !output.status.success() {
        debug!("gpgconf --list-dirs {} exited with {}", name, output.status);
        return None;
    }
    parse_gpgconf_dir(&output.stdout)
}

/// gpgconf percent-escapes its output, e.g. `:` as `%3a`
fn parse_gpgconf_dir(output: &[u8]) -> Option<PathBuf> {
    let line = output.split(|&b| b == b'\n').next()?;
    if line.is_empty() {
        return None;
    }
    let path = String::from_utf8(unescape(line)).ok()?;
    Some(PathBuf::from(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ScdConfig::default().with_gnupg_home("/tmp/gnupg");
        assert_eq!(config.agent_socket, Path::new("/tmp/gnupg/S.gpg-agent"));
        assert_eq!(config.watch_delay, Duration::from_millis(100));
        assert_eq!(config.shutdown_timeout, Duration::from_millis(100));
        assert!(config.multi_app);
        assert_eq!(config.watch_mode, WatchMode::StatusFiles);
    }

    #[test]
    fn test_parse_gpgconf_dir() {
        assert_eq!(
            parse_gpgconf_dir(b"/run/user/1000/gnupg/S.gpg-agent\n"),
            Some(PathBuf::from("/run/user/1000/gnupg/S.gpg-agent"))
        );
        assert_eq!(
            parse_gpgconf_dir(b"C%3a\\Users\\gnupg\n"),
            Some(PathBuf::from("C:\\Users\\gnupg"))
        );
        assert_eq!(parse_gpgconf_dir(b""), None);
    }

    #[test]
    fn test_watch_mode_from_str() {
        assert_eq!("devinfo".parse::<WatchMode>().unwrap(), WatchMode::DevInfo);
        assert_eq!("Disabled".parse::<WatchMode>().unwrap(), WatchMode::Disabled);
        assert!("inotify".parse::<WatchMode>().is_err());
    }
}
