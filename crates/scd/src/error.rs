use std::fmt;

use thiserror::Error;

/// Result type for reader status operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for reader status operations
#[derive(Debug, Error)]
pub enum Error {
    /// Error reported by the agent or raised while talking to it
    #[error(transparent)]
    Agent(#[from] AgentError),

    /// I/O errors outside of an agent transaction
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Configuration could not be resolved
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Monitoring already started")]
    AlreadyMonitoring,

    #[error("Failed to spawn thread: {0}")]
    ThreadSpawn(#[source] std::io::Error),
}

/// Well-known gpg-error codes
pub mod code {
    pub const NO_ERROR: u32 = 0;
    pub const GENERAL: u32 = 1;
    pub const NOT_FOUND: u32 = 27;
    pub const INV_ARG: u32 = 45;
    pub const INV_VALUE: u32 = 55;
    pub const NO_DATA: u32 = 58;
    pub const BUG: u32 = 59;
    pub const NOT_SUPPORTED: u32 = 60;
    pub const INTERNAL: u32 = 63;
    pub const NOT_IMPLEMENTED: u32 = 69;
    pub const INV_RESPONSE: u32 = 76;
    pub const BAD_PIN: u32 = 87;
    pub const INV_NAME: u32 = 88;
    pub const WRONG_CARD: u32 = 91;
    pub const CANCELED: u32 = 99;
    pub const CARD: u32 = 108;
    pub const CARD_REMOVED: u32 = 110;
    pub const CARD_NOT_PRESENT: u32 = 112;
    pub const NOT_CONFIRMED: u32 = 114;
    pub const INV_ID: u32 = 118;
    pub const NO_SCDAEMON: u32 = 119;
    pub const SCDAEMON: u32 = 120;
    pub const UNSUPPORTED_OPERATION: u32 = 124;
    pub const PIN_BLOCKED: u32 = 130;

    // Assuan protocol errors
    pub const ASS_GENERAL: u32 = 257;
    pub const ASS_CONNECT_FAILED: u32 = 259;
    pub const ASS_INV_RESPONSE: u32 = 260;
    pub const ASS_READ_ERROR: u32 = 270;
    pub const ASS_WRITE_ERROR: u32 = 271;
    pub const ASS_TOO_MUCH_DATA: u32 = 273;
    pub const ASS_CANCELED: u32 = 277;
    pub const ASS_PARAMETER: u32 = 280;
    pub const ASS_UNKNOWN_INQUIRE: u32 = 281;

    /// Flag marking codes that wrap an errno value
    pub const SYSTEM_ERROR: u32 = 1 << 15;
    pub const ENODEV: u32 = SYSTEM_ERROR | 80;
    pub const EOF: u32 = 16383;
}

/// Component that produced an [`AgentError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorSource {
    Unknown,
    GpgAgent,
    Scd,
    Gpgme,
    /// First user-defined source, used for errors raised by this crate
    User1,
    Other(u8),
}

impl ErrorSource {
    pub const fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::Unknown,
            4 => Self::GpgAgent,
            6 => Self::Scd,
            7 => Self::Gpgme,
            32 => Self::User1,
            other => Self::Other(other),
        }
    }

    pub const fn raw(self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::GpgAgent => 4,
            Self::Scd => 6,
            Self::Gpgme => 7,
            Self::User1 => 32,
            Self::Other(raw) => raw,
        }
    }
}

impl fmt::Display for ErrorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "Unspecified source"),
            Self::GpgAgent => write!(f, "GPG Agent"),
            Self::Scd => write!(f, "SCD"),
            Self::Gpgme => write!(f, "GPGME"),
            Self::User1 => write!(f, "User defined source 1"),
            Self::Other(raw) => write!(f, "source {raw}"),
        }
    }
}

/// Structured error returned by the agent: a packed gpg-error value plus
/// the human readable description from the `ERR` line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentError {
    value: u32,
    description: String,
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}>", self.description, self.error_source())
    }
}

impl std::error::Error for AgentError {}

impl AgentError {
    /// Build an error from a source and code, using the stock description
    pub fn new(source: ErrorSource, code: u32) -> Self {
        Self::from_value(make_value(source, code), None)
    }

    /// Build an error from the packed value of an `ERR` line
    pub fn from_value(value: u32, description: Option<&str>) -> Self {
        let description = match description.map(str::trim) {
            Some(text) if !text.is_empty() => text.to_string(),
            _ => describe(value & 0xFFFF).to_string(),
        };
        Self { value, description }
    }

    /// Attach a custom description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Map a socket level I/O failure onto the matching Assuan code
    pub(crate) fn io(code: u32, err: &std::io::Error) -> Self {
        Self::new(ErrorSource::User1, code).with_description(format!("{}: {err}", describe(code)))
    }

    pub const fn value(&self) -> u32 {
        self.value
    }

    pub const fn code(&self) -> u32 {
        self.value & 0xFFFF
    }

    pub const fn error_source(&self) -> ErrorSource {
        ErrorSource::from_raw(((self.value >> 24) & 0x7F) as u8)
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Whether the code belongs to the Assuan protocol range
    pub const fn is_assuan_error(&self) -> bool {
        let code = self.code();
        code >= code::ASS_GENERAL && code <= code::ASS_UNKNOWN_INQUIRE
    }

    /// Whether the connection that produced this error must not be reused
    pub const fn is_connection_error(&self) -> bool {
        self.is_assuan_error()
    }

    pub const fn is_canceled(&self) -> bool {
        matches!(self.code(), code::CANCELED | code::ASS_CANCELED)
    }
}

const fn make_value(source: ErrorSource, code: u32) -> u32 {
    ((source.raw() as u32 & 0x7F) << 24) | (code & 0xFFFF)
}

fn describe(code: u32) -> &'static str {
    match code {
        code::NO_ERROR => "Success",
        code::GENERAL => "General error",
        code::NOT_FOUND => "Not found",
        code::INV_ARG => "Invalid argument",
        code::INV_VALUE => "Invalid value",
        code::NO_DATA => "No data",
        code::BUG => "Bug",
        code::NOT_SUPPORTED => "Not supported",
        code::INTERNAL => "Internal error",
        code::NOT_IMPLEMENTED => "Not implemented",
        code::INV_RESPONSE => "Invalid response",
        code::BAD_PIN => "Bad PIN",
        code::INV_NAME => "Invalid name",
        code::WRONG_CARD => "Wrong card",
        code::CANCELED => "Operation cancelled",
        code::CARD => "General error reported by smart card",
        code::CARD_REMOVED => "Card removed",
        code::CARD_NOT_PRESENT => "Card not present",
        code::NOT_CONFIRMED => "Not confirmed",
        code::INV_ID => "Invalid ID",
        code::NO_SCDAEMON => "No SmartCard daemon",
        code::SCDAEMON => "SmartCard daemon error",
        code::UNSUPPORTED_OPERATION => "Unsupported operation",
        code::PIN_BLOCKED => "PIN blocked",
        code::ASS_GENERAL => "General IPC error",
        code::ASS_CONNECT_FAILED => "IPC connect call failed",
        code::ASS_INV_RESPONSE => "Invalid response",
        code::ASS_READ_ERROR => "IPC read error",
        code::ASS_WRITE_ERROR => "IPC write error",
        code::ASS_TOO_MUCH_DATA => "Too much data for IPC layer",
        code::ASS_CANCELED => "IPC call has been cancelled",
        code::ASS_PARAMETER => "IPC parameter error",
        code::ASS_UNKNOWN_INQUIRE => "Unknown IPC inquire",
        code::ENODEV => "No such device",
        code::EOF => "End of file",
        _ => "Unknown error code",
    }
}

/// One "card not present" rule: a code, optionally restricted to a source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotPresentRule {
    pub code: u32,
    pub source: Option<ErrorSource>,
}

/// Decides which agent errors mean "there is no card" rather than a failure
///
/// The default matches `CARD_NOT_PRESENT` from any source, and `ENODEV` or
/// `CARD_REMOVED` when they come from scdaemon. Older agents report absence
/// differently, so more rules can be added.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotPresentPolicy {
    rules: Vec<NotPresentRule>,
}

impl Default for NotPresentPolicy {
    fn default() -> Self {
        Self {
            rules: vec![
                NotPresentRule {
                    code: code::CARD_NOT_PRESENT,
                    source: None,
                },
                NotPresentRule {
                    code: code::ENODEV,
                    source: Some(ErrorSource::Scd),
                },
                NotPresentRule {
                    code: code::CARD_REMOVED,
                    source: Some(ErrorSource::Scd),
                },
            ],
        }
    }
}

impl NotPresentPolicy {
    /// A policy that never classifies anything as "not present"
    pub const fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Add a rule to the policy
    pub fn with_rule(mut self, code: u32, source: Option<ErrorSource>) -> Self {
        self.rules.push(NotPresentRule { code, source });
        self
    }

    pub fn rules(&self) -> &[NotPresentRule] {
        &self.rules
    }

    pub fn is_not_present(&self, err: &AgentError) -> bool {
        self.rules.iter().any(|rule| {
            rule.code == err.code()
                && rule
                    .source
                    .is_none_or(|source| source == err.error_source())
        })
    }
}
