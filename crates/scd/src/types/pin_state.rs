use derive_more::Display;
use tracing::debug;

/// State of one PIN as reported by `CHV-STATUS`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display)]
pub enum PinState {
    #[default]
    UnknownPinState,
    /// The PIN is still the transport (null) PIN
    NullPin,
    PinBlocked,
    NoPin,
    PinOk,
}

impl PinState {
    /// Map a retry counter to a PIN state
    ///
    /// Negative values are markers: -4 null PIN, -3 blocked, -2 no PIN.
    /// Anything unparseable or any other negative value is unknown.
    pub fn parse(value: &str) -> Self {
        let Ok(counter) = value.trim().parse::<i32>() else {
            debug!("Failed to parse pin state {:?}", value);
            return Self::UnknownPinState;
        };

        match counter {
            -4 => Self::NullPin,
            -3 => Self::PinBlocked,
            -2 => Self::NoPin,
            c if c < 0 => Self::UnknownPinState,
            _ => Self::PinOk,
        }
    }

    /// Parse a whitespace separated `CHV-STATUS` value
    pub fn parse_list(value: &str) -> Vec<Self> {
        value.split_whitespace().map(Self::parse).collect()
    }
}

impl From<&str> for PinState {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}
