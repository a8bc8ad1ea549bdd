use derive_more::Display;

/// Identity of one application on one card
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Display)]
#[display("{serial_number}/{app_name}")]
pub struct CardApp {
    pub serial_number: String,
    pub app_name: String,
}

impl CardApp {
    pub fn new(serial_number: impl Into<String>, app_name: impl Into<String>) -> Self {
        Self {
            serial_number: serial_number.into(),
            app_name: app_name.into(),
        }
    }

    /// An empty identity selects "no particular card"
    pub fn is_empty(&self) -> bool {
        self.serial_number.is_empty() && self.app_name.is_empty()
    }
}

/// How far the agent got in recognizing a card application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Display)]
pub enum CardStatus {
    #[default]
    NoCard,
    CardPresent,
    CardActive,
    CardUsable,
    /// Failed in this snapshot only, re-scanned on the next update
    CardError,
}

/// What the worker thread is busy with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display)]
pub enum Action {
    #[default]
    NoAction,
    UpdateCards,
}
