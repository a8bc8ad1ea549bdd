use derive_more::Display;

/// A key algorithm a card slot can generate, with a display name
#[derive(Debug, Clone, PartialEq, Eq, Display)]
#[display("{display_name}")]
pub struct AlgorithmInfo {
    /// Algorithm name as understood by `SCD GENKEY --algo`
    pub id: String,
    pub display_name: String,
}

impl AlgorithmInfo {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }
}
