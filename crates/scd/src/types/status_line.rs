use derive_more::Display;

/// A single `S <KEYWORD> <value>` line received from the agent
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display)]
#[display("{keyword} {value}")]
pub struct StatusLine {
    pub keyword: String,
    pub value: String,
}

impl StatusLine {
    pub fn new(keyword: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            value: value.into(),
        }
    }

    /// Parse the payload of an `S` line, splitting the keyword from its arguments
    pub fn parse(line: &str) -> Self {
        let line = line.trim_start();
        match line.split_once(' ') {
            Some((keyword, value)) => Self::new(keyword, value.trim_start()),
            None => Self::new(line, ""),
        }
    }
}

impl<K: Into<String>, V: Into<String>> From<(K, V)> for StatusLine {
    fn from((keyword, value): (K, V)) -> Self {
        Self::new(keyword, value)
    }
}
