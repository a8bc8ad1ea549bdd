//! Assuan client side: transactions, connections and the socket transport

pub mod escape;
mod socket;

use bytes::{Bytes, BytesMut};
use tracing::debug;

use crate::error::AgentError;
use crate::types::StatusLine;

pub use socket::{SocketConnection, SocketConnector};

/// Per-command handler for what the agent sends back
///
/// Every callback returning an error aborts the command: for inquiries the
/// client answers with `CAN`.
pub trait AssuanTransaction: Send {
    /// Called for each decoded `D` line
    fn data(&mut self, _data: &[u8]) -> Result<(), AgentError> {
        Ok(())
    }

    /// Called for each `INQUIRE` line; `None` answers with no data
    fn inquire(&mut self, _keyword: &str, _args: &str) -> Result<Option<Bytes>, AgentError> {
        Ok(None)
    }

    /// Called for each `S` line
    fn status(&mut self, _keyword: &str, _args: &str) -> Result<(), AgentError> {
        Ok(())
    }
}

/// Transaction that collects status lines and data
#[derive(Debug, Default)]
pub struct DefaultTransaction {
    status_lines: Vec<StatusLine>,
    data: BytesMut,
}

impl DefaultTransaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status_lines(&self) -> &[StatusLine] {
        &self.status_lines
    }

    /// Values of all status lines with the given keyword
    pub fn status_values(&self, keyword: &str) -> Vec<String> {
        self.status_lines
            .iter()
            .filter(|line| line.keyword == keyword)
            .map(|line| line.value.clone())
            .collect()
    }

    /// Value of the first status line with the given keyword
    pub fn first_status(&self, keyword: &str) -> Option<&str> {
        self.status_lines
            .iter()
            .find(|line| line.keyword == keyword)
            .map(|line| line.value.as_str())
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_parts(self) -> (Vec<StatusLine>, Bytes) {
        (self.status_lines, self.data.freeze())
    }
}

impl AssuanTransaction for DefaultTransaction {
    fn data(&mut self, data: &[u8]) -> Result<(), AgentError> {
        self.data.extend_from_slice(data);
        Ok(())
    }

    fn status(&mut self, keyword: &str, args: &str) -> Result<(), AgentError> {
        self.status_lines.push(StatusLine::new(keyword, args));
        Ok(())
    }
}

/// One open connection to the agent
pub trait AgentConnection: Send {
    /// Run a single command, feeding the response to `transaction`
    fn transact(
        &mut self,
        command: &str,
        transaction: &mut dyn AssuanTransaction,
    ) -> Result<(), AgentError>;

    /// Handle that aborts a blocking [`transact`](Self::transact) from another thread
    fn cancel_handle(&self) -> Option<CancelHandle> {
        None
    }
}

/// Aborts the I/O of the connection it was taken from
pub struct CancelHandle(Box<dyn Fn() + Send + Sync>);

impl CancelHandle {
    pub fn new(cancel: impl Fn() + Send + Sync + 'static) -> Self {
        Self(Box::new(cancel))
    }

    pub fn cancel(&self) {
        (self.0)()
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CancelHandle")
    }
}

/// Factory for agent connections
pub trait AgentConnector: Send + Sync {
    fn connect(&self) -> Result<Box<dyn AgentConnection>, AgentError>;
}

impl<F> AgentConnector for F
where
    F: Fn() -> Result<Box<dyn AgentConnection>, AgentError> + Send + Sync,
{
    fn connect(&self) -> Result<Box<dyn AgentConnection>, AgentError> {
        self()
    }
}

/// Run a command with a [`DefaultTransaction`] and return it
pub fn transact(
    connection: &mut dyn AgentConnection,
    command: &str,
) -> Result<DefaultTransaction, AgentError> {
    debug!("transact({})", command);
    let mut transaction = DefaultTransaction::new();
    connection
        .transact(command, &mut transaction)
        .inspect_err(|e| debug!("transact({}): {}", command, e))?;
    Ok(transaction)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_transaction() {
        let mut t = DefaultTransaction::new();
        t.status("SERIALNO", "D2760001240103040006123456780000 openpgp")
            .unwrap();
        t.status("KEYPAIRINFO", "AAAA OPENPGP.1").unwrap();
        t.status("KEYPAIRINFO", "BBBB OPENPGP.2").unwrap();
        AssuanTransaction::data(&mut t, b"abc").unwrap();
        AssuanTransaction::data(&mut t, b"def").unwrap();

        assert_eq!(t.status_values("KEYPAIRINFO").len(), 2);
        assert_eq!(
            t.first_status("SERIALNO"),
            Some("D2760001240103040006123456780000 openpgp")
        );
        assert_eq!(t.first_status("MANUFACTURER"), None);
        assert_eq!(t.data(), b"abcdef");

        let (lines, data) = t.into_parts();
        assert_eq!(lines.len(), 3);
        assert_eq!(&data[..], b"abcdef");
    }
}
