use std::io::{BufRead, BufReader, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, trace, warn};

use super::escape::{escape_data, unescape};
use super::{AgentConnection, AgentConnector, AssuanTransaction, CancelHandle};
use crate::error::{AgentError, ErrorSource, code};
use crate::types::StatusLine;

/// Longest line the Assuan protocol allows, including the newline
const LINE_LENGTH: usize = 1000;

/// Assuan client connection over the agent's Unix domain socket
#[derive(Debug)]
pub struct SocketConnection {
    reader: BufReader<UnixStream>,
    writer: UnixStream,
}

impl SocketConnection {
    /// Connect to the socket and consume the server greeting
    pub fn connect(path: &Path) -> Result<Self, AgentError> {
        debug!("Connecting to agent socket {}", path.display());
        let stream = UnixStream::connect(path)
            .map_err(|e| AgentError::io(code::ASS_CONNECT_FAILED, &e))?;
        let writer = stream
            .try_clone()
            .map_err(|e| AgentError::io(code::ASS_CONNECT_FAILED, &e))?;

        let mut connection = Self {
            reader: BufReader::new(stream),
            writer,
        };

        loop {
            let line = connection.read_line()?;
            match Response::parse(&line) {
                Response::Ok(greeting) => {
                    trace!("Agent greeting: {}", greeting);
                    return Ok(connection);
                }
                Response::Comment => continue,
                Response::Err(err) => return Err(err),
                _ => {
                    return Err(AgentError::new(ErrorSource::User1, code::ASS_INV_RESPONSE)
                        .with_description("Unexpected greeting from agent"));
                }
            }
        }
    }

    fn read_line(&mut self) -> Result<Vec<u8>, AgentError> {
        let mut line = Vec::new();
        let read = self
            .reader
            .read_until(b'\n', &mut line)
            .map_err(|e| AgentError::io(code::ASS_READ_ERROR, &e))?;
        if read == 0 {
            return Err(AgentError::new(ErrorSource::User1, code::ASS_READ_ERROR)
                .with_description("Connection closed by agent"));
        }
        if line.last() == Some(&b'\n') {
            line.pop();
        }
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        trace!("<- {}", String::from_utf8_lossy(&line));
        Ok(line)
    }

    fn write_line(&mut self, line: &[u8]) -> Result<(), AgentError> {
        trace!("-> {}", String::from_utf8_lossy(line));
        self.writer
            .write_all(line)
            .and_then(|()| self.writer.write_all(b"\n"))
            .and_then(|()| self.writer.flush())
            .map_err(|e| AgentError::io(code::ASS_WRITE_ERROR, &e))
    }

    /// Send inquired data as `D` lines, splitting at the line length limit
    fn send_data(&mut self, data: &[u8]) -> Result<(), AgentError> {
        let mut line = b"D ".to_vec();
        for &byte in data {
            line.extend_from_slice(&escape_data(&[byte]));
            // leave room for one more escaped byte and the newline
            if line.len() >= LINE_LENGTH - 4 {
                self.write_line(&line)?;
                line.truncate(2);
            }
        }
        if line.len() > 2 {
            self.write_line(&line)?;
        }
        Ok(())
    }

    fn answer_inquiry(
        &mut self,
        keyword: &str,
        args: &str,
        transaction: &mut dyn AssuanTransaction,
    ) -> Result<Option<AgentError>, AgentError> {
        match transaction.inquire(keyword, args) {
            Ok(data) => {
                if let Some(data) = data {
                    self.send_data(&data)?;
                }
                self.write_line(b"END")?;
                Ok(None)
            }
            Err(err) => {
                debug!("Inquiry {} failed: {}", keyword, err);
                self.write_line(b"CAN")?;
                Ok(Some(err))
            }
        }
    }
}

impl AgentConnection for SocketConnection {
    fn transact(
        &mut self,
        command: &str,
        transaction: &mut dyn AssuanTransaction,
    ) -> Result<(), AgentError> {
        if command.contains(['\n', '\r']) || command.len() >= LINE_LENGTH {
            return Err(AgentError::new(ErrorSource::User1, code::ASS_PARAMETER)
                .with_description("Invalid command line"));
        }
        self.write_line(command.as_bytes())?;

        // The first failing callback wins, but the response is always read
        // to the end so the connection stays usable.
        let mut callback_error = None;
        loop {
            let line = self.read_line()?;
            match Response::parse(&line) {
                Response::Ok(_) => return callback_error.map_or(Ok(()), Err),
                Response::Err(err) => return Err(callback_error.unwrap_or(err)),
                Response::Status(status) => {
                    if callback_error.is_none() {
                        callback_error = transaction.status(&status.keyword, &status.value).err();
                    }
                }
                Response::Data(data) => {
                    if callback_error.is_none() {
                        callback_error = transaction.data(&data).err();
                    }
                }
                Response::Inquire(inquiry) => {
                    let failed = self.answer_inquiry(&inquiry.keyword, &inquiry.value, transaction)?;
                    callback_error = callback_error.or(failed);
                }
                Response::Comment => {}
                Response::Invalid => {
                    warn!("Invalid line from agent: {}", String::from_utf8_lossy(&line));
                    return Err(AgentError::new(ErrorSource::User1, code::ASS_INV_RESPONSE));
                }
            }
        }
    }

    fn cancel_handle(&self) -> Option<CancelHandle> {
        let stream = self.writer.try_clone().ok()?;
        Some(CancelHandle::new(move || {
            let _ = stream.shutdown(Shutdown::Both);
        }))
    }
}

impl Drop for SocketConnection {
    fn drop(&mut self) {
        let _ = self.writer.write_all(b"BYE\n");
    }
}

/// One parsed server line
enum Response {
    Ok(String),
    Err(AgentError),
    Status(StatusLine),
    Data(Vec<u8>),
    Inquire(StatusLine),
    Comment,
    Invalid,
}

impl Response {
    fn parse(line: &[u8]) -> Self {
        let (verb, rest) = match line.iter().position(|&b| b == b' ') {
            Some(pos) => (&line[..pos], &line[pos + 1..]),
            None => (line, &[][..]),
        };
        let text = || String::from_utf8_lossy(&unescape(rest)).into_owned();

        match verb {
            b"OK" => Self::Ok(text()),
            b"ERR" => {
                let text = text();
                let (value, description) = text.split_once(' ').unwrap_or((text.as_str(), ""));
                match value.parse::<u32>() {
                    Ok(value) => Self::Err(AgentError::from_value(value, Some(description))),
                    Err(_) => Self::Invalid,
                }
            }
            b"S" => Self::Status(StatusLine::parse(&text())),
            b"D" => Self::Data(unescape(rest)),
            b"INQUIRE" => Self::Inquire(StatusLine::parse(&text())),
            _ if line.first() == Some(&b'#') => Self::Comment,
            _ => Self::Invalid,
        }
    }
}

/// Opens [`SocketConnection`]s, starting the agent on demand
#[derive(Debug, Clone)]
pub struct SocketConnector {
    socket: PathBuf,
    autostart: bool,
}

impl SocketConnector {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
            autostart: true,
        }
    }

    /// Whether to run `gpgconf --launch gpg-agent` when connecting fails
    pub const fn with_autostart(mut self, autostart: bool) -> Self {
        self.autostart = autostart;
        self
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    fn launch_agent() {
        debug!("Launching gpg-agent");
        match Command::new("gpgconf").args(["--launch", "gpg-agent"]).status() {
            Ok(status) if status.success() => {}
            Ok(status) => warn!("gpgconf --launch gpg-agent exited with {}", status),
            Err(e) => warn!("Failed to run gpgconf: {}", e),
        }
    }
}

impl AgentConnector for SocketConnector {
    fn connect(&self) -> Result<Box<dyn AgentConnection>, AgentError> {
        match SocketConnection::connect(&self.socket) {
            Ok(connection) => Ok(Box::new(connection)),
            Err(err) if self.autostart && err.code() == code::ASS_CONNECT_FAILED => {
                debug!("Connecting failed ({}), trying to start the agent", err);
                Self::launch_agent();
                Ok(Box::new(SocketConnection::connect(&self.socket)?))
            }
            Err(err) => Err(err),
        }
    }
}
