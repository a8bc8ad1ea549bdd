//! Common test utilities: a scripted in-process agent

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use nexum_scd::{
    AgentConnection, AgentConnector, AgentError, AssuanTransaction, ErrorSource, EventReceiver,
    ReaderStatusEvent, StatusLine,
};

pub const OPENPGP_SERIAL: &str = "D2760001240103040006123456780000";
pub const NETKEY_SERIAL: &str = "D27600000000000000000000000000AA";

#[derive(Debug, Clone, Default)]
struct Reply {
    status: Vec<StatusLine>,
    data: Vec<u8>,
    inquire: Option<String>,
    error: Option<AgentError>,
    delay: Option<Duration>,
}

#[derive(Default)]
struct Script {
    replies: HashMap<String, Reply>,
    sent: Vec<String>,
    inquired: Vec<Vec<u8>>,
    connects: usize,
}

/// Agent answering from a table that tests can change at any time
///
/// Commands without a scripted reply succeed without output.
#[derive(Clone, Default)]
pub struct MockAgent {
    script: Arc<Mutex<Script>>,
}

impl MockAgent {
    pub fn new() -> Self {
        Self::default()
    }

    fn reply(&self, command: &str) -> parking_lot::MappedMutexGuard<'_, Reply> {
        parking_lot::MutexGuard::map(self.script.lock(), |script| {
            script.replies.entry(command.to_string()).or_default()
        })
    }

    pub fn status(&self, command: &str, lines: &[(&str, &str)]) -> &Self {
        self.reply(command).status = lines.iter().map(|&(k, v)| StatusLine::new(k, v)).collect();
        self
    }

    pub fn data(&self, command: &str, data: &[u8]) -> &Self {
        self.reply(command).data = data.to_vec();
        self
    }

    pub fn inquire(&self, command: &str, keyword: &str) -> &Self {
        self.reply(command).inquire = Some(keyword.to_string());
        self
    }

    pub fn fail(&self, command: &str, source: ErrorSource, code: u32) -> &Self {
        self.reply(command).error = Some(AgentError::new(source, code));
        self
    }

    pub fn delay(&self, command: &str, delay: Duration) -> &Self {
        self.reply(command).delay = Some(delay);
        self
    }

    /// Drop everything scripted for a command
    pub fn forget(&self, command: &str) -> &Self {
        self.script.lock().replies.remove(command);
        self
    }

    pub fn sent(&self) -> Vec<String> {
        self.script.lock().sent.clone()
    }

    pub fn inquired(&self) -> Vec<Vec<u8>> {
        self.script.lock().inquired.clone()
    }

    pub fn connects(&self) -> usize {
        self.script.lock().connects
    }

    /// One OpenPGP card, optionally next to a PIV application
    pub fn with_openpgp_card(&self, with_piv: bool) -> &Self {
        let apps = if with_piv {
            format!("{OPENPGP_SERIAL} piv openpgp")
        } else {
            format!("{OPENPGP_SERIAL} openpgp")
        };
        self.status("SCD SERIALNO --all", &[("SERIALNO", OPENPGP_SERIAL)])
            .status("SCD GETINFO all_active_apps", &[("SERIALNO", &apps)])
            .status(&format!("SCD SWITCHCARD {OPENPGP_SERIAL}"), &[(
                "SERIALNO",
                OPENPGP_SERIAL,
            )])
            .status("SCD SWITCHAPP openpgp", &[(
                "SERIALNO",
                &format!("{OPENPGP_SERIAL} openpgp"),
            )])
            .status("SCD SWITCHAPP piv", &[("SERIALNO", &format!("{OPENPGP_SERIAL} piv"))])
            .status("SCD LEARN --force", &[
                ("APPVERSION", "0304"),
                ("MANUFACTURER", "6 Yubico"),
                ("DISP-NAME", "Doe<<Jane"),
                ("KEYPAIRINFO", "GRIP1 OPENPGP.1 sc"),
                ("KEYPAIRINFO", "GRIP2 OPENPGP.2 e"),
                ("KEY-FPR", "1 AAAA"),
                ("CHV-STATUS", "+1 127 127 127 3 0 3"),
            ])
            .status("SCD GETATTR $DISPSERIALNO", &[("$DISPSERIALNO", "000612345678")])
    }

    /// One NetKey v3 card with a null PIN
    pub fn with_netkey_card(&self) -> &Self {
        self.status("SCD SERIALNO --all", &[("SERIALNO", NETKEY_SERIAL)])
            .status("SCD GETINFO all_active_apps", &[(
                "SERIALNO",
                &format!("{NETKEY_SERIAL} nks"),
            )])
            .status(&format!("SCD SWITCHCARD {NETKEY_SERIAL}"), &[(
                "SERIALNO",
                NETKEY_SERIAL,
            )])
            .status("SCD SWITCHAPP nks", &[("SERIALNO", &format!("{NETKEY_SERIAL} nks"))])
            .status("SCD GETATTR NKS-VERSION", &[("NKS-VERSION", "3")])
            .status("SCD GETATTR CHV-STATUS", &[("CHV-STATUS", "-4 3 3 3")])
            .status("SCD LEARN --force", &[(
                "KEYPAIRINFO",
                "NKSGRIP NKS-NKS3.4531 sc",
            )])
    }

    /// Make the next full scans find no card at all
    pub fn remove_cards(&self) -> &Self {
        self.forget("SCD SERIALNO --all").fail(
            "SCD SERIALNO --all",
            ErrorSource::Scd,
            nexum_scd::code::CARD_NOT_PRESENT,
        )
    }
}

impl AgentConnector for MockAgent {
    fn connect(&self) -> Result<Box<dyn AgentConnection>, AgentError> {
        self.script.lock().connects += 1;
        Ok(Box::new(MockConnection {
            script: Arc::clone(&self.script),
        }))
    }
}

struct MockConnection {
    script: Arc<Mutex<Script>>,
}

impl AgentConnection for MockConnection {
    fn transact(
        &mut self,
        command: &str,
        transaction: &mut dyn AssuanTransaction,
    ) -> Result<(), AgentError> {
        let reply = {
            let mut script = self.script.lock();
            script.sent.push(command.to_string());
            script.replies.get(command).cloned().unwrap_or_default()
        };

        if let Some(delay) = reply.delay {
            thread::sleep(delay);
        }
        if let Some(keyword) = &reply.inquire {
            let answer = transaction.inquire(keyword, "")?;
            self.script
                .lock()
                .inquired
                .push(answer.map(|data| data.to_vec()).unwrap_or_default());
        }
        for line in &reply.status {
            transaction.status(&line.keyword, &line.value)?;
        }
        if !reply.data.is_empty() {
            transaction.data(&reply.data)?;
        }
        match reply.error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Collect events up to and including the next `UpdateFinished`
pub fn wait_for_update(events: &EventReceiver) -> Vec<ReaderStatusEvent> {
    let mut seen = Vec::new();
    loop {
        let event = events
            .recv_timeout(Duration::from_secs(5))
            .expect("timed out waiting for an update to finish");
        let done = event == ReaderStatusEvent::UpdateFinished;
        seen.push(event);
        if done {
            return seen;
        }
    }
}

/// Wait for the given number of `TransactionFinished` events
pub fn wait_for_transactions(events: &EventReceiver, count: usize) {
    let mut finished = 0;
    while finished < count {
        let event = events
            .recv_timeout(Duration::from_secs(5))
            .expect("timed out waiting for a transaction to finish");
        if event == ReaderStatusEvent::TransactionFinished {
            finished += 1;
        }
    }
}
