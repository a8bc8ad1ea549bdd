//! Commands that change a card, queued through the reader status worker

use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use colored::Colorize;
use nexum_scd::{
    AgentError, AssuanTransaction, CardApp, PasswdMode, ReaderStatus, ReaderStatusEvent,
    ScdCommand, ScdConfig, WatchMode, WriteCertTransaction,
};
use parking_lot::Mutex;
use tracing::debug;

/// Prints everything the agent sends back
struct PrintingTransaction;

impl AssuanTransaction for PrintingTransaction {
    fn data(&mut self, data: &[u8]) -> Result<(), AgentError> {
        let mut stdout = io::stdout();
        let _ = stdout.write_all(data);
        let _ = stdout.flush();
        Ok(())
    }

    fn inquire(&mut self, keyword: &str, _args: &str) -> Result<Option<Bytes>, AgentError> {
        debug!("Not answering inquiry {}", keyword);
        Ok(None)
    }

    fn status(&mut self, keyword: &str, args: &str) -> Result<(), AgentError> {
        println!("{} {}", keyword.bold(), args);
        Ok(())
    }
}

/// Queue one command and wait for its outcome
fn run_transaction(
    config: ScdConfig,
    card_app: &CardApp,
    command: &str,
    transaction: Box<dyn AssuanTransaction>,
) -> Result<(), Box<dyn std::error::Error>> {
    let status = ReaderStatus::new(config.with_watch_mode(WatchMode::Disabled));
    let events = status.subscribe();
    status.start_monitoring()?;

    let outcome = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&outcome);
    status.start_transaction(
        card_app,
        command,
        move |result| *slot.lock() = Some(result),
        transaction,
    );

    loop {
        match events.recv_timeout(Duration::from_secs(120))? {
            ReaderStatusEvent::TransactionFinished => break,
            event => debug!("{:?}", event),
        }
    }
    status.dispatch_finished_transactions();

    let result = outcome.lock().take();
    match result {
        Some(Ok(())) => Ok(()),
        Some(Err(err)) => Err(err.into()),
        None => Err("The transaction did not report a result".into()),
    }
}

/// Run a raw command and print the response
pub fn exec_command(
    config: ScdConfig,
    card_app: &CardApp,
    command: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    run_transaction(config, card_app, command, Box::new(PrintingTransaction))?;
    println!("{}", "OK".green());
    Ok(())
}

pub fn set_attr_command(
    config: ScdConfig,
    card_app: &CardApp,
    name: String,
    value: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let command = ScdCommand::SetAttr {
        name: name.clone(),
        value: value.into_bytes(),
    };
    run_transaction(config, card_app, &command.to_string(), Box::new(PrintingTransaction))?;
    println!("\u{2705} {} updated", name);
    Ok(())
}

pub fn passwd_command(
    config: ScdConfig,
    card_app: &CardApp,
    key_ref: String,
    reset: bool,
    nullpin: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mode = if reset {
        PasswdMode::Reset
    } else if nullpin {
        PasswdMode::NullPin
    } else {
        PasswdMode::Change
    };
    let command = ScdCommand::Passwd {
        key_ref: key_ref.clone(),
        mode,
    };
    println!("\u{1F511} Follow the PIN entry prompts for {}", key_ref);
    run_transaction(config, card_app, &command.to_string(), Box::new(PrintingTransaction))?;
    println!("\u{2705} PIN {} changed", key_ref);
    Ok(())
}

pub fn genkey_command(
    config: ScdConfig,
    card_app: &CardApp,
    key_ref: String,
    algorithm: Option<String>,
    force: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let command = ScdCommand::GenKey {
        key_ref: key_ref.clone(),
        algorithm,
        force,
    };
    println!("\u{1F510} Generating key {}, this may take a while...", key_ref);
    run_transaction(config, card_app, &command.to_string(), Box::new(PrintingTransaction))?;
    println!("\u{2705} Key {} generated", key_ref);
    Ok(())
}

pub fn write_cert_command(
    config: ScdConfig,
    card_app: &CardApp,
    key_ref: String,
    file: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let certificate = std::fs::read(file)
        .with_context(|| format!("Failed to read certificate from {}", file.display()))?;
    let command = ScdCommand::WriteCert(key_ref.clone());
    run_transaction(
        config,
        card_app,
        &command.to_string(),
        Box::new(WriteCertTransaction::new(certificate)),
    )?;
    println!("\u{2705} Certificate written to {}", key_ref);
    Ok(())
}
