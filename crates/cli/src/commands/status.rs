//! Status and monitoring commands

use std::sync::Arc;

use colored::Colorize;
use nexum_scd::{AgentConnector, ReaderStatus, ReaderStatusEvent, ScdConfig, Scanner};
use tracing::info;

use crate::utils::{print_card, status_label};

/// Scan all cards once, without starting the worker thread
pub fn status_command(
    config: &ScdConfig,
    details: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut connection = config.connector().connect()?;
    let options = config.scan_options();
    let cards = Scanner::new(connection.as_mut(), &options).update_cardinfo();

    if cards.is_empty() {
        println!("\u{1F50D} No smart card found");
        return Ok(());
    }

    println!("\u{1F50D} Found {} card application(s):", cards.len());
    for card in cards.into_iter().map(Arc::new) {
        print_card(&card, details);
    }
    Ok(())
}

/// Print card changes until interrupted
pub fn watch_command(config: ScdConfig) -> Result<(), Box<dyn std::error::Error>> {
    let status = ReaderStatus::new(config);
    let events = status.subscribe();
    status.start_monitoring()?;
    info!("Watching for card changes, press Ctrl-C to stop");

    for event in events.iter() {
        match event {
            ReaderStatusEvent::CardAdded(id) => {
                println!("\u{2795} {} {}", "added".green(), id);
                if let Some(card) = status.get_card(&id.serial_number, &id.app_name) {
                    print_card(&card, false);
                }
            }
            ReaderStatusEvent::CardChanged(id) => {
                let label = status
                    .get_card(&id.serial_number, &id.app_name)
                    .map(|card| status_label(card.status()))
                    .unwrap_or_default();
                println!("\u{1F504} {} {} {}", "changed".yellow(), id, label);
            }
            ReaderStatusEvent::CardRemoved(id) => {
                println!("\u{2796} {} {}", "removed".red(), id);
            }
            ReaderStatusEvent::FirstCardWithNullPinChanged(serial) if !serial.is_empty() => {
                println!("\u{26A0} Card {} still has its transport PIN", serial);
            }
            ReaderStatusEvent::TransactionFinished => {
                status.dispatch_finished_transactions();
            }
            _ => {}
        }
    }
    Ok(())
}
