use std::sync::Arc;

use clap::Args;
use colored::Colorize;
use nexum_scd::{Card, CardApp, CardStatus, PinState};

/// Which card application a command is meant for
#[derive(Args, Debug, Clone)]
pub struct CardArgs {
    /// Card serial number (default: whatever card the agent has selected)
    #[arg(long)]
    pub serial: Option<String>,

    /// Application on the card, e.g. `openpgp` or `piv`
    #[arg(long, requires = "serial")]
    pub app: Option<String>,
}

impl CardArgs {
    pub fn card_app(&self) -> CardApp {
        CardApp::new(
            self.serial.clone().unwrap_or_default(),
            self.app.clone().unwrap_or_default(),
        )
    }
}

pub fn status_label(status: CardStatus) -> String {
    match status {
        CardStatus::CardUsable => "\u{2705} usable".green().to_string(),
        CardStatus::CardActive => "\u{26A0} active".yellow().to_string(),
        CardStatus::CardPresent => "\u{26A0} present".yellow().to_string(),
        CardStatus::CardError => "\u{274C} error".red().to_string(),
        CardStatus::NoCard => "no card".dimmed().to_string(),
    }
}

fn pin_label(state: PinState) -> &'static str {
    match state {
        PinState::PinOk => "ok",
        PinState::NullPin => "null PIN",
        PinState::PinBlocked => "blocked",
        PinState::NoPin => "no PIN",
        PinState::UnknownPinState => "unknown",
    }
}

/// Print one card application
pub fn print_card(card: &Arc<Card>, details: bool) {
    println!(
        "\n\u{1F4B3} {} {} ({})",
        card.display_app_name().bold(),
        card.display_serial_number(),
        status_label(card.status())
    );
    if !card.error_msg().is_empty() {
        println!("  {}", card.error_msg().red());
    }
    if card.app_version() > 0 {
        println!("  Version: {}", card.display_app_version());
    }
    if !card.card_type().is_empty() {
        println!("  Card type: {} {}", card.card_type(), card.display_card_version());
    }
    if !card.manufacturer().is_empty() {
        println!("  Manufacturer: {}", card.manufacturer());
    }
    if !card.card_holder().is_empty() {
        println!("  Card holder: {}", card.card_holder());
    }

    let labels = card.pin_labels();
    for (index, state) in card.pin_states().iter().enumerate() {
        let label = labels.get(index).map_or("PIN", String::as_str);
        let counter = card
            .pin_counters()
            .get(index)
            .map(|counter| format!(", {counter} tries left"))
            .unwrap_or_default();
        println!("  {}: {}{}", label, pin_label(*state), counter);
    }

    for info in card.key_infos() {
        let grip = if info.grip.is_empty() {
            "(no key)".dimmed().to_string()
        } else if details {
            info.grip.clone()
        } else {
            "\u{1F511} present".to_string()
        };
        let usage = if info.usage.is_empty() {
            String::new()
        } else {
            format!(" [{}]", info.usage)
        };
        println!("  {}{}: {}", info.key_ref, usage, grip);
        if let Some(fingerprint) = card.key_fingerprint(&info.key_ref) {
            println!("    Fingerprint: {}", fingerprint);
        }
        if details {
            if let Some(certificate) = card.certificate_data(&info.key_ref) {
                let head = &certificate[..certificate.len().min(8)];
                println!(
                    "    Certificate: {} bytes ({}...)",
                    certificate.len(),
                    hex::encode(head)
                );
            }
        }
    }

    if card.has_null_pin() {
        println!("  {}", "\u{26A0} The card still has its transport PIN".yellow());
    }
    if card.can_learn_keys() {
        println!("  The card holds keys that are not in the keyring yet");
    }
}
