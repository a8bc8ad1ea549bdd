//! Drives the agent through the commands that populate [`Card`] snapshots
//!
//! Every function here runs on the worker thread and uses its connection.
//! Failures never abort a scan: a card that cannot be read ends up with
//! [`CardStatus::CardError`] (or [`CardStatus::NoCard`] if it is gone) and
//! the other cards are scanned as usual.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::assuan::{AgentConnection, AssuanTransaction, DefaultTransaction};
use crate::card::{self, Card};
use crate::commands::ScdCommand;
use crate::error::{AgentError, ErrorSource, NotPresentPolicy, code};
use crate::types::{AppType, CardApp, CardStatus, PinState, StatusLine, parse_decimal_version};

/// Lookup of keys the local keyring already knows, by keygrip
pub trait KnownKeys: Send + Sync {
    fn contains_grip(&self, grip: &str) -> bool;
}

impl<F> KnownKeys for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn contains_grip(&self, grip: &str) -> bool {
        self(grip)
    }
}

/// Knobs that change how cards are enumerated and classified
#[derive(Clone)]
pub struct ScanOptions {
    pub not_present: NotPresentPolicy,
    /// Use `SERIALNO --all` and `GETINFO all_active_apps` (gpg 2.3+)
    pub multi_app: bool,
    /// Used to decide whether a card has keys worth learning
    pub known_keys: Option<Arc<dyn KnownKeys>>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            not_present: NotPresentPolicy::default(),
            multi_app: true,
            known_keys: None,
        }
    }
}

impl fmt::Debug for ScanOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanOptions")
            .field("not_present", &self.not_present)
            .field("multi_app", &self.multi_app)
            .field("known_keys", &self.known_keys.is_some())
            .finish()
    }
}

/// A card serial number with the applications active on it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardApps {
    pub serial_number: String,
    pub app_names: Vec<String>,
}

impl TryFrom<&StatusLine> for CardApps {
    type Error = anyhow::Error;

    /// Parse a `SERIALNO <serial> <app>...` line, sorting the apps
    fn try_from(line: &StatusLine) -> Result<Self, Self::Error> {
        if line.keyword != "SERIALNO" {
            anyhow::bail!("Unexpected status line: {line}");
        }
        let mut fields = line.value.split_whitespace().map(String::from);
        let serial_number = fields
            .next()
            .ok_or_else(|| anyhow::anyhow!("Invalid SERIALNO status line: {line}"))?;
        let mut app_names: Vec<_> = fields.collect();
        app_names.sort();
        Ok(Self {
            serial_number,
            app_names,
        })
    }
}

/// One scan pass over an agent connection
///
/// Remembers whether the connection broke so the caller can discard it.
pub struct Scanner<'a> {
    connection: &'a mut dyn AgentConnection,
    options: &'a ScanOptions,
    connection_lost: bool,
}

impl<'a> Scanner<'a> {
    pub fn new(connection: &'a mut dyn AgentConnection, options: &'a ScanOptions) -> Self {
        Self {
            connection,
            options,
            connection_lost: false,
        }
    }

    /// Whether an Assuan level error made the connection unusable
    pub const fn connection_lost(&self) -> bool {
        self.connection_lost
    }

    pub fn is_not_present(&self, err: &AgentError) -> bool {
        self.options.not_present.is_not_present(err)
    }

    /// Run a command with a custom transaction
    pub fn transact(
        &mut self,
        command: &str,
        transaction: &mut dyn AssuanTransaction,
    ) -> Result<(), AgentError> {
        if self.connection_lost {
            return Err(AgentError::new(ErrorSource::User1, code::ASS_GENERAL)
                .with_description("Agent connection lost"));
        }
        debug!("gpgagent_transact({})", command);
        self.connection
            .transact(command, transaction)
            .inspect_err(|err| {
                debug!("gpgagent_transact({}): {}", command, err);
                if err.is_connection_error() {
                    debug!("Assuan problem, dropping connection");
                    self.connection_lost = true;
                }
            })
    }

    fn collect(&mut self, command: &str) -> Result<DefaultTransaction, AgentError> {
        let mut transaction = DefaultTransaction::new();
        self.transact(command, &mut transaction)?;
        Ok(transaction)
    }

    /// All status lines a command produced
    pub fn status_lines(&mut self, command: &str) -> Result<Vec<StatusLine>, AgentError> {
        let (lines, _) = self.collect(command)?.into_parts();
        debug!("status lines for {}: {:?}", command, lines);
        Ok(lines)
    }

    /// Value of the status line named like the last word of the command
    ///
    /// `SCD SERIALNO` looks for `SERIALNO`, `SCD GETATTR FOO` for `FOO`.
    pub fn status(&mut self, command: &str) -> Result<String, AgentError> {
        let needle = command.rsplit(' ').next().unwrap_or(command);
        Ok(self
            .status_lines(command)?
            .into_iter()
            .find(|line| line.keyword == needle)
            .map(|line| line.value)
            .unwrap_or_default())
    }

    pub fn getattr(&mut self, name: &str) -> Result<String, AgentError> {
        self.status(&ScdCommand::GetAttr(name.to_string()).to_string())
    }

    /// Data lines a command produced
    pub fn data(&mut self, command: &str) -> Result<Bytes, AgentError> {
        let (_, data) = self.collect(command)?.into_parts();
        Ok(data)
    }

    /// Enumerate the inserted cards and their active applications
    ///
    /// Applications are sorted so the order does not depend on which one
    /// happens to be selected.
    pub fn get_cards_and_apps(&mut self) -> Result<Vec<CardApps>, AgentError> {
        if !self.options.multi_app {
            let serial_number = self.status(&ScdCommand::SerialNo { all: false }.to_string())?;
            let app_name = self.getattr("APPTYPE")?.to_ascii_lowercase();
            return Ok(vec![CardApps {
                serial_number,
                app_names: vec![app_name],
            }]);
        }

        let lines = self.status_lines(&ScdCommand::AllActiveApps.to_string())?;
        Ok(lines
            .iter()
            .filter_map(|line| {
                CardApps::try_from(line)
                    .inspect_err(|e| warn!("getCardsAndApps(): {}", e))
                    .ok()
            })
            .collect())
    }

    /// Select a card; the agent must echo exactly its serial number
    pub fn switch_card(&mut self, serial_number: &str) -> Result<(), AgentError> {
        let lines =
            self.status_lines(&ScdCommand::SwitchCard(serial_number.to_string()).to_string())?;
        match lines.as_slice() {
            [line] if line.keyword == "SERIALNO" && line.value == serial_number => Ok(()),
            _ => {
                warn!("switchCard({}): Unexpected status lines: {:?}", serial_number, lines);
                Err(AgentError::new(ErrorSource::User1, code::INV_RESPONSE))
            }
        }
    }

    /// Select an application on the current card
    pub fn switch_app(&mut self, serial_number: &str, app_name: &str) -> Result<(), AgentError> {
        let lines = self.status_lines(&ScdCommand::SwitchApp(app_name.to_string()).to_string())?;
        let expected = format!("{serial_number} {app_name}");
        match lines.as_slice() {
            [line] if line.keyword == "SERIALNO" && line.value.starts_with(&expected) => Ok(()),
            _ => {
                warn!(
                    "switchApp({}, {}): Unexpected status lines: {:?}",
                    serial_number, app_name, lines
                );
                Err(AgentError::new(ErrorSource::User1, code::INV_RESPONSE))
            }
        }
    }

    /// Select card and application before running a targeted command
    pub fn switch_card_and_app(
        &mut self,
        serial_number: &str,
        app_name: &str,
    ) -> Result<(), AgentError> {
        self.switch_card(serial_number)?;
        if !app_name.is_empty() {
            self.switch_app(serial_number, app_name)?;
        }
        Ok(())
    }

    fn failure_status(&self, err: &AgentError) -> CardStatus {
        if self.is_not_present(err) {
            CardStatus::NoCard
        } else {
            CardStatus::CardError
        }
    }

    /// Switch to one card application and read everything about it
    pub fn get_card_status(&mut self, serial_number: &str, app_name: &str) -> Card {
        debug!("get_card_status({}, {})", serial_number, app_name);
        let mut card = Card::new(serial_number, app_name);

        if let Err(err) = self.switch_card(serial_number) {
            card.set_status(self.failure_status(&err));
            return card;
        }
        card.set_status(CardStatus::CardPresent);

        if let Err(err) = self.switch_app(serial_number, app_name) {
            card.set_status(self.failure_status(&err));
            return card;
        }
        card.set_status(CardStatus::CardActive);

        let mut card = match AppType::parse(app_name) {
            AppType::NetKey => self.handle_netkey_card(card),
            AppType::OpenPgp => self.handle_openpgp_card(card),
            AppType::Piv => self.handle_piv_card(card),
            AppType::P15 => self.handle_p15_card(card),
            _ => {
                debug!("get_card_status: unhandled application: {}", app_name);
                return card;
            }
        };

        if card.status() == CardStatus::CardActive && card.error_msg().is_empty() {
            card.set_status(CardStatus::CardUsable);
        }
        card
    }

    /// Full re-scan of all cards and applications
    pub fn update_cardinfo(&mut self) -> Vec<Card> {
        debug!("update_cardinfo()");

        // make scdaemon look for new cards
        let serialno = ScdCommand::SerialNo {
            all: self.options.multi_app,
        };
        let card_apps = self
            .status_lines(&serialno.to_string())
            .and_then(|_| self.get_cards_and_apps());

        let card_apps = match card_apps {
            Ok(card_apps) => card_apps,
            Err(err) if self.is_not_present(&err) => {
                debug!("update_cardinfo: no card present");
                return Vec::new();
            }
            Err(err) => {
                debug!("update_cardinfo: {}", err);
                return vec![Card::with_status("", "", CardStatus::CardError)];
            }
        };

        let mut cards = Vec::new();
        for card_app in card_apps {
            for app_name in &card_app.app_names {
                cards.push(self.get_card_status(&card_app.serial_number, app_name));
            }
        }
        cards
    }

    /// Re-scan a single card application
    pub fn update_card(&mut self, card_app: &CardApp) -> Card {
        debug!("update_cardinfo({})", card_app);
        self.get_card_status(&card_app.serial_number, &card_app.app_name)
    }

    fn learn(&mut self) -> Result<Vec<StatusLine>, AgentError> {
        self.status_lines(&ScdCommand::Learn.to_string())
    }

    fn display_serial_number(&mut self, serial_number: &str) -> String {
        match self.getattr("$DISPSERIALNO") {
            Ok(display) if !display.is_empty() => {
                card::openpgp::format_display_serial(serial_number, &display)
            }
            Ok(_) => serial_number.to_string(),
            Err(err) => {
                debug!("Failed to get display serial number: {}", err);
                serial_number.to_string()
            }
        }
    }

    /// Let the agent create stubs for the card's keys
    fn learn_card_key_stubs(&mut self, card: &Card) {
        for info in card.key_infos().iter().filter(|info| !info.grip.is_empty()) {
            let command = ScdCommand::ReadKeyStub(info.key_ref.clone()).to_string();
            if let Err(err) = self.status_lines(&command) {
                warn!("Running {} failed: {}", command, err);
            }
        }
    }

    fn handle_openpgp_card(&mut self, mut card: Card) -> Card {
        let lines = match self.learn() {
            Ok(lines) => lines,
            Err(err) => {
                debug!("LEARN failed: {}", err);
                card.set_status(CardStatus::CardError);
                return card;
            }
        };
        let mut card = card::openpgp::from_learn(card, &lines);

        if card.manufacturer().is_empty() {
            // older agents do not report MANUFACTURER
            let manufacturer = card::openpgp::manufacturer_from_serial(card.serial_number())
                .unwrap_or("unknown");
            card.set_manufacturer(manufacturer);
        }

        let display = self.display_serial_number(card.serial_number());
        card.set_display_serial_number(display);
        self.learn_card_key_stubs(&card);
        card
    }

    fn handle_piv_card(&mut self, mut card: Card) -> Card {
        let lines = match self.learn() {
            Ok(lines) => lines,
            Err(err) => {
                debug!("LEARN failed: {}", err);
                card.set_status(CardStatus::CardError);
                return card;
            }
        };
        let mut card = card::piv::from_learn(card, &lines);

        let display = self.display_serial_number(card.serial_number());
        card.set_display_serial_number(display);

        let key_refs: Vec<String> = card
            .key_infos()
            .iter()
            .filter(|info| !info.grip.is_empty())
            .map(|info| info.key_ref.clone())
            .collect();
        for key_ref in key_refs {
            self.read_piv_key_pair_info(&mut card, &key_ref);
            self.read_piv_certificate(&mut card, &key_ref);
        }

        self.learn_card_key_stubs(&card);
        card
    }

    fn read_piv_key_pair_info(&mut self, card: &mut Card, key_ref: &str) {
        let command = ScdCommand::ReadKeyInfo(key_ref.to_string()).to_string();
        match self.status_lines(&command) {
            Ok(lines) => card.set_card_info(&lines),
            Err(err) => warn!("Error reading key pair info for {}: {}", key_ref, err),
        }
    }

    fn read_piv_certificate(&mut self, card: &mut Card, key_ref: &str) {
        let command = ScdCommand::ReadCert(key_ref.to_string()).to_string();
        match self.data(&command) {
            Ok(data) if !data.is_empty() => card::piv::set_certificate_data(card, key_ref, data),
            Ok(_) => {}
            Err(err) if err.code() == code::NOT_FOUND => {}
            Err(err) => warn!("Error reading certificate for {}: {}", key_ref, err),
        }
    }

    fn handle_p15_card(&mut self, mut card: Card) -> Card {
        let mut lines = match self.learn() {
            Ok(lines) => lines,
            Err(err) => {
                debug!("LEARN failed: {}", err);
                card.set_status(CardStatus::CardError);
                return card;
            }
        };
        match self.status_lines(&ScdCommand::GetAttr("KEY-FPR".to_string()).to_string()) {
            Ok(fprs) => lines.extend(fprs),
            Err(err) => debug!("GETATTR KEY-FPR failed: {}", err),
        }
        let mut card = card::p15::from_learn(card, &lines);

        self.learn_card_key_stubs(&card);
        let display = self.display_serial_number(card.serial_number());
        card.set_display_serial_number(display);
        card
    }

    fn handle_netkey_card(&mut self, mut card: Card) -> Card {
        card::netkey::init(&mut card);

        match self.getattr("NKS-VERSION") {
            Ok(version) => card.set_app_version(parse_decimal_version(&version)),
            Err(err) => {
                debug!("NKS-VERSION resulted in error: {}", err);
                card.set_error_msg(format!("Failed to get NKS-VERSION: {err}"));
                return card;
            }
        }
        if card.app_version() < 3 {
            debug!("not a NetKey v3 card, giving up. Version: {}", card.app_version());
            card.set_error_msg(format!(
                "NetKey v{} cards are not supported.",
                card.app_version()
            ));
            return card;
        }

        let display = self.display_serial_number(card.serial_number());
        card.set_display_serial_number(display);

        // pin states: NKS PIN, NKS PUK, SigG PIN, SigG PUK
        let chv_status = match self.getattr("CHV-STATUS") {
            Ok(chv_status) => chv_status,
            Err(err) => {
                debug!("no CHV-STATUS: {}", err);
                card.set_error_msg(format!("CHV-Status failed: {err}"));
                return card;
            }
        };
        let states = PinState::parse_list(&chv_status);
        card.set_has_null_pin(states.first() == Some(&PinState::NullPin));
        card.set_pin_states(states);

        let lines = match self.learn() {
            Ok(lines) => lines,
            Err(err) => {
                debug!("LEARN failed: {}", err);
                card.set_status(CardStatus::CardError);
                return card;
            }
        };
        card.set_card_info(&lines);

        let can_learn_keys = self.options.known_keys.as_ref().is_some_and(|known| {
            card.key_infos()
                .iter()
                .any(|info| !info.grip.is_empty() && !known.contains_grip(&info.grip))
        });
        card.set_can_learn_keys(can_learn_keys);

        self.learn_card_key_stubs(&card);
        card
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    type Reply = Result<(Vec<StatusLine>, Vec<u8>), AgentError>;

    /// Answers commands from a fixed table, unknown commands succeed empty
    #[derive(Default)]
    struct Scripted {
        replies: HashMap<String, Reply>,
        sent: Vec<String>,
    }

    impl Scripted {
        fn status(mut self, command: &str, lines: &[(&str, &str)]) -> Self {
            let lines = lines.iter().map(|&(k, v)| StatusLine::new(k, v)).collect();
            self.replies.insert(command.to_string(), Ok((lines, Vec::new())));
            self
        }

        fn data(mut self, command: &str, data: &[u8]) -> Self {
            self.replies
                .insert(command.to_string(), Ok((Vec::new(), data.to_vec())));
            self
        }

        fn fail(mut self, command: &str, source: ErrorSource, code: u32) -> Self {
            self.replies
                .insert(command.to_string(), Err(AgentError::new(source, code)));
            self
        }
    }

    impl AgentConnection for Scripted {
        fn transact(
            &mut self,
            command: &str,
            transaction: &mut dyn AssuanTransaction,
        ) -> Result<(), AgentError> {
            self.sent.push(command.to_string());
            let (lines, data) = self
                .replies
                .get(command)
                .cloned()
                .unwrap_or_else(|| Ok(Default::default()))?;
            for line in &lines {
                transaction.status(&line.keyword, &line.value)?;
            }
            if !data.is_empty() {
                transaction.data(&data)?;
            }
            Ok(())
        }
    }

    const SERIAL: &str = "D2760001240103040006123456780000";
    const SERIAL_APP: &str = "D2760001240103040006123456780000 openpgp";

    fn openpgp_agent() -> Scripted {
        Scripted::default()
            .status("SCD SERIALNO --all", &[("SERIALNO", SERIAL)])
            .status("SCD GETINFO all_active_apps", &[("SERIALNO", SERIAL_APP)])
            .status(&format!("SCD SWITCHCARD {SERIAL}"), &[("SERIALNO", SERIAL)])
            .status("SCD SWITCHAPP openpgp", &[("SERIALNO", SERIAL_APP)])
            .status("SCD LEARN --force", &[
                ("APPVERSION", "0304"),
                ("DISP-NAME", "Doe<<Jane"),
                ("KEYPAIRINFO", "GRIP1 OPENPGP.1 sc"),
                ("KEY-FPR", "1 AAAA"),
                ("CHV-STATUS", "+1 127 127 127 3 0 3"),
            ])
            .status("SCD GETATTR $DISPSERIALNO", &[("$DISPSERIALNO", "000612345678")])
    }

    #[test]
    fn test_scan_openpgp_card() {
        let mut agent = openpgp_agent();
        let options = ScanOptions::default();
        let cards = Scanner::new(&mut agent, &options).update_cardinfo();

        assert_eq!(cards.len(), 1);
        let card = &cards[0];
        assert_eq!(card.status(), CardStatus::CardUsable);
        assert_eq!(card.app_type(), AppType::OpenPgp);
        assert_eq!(card.display_serial_number(), "0006 12345678");
        assert_eq!(card.manufacturer(), "Yubico");
        assert_eq!(card.card_holder(), "Jane Doe");
        assert_eq!(card.pin_counters(), [3, 0, 3]);
        assert!(card.has_signing_key());
        assert!(
            agent
                .sent
                .contains(&"READKEY --card --no-data -- OPENPGP.1".to_string())
        );
    }

    #[test]
    fn test_status_uses_last_word() {
        let mut agent = Scripted::default().status("SCD GETATTR NKS-VERSION", &[
            ("OTHER", "1"),
            ("NKS-VERSION", "3"),
        ]);
        let options = ScanOptions::default();
        let mut scanner = Scanner::new(&mut agent, &options);
        assert_eq!(scanner.getattr("NKS-VERSION").unwrap(), "3");
        assert_eq!(scanner.getattr("MISSING").unwrap(), "");
    }

    #[test]
    fn test_no_card_gives_empty_list() {
        let mut agent =
            Scripted::default().fail("SCD SERIALNO --all", ErrorSource::Scd, code::CARD_NOT_PRESENT);
        let options = ScanOptions::default();
        assert!(Scanner::new(&mut agent, &options).update_cardinfo().is_empty());
    }

    #[test]
    fn test_scan_failure_gives_error_card() {
        let mut agent = Scripted::default().fail("SCD SERIALNO --all", ErrorSource::Scd, code::CARD);
        let options = ScanOptions::default();
        let cards = Scanner::new(&mut agent, &options).update_cardinfo();
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].status(), CardStatus::CardError);
        assert_eq!(cards[0].serial_number(), "");
    }

    #[test]
    fn test_switch_card_mismatch() {
        let mut agent = Scripted::default().status("SCD SWITCHCARD S1", &[("SERIALNO", "S2")]);
        let options = ScanOptions::default();
        let card = Scanner::new(&mut agent, &options).get_card_status("S1", "piv");
        assert_eq!(card.status(), CardStatus::CardError);
    }

    #[test]
    fn test_switch_app_not_present() {
        let mut agent = Scripted::default()
            .status("SCD SWITCHCARD S1", &[("SERIALNO", "S1")])
            .fail("SCD SWITCHAPP piv", ErrorSource::Scd, code::CARD_REMOVED);
        let options = ScanOptions::default();
        let card = Scanner::new(&mut agent, &options).get_card_status("S1", "piv");
        assert_eq!(card.status(), CardStatus::NoCard);
    }

    #[test]
    fn test_apps_are_sorted() {
        let mut agent = Scripted::default().status("SCD GETINFO all_active_apps", &[
            ("SERIALNO", "S1 piv openpgp"),
            ("BOGUS", "x"),
            ("SERIALNO", "S2 nks"),
        ]);
        let options = ScanOptions::default();
        let cards = Scanner::new(&mut agent, &options)
            .get_cards_and_apps()
            .unwrap();
        assert_eq!(cards, vec![
            CardApps {
                serial_number: "S1".to_string(),
                app_names: vec!["openpgp".to_string(), "piv".to_string()],
            },
            CardApps {
                serial_number: "S2".to_string(),
                app_names: vec!["nks".to_string()],
            },
        ]);
    }

    #[test]
    fn test_legacy_enumeration() {
        let mut agent = Scripted::default()
            .status("SCD SERIALNO", &[("SERIALNO", "S1")])
            .status("SCD GETATTR APPTYPE", &[("APPTYPE", "OPENPGP")]);
        let options = ScanOptions {
            multi_app: false,
            ..Default::default()
        };
        let cards = Scanner::new(&mut agent, &options)
            .get_cards_and_apps()
            .unwrap();
        assert_eq!(cards[0].serial_number, "S1");
        assert_eq!(cards[0].app_names, ["openpgp"]);
    }

    fn netkey_agent(version: &str) -> Scripted {
        Scripted::default()
            .status("SCD SWITCHCARD S1", &[("SERIALNO", "S1")])
            .status("SCD SWITCHAPP nks", &[("SERIALNO", "S1 nks")])
            .status("SCD GETATTR NKS-VERSION", &[("NKS-VERSION", version)])
            .status("SCD GETATTR CHV-STATUS", &[("CHV-STATUS", "-4 3 3 3")])
            .status("SCD LEARN --force", &[
                ("KEYPAIRINFO", "KNOWN NKS-NKS3.4531 sc"),
                ("KEYPAIRINFO", "UNKNOWN NKS-NKS3.45B1 e"),
            ])
    }

    #[test]
    fn test_old_netkey_is_flagged() {
        let mut agent = netkey_agent("2");
        let options = ScanOptions::default();
        let card = Scanner::new(&mut agent, &options).get_card_status("S1", "nks");
        assert_eq!(card.status(), CardStatus::CardActive);
        assert_eq!(card.error_msg(), "NetKey v2 cards are not supported.");
        assert!(!agent.sent.contains(&"SCD LEARN --force".to_string()));
    }

    #[test]
    fn test_netkey_null_pin_and_learnable_keys() {
        let mut agent = netkey_agent("3");
        let known: Arc<dyn KnownKeys> = Arc::new(|grip: &str| grip == "KNOWN");
        let options = ScanOptions {
            known_keys: Some(known),
            ..Default::default()
        };
        let card = Scanner::new(&mut agent, &options).get_card_status("S1", "nks");
        assert_eq!(card.status(), CardStatus::CardUsable);
        assert!(card.has_null_pin());
        assert!(card.can_learn_keys());
        assert_eq!(card.pin_states()[0], PinState::NullPin);
    }

    #[test]
    fn test_piv_certificates() {
        let mut agent = Scripted::default()
            .status("SCD SWITCHCARD S1", &[("SERIALNO", "S1")])
            .status("SCD SWITCHAPP piv", &[("SERIALNO", "S1 piv")])
            .status("SCD LEARN --force", &[
                ("KEYPAIRINFO", "GRIP9A PIV.9A a"),
                ("KEYPAIRINFO", "GRIP9C PIV.9C s"),
            ])
            .status("SCD READKEY --info-only -- PIV.9A", &[(
                "KEYPAIRINFO",
                "GRIP9A PIV.9A a - ecdsa",
            )])
            .data("SCD READCERT PIV.9A", b"cert-9a")
            .fail("SCD READCERT PIV.9C", ErrorSource::Scd, code::NOT_FOUND);
        let options = ScanOptions::default();
        let card = Scanner::new(&mut agent, &options).get_card_status("S1", "piv");

        assert_eq!(card.status(), CardStatus::CardUsable);
        assert_eq!(
            card.certificate_data("PIV.9A").map(|c| &c[..]),
            Some(&b"cert-9a"[..])
        );
        assert!(card.certificate_data("PIV.9C").is_none());
        assert_eq!(
            card.key_info("PIV.9A").map(|k| k.algorithm.as_str()),
            Some("ecdsa")
        );
    }

    #[test]
    fn test_connection_loss_short_circuits() {
        let mut agent =
            Scripted::default().fail("SCD SERIALNO --all", ErrorSource::User1, code::ASS_READ_ERROR);
        let options = ScanOptions::default();
        let mut scanner = Scanner::new(&mut agent, &options);
        let cards = scanner.update_cardinfo();
        assert_eq!(cards[0].status(), CardStatus::CardError);
        assert!(scanner.connection_lost());
        assert!(scanner.getattr("APPTYPE").is_err());
        assert_eq!(agent.sent.len(), 1);
    }
}
