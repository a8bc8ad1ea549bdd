//! Card data model
//!
//! A [`Card`] is an immutable snapshot of one application on one card. The
//! scan code builds a fresh `Card` for every update, so comparing old and new
//! snapshots is all it takes to find out what changed.

/// Implements [`AppCard`] and `Deref` for a newtype around `Arc<Card>`
macro_rules! app_card {
    ($name:ident, $app_name:literal, $pattern:pat) => {
        impl $crate::card::AppCard for $name {
            const APP_NAME: &'static str = $app_name;

            fn from_card(card: ::std::sync::Arc<$crate::card::Card>) -> Option<Self> {
                matches!(card.kind(), $pattern).then(|| Self(card))
            }

            fn into_inner(self) -> ::std::sync::Arc<$crate::card::Card> {
                self.0
            }
        }

        impl ::std::ops::Deref for $name {
            type Target = $crate::card::Card;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }
    };
}

pub(crate) mod netkey;
pub(crate) mod openpgp;
pub(crate) mod p15;
pub(crate) mod piv;

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::types::{
    AppType, CardApp, CardStatus, KeyPairInfo, PinState, StatusLine, format_version,
    parse_hex_version,
};

pub use netkey::NetKeyCard;
pub use openpgp::{OpenPgpCard, OpenPgpData, manufacturer_from_serial};
pub use p15::P15Card;
pub use piv::{PivCard, PivData};

/// Application specific part of a card
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CardKind {
    /// An application without special handling
    #[default]
    Generic,
    OpenPgp(OpenPgpData),
    Piv(PivData),
    NetKey,
    P15,
}

/// Snapshot of one application on one card
#[derive(Debug, Clone)]
pub struct Card {
    status: CardStatus,
    serial_number: String,
    display_serial_number: String,
    app_name: String,
    app_type: AppType,
    display_app_name: String,
    /// Packed application version, -1 if unknown
    app_version: i64,
    card_type: String,
    card_version: i64,
    card_holder: String,
    signing_key_ref: String,
    encryption_key_ref: String,
    authentication_key_ref: String,
    key_infos: Vec<KeyPairInfo>,
    pin_states: Vec<PinState>,
    pin_counters: Vec<i32>,
    pin_labels: Vec<String>,
    has_null_pin: bool,
    can_learn_keys: bool,
    slot: u32,
    /// Attributes without a dedicated field, in arrival order per name
    card_info: BTreeMap<String, Vec<String>>,
    error_msg: String,
    kind: CardKind,
}

impl Default for Card {
    fn default() -> Self {
        Self {
            status: CardStatus::NoCard,
            serial_number: String::new(),
            display_serial_number: String::new(),
            app_name: String::new(),
            app_type: AppType::Unknown,
            display_app_name: String::new(),
            app_version: -1,
            card_type: String::new(),
            card_version: -1,
            card_holder: String::new(),
            signing_key_ref: String::new(),
            encryption_key_ref: String::new(),
            authentication_key_ref: String::new(),
            key_infos: Vec::new(),
            pin_states: Vec::new(),
            pin_counters: Vec::new(),
            pin_labels: Vec::new(),
            has_null_pin: false,
            can_learn_keys: false,
            slot: 0,
            card_info: BTreeMap::new(),
            error_msg: String::new(),
            kind: CardKind::Generic,
        }
    }
}

impl Card {
    /// A generic card for the given identity, not yet recognized
    pub fn new(serial_number: impl Into<String>, app_name: impl Into<String>) -> Self {
        let app_name = app_name.into();
        Self {
            serial_number: serial_number.into(),
            app_type: AppType::parse(&app_name),
            display_app_name: AppType::display_name(&app_name),
            app_name,
            ..Default::default()
        }
    }

    /// A card that failed to scan
    pub fn with_status(
        serial_number: impl Into<String>,
        app_name: impl Into<String>,
        status: CardStatus,
    ) -> Self {
        let mut card = Self::new(serial_number, app_name);
        card.status = status;
        card
    }

    pub fn id(&self) -> CardApp {
        CardApp::new(self.serial_number.clone(), self.app_name.clone())
    }

    pub const fn status(&self) -> CardStatus {
        self.status
    }

    pub fn serial_number(&self) -> &str {
        &self.serial_number
    }

    /// Serial number formatted for display, falls back to the raw serial
    pub fn display_serial_number(&self) -> &str {
        if self.display_serial_number.is_empty() {
            &self.serial_number
        } else {
            &self.display_serial_number
        }
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub const fn app_type(&self) -> AppType {
        self.app_type
    }

    pub fn display_app_name(&self) -> &str {
        &self.display_app_name
    }

    pub const fn app_version(&self) -> i64 {
        self.app_version
    }

    pub fn display_app_version(&self) -> String {
        format_version(self.app_version)
    }

    pub fn card_type(&self) -> &str {
        &self.card_type
    }

    pub const fn card_version(&self) -> i64 {
        self.card_version
    }

    pub fn display_card_version(&self) -> String {
        format_version(self.card_version)
    }

    pub fn card_holder(&self) -> &str {
        &self.card_holder
    }

    /// Manufacturer name without the numeric id
    pub fn manufacturer(&self) -> &str {
        self.card_info("MANUFACTURER").unwrap_or_default()
    }

    pub fn signing_key_ref(&self) -> &str {
        &self.signing_key_ref
    }

    pub fn encryption_key_ref(&self) -> &str {
        &self.encryption_key_ref
    }

    pub fn authentication_key_ref(&self) -> &str {
        &self.authentication_key_ref
    }

    pub fn has_signing_key(&self) -> bool {
        self.has_key(&self.signing_key_ref)
    }

    pub fn has_encryption_key(&self) -> bool {
        self.has_key(&self.encryption_key_ref)
    }

    pub fn has_authentication_key(&self) -> bool {
        self.has_key(&self.authentication_key_ref)
    }

    fn has_key(&self, key_ref: &str) -> bool {
        self.key_info(key_ref).is_some_and(|info| !info.grip.is_empty())
    }

    pub fn key_infos(&self) -> &[KeyPairInfo] {
        &self.key_infos
    }

    /// Key slot with the given key reference
    pub fn key_info(&self, key_ref: &str) -> Option<&KeyPairInfo> {
        self.key_infos.iter().find(|info| info.key_ref == key_ref)
    }

    /// Fingerprint reported through `KEY-FPR` for an OpenPGP key slot
    pub fn key_fingerprint(&self, key_ref: &str) -> Option<&str> {
        self.card_info(&format!("KLEO-FPR-{key_ref}"))
    }

    pub fn pin_states(&self) -> &[PinState] {
        &self.pin_states
    }

    /// Retry counters from `CHV-STATUS`
    pub fn pin_counters(&self) -> &[i32] {
        &self.pin_counters
    }

    pub fn pin_labels(&self) -> &[String] {
        &self.pin_labels
    }

    pub const fn has_null_pin(&self) -> bool {
        self.has_null_pin
    }

    pub const fn can_learn_keys(&self) -> bool {
        self.can_learn_keys
    }

    pub const fn slot(&self) -> u32 {
        self.slot
    }

    /// First value of a raw attribute
    pub fn card_info(&self, name: &str) -> Option<&str> {
        self.card_info
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// All values of a raw attribute
    pub fn card_info_values(&self, name: &str) -> &[String] {
        self.card_info
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub const fn card_info_map(&self) -> &BTreeMap<String, Vec<String>> {
        &self.card_info
    }

    /// Certificate stored on the card for a key slot
    pub fn certificate_data(&self, key_ref: &str) -> Option<&Bytes> {
        match &self.kind {
            CardKind::Piv(piv) => piv.certificate(key_ref),
            _ => None,
        }
    }

    /// Diagnostic left by a partially failed scan
    pub fn error_msg(&self) -> &str {
        &self.error_msg
    }

    pub const fn kind(&self) -> &CardKind {
        &self.kind
    }

    pub(crate) const fn set_status(&mut self, status: CardStatus) {
        self.status = status;
    }

    pub(crate) fn set_display_serial_number(&mut self, display_serial_number: String) {
        self.display_serial_number = display_serial_number;
    }

    pub(crate) const fn set_app_version(&mut self, app_version: i64) {
        self.app_version = app_version;
    }

    pub(crate) fn set_manufacturer(&mut self, manufacturer: &str) {
        self.card_info
            .insert("MANUFACTURER".to_string(), vec![manufacturer.to_string()]);
    }

    pub(crate) fn set_pin_states(&mut self, pin_states: Vec<PinState>) {
        self.pin_states = pin_states;
    }

    pub(crate) const fn set_has_null_pin(&mut self, has_null_pin: bool) {
        self.has_null_pin = has_null_pin;
    }

    pub(crate) const fn set_can_learn_keys(&mut self, can_learn_keys: bool) {
        self.can_learn_keys = can_learn_keys;
    }

    pub(crate) fn set_error_msg(&mut self, error_msg: impl Into<String>) {
        self.error_msg = error_msg.into();
    }

    pub(crate) fn set_key_refs(&mut self, signing: &str, encryption: &str, authentication: &str) {
        self.signing_key_ref = signing.to_string();
        self.encryption_key_ref = encryption.to_string();
        self.authentication_key_ref = authentication.to_string();
    }

    pub(crate) fn set_initial_key_infos(&mut self, key_infos: Vec<KeyPairInfo>) {
        self.key_infos = key_infos;
    }

    pub(crate) fn set_kind(&mut self, kind: CardKind, app_type: AppType) {
        self.kind = kind;
        self.app_type = app_type;
        self.app_name = app_type.app_name().to_string();
        self.display_app_name = AppType::display_name(&self.app_name);
    }

    pub(crate) const fn kind_mut(&mut self) -> &mut CardKind {
        &mut self.kind
    }

    pub(crate) fn add_card_info(&mut self, name: &str, value: &str) {
        self.card_info
            .entry(name.to_string())
            .or_default()
            .push(value.to_string());
    }

    /// Merge a slot report into the matching key slot, or append it
    pub(crate) fn update_key_info(&mut self, info: KeyPairInfo) {
        match self
            .key_infos
            .iter_mut()
            .find(|existing| existing.key_ref == info.key_ref)
        {
            Some(existing) => existing.update(&info),
            None => self.key_infos.push(info),
        }
    }

    /// Consume `(keyword, value)` pairs from `LEARN` or similar commands
    pub(crate) fn set_card_info(&mut self, lines: &[StatusLine]) {
        debug!("Card {} info:", self.serial_number);
        for line in lines {
            debug!("{}: {}", line.keyword, line.value);
            if !self.parse_app_card_info(&line.keyword, &line.value) {
                self.parse_card_info(&line.keyword, &line.value);
            }
        }
    }

    /// Attributes with an application specific meaning, `true` if consumed
    fn parse_app_card_info(&mut self, name: &str, value: &str) -> bool {
        match &mut self.kind {
            CardKind::OpenPgp(data) if name == "PUBKEY-URL" => {
                data.pubkey_url = value.to_string();
                true
            }
            CardKind::P15 if name == "$SIGNKEYID" => {
                self.signing_key_ref = value.to_string();
                true
            }
            CardKind::P15 if name == "$ENCRKEYID" => {
                self.encryption_key_ref = value.to_string();
                true
            }
            _ => false,
        }
    }

    fn parse_card_info(&mut self, name: &str, value: &str) {
        match name {
            "APPVERSION" => self.app_version = parse_hex_version(value),
            "CARDTYPE" => self.card_type = value.to_string(),
            "CARDVERSION" => self.card_version = parse_hex_version(value),
            "DISP-NAME" => self.card_holder = parse_card_holder(value),
            "KEYPAIRINFO" => {
                let info = KeyPairInfo::from_status_line(value);
                if info.grip.is_empty() {
                    warn!("Invalid KEYPAIRINFO status line {:?}", value);
                    self.status = CardStatus::CardError;
                } else {
                    self.update_key_info(info);
                }
            }
            "KEY-FPR" => {
                let mut fields = value.split_whitespace();
                let (Some(key_number), Some(fpr)) = (fields.next(), fields.next()) else {
                    warn!("Invalid KEY-FPR status line {:?}", value);
                    self.status = CardStatus::CardError;
                    return;
                };
                if matches!(key_number, "1" | "2" | "3") {
                    self.add_card_info(&format!("KLEO-FPR-OPENPGP.{key_number}"), fpr);
                } else {
                    debug!("Unhandled keyslot {}", key_number);
                }
            }
            // "<id> <name>", only the name is kept
            "MANUFACTURER" => {
                if let Some((_, manufacturer)) = value.split_once(' ') {
                    self.add_card_info(name, manufacturer);
                }
            }
            "CHV-STATUS" => {
                self.pin_counters = value
                    .split_whitespace()
                    .map(|v| v.parse().unwrap_or(0))
                    .collect();
                if self.app_type == AppType::OpenPgp {
                    // retry counters are the last 3 of 7 values
                    if self.pin_counters.len() == 7 {
                        self.pin_counters = self.pin_counters.split_off(4);
                        if self.pin_labels.is_empty() {
                            self.pin_labels = ["PIN", "PUK", "Admin PIN"]
                                .map(String::from)
                                .to_vec();
                        }
                    } else {
                        debug!("Invalid CHV-STATUS value. Expected 7 integers, got {:?}", value);
                        self.pin_counters.clear();
                    }
                }
                debug!("PIN counters: {:?}", self.pin_counters);
            }
            "CHV-LABEL" => {
                self.pin_labels = value.split_whitespace().map(String::from).collect();
                debug!("PIN labels: {:?}", self.pin_labels);
            }
            _ => self.add_card_info(name, value),
        }

        if !self.pin_labels.is_empty()
            && !self.pin_counters.is_empty()
            && self.pin_labels.len() != self.pin_counters.len()
        {
            debug!("Number of PIN labels does not match number of PIN counters. Clearing labels.");
            self.pin_labels.clear();
        }
    }

    /// Application specific comparison on top of the base fields
    fn kind_eq(&self, other: &Self) -> bool {
        match (&self.kind, &other.kind) {
            (CardKind::Generic, CardKind::Generic) => true,
            (CardKind::OpenPgp(a), CardKind::OpenPgp(b)) => {
                a == b
                    && self.manufacturer() == other.manufacturer()
                    && self.card_holder == other.card_holder
                    && (1..=3).all(|n| {
                        let key_ref = format!("OPENPGP.{n}");
                        self.key_fingerprint(&key_ref) == other.key_fingerprint(&key_ref)
                    })
                    && self.key_infos == other.key_infos
            }
            (CardKind::Piv(a), CardKind::Piv(b)) => {
                a == b && self.key_infos == other.key_infos && self.card_info == other.card_info
            }
            (CardKind::NetKey, CardKind::NetKey) => self.key_infos == other.key_infos,
            (CardKind::P15, CardKind::P15) => {
                self.key_infos == other.key_infos && self.card_info == other.card_info
            }
            _ => false,
        }
    }
}

/// `DISP-NAME` holds `Surname<<Given<Names`, displayed as `Given Names Surname`
fn parse_card_holder(value: &str) -> String {
    value
        .rsplit("<<")
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
        .replace('<', " ")
}

/// Cards are equal when nothing a user could notice has changed
///
/// The raw attribute map and the key slots only take part for applications
/// that model them.
impl PartialEq for Card {
    fn eq(&self, other: &Self) -> bool {
        self.status == other.status
            && self.serial_number == other.serial_number
            && self.app_name == other.app_name
            && self.app_version == other.app_version
            && self.pin_states == other.pin_states
            && self.slot == other.slot
            && self.can_learn_keys == other.can_learn_keys
            && self.has_null_pin == other.has_null_pin
            && self.card_type == other.card_type
            && self.card_version == other.card_version
            && self.pin_counters == other.pin_counters
            && self.pin_labels == other.pin_labels
            && self.error_msg == other.error_msg
            && self.kind_eq(other)
    }
}

impl Eq for Card {}

impl fmt::Display for Card {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} card {}", self.display_app_name, self.display_serial_number())?;
        writeln!(f, "  Status: {}", self.status)?;
        if self.app_version >= 0 {
            writeln!(f, "  Version: {}", self.display_app_version())?;
        }
        if !self.manufacturer().is_empty() {
            writeln!(f, "  Manufacturer: {}", self.manufacturer())?;
        }
        if !self.card_holder.is_empty() {
            writeln!(f, "  Card holder: {}", self.card_holder)?;
        }
        for info in &self.key_infos {
            writeln!(f, "  Key {info}")?;
        }
        if !self.pin_counters.is_empty() {
            writeln!(f, "  PIN retry counters: {:?}", self.pin_counters)?;
        }
        if !self.error_msg.is_empty() {
            writeln!(f, "  Error: {}", self.error_msg)?;
        }
        Ok(())
    }
}

/// Typed view on a card snapshot of one application
pub trait AppCard: Deref<Target = Card> + Sized {
    const APP_NAME: &'static str;

    /// Checked conversion, `None` if the card holds another application
    fn from_card(card: Arc<Card>) -> Option<Self>;

    fn into_inner(self) -> Arc<Card>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(pairs: &[(&str, &str)]) -> Vec<StatusLine> {
        pairs.iter().map(|&(k, v)| StatusLine::new(k, v)).collect()
    }

    #[test]
    fn test_parse_card_info() {
        let mut card = Card::new("SERIAL", "p15");
        card.set_card_info(&lines(&[
            ("APPVERSION", "0304"),
            ("CARDTYPE", "yubikey"),
            ("CARDVERSION", "050403"),
            ("DISP-NAME", "Doe<<John<Paul"),
            ("MANUFACTURER", "0 www.atos.net/cardos [R&S]"),
            ("KEYPAIRINFO", "GRIP1 P15.1 sc - rsa2048"),
            ("EXTCAP", "gc=1"),
            ("EXTCAP", "ki=1"),
        ]));

        assert_eq!(card.app_version(), 0x0304);
        assert_eq!(card.display_app_version(), "3.4");
        assert_eq!(card.card_type(), "yubikey");
        assert_eq!(card.display_card_version(), "5.4.3");
        assert_eq!(card.card_holder(), "John Paul Doe");
        assert_eq!(card.manufacturer(), "www.atos.net/cardos [R&S]");
        assert_eq!(card.key_info("P15.1").map(|k| k.grip.as_str()), Some("GRIP1"));
        assert!(card.key_info("P15.2").is_none());
        assert_eq!(card.card_info_values("EXTCAP"), ["gc=1", "ki=1"]);
        assert_eq!(card.status(), CardStatus::NoCard);
    }

    #[test]
    fn test_set_manufacturer_replaces_value() {
        let mut card = Card::new("SERIAL", "openpgp");
        assert_eq!(card.manufacturer(), "");
        card.set_manufacturer("unknown");
        card.set_manufacturer("Yubico");
        assert_eq!(card.manufacturer(), "Yubico");
        assert_eq!(card.card_info_values("MANUFACTURER"), ["Yubico"]);
    }

    #[test]
    fn test_invalid_keypairinfo_flags_error() {
        let mut card = Card::new("SERIAL", "nks");
        card.set_card_info(&lines(&[("KEYPAIRINFO", "GRIPONLY")]));
        assert_eq!(card.status(), CardStatus::CardError);
        assert!(card.key_infos().is_empty());
    }

    #[test]
    fn test_key_fpr() {
        let mut card = Card::new("SERIAL", "openpgp");
        card.set_card_info(&lines(&[
            ("KEY-FPR", "1 AAAA"),
            ("KEY-FPR", "3 CCCC"),
            ("KEY-FPR", "9 FFFF"),
        ]));
        assert_eq!(card.key_fingerprint("OPENPGP.1"), Some("AAAA"));
        assert_eq!(card.key_fingerprint("OPENPGP.2"), None);
        assert_eq!(card.key_fingerprint("OPENPGP.3"), Some("CCCC"));

        card.set_card_info(&lines(&[("KEY-FPR", "1")]));
        assert_eq!(card.status(), CardStatus::CardError);
    }

    #[test]
    fn test_pin_labels_must_match_counters() {
        let mut card = Card::new("SERIAL", "piv");
        card.set_card_info(&lines(&[
            ("CHV-LABEL", "PIN PUK"),
            ("CHV-STATUS", "3 10"),
        ]));
        assert_eq!(card.pin_labels(), ["PIN", "PUK"]);
        assert_eq!(card.pin_counters(), [3, 10]);

        card.set_card_info(&lines(&[("CHV-STATUS", "3 10 5")]));
        assert!(card.pin_labels().is_empty());
    }

    #[test]
    fn test_card_holder() {
        assert_eq!(parse_card_holder("Doe<<John"), "John Doe");
        assert_eq!(parse_card_holder("Doe<<John<Paul"), "John Paul Doe");
        assert_eq!(parse_card_holder("von<Bergen<<Anna"), "Anna von Bergen");
        assert_eq!(parse_card_holder("Doe"), "Doe");
        assert_eq!(parse_card_holder(""), "");
    }

    #[test]
    fn test_equality_ignores_raw_attributes_for_generic_cards() {
        let mut a = Card::with_status("S1", "geldkarte", CardStatus::CardUsable);
        let b = a.clone();
        a.add_card_info("EXTCAP", "gc=1");
        a.update_key_info(KeyPairInfo::from_status_line("G X.1"));
        assert_eq!(a, b);

        let mut c = b.clone();
        c.set_pin_states(vec![PinState::NullPin]);
        assert_ne!(b, c);

        let d = Card::with_status("S1", "geldkarte", CardStatus::CardError);
        assert_ne!(b, d);
    }
}
