use std::sync::Arc;

use super::{Card, CardKind};
use crate::types::{AlgorithmInfo, AppType, StatusLine};

/// OpenPGP specific card state
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OpenPgpData {
    pub(crate) pubkey_url: String,
}

/// Card snapshot known to hold the OpenPGP application
#[derive(Debug, Clone)]
pub struct OpenPgpCard(Arc<Card>);

app_card!(OpenPgpCard, "openpgp", CardKind::OpenPgp(_));

impl OpenPgpCard {
    pub const SIGNATURE_KEY_REF: &'static str = "OPENPGP.1";
    pub const ENCRYPTION_KEY_REF: &'static str = "OPENPGP.2";
    pub const AUTHENTICATION_KEY_REF: &'static str = "OPENPGP.3";

    pub const PIN_KEY_REF: &'static str = "OPENPGP.1";
    pub const RESET_CODE_KEY_REF: &'static str = "OPENPGP.2";
    pub const ADMIN_PIN_KEY_REF: &'static str = "OPENPGP.3";

    pub fn sig_fpr(&self) -> Option<&str> {
        self.key_fingerprint(Self::SIGNATURE_KEY_REF)
    }

    pub fn enc_fpr(&self) -> Option<&str> {
        self.key_fingerprint(Self::ENCRYPTION_KEY_REF)
    }

    pub fn auth_fpr(&self) -> Option<&str> {
        self.key_fingerprint(Self::AUTHENTICATION_KEY_REF)
    }

    /// URL of the public key, from `PUBKEY-URL`
    pub fn pubkey_url(&self) -> &str {
        match self.kind() {
            CardKind::OpenPgp(data) => &data.pubkey_url,
            _ => "",
        }
    }

    pub fn key_display_name(key_ref: &str) -> Option<&'static str> {
        match key_ref {
            Self::SIGNATURE_KEY_REF => Some("Signature Key"),
            Self::ENCRYPTION_KEY_REF => Some("Encryption Key"),
            Self::AUTHENTICATION_KEY_REF => Some("Authentication Key"),
            _ => None,
        }
    }

    /// Algorithms the card announced for a slot through `KEY-ATTR-INFO`
    pub fn supported_algorithms(&self, key_ref: &str) -> Vec<AlgorithmInfo> {
        self.card_info_values("KEY-ATTR-INFO")
            .iter()
            .filter_map(|value| value.split_once(' '))
            .filter(|(slot, _)| *slot == key_ref)
            .map(|(_, algorithm)| AlgorithmInfo::new(algorithm, algorithm))
            .collect()
    }
}

/// Build an OpenPGP card from the output of `SCD LEARN --force`
pub(crate) fn from_learn(mut card: Card, lines: &[StatusLine]) -> Card {
    card.set_kind(CardKind::OpenPgp(OpenPgpData::default()), AppType::OpenPgp);
    card.set_key_refs(
        OpenPgpCard::SIGNATURE_KEY_REF,
        OpenPgpCard::ENCRYPTION_KEY_REF,
        OpenPgpCard::AUTHENTICATION_KEY_REF,
    );
    card.set_card_info(lines);
    card
}

/// Whether the serial number follows the OpenPGP card AID layout
pub(crate) fn is_openpgp_serial(serial_number: &str) -> bool {
    serial_number.len() == 32 && serial_number.starts_with("D27600012401")
}

/// Derive the manufacturer from an OpenPGP card serial number
///
/// Bytes 8 and 9 of the AID hold the vendor id. Returns `None` for serial
/// numbers that are not OpenPGP AIDs.
pub fn manufacturer_from_serial(serial_number: &str) -> Option<&'static str> {
    if !is_openpgp_serial(serial_number) {
        return None;
    }
    let id = u16::from_str_radix(serial_number.get(16..20)?, 16).ok()?;

    let name = match id {
        0x0001 => "PPC Card Systems",
        0x0002 => "Prism",
        0x0003 => "OpenFortress",
        0x0004 => "Wewid",
        0x0005 => "ZeitControl",
        0x0006 => "Yubico",
        0x0007 => "OpenKMS",
        0x0008 => "LogoEmail",
        0x002A => "Magrathea",
        0x1337 => "Warsaw Hackerspace",
        0xF517 => "FSIJ",
        0x0000 | 0xFFFF => "test card",
        id if id & 0xFF00 == 0xFF00 => "unmanaged S/N range",
        _ => "unknown",
    };
    Some(name)
}

/// Split a 12 character OpenPGP display serial after the vendor part
pub(crate) fn format_display_serial(serial_number: &str, display: &str) -> String {
    if is_openpgp_serial(serial_number) && display.len() == 12 && display.is_char_boundary(4) {
        format!("{} {}", &display[..4], &display[4..])
    } else {
        display.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::AppCard;

    const SERIAL: &str = "D2760001240103040006123456780000";

    #[test]
    fn test_manufacturer_from_serial() {
        assert_eq!(manufacturer_from_serial(SERIAL), Some("Yubico"));
        assert_eq!(
            manufacturer_from_serial("D276000124010304F517123456780000"),
            Some("FSIJ")
        );
        assert_eq!(
            manufacturer_from_serial("D276000124010304FF01123456780000"),
            Some("unmanaged S/N range")
        );
        assert_eq!(
            manufacturer_from_serial("D2760001240103040099123456780000"),
            Some("unknown")
        );
        assert_eq!(manufacturer_from_serial("D27600012401"), None);
        assert_eq!(manufacturer_from_serial("FFFF0001240103040006123456780000"), None);
    }

    #[test]
    fn test_format_display_serial() {
        assert_eq!(format_display_serial(SERIAL, "000612345678"), "0006 12345678");
        assert_eq!(format_display_serial(SERIAL, "12345678"), "12345678");
        assert_eq!(format_display_serial("0123", "000612345678"), "000612345678");
    }

    #[test]
    fn test_from_learn() {
        let lines = [
            StatusLine::new("KEY-FPR", "1 AAAA"),
            StatusLine::new("KEY-FPR", "2 BBBB"),
            StatusLine::new("KEYPAIRINFO", "GRIP1 OPENPGP.1 sc 1700000000 ed25519"),
            StatusLine::new("PUBKEY-URL", "https://example.org/key.asc"),
            StatusLine::new("CHV-STATUS", "+1 127 127 127 3 0 3"),
            StatusLine::new("KEY-ATTR-INFO", "OPENPGP.1 rsa2048"),
            StatusLine::new("KEY-ATTR-INFO", "OPENPGP.1 ed25519"),
            StatusLine::new("KEY-ATTR-INFO", "OPENPGP.2 cv25519"),
        ];
        let card = from_learn(Card::new(SERIAL, "openpgp"), &lines);
        let card = OpenPgpCard::from_card(Arc::new(card)).unwrap();

        assert_eq!(card.sig_fpr(), Some("AAAA"));
        assert_eq!(card.enc_fpr(), Some("BBBB"));
        assert_eq!(card.auth_fpr(), None);
        assert_eq!(card.pubkey_url(), "https://example.org/key.asc");
        assert_eq!(card.pin_counters(), [3, 0, 3]);
        assert_eq!(card.pin_labels(), ["PIN", "PUK", "Admin PIN"]);
        assert!(card.has_signing_key());
        assert!(!card.has_encryption_key());
        assert_eq!(
            card.supported_algorithms("OPENPGP.1")
                .iter()
                .map(|a| a.id.as_str())
                .collect::<Vec<_>>(),
            ["rsa2048", "ed25519"]
        );
    }
}
