use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;

use super::{Card, CardKind};
use crate::types::{AlgorithmInfo, AppType, KeyPairInfo, StatusLine};

/// PIV specific card state
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PivData {
    certificates: BTreeMap<String, Bytes>,
}

impl PivData {
    pub fn certificate(&self, key_ref: &str) -> Option<&Bytes> {
        self.certificates.get(key_ref)
    }

    pub(crate) fn set_certificate(&mut self, key_ref: &str, data: Bytes) {
        self.certificates.insert(key_ref.to_string(), data);
    }
}

/// Card snapshot known to hold the PIV application
#[derive(Debug, Clone)]
pub struct PivCard(Arc<Card>);

app_card!(PivCard, "piv", CardKind::Piv(_));

impl PivCard {
    pub const PIV_AUTHENTICATION_KEY_REF: &'static str = "PIV.9A";
    pub const CARD_AUTHENTICATION_KEY_REF: &'static str = "PIV.9E";
    pub const DIGITAL_SIGNATURE_KEY_REF: &'static str = "PIV.9C";
    pub const KEY_MANAGEMENT_KEY_REF: &'static str = "PIV.9D";

    pub const PIN_KEY_REF: &'static str = "PIV.80";
    pub const PUK_KEY_REF: &'static str = "PIV.81";

    /// Key slots every PIV card has, with their usage
    pub fn supported_keys() -> Vec<KeyPairInfo> {
        vec![
            KeyPairInfo::slot(Self::PIV_AUTHENTICATION_KEY_REF, "a"),
            KeyPairInfo::slot(Self::CARD_AUTHENTICATION_KEY_REF, "a"),
            KeyPairInfo::slot(Self::DIGITAL_SIGNATURE_KEY_REF, "sc"),
            KeyPairInfo::slot(Self::KEY_MANAGEMENT_KEY_REF, "e"),
        ]
    }

    pub fn key_display_name(key_ref: &str) -> Option<&'static str> {
        match key_ref {
            Self::PIV_AUTHENTICATION_KEY_REF => Some("PIV Authentication Key"),
            Self::CARD_AUTHENTICATION_KEY_REF => Some("Card Authentication Key"),
            Self::DIGITAL_SIGNATURE_KEY_REF => Some("Digital Signature Key"),
            Self::KEY_MANAGEMENT_KEY_REF => Some("Key Management Key"),
            _ => None,
        }
    }

    /// Algorithms a slot can generate
    ///
    /// P-384 is only allowed for the signature and key management keys.
    pub fn supported_algorithms(key_ref: &str) -> Vec<AlgorithmInfo> {
        match key_ref {
            Self::KEY_MANAGEMENT_KEY_REF => vec![
                AlgorithmInfo::new("rsa2048", "RSA key transport (2048 bits)"),
                AlgorithmInfo::new("nistp256", "ECDH (Curve P-256)"),
                AlgorithmInfo::new("nistp384", "ECDH (Curve P-384)"),
            ],
            Self::DIGITAL_SIGNATURE_KEY_REF => vec![
                AlgorithmInfo::new("rsa2048", "RSA (2048 bits)"),
                AlgorithmInfo::new("nistp256", "ECDSA (Curve P-256)"),
                AlgorithmInfo::new("nistp384", "ECDSA (Curve P-384)"),
            ],
            _ => vec![
                AlgorithmInfo::new("rsa2048", "RSA (2048 bits)"),
                AlgorithmInfo::new("nistp256", "ECDSA (Curve P-256)"),
            ],
        }
    }
}

/// Build a PIV card from the output of `SCD LEARN --force`
pub(crate) fn from_learn(mut card: Card, lines: &[StatusLine]) -> Card {
    card.set_kind(CardKind::Piv(PivData::default()), AppType::Piv);
    card.set_initial_key_infos(PivCard::supported_keys());
    card.set_key_refs(
        PivCard::DIGITAL_SIGNATURE_KEY_REF,
        PivCard::KEY_MANAGEMENT_KEY_REF,
        PivCard::PIV_AUTHENTICATION_KEY_REF,
    );
    card.set_card_info(lines);
    card
}

pub(crate) fn set_certificate_data(card: &mut Card, key_ref: &str, data: Bytes) {
    if let CardKind::Piv(piv) = card.kind_mut() {
        piv.set_certificate(key_ref, data);
    }
}
