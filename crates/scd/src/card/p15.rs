use std::sync::Arc;

use super::{Card, CardKind};
use crate::types::{AppType, StatusLine};

/// Card snapshot known to hold a PKCS#15 application
#[derive(Debug, Clone)]
pub struct P15Card(Arc<Card>);

app_card!(P15Card, "p15", CardKind::P15);

/// Build a PKCS#15 card from `LEARN` output plus the `KEY-FPR` attributes
///
/// `$SIGNKEYID` and `$ENCRKEYID` select the signing and encryption keys.
pub(crate) fn from_learn(mut card: Card, lines: &[StatusLine]) -> Card {
    card.set_kind(CardKind::P15, AppType::P15);
    card.set_card_info(lines);
    card
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::AppCard;

    #[test]
    fn test_key_ids() {
        let lines = [
            StatusLine::new("KEYPAIRINFO", "GRIPS P15-5015.3F11 sc"),
            StatusLine::new("$SIGNKEYID", "P15-5015.3F11"),
            StatusLine::new("$ENCRKEYID", "P15-5015.3F12"),
        ];
        let card = from_learn(Card::new("SERIAL", "p15"), &lines);
        let card = P15Card::from_card(Arc::new(card)).unwrap();

        assert_eq!(card.signing_key_ref(), "P15-5015.3F11");
        assert_eq!(card.encryption_key_ref(), "P15-5015.3F12");
        assert!(card.has_signing_key());
        assert!(!card.has_encryption_key());
        assert_eq!(card.card_info("$SIGNKEYID"), None);
    }
}
