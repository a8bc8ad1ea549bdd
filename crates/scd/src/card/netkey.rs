use std::sync::Arc;

use tracing::warn;

use super::{Card, CardKind};
use crate::types::{AppType, PinState};

/// Card snapshot known to hold the NetKey application
#[derive(Debug, Clone)]
pub struct NetKeyCard(Arc<Card>);

app_card!(NetKeyCard, "nks", CardKind::NetKey);

impl NetKeyCard {
    pub const NKS_PIN_KEY_REF: &'static str = "PW1.CH";
    pub const SIGG_PIN_KEY_REF: &'static str = "PW1.CH.SIG";

    // Pin states: 0 NKS PIN, 1 NKS PUK, 2 SigG PIN, 3 SigG PUK

    pub fn has_nks_null_pin(&self) -> bool {
        null_pin_at(self.pin_states(), 0, 2)
    }

    pub fn has_sigg_null_pin(&self) -> bool {
        null_pin_at(self.pin_states(), 2, 4)
    }
}

fn null_pin_at(states: &[PinState], index: usize, min_len: usize) -> bool {
    if states.len() < min_len {
        warn!("Invalid size of pin states: {}", states.len());
        return false;
    }
    states[index] == PinState::NullPin
}

pub(crate) fn init(card: &mut Card) {
    card.set_kind(CardKind::NetKey, AppType::NetKey);
}
