//! Value types parsed from agent status lines

mod algorithm_info;
mod app_type;
mod card_app;
mod key_pair_info;
mod pin_state;
mod status_line;
mod version;

pub use algorithm_info::AlgorithmInfo;
pub use app_type::AppType;
pub use card_app::{Action, CardApp, CardStatus};
pub use key_pair_info::KeyPairInfo;
pub use pin_state::PinState;
pub use status_line::StatusLine;
pub use version::{format_version, parse_decimal_version, parse_hex_version};
