//! Per-user bridge and swap dialogue
//!
//! Bridge path:
//! `idle → awaiting_amount → awaiting_destination_wallet →
//! awaiting_user_confirmation → awaiting_external_settlement`, after which
//! the row belongs to the reconciler.
//!
//! Swap path:
//! `idle → awaiting_swap_choice → [awaiting_swap_amount] →
//! awaiting_swap_confirmation`.

mod events;
mod machine;
mod session;

pub use events::{Reply, SwapChoice, UserEvent};
pub use machine::{ConversationMachine, MachineParts};
pub use session::ConversationSession;

use lazy_static::lazy_static;
use regex::Regex;

/// Destination-chain address check, supplied by the caller
pub trait AddressValidator: Send + Sync {
    fn is_valid(&self, address: &str) -> bool;
}

lazy_static! {
    static ref BASE58_ADDRESS: Regex = Regex::new(r"^[1-9A-HJ-NP-Za-km-z]{32,44}$").unwrap();
}

/// Base58 public keys of 32 to 44 characters
pub struct Base58AddressValidator;

impl AddressValidator for Base58AddressValidator {
    fn is_valid(&self, address: &str) -> bool {
        BASE58_ADDRESS.is_match(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base58_validator() {
        let v = Base58AddressValidator;
        assert!(v.is_valid("So11111111111111111111111111111111111111112"));
        assert!(!v.is_valid("0x742d35Cc6634C0532925a3b844Bc454e4438f44e"));
        assert!(!v.is_valid("short"));
        assert!(!v.is_valid("So1111111111111111111111111111111111111111O"));
    }
}
