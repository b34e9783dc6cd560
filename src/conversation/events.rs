//! Inbound user events and the replies sent back to the chat transport

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapChoice {
    All,
    Custom,
    Later,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserEvent {
    StartBridge,
    StartSwap,
    Text {
        text: String,
    },
    SwapChoice {
        choice: SwapChoice,
    },
    Confirm,
    Cancel,
    /// The wallet-connect collaborator saw the user sign the source transfer
    WalletConfirmed {
        #[serde(default)]
        transaction_id: Option<Uuid>,
        source_tx_ref: String,
    },
    WalletRejected,
    CheckBridges,
}

impl UserEvent {
    pub fn name(&self) -> &'static str {
        match self {
            UserEvent::StartBridge => "start_bridge",
            UserEvent::StartSwap => "start_swap",
            UserEvent::Text { .. } => "text",
            UserEvent::SwapChoice { .. } => "swap_choice",
            UserEvent::Confirm => "confirm",
            UserEvent::Cancel => "cancel",
            UserEvent::WalletConfirmed { .. } => "wallet_confirmed",
            UserEvent::WalletRejected => "wallet_rejected",
            UserEvent::CheckBridges => "check_bridges",
        }
    }
}

/// What the transport should show the user next
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum Reply {
    ConnectWallet,
    AskAmount,
    AskDestinationWallet,
    BridgeQuote {
        transaction_id: Uuid,
        amount_in: Decimal,
        amount_out: Decimal,
        destination_wallet: String,
    },
    ApproveInWallet {
        transaction_id: Uuid,
        external_ref: String,
    },
    BridgeSubmitted {
        transaction_id: Uuid,
        source_tx_ref: String,
    },
    BridgeRejected {
        transaction_id: Uuid,
    },
    ConfirmationExpired {
        transaction_id: Uuid,
    },
    NothingToSwap,
    SwapOptions {
        available: Decimal,
        destination_wallet: String,
        output_asset: String,
    },
    AskSwapAmount {
        available: Decimal,
        minimum: Decimal,
    },
    SwapQuote {
        amount: Decimal,
        commission: Decimal,
        net_amount: Decimal,
        output_asset: String,
        amount_out: Decimal,
    },
    SwapCompleted {
        transaction_id: Uuid,
        amount_out: Decimal,
        settlement_tx_hash: String,
    },
    SwapPostponed,
    BridgeCheck {
        completed: usize,
        failed: usize,
        still_pending: usize,
    },
    Cancelled,
    Invalid {
        message: String,
    },
    Unexpected {
        event: String,
        step: String,
    },
    Failed {
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_parse_from_transport_json() {
        let event: UserEvent =
            serde_json::from_value(serde_json::json!({ "type": "text", "text": "50,5" })).unwrap();
        assert_eq!(
            event,
            UserEvent::Text {
                text: "50,5".into()
            }
        );

        let event: UserEvent = serde_json::from_value(serde_json::json!({
            "type": "wallet_confirmed",
            "source_tx_ref": "te6cc"
        }))
        .unwrap();
        assert_eq!(event.name(), "wallet_confirmed");

        let event: UserEvent = serde_json::from_value(serde_json::json!({
            "type": "swap_choice",
            "choice": "all"
        }))
        .unwrap();
        assert_eq!(
            event,
            UserEvent::SwapChoice {
                choice: SwapChoice::All
            }
        );
    }
}
