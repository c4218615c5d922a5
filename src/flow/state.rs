use std::fmt;

use serde::Serialize;

/// Where a payment session stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowState {
    Disconnected,
    WalletConnected,
    InvoicePending,
    AwaitingSignature,
    Submitted,
    Confirmed,
    TimedOut,
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlowState::Disconnected => "disconnected",
            FlowState::WalletConnected => "wallet_connected",
            FlowState::InvoicePending => "invoice_pending",
            FlowState::AwaitingSignature => "awaiting_signature",
            FlowState::Submitted => "submitted",
            FlowState::Confirmed => "confirmed",
            FlowState::TimedOut => "timed_out",
        };
        f.write_str(name)
    }
}
