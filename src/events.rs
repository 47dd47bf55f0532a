//! Notifications published to the presentation layer

use crate::claim::FailureReason;
use crate::types::{ContractRef, Nonce, Txid};
use serde::Serialize;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Event {
    Accept {
        nonce: Nonce,
        msg: String,
        txid: Txid,
    },
    Reject {
        nonce: Nonce,
        reason: FailureReason,
    },
    MintedOut {
        #[serde(rename = "ref")]
        contract_ref: ContractRef,
    },
    Loaded {
        #[serde(rename = "ref")]
        contract_ref: ContractRef,
        msg: String,
    },
    NewLocation {
        txid: Txid,
        msg: String,
    },
    /// The requested reference, as given; it may not even parse
    NotFound {
        #[serde(rename = "ref")]
        contract_ref: String,
    },
    General {
        msg: String,
    },
    Stop,
    MintTime {
        seconds: f64,
    },
}

pub type EventSender = mpsc::UnboundedSender<Event>;
pub type EventReceiver = mpsc::UnboundedReceiver<Event>;

pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
