//! Transaction relay
//!
//! The shell hands signed transactions to the network through [`Relay`].
//! [`ChannelRelay`] forwards them over a tokio channel to whatever task
//! speaks to peers, without blocking the caller.

use crate::core::Transaction;
use crate::crypto::Hash256;
use parking_lot::Mutex;
use std::collections::HashSet;
use tokio::sync::mpsc;

/// Hand-off point for outgoing transactions
pub trait Relay: Send + Sync {
    /// Queue `tx` for broadcast; false if it was refused or already known
    fn relay(&self, tx: &Transaction) -> bool;
}

/// Relay backed by an unbounded tokio channel
pub struct ChannelRelay {
    sender: mpsc::UnboundedSender<Transaction>,
    known: Mutex<HashSet<Hash256>>,
}

impl ChannelRelay {
    /// Create a relay and the receiving end the network task drains
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Transaction>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let relay = Self {
            sender,
            known: Mutex::new(HashSet::new()),
        };
        (relay, receiver)
    }

    pub fn known_count(&self) -> usize {
        self.known.lock().len()
    }
}

impl Relay for ChannelRelay {
    fn relay(&self, tx: &Transaction) -> bool {
        let hash = tx.hash();
        if !self.known.lock().insert(hash) {
            log::debug!("Transaction {} already relayed", hash);
            return false;
        }
        match self.sender.send(tx.clone()) {
            Ok(()) => {
                log::info!("Relayed transaction {}", hash);
                true
            }
            Err(_) => {
                log::warn!("Relay channel closed, dropping transaction {}", hash);
                self.known.lock().remove(&hash);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::amount::Fixed8;
    use crate::core::TransactionOutput;
    use crate::crypto::{double_sha256, hash160};

    fn sample_tx(nonce: u32) -> Transaction {
        Transaction::issue(
            vec![TransactionOutput {
                asset_id: double_sha256(b"asset"),
                value: Fixed8::from_whole(1).unwrap(),
                script_hash: hash160(b"to"),
            }],
            nonce,
        )
    }

    #[tokio::test]
    async fn test_relay_forwards_once() {
        let (relay, mut receiver) = ChannelRelay::new();
        let tx = sample_tx(1);

        assert!(relay.relay(&tx));
        assert!(!relay.relay(&tx));
        assert_eq!(receiver.recv().await.unwrap(), tx);
        assert_eq!(relay.known_count(), 1);
    }

    #[test]
    fn test_closed_channel_is_reported() {
        let (relay, receiver) = ChannelRelay::new();
        drop(receiver);
        assert!(!relay.relay(&sample_tx(2)));
        assert_eq!(relay.known_count(), 0);
    }
}
