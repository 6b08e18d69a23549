//! An in-process ledger with rounds, balances and signature checks.
//!
//! Stands in for the external chain in tests and in the command-line runner.

use crate::domain::ledger::{
    Confirmation, LedgerTransaction, SignedTransaction, TxType, address_of,
};
use crate::domain::ports::LedgerGateway;
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use ed25519_dalek::SigningKey;
use rand_core::OsRng;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// A ledger account whose key is held by the caller.
#[derive(Clone)]
pub struct SimulatedAccount {
    pub address: String,
    pub key: SigningKey,
}

struct Pending {
    tx_id: String,
    signed: SignedTransaction,
}

#[derive(Default)]
struct LedgerState {
    round: u64,
    balances: HashMap<String, u64>,
    pending: Vec<Pending>,
    confirmed: HashMap<String, LedgerTransaction>,
    /// Confirmed but not yet visible to lookups.
    unindexed: Vec<LedgerTransaction>,
    /// Expired or rejected at block time; cleared if the same bytes are resubmitted.
    dropped: HashSet<String>,
    halted: bool,
    defer_indexing: bool,
    transfers: u64,
}

impl LedgerState {
    fn balance(&self, address: &str) -> u64 {
        self.balances.get(address).copied().unwrap_or(0)
    }

    fn transfer(&mut self, sender: &str, receiver: &str, amount: u64) -> Result<()> {
        let available = self.balance(sender);
        if available < amount {
            return Err(EngineError::Ledger(format!(
                "Overspend: {sender} holds {available}, needs {amount}"
            )));
        }
        self.balances.insert(sender.to_string(), available - amount);
        *self.balances.entry(receiver.to_string()).or_insert(0) += amount;
        Ok(())
    }

    fn index(&mut self, tx: LedgerTransaction) {
        if self.defer_indexing {
            self.unindexed.push(tx);
        } else {
            self.confirmed.insert(tx.id.clone(), tx);
        }
    }

    fn produce_block(&mut self) -> u64 {
        self.round += 1;
        for tx in std::mem::take(&mut self.unindexed) {
            self.confirmed.insert(tx.id.clone(), tx);
        }
        if self.halted {
            return self.round;
        }

        let round = self.round;
        for Pending { tx_id, signed } in std::mem::take(&mut self.pending) {
            let txn = &signed.txn;
            if round > txn.last_valid {
                debug!(%tx_id, round, "transaction expired");
                self.dropped.insert(tx_id);
                continue;
            }
            if let Err(e) = self.transfer(&txn.sender, &txn.receiver, txn.amount_minor) {
                debug!(%tx_id, error = %e, "transaction rejected");
                self.dropped.insert(tx_id);
                continue;
            }
            self.confirmed.insert(
                tx_id.clone(),
                LedgerTransaction {
                    id: tx_id,
                    tx_type: TxType::Payment,
                    sender: txn.sender.clone(),
                    receiver: Some(txn.receiver.clone()),
                    amount_minor: txn.amount_minor,
                    confirmed_round: Some(round),
                },
            );
        }
        round
    }
}

/// Cloning shares the same ledger.
#[derive(Clone, Default)]
pub struct SimulatedLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl SimulatedLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create_account(&self) -> SimulatedAccount {
        let key = SigningKey::generate(&mut OsRng);
        let address = address_of(&key.verifying_key());
        self.state.lock().await.balances.insert(address.clone(), 0);
        SimulatedAccount { address, key }
    }

    /// Mints `amount_minor` into `address`.
    pub async fn fund(&self, address: &str, amount_minor: u64) {
        let mut state = self.state.lock().await;
        *state.balances.entry(address.to_ascii_uppercase()).or_insert(0) += amount_minor;
    }

    /// Records a transfer signed outside this process, confirmed in a new round.
    ///
    /// Only payments move balances; other transaction types are recorded as-is.
    pub async fn record_transfer(
        &self,
        sender: &str,
        receiver: &str,
        amount_minor: u64,
        tx_type: TxType,
    ) -> Result<String> {
        let mut state = self.state.lock().await;
        let sender = sender.to_ascii_uppercase();
        let receiver = receiver.to_ascii_uppercase();
        if tx_type == TxType::Payment {
            state.transfer(&sender, &receiver, amount_minor)?;
        }
        state.transfers += 1;
        state.round += 1;

        let digest = Sha256::digest(format!(
            "{sender}:{receiver}:{amount_minor}:{tx_type}:{}",
            state.transfers
        ));
        let tx_id = hex::encode_upper(digest);
        let round = state.round;
        state.index(LedgerTransaction {
            id: tx_id.clone(),
            tx_type,
            sender,
            receiver: Some(receiver),
            amount_minor,
            confirmed_round: Some(round),
        });
        Ok(tx_id)
    }

    /// Closes the current round, confirming whatever is pending.
    pub async fn produce_block(&self) -> u64 {
        self.state.lock().await.produce_block()
    }

    /// Stops including transactions in blocks; rounds still advance.
    pub async fn halt(&self) {
        self.state.lock().await.halted = true;
    }

    pub async fn resume(&self) {
        self.state.lock().await.halted = false;
    }

    /// While set, confirmed transactions stay invisible to lookups until the next block.
    pub async fn defer_indexing(&self, defer: bool) {
        self.state.lock().await.defer_indexing = defer;
    }

    pub async fn is_confirmed(&self, tx_id: &str) -> bool {
        self.state.lock().await.confirmed.contains_key(tx_id)
    }
}

#[async_trait]
impl LedgerGateway for SimulatedLedger {
    async fn lookup_transaction(&self, tx_id: &str) -> Result<Option<LedgerTransaction>> {
        let state = self.state.lock().await;
        Ok(state.confirmed.get(tx_id.trim()).cloned())
    }

    async fn submit_signed_transaction(&self, bytes: &[u8]) -> Result<String> {
        let signed = SignedTransaction::from_bytes(bytes)?;
        signed.verify()?;
        let tx_id = signed.txn.tx_id()?;

        let mut state = self.state.lock().await;
        let next_round = state.round + 1;
        if next_round < signed.txn.first_valid || next_round > signed.txn.last_valid {
            return Err(EngineError::Ledger(format!(
                "Transaction {tx_id} is not valid in round {next_round}"
            )));
        }
        if state.confirmed.contains_key(&tx_id) || state.pending.iter().any(|p| p.tx_id == tx_id)
        {
            return Err(EngineError::Ledger(format!(
                "Transaction {tx_id} was already submitted"
            )));
        }
        let available = state.balance(&signed.txn.sender);
        if available < signed.txn.amount_minor {
            return Err(EngineError::Ledger(format!(
                "Overspend: {} holds {available}, needs {}",
                signed.txn.sender, signed.txn.amount_minor
            )));
        }

        state.dropped.remove(&tx_id);
        state.pending.push(Pending {
            tx_id: tx_id.clone(),
            signed,
        });
        Ok(tx_id)
    }

    async fn await_confirmation(&self, tx_id: &str, max_rounds: u64) -> Result<Confirmation> {
        let mut state = self.state.lock().await;
        for waited in 0..=max_rounds {
            if let Some(confirmed_round) =
                state.confirmed.get(tx_id).and_then(|tx| tx.confirmed_round)
            {
                return Ok(Confirmation { confirmed_round });
            }
            if state.dropped.contains(tx_id) {
                return Err(EngineError::Ledger(format!(
                    "Transaction {tx_id} was rejected by the ledger"
                )));
            }
            if waited < max_rounds {
                state.produce_block();
            }
        }
        Err(EngineError::ConfirmationTimeout {
            tx_id: tx_id.to_string(),
            rounds: max_rounds,
        })
    }

    async fn account_balance(&self, address: &str) -> Result<u64> {
        let state = self.state.lock().await;
        Ok(state.balance(&address.to_ascii_uppercase()))
    }

    async fn current_round(&self) -> Result<u64> {
        Ok(self.state.lock().await.round)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ledger::PaymentTransaction;

    async fn payment(
        ledger: &SimulatedLedger,
        from: &SimulatedAccount,
        to: &str,
        amount_minor: u64,
    ) -> Vec<u8> {
        let round = ledger.current_round().await.unwrap();
        PaymentTransaction {
            sender: from.address.clone(),
            receiver: to.to_string(),
            amount_minor,
            first_valid: round,
            last_valid: round + 10,
            note: String::new(),
        }
        .sign(&from.key)
        .unwrap()
        .to_bytes()
        .unwrap()
    }

    #[tokio::test]
    async fn test_submit_and_confirm() {
        let ledger = SimulatedLedger::new();
        let rider = ledger.create_account().await;
        let driver = ledger.create_account().await;
        ledger.fund(&rider.address, 1_000).await;

        let bytes = payment(&ledger, &rider, &driver.address, 400).await;
        let tx_id = ledger.submit_signed_transaction(&bytes).await.unwrap();
        assert!(ledger.lookup_transaction(&tx_id).await.unwrap().is_none());

        let confirmation = ledger.await_confirmation(&tx_id, 5).await.unwrap();
        assert_eq!(confirmation.confirmed_round, 1);

        let tx = ledger.lookup_transaction(&tx_id).await.unwrap().unwrap();
        assert_eq!(tx.tx_type, TxType::Payment);
        assert_eq!(tx.amount_minor, 400);
        assert_eq!(ledger.account_balance(&rider.address).await.unwrap(), 600);
        assert_eq!(ledger.account_balance(&driver.address).await.unwrap(), 400);
    }

    #[tokio::test]
    async fn test_forged_signature_rejected() {
        let ledger = SimulatedLedger::new();
        let rider = ledger.create_account().await;
        let thief = ledger.create_account().await;
        ledger.fund(&rider.address, 1_000).await;

        let mut signed = PaymentTransaction {
            sender: rider.address.clone(),
            receiver: thief.address.clone(),
            amount_minor: 1_000,
            first_valid: 0,
            last_valid: 10,
            note: String::new(),
        }
        .sign(&thief.key)
        .unwrap();
        signed.txn.note = "forged".into();

        let result = ledger
            .submit_signed_transaction(&signed.to_bytes().unwrap())
            .await;
        assert!(matches!(result, Err(EngineError::Ledger(_))));
    }

    #[tokio::test]
    async fn test_overspend_rejected() {
        let ledger = SimulatedLedger::new();
        let rider = ledger.create_account().await;
        let driver = ledger.create_account().await;
        ledger.fund(&rider.address, 100).await;

        let bytes = payment(&ledger, &rider, &driver.address, 400).await;
        assert!(ledger.submit_signed_transaction(&bytes).await.is_err());
    }

    #[tokio::test]
    async fn test_rejected_at_block_time_reports_every_wait() {
        let ledger = SimulatedLedger::new();
        let rider = ledger.create_account().await;
        let driver = ledger.create_account().await;
        ledger.fund(&rider.address, 1_000).await;

        let bytes = payment(&ledger, &rider, &driver.address, 400).await;
        let tx_id = ledger.submit_signed_transaction(&bytes).await.unwrap();
        ledger
            .record_transfer(&rider.address, &driver.address, 800, TxType::Payment)
            .await
            .unwrap();

        for _ in 0..2 {
            let result = ledger.await_confirmation(&tx_id, 3).await;
            assert!(matches!(result, Err(EngineError::Ledger(_))));
        }
        assert!(!ledger.is_confirmed(&tx_id).await);
        assert_eq!(ledger.account_balance(&rider.address).await.unwrap(), 200);

        ledger.fund(&rider.address, 1_000).await;
        let resubmitted = ledger.submit_signed_transaction(&bytes).await.unwrap();
        assert_eq!(resubmitted, tx_id);
        assert!(ledger.await_confirmation(&tx_id, 3).await.is_ok());
    }

    #[tokio::test]
    async fn test_halted_ledger_times_out() {
        let ledger = SimulatedLedger::new();
        let rider = ledger.create_account().await;
        let driver = ledger.create_account().await;
        ledger.fund(&rider.address, 1_000).await;
        ledger.halt().await;

        let bytes = payment(&ledger, &rider, &driver.address, 400).await;
        let tx_id = ledger.submit_signed_transaction(&bytes).await.unwrap();
        let result = ledger.await_confirmation(&tx_id, 2).await;
        assert!(matches!(result, Err(EngineError::ConfirmationTimeout { .. })));

        ledger.resume().await;
        ledger.produce_block().await;
        assert!(ledger.is_confirmed(&tx_id).await);
    }

    #[tokio::test]
    async fn test_deferred_indexing() {
        let ledger = SimulatedLedger::new();
        let rider = ledger.create_account().await;
        let driver = ledger.create_account().await;
        ledger.fund(&rider.address, 1_000).await;
        ledger.defer_indexing(true).await;

        let tx_id = ledger
            .record_transfer(&rider.address, &driver.address, 250, TxType::Payment)
            .await
            .unwrap();
        assert!(ledger.lookup_transaction(&tx_id).await.unwrap().is_none());

        ledger.produce_block().await;
        assert!(ledger.lookup_transaction(&tx_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_non_payment_transfer_keeps_balances() {
        let ledger = SimulatedLedger::new();
        let rider = ledger.create_account().await;
        let driver = ledger.create_account().await;

        let tx_id = ledger
            .record_transfer(&rider.address, &driver.address, 250, TxType::AssetTransfer)
            .await
            .unwrap();
        let tx = ledger.lookup_transaction(&tx_id).await.unwrap().unwrap();
        assert_eq!(tx.tx_type, TxType::AssetTransfer);
        assert_eq!(ledger.account_balance(&driver.address).await.unwrap(), 0);
    }
}
