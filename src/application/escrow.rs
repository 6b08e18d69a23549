//! Custodial escrow accounts and their payout to drivers.

use crate::config::SettlementConfig;
use crate::domain::fare::{from_minor_units, to_minor_units};
use crate::domain::ledger::{PaymentTransaction, address_of};
use crate::domain::payment::{PaymentRecord, PaymentStatus};
use crate::domain::ports::{LedgerGatewayRef, PaymentStoreRef};
use crate::error::{EngineError, Result};
use ed25519_dalek::SigningKey;
use rand_core::OsRng;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::fmt;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// Rounds an unsigned payment stays valid for after it is built.
pub const VALIDITY_WINDOW: u64 = 1_000;

/// Generates escrow accounts, keeps their signing keys and pays them out.
///
/// Signing keys never leave the vault: callers only ever see addresses.
pub struct EscrowSettlementService {
    ledger: LedgerGatewayRef,
    payments: PaymentStoreRef,
    vault: Mutex<HashMap<String, SigningKey>>,
    minor_units_per_major: u64,
    max_rounds: u64,
}

impl fmt::Debug for EscrowSettlementService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EscrowSettlementService")
            .field("minor_units_per_major", &self.minor_units_per_major)
            .field("max_rounds", &self.max_rounds)
            .finish_non_exhaustive()
    }
}

impl EscrowSettlementService {
    pub fn new(ledger: LedgerGatewayRef, payments: PaymentStoreRef, config: &SettlementConfig) -> Self {
        Self {
            ledger,
            payments,
            vault: Mutex::new(HashMap::new()),
            minor_units_per_major: config.minor_units_per_major,
            max_rounds: config.escrow_max_rounds,
        }
    }

    /// Creates a fresh keypair and returns its address. Addresses are never reused.
    pub async fn generate_escrow_account(&self) -> String {
        let key = SigningKey::generate(&mut OsRng);
        let address = address_of(&key.verifying_key());
        self.vault.lock().await.insert(address.clone(), key);
        address
    }

    pub async fn holds_key(&self, address: &str) -> bool {
        self.vault
            .lock()
            .await
            .contains_key(&address.to_ascii_uppercase())
    }

    /// Unsigned payment valid from the ledger's current round, ready for signing.
    pub async fn build_payment(
        &self,
        sender: &str,
        receiver: &str,
        amount: Decimal,
        note: impl Into<String>,
    ) -> Result<PaymentTransaction> {
        let round = self.ledger.current_round().await?;
        Ok(PaymentTransaction {
            sender: sender.to_ascii_uppercase(),
            receiver: receiver.to_ascii_uppercase(),
            amount_minor: to_minor_units(amount, self.minor_units_per_major)?,
            first_valid: round,
            last_valid: round + VALIDITY_WINDOW,
            note: note.into(),
        })
    }

    /// Pays `amount` out of an escrow account and waits for the ledger to confirm it.
    ///
    /// Returns the release transaction id, or `ConfirmationTimeout` once the
    /// configured number of rounds has passed.
    pub async fn release_escrow(
        &self,
        escrow_address: &str,
        driver_address: &str,
        amount: Decimal,
    ) -> Result<String> {
        let key = self
            .vault
            .lock()
            .await
            .get(&escrow_address.to_ascii_uppercase())
            .cloned()
            .ok_or_else(|| EngineError::not_found("Escrow account", escrow_address))?;

        let signed = self
            .build_payment(escrow_address, driver_address, amount, "escrow release")
            .await?
            .sign(&key)?;
        let tx_id = self
            .ledger
            .submit_signed_transaction(&signed.to_bytes()?)
            .await?;
        let confirmation = self.ledger.await_confirmation(&tx_id, self.max_rounds).await?;

        info!(
            escrow = escrow_address,
            driver = driver_address,
            %amount,
            %tx_id,
            round = confirmation.confirmed_round,
            "escrow released"
        );
        Ok(tx_id)
    }

    /// Releases an escrowed payment to the driver and marks the record released.
    ///
    /// The payment is claimed (`escrow → releasing`) before anything is signed, so
    /// concurrent callers pay it out at most once. Returns `None` when another
    /// caller already holds or finished the claim. A failed payout puts the
    /// payment back in escrow.
    pub async fn release_payment(
        &self,
        payment: &PaymentRecord,
        escrow_address: &str,
        driver_address: &str,
    ) -> Result<Option<PaymentRecord>> {
        let claimed = match self
            .payments
            .swap_status(payment.id, PaymentStatus::Escrow, PaymentStatus::Releasing, None)
            .await
        {
            Ok(claimed) => claimed,
            Err(EngineError::InvalidState(reason)) => {
                debug!(payment_id = %payment.id, %reason, "payout already claimed");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        match self
            .release_escrow(escrow_address, driver_address, claimed.amount)
            .await
        {
            Ok(tx_id) => {
                let released = self
                    .payments
                    .swap_status(
                        payment.id,
                        PaymentStatus::Releasing,
                        PaymentStatus::Released,
                        Some(tx_id.clone()),
                    )
                    .await
                    .inspect_err(|e| {
                        error!(payment_id = %payment.id, %tx_id, error = %e, "payout sent but not recorded");
                    })?;
                Ok(Some(released))
            }
            Err(e) => {
                if let Err(revert) = self
                    .payments
                    .swap_status(payment.id, PaymentStatus::Releasing, PaymentStatus::Escrow, None)
                    .await
                {
                    error!(payment_id = %payment.id, error = %revert, "failed to return payment to escrow");
                }
                Err(e)
            }
        }
    }

    /// Current balance of an account in major units.
    pub async fn balance(&self, address: &str) -> Result<Decimal> {
        let minor = self.ledger.account_balance(address).await?;
        Ok(from_minor_units(minor, self.minor_units_per_major))
    }
}
