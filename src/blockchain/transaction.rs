use chrono::{DateTime, SecondsFormat, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use std::fmt;

use super::crypto::{verify_signature, Address, CryptoError, DigitalSignature, Wallet};

/// Sender of system-minted reward transactions
pub const SYSTEM_ADDRESS: &str = "0x0";

/// Errors that can occur during transaction operations
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("Invalid amount: {0} (must be greater than zero)")]
    InvalidAmount(f64),

    #[error("Invalid fee: {0} (must not be negative)")]
    InvalidFee(f64),

    #[error("Transaction {0} is already signed")]
    AlreadySigned(String),

    #[error("Failed to sign transaction: {0}")]
    SigningError(String),

    #[error("Transaction {0} is not signed")]
    NotSigned(String),

    #[error("Crypto error: {0}")]
    CryptoError(#[from] CryptoError),

    #[error("System error: {0}")]
    SystemError(String),
}

/// Represents a transaction in the blockchain
///
/// Fields are only readable through accessors: once signed, the content a
/// signature covers cannot be changed in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct Transaction {
    /// Version of the transaction structure
    #[serde(default = "default_version")]
    version: u32,

    /// Unique identifier for the transaction
    id: String,

    /// Sender's address
    sender: Address,

    /// Recipient's address
    recipient: Address,

    /// Amount being transferred
    amount: f64,

    /// Transaction fee
    fee: f64,

    /// Timestamp when the transaction was created
    #[schema(value_type = String, example = "2023-01-01T12:00:00Z")]
    timestamp: DateTime<Utc>,

    /// Digital signature of the transaction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    signature: Option<DigitalSignature>,
}

/// Default version for transactions
fn default_version() -> u32 {
    1
}

impl Transaction {
    /// Creates a new unsigned transaction
    ///
    /// # Arguments
    ///
    /// * `sender` - The address of the sender
    /// * `recipient` - The address of the recipient
    /// * `amount` - The amount to transfer, must be greater than zero
    /// * `fee` - The transaction fee, must not be negative
    ///
    /// # Returns
    ///
    /// A new Transaction instance, or `InvalidAmount` / `InvalidFee`
    pub fn new(
        sender: Address,
        recipient: Address,
        amount: f64,
        fee: f64,
    ) -> Result<Self, TransactionError> {
        check_amount(amount)?;
        check_fee(fee)?;

        Ok(Transaction {
            version: default_version(),
            id: Uuid::new_v4().to_string(),
            sender,
            recipient,
            amount,
            fee,
            timestamp: Utc::now(),
            signature: None,
        })
    }

    /// Creates a new reward transaction (mining reward plus collected fees)
    ///
    /// Reward transactions are minted by the system and carry no signature.
    pub fn new_reward(recipient: Address, amount: f64) -> Self {
        Transaction {
            version: default_version(),
            id: Uuid::new_v4().to_string(),
            sender: Address::new(SYSTEM_ADDRESS),
            recipient,
            amount,
            fee: 0.0,
            timestamp: Utc::now(),
            signature: None,
        }
    }

    /// Re-checks the amount and fee invariants
    ///
    /// Needed for transactions that arrived through deserialization rather
    /// than through `Transaction::new`.
    pub fn validate(&self) -> Result<(), TransactionError> {
        if self.is_reward() {
            return Ok(());
        }

        check_amount(self.amount)?;
        check_fee(self.fee)
    }

    /// Signs the transaction with a wallet
    ///
    /// # Arguments
    ///
    /// * `wallet` - The wallet to sign with, must own the sender address
    ///
    /// # Returns
    ///
    /// Result indicating success or failure
    pub fn sign(&mut self, wallet: &Wallet) -> Result<(), TransactionError> {
        if self.signature.is_some() {
            return Err(TransactionError::AlreadySigned(self.id.clone()));
        }

        if wallet.address() != &self.sender {
            return Err(TransactionError::SigningError(format!(
                "key for {} cannot sign for sender {}",
                wallet.address(),
                self.sender
            )));
        }

        let message = self.canonical_bytes()?;
        self.signature = Some(wallet.sign(&message));

        Ok(())
    }

    /// Signs the transaction with a hex encoded secret key
    pub fn sign_with_secret_hex(&mut self, secret_key_hex: &str) -> Result<(), TransactionError> {
        if self.signature.is_some() {
            return Err(TransactionError::AlreadySigned(self.id.clone()));
        }

        let wallet = Wallet::from_secret_hex(secret_key_hex)
            .map_err(|e| TransactionError::SigningError(e.to_string()))?;

        self.sign(&wallet)
    }

    /// Returns true iff the signature is valid for the sender and content
    ///
    /// Reward transactions are exempt from signature verification.
    pub fn verify(&self) -> bool {
        if self.is_reward() {
            return true;
        }

        match self.verify_signature() {
            Ok(valid) => valid,
            Err(err) => {
                debug!("Transaction {} failed verification: {}", self.id, err);
                false
            }
        }
    }

    /// Verifies the transaction's signature
    ///
    /// # Returns
    ///
    /// Result indicating if the signature is valid
    pub fn verify_signature(&self) -> Result<bool, TransactionError> {
        let signature = match &self.signature {
            Some(sig) => sig,
            None => return Err(TransactionError::NotSigned(self.id.clone())),
        };

        let public_key = self.sender.to_public_key()?;
        let message = self.canonical_bytes()?;

        verify_signature(&message, signature, &public_key).map_err(TransactionError::from)
    }

    /// Converts the transaction to the bytes covered by the signature
    fn canonical_bytes(&self) -> Result<Vec<u8>, TransactionError> {
        let data = serde_json::json!({
            "version": self.version,
            "id": self.id,
            "sender": self.sender.0,
            "recipient": self.recipient.0,
            "amount": self.amount,
            "fee": self.fee,
            "timestamp": self.timestamp,
        });

        serde_json::to_vec(&data).map_err(|e| TransactionError::SystemError(e.to_string()))
    }

    /// Checks if the transaction is a system-minted reward
    pub fn is_reward(&self) -> bool {
        self.sender.0 == SYSTEM_ADDRESS
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn sender(&self) -> &Address {
        &self.sender
    }

    pub fn recipient(&self) -> &Address {
        &self.recipient
    }

    pub fn amount(&self) -> f64 {
        self.amount
    }

    pub fn fee(&self) -> f64 {
        self.fee
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn signature(&self) -> Option<&DigitalSignature> {
        self.signature.as_ref()
    }

    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }

    /// Renders a human-readable summary of the transaction
    pub fn display_transaction(&self) -> String {
        let signature = match (&self.signature, self.is_reward()) {
            (_, true) => "system reward".to_string(),
            (Some(sig), false) => sig.0.clone(),
            (None, false) => "unsigned".to_string(),
        };

        format!(
            "Transaction {}\n  From:      {}\n  To:        {}\n  Amount:    {:.8}\n  Fee:       {:.8}\n  Timestamp: {}\n  Signature: {}",
            self.id,
            self.sender,
            self.recipient,
            self.amount,
            self.fee,
            self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            signature,
        )
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_transaction())
    }
}

fn check_amount(amount: f64) -> Result<(), TransactionError> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(TransactionError::InvalidAmount(amount));
    }
    Ok(())
}

fn check_fee(fee: f64) -> Result<(), TransactionError> {
    if !fee.is_finite() || fee < 0.0 {
        return Err(TransactionError::InvalidFee(fee));
    }
    Ok(())
}
