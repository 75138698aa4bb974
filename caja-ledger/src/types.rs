//! Core types shared by the ledgers
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Exact arithmetic (Decimal for money, two-decimal currency)
//! - Time-ordered identifiers (UUIDv7)

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Decimal places allowed in any monetary amount
pub const CURRENCY_SCALE: u32 = 2;

/// Largest single amount accepted, in cents (1,000,000,000.00)
pub const MAX_AMOUNT_CENTS: i64 = 100_000_000_000;

/// Maximum length of a patient identifier (bytes)
pub const MAX_PATIENT_ID_LEN: usize = 128;

/// Opaque patient identifier handed in by the patient-record collaborator
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PatientId(String);

impl PatientId {
    /// Create new patient ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Reject empty, oversized or control-character identifiers
    pub fn validate(&self) -> Result<()> {
        if self.0.trim().is_empty() {
            return Err(Error::Validation("Patient id must not be empty".to_string()));
        }
        if self.0.len() > MAX_PATIENT_ID_LEN {
            return Err(Error::Validation(format!(
                "Patient id longer than {} bytes",
                MAX_PATIENT_ID_LEN
            )));
        }
        if self.0.chars().any(char::is_control) {
            return Err(Error::Validation(
                "Patient id contains control characters".to_string(),
            ));
        }
        Ok(())
    }

    /// Length-prefixed key bytes, so one patient's prefix never matches another's
    pub(crate) fn key_bytes(&self) -> Vec<u8> {
        let bytes = self.0.as_bytes();
        let mut key = Vec::with_capacity(bytes.len() + 2);
        key.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
        key.extend_from_slice(bytes);
        key
    }
}

impl fmt::Display for PatientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque handle to an uploaded deposit receipt (document storage owns the file)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReceiptRef(String);

impl ReceiptRef {
    /// Create new receipt reference
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// A blank handle counts as no receipt at all
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for ReceiptRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Classification of a charge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum DebtCategory {
    /// Store purchase ("tienda")
    Store = 1,
    /// Medication ("medicamento")
    Medication = 2,
    /// Monthly fee ("mensualidad")
    MonthlyFee = 3,
    /// Anything else
    Other = 4,
}

impl DebtCategory {
    /// Label used by the caja screens
    pub fn label(&self) -> &'static str {
        match self {
            DebtCategory::Store => "tienda",
            DebtCategory::Medication => "medicamento",
            DebtCategory::MonthlyFee => "mensualidad",
            DebtCategory::Other => "otro",
        }
    }

    /// Parse from a caja label
    pub fn from_label(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "tienda" => Some(DebtCategory::Store),
            "medicamento" => Some(DebtCategory::Medication),
            "mensualidad" => Some(DebtCategory::MonthlyFee),
            "otro" => Some(DebtCategory::Other),
            _ => None,
        }
    }
}

impl fmt::Display for DebtCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Check that `amount` is a strictly positive two-decimal currency value
pub fn validate_amount(amount: Decimal, what: &str) -> Result<Decimal> {
    if amount <= Decimal::ZERO {
        return Err(Error::Validation(format!(
            "{} amount must be positive, got {}",
            what, amount
        )));
    }
    if amount.normalize().scale() > CURRENCY_SCALE {
        return Err(Error::Validation(format!(
            "{} amount {} has more than {} decimal places",
            what, amount, CURRENCY_SCALE
        )));
    }
    if amount > max_amount() {
        return Err(Error::Validation(format!(
            "{} amount {} exceeds the limit of {}",
            what,
            amount,
            max_amount()
        )));
    }
    Ok(amount)
}

/// Largest single amount accepted
pub fn max_amount() -> Decimal {
    Decimal::new(MAX_AMOUNT_CENTS, CURRENCY_SCALE)
}

/// Sum amounts, failing instead of overflowing
pub fn checked_total(amounts: impl IntoIterator<Item = Decimal>) -> Result<Decimal> {
    amounts.into_iter().try_fold(Decimal::ZERO, |total, amount| {
        total.checked_add(amount).ok_or_else(|| {
            Error::InvariantViolation(format!("Amount total overflowed adding {}", amount))
        })
    })
}

/// Order-preserving big-endian encoding of a timestamp for index keys
pub(crate) fn date_key(date: DateTime<Utc>) -> [u8; 8] {
    let micros = date.timestamp_micros() as u64 ^ (1 << 63);
    micros.to_be_bytes()
}
