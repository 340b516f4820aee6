use rust_decimal::Decimal;
use thiserror::Error;

use crate::models::FilingStatus;

/// Failures raised by the reconciliation pipeline. Warning-grade variants
/// are accumulated on the outcome; fatal variants abort the pass with no
/// partial persistence.
#[derive(Debug, Error)]
pub enum ReconciliationError {
    /// Internal consistency check failed: a lot's recomputed basis no
    /// longer matches what was allocated. Fatal.
    #[error("basis mismatch on lot {lot_id}: broker {broker}, computed {computed}")]
    BasisMismatch {
        lot_id: String,
        broker: Decimal,
        computed: Decimal,
    },

    /// No candidate lot matched the sale's security. Warning grade.
    #[error("no lot found for sale {sale_id} ({ticker})")]
    LotNotFound { sale_id: String, ticker: String },

    /// Candidate lots ran out of shares before the sale was covered.
    /// Warning grade.
    #[error("sale {sale_id} short {missing} shares after exhausting candidate lots")]
    InsufficientShares { sale_id: String, missing: Decimal },

    /// A lot lacks event data its equity class requires. Fatal for ESPP
    /// (qualifying status cannot be determined), warning with
    /// disqualifying fallback for ISO.
    #[error("lot {lot_id} is missing {field}")]
    MissingEventData { lot_id: String, field: String },

    #[error("reconciliation failed: {0}")]
    Internal(String),
}

impl ReconciliationError {
    /// Whether this failure aborts the whole pass
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ReconciliationError::BasisMismatch { .. } | ReconciliationError::Internal(_)
        )
    }
}

/// Failures raised by the tax estimator
#[derive(Debug, Error)]
pub enum EstimateError {
    #[error("no bracket table for {year} {status}")]
    MissingBracketTable { year: i32, status: FilingStatus },

    #[error("no AMT rate breakpoint for {year}")]
    MissingAmtBreakpoint { year: i32 },
}
