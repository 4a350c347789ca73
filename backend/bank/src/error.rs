use std::io;

use thiserror::Error;

use crate::lifecycle::DonationStatus;

#[derive(Error, Debug, PartialEq)]
pub enum LedgerError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Email already registered")]
    EmailTaken,

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Session expired or unknown")]
    InvalidSession,

    #[error("Cannot move from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Listing is {0} and cannot be claimed")]
    NotClaimable(DonationStatus),

    #[error("Requested {requested} but only {remaining} remaining")]
    InsufficientQuantity { requested: u32, remaining: u32 },

    #[error("Recipient already holds a claim on this listing")]
    DuplicateClaim,

    #[error("Listing has expired")]
    Expired,
}

impl LedgerError {
    pub(crate) fn not_found(kind: &'static str, id: &str) -> Self {
        LedgerError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub(crate) fn transition(from: impl ToString, to: impl ToString) -> Self {
        LedgerError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("Ledger file: {0}")]
    Io(#[from] io::Error),

    #[error("Ledger format: {0}")]
    Format(#[from] serde_json::Error),
}
