//! # Bank
//!
//! Everything FoodCast knows, in one serializable [`Ledger`].
//!
//! ## Layout
//! - [`models`]: users, offers, predictions, claims
//! - [`lifecycle`]: statuses and the moves allowed between them
//! - [`ledger`]: every write, with the checks that guard it
//! - [`allocation`]: recommendations, map lookups, driver errands
//! - [`audit`]: admin numbers and invariant checks
//! - [`geo`]: distances and driver routes
//!
//! ## Storage
//! The whole ledger is one JSON document. Writes go to a sibling temp file first and are
//! renamed over the old one, so a crash mid-write leaves the previous version intact.
use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use tracing::info;

pub mod allocation;
pub mod audit;
pub mod error;
pub mod geo;
pub mod ledger;
pub mod lifecycle;
pub mod models;
pub mod utils;

pub use error::{LedgerError, PersistError};
pub use ledger::Ledger;

/// Missing file means a fresh marketplace.
pub fn get_ledger(path: &Path) -> Result<Ledger, PersistError> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!("No ledger at {}, starting empty", path.display());
            return Ok(Ledger::new());
        }
        Err(e) => return Err(e.into()),
    };

    Ok(serde_json::from_slice(&data)?)
}

pub fn write_ledger(path: &Path, ledger: &Ledger) -> Result<(), PersistError> {
    let bytes = serde_json::to_vec_pretty(ledger)?;

    let mut tmp = PathBuf::from(path);
    tmp.set_extension("json.tmp");

    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;

    Ok(())
}
