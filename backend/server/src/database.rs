//! # Store
//!
//! The one authoritative [`Ledger`] behind a `tokio` mutex.
//!
//! ## Writes
//! - Lock, clone, apply the change to the clone
//! - Persist the clone (blocking thread, atomic rename)
//! - Swap it in only after the file is on disk
//!
//! A failed check or a failed write leaves both memory and disk at the previous version, so a
//! claim either fully happens or not at all. Holding the lock across the write serializes every
//! mutation, which is what keeps two recipients from drawing the same last unit.
//!
//! ## Reads
//! Closures over `&Ledger` under the same lock. Handlers copy out what they need.
use std::path::PathBuf;

use bank::{Ledger, get_ledger, write_ledger};
use tokio::{sync::Mutex, task::spawn_blocking};
use tracing::{info, warn};

use crate::error::AppError;

pub struct Store {
    ledger: Mutex<Ledger>,
    path: Option<PathBuf>,
}

impl Store {
    pub fn in_memory() -> Self {
        Self::with_ledger(Ledger::new(), None)
    }

    pub fn with_ledger(ledger: Ledger, path: Option<PathBuf>) -> Self {
        Self {
            ledger: Mutex::new(ledger),
            path,
        }
    }

    /// Load from disk, or start in RAM when no path is configured.
    pub fn open(path: Option<PathBuf>) -> Result<Self, AppError> {
        let Some(path) = path else {
            info!("Ledger kept in memory only");
            return Ok(Self::in_memory());
        };

        let ledger = get_ledger(&path)?;
        if let Err(violation) = ledger.check_invariants() {
            warn!("Ledger at {} is inconsistent: {violation}", path.display());
        }

        info!(
            "Loaded ledger from {} ({} users)",
            path.display(),
            ledger.users().count()
        );

        Ok(Self::with_ledger(ledger, Some(path)))
    }

    pub async fn read<T>(&self, f: impl FnOnce(&Ledger) -> T) -> T {
        let ledger = self.ledger.lock().await;
        f(&ledger)
    }

    pub async fn write<T, E>(&self, f: impl FnOnce(&mut Ledger) -> Result<T, E>) -> Result<T, AppError>
    where
        AppError: From<E>,
    {
        let mut ledger = self.ledger.lock().await;

        let mut draft = ledger.clone();
        let out = f(&mut draft)?;

        if let Some(path) = &self.path {
            let path = path.clone();
            draft = spawn_blocking(move || write_ledger(&path, &draft).map(|()| draft))
                .await
                .map_err(|e| AppError::InternalError(Box::new(e)))??;
        }

        *ledger = draft;

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use bank::{LedgerError, get_ledger, models::{NewUser, Role}};
    use chrono::Utc;

    use super::Store;
    use crate::error::AppError;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            email: email.into(),
            password: "long enough".into(),
            name: "Someone".into(),
            role: Role::Recipient,
            organization: None,
            phone: None,
            location: None,
        }
    }

    #[tokio::test]
    async fn failed_write_changes_nothing() {
        let store = Store::in_memory();

        store
            .write(|ledger| ledger.register(new_user("a@example.com"), Utc::now()))
            .await
            .unwrap();

        let result: Result<(), AppError> = store
            .write(|ledger| {
                ledger.register(new_user("b@example.com"), Utc::now())?;
                Err(LedgerError::EmailTaken)
            })
            .await;

        assert!(result.is_err());
        assert_eq!(store.read(|ledger| ledger.users().count()).await, 1);
    }

    #[tokio::test]
    async fn writes_land_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        let store = Store::open(Some(path.clone())).unwrap();

        store
            .write(|ledger| ledger.register(new_user("a@example.com"), Utc::now()))
            .await
            .unwrap();

        let on_disk = get_ledger(&path).unwrap();
        assert!(on_disk.authenticate("a@example.com", "long enough").is_ok());
    }
}
