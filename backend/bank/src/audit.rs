//! # Audit
//!
//! Admin numbers and the consistency checks run after loading a ledger from disk.
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    ledger::Ledger,
    lifecycle::ClaimStatus,
    models::{Listing, ListingRef, Role},
};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LedgerStats {
    pub users_by_role: BTreeMap<String, usize>,
    pub offers_by_status: BTreeMap<String, usize>,
    pub predictions_by_status: BTreeMap<String, usize>,
    pub claims_by_status: BTreeMap<String, usize>,
    pub quantity_listed: u64,
    pub quantity_delivered: u64,
    pub active_sessions: usize,
}

impl Ledger {
    pub fn stats(&self, now: DateTime<Utc>) -> LedgerStats {
        let mut stats = LedgerStats::default();

        for role in [Role::Donor, Role::Recipient, Role::Driver, Role::Admin] {
            stats.users_by_role.insert(role.to_string(), 0);
        }
        for user in self.users.values() {
            *stats.users_by_role.entry(user.role.to_string()).or_default() += 1;
        }

        for offer in self.offers.values() {
            *stats.offers_by_status.entry(offer.status.to_string()).or_default() += 1;
            stats.quantity_listed += u64::from(offer.quantity);
        }

        for prediction in self.predictions.values() {
            *stats
                .predictions_by_status
                .entry(prediction.status.to_string())
                .or_default() += 1;
        }

        for claim in self.claims.values() {
            *stats.claims_by_status.entry(claim.status.to_string()).or_default() += 1;

            if claim.status == ClaimStatus::Delivered {
                stats.quantity_delivered += u64::from(claim.quantity);
            }
        }

        stats.active_sessions = self
            .sessions
            .values()
            .filter(|session| session.expires_at > now)
            .count();

        stats
    }

    /// Non-panicking consistency check. Returns the first violation found.
    pub fn check_invariants(&self) -> Result<(), String> {
        let listings = self
            .offers
            .values()
            .map(|offer| (ListingRef::offer(&offer.id), offer as &dyn Listing))
            .chain(self.predictions.values().map(|prediction| {
                (ListingRef::prediction(&prediction.id), prediction as &dyn Listing)
            }));

        for (reference, listing) in listings {
            if !self.users.contains_key(listing.donor_id()) {
                return Err(format!(
                    "{:?} {} belongs to unknown donor {}",
                    reference.kind,
                    reference.id,
                    listing.donor_id()
                ));
            }

            let claimed: u64 = self
                .claims
                .values()
                .filter(|c| c.listing == reference && c.is_live())
                .map(|c| u64::from(c.quantity))
                .sum();

            if u64::from(listing.remaining()) + claimed > u64::from(listing.quantity()) {
                return Err(format!(
                    "{:?} {} hands out {} + {} of {}",
                    reference.kind,
                    reference.id,
                    listing.remaining(),
                    claimed,
                    listing.quantity()
                ));
            }
        }

        for claim in self.claims.values() {
            if self.listing(&claim.listing).is_err() {
                return Err(format!("claim {} points at a missing listing", claim.id));
            }

            if !self.users.contains_key(&claim.recipient_id) {
                return Err(format!("claim {} has unknown recipient", claim.id));
            }

            if claim
                .driver_id
                .as_ref()
                .is_some_and(|driver| !self.users.contains_key(driver))
            {
                return Err(format!("claim {} has unknown driver", claim.id));
            }

            if claim.quantity == 0 {
                return Err(format!("claim {} is empty", claim.id));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeDelta, TimeZone, Utc};

    use crate::{
        ledger::Ledger,
        models::{Category, ListingRef, Location, NewOffer, NewUser, OfferSource, Role},
    };

    #[test]
    fn stats_count_everything_once() {
        let now = Utc.with_ymd_and_hms(2025, 11, 14, 12, 0, 0).unwrap();
        let mut ledger = Ledger::new();

        let mut ids = Vec::new();
        for (email, role) in [
            ("d@example.com", Role::Donor),
            ("r@example.com", Role::Recipient),
            ("v@example.com", Role::Driver),
        ] {
            let user = ledger
                .register(
                    NewUser {
                        email: email.into(),
                        password: "long enough".into(),
                        name: "Someone".into(),
                        role,
                        organization: None,
                        phone: None,
                        location: Some(Location::new(1.0, 1.0)),
                    },
                    now,
                )
                .unwrap();
            ids.push(user.id);
        }

        let offer = ledger
            .create_offer(
                &ids[0],
                NewOffer {
                    title: "Soup".into(),
                    category: Category::Prepared,
                    quantity: 8,
                    unit: Some("quarts".into()),
                    expires_at: now + TimeDelta::hours(3),
                    location: None,
                    source: OfferSource::Surplus,
                },
                now,
            )
            .unwrap();

        let claim = ledger
            .claim(&ids[1], &ListingRef::offer(&offer.id), 8, now)
            .unwrap();
        ledger.pickup(&ids[2], &claim.id, now).unwrap();
        ledger.deliver(&ids[2], &claim.id, now).unwrap();
        ledger.open_session(&ids[1], TimeDelta::hours(1), now).unwrap();

        let stats = ledger.stats(now);

        assert_eq!(stats.users_by_role["donor"], 1);
        assert_eq!(stats.users_by_role["admin"], 0);
        assert_eq!(stats.offers_by_status["delivered"], 1);
        assert_eq!(stats.claims_by_status["delivered"], 1);
        assert_eq!(stats.quantity_listed, 8);
        assert_eq!(stats.quantity_delivered, 8);
        assert_eq!(stats.active_sessions, 1);

        ledger.check_invariants().unwrap();
    }

    #[test]
    fn invariants_catch_overdrawn_listing() {
        let now = Utc.with_ymd_and_hms(2025, 11, 14, 12, 0, 0).unwrap();
        let mut ledger = Ledger::new();
        let donor = ledger
            .register(
                NewUser {
                    email: "d@example.com".into(),
                    password: "long enough".into(),
                    name: "Someone".into(),
                    role: Role::Donor,
                    organization: None,
                    phone: None,
                    location: Some(Location::new(1.0, 1.0)),
                },
                now,
            )
            .unwrap();
        let offer = ledger
            .create_offer(
                &donor.id,
                NewOffer {
                    title: "Milk".into(),
                    category: Category::Dairy,
                    quantity: 2,
                    unit: None,
                    expires_at: now + TimeDelta::hours(3),
                    location: None,
                    source: OfferSource::Direct,
                },
                now,
            )
            .unwrap();

        ledger.offers.get_mut(&offer.id).unwrap().remaining = 3;

        assert!(ledger.check_invariants().is_err());
    }
}
