//! # Allocation
//!
//! Read side of the marketplace: what a recipient should look at first, what is on the map,
//! where a driver has to go.
//!
//! Recommendations are a plain filter, sort, take. Order:
//! 1. soonest expiry (food that is about to go bad moves first)
//! 2. closest to the recipient, when both sides have coordinates
//! 3. most remaining
use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    geo::{Errand, haversine_km},
    ledger::Ledger,
    lifecycle::ClaimStatus,
    models::{Category, Listing, ListingRef, Location, Offer},
};

#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    pub listing: ListingRef,
    pub donor_id: String,
    pub category: Category,
    pub remaining: u32,
    pub expires_at: DateTime<Utc>,
    pub distance_km: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NearbyOffer {
    pub offer: Offer,
    pub distance_km: f64,
}

fn by_distance(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.total_cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

impl Ledger {
    /// Where the food behind a listing physically is. Predictions sit at the donor.
    pub fn pickup_location(&self, listing: &dyn Listing) -> Option<Location> {
        listing.location().cloned().or_else(|| {
            self.users
                .get(listing.donor_id())
                .and_then(|donor| donor.location.clone())
        })
    }

    pub fn recommend(
        &self,
        recipient_id: &str,
        category: Option<Category>,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Vec<Recommendation> {
        let origin = self
            .users
            .get(recipient_id)
            .and_then(|recipient| recipient.location.clone());

        let offers = self
            .offers
            .values()
            .map(|offer| (ListingRef::offer(&offer.id), offer as &dyn Listing));
        let predictions = self
            .predictions
            .values()
            .map(|prediction| (ListingRef::prediction(&prediction.id), prediction as &dyn Listing));

        let mut picks: Vec<Recommendation> = offers
            .chain(predictions)
            .filter(|(_, listing)| {
                listing.status().is_claimable() && listing.remaining() > 0 && !listing.is_expired(now)
            })
            .filter(|(_, listing)| category.is_none_or(|c| listing.category() == c))
            .filter(|(reference, _)| {
                !self.claims.values().any(|c| {
                    c.listing == *reference && c.recipient_id == recipient_id && c.is_live()
                })
            })
            .map(|(reference, listing)| Recommendation {
                distance_km: origin
                    .as_ref()
                    .zip(self.pickup_location(listing))
                    .map(|(from, to)| haversine_km(from, &to)),
                listing: reference,
                donor_id: listing.donor_id().to_string(),
                category: listing.category(),
                remaining: listing.remaining(),
                expires_at: listing.expires_at(),
            })
            .collect();

        picks.sort_by(|a, b| {
            a.expires_at
                .cmp(&b.expires_at)
                .then_with(|| by_distance(a.distance_km, b.distance_km))
                .then_with(|| b.remaining.cmp(&a.remaining))
        });
        picks.truncate(limit);

        picks
    }

    /// Claimable offers with a pin inside the radius, nearest first.
    pub fn offers_near(&self, center: &Location, radius_km: f64, now: DateTime<Utc>) -> Vec<NearbyOffer> {
        let mut nearby: Vec<NearbyOffer> = self
            .offers
            .values()
            .filter(|offer| offer.status.is_claimable() && !offer.is_expired(now))
            .filter_map(|offer| {
                let distance_km = haversine_km(center, offer.location.as_ref()?);

                (distance_km <= radius_km).then(|| NearbyOffer {
                    offer: offer.clone(),
                    distance_km,
                })
            })
            .collect();

        nearby.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
        nearby
    }

    /// Stops the driver still owes. Claims with unknown coordinates are left out.
    pub fn errands_for_driver(&self, driver_id: &str) -> Vec<Errand> {
        self.claims
            .values()
            .filter(|c| c.driver_id.as_deref() == Some(driver_id))
            .filter_map(|claim| {
                let dropoff = self.users.get(&claim.recipient_id)?.location.clone()?;

                let pickup = match claim.status {
                    ClaimStatus::Claimed => {
                        let listing = self.listing(&claim.listing).ok()?;
                        Some(self.pickup_location(listing)?)
                    }
                    ClaimStatus::InTransit => None,
                    ClaimStatus::Delivered | ClaimStatus::Cancelled => return None,
                };

                Some(Errand {
                    claim_id: claim.id.clone(),
                    pickup,
                    dropoff,
                })
            })
            .collect()
    }
}
