//! # Lifecycle
//!
//! Every status a listing or claim can be in, and the only moves allowed between them.
//!
//! ## Listings
//! - Prediction: predicted -> confirmed -> claimed -> in_transit -> delivered
//! - Offer: available -> claimed -> in_transit -> delivered
//! - Either can be cancelled before anything is on the road, or expire while still unclaimed
//!
//! ## Claims
//! - claimed -> in_transit -> delivered
//! - claimed -> cancelled
//!
//! Listing status is never written by hand once claims exist, see [`derive_status`].
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DonationStatus {
    Predicted,
    Confirmed,
    Available,
    Claimed,
    InTransit,
    Delivered,
    Cancelled,
    Expired,
}

impl DonationStatus {
    pub fn can_transition(self, to: DonationStatus) -> bool {
        use DonationStatus::{
            Available, Cancelled, Claimed, Confirmed, Delivered, Expired, InTransit, Predicted,
        };

        matches!(
            (self, to),
            (Predicted, Confirmed | Cancelled | Expired)
                | (
                    Confirmed | Available,
                    Claimed | InTransit | Delivered | Cancelled | Expired
                )
                | (
                    Claimed,
                    Available | Confirmed | InTransit | Delivered | Cancelled | Expired
                )
                | (InTransit, Delivered | Claimed | Available | Confirmed)
        )
    }

    pub fn is_claimable(self) -> bool {
        matches!(self, DonationStatus::Available | DonationStatus::Confirmed)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DonationStatus::Delivered | DonationStatus::Cancelled | DonationStatus::Expired
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DonationStatus::Predicted => "predicted",
            DonationStatus::Confirmed => "confirmed",
            DonationStatus::Available => "available",
            DonationStatus::Claimed => "claimed",
            DonationStatus::InTransit => "in_transit",
            DonationStatus::Delivered => "delivered",
            DonationStatus::Cancelled => "cancelled",
            DonationStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for DonationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    Claimed,
    InTransit,
    Delivered,
    Cancelled,
}

impl ClaimStatus {
    pub fn can_transition(self, to: ClaimStatus) -> bool {
        matches!(
            (self, to),
            (
                ClaimStatus::Claimed,
                ClaimStatus::InTransit | ClaimStatus::Cancelled
            ) | (ClaimStatus::InTransit, ClaimStatus::Delivered)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ClaimStatus::Claimed => "claimed",
            ClaimStatus::InTransit => "in_transit",
            ClaimStatus::Delivered => "delivered",
            ClaimStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ClaimStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status a listing should be in given what is left of it and its live claims.
///
/// `live` must not contain cancelled claims.
pub fn derive_status<I>(base: DonationStatus, remaining: u32, live: I) -> DonationStatus
where
    I: IntoIterator<Item = ClaimStatus>,
{
    if remaining > 0 {
        return base;
    }

    let mut any = false;
    let mut all_delivered = true;
    let mut any_in_transit = false;

    for status in live {
        any = true;
        all_delivered &= status == ClaimStatus::Delivered;
        any_in_transit |= status == ClaimStatus::InTransit;
    }

    match (any, all_delivered, any_in_transit) {
        (false, _, _) => DonationStatus::Expired,
        (true, true, _) => DonationStatus::Delivered,
        (true, false, true) => DonationStatus::InTransit,
        (true, false, false) => DonationStatus::Claimed,
    }
}
