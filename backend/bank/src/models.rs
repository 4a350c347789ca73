//! # Entities
//!
//! Everything the marketplace stores.
//!
//! ## Listings
//! - Offer (**direct** or **surplus**): donor says "this food exists now", quantity + expiry, direct offers pin a map location
//! - Prediction: donor says "this food will probably exist on a date", quantity + confidence, must be confirmed before claims
//!
//! Both are claimed the same way, so both implement [`Listing`].
//!
//! ## Claims
//! - Recipient reserves part or all of a listing
//! - Driver picks it up and delivers it
//! - Quantity is taken from the listing on claim and handed back on cancel
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    lifecycle::{ClaimStatus, DonationStatus},
    utils::sanitize,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[serde(alias = "Donor", alias = "store")]
    Donor,
    #[serde(alias = "Recipient", alias = "foodbank", alias = "shelter")]
    Recipient,
    #[serde(alias = "Driver")]
    Driver,
    #[serde(alias = "Admin")]
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Donor => "donor",
            Role::Recipient => "recipient",
            Role::Driver => "driver",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl Location {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self {
            lat,
            lng,
            address: None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: Role,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub location: Option<Location>,
    pub password_hash: String,
    pub salt: String,
    pub created_at: DateTime<Utc>,
}

/// What the API is allowed to show about a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicUser {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub organization: Option<String>,
    pub phone: Option<String>,
    pub location: Option<Location>,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for PublicUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
            name: user.name.clone(),
            role: user.role,
            organization: user.organization.clone(),
            phone: user.phone.clone(),
            location: user.location.clone(),
            created_at: user.created_at,
        }
    }
}

/// Signup input once the transport layer has parsed it.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password: String,
    pub name: String,
    pub role: Role,
    pub organization: Option<String>,
    pub phone: Option<String>,
    pub location: Option<Location>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub user_id: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum Category {
    Produce,
    Bakery,
    Dairy,
    Meat,
    Prepared,
    Pantry,
    Other,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Produce => "produce",
            Category::Bakery => "bakery",
            Category::Dairy => "dairy",
            Category::Meat => "meat",
            Category::Prepared => "prepared",
            Category::Pantry => "pantry",
            Category::Other => "other",
        }
    }
}

impl From<&str> for Category {
    fn from(input: &str) -> Self {
        match sanitize(input).as_str() {
            "produce" | "fruit" | "fruits" | "vegetables" | "veg" => Category::Produce,
            "bakery" | "bread" | "baked goods" => Category::Bakery,
            "dairy" | "milk" | "cheese" => Category::Dairy,
            "meat" | "protein" | "poultry" | "fish" => Category::Meat,
            "prepared" | "prepared food" | "meals" | "hot food" => Category::Prepared,
            "pantry" | "canned" | "dry goods" | "canned goods" => Category::Pantry,
            _ => Category::Other,
        }
    }
}

impl From<String> for Category {
    fn from(input: String) -> Self {
        Category::from(input.as_str())
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferSource {
    Direct,
    Surplus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Offer {
    pub id: String,
    pub donor_id: String,
    pub title: String,
    pub category: Category,
    pub quantity: u32,
    pub remaining: u32,
    pub unit: String,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub location: Option<Location>,
    pub source: OfferSource,
    pub status: DonationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewOffer {
    pub title: String,
    pub category: Category,
    pub quantity: u32,
    pub unit: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub location: Option<Location>,
    pub source: OfferSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionModel {
    Mock,
    Remote,
    Manual,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub id: String,
    pub donor_id: String,
    pub category: Category,
    pub quantity: u32,
    pub remaining: u32,
    pub confidence: f64,
    pub for_date: NaiveDate,
    pub model: PredictionModel,
    pub status: DonationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPrediction {
    pub category: Category,
    pub quantity: u32,
    pub confidence: f64,
    pub for_date: NaiveDate,
    pub model: PredictionModel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingKind {
    Offer,
    Prediction,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListingRef {
    pub kind: ListingKind,
    pub id: String,
}

impl ListingRef {
    pub fn offer(id: impl Into<String>) -> Self {
        Self {
            kind: ListingKind::Offer,
            id: id.into(),
        }
    }

    pub fn prediction(id: impl Into<String>) -> Self {
        Self {
            kind: ListingKind::Prediction,
            id: id.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claim {
    pub id: String,
    pub listing: ListingRef,
    pub recipient_id: String,
    #[serde(default)]
    pub driver_id: Option<String>,
    pub quantity: u32,
    pub status: ClaimStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub picked_up_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub delivered_at: Option<DateTime<Utc>>,
}

impl Claim {
    pub fn is_live(&self) -> bool {
        self.status != ClaimStatus::Cancelled
    }
}

/// Shared view of offers and predictions for claim arbitration.
pub trait Listing {
    fn id(&self) -> &str;
    fn donor_id(&self) -> &str;
    fn category(&self) -> Category;
    fn quantity(&self) -> u32;
    fn remaining(&self) -> u32;
    fn remaining_mut(&mut self) -> &mut u32;
    fn status(&self) -> DonationStatus;
    fn status_mut(&mut self) -> &mut DonationStatus;
    /// Status the listing sits in while it still has quantity to give.
    fn base_status(&self) -> DonationStatus;
    fn expires_at(&self) -> DateTime<Utc>;
    fn location(&self) -> Option<&Location>;
    fn touch(&mut self, now: DateTime<Utc>);

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at() <= now
    }
}

impl Listing for Offer {
    fn id(&self) -> &str {
        &self.id
    }

    fn donor_id(&self) -> &str {
        &self.donor_id
    }

    fn category(&self) -> Category {
        self.category
    }

    fn quantity(&self) -> u32 {
        self.quantity
    }

    fn remaining(&self) -> u32 {
        self.remaining
    }

    fn remaining_mut(&mut self) -> &mut u32 {
        &mut self.remaining
    }

    fn status(&self) -> DonationStatus {
        self.status
    }

    fn status_mut(&mut self) -> &mut DonationStatus {
        &mut self.status
    }

    fn base_status(&self) -> DonationStatus {
        DonationStatus::Available
    }

    fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    fn location(&self) -> Option<&Location> {
        self.location.as_ref()
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}

impl Listing for Prediction {
    fn id(&self) -> &str {
        &self.id
    }

    fn donor_id(&self) -> &str {
        &self.donor_id
    }

    fn category(&self) -> Category {
        self.category
    }

    fn quantity(&self) -> u32 {
        self.quantity
    }

    fn remaining(&self) -> u32 {
        self.remaining
    }

    fn remaining_mut(&mut self) -> &mut u32 {
        &mut self.remaining
    }

    fn status(&self) -> DonationStatus {
        self.status
    }

    fn status_mut(&mut self) -> &mut DonationStatus {
        &mut self.status
    }

    fn base_status(&self) -> DonationStatus {
        DonationStatus::Confirmed
    }

    /// Predicted food is good until the end of its forecast day.
    fn expires_at(&self) -> DateTime<Utc> {
        self.for_date
            .succ_opt()
            .unwrap_or(self.for_date)
            .and_hms_opt(0, 0, 0)
            .map(|naive| naive.and_utc())
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    fn location(&self) -> Option<&Location> {
        None
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::{Category, Role};

    #[test]
    fn category_parsing_is_lenient() {
        assert_eq!(Category::from("Produce"), Category::Produce);
        assert_eq!(Category::from("  baked_goods "), Category::Bakery);
        assert_eq!(Category::from("Canned Goods!"), Category::Pantry);
        assert_eq!(Category::from("mystery"), Category::Other);
    }

    #[test]
    fn category_round_trips_through_json() {
        let parsed: Category = serde_json::from_str("\"Hot Food\"").unwrap();
        assert_eq!(parsed, Category::Prepared);
        assert_eq!(serde_json::to_string(&parsed).unwrap(), "\"prepared\"");
    }

    #[test]
    fn role_accepts_both_casings() {
        let lower: Role = serde_json::from_str("\"donor\"").unwrap();
        let upper: Role = serde_json::from_str("\"Donor\"").unwrap();
        assert_eq!(lower, upper);
        assert!(serde_json::from_str::<Role>("\"pilot\"").is_err());
    }
}
