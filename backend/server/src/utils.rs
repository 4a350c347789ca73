use axum::{
    Json,
    extract::{
        Query,
        rejection::{JsonRejection, QueryRejection},
    },
};
use bank::{
    LedgerError,
    models::{
        Category, ListingKind, ListingRef, Location, NewOffer, NewPrediction, NewUser,
        OfferSource, PredictionModel, PublicUser, Role, Session,
    },
};
use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub const DEFAULT_OFFER_HOURS: i64 = 24;

pub fn payload<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(inner)| inner)
        .map_err(|e| AppError::MalformedPayload(e.body_text()))
}

pub fn query<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, AppError> {
    query
        .map(|Query(inner)| inner)
        .map_err(|e| AppError::MalformedPayload(e.body_text()))
}

#[derive(Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    pub name: String,
    #[serde(alias = "userType")]
    pub role: Role,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub location: Option<Location>,
    #[serde(default)]
    pub admin_key: Option<String>,
}

impl SignupRequest {
    pub fn into_new_user(self) -> NewUser {
        NewUser {
            email: self.email,
            password: self.password,
            name: self.name,
            role: self.role,
            organization: self.organization,
            phone: self.phone,
            location: self.location,
        }
    }
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct SessionResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: PublicUser,
}

impl SessionResponse {
    pub fn new(session: Session, user: PublicUser) -> Self {
        Self {
            token: session.token,
            expires_at: session.expires_at,
            user,
        }
    }
}

/// Shared by `/offers` and `/surplus`. Inventory rows from the surplus form send `name`.
#[derive(Deserialize)]
pub struct OfferRequest {
    #[serde(alias = "name")]
    pub title: String,
    #[serde(default = "other")]
    pub category: Category,
    pub quantity: u32,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default, alias = "expiry", alias = "expiration")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expires_in_hours: Option<i64>,
    #[serde(default)]
    pub location: Option<Location>,
}

fn other() -> Category {
    Category::Other
}

impl OfferRequest {
    pub fn into_new_offer(self, source: OfferSource, now: DateTime<Utc>) -> Result<NewOffer, LedgerError> {
        let expires_at = match (self.expires_at, self.expires_in_hours) {
            (Some(at), _) => at,
            (None, Some(hours)) if hours > 0 => TimeDelta::try_hours(hours)
                .and_then(|ttl| now.checked_add_signed(ttl))
                .ok_or_else(|| LedgerError::InvalidInput("expires_in_hours is too large".into()))?,
            (None, Some(_)) => {
                return Err(LedgerError::InvalidInput(
                    "expires_in_hours must be positive".into(),
                ));
            }
            (None, None) => now + TimeDelta::hours(DEFAULT_OFFER_HOURS),
        };

        Ok(NewOffer {
            title: self.title,
            category: self.category,
            quantity: self.quantity,
            unit: self.unit,
            expires_at,
            location: self.location,
            source,
        })
    }
}

#[derive(Deserialize)]
pub struct PredictionRequest {
    #[serde(default = "other")]
    pub category: Category,
    pub quantity: u32,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(alias = "date")]
    pub for_date: NaiveDate,
}

impl From<PredictionRequest> for NewPrediction {
    fn from(request: PredictionRequest) -> Self {
        NewPrediction {
            category: request.category,
            quantity: request.quantity,
            confidence: request.confidence.unwrap_or(1.0),
            for_date: request.for_date,
            model: PredictionModel::Manual,
        }
    }
}

#[derive(Deserialize)]
pub struct GenerateRequest {
    #[serde(default = "other")]
    pub category: Category,
    #[serde(default, alias = "date")]
    pub for_date: Option<NaiveDate>,
}

#[derive(Deserialize)]
pub struct ConfirmQuery {
    pub quantity: Option<u32>,
}

/// `offer_id`/`product_id` come from the older allocation form and always mean an offer.
#[derive(Deserialize)]
pub struct ClaimRequest {
    #[serde(alias = "offer_id", alias = "product_id")]
    pub listing_id: String,
    #[serde(default = "offer_kind")]
    pub kind: ListingKind,
    pub quantity: u32,
}

fn offer_kind() -> ListingKind {
    ListingKind::Offer
}

impl ClaimRequest {
    pub fn listing(&self) -> ListingRef {
        ListingRef {
            kind: self.kind,
            id: self.listing_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use bank::models::{Category, ListingKind, OfferSource, Role};
    use chrono::{TimeDelta, TimeZone, Utc};

    use super::{ClaimRequest, OfferRequest, SignupRequest};

    #[test]
    fn signup_accepts_user_type() {
        let request: SignupRequest = serde_json::from_str(
            r#"{"email":"a@b.co","password":"long enough","name":"A","userType":"store"}"#,
        )
        .unwrap();

        assert_eq!(request.role, Role::Donor);
        assert!(request.admin_key.is_none());
    }

    #[test]
    fn surplus_row_defaults() {
        let now = Utc.with_ymd_and_hms(2025, 11, 14, 12, 0, 0).unwrap();
        let request: OfferRequest =
            serde_json::from_str(r#"{"name":"Rolls","category":"Bread","quantity":3}"#).unwrap();

        let new = request.into_new_offer(OfferSource::Surplus, now).unwrap();

        assert_eq!(new.title, "Rolls");
        assert_eq!(new.category, Category::Bakery);
        assert_eq!(new.expires_at, now + TimeDelta::hours(24));
    }

    #[test]
    fn negative_lifetime_rejected() {
        let now = Utc.with_ymd_and_hms(2025, 11, 14, 12, 0, 0).unwrap();
        let request: OfferRequest =
            serde_json::from_str(r#"{"title":"Rolls","quantity":3,"expires_in_hours":-1}"#).unwrap();

        assert!(request.into_new_offer(OfferSource::Direct, now).is_err());
    }

    #[test]
    fn out_of_range_lifetime_rejected() {
        let now = Utc.with_ymd_and_hms(2025, 11, 14, 12, 0, 0).unwrap();

        for hours in [10_000_000_000_i64, 9_000_000_000_000, i64::MAX] {
            let request = OfferRequest {
                title: "Rolls".into(),
                category: Category::Bakery,
                quantity: 3,
                unit: None,
                expires_at: None,
                expires_in_hours: Some(hours),
                location: None,
            };

            assert!(request.into_new_offer(OfferSource::Direct, now).is_err(), "{hours}");
        }
    }

    #[test]
    fn legacy_allocation_body() {
        let request: ClaimRequest =
            serde_json::from_str(r#"{"product_id":"abc","quantity":2}"#).unwrap();

        assert_eq!(request.listing().kind, ListingKind::Offer);
        assert_eq!(request.listing().id, "abc");
    }
}
