//! # Ledger
//!
//! The one place listing and claim state changes.
//!
//! ## Rules
//! - Every mutation checks everything first, then writes
//! - Quantity moves between a listing's `remaining` and its claims, never below zero
//! - One live claim per recipient per listing
//! - Listing status after a claim mutation comes from [`derive_status`], not from the caller
//!
//! Callers that need all-or-nothing across several calls work on a clone and swap it in,
//! which is what the server store does.
use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    error::LedgerError,
    lifecycle::{ClaimStatus, DonationStatus, derive_status},
    models::{
        Category, Claim, Listing, ListingKind, ListingRef, NewOffer, NewPrediction, NewUser,
        Offer, OfferSource, Prediction, Role, Session, User,
    },
    utils::{constant_time_eq, hash_password, normalize_email, random_hex, tidy},
};

pub const MIN_PASSWORD_LEN: usize = 8;
pub const DEFAULT_UNIT: &str = "units";

/// Hashed against when the email has no account.
const UNKNOWN_ACCOUNT_SALT: &str = "00000000000000000000000000000000";

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Ledger {
    #[serde(default)]
    pub(crate) users: BTreeMap<String, User>,
    #[serde(default)]
    pub(crate) sessions: BTreeMap<String, Session>,
    #[serde(default)]
    pub(crate) offers: BTreeMap<String, Offer>,
    #[serde(default)]
    pub(crate) predictions: BTreeMap<String, Prediction>,
    #[serde(default)]
    pub(crate) claims: BTreeMap<String, Claim>,
}

#[derive(Debug, Clone, Default)]
pub struct OfferFilter {
    pub status: Option<DonationStatus>,
    pub category: Option<Category>,
    pub donor_id: Option<String>,
    pub source: Option<OfferSource>,
}

#[derive(Debug, Clone, Default)]
pub struct PredictionFilter {
    pub status: Option<DonationStatus>,
    pub category: Option<Category>,
    pub donor_id: Option<String>,
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn transition(status: &mut DonationStatus, next: DonationStatus) -> Result<(), LedgerError> {
    if *status == next {
        return Ok(());
    }

    if !status.can_transition(next) {
        return Err(LedgerError::transition(*status, next));
    }

    *status = next;
    Ok(())
}

fn transition_claim(claim: &mut Claim, next: ClaimStatus, now: DateTime<Utc>) -> Result<(), LedgerError> {
    if !claim.status.can_transition(next) {
        return Err(LedgerError::transition(claim.status, next));
    }

    claim.status = next;
    claim.updated_at = now;
    Ok(())
}

fn ensure_owner(role: Role, actor_id: &str, owner_id: &str) -> Result<(), LedgerError> {
    if role == Role::Admin || actor_id == owner_id {
        return Ok(());
    }

    Err(LedgerError::Forbidden("not the owner of this listing".into()))
}

/// Past its date while still open for claims.
fn is_stale(listing: &dyn Listing, now: DateTime<Utc>) -> bool {
    matches!(
        listing.status(),
        DonationStatus::Available | DonationStatus::Predicted | DonationStatus::Confirmed
    ) && listing.is_expired(now)
}

fn listing_in<'a>(
    offers: &'a BTreeMap<String, Offer>,
    predictions: &'a BTreeMap<String, Prediction>,
    listing: &ListingRef,
) -> Result<&'a dyn Listing, LedgerError> {
    match listing.kind {
        ListingKind::Offer => offers
            .get(&listing.id)
            .map(|offer| offer as &dyn Listing)
            .ok_or_else(|| LedgerError::not_found("offer", &listing.id)),
        ListingKind::Prediction => predictions
            .get(&listing.id)
            .map(|prediction| prediction as &dyn Listing)
            .ok_or_else(|| LedgerError::not_found("prediction", &listing.id)),
    }
}

fn listing_in_mut<'a>(
    offers: &'a mut BTreeMap<String, Offer>,
    predictions: &'a mut BTreeMap<String, Prediction>,
    listing: &ListingRef,
) -> Result<&'a mut dyn Listing, LedgerError> {
    match listing.kind {
        ListingKind::Offer => offers
            .get_mut(&listing.id)
            .map(|offer| offer as &mut dyn Listing)
            .ok_or_else(|| LedgerError::not_found("offer", &listing.id)),
        ListingKind::Prediction => predictions
            .get_mut(&listing.id)
            .map(|prediction| prediction as &mut dyn Listing)
            .ok_or_else(|| LedgerError::not_found("prediction", &listing.id)),
    }
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    // Accounts

    pub fn register(&mut self, new: NewUser, now: DateTime<Utc>) -> Result<User, LedgerError> {
        let email = normalize_email(&new.email)
            .ok_or_else(|| LedgerError::InvalidInput("email is not valid".into()))?;

        if new.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(LedgerError::InvalidInput(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }

        let name = tidy(&new.name);
        if name.is_empty() {
            return Err(LedgerError::InvalidInput("name is required".into()));
        }

        if new.location.as_ref().is_some_and(|l| !l.is_valid()) {
            return Err(LedgerError::InvalidInput("location is out of range".into()));
        }

        if self.users.values().any(|user| user.email == email) {
            return Err(LedgerError::EmailTaken);
        }

        let salt = random_hex(16);
        let user = User {
            id: new_id(),
            password_hash: hash_password(&salt, &new.password),
            salt,
            email,
            name,
            role: new.role,
            organization: new.organization.map(|o| tidy(&o)).filter(|o| !o.is_empty()),
            phone: new.phone.map(|p| tidy(&p)).filter(|p| !p.is_empty()),
            location: new.location,
            created_at: now,
        };

        info!("Registered {} account {}", user.role, user.id);
        self.users.insert(user.id.clone(), user.clone());

        Ok(user)
    }

    pub fn authenticate(&self, email: &str, password: &str) -> Result<&User, LedgerError> {
        let email = normalize_email(email).ok_or(LedgerError::InvalidCredentials)?;

        let Some(user) = self.users.values().find(|user| user.email == email) else {
            // same hashing cost as a real account
            let _ = hash_password(UNKNOWN_ACCOUNT_SALT, password);
            return Err(LedgerError::InvalidCredentials);
        };

        if constant_time_eq(&user.password_hash, &hash_password(&user.salt, password)) {
            Ok(user)
        } else {
            Err(LedgerError::InvalidCredentials)
        }
    }

    pub fn open_session(
        &mut self,
        user_id: &str,
        ttl: TimeDelta,
        now: DateTime<Utc>,
    ) -> Result<Session, LedgerError> {
        if !self.users.contains_key(user_id) {
            return Err(LedgerError::not_found("user", user_id));
        }

        self.sessions.retain(|_, session| session.expires_at > now);

        let session = Session {
            token: random_hex(32),
            user_id: user_id.to_string(),
            expires_at: now + ttl,
        };
        self.sessions.insert(session.token.clone(), session.clone());

        Ok(session)
    }

    /// Resolve a bearer token.
    pub fn session_user(&self, token: &str, now: DateTime<Utc>) -> Result<&User, LedgerError> {
        let session = self
            .sessions
            .get(token)
            .filter(|session| session.expires_at > now)
            .ok_or(LedgerError::InvalidSession)?;

        self.users
            .get(&session.user_id)
            .ok_or(LedgerError::InvalidSession)
    }

    pub fn prune_sessions(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, session| session.expires_at > now);

        before - self.sessions.len()
    }

    pub fn close_session(&mut self, token: &str) -> bool {
        self.sessions.remove(token).is_some()
    }

    pub fn user(&self, id: &str) -> Result<&User, LedgerError> {
        self.users
            .get(id)
            .ok_or_else(|| LedgerError::not_found("user", id))
    }

    pub fn users(&self) -> impl Iterator<Item = &User> {
        self.users.values()
    }

    fn role_of(&self, id: &str) -> Result<Role, LedgerError> {
        self.user(id).map(|user| user.role)
    }

    fn require_role(&self, id: &str, role: Role) -> Result<&User, LedgerError> {
        let user = self.user(id)?;

        if user.role != role {
            return Err(LedgerError::Forbidden(format!(
                "{} accounts cannot do this, {role} only",
                user.role
            )));
        }

        Ok(user)
    }

    // Listings

    pub fn create_offer(
        &mut self,
        donor_id: &str,
        new: NewOffer,
        now: DateTime<Utc>,
    ) -> Result<Offer, LedgerError> {
        let donor = self.require_role(donor_id, Role::Donor)?;

        let title = tidy(&new.title);
        if title.is_empty() {
            return Err(LedgerError::InvalidInput("title is required".into()));
        }

        if new.quantity == 0 {
            return Err(LedgerError::InvalidInput("quantity must be positive".into()));
        }

        if new.expires_at <= now {
            return Err(LedgerError::InvalidInput("expiry must be in the future".into()));
        }

        let location = new.location.or_else(|| donor.location.clone());
        if new.source == OfferSource::Direct && location.is_none() {
            return Err(LedgerError::InvalidInput(
                "direct offers need a pickup location".into(),
            ));
        }

        if location.as_ref().is_some_and(|l| !l.is_valid()) {
            return Err(LedgerError::InvalidInput("location is out of range".into()));
        }

        let unit = new
            .unit
            .map(|u| tidy(&u))
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| DEFAULT_UNIT.to_string());

        let offer = Offer {
            id: new_id(),
            donor_id: donor_id.to_string(),
            title,
            category: new.category,
            quantity: new.quantity,
            remaining: new.quantity,
            unit,
            expires_at: new.expires_at,
            location,
            source: new.source,
            status: DonationStatus::Available,
            created_at: now,
            updated_at: now,
        };

        info!("Donor {donor_id} listed offer {} ({} {})", offer.id, offer.quantity, offer.unit);
        self.offers.insert(offer.id.clone(), offer.clone());

        Ok(offer)
    }

    pub fn create_prediction(
        &mut self,
        donor_id: &str,
        new: NewPrediction,
        now: DateTime<Utc>,
    ) -> Result<Prediction, LedgerError> {
        self.require_role(donor_id, Role::Donor)?;

        if new.quantity == 0 {
            return Err(LedgerError::InvalidInput("quantity must be positive".into()));
        }

        if !(0.0..=1.0).contains(&new.confidence) {
            return Err(LedgerError::InvalidInput(
                "confidence must be between 0 and 1".into(),
            ));
        }

        if new.for_date < now.date_naive() {
            return Err(LedgerError::InvalidInput(
                "forecast date is in the past".into(),
            ));
        }

        let prediction = Prediction {
            id: new_id(),
            donor_id: donor_id.to_string(),
            category: new.category,
            quantity: new.quantity,
            remaining: new.quantity,
            confidence: new.confidence,
            for_date: new.for_date,
            model: new.model,
            status: DonationStatus::Predicted,
            created_at: now,
            updated_at: now,
        };

        debug!("Donor {donor_id} forecast {} for {}", prediction.quantity, prediction.for_date);
        self.predictions.insert(prediction.id.clone(), prediction.clone());

        Ok(prediction)
    }

    /// Donor turns a forecast into something recipients can claim, optionally correcting the amount.
    pub fn confirm_prediction(
        &mut self,
        actor_id: &str,
        id: &str,
        quantity: Option<u32>,
        now: DateTime<Utc>,
    ) -> Result<Prediction, LedgerError> {
        let role = self.role_of(actor_id)?;

        let prediction = self
            .predictions
            .get_mut(id)
            .ok_or_else(|| LedgerError::not_found("prediction", id))?;

        ensure_owner(role, actor_id, &prediction.donor_id)?;

        if quantity == Some(0) {
            return Err(LedgerError::InvalidInput("quantity must be positive".into()));
        }

        if prediction.status != DonationStatus::Predicted {
            return Err(LedgerError::transition(prediction.status, DonationStatus::Confirmed));
        }

        if prediction.is_expired(now) {
            return Err(LedgerError::Expired);
        }

        transition(&mut prediction.status, DonationStatus::Confirmed)?;
        if let Some(quantity) = quantity {
            prediction.quantity = quantity;
            prediction.remaining = quantity;
        }
        prediction.updated_at = now;

        info!("Prediction {id} confirmed at {}", prediction.quantity);
        Ok(prediction.clone())
    }

    /// Withdraw a listing. Pending claims go with it; nothing already on the road may be cancelled.
    pub fn cancel_listing(
        &mut self,
        actor_id: &str,
        listing: &ListingRef,
        now: DateTime<Utc>,
    ) -> Result<DonationStatus, LedgerError> {
        let role = self.role_of(actor_id)?;
        let current = listing_in(&self.offers, &self.predictions, listing)?;

        ensure_owner(role, actor_id, current.donor_id())?;

        if let Some(moving) = self
            .claims
            .values()
            .find(|c| c.listing == *listing && matches!(c.status, ClaimStatus::InTransit | ClaimStatus::Delivered))
        {
            return Err(LedgerError::transition(moving.status, DonationStatus::Cancelled));
        }

        if !current.status().can_transition(DonationStatus::Cancelled) {
            return Err(LedgerError::transition(current.status(), DonationStatus::Cancelled));
        }

        let target = listing_in_mut(&mut self.offers, &mut self.predictions, listing)?;
        let previous = target.status();
        transition(target.status_mut(), DonationStatus::Cancelled)?;
        *target.remaining_mut() = 0;
        target.touch(now);

        let mut dropped = 0;
        for claim in self
            .claims
            .values_mut()
            .filter(|c| c.listing == *listing && c.status == ClaimStatus::Claimed)
        {
            transition_claim(claim, ClaimStatus::Cancelled, now)?;
            dropped += 1;
        }

        info!(
            "{:?} {} cancelled from {previous}, {dropped} pending claims dropped",
            listing.kind, listing.id
        );

        Ok(previous)
    }

    // Claims

    pub fn claim(
        &mut self,
        actor_id: &str,
        listing: &ListingRef,
        quantity: u32,
        now: DateTime<Utc>,
    ) -> Result<Claim, LedgerError> {
        self.require_role(actor_id, Role::Recipient)?;

        if quantity == 0 {
            return Err(LedgerError::InvalidInput("quantity must be positive".into()));
        }

        let current = listing_in(&self.offers, &self.predictions, listing)?;

        if !current.status().is_claimable() {
            return Err(LedgerError::NotClaimable(current.status()));
        }

        if current.is_expired(now) {
            return Err(LedgerError::Expired);
        }

        if self
            .claims
            .values()
            .any(|c| c.listing == *listing && c.recipient_id == actor_id && c.is_live())
        {
            return Err(LedgerError::DuplicateClaim);
        }

        if quantity > current.remaining() {
            return Err(LedgerError::InsufficientQuantity {
                requested: quantity,
                remaining: current.remaining(),
            });
        }

        let claim = Claim {
            id: new_id(),
            listing: listing.clone(),
            recipient_id: actor_id.to_string(),
            driver_id: None,
            quantity,
            status: ClaimStatus::Claimed,
            created_at: now,
            updated_at: now,
            picked_up_at: None,
            delivered_at: None,
        };

        self.claims.insert(claim.id.clone(), claim.clone());
        {
            let target = listing_in_mut(&mut self.offers, &mut self.predictions, listing)?;
            *target.remaining_mut() -= quantity;
        }
        let status = self.rederive(listing, now)?;

        info!(
            "Recipient {actor_id} claimed {quantity} from {:?} {}, now {status}",
            listing.kind, listing.id
        );

        Ok(claim)
    }

    pub fn cancel_claim(
        &mut self,
        actor_id: &str,
        claim_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Claim, LedgerError> {
        let role = self.role_of(actor_id)?;
        let claim = self.claim_by_id(claim_id)?;

        if role != Role::Admin && claim.recipient_id != actor_id {
            return Err(LedgerError::Forbidden("not your claim".into()));
        }

        if !claim.status.can_transition(ClaimStatus::Cancelled) {
            return Err(LedgerError::transition(claim.status, ClaimStatus::Cancelled));
        }

        let listing = claim.listing.clone();
        let quantity = claim.quantity;
        let current = listing_in(&self.offers, &self.predictions, &listing)?;
        let restore = !current.status().is_terminal() && !current.is_expired(now);

        let claim = self.claim_entry(claim_id)?;
        transition_claim(claim, ClaimStatus::Cancelled, now)?;
        let cancelled = claim.clone();

        if restore {
            let target = listing_in_mut(&mut self.offers, &mut self.predictions, &listing)?;
            let total = target.quantity();
            let remaining = target.remaining_mut();
            *remaining = remaining.saturating_add(quantity).min(total);
        }
        let status = self.rederive(&listing, now)?;

        info!("Claim {claim_id} cancelled, {quantity} returned: {restore}, listing now {status}");
        Ok(cancelled)
    }

    /// Driver takes on a delivery before heading out.
    pub fn accept_delivery(
        &mut self,
        actor_id: &str,
        claim_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Claim, LedgerError> {
        self.require_role(actor_id, Role::Driver)?;

        let claim = self.claim_entry(claim_id)?;

        if claim.status != ClaimStatus::Claimed {
            return Err(LedgerError::transition(claim.status, "accepted"));
        }

        match claim.driver_id.as_deref() {
            Some(driver) if driver != actor_id => {
                return Err(LedgerError::Forbidden(
                    "claim is assigned to another driver".into(),
                ));
            }
            _ => {}
        }

        claim.driver_id = Some(actor_id.to_string());
        claim.updated_at = now;

        info!("Driver {actor_id} accepted claim {claim_id}");
        Ok(claim.clone())
    }

    pub fn pickup(
        &mut self,
        actor_id: &str,
        claim_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Claim, LedgerError> {
        self.require_role(actor_id, Role::Driver)?;

        let claim = self.claim_entry(claim_id)?;

        if claim
            .driver_id
            .as_deref()
            .is_some_and(|driver| driver != actor_id)
        {
            return Err(LedgerError::Forbidden(
                "claim is assigned to another driver".into(),
            ));
        }

        transition_claim(claim, ClaimStatus::InTransit, now)?;
        claim.driver_id = Some(actor_id.to_string());
        claim.picked_up_at = Some(now);

        let picked = claim.clone();
        let status = self.rederive(&picked.listing, now)?;

        info!("Driver {actor_id} picked up claim {claim_id}, listing now {status}");
        Ok(picked)
    }

    pub fn deliver(
        &mut self,
        actor_id: &str,
        claim_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Claim, LedgerError> {
        let role = self.role_of(actor_id)?;
        let claim = self.claim_entry(claim_id)?;

        if role != Role::Admin && claim.driver_id.as_deref() != Some(actor_id) {
            return Err(LedgerError::Forbidden(
                "only the assigned driver can deliver".into(),
            ));
        }

        transition_claim(claim, ClaimStatus::Delivered, now)?;
        claim.delivered_at = Some(now);

        let delivered = claim.clone();
        let status = self.rederive(&delivered.listing, now)?;

        info!("Claim {claim_id} delivered, listing now {status}");
        Ok(delivered)
    }

    /// Retire listings whose food has gone past its date.
    ///
    /// Untouched listings expire outright. Listings with live claims keep them but give up
    /// whatever was never claimed.
    pub fn expire_stale(&mut self, now: DateTime<Utc>) -> Result<usize, LedgerError> {
        let stale: Vec<ListingRef> = self
            .offers
            .values()
            .filter(|offer| is_stale(*offer, now))
            .map(|offer| ListingRef::offer(&offer.id))
            .chain(
                self.predictions
                    .values()
                    .filter(|prediction| is_stale(*prediction, now))
                    .map(|prediction| ListingRef::prediction(&prediction.id)),
            )
            .collect();

        for listing in &stale {
            let has_live = self
                .claims
                .values()
                .any(|c| c.listing == *listing && c.is_live());

            let target = listing_in_mut(&mut self.offers, &mut self.predictions, listing)?;
            *target.remaining_mut() = 0;

            if has_live {
                self.rederive(listing, now)?;
            } else {
                transition(target.status_mut(), DonationStatus::Expired)?;
                target.touch(now);
            }
        }

        if !stale.is_empty() {
            info!("Expired {} stale listings", stale.len());
        }

        Ok(stale.len())
    }

    /// Cheap check so the background sweep only writes when there is something to do.
    pub fn needs_sweep(&self, now: DateTime<Utc>) -> bool {
        self.sessions.values().any(|session| session.expires_at <= now)
            || self.offers.values().any(|offer| is_stale(offer, now))
            || self.predictions.values().any(|prediction| is_stale(prediction, now))
    }

    fn rederive(&mut self, listing: &ListingRef, now: DateTime<Utc>) -> Result<DonationStatus, LedgerError> {
        let live: Vec<ClaimStatus> = self
            .claims
            .values()
            .filter(|c| c.listing == *listing && c.is_live())
            .map(|c| c.status)
            .collect();

        let target = listing_in_mut(&mut self.offers, &mut self.predictions, listing)?;
        if target.status().is_terminal() {
            return Ok(target.status());
        }

        let next = derive_status(target.base_status(), target.remaining(), live);
        transition(target.status_mut(), next)?;
        target.touch(now);

        Ok(next)
    }

    fn claim_entry(&mut self, id: &str) -> Result<&mut Claim, LedgerError> {
        self.claims
            .get_mut(id)
            .ok_or_else(|| LedgerError::not_found("claim", id))
    }

    // Lookups

    pub fn offer(&self, id: &str) -> Result<&Offer, LedgerError> {
        self.offers
            .get(id)
            .ok_or_else(|| LedgerError::not_found("offer", id))
    }

    pub fn prediction(&self, id: &str) -> Result<&Prediction, LedgerError> {
        self.predictions
            .get(id)
            .ok_or_else(|| LedgerError::not_found("prediction", id))
    }

    pub fn claim_by_id(&self, id: &str) -> Result<&Claim, LedgerError> {
        self.claims
            .get(id)
            .ok_or_else(|| LedgerError::not_found("claim", id))
    }

    pub fn listing(&self, listing: &ListingRef) -> Result<&dyn Listing, LedgerError> {
        listing_in(&self.offers, &self.predictions, listing)
    }

    /// Newest first.
    pub fn offers(&self, filter: &OfferFilter) -> Vec<&Offer> {
        let mut offers: Vec<&Offer> = self
            .offers
            .values()
            .filter(|o| filter.status.is_none_or(|s| o.status == s))
            .filter(|o| filter.category.is_none_or(|c| o.category == c))
            .filter(|o| filter.source.is_none_or(|s| o.source == s))
            .filter(|o| filter.donor_id.as_deref().is_none_or(|d| o.donor_id == d))
            .collect();

        offers.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        offers
    }

    /// Soonest forecast date first.
    pub fn predictions(&self, filter: &PredictionFilter) -> Vec<&Prediction> {
        let mut predictions: Vec<&Prediction> = self
            .predictions
            .values()
            .filter(|p| filter.status.is_none_or(|s| p.status == s))
            .filter(|p| filter.category.is_none_or(|c| p.category == c))
            .filter(|p| filter.donor_id.as_deref().is_none_or(|d| p.donor_id == d))
            .collect();

        predictions.sort_by(|a, b| a.for_date.cmp(&b.for_date).then(b.created_at.cmp(&a.created_at)));
        predictions
    }

    pub fn claims(&self) -> impl Iterator<Item = &Claim> {
        self.claims.values()
    }

    pub fn claims_by_recipient<'a>(&'a self, recipient_id: &'a str) -> Vec<&'a Claim> {
        self.claims
            .values()
            .filter(|c| c.recipient_id == recipient_id)
            .collect()
    }

    pub fn claims_by_driver<'a>(&'a self, driver_id: &'a str) -> Vec<&'a Claim> {
        self.claims
            .values()
            .filter(|c| c.driver_id.as_deref() == Some(driver_id))
            .collect()
    }

    /// Claims against anything the donor listed.
    pub fn claims_on_donor<'a>(&'a self, donor_id: &'a str) -> Vec<&'a Claim> {
        self.claims
            .values()
            .filter(|c| {
                self.listing(&c.listing)
                    .is_ok_and(|listing| listing.donor_id() == donor_id)
            })
            .collect()
    }

    /// Claimed food nobody has volunteered to move yet.
    pub fn open_deliveries(&self) -> Vec<&Claim> {
        let mut open: Vec<&Claim> = self
            .claims
            .values()
            .filter(|c| c.status == ClaimStatus::Claimed && c.driver_id.is_none())
            .collect();

        open.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        open
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeDelta, TimeZone, Utc};

    use super::Ledger;
    use crate::{
        error::LedgerError,
        lifecycle::{ClaimStatus, DonationStatus},
        models::{
            Category, ListingRef, Location, NewOffer, NewPrediction, NewUser, OfferSource,
            PredictionModel, Role,
        },
    };

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 11, 14, 12, 0, 0).unwrap()
    }

    fn signup(ledger: &mut Ledger, email: &str, role: Role) -> String {
        ledger
            .register(
                NewUser {
                    email: email.into(),
                    password: "correct horse".into(),
                    name: email.split('@').next().unwrap().into(),
                    role,
                    organization: None,
                    phone: None,
                    location: Some(Location::new(40.42, -86.91)),
                },
                now(),
            )
            .unwrap()
            .id
    }

    fn bread(quantity: u32) -> NewOffer {
        NewOffer {
            title: "Day-old bread".into(),
            category: Category::Bakery,
            quantity,
            unit: Some("loaves".into()),
            expires_at: now() + TimeDelta::hours(6),
            location: None,
            source: OfferSource::Direct,
        }
    }

    struct World {
        ledger: Ledger,
        donor: String,
        recipient: String,
        other_recipient: String,
        driver: String,
        admin: String,
    }

    fn world() -> World {
        let mut ledger = Ledger::new();
        let donor = signup(&mut ledger, "store@example.com", Role::Donor);
        let recipient = signup(&mut ledger, "bank@example.com", Role::Recipient);
        let other_recipient = signup(&mut ledger, "shelter@example.com", Role::Recipient);
        let driver = signup(&mut ledger, "driver@example.com", Role::Driver);
        let admin = signup(&mut ledger, "admin@example.com", Role::Admin);

        World {
            ledger,
            donor,
            recipient,
            other_recipient,
            driver,
            admin,
        }
    }

    #[test]
    fn register_rejects_duplicate_email_case_insensitively() {
        let mut w = world();
        let err = w
            .ledger
            .register(
                NewUser {
                    email: " STORE@example.com".into(),
                    password: "another password".into(),
                    name: "Copycat".into(),
                    role: Role::Donor,
                    organization: None,
                    phone: None,
                    location: None,
                },
                now(),
            )
            .unwrap_err();

        assert_eq!(err, LedgerError::EmailTaken);
    }

    #[test]
    fn authenticate_hides_which_part_was_wrong() {
        let w = world();

        assert!(w.ledger.authenticate("store@example.com", "correct horse").is_ok());
        assert_eq!(
            w.ledger.authenticate("store@example.com", "wrong horse").unwrap_err(),
            LedgerError::InvalidCredentials
        );
        assert_eq!(
            w.ledger.authenticate("nobody@example.com", "correct horse").unwrap_err(),
            LedgerError::InvalidCredentials
        );
    }

    #[test]
    fn sessions_expire() {
        let mut w = world();
        let session = w
            .ledger
            .open_session(&w.donor, TimeDelta::hours(1), now())
            .unwrap();

        assert_eq!(w.ledger.session_user(&session.token, now()).unwrap().id, w.donor);
        assert_eq!(
            w.ledger
                .session_user(&session.token, now() + TimeDelta::hours(2))
                .unwrap_err(),
            LedgerError::InvalidSession
        );
        assert_eq!(w.ledger.prune_sessions(now() + TimeDelta::hours(2)), 1);
        assert!(!w.ledger.close_session(&session.token));
    }

    #[test]
    fn only_donors_list_food() {
        let mut w = world();
        let err = w.ledger.create_offer(&w.recipient, bread(5), now()).unwrap_err();

        assert!(matches!(err, LedgerError::Forbidden(_)));
    }

    #[test]
    fn direct_offer_falls_back_to_donor_location() {
        let mut w = world();
        let offer = w.ledger.create_offer(&w.donor, bread(5), now()).unwrap();

        assert_eq!(offer.location, Some(Location::new(40.42, -86.91)));
        assert_eq!(offer.status, DonationStatus::Available);
        assert_eq!(offer.remaining, 5);
    }

    #[test]
    fn partial_claims_keep_offer_available_until_empty() {
        let mut w = world();
        let offer = w.ledger.create_offer(&w.donor, bread(10), now()).unwrap();
        let listing = ListingRef::offer(&offer.id);

        w.ledger.claim(&w.recipient, &listing, 4, now()).unwrap();
        assert_eq!(w.ledger.offer(&offer.id).unwrap().status, DonationStatus::Available);
        assert_eq!(w.ledger.offer(&offer.id).unwrap().remaining, 6);

        w.ledger.claim(&w.other_recipient, &listing, 6, now()).unwrap();
        assert_eq!(w.ledger.offer(&offer.id).unwrap().status, DonationStatus::Claimed);
        assert_eq!(w.ledger.offer(&offer.id).unwrap().remaining, 0);
    }

    #[test]
    fn claim_arbitration_errors() {
        let mut w = world();
        let offer = w.ledger.create_offer(&w.donor, bread(3), now()).unwrap();
        let listing = ListingRef::offer(&offer.id);

        assert_eq!(
            w.ledger.claim(&w.recipient, &listing, 4, now()).unwrap_err(),
            LedgerError::InsufficientQuantity {
                requested: 4,
                remaining: 3
            }
        );

        w.ledger.claim(&w.recipient, &listing, 1, now()).unwrap();
        assert_eq!(
            w.ledger.claim(&w.recipient, &listing, 1, now()).unwrap_err(),
            LedgerError::DuplicateClaim
        );

        assert_eq!(
            w.ledger
                .claim(&w.other_recipient, &listing, 1, now() + TimeDelta::hours(7))
                .unwrap_err(),
            LedgerError::Expired
        );

        assert!(matches!(
            w.ledger.claim(&w.donor, &listing, 1, now()).unwrap_err(),
            LedgerError::Forbidden(_)
        ));
    }

    #[test]
    fn predictions_need_confirmation_before_claims() {
        let mut w = world();
        let prediction = w
            .ledger
            .create_prediction(
                &w.donor,
                NewPrediction {
                    category: Category::Produce,
                    quantity: 20,
                    confidence: 0.8,
                    for_date: now().date_naive(),
                    model: PredictionModel::Mock,
                },
                now(),
            )
            .unwrap();
        let listing = ListingRef::prediction(&prediction.id);

        assert_eq!(
            w.ledger.claim(&w.recipient, &listing, 5, now()).unwrap_err(),
            LedgerError::NotClaimable(DonationStatus::Predicted)
        );

        let confirmed = w
            .ledger
            .confirm_prediction(&w.donor, &prediction.id, Some(12), now())
            .unwrap();
        assert_eq!(confirmed.status, DonationStatus::Confirmed);
        assert_eq!(confirmed.remaining, 12);

        w.ledger.claim(&w.recipient, &listing, 12, now()).unwrap();
        assert_eq!(
            w.ledger.prediction(&prediction.id).unwrap().status,
            DonationStatus::Claimed
        );

        assert!(
            w.ledger
                .confirm_prediction(&w.donor, &prediction.id, None, now())
                .is_err()
        );
    }

    #[test]
    fn full_delivery_lifecycle() {
        let mut w = world();
        let offer = w.ledger.create_offer(&w.donor, bread(2), now()).unwrap();
        let listing = ListingRef::offer(&offer.id);
        let claim = w.ledger.claim(&w.recipient, &listing, 2, now()).unwrap();

        assert_eq!(w.ledger.open_deliveries().len(), 1);
        w.ledger.accept_delivery(&w.driver, &claim.id, now()).unwrap();
        assert!(w.ledger.open_deliveries().is_empty());

        let picked = w.ledger.pickup(&w.driver, &claim.id, now()).unwrap();
        assert_eq!(picked.status, ClaimStatus::InTransit);
        assert_eq!(w.ledger.offer(&offer.id).unwrap().status, DonationStatus::InTransit);

        let delivered = w.ledger.deliver(&w.driver, &claim.id, now()).unwrap();
        assert_eq!(delivered.status, ClaimStatus::Delivered);
        assert_eq!(w.ledger.offer(&offer.id).unwrap().status, DonationStatus::Delivered);
    }

    #[test]
    fn other_drivers_cannot_steal_or_deliver() {
        let mut w = world();
        let second_driver = signup(&mut w.ledger, "driver2@example.com", Role::Driver);
        let offer = w.ledger.create_offer(&w.donor, bread(2), now()).unwrap();
        let claim = w
            .ledger
            .claim(&w.recipient, &ListingRef::offer(&offer.id), 2, now())
            .unwrap();

        w.ledger.accept_delivery(&w.driver, &claim.id, now()).unwrap();
        assert!(matches!(
            w.ledger.accept_delivery(&second_driver, &claim.id, now()).unwrap_err(),
            LedgerError::Forbidden(_)
        ));
        assert!(matches!(
            w.ledger.pickup(&second_driver, &claim.id, now()).unwrap_err(),
            LedgerError::Forbidden(_)
        ));

        w.ledger.pickup(&w.driver, &claim.id, now()).unwrap();
        assert!(matches!(
            w.ledger.deliver(&second_driver, &claim.id, now()).unwrap_err(),
            LedgerError::Forbidden(_)
        ));

        // Admins can close out a delivery.
        w.ledger.deliver(&w.admin, &claim.id, now()).unwrap();
    }

    #[test]
    fn cancelling_claim_returns_quantity() {
        let mut w = world();
        let offer = w.ledger.create_offer(&w.donor, bread(4), now()).unwrap();
        let listing = ListingRef::offer(&offer.id);
        let claim = w.ledger.claim(&w.recipient, &listing, 4, now()).unwrap();

        assert!(matches!(
            w.ledger.cancel_claim(&w.other_recipient, &claim.id, now()).unwrap_err(),
            LedgerError::Forbidden(_)
        ));

        w.ledger.cancel_claim(&w.recipient, &claim.id, now()).unwrap();
        let offer = w.ledger.offer(&offer.id).unwrap();
        assert_eq!(offer.remaining, 4);
        assert_eq!(offer.status, DonationStatus::Available);

        // A cancelled claim no longer blocks a fresh one.
        w.ledger.claim(&w.recipient, &listing, 1, now()).unwrap();
    }

    #[test]
    fn in_transit_claims_cannot_be_cancelled() {
        let mut w = world();
        let offer = w.ledger.create_offer(&w.donor, bread(4), now()).unwrap();
        let listing = ListingRef::offer(&offer.id);
        let claim = w.ledger.claim(&w.recipient, &listing, 4, now()).unwrap();
        w.ledger.pickup(&w.driver, &claim.id, now()).unwrap();

        assert!(matches!(
            w.ledger.cancel_claim(&w.recipient, &claim.id, now()).unwrap_err(),
            LedgerError::InvalidTransition { .. }
        ));
        assert!(matches!(
            w.ledger.cancel_listing(&w.donor, &listing, now()).unwrap_err(),
            LedgerError::InvalidTransition { .. }
        ));
    }

    #[test]
    fn cancelling_listing_cascades_to_pending_claims() {
        let mut w = world();
        let offer = w.ledger.create_offer(&w.donor, bread(4), now()).unwrap();
        let listing = ListingRef::offer(&offer.id);
        let claim = w.ledger.claim(&w.recipient, &listing, 2, now()).unwrap();

        assert!(matches!(
            w.ledger.cancel_listing(&w.other_recipient, &listing, now()).unwrap_err(),
            LedgerError::Forbidden(_)
        ));

        w.ledger.cancel_listing(&w.donor, &listing, now()).unwrap();

        assert_eq!(w.ledger.offer(&offer.id).unwrap().status, DonationStatus::Cancelled);
        assert_eq!(w.ledger.offer(&offer.id).unwrap().remaining, 0);
        assert_eq!(
            w.ledger.claim_by_id(&claim.id).unwrap().status,
            ClaimStatus::Cancelled
        );
        assert!(w.ledger.cancel_listing(&w.donor, &listing, now()).is_err());
    }

    #[test]
    fn sweep_expires_untouched_and_trims_partially_claimed() {
        let mut w = world();
        let untouched = w.ledger.create_offer(&w.donor, bread(3), now()).unwrap();
        let partial = w.ledger.create_offer(&w.donor, bread(5), now()).unwrap();
        w.ledger
            .claim(&w.recipient, &ListingRef::offer(&partial.id), 2, now())
            .unwrap();

        assert_eq!(w.ledger.expire_stale(now()).unwrap(), 0);
        assert_eq!(w.ledger.expire_stale(now() + TimeDelta::days(1)).unwrap(), 2);

        let untouched = w.ledger.offer(&untouched.id).unwrap();
        assert_eq!(untouched.status, DonationStatus::Expired);

        let partial = w.ledger.offer(&partial.id).unwrap();
        assert_eq!(partial.status, DonationStatus::Claimed);
        assert_eq!(partial.remaining, 0);

        w.ledger.check_invariants().unwrap();
    }

    #[test]
    fn sweep_closes_out_partly_delivered_listing() {
        let mut w = world();
        let offer = w.ledger.create_offer(&w.donor, bread(5), now()).unwrap();
        let claim = w
            .ledger
            .claim(&w.recipient, &ListingRef::offer(&offer.id), 2, now())
            .unwrap();
        w.ledger.accept_delivery(&w.driver, &claim.id, now()).unwrap();
        w.ledger.pickup(&w.driver, &claim.id, now()).unwrap();
        w.ledger.deliver(&w.driver, &claim.id, now()).unwrap();
        assert_eq!(w.ledger.offer(&offer.id).unwrap().remaining, 3);

        let later = now() + TimeDelta::days(1);
        assert!(w.ledger.needs_sweep(later));
        assert_eq!(w.ledger.expire_stale(later).unwrap(), 1);

        let offer = w.ledger.offer(&offer.id).unwrap();
        assert_eq!(offer.status, DonationStatus::Delivered);
        assert_eq!(offer.remaining, 0);
        assert!(!w.ledger.needs_sweep(later));

        w.ledger.check_invariants().unwrap();
    }

    #[test]
    fn predictions_expire_at_end_of_their_day() {
        let mut w = world();
        let prediction = w
            .ledger
            .create_prediction(
                &w.donor,
                NewPrediction {
                    category: Category::Produce,
                    quantity: 8,
                    confidence: 0.7,
                    for_date: now().date_naive(),
                    model: PredictionModel::Mock,
                },
                now(),
            )
            .unwrap();

        let midnight = Utc.with_ymd_and_hms(2025, 11, 15, 0, 0, 0).unwrap();
        let just_before = midnight - TimeDelta::seconds(1);

        assert!(!w.ledger.needs_sweep(just_before));
        assert_eq!(w.ledger.expire_stale(just_before).unwrap(), 0);

        assert!(w.ledger.needs_sweep(midnight));
        assert_eq!(w.ledger.expire_stale(midnight).unwrap(), 1);
        assert_eq!(
            w.ledger.prediction(&prediction.id).unwrap().status,
            DonationStatus::Expired
        );
        assert!(!w.ledger.needs_sweep(midnight));
    }

    #[test]
    fn needs_sweep_notices_dead_sessions() {
        let mut w = world();
        w.ledger
            .open_session(&w.recipient, TimeDelta::hours(1), now())
            .unwrap();

        assert!(!w.ledger.needs_sweep(now()));
        assert!(w.ledger.needs_sweep(now() + TimeDelta::hours(1)));

        assert_eq!(w.ledger.prune_sessions(now() + TimeDelta::hours(1)), 1);
        assert!(!w.ledger.needs_sweep(now() + TimeDelta::hours(1)));
    }

    #[test]
    fn filters_select_by_owner_and_status() {
        let mut w = world();
        let kept = w.ledger.create_offer(&w.donor, bread(3), now()).unwrap();
        let dropped = w.ledger.create_offer(&w.donor, bread(3), now()).unwrap();
        w.ledger
            .cancel_listing(&w.donor, &ListingRef::offer(&dropped.id), now())
            .unwrap();

        let available = w.ledger.offers(&super::OfferFilter {
            status: Some(DonationStatus::Available),
            donor_id: Some(w.donor.clone()),
            ..Default::default()
        });

        assert_eq!(available.len(), 1);
        assert_eq!(available[0].id, kept.id);
        assert_eq!(w.ledger.claims_on_donor(&w.donor).len(), 0);
    }
}
