use bank::{
    Ledger,
    ledger::OfferFilter,
    models::Category,
};
use chrono::{Datelike, NaiveDate, Weekday};

pub const HISTORY_LEN: usize = 14;
pub const DEFAULT_BASE_QUANTITY: f64 = 10.0;

/// Stores throw out more at the end of the week.
pub fn weekday_multiplier(date: NaiveDate) -> f64 {
    match date.weekday() {
        Weekday::Fri | Weekday::Sat => 1.4,
        Weekday::Sun => 1.2,
        _ => 1.0,
    }
}

/// Last [`HISTORY_LEN`] offer quantities for this donor and category, oldest first.
pub fn history(ledger: &Ledger, donor_id: &str, category: Category) -> Vec<u32> {
    let offers = ledger.offers(&OfferFilter {
        donor_id: Some(donor_id.to_string()),
        category: Some(category),
        ..Default::default()
    });

    // newest first from the ledger
    let mut quantities: Vec<u32> = offers
        .iter()
        .take(HISTORY_LEN)
        .map(|offer| offer.quantity)
        .collect();
    quantities.reverse();

    quantities
}

pub fn base_quantity(history: &[u32]) -> f64 {
    if history.is_empty() {
        return DEFAULT_BASE_QUANTITY;
    }

    history.iter().map(|&q| f64::from(q)).sum::<f64>() / history.len() as f64
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
