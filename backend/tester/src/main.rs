use std::{env, path::PathBuf};

use bank::{
    Ledger,
    models::{
        Category, ListingRef, Location, NewOffer, NewPrediction, NewUser, OfferSource,
        PredictionModel, Role,
    },
    write_ledger,
};
use chrono::{Days, TimeDelta, Utc};

const PASSWORD: &str = "foodcast-demo";

fn account(
    ledger: &mut Ledger,
    email: &str,
    name: &str,
    role: Role,
    (lat, lng): (f64, f64),
) -> anyhow::Result<String> {
    let user = ledger.register(
        NewUser {
            email: email.into(),
            password: PASSWORD.into(),
            name: name.into(),
            role,
            organization: Some(name.into()),
            phone: None,
            location: Some(Location::new(lat, lng)),
        },
        Utc::now(),
    )?;

    Ok(user.id)
}

fn main() -> anyhow::Result<()> {
    let path = env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("../ledger.json"));
    let now = Utc::now();
    let mut ledger = Ledger::new();

    let store = account(
        &mut ledger,
        "store@demo.test",
        "Corner Grocery",
        Role::Donor,
        (39.9526, -75.1652),
    )?;
    let bakery = account(
        &mut ledger,
        "bakery@demo.test",
        "Morning Bakery",
        Role::Donor,
        (39.9611, -75.1550),
    )?;
    let food_bank = account(
        &mut ledger,
        "bank@demo.test",
        "Northside Food Bank",
        Role::Recipient,
        (39.9800, -75.1500),
    )?;
    let shelter = account(
        &mut ledger,
        "shelter@demo.test",
        "Harbor Shelter",
        Role::Recipient,
        (39.9400, -75.1800),
    )?;
    account(
        &mut ledger,
        "driver@demo.test",
        "Volunteer Van",
        Role::Driver,
        (39.9550, -75.1700),
    )?;

    let listings = [
        (&store, "Bananas", Category::Produce, 30, "lbs", 12, OfferSource::Direct),
        (&store, "Yogurt cups", Category::Dairy, 24, "cups", 36, OfferSource::Surplus),
        (&bakery, "Sourdough loaves", Category::Bakery, 15, "loaves", 8, OfferSource::Direct),
        (&bakery, "Bagels", Category::Bakery, 48, "bagels", 20, OfferSource::Surplus),
    ];

    let mut offers = Vec::new();
    for (donor, title, category, quantity, unit, hours, source) in listings {
        let offer = ledger.create_offer(
            donor,
            NewOffer {
                title: title.into(),
                category,
                quantity,
                unit: Some(unit.into()),
                expires_at: now + TimeDelta::hours(hours),
                location: None,
                source,
            },
            now,
        )?;
        offers.push(offer.id);
    }

    ledger.claim(&food_bank, &ListingRef::offer(&offers[0]), 10, now)?;
    ledger.claim(&shelter, &ListingRef::offer(&offers[2]), 15, now)?;

    let tomorrow = now
        .date_naive()
        .checked_add_days(Days::new(1))
        .ok_or_else(|| anyhow::anyhow!("date out of range"))?;
    ledger.create_prediction(
        &bakery,
        NewPrediction {
            category: Category::Bakery,
            quantity: 40,
            confidence: 0.8,
            for_date: tomorrow,
            model: PredictionModel::Manual,
        },
        now,
    )?;

    ledger
        .check_invariants()
        .map_err(|violation| anyhow::anyhow!(violation))?;
    write_ledger(&path, &ledger)?;

    println!("Wrote demo ledger to {}", path.display());
    println!("Every account uses the password {PASSWORD:?}");

    Ok(())
}
