//! # Geo
//!
//! Distance math for the map and the driver route.
//!
//! ## Route
//! - Greedy nearest neighbour from the driver's position
//! - Every claim is a pickup (donor) and a dropoff (recipient)
//! - A dropoff only becomes reachable once its pickup is done, or when the driver already holds the food
//! - Good enough for a handful of stops, not a solver
use serde::Serialize;

use crate::models::Location;

pub const EARTH_RADIUS_KM: f64 = 6371.0;
pub const AVERAGE_SPEED_KMH: f64 = 30.0;

pub fn haversine_km(a: &Location, b: &Location) -> f64 {
    let (lat_a, lat_b) = (a.lat.to_radians(), b.lat.to_radians());
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (d_lng / 2.0).sin().powi(2);

    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

pub fn travel_minutes(km: f64) -> u32 {
    if km <= 0.0 {
        return 0;
    }

    (km / AVERAGE_SPEED_KMH * 60.0).ceil() as u32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopKind {
    Pickup,
    Dropoff,
}

#[derive(Debug, Clone)]
pub struct Errand {
    pub claim_id: String,
    /// Donor side. `None` once the food is already in the vehicle.
    pub pickup: Option<Location>,
    pub dropoff: Location,
}

#[derive(Debug, Clone, Serialize)]
pub struct RouteStop {
    pub claim_id: String,
    pub kind: StopKind,
    pub location: Location,
    pub leg_km: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Route {
    pub stops: Vec<RouteStop>,
    pub total_km: f64,
    pub total_minutes: u32,
}

pub fn plan_route(start: &Location, errands: &[Errand]) -> Route {
    // (errand index, kind, location)
    let mut open: Vec<(usize, StopKind, &Location)> = errands
        .iter()
        .enumerate()
        .map(|(index, errand)| match &errand.pickup {
            Some(pickup) => (index, StopKind::Pickup, pickup),
            None => (index, StopKind::Dropoff, &errand.dropoff),
        })
        .collect();

    let mut route = Route::default();
    let mut here = start.clone();

    while !open.is_empty() {
        let (position, leg_km) = open
            .iter()
            .enumerate()
            .map(|(position, (_, _, location))| (position, haversine_km(&here, location)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .unwrap_or((0, 0.0));

        let (index, kind, location) = open.swap_remove(position);
        let errand = &errands[index];

        if kind == StopKind::Pickup {
            open.push((index, StopKind::Dropoff, &errand.dropoff));
        }

        here = location.clone();
        route.total_km += leg_km;
        route.stops.push(RouteStop {
            claim_id: errand.claim_id.clone(),
            kind,
            location: location.clone(),
            leg_km,
        });
    }

    route.total_minutes = travel_minutes(route.total_km);
    route
}
