use rand::Rng;

use crate::models::partner::{GeoPoint, VehicleType};

const EARTH_RADIUS_KM: f64 = 6_371.0;

pub const ETA_BUFFER_MINUTES: std::ops::RangeInclusive<u32> = 20..=40;

pub fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    distance_km(a.lat, a.lng, b.lat, b.lng)
}

pub fn distance_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lng = (lon2 - lon1).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lng = (delta_lng / 2.0).sin();

    let haversine = sin_lat * sin_lat + phi1.cos() * phi2.cos() * sin_lng * sin_lng;
    // rounding can push this a hair past 1.0 for antipodal points
    let central_angle = 2.0 * haversine.clamp(0.0, 1.0).sqrt().asin();

    EARTH_RADIUS_KM * central_angle
}

/// Average riding speed in km/h.
pub fn speed_kmh(vehicle: VehicleType) -> f64 {
    match vehicle {
        VehicleType::Bike | VehicleType::Other => 25.0,
        VehicleType::Scooter => 20.0,
        VehicleType::Bicycle => 15.0,
        VehicleType::Car => 30.0,
    }
}

/// Travel time rounded up, plus a random 20-40 minute slack for traffic and stops.
pub fn estimate_eta_minutes(distance_km: f64, vehicle: VehicleType) -> u32 {
    let buffer = rand::thread_rng().gen_range(ETA_BUFFER_MINUTES);
    estimate_eta_minutes_with_buffer(distance_km, vehicle, buffer)
}

pub fn estimate_eta_minutes_with_buffer(distance_km: f64, vehicle: VehicleType, buffer: u32) -> u32 {
    let travel = (distance_km.max(0.0) / speed_kmh(vehicle) * 60.0).ceil();
    travel as u32 + buffer
}

pub fn is_valid_coordinate(lon: f64, lat: f64) -> bool {
    (-180.0..=180.0).contains(&lon) && (-90.0..=90.0).contains(&lat)
}

pub fn is_valid_point(point: &GeoPoint) -> bool {
    is_valid_coordinate(point.lng, point.lat)
}
