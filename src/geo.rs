//! Great-circle distance and nearest-representative ranking.
//!
//! Everything in this module is pure: callers hand in the candidate set and
//! get back an ordered result, so searches can run concurrently without any
//! coordination.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::AppError;
use crate::models::{NearbyRepresentative, Representative};

/// Mean Earth radius used by the haversine formula.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Kilometres per degree of latitude on the mean sphere.
const KM_PER_DEGREE: f64 = EARTH_RADIUS_KM * std::f64::consts::PI / 180.0;

/// Latitude or longitude outside its legal range (or not a number).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InvalidCoordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl fmt::Display for InvalidCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid coordinate ({}, {}): latitude must be in [-90, 90] and longitude in [-180, 180]",
            self.latitude, self.longitude
        )
    }
}

impl std::error::Error for InvalidCoordinate {}

impl From<InvalidCoordinate> for AppError {
    fn from(err: InvalidCoordinate) -> Self {
        AppError::Validation(err.to_string())
    }
}

/// A validated latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    latitude: f64,
    longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, InvalidCoordinate> {
        let lat_ok = latitude.is_finite() && (-90.0..=90.0).contains(&latitude);
        let lon_ok = longitude.is_finite() && (-180.0..=180.0).contains(&longitude);
        if lat_ok && lon_ok {
            Ok(Self {
                latitude,
                longitude,
            })
        } else {
            Err(InvalidCoordinate {
                latitude,
                longitude,
            })
        }
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }
}

/// Haversine distance in kilometres between two validated coordinates.
///
/// Symmetric, non-negative and exactly zero for identical points.
pub fn distance_km(a: Coordinate, b: Coordinate) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    // Rounding can push h a hair outside [0, 1] for antipodal points.
    let h = h.clamp(0.0, 1.0);

    2.0 * EARTH_RADIUS_KM * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Distance between two raw `(latitude, longitude)` pairs.
pub fn distance(a: (f64, f64), b: (f64, f64)) -> Result<f64, InvalidCoordinate> {
    let a = Coordinate::new(a.0, a.1)?;
    let b = Coordinate::new(b.0, b.1)?;
    Ok(distance_km(a, b))
}

/// Axis-aligned latitude/longitude box enclosing a search circle.
///
/// Used only to narrow candidates before exact ranking, so it may be larger
/// than the circle but never smaller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_latitude: f64,
    pub max_latitude: f64,
    /// `None` when the box wraps a pole or the antimeridian.
    pub longitude_range: Option<(f64, f64)>,
}

impl BoundingBox {
    pub fn around(origin: Coordinate, radius_km: f64) -> Self {
        let radius_km = radius_km.max(0.0);
        let d_lat = radius_km / KM_PER_DEGREE;
        let min_latitude = origin.latitude - d_lat;
        let max_latitude = origin.latitude + d_lat;

        if min_latitude <= -90.0 || max_latitude >= 90.0 {
            return Self {
                min_latitude: min_latitude.max(-90.0),
                max_latitude: max_latitude.min(90.0),
                longitude_range: None,
            };
        }

        // Widest longitude span is at the latitude edge nearest a pole.
        let widest = min_latitude.abs().max(max_latitude.abs()).to_radians();
        let d_lon = radius_km / (KM_PER_DEGREE * widest.cos());
        let min_longitude = origin.longitude - d_lon;
        let max_longitude = origin.longitude + d_lon;

        let longitude_range = if d_lon.is_finite() && min_longitude >= -180.0 && max_longitude <= 180.0
        {
            Some((min_longitude, max_longitude))
        } else {
            None
        };

        Self {
            min_latitude,
            max_latitude,
            longitude_range,
        }
    }

    pub fn contains(&self, point: Coordinate) -> bool {
        let lat_ok = point.latitude >= self.min_latitude && point.latitude <= self.max_latitude;
        let lon_ok = match self.longitude_range {
            Some((min, max)) => point.longitude >= min && point.longitude <= max,
            None => true,
        };
        lat_ok && lon_ok
    }
}

/// Ranks candidates by distance from `origin`.
///
/// Only available, approved, active representatives with a recorded location
/// are considered. Hits beyond `radius_km` are dropped, the rest are sorted
/// by distance (ties by id) and truncated to `limit`. A non-positive radius
/// or limit yields an empty result.
pub fn find_nearby<I>(
    candidates: I,
    origin: Coordinate,
    radius_km: f64,
    limit: i64,
) -> Vec<NearbyRepresentative>
where
    I: IntoIterator<Item = Representative>,
{
    if radius_km.is_nan() || radius_km <= 0.0 || limit <= 0 {
        return Vec::new();
    }

    let mut hits: Vec<(f64, Representative, Coordinate)> = candidates
        .into_iter()
        .filter(Representative::is_discoverable)
        .filter_map(|rep| {
            let location = rep.location()?;
            let d = distance_km(origin, location);
            (d <= radius_km).then_some((d, rep, location))
        })
        .collect();

    hits.sort_by(|(da, ra, _), (db, rb, _)| da.total_cmp(db).then_with(|| ra.id.cmp(&rb.id)));
    hits.truncate(usize::try_from(limit).unwrap_or(usize::MAX));

    hits.into_iter()
        .map(|(distance_km, rep, location)| NearbyRepresentative {
            representative_id: rep.id,
            distance_km,
            display_name: rep.display_name,
            role: rep.role,
            headline: rep.headline,
            latitude: location.latitude,
            longitude: location.longitude,
            average_score: rep.average_score,
            location_updated_at: rep.location_updated_at,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TargetRole;
    use chrono::Utc;
    use uuid::Uuid;

    fn point(lat: f64, lon: f64) -> Coordinate {
        Coordinate::new(lat, lon).unwrap()
    }

    fn rep_at(lat: Option<f64>, lon: Option<f64>) -> Representative {
        Representative {
            id: Uuid::new_v4(),
            display_name: "rep".to_string(),
            role: TargetRole::Agent,
            headline: None,
            latitude: lat,
            longitude: lon,
            location_updated_at: Some(Utc::now()),
            is_available: true,
            is_approved: true,
            is_active: true,
            average_score: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_known_distance() {
        let d = distance_km(point(40.0, -73.0), point(40.01, -73.01));
        assert!((d - 1.4).abs() < 0.05, "got {}", d);

        let d = distance_km(point(40.0, -73.0), point(41.0, -74.0));
        assert!((d - 137.0).abs() < 3.0, "got {}", d);
    }

    #[test]
    fn test_rejects_out_of_range() {
        assert!(Coordinate::new(90.1, 0.0).is_err());
        assert!(Coordinate::new(0.0, -180.5).is_err());
        assert!(Coordinate::new(f64::NAN, 0.0).is_err());
        assert!(distance((0.0, 0.0), (91.0, 0.0)).is_err());
        assert!(Coordinate::new(-90.0, 180.0).is_ok());
    }

    #[test]
    fn test_antipodal_is_half_circumference() {
        let d = distance_km(point(0.0, 0.0), point(0.0, 180.0));
        assert!((d - EARTH_RADIUS_KM * std::f64::consts::PI).abs() < 1e-6);
    }

    #[test]
    fn test_empty_for_non_positive_radius_or_limit() {
        let reps = vec![rep_at(Some(40.0), Some(-73.0))];
        let origin = point(40.0, -73.0);
        assert!(find_nearby(reps.clone(), origin, 0.0, 10).is_empty());
        assert!(find_nearby(reps.clone(), origin, -1.0, 10).is_empty());
        assert!(find_nearby(reps.clone(), origin, f64::NAN, 10).is_empty());
        assert!(find_nearby(reps.clone(), origin, 5.0, 0).is_empty());
        assert_eq!(find_nearby(reps, origin, 5.0, 1).len(), 1);
    }

    #[test]
    fn test_unlocated_never_returned() {
        let reps = vec![rep_at(None, None), rep_at(Some(40.0), None)];
        let hits = find_nearby(reps, point(40.0, -73.0), 20_000.0, 100);
        assert!(hits.is_empty());
    }

    #[test]
    fn test_ties_broken_by_id() {
        let mut a = rep_at(Some(40.01), Some(-73.0));
        let mut b = rep_at(Some(40.01), Some(-73.0));
        a.id = Uuid::from_u128(2);
        b.id = Uuid::from_u128(1);

        let hits = find_nearby(vec![a, b], point(40.0, -73.0), 5.0, 10);
        let ids: Vec<Uuid> = hits.iter().map(|h| h.representative_id).collect();
        assert_eq!(ids, vec![Uuid::from_u128(1), Uuid::from_u128(2)]);
    }

    #[test]
    fn test_bounding_box_contains_circle_edge() {
        let origin = point(60.0, 10.0);
        let bbox = BoundingBox::around(origin, 50.0);
        // Due north, south, east and west at ~49.9 km.
        for (dlat, dlon) in [(0.448, 0.0), (-0.448, 0.0), (0.0, 0.897), (0.0, -0.897)] {
            let p = point(60.0 + dlat, 10.0 + dlon);
            assert!(distance_km(origin, p) <= 50.0);
            assert!(bbox.contains(p), "{:?} outside {:?}", p, bbox);
        }
    }

    #[test]
    fn test_bounding_box_wraps_near_antimeridian_and_pole() {
        let bbox = BoundingBox::around(point(0.0, 179.9), 100.0);
        assert!(bbox.longitude_range.is_none());
        assert!(bbox.contains(point(0.0, -179.9)));

        let bbox = BoundingBox::around(point(89.9, 0.0), 100.0);
        assert!(bbox.longitude_range.is_none());
        assert_eq!(bbox.max_latitude, 90.0);
    }
}
