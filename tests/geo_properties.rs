/// Property-based tests using proptest
/// Distance and nearest-representative ranking invariants that should hold for all inputs
use chrono::Utc;
use proptest::prelude::*;
use rep_callback_api::geo::{distance, distance_km, find_nearby, BoundingBox, Coordinate};
use rep_callback_api::models::{Representative, TargetRole};
use uuid::Uuid;

fn representative(lat: Option<f64>, lon: Option<f64>, available: bool) -> Representative {
    Representative {
        id: Uuid::new_v4(),
        display_name: "Representative".to_string(),
        role: TargetRole::Agent,
        headline: None,
        latitude: lat,
        longitude: lon,
        location_updated_at: None,
        is_available: available,
        is_approved: true,
        is_active: true,
        average_score: None,
        created_at: Utc::now(),
    }
}

fn coordinate() -> impl Strategy<Value = Coordinate> {
    (-90.0f64..=90.0, -180.0f64..=180.0).prop_map(|(lat, lon)| Coordinate::new(lat, lon).unwrap())
}

/// Candidates clustered around the origin so radii actually cut through them.
fn candidates() -> impl Strategy<Value = Vec<Representative>> {
    prop::collection::vec(
        (
            -2.0f64..2.0,
            -2.0f64..2.0,
            any::<bool>(),
            any::<bool>(),
            any::<bool>(),
        ),
        0..40,
    )
    .prop_map(|rows| {
        rows.into_iter()
            .map(|(dlat, dlon, located, available, approved)| {
                let (lat, lon) = if located {
                    (Some(40.0 + dlat), Some(-73.0 + dlon))
                } else {
                    (None, None)
                };
                let mut rep = representative(lat, lon, available);
                rep.is_approved = approved;
                rep
            })
            .collect()
    })
}

fn origin() -> Coordinate {
    Coordinate::new(40.0, -73.0).unwrap()
}

// Property: distance is a symmetric, non-negative metric with zero self-distance
proptest! {
    #[test]
    fn distance_is_symmetric(a in coordinate(), b in coordinate()) {
        let ab = distance_km(a, b);
        let ba = distance_km(b, a);
        prop_assert!((ab - ba).abs() < 1e-9);
    }

    #[test]
    fn distance_to_self_is_zero(a in coordinate()) {
        prop_assert_eq!(distance_km(a, a), 0.0);
    }

    #[test]
    fn distance_is_non_negative_and_bounded(a in coordinate(), b in coordinate()) {
        let d = distance_km(a, b);
        prop_assert!(d >= 0.0);
        // Half the circumference of the mean sphere.
        prop_assert!(d <= std::f64::consts::PI * 6371.0 + 1e-6);
    }

    #[test]
    fn out_of_range_latitude_is_rejected(lat in 90.0001f64..1000.0, lon in -180.0f64..=180.0) {
        prop_assert!(distance((lat, lon), (0.0, 0.0)).is_err());
        prop_assert!(distance((0.0, 0.0), (-lat, lon)).is_err());
    }
}

// Property: the search never widens its output by shrinking the radius
proptest! {
    #[test]
    fn larger_radius_returns_superset(reps in candidates(), r1 in 0.0f64..200.0, extra in 0.0f64..200.0) {
        let r2 = r1 + extra;
        let small = find_nearby(reps.clone(), origin(), r1, i64::MAX);
        let large = find_nearby(reps, origin(), r2, i64::MAX);

        for hit in &small {
            prop_assert!(large.iter().any(|h| h.representative_id == hit.representative_id));
        }
    }

    #[test]
    fn never_returns_unavailable_or_unlocated(reps in candidates(), radius in -10.0f64..500.0, limit in -5i64..50) {
        let hits = find_nearby(reps.clone(), origin(), radius, limit);

        prop_assert!(hits.len() as i64 <= limit.max(0));
        for hit in &hits {
            let rep = reps.iter().find(|r| r.id == hit.representative_id).unwrap();
            prop_assert!(rep.is_available);
            prop_assert!(rep.is_approved);
            prop_assert!(rep.latitude.is_some() && rep.longitude.is_some());
            prop_assert!(hit.distance_km <= radius);
        }
    }

    #[test]
    fn results_are_sorted_by_distance(reps in candidates(), radius in 0.0f64..500.0) {
        let hits = find_nearby(reps, origin(), radius, i64::MAX);
        for pair in hits.windows(2) {
            prop_assert!(pair[0].distance_km <= pair[1].distance_km);
        }
    }

    #[test]
    fn bounding_box_never_excludes_a_hit(reps in candidates(), radius in 0.1f64..300.0) {
        let area = BoundingBox::around(origin(), radius);
        for hit in find_nearby(reps, origin(), radius, i64::MAX) {
            let point = Coordinate::new(hit.latitude, hit.longitude).unwrap();
            prop_assert!(area.contains(point));
        }
    }
}

#[test]
fn end_to_end_nearby_example() {
    let near = representative(Some(40.01), Some(-73.01), true);
    let far = representative(Some(41.0), Some(-74.0), true);
    let reps = vec![near.clone(), far.clone()];

    let within_5 = find_nearby(reps.clone(), origin(), 5.0, 10);
    assert_eq!(within_5.len(), 1);
    assert_eq!(within_5[0].representative_id, near.id);
    assert!((within_5[0].distance_km - 1.4).abs() < 0.05);

    let within_150 = find_nearby(reps, origin(), 150.0, 10);
    assert_eq!(within_150.len(), 2);
    assert_eq!(within_150[1].representative_id, far.id);
    assert!((within_150[1].distance_km - 137.0).abs() < 3.0);
}

#[test]
fn unlocated_representative_is_never_returned() {
    let unlocated = representative(None, None, true);
    let half = representative(Some(40.0), None, true);
    assert!(find_nearby(vec![unlocated, half], origin(), 20_000.0, 10).is_empty());
}
