//! Geographic primitives.

use serde::{Deserialize, Serialize};

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Average road speed used when no routing oracle is available.
pub const FALLBACK_SPEED_KMH: f64 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.lng)
    }

    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        haversine_km(self, other)
    }
}

/// Great-circle distance in kilometres.
pub fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Sum of leg distances over an ordered path.
pub fn path_length_km(points: &[GeoPoint]) -> f64 {
    points.windows(2).map(|w| haversine_km(&w[0], &w[1])).sum()
}

pub fn within_radius(center: &GeoPoint, point: &GeoPoint, radius_km: f64) -> bool {
    haversine_km(center, point) <= radius_km
}

/// Latitude/longitude box that contains every point within `radius_km` of
/// `center`. Used as a cheap index prefilter before the exact haversine test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl BoundingBox {
    pub fn around(center: &GeoPoint, radius_km: f64) -> Self {
        let d_lat = (radius_km / EARTH_RADIUS_KM).to_degrees();
        let cos_lat = center.lat.to_radians().cos().abs().max(1e-6);
        let d_lng = (radius_km / (EARTH_RADIUS_KM * cos_lat)).to_degrees().min(180.0);
        Self {
            min_lat: center.lat - d_lat,
            max_lat: center.lat + d_lat,
            min_lng: center.lng - d_lng,
            max_lng: center.lng + d_lng,
        }
    }

    pub fn contains(&self, p: &GeoPoint) -> bool {
        (self.min_lat..=self.max_lat).contains(&p.lat)
            && (self.min_lng..=self.max_lng).contains(&p.lng)
    }
}

/// Where a provider is willing to work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServiceArea {
    Radius { center: GeoPoint, radius_km: f64 },
    Polygon { vertices: Vec<GeoPoint> },
}

impl ServiceArea {
    pub fn covers(&self, point: &GeoPoint) -> bool {
        match self {
            ServiceArea::Radius { center, radius_km } => within_radius(center, point, *radius_km),
            ServiceArea::Polygon { vertices } => point_in_polygon(vertices, point),
        }
    }
}

/// Ray casting, treating lat/lng as planar coordinates.
pub fn point_in_polygon(vertices: &[GeoPoint], p: &GeoPoint) -> bool {
    if vertices.len() < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = vertices.len() - 1;
    for i in 0..vertices.len() {
        let (vi, vj) = (&vertices[i], &vertices[j]);
        if (vi.lat > p.lat) != (vj.lat > p.lat)
            && p.lng < (vj.lng - vi.lng) * (p.lat - vi.lat) / (vj.lat - vi.lat) + vi.lng
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Travel time in minutes at [`FALLBACK_SPEED_KMH`].
pub fn estimate_duration_minutes(distance_km: f64) -> u32 {
    ((distance_km / FALLBACK_SPEED_KMH) * 60.0).ceil().max(0.0) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_known_distance() {
        let a = GeoPoint::new(5.0, -0.2);
        let b = GeoPoint::new(6.0, -0.2);
        let d = haversine_km(&a, &b);
        assert!((d - 111.19).abs() < 0.1, "{d}");
        assert_eq!(haversine_km(&a, &a), 0.0);
    }

    #[test]
    fn test_within_radius_and_bbox() {
        let center = GeoPoint::new(5.56, -0.21);
        let near = GeoPoint::new(5.58, -0.20);
        let far = GeoPoint::new(6.56, -0.21);
        assert!(within_radius(&center, &near, 10.0));
        assert!(!within_radius(&center, &far, 10.0));
        let bbox = BoundingBox::around(&center, 10.0);
        assert!(bbox.contains(&near));
        assert!(!bbox.contains(&far));
    }

    #[test]
    fn test_polygon_service_area() {
        let square = ServiceArea::Polygon {
            vertices: vec![
                GeoPoint::new(5.0, -1.0),
                GeoPoint::new(5.0, 0.0),
                GeoPoint::new(6.0, 0.0),
                GeoPoint::new(6.0, -1.0),
            ],
        };
        assert!(square.covers(&GeoPoint::new(5.5, -0.5)));
        assert!(!square.covers(&GeoPoint::new(6.5, -0.5)));
        let degenerate = ServiceArea::Polygon {
            vertices: vec![GeoPoint::new(5.0, -1.0)],
        };
        assert!(!degenerate.covers(&GeoPoint::new(5.0, -1.0)));
    }

    #[test]
    fn test_duration_at_thirty_kmh() {
        assert_eq!(estimate_duration_minutes(15.0), 30);
        assert_eq!(estimate_duration_minutes(0.0), 0);
    }
}
