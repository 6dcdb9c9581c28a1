use async_trait::async_trait;

use crate::error::OracleError;
use crate::geo::{FALLBACK_SPEED_KMH, GeoPoint, path_length_km};

/// Litres per kilometre assumed for a loaded van.
const FALLBACK_FUEL_L_PER_KM: f64 = 0.12;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RouteEstimate {
    pub distance_m: f64,
    pub duration_s: f64,
    pub fuel_l: f64,
}

impl RouteEstimate {
    /// Straight-line estimate over consecutive points.
    pub fn straight_line(points: &[GeoPoint]) -> Self {
        let km = path_length_km(points);
        Self {
            distance_m: km * 1000.0,
            duration_s: km / FALLBACK_SPEED_KMH * 3600.0,
            fuel_l: km * FALLBACK_FUEL_L_PER_KM,
        }
    }

    pub fn distance_km(&self) -> f64 {
        self.distance_m / 1000.0
    }
}

#[async_trait]
pub trait GeoOracle: Send + Sync {
    async fn geocode(&self, address: &str) -> Result<GeoPoint, OracleError>;

    async fn distance_and_duration(&self, points: &[GeoPoint])
    -> Result<RouteEstimate, OracleError>;
}

/// Routing without a routing service. Cannot geocode.
pub struct HaversineGeo;

#[async_trait]
impl GeoOracle for HaversineGeo {
    async fn geocode(&self, _address: &str) -> Result<GeoPoint, OracleError> {
        Err(OracleError::Unsupported)
    }

    async fn distance_and_duration(
        &self,
        points: &[GeoPoint],
    ) -> Result<RouteEstimate, OracleError> {
        Ok(RouteEstimate::straight_line(points))
    }
}
