use compact_str::CompactString;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::PropertyType;
use crate::geo::GeoPoint;

fn enabled() -> bool {
    true
}

/// One typed contribution to a price.
///
/// Rates named `*_percentage` or `*_rate` on insurance are percentages
/// (`2.5` means 2.5%).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PricingFactor {
    Distance {
        base_rate_per_km: Decimal,
        additional_distance_threshold: Decimal,
        additional_distance_multiplier: Decimal,
    },
    Weight {
        base_rate_per_kg: Decimal,
        heavy_item_threshold: Decimal,
        heavy_item_surcharge: Decimal,
    },
    PropertyType {
        property_type: PropertyType,
        base_rate: Decimal,
        rate_per_room: Decimal,
        floor_rate: Decimal,
        /// Applied to the floor cost when an elevator is available.
        elevator_discount: Decimal,
    },
    Vehicle {
        base_rate: Decimal,
        capacity_m3: Decimal,
    },
    SpecialRequirements {
        fragile_item_rate: Decimal,
        disassembly_rate: Decimal,
    },
    /// Congestion or access zone around a point.
    Location {
        center: GeoPoint,
        radius_km: f64,
        surcharge: Decimal,
    },
    Staff {
        hourly_rate: Decimal,
        min_hours: Decimal,
    },
    LoadingTime {
        base_minutes: Decimal,
        minutes_per_item: Decimal,
        hourly_rate: Decimal,
    },
    Insurance {
        value_percentage: Decimal,
        min_premium: Decimal,
        premium_coverage_multiplier: Decimal,
        high_value_item_threshold: Decimal,
        high_value_item_rate: Decimal,
    },
    Time {
        weekend_multiplier: Decimal,
        holiday_multiplier: Decimal,
    },
    Weather {
        rain_multiplier: Decimal,
        snow_multiplier: Decimal,
        extreme_multiplier: Decimal,
    },
    ServiceLevel {
        standard: Decimal,
        express: Decimal,
        same_day: Decimal,
        scheduled: Decimal,
    },
}

impl PricingFactor {
    pub fn kind(&self) -> &'static str {
        match self {
            PricingFactor::Distance { .. } => "distance",
            PricingFactor::Weight { .. } => "weight",
            PricingFactor::PropertyType { .. } => "property_type",
            PricingFactor::Vehicle { .. } => "vehicle",
            PricingFactor::SpecialRequirements { .. } => "special_requirements",
            PricingFactor::Location { .. } => "location",
            PricingFactor::Staff { .. } => "staff",
            PricingFactor::LoadingTime { .. } => "loading_time",
            PricingFactor::Insurance { .. } => "insurance",
            PricingFactor::Time { .. } => "time",
            PricingFactor::Weather { .. } => "weather",
            PricingFactor::ServiceLevel { .. } => "service_level",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorEntry {
    pub name: CompactString,
    #[serde(default = "enabled")]
    pub active: bool,
    #[serde(flatten)]
    pub factor: PricingFactor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingConfiguration {
    #[serde(default = "Uuid::now_v7")]
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub is_default: bool,
    pub base_price: Decimal,
    pub min_price: Decimal,
    pub max_price_multiplier: Decimal,
    #[serde(default)]
    pub fuel_surcharge_percentage: Decimal,
    #[serde(default)]
    pub carbon_offset_rate: Decimal,
    #[serde(default)]
    pub platform_fee_percentage: Decimal,
    #[serde(default)]
    pub factors: Vec<FactorEntry>,
}

impl PricingConfiguration {
    pub fn active_factors(&self) -> impl Iterator<Item = &PricingFactor> {
        self.factors.iter().filter(|f| f.active).map(|f| &f.factor)
    }

    pub fn max_price(&self) -> Decimal {
        self.base_price * self.max_price_multiplier
    }

    pub fn validate(&self) -> Result<(), String> {
        let hundred = Decimal::ONE_HUNDRED;
        if self.base_price.is_sign_negative() {
            return Err("base_price must not be negative".into());
        }
        if self.min_price.is_sign_negative() {
            return Err("min_price must not be negative".into());
        }
        if self.max_price_multiplier < Decimal::ONE {
            return Err("max_price_multiplier must be at least 1".into());
        }
        for (name, pct) in [
            ("fuel_surcharge_percentage", self.fuel_surcharge_percentage),
            ("carbon_offset_rate", self.carbon_offset_rate),
            ("platform_fee_percentage", self.platform_fee_percentage),
        ] {
            if pct.is_sign_negative() || pct > hundred {
                return Err(format!("{name} must be within 0..=100"));
            }
        }
        for entry in &self.factors {
            if let PricingFactor::Vehicle { capacity_m3, .. } = &entry.factor {
                if *capacity_m3 <= Decimal::ZERO {
                    return Err(format!("factor {}: capacity_m3 must be positive", entry.name));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factor_entries_are_tagged() {
        let json = serde_json::json!({
            "name": "Base distance",
            "kind": "distance",
            "base_rate_per_km": "2.5",
            "additional_distance_threshold": "50",
            "additional_distance_multiplier": "0.8"
        });
        let entry: FactorEntry = serde_json::from_value(json).unwrap();
        assert!(entry.active);
        assert_eq!(entry.factor.kind(), "distance");
    }

    #[test]
    fn test_validate_rejects_bad_knobs() {
        let mut cfg = PricingConfiguration {
            id: Uuid::nil(),
            name: "default".into(),
            is_default: true,
            base_price: Decimal::new(50, 0),
            min_price: Decimal::new(30, 0),
            max_price_multiplier: Decimal::new(10, 0),
            fuel_surcharge_percentage: Decimal::new(5, 0),
            carbon_offset_rate: Decimal::ONE,
            platform_fee_percentage: Decimal::new(15, 0),
            factors: vec![],
        };
        assert!(cfg.validate().is_ok());
        cfg.max_price_multiplier = Decimal::new(5, 1);
        assert!(cfg.validate().is_err());
    }
}
