//! Deterministic price evaluation.
//!
//! [`quote`] is a pure function of the context, the configuration, the
//! weather reading and the holiday calendar.

use compact_str::CompactString;
use haulage_sdk::objects::{PriceComponentObject, PriceQuoteObject};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use time::{Date, Weekday};

use crate::entities::{
    InsuranceRequest, PricingConfiguration, PricingFactor, PropertyDetails, Request,
    RequestPriority, ServiceLevel,
};
use crate::error::DispatchError;
use crate::geo::{GeoPoint, within_radius};
use crate::oracles::WeatherCondition;
use crate::pricing::HolidayCalendar;

const ONE_POINT_ONE: Decimal = Decimal::from_parts(11, 0, 0, false, 1);
const ONE_POINT_TWO: Decimal = Decimal::from_parts(12, 0, 0, false, 1);
const ONE_POINT_FIVE: Decimal = Decimal::from_parts(15, 0, 0, false, 1);
const ZERO_POINT_NINE: Decimal = Decimal::from_parts(9, 0, 0, false, 1);
const SIXTY: Decimal = Decimal::from_parts(60, 0, 0, false, 0);
const UTILISATION_HIGH: Decimal = Decimal::from_parts(80, 0, 0, false, 2);
const UTILISATION_MEDIUM: Decimal = Decimal::from_parts(60, 0, 0, false, 2);

/// Round to cents, half away from zero.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Everything about a request that influences its price.
#[derive(Debug, Clone, PartialEq)]
pub struct PricingContext {
    pub distance_km: Decimal,
    pub weight_kg: Decimal,
    pub volume_m3: Decimal,
    pub item_count: u32,
    pub fragile_items: u32,
    pub disassembly_items: u32,
    pub staff_count: u8,
    pub property: Option<PropertyDetails>,
    pub insurance: Option<InsuranceRequest>,
    pub pickup: Option<GeoPoint>,
    pub dropoff: Option<GeoPoint>,
    pub date: Date,
    pub service_level: ServiceLevel,
    pub priority: RequestPriority,
}

impl PricingContext {
    pub fn from_request(request: &Request, distance_km: Decimal) -> Self {
        let count = |pred: fn(&crate::entities::Item) -> bool| -> u32 {
            request
                .items
                .iter()
                .filter(|i| pred(i))
                .map(|i| i.quantity)
                .sum()
        };
        Self {
            distance_km,
            weight_kg: request.total_weight_kg(),
            volume_m3: request.total_volume_m3(),
            item_count: request.item_count(),
            fragile_items: count(|i| i.fragile),
            disassembly_items: count(|i| i.needs_disassembly),
            staff_count: request.staff_count,
            property: request.property,
            insurance: request.insurance,
            pickup: request.pickup().map(|s| s.location),
            dropoff: request.dropoff().map(|s| s.location),
            date: request.pickup_date,
            service_level: request.service_level,
            priority: request.priority,
        }
    }
}

/// What the weather oracle said, if anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeatherReading {
    Known(WeatherCondition),
    /// The oracle could not be reached.
    Unknown,
    /// No location to look weather up for.
    NotApplicable,
}

impl WeatherReading {
    pub fn label(&self) -> &'static str {
        match self {
            WeatherReading::Known(WeatherCondition::Normal) => "normal",
            WeatherReading::Known(WeatherCondition::Rain) => "rain",
            WeatherReading::Known(WeatherCondition::Snow) => "snow",
            WeatherReading::Known(WeatherCondition::Extreme) => "extreme",
            WeatherReading::Unknown => "unknown",
            WeatherReading::NotApplicable => "not_applicable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceComponent {
    pub name: CompactString,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Multipliers {
    pub service_level: Decimal,
    pub time: Decimal,
    pub weather: Decimal,
    pub priority: Decimal,
}

impl Multipliers {
    pub fn product(&self) -> Decimal {
        self.service_level * self.time * self.weather * self.priority
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceBreakdown {
    /// Sum of components, before multipliers.
    pub subtotal: Decimal,
    pub adjusted_subtotal: Decimal,
    pub fuel_surcharge: Decimal,
    pub carbon_offset: Decimal,
    pub total_before_bounds: Decimal,
    pub min_price: Decimal,
    pub max_price: Decimal,
    pub is_weekend: bool,
    pub is_holiday: bool,
    pub weather: WeatherReading,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceQuote {
    pub final_price: Decimal,
    pub breakdown: PriceBreakdown,
    pub components: Vec<PriceComponent>,
    pub multipliers: Multipliers,
    pub config_version: u64,
}

impl PriceQuote {
    pub fn to_object(&self, currency: &str) -> PriceQuoteObject {
        PriceQuoteObject {
            final_price: self.final_price,
            currency: currency.to_string(),
            components: self
                .components
                .iter()
                .map(|c| PriceComponentObject {
                    name: c.name.to_string(),
                    amount: c.amount,
                })
                .collect(),
            service_level_multiplier: self.multipliers.service_level,
            time_multiplier: self.multipliers.time,
            weather_multiplier: self.multipliers.weather,
            priority_multiplier: self.multipliers.priority,
            fuel_surcharge: self.breakdown.fuel_surcharge,
            carbon_offset: self.breakdown.carbon_offset,
            weather: self.breakdown.weather.label().to_string(),
            config_version: self.config_version,
        }
    }
}

pub fn is_weekend(date: Date) -> bool {
    matches!(date.weekday(), Weekday::Saturday | Weekday::Sunday)
}

fn default_service_level_multiplier(level: ServiceLevel) -> Decimal {
    match level {
        ServiceLevel::Standard => Decimal::ONE,
        ServiceLevel::Express => ONE_POINT_FIVE,
        ServiceLevel::SameDay => Decimal::TWO,
        ServiceLevel::Scheduled => ZERO_POINT_NINE,
    }
}

/// Same mapping as service level; `high` and `urgent` rank with express and
/// same-day respectively.
pub fn priority_multiplier(priority: RequestPriority) -> Decimal {
    match priority {
        RequestPriority::Standard => Decimal::ONE,
        RequestPriority::Express | RequestPriority::High => ONE_POINT_FIVE,
        RequestPriority::SameDay | RequestPriority::Urgent => Decimal::TWO,
        RequestPriority::Scheduled => ZERO_POINT_NINE,
    }
}

fn default_weather_multiplier(condition: WeatherCondition) -> Decimal {
    match condition {
        WeatherCondition::Normal => Decimal::ONE,
        WeatherCondition::Rain => ONE_POINT_TWO,
        WeatherCondition::Snow => ONE_POINT_FIVE,
        WeatherCondition::Extreme => Decimal::TWO,
    }
}

/// Time multiplier for `date`; a holiday outranks a weekend.
pub fn time_multiplier(config: &PricingConfiguration, date: Date, holidays: &HolidayCalendar) -> Decimal {
    let holiday = holidays.contains(date);
    let weekend = is_weekend(date);
    config
        .active_factors()
        .find_map(|f| match f {
            PricingFactor::Time {
                weekend_multiplier,
                holiday_multiplier,
            } => Some(if holiday {
                *holiday_multiplier
            } else if weekend {
                *weekend_multiplier
            } else {
                Decimal::ONE
            }),
            _ => None,
        })
        .unwrap_or(Decimal::ONE)
}

fn capacity_multiplier(volume_m3: Decimal, capacity_m3: Decimal) -> Decimal {
    if capacity_m3 <= Decimal::ZERO {
        return Decimal::ONE;
    }
    let utilisation = volume_m3 / capacity_m3;
    if utilisation > UTILISATION_HIGH {
        ONE_POINT_TWO
    } else if utilisation > UTILISATION_MEDIUM {
        ONE_POINT_ONE
    } else {
        Decimal::ONE
    }
}

fn factor_amount(factor: &PricingFactor, ctx: &PricingContext) -> Option<Decimal> {
    let amount = match factor {
        PricingFactor::Distance {
            base_rate_per_km,
            additional_distance_threshold,
            additional_distance_multiplier,
        } => {
            if ctx.distance_km <= *additional_distance_threshold {
                ctx.distance_km * base_rate_per_km
            } else {
                additional_distance_threshold * base_rate_per_km
                    + (ctx.distance_km - additional_distance_threshold)
                        * base_rate_per_km
                        * additional_distance_multiplier
            }
        }
        PricingFactor::Weight {
            base_rate_per_kg,
            heavy_item_threshold,
            heavy_item_surcharge,
        } => {
            let mut amount = ctx.weight_kg * base_rate_per_kg;
            if ctx.weight_kg > *heavy_item_threshold {
                amount += heavy_item_surcharge;
            }
            amount
        }
        PricingFactor::PropertyType {
            property_type,
            base_rate,
            rate_per_room,
            floor_rate,
            elevator_discount,
        } => {
            let property = ctx.property.filter(|p| p.property_type == *property_type)?;
            let discount = if property.has_elevator {
                *elevator_discount
            } else {
                Decimal::ONE
            };
            base_rate
                + Decimal::from(property.rooms) * rate_per_room
                + Decimal::from(property.floor) * floor_rate * discount
        }
        PricingFactor::Vehicle {
            base_rate,
            capacity_m3,
        } => base_rate * capacity_multiplier(ctx.volume_m3, *capacity_m3),
        PricingFactor::SpecialRequirements {
            fragile_item_rate,
            disassembly_rate,
        } => {
            Decimal::from(ctx.fragile_items) * fragile_item_rate
                + Decimal::from(ctx.disassembly_items) * disassembly_rate
        }
        PricingFactor::Location {
            center,
            radius_km,
            surcharge,
        } => {
            let touches = [ctx.pickup, ctx.dropoff]
                .iter()
                .flatten()
                .any(|p| within_radius(center, p, *radius_km));
            if !touches {
                return None;
            }
            *surcharge
        }
        PricingFactor::Staff {
            hourly_rate,
            min_hours,
        } => {
            if ctx.staff_count == 0 {
                return None;
            }
            hourly_rate * Decimal::from(ctx.staff_count) * min_hours
        }
        PricingFactor::LoadingTime {
            base_minutes,
            minutes_per_item,
            hourly_rate,
        } => {
            let minutes = base_minutes + minutes_per_item * Decimal::from(ctx.item_count);
            minutes / SIXTY * hourly_rate
        }
        PricingFactor::Insurance {
            value_percentage,
            min_premium,
            premium_coverage_multiplier,
            high_value_item_threshold,
            high_value_item_rate,
        } => {
            let insurance = ctx.insurance?;
            let declared = insurance.declared_value;
            let mut premium = (declared * value_percentage / Decimal::ONE_HUNDRED).max(*min_premium);
            if insurance.premium_coverage {
                premium *= premium_coverage_multiplier;
            }
            if declared >= *high_value_item_threshold {
                premium += declared * high_value_item_rate / Decimal::ONE_HUNDRED;
            }
            premium
        }
        PricingFactor::Time { .. } | PricingFactor::Weather { .. } | PricingFactor::ServiceLevel { .. } => {
            return None;
        }
    };
    Some(amount)
}

/// Price `ctx` under `config`.
pub fn quote(
    ctx: &PricingContext,
    config: &PricingConfiguration,
    weather: WeatherReading,
    holidays: &HolidayCalendar,
    config_version: u64,
) -> Result<PriceQuote, DispatchError> {
    if ctx.distance_km.is_sign_negative() {
        return Err(DispatchError::invalid("distance must not be negative"));
    }
    if ctx.weight_kg.is_sign_negative() {
        return Err(DispatchError::invalid("weight must not be negative"));
    }

    let mut components = vec![PriceComponent {
        name: "base".into(),
        amount: config.base_price,
    }];
    for entry in config.factors.iter().filter(|f| f.active) {
        if let Some(amount) = factor_amount(&entry.factor, ctx) {
            components.push(PriceComponent {
                name: entry.name.clone(),
                amount,
            });
        }
    }
    let subtotal: Decimal = components.iter().map(|c| c.amount).sum();

    let service_level = config
        .active_factors()
        .find_map(|f| match f {
            PricingFactor::ServiceLevel {
                standard,
                express,
                same_day,
                scheduled,
            } => Some(match ctx.service_level {
                ServiceLevel::Standard => *standard,
                ServiceLevel::Express => *express,
                ServiceLevel::SameDay => *same_day,
                ServiceLevel::Scheduled => *scheduled,
            }),
            _ => None,
        })
        .unwrap_or_else(|| default_service_level_multiplier(ctx.service_level));

    let weather_multiplier = match weather {
        WeatherReading::Known(condition) => config
            .active_factors()
            .find_map(|f| match f {
                PricingFactor::Weather {
                    rain_multiplier,
                    snow_multiplier,
                    extreme_multiplier,
                } => Some(match condition {
                    WeatherCondition::Normal => Decimal::ONE,
                    WeatherCondition::Rain => *rain_multiplier,
                    WeatherCondition::Snow => *snow_multiplier,
                    WeatherCondition::Extreme => *extreme_multiplier,
                }),
                _ => None,
            })
            .unwrap_or_else(|| default_weather_multiplier(condition)),
        WeatherReading::Unknown | WeatherReading::NotApplicable => Decimal::ONE,
    };

    let multipliers = Multipliers {
        service_level,
        time: time_multiplier(config, ctx.date, holidays),
        weather: weather_multiplier,
        priority: priority_multiplier(ctx.priority),
    };

    let adjusted_subtotal = subtotal * multipliers.product();
    let fuel_surcharge = adjusted_subtotal * config.fuel_surcharge_percentage / Decimal::ONE_HUNDRED;
    let carbon_offset = adjusted_subtotal * config.carbon_offset_rate / Decimal::ONE_HUNDRED;
    let total_before_bounds = adjusted_subtotal + fuel_surcharge + carbon_offset;

    let max_price = config.max_price();
    let final_price = round_money(total_before_bounds.max(config.min_price).min(max_price));

    Ok(PriceQuote {
        final_price,
        breakdown: PriceBreakdown {
            subtotal: round_money(subtotal),
            adjusted_subtotal: round_money(adjusted_subtotal),
            fuel_surcharge: round_money(fuel_surcharge),
            carbon_offset: round_money(carbon_offset),
            total_before_bounds: round_money(total_before_bounds),
            min_price: config.min_price,
            max_price,
            is_weekend: is_weekend(ctx.date),
            is_holiday: holidays.contains(ctx.date),
            weather,
        },
        components,
        multipliers,
        config_version,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::entities::{FactorEntry, PropertyType};
    use time::macros::date;
    use uuid::Uuid;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    pub(crate) fn simple_config() -> PricingConfiguration {
        PricingConfiguration {
            id: Uuid::nil(),
            name: "default".into(),
            is_default: true,
            base_price: d("50"),
            min_price: d("40"),
            max_price_multiplier: d("10"),
            fuel_surcharge_percentage: Decimal::ZERO,
            carbon_offset_rate: Decimal::ZERO,
            platform_fee_percentage: d("15"),
            factors: vec![
                FactorEntry {
                    name: "distance".into(),
                    active: true,
                    factor: PricingFactor::Distance {
                        base_rate_per_km: d("3"),
                        additional_distance_threshold: d("50"),
                        additional_distance_multiplier: d("0.8"),
                    },
                },
                FactorEntry {
                    name: "weight".into(),
                    active: true,
                    factor: PricingFactor::Weight {
                        base_rate_per_kg: d("0.5"),
                        heavy_item_threshold: d("100"),
                        heavy_item_surcharge: d("25"),
                    },
                },
                FactorEntry {
                    name: "time".into(),
                    active: true,
                    factor: PricingFactor::Time {
                        weekend_multiplier: d("1.2"),
                        holiday_multiplier: d("1.5"),
                    },
                },
            ],
        }
    }

    fn ctx(distance: &str, weight: &str, date: Date) -> PricingContext {
        PricingContext {
            distance_km: d(distance),
            weight_kg: d(weight),
            volume_m3: Decimal::ZERO,
            item_count: 0,
            fragile_items: 0,
            disassembly_items: 0,
            staff_count: 0,
            property: None,
            insurance: None,
            pickup: None,
            dropoff: None,
            date,
            service_level: ServiceLevel::Standard,
            priority: RequestPriority::Standard,
        }
    }

    // 2026-03-04 is a Wednesday
    const WEDNESDAY: Date = date!(2026 - 03 - 04);

    #[test]
    fn test_base_distance_weight() {
        let q = quote(
            &ctx("5", "40", WEDNESDAY),
            &simple_config(),
            WeatherReading::Known(WeatherCondition::Normal),
            &HolidayCalendar::default(),
            1,
        )
        .unwrap();
        // 50 + 5*3 + 40*0.5
        assert_eq!(q.final_price, d("85.00"));
        assert_eq!(q.components.len(), 3);
        assert_eq!(q.multipliers.product(), Decimal::ONE);
    }

    #[test]
    fn test_distance_beyond_threshold_and_heavy_surcharge() {
        let q = quote(
            &ctx("60", "120", WEDNESDAY),
            &simple_config(),
            WeatherReading::NotApplicable,
            &HolidayCalendar::default(),
            1,
        )
        .unwrap();
        // 50 + (50*3 + 10*3*0.8) + (120*0.5 + 25)
        assert_eq!(q.final_price, d("309.00"));
    }

    #[test]
    fn test_clamped_to_bounds() {
        let mut cfg = simple_config();
        cfg.min_price = d("100");
        let low = quote(
            &ctx("0", "0", WEDNESDAY),
            &cfg,
            WeatherReading::NotApplicable,
            &HolidayCalendar::default(),
            1,
        )
        .unwrap();
        assert_eq!(low.final_price, d("100"));

        cfg.max_price_multiplier = d("2");
        let high = quote(
            &ctx("500", "0", WEDNESDAY),
            &cfg,
            WeatherReading::NotApplicable,
            &HolidayCalendar::default(),
            1,
        )
        .unwrap();
        assert_eq!(high.final_price, d("100"));
        assert!(high.breakdown.total_before_bounds > high.final_price);
    }

    #[test]
    fn test_multipliers_compound() {
        let mut c = ctx("10", "0", date!(2026 - 03 - 07));
        c.service_level = ServiceLevel::Express;
        c.priority = RequestPriority::Urgent;
        let q = quote(
            &c,
            &simple_config(),
            WeatherReading::Known(WeatherCondition::Rain),
            &HolidayCalendar::default(),
            1,
        )
        .unwrap();
        // (50 + 30) * 1.5 * 1.2 (weekend) * 1.2 (rain) * 2.0
        assert_eq!(q.multipliers.time, d("1.2"));
        assert_eq!(q.final_price, d("345.60"));
    }

    #[test]
    fn test_unknown_weather_is_neutral() {
        let q = quote(
            &ctx("5", "40", WEDNESDAY),
            &simple_config(),
            WeatherReading::Unknown,
            &HolidayCalendar::default(),
            1,
        )
        .unwrap();
        assert_eq!(q.multipliers.weather, Decimal::ONE);
        assert_eq!(q.breakdown.weather.label(), "unknown");
    }

    #[test]
    fn test_surcharges_and_percent_knobs() {
        let mut cfg = simple_config();
        cfg.fuel_surcharge_percentage = d("10");
        cfg.carbon_offset_rate = d("2");
        let q = quote(
            &ctx("5", "40", WEDNESDAY),
            &cfg,
            WeatherReading::NotApplicable,
            &HolidayCalendar::default(),
            1,
        )
        .unwrap();
        // 85 + 8.5 + 1.7
        assert_eq!(q.breakdown.fuel_surcharge, d("8.50"));
        assert_eq!(q.final_price, d("95.20"));
    }

    #[test]
    fn test_property_vehicle_insurance() {
        let mut cfg = simple_config();
        cfg.factors = vec![
            FactorEntry {
                name: "apartment".into(),
                active: true,
                factor: PricingFactor::PropertyType {
                    property_type: PropertyType::Apartment,
                    base_rate: d("20"),
                    rate_per_room: d("10"),
                    floor_rate: d("5"),
                    elevator_discount: d("0.5"),
                },
            },
            FactorEntry {
                name: "house".into(),
                active: true,
                factor: PricingFactor::PropertyType {
                    property_type: PropertyType::House,
                    base_rate: d("999"),
                    rate_per_room: d("0"),
                    floor_rate: d("0"),
                    elevator_discount: d("1"),
                },
            },
            FactorEntry {
                name: "van".into(),
                active: true,
                factor: PricingFactor::Vehicle {
                    base_rate: d("40"),
                    capacity_m3: d("10"),
                },
            },
            FactorEntry {
                name: "insurance".into(),
                active: true,
                factor: PricingFactor::Insurance {
                    value_percentage: d("2"),
                    min_premium: d("15"),
                    premium_coverage_multiplier: d("1.5"),
                    high_value_item_threshold: d("5000"),
                    high_value_item_rate: d("1"),
                },
            },
        ];
        let mut c = ctx("0", "0", WEDNESDAY);
        c.property = Some(PropertyDetails {
            property_type: PropertyType::Apartment,
            rooms: 3,
            floor: 4,
            has_elevator: true,
        });
        c.volume_m3 = d("8.5");
        c.insurance = Some(InsuranceRequest {
            declared_value: d("6000"),
            premium_coverage: true,
        });
        let q = quote(&c, &cfg, WeatherReading::NotApplicable, &HolidayCalendar::default(), 1)
            .unwrap();
        let amount = |name: &str| {
            q.components
                .iter()
                .find(|c| c.name.as_str() == name)
                .map(|c| c.amount)
        };
        // 20 + 3*10 + 4*5*0.5
        assert_eq!(amount("apartment"), Some(d("60")));
        assert_eq!(amount("house"), None);
        // 85% utilisation
        assert_eq!(amount("van"), Some(d("48")));
        // max(120, 15) * 1.5 + 6000 * 1%
        assert_eq!(amount("insurance"), Some(d("240")));
    }

    #[test]
    fn test_negative_inputs_rejected() {
        let err = quote(
            &ctx("-1", "0", WEDNESDAY),
            &simple_config(),
            WeatherReading::NotApplicable,
            &HolidayCalendar::default(),
            1,
        )
        .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidInput(_)));
    }

    #[test]
    fn test_deterministic() {
        let c = ctx("7.3", "12.25", WEDNESDAY);
        let cfg = simple_config();
        let hol = HolidayCalendar::default();
        let a = quote(&c, &cfg, WeatherReading::Known(WeatherCondition::Snow), &hol, 3).unwrap();
        let b = quote(&c, &cfg, WeatherReading::Known(WeatherCondition::Snow), &hol, 3).unwrap();
        assert_eq!(a, b);
    }
}
