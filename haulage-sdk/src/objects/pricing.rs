//! Price quote and forecast payloads.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One named additive contribution to a price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceComponentObject {
    pub name: String,
    pub amount: Decimal,
}

/// A computed price with its breakdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceQuoteObject {
    pub final_price: Decimal,
    pub currency: String,
    pub components: Vec<PriceComponentObject>,
    pub service_level_multiplier: Decimal,
    pub time_multiplier: Decimal,
    pub weather_multiplier: Decimal,
    pub priority_multiplier: Decimal,
    pub fuel_surcharge: Decimal,
    pub carbon_offset: Decimal,
    /// `normal`, `rain`, `snow`, `extreme`, `unknown` or `not_applicable`.
    pub weather: String,
    pub config_version: u64,
}

/// Price of a day's job for one staff count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaffOptionObject {
    pub staff_count: u8,
    pub staff_cost: Decimal,
    pub total_price: Decimal,
}

/// One day of a price forecast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForecastDayObject {
    pub date: time::Date,
    pub is_weekend: bool,
    pub is_holiday: bool,
    pub time_multiplier: Decimal,
    pub base_price: Decimal,
    pub options: Vec<StaffOptionObject>,
    pub best_price: Decimal,
    pub best_staff_count: u8,
}
