//! Pricing: factor evaluation, forecasts, and the versioned active
//! configuration.

pub mod engine;
pub mod forecast;
pub mod service;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use time::Date;

use crate::entities::PricingConfiguration;

pub use engine::{
    Multipliers, PriceBreakdown, PriceComponent, PriceQuote, PricingContext, WeatherReading,
    quote, round_money,
};
pub use forecast::{ForecastDay, MAX_FORECAST_DAYS, STAFF_BASE_RATES, StaffOption, forecast};
pub use service::PricingService;

/// Public holidays for the business timezone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HolidayCalendar(BTreeSet<Date>);

impl HolidayCalendar {
    pub fn new(dates: impl IntoIterator<Item = Date>) -> Self {
        Self(dates.into_iter().collect())
    }

    pub fn contains(&self, date: Date) -> bool {
        self.0.contains(&date)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// What readers of the pricing [`ConfigStore`](crate::config::ConfigStore) see.
#[derive(Debug, Clone, Default)]
pub struct PricingState {
    /// The active configuration; `None` until one is published.
    pub configuration: Option<PricingConfiguration>,
    pub holidays: HolidayCalendar,
}
