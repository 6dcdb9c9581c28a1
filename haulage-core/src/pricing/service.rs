use std::sync::Arc;

use rust_decimal::Decimal;
use time::Date;
use tracing::{info, warn};

use crate::clock::OpContext;
use crate::config::{ConfigStore, ConfigWatcher, Versioned};
use crate::entities::{PricingConfiguration, Request};
use crate::error::DispatchError;
use crate::oracles::WeatherOracle;
use crate::pricing::engine::{PriceQuote, PricingContext, WeatherReading, quote};
use crate::pricing::forecast::{ForecastDay, forecast};
use crate::pricing::{HolidayCalendar, PricingState};

/// Read side of the active pricing configuration plus the weather lookup.
#[derive(Clone)]
pub struct PricingService {
    state: ConfigStore<PricingState>,
    weather: Arc<dyn WeatherOracle>,
}

impl PricingService {
    pub fn new(weather: Arc<dyn WeatherOracle>) -> Self {
        Self {
            state: ConfigStore::new(PricingState::default()),
            weather,
        }
    }

    pub fn with_state(state: PricingState, weather: Arc<dyn WeatherOracle>) -> Self {
        let service = Self::new(weather);
        service.state.update(state);
        service
    }

    pub fn snapshot(&self) -> Versioned<PricingState> {
        self.state.snapshot()
    }

    pub fn subscribe(&self) -> ConfigWatcher {
        self.state.subscribe()
    }

    /// Publish `configuration` as the active one. Returns the new version.
    pub fn publish(&self, configuration: PricingConfiguration) -> Result<u64, DispatchError> {
        configuration.validate().map_err(DispatchError::InvalidInput)?;
        let holidays = self.state.snapshot().value.holidays.clone();
        let name = configuration.name.clone();
        let version = self.state.update(PricingState {
            configuration: Some(configuration),
            holidays,
        });
        info!(version, name = %name, "Published pricing configuration");
        Ok(version)
    }

    pub fn set_holidays(&self, holidays: HolidayCalendar) -> u64 {
        let configuration = self.state.snapshot().value.configuration.clone();
        self.state.update(PricingState {
            configuration,
            holidays,
        })
    }

    fn active(&self) -> Result<(Versioned<PricingState>, PricingConfiguration), DispatchError> {
        let snapshot = self.state.snapshot();
        let configuration = snapshot
            .value
            .configuration
            .clone()
            .ok_or(DispatchError::ConfigurationMissing)?;
        Ok((snapshot, configuration))
    }

    pub fn platform_fee_percentage(&self) -> Result<Decimal, DispatchError> {
        Ok(self.active()?.1.platform_fee_percentage)
    }

    async fn weather_for(&self, city: Option<&str>, date: Date) -> WeatherReading {
        let Some(city) = city else {
            return WeatherReading::NotApplicable;
        };
        match self.weather.weather(city, date).await {
            Ok(report) => WeatherReading::Known(report.condition),
            Err(e) => {
                warn!(city, %date, error = %e, "Weather lookup failed, pricing without weather");
                WeatherReading::Unknown
            }
        }
    }

    /// Price `request` over `distance_km` under the active configuration.
    pub async fn quote_request(
        &self,
        ctx: &OpContext,
        request: &Request,
        distance_km: Decimal,
    ) -> Result<PriceQuote, DispatchError> {
        let (snapshot, configuration) = self.active()?;
        let weather = self
            .weather_for(request.city.as_deref(), request.pickup_date)
            .await;
        ctx.cancel.check()?;
        quote(
            &PricingContext::from_request(request, distance_km),
            &configuration,
            weather,
            &snapshot.value.holidays,
            snapshot.version,
        )
    }

    pub fn forecast(
        &self,
        ctx: &OpContext,
        base: &PricingContext,
        start: Date,
        end: Date,
    ) -> Result<Vec<ForecastDay>, DispatchError> {
        let (snapshot, configuration) = self.active()?;
        forecast(
            base,
            &configuration,
            &snapshot.value.holidays,
            snapshot.version,
            start,
            end,
            &ctx.cancel,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::entities::{PricingFactor, RequestPriority, ServiceLevel};
    use crate::oracles::{StaticWeather, WeatherReport};
    use crate::pricing::engine::tests::simple_config;
    use time::macros::{date, datetime};

    fn ctx() -> OpContext {
        OpContext::system(Arc::new(ManualClock::new(datetime!(2026-05-01 08:00 UTC))))
    }

    fn base() -> PricingContext {
        PricingContext {
            distance_km: Decimal::new(5, 0),
            weight_kg: Decimal::new(40, 0),
            volume_m3: Decimal::ZERO,
            item_count: 0,
            fragile_items: 0,
            disassembly_items: 0,
            staff_count: 0,
            property: None,
            insurance: None,
            pickup: None,
            dropoff: None,
            date: date!(2026 - 05 - 01),
            service_level: ServiceLevel::Standard,
            priority: RequestPriority::Standard,
        }
    }

    #[test]
    fn test_missing_configuration() {
        let service = PricingService::new(Arc::new(StaticWeather(WeatherReport::normal())));
        let err = service
            .forecast(&ctx(), &base(), date!(2026 - 05 - 01), date!(2026 - 05 - 01))
            .unwrap_err();
        assert!(matches!(err, DispatchError::ConfigurationMissing));
    }

    #[test]
    fn test_publish_bumps_version_and_keeps_holidays() {
        let service = PricingService::new(Arc::new(StaticWeather(WeatherReport::normal())));
        let v1 = service.set_holidays(HolidayCalendar::new([date!(2026 - 05 - 03)]));
        let v2 = service.publish(simple_config()).unwrap();
        assert!(v2 > v1);
        let snapshot = service.snapshot();
        assert!(snapshot.value.holidays.contains(date!(2026 - 05 - 03)));
        assert!(snapshot.value.configuration.is_some());
    }

    #[test]
    fn test_invalid_configuration_rejected() {
        let service = PricingService::new(Arc::new(StaticWeather(WeatherReport::normal())));
        let mut config = simple_config();
        config.min_price = Decimal::new(-1, 0);
        assert!(service.publish(config).is_err());
        assert_eq!(service.snapshot().version, 0);
    }

    #[test]
    fn test_holiday_weekend_forecast() {
        // 2026-05-02 Saturday, 2026-05-03 Sunday (holiday), 2026-05-04 Monday
        let service = PricingService::new(Arc::new(StaticWeather(WeatherReport::normal())));
        let mut config = simple_config();
        config.factors.retain(|f| matches!(f.factor, PricingFactor::Time { .. }));
        service.publish(config).unwrap();
        service.set_holidays(HolidayCalendar::new([date!(2026 - 05 - 03)]));

        let days = service
            .forecast(&ctx(), &base(), date!(2026 - 05 - 02), date!(2026 - 05 - 04))
            .unwrap();
        let multipliers: Vec<_> = days.iter().map(|d| d.time_multiplier).collect();
        assert_eq!(
            multipliers,
            vec![Decimal::new(12, 1), Decimal::new(15, 1), Decimal::ONE]
        );
        assert!(days[1].is_holiday && days[1].is_weekend);
        // weekend and holiday crews cost half as much again
        assert_eq!(days[0].options[0].staff_cost, Decimal::new(90, 0));
        assert_eq!(days[2].options[0].staff_cost, Decimal::new(60, 0));
    }
}
