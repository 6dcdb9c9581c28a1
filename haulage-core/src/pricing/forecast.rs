//! Day-by-day price forecast with staffing options.

use haulage_sdk::objects::{ForecastDayObject, StaffOptionObject};
use rust_decimal::Decimal;
use smallvec::SmallVec;
use time::Date;

use crate::clock::Cancellation;
use crate::entities::PricingConfiguration;
use crate::error::DispatchError;
use crate::pricing::engine::{PricingContext, WeatherReading, is_weekend, quote, round_money, time_multiplier};
use crate::pricing::HolidayCalendar;

pub const MAX_FORECAST_DAYS: i64 = 365;

/// Hourly crew rate for 1..=4 staff.
pub const STAFF_BASE_RATES: [Decimal; 4] = [
    Decimal::from_parts(30, 0, 0, false, 0),
    Decimal::from_parts(55, 0, 0, false, 0),
    Decimal::from_parts(80, 0, 0, false, 0),
    Decimal::from_parts(100, 0, 0, false, 0),
];

pub const MIN_HOURS: Decimal = Decimal::from_parts(2, 0, 0, false, 0);

const OFF_DAY_STAFF_MULTIPLIER: Decimal = Decimal::from_parts(15, 0, 0, false, 1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaffOption {
    pub staff_count: u8,
    pub staff_cost: Decimal,
    pub total_price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForecastDay {
    pub date: Date,
    pub is_weekend: bool,
    pub is_holiday: bool,
    pub time_multiplier: Decimal,
    /// Job price for the day without crew.
    pub base_price: Decimal,
    pub options: SmallVec<[StaffOption; 4]>,
    pub best_price: Decimal,
    pub best_staff_count: u8,
}

impl From<&ForecastDay> for ForecastDayObject {
    fn from(day: &ForecastDay) -> Self {
        ForecastDayObject {
            date: day.date,
            is_weekend: day.is_weekend,
            is_holiday: day.is_holiday,
            time_multiplier: day.time_multiplier,
            base_price: day.base_price,
            options: day
                .options
                .iter()
                .map(|o| StaffOptionObject {
                    staff_count: o.staff_count,
                    staff_cost: o.staff_cost,
                    total_price: o.total_price,
                })
                .collect(),
            best_price: day.best_price,
            best_staff_count: day.best_staff_count,
        }
    }
}

/// Lowest price per staff member; ties go to the cheaper total.
fn pick_best(options: &[StaffOption]) -> Option<&StaffOption> {
    options.iter().min_by(|a, b| {
        let per_a = a.total_price / Decimal::from(a.staff_count);
        let per_b = b.total_price / Decimal::from(b.staff_count);
        per_a
            .cmp(&per_b)
            .then_with(|| a.total_price.cmp(&b.total_price))
    })
}

/// Forecast every day in `[start, end]`.
///
/// Each day is priced with `base` moved to that date, without crew (the staff
/// options add crew cost on top) and without weather.
pub fn forecast(
    base: &PricingContext,
    config: &PricingConfiguration,
    holidays: &HolidayCalendar,
    config_version: u64,
    start: Date,
    end: Date,
    cancel: &Cancellation,
) -> Result<Vec<ForecastDay>, DispatchError> {
    if end < start {
        return Err(DispatchError::invalid("forecast end precedes start"));
    }
    let days = (end - start).whole_days() + 1;
    if days > MAX_FORECAST_DAYS {
        return Err(DispatchError::invalid(format!(
            "forecast covers {days} days, at most {MAX_FORECAST_DAYS} allowed"
        )));
    }

    let mut ctx = base.clone();
    ctx.staff_count = 0;

    let mut out = Vec::with_capacity(days as usize);
    let mut date = start;
    loop {
        cancel.check()?;
        ctx.date = date;
        let priced = quote(&ctx, config, WeatherReading::NotApplicable, holidays, config_version)?;
        let holiday = holidays.contains(date);
        let weekend = is_weekend(date);
        let staff_multiplier = if holiday || weekend {
            OFF_DAY_STAFF_MULTIPLIER
        } else {
            Decimal::ONE
        };

        let options: SmallVec<[StaffOption; 4]> = STAFF_BASE_RATES
            .iter()
            .zip(1u8..)
            .map(|(rate, staff_count)| {
                let staff_cost = round_money(rate * MIN_HOURS * staff_multiplier);
                StaffOption {
                    staff_count,
                    staff_cost,
                    total_price: priced.final_price + staff_cost,
                }
            })
            .collect();
        let (best_price, best_staff_count) = pick_best(&options)
            .map(|o| (o.total_price, o.staff_count))
            .unwrap_or((priced.final_price, 0));

        out.push(ForecastDay {
            date,
            is_weekend: weekend,
            is_holiday: holiday,
            time_multiplier: time_multiplier(config, date, holidays),
            base_price: priced.final_price,
            options,
            best_price,
            best_staff_count,
        });

        if date >= end {
            break;
        }
        date = date
            .next_day()
            .ok_or_else(|| DispatchError::invalid("forecast runs past the calendar"))?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{RequestPriority, ServiceLevel};
    use crate::pricing::engine::tests::simple_config;
    use time::macros::date;

    fn base_ctx() -> PricingContext {
        PricingContext {
            distance_km: Decimal::new(5, 0),
            weight_kg: Decimal::new(40, 0),
            volume_m3: Decimal::ZERO,
            item_count: 0,
            fragile_items: 0,
            disassembly_items: 0,
            staff_count: 2,
            property: None,
            insurance: None,
            pickup: None,
            dropoff: None,
            date: date!(2026 - 03 - 04),
            service_level: ServiceLevel::Standard,
            priority: RequestPriority::Standard,
        }
    }

    #[test]
    fn test_weekday_options() {
        let days = forecast(
            &base_ctx(),
            &simple_config(),
            &HolidayCalendar::default(),
            1,
            date!(2026 - 03 - 04),
            date!(2026 - 03 - 04),
            &Cancellation::never(),
        )
        .unwrap();
        assert_eq!(days.len(), 1);
        let day = &days[0];
        assert_eq!(day.base_price, Decimal::new(85, 0));
        let costs: Vec<_> = day.options.iter().map(|o| o.staff_cost).collect();
        assert_eq!(
            costs,
            [60, 110, 160, 200].map(Decimal::from).to_vec()
        );
        // per staff: 145, 97.5, 81.67, 71.25
        assert_eq!(day.best_staff_count, 4);
        assert_eq!(day.best_price, Decimal::new(285, 0));
    }

    #[test]
    fn test_best_minimises_price_per_staff() {
        let days = forecast(
            &base_ctx(),
            &simple_config(),
            &HolidayCalendar::new([date!(2026 - 03 - 09)]),
            1,
            date!(2026 - 03 - 01),
            date!(2026 - 03 - 31),
            &Cancellation::never(),
        )
        .unwrap();
        assert_eq!(days.len(), 31);
        for day in &days {
            let best = day.best_price / Decimal::from(day.best_staff_count);
            for option in &day.options {
                assert!(best <= option.total_price / Decimal::from(option.staff_count));
            }
        }
    }

    #[test]
    fn test_range_limits() {
        let never = Cancellation::never();
        let cfg = simple_config();
        let hol = HolidayCalendar::default();
        assert!(forecast(&base_ctx(), &cfg, &hol, 1, date!(2026 - 03 - 02), date!(2026 - 03 - 01), &never).is_err());
        assert!(forecast(&base_ctx(), &cfg, &hol, 1, date!(2026 - 01 - 01), date!(2026 - 12 - 31), &never).is_ok());
        assert!(forecast(&base_ctx(), &cfg, &hol, 1, date!(2026 - 01 - 01), date!(2027 - 01 - 01), &never).is_err());
    }

    #[test]
    fn test_cancelled_forecast_returns_promptly() {
        let (handle, cancel) = Cancellation::new();
        handle.cancel();
        let err = forecast(
            &base_ctx(),
            &simple_config(),
            &HolidayCalendar::default(),
            1,
            date!(2026 - 03 - 01),
            date!(2026 - 03 - 31),
            &cancel,
        )
        .unwrap_err();
        assert!(matches!(err, DispatchError::Cancelled));
    }
}
