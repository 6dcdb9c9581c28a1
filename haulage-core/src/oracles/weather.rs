use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};
use tracing::debug;

use crate::clock::Clock;
use crate::error::OracleError;

/// Default freshness of cached reports.
pub const WEATHER_CACHE_TTL: time::Duration = time::Duration::hours(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeatherCondition {
    Normal,
    Rain,
    Snow,
    Extreme,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeatherReport {
    pub condition: WeatherCondition,
    pub temperature: f64,
    pub humidity: f64,
    pub wind: f64,
}

impl WeatherReport {
    pub fn normal() -> Self {
        Self {
            condition: WeatherCondition::Normal,
            temperature: 20.0,
            humidity: 50.0,
            wind: 5.0,
        }
    }
}

#[async_trait]
pub trait WeatherOracle: Send + Sync {
    async fn weather(&self, city: &str, date: Date) -> Result<WeatherReport, OracleError>;
}

/// Same report for every city and date.
pub struct StaticWeather(pub WeatherReport);

#[async_trait]
impl WeatherOracle for StaticWeather {
    async fn weather(&self, _city: &str, _date: Date) -> Result<WeatherReport, OracleError> {
        Ok(self.0)
    }
}

/// Caches reports per (city, date) for a fixed TTL.
pub struct CachedWeather<W> {
    inner: W,
    clock: Arc<dyn Clock>,
    ttl: time::Duration,
    cache: Mutex<HashMap<(String, Date), (OffsetDateTime, WeatherReport)>>,
}

impl<W: WeatherOracle> CachedWeather<W> {
    pub fn new(inner: W, clock: Arc<dyn Clock>) -> Self {
        Self::with_ttl(inner, clock, WEATHER_CACHE_TTL)
    }

    pub fn with_ttl(inner: W, clock: Arc<dyn Clock>, ttl: time::Duration) -> Self {
        Self {
            inner,
            clock,
            ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl<W: WeatherOracle> WeatherOracle for CachedWeather<W> {
    async fn weather(&self, city: &str, date: Date) -> Result<WeatherReport, OracleError> {
        let now = self.clock.now();
        let key = (city.to_lowercase(), date);
        if let Some((fetched_at, report)) = self.cache.lock().get(&key).copied() {
            if now - fetched_at < self.ttl {
                return Ok(report);
            }
        }
        let report = self.inner.weather(city, date).await?;
        let mut cache = self.cache.lock();
        let ttl = self.ttl;
        cache.retain(|_, (at, _)| now - *at < ttl);
        cache.insert(key, (now, report));
        Ok(report)
    }
}

/// Fetches `GET {base}/weather?city=..&date=YYYY-MM-DD`, expecting a JSON
/// [`WeatherReport`].
pub struct HttpWeatherOracle {
    base_url: url::Url,
    http_client: reqwest::Client,
}

impl HttpWeatherOracle {
    pub fn new(base_url: url::Url) -> Self {
        Self {
            base_url,
            http_client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }
}

#[async_trait]
impl WeatherOracle for HttpWeatherOracle {
    async fn weather(&self, city: &str, date: Date) -> Result<WeatherReport, OracleError> {
        let mut url = self
            .base_url
            .join("weather")
            .map_err(|e| OracleError::Unexpected(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("city", city)
            .append_pair("date", &date.to_string());
        debug!(city, %date, "Fetching weather");
        let response = self.http_client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(OracleError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::atomic::{AtomicU32, Ordering};
    use time::macros::{date, datetime};

    struct Counting {
        calls: AtomicU32,
    }

    #[async_trait]
    impl WeatherOracle for Counting {
        async fn weather(&self, _: &str, _: Date) -> Result<WeatherReport, OracleError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(WeatherReport::normal())
        }
    }

    #[tokio::test]
    async fn test_cache_hits_within_ttl() {
        let clock = Arc::new(ManualClock::new(datetime!(2026-05-01 08:00 UTC)));
        let cached = CachedWeather::new(
            Counting {
                calls: AtomicU32::new(0),
            },
            clock.clone(),
        );
        let day = date!(2026 - 05 - 02);
        cached.weather("Accra", day).await.unwrap();
        cached.weather("accra", day).await.unwrap();
        assert_eq!(cached.inner.calls.load(Ordering::SeqCst), 1);

        clock.advance(time::Duration::minutes(61));
        cached.weather("Accra", day).await.unwrap();
        assert_eq!(cached.inner.calls.load(Ordering::SeqCst), 2);
    }
}
