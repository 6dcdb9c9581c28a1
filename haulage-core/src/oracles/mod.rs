//! Ports to external collaborators, with the adapters the server wires in.

pub mod geo;
pub mod notify;
pub mod payment;
pub mod weather;

pub use geo::{GeoOracle, HaversineGeo, RouteEstimate};
pub use notify::{LogNotifier, Notifier, WebhookNotifier};
pub use payment::{
    HttpPaymentOracle, PaymentIntent, PaymentOracle, PollUntil, RefundReceipt, VerifiedPayment,
    calculate_retry_delay,
};
pub use weather::{
    CachedWeather, HttpWeatherOracle, StaticWeather, WeatherCondition, WeatherOracle,
    WeatherReport,
};
