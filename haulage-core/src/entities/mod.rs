pub mod job;
pub mod offer;
pub mod payment;
pub mod pricing_config;
pub mod provider;
pub mod rating;
pub mod request;

pub use job::{Job, JobStatus, TimelineEvent, TimelineEventType};
pub use offer::{Offer, OfferResponse};
pub use payment::{OracleStatus, Payment, PaymentStatus, PaymentType};
pub use pricing_config::{FactorEntry, PricingConfiguration, PricingFactor};
pub use provider::{
    AvailabilityWindow, DayOfWeek, Provider, ProviderMetrics, VerificationStatus,
};
pub use rating::{Rating, RatingTarget};
pub use request::{
    InsuranceRequest, Item, PropertyDetails, PropertyType, Request, RequestPaymentStatus,
    RequestPriority, RequestStatus, RequestType, ServiceLevel, Stop, StopType,
};
