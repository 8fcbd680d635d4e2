//! The URL fraud-rating engine: host-keyed advisories, a sitecheck client,
//! and the dedup/caching service in front of it.

mod advisory;
mod rated_server;
mod service;

pub use advisory::{AdvisoryId, AdvisoryType, Detector, FraudAdvisory};
pub use rated_server::{FraudRatedServer, FraudUrlRating, FraudVerdict, RatedServerState};
pub use service::{FraudProtectionService, RatingCallback};
