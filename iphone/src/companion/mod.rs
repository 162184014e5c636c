//! The companion app: an HTTP service on the phone exposing personal data
//! (health, location, contacts, calendar, notifications, shortcuts).

pub mod client;
pub mod discovery;
pub mod retry;
pub mod types;

pub use client::{CompanionClient, Reply, RequestFailure};
pub use discovery::{CompanionDiscovery, CompanionService, MdnsBrowser, ServiceBrowser, Sightings};
