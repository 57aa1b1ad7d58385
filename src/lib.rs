pub mod agreement;
pub mod compare;
pub mod config;
pub mod entity;
pub mod error;
pub mod intervention;
pub mod partner;
pub mod service;
pub mod snapshot;
pub mod store;
pub mod types;
pub mod user;
pub mod validation;

pub use config::EngineConfig;
pub use error::EngineError;
pub use service::{PartnershipService, Saved};
