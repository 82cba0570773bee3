//! # Configuration Module
//!
//! Startup configuration: the application config file ([`AppConfig`]) and the
//! security hardening finalizer ([`HardeningConfig`] → [`FrameworkSettings`]).
//!
//! Configuration is read once during bootstrap and is read-only afterwards.
//! Faults here are [`ConfigError`]s, the only fault class allowed to abort
//! startup instead of being turned into a failsafe response.

mod app;
mod error;
pub mod hardening;

pub use app::{AppConfig, DispatcherSection, LoggingSection};
pub use error::ConfigError;
pub use hardening::{FrameworkSettings, HardeningConfig, HardeningOptions, Profile};
