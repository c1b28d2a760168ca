//! MDLA VPN - Proxy Session Core
//!
//! Everything between a decoded server and a running proxy core.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐      ┌───────────────────┐
//! │ SubscriptionRegistry │─────▶│ ServerDescriptor  │
//! │ (store + refresh)    │      └─────────┬─────────┘
//! └──────────────────────┘                │ start()
//!                                         ▼
//!                            ┌─────────────────────────┐    ┌───────────────────┐
//!                            │  ConnectionController   │───▶│ ConfigSynthesizer │
//!                            │  (lifecycle + status)   │    └───────────────────┘
//!                            └──────┬───────────▲──────┘
//!                     launch/terminate│          │ samples
//!                                     ▼          │
//!                            ┌─────────────────────────┐
//!                            │  Backend (core process) │◀── TelemetryPoller
//!                            └─────────────────────────┘
//! ```
//!
//! # Features
//!
//! - **Subscriptions**: base64 or plain link lists, refreshed concurrently
//! - **Core config**: xray-style JSON with SOCKS inbound and geoip routing
//! - **Observers**: synchronous status and traffic notifications

mod backend;
mod config;
mod manager;
mod subscription;
mod synth;
mod telemetry;

pub use backend::{Backend, BackendError, ProcessBackend, parse_net_dev};
pub use config::{AppConfig, ConfigError};
pub use manager::{ConnectionController, ConnectionObserver, ConnectionState, ConnectionStatus};
pub use subscription::{
    DEFAULT_UPDATE_INTERVAL_SECS, RegistryError, StoreDocument, Subscription,
    SubscriptionRegistry, parse_subscription_body,
};
pub use synth::{
    ConfigSynthesizer, CoreConfig, DEFAULT_FINGERPRINT, Inbound, LogConfig, Outbound, Routing,
    RoutingRule, SOCKS_INBOUND_TAG,
};
pub use telemetry::{
    MIN_POLL_INTERVAL, TelemetryPoller, TrafficSnapshot, format_bytes, format_speed,
};
