//! # meshtalk-observability
//!
//! Observability-Crate fuer meshtalk:
//! - Structured Logging (Text oder JSON) via tracing-subscriber
//! - Prometheus-kompatible Metriken mit optionalem `/metrics`-Endpunkt

pub mod logging;
pub mod metrics;

pub use logging::logging_initialisieren;
pub use metrics::{metrics_router, metrik_server_starten, MeshtalkMetriken};
