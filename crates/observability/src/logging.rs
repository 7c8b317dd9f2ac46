//! Structured Logging Setup via tracing-subscriber
//!
//! Konfigurierbar per Umgebungsvariable (ueberschreibt die Konfigurationsdatei):
//! - `MESHTALK_LOG_LEVEL`: Filter-Ausdruck (z.B. `info` oder
//!   `meshtalk_floor=debug,info`), Standard: info
//! - `MESHTALK_LOG_FORMAT`: Format (text/json), Standard: text

use tracing_subscriber::{fmt, EnvFilter};

pub const ENV_LOG_LEVEL: &str = "MESHTALK_LOG_LEVEL";
pub const ENV_LOG_FORMAT: &str = "MESHTALK_LOG_FORMAT";

/// Initialisiert das Logging-System.
///
/// `level` und `format` stammen aus der Konfiguration und greifen nur,
/// wenn die Umgebungsvariablen nicht gesetzt sind. Ein zweiter Aufruf
/// (z.B. in Tests) ist wirkungslos.
pub fn logging_initialisieren(level: &str, format: &str) {
    let (level, format) = wirksame_einstellungen(level, format);
    let filter = EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new("info"));

    let ergebnis = match format.as_str() {
        "json" => fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_current_span(true)
            .try_init(),
        _ => fmt().with_env_filter(filter).with_target(true).try_init(),
    };
    if ergebnis.is_err() {
        tracing::debug!("Logging war bereits initialisiert");
    }
}

/// Level und Format nach Vorrang: Umgebung vor Konfigurationsdatei
pub fn wirksame_einstellungen(level: &str, format: &str) -> (String, String) {
    let aus_env = |name: &str, fallback: &str| {
        std::env::var(name)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| fallback.to_string())
    };
    (aus_env(ENV_LOG_LEVEL, level), aus_env(ENV_LOG_FORMAT, format))
}

/// Validiert einen Log-Filter-Ausdruck (Level oder `ziel=level`-Liste)
pub fn log_filter_gueltig(filter: &str) -> bool {
    !filter.trim().is_empty() && EnvFilter::try_new(filter).is_ok()
}

pub fn log_format_gueltig(format: &str) -> bool {
    matches!(format, "text" | "json")
}
