//! meshtalk Knoten – Einstiegspunkt
//!
//! Laedt die Konfiguration, initialisiert das Logging und startet den Knoten.

use anyhow::Result;
use meshtalk_node::{config::KnotenConfig, Knoten};
use meshtalk_observability::logging_initialisieren;

#[tokio::main]
async fn main() -> Result<()> {
    // Konfigurationsdatei-Pfad aus Umgebungsvariable oder Standard
    let config_pfad = std::env::var("MESHTALK_CONFIG").unwrap_or_else(|_| "meshtalk.toml".into());

    // Konfiguration laden (Standardwerte falls Datei fehlt)
    let config = KnotenConfig::laden(&config_pfad)?;

    logging_initialisieren(&config.logging.level, &config.logging.format);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_pfad,
        "meshtalk Knoten wird initialisiert"
    );

    Knoten::neu(config).starten().await
}
