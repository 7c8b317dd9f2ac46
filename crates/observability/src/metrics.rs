//! Prometheus-kompatible Metriken fuer meshtalk
//!
//! Registrierte Metriken:
//! - `meshtalk_talkgroups_active` – Gauge: Beigetretene Talkgruppen
//! - `meshtalk_floor_grants_total` – Counter (prioritaet): Gewaehrte Floors
//! - `meshtalk_floor_denials_total` – Counter (grund): Abgelehnte Anfragen
//! - `meshtalk_floor_revocations_total` – Counter (grund): Entzogene Floors
//! - `meshtalk_floor_request_failures_total` – Counter: Anfragen ohne Antwort
//! - `meshtalk_rtp_packets_sent_total` – Counter: Gesendete RTP-Pakete
//! - `meshtalk_rtp_packets_received_total` – Counter: Empfangene RTP-Pakete
//! - `meshtalk_jitter_late_total` – Counter: Nach Abspielfrist verworfen
//! - `meshtalk_jitter_lost_total` – Counter: Verlorene Pakete (Luecken)
//! - `meshtalk_jitter_underruns_total` – Counter: Buffer-Unterlaeufe
//! - `meshtalk_jitter_duplicates_total` – Counter: Duplikate
//! - `meshtalk_jitter_depth_ms` – Gauge: Aktuelle Zieltiefe
//! - `meshtalk_jitter_seconds` – Histogram: Geschaetzter Jitter
//! - `meshtalk_transport_errors_total` – Counter: Socket-Fehler

use anyhow::Result;
use axum::{response::IntoResponse, routing::get, Router};
use prometheus::{
    Encoder, Gauge, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};
use std::net::SocketAddr;
use std::sync::Arc;

/// Alle meshtalk-Prometheus-Metriken
#[derive(Clone)]
pub struct MeshtalkMetriken {
    pub registry: Arc<Registry>,

    // Floor
    pub talkgroups_active: IntGauge,
    pub floor_grants_total: IntCounterVec,
    pub floor_denials_total: IntCounterVec,
    pub floor_revocations_total: IntCounterVec,
    pub floor_request_failures_total: IntCounter,

    // Audio
    pub rtp_packets_sent_total: IntCounter,
    pub rtp_packets_received_total: IntCounter,
    pub jitter_late_total: IntCounter,
    pub jitter_lost_total: IntCounter,
    pub jitter_underruns_total: IntCounter,
    pub jitter_duplicates_total: IntCounter,
    pub jitter_depth_ms: Gauge,
    pub jitter_seconds: Histogram,

    // Transport
    pub transport_errors_total: IntCounter,
}

fn zaehler(registry: &Registry, name: &str, hilfe: &str) -> Result<IntCounter> {
    let c = IntCounter::with_opts(Opts::new(name, hilfe))?;
    registry.register(Box::new(c.clone()))?;
    Ok(c)
}

fn zaehler_vec(registry: &Registry, name: &str, hilfe: &str, label: &str) -> Result<IntCounterVec> {
    let c = IntCounterVec::new(Opts::new(name, hilfe), &[label])?;
    registry.register(Box::new(c.clone()))?;
    Ok(c)
}

impl MeshtalkMetriken {
    /// Erstellt und registriert alle Metriken in einer neuen Registry
    pub fn neu() -> Result<Self> {
        let registry = Registry::new();

        let talkgroups_active = IntGauge::with_opts(Opts::new(
            "meshtalk_talkgroups_active",
            "Anzahl beigetretener Talkgruppen",
        ))?;
        registry.register(Box::new(talkgroups_active.clone()))?;

        let floor_grants_total = zaehler_vec(
            &registry,
            "meshtalk_floor_grants_total",
            "Gewaehrte Floors",
            "prioritaet",
        )?;
        let floor_denials_total = zaehler_vec(
            &registry,
            "meshtalk_floor_denials_total",
            "Abgelehnte Floor-Anfragen",
            "grund",
        )?;
        let floor_revocations_total = zaehler_vec(
            &registry,
            "meshtalk_floor_revocations_total",
            "Entzogene Floors",
            "grund",
        )?;
        let floor_request_failures_total = zaehler(
            &registry,
            "meshtalk_floor_request_failures_total",
            "Floor-Anfragen ohne Antwort",
        )?;

        let rtp_packets_sent_total = zaehler(
            &registry,
            "meshtalk_rtp_packets_sent_total",
            "Gesendete RTP-Pakete",
        )?;
        let rtp_packets_received_total = zaehler(
            &registry,
            "meshtalk_rtp_packets_received_total",
            "Empfangene RTP-Pakete",
        )?;
        let jitter_late_total = zaehler(
            &registry,
            "meshtalk_jitter_late_total",
            "Nach ihrer Abspielfrist verworfene Pakete",
        )?;
        let jitter_lost_total = zaehler(
            &registry,
            "meshtalk_jitter_lost_total",
            "Verlorene Pakete (Sequenzluecken)",
        )?;
        let jitter_underruns_total = zaehler(
            &registry,
            "meshtalk_jitter_underruns_total",
            "Jitter-Buffer-Unterlaeufe",
        )?;
        let jitter_duplicates_total = zaehler(
            &registry,
            "meshtalk_jitter_duplicates_total",
            "Verworfene Duplikate",
        )?;

        let jitter_depth_ms = Gauge::with_opts(Opts::new(
            "meshtalk_jitter_depth_ms",
            "Aktuelle Zieltiefe des Jitter Buffers in Millisekunden",
        ))?;
        registry.register(Box::new(jitter_depth_ms.clone()))?;

        let jitter_seconds = Histogram::with_opts(
            HistogramOpts::new("meshtalk_jitter_seconds", "Geschaetzter Jitter in Sekunden")
                .buckets(vec![0.001, 0.002, 0.005, 0.01, 0.02, 0.05, 0.1]),
        )?;
        registry.register(Box::new(jitter_seconds.clone()))?;

        let transport_errors_total = zaehler(
            &registry,
            "meshtalk_transport_errors_total",
            "Socket-Fehler auf Audio- und Steuerkanal",
        )?;

        Ok(Self {
            registry: Arc::new(registry),
            talkgroups_active,
            floor_grants_total,
            floor_denials_total,
            floor_revocations_total,
            floor_request_failures_total,
            rtp_packets_sent_total,
            rtp_packets_received_total,
            jitter_late_total,
            jitter_lost_total,
            jitter_underruns_total,
            jitter_duplicates_total,
            jitter_depth_ms,
            jitter_seconds,
            transport_errors_total,
        })
    }

    /// Exportiert alle Metriken im Prometheus-Textformat
    pub fn exportieren(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Axum-Router fuer den `/metrics`-Endpunkt
pub fn metrics_router(metriken: MeshtalkMetriken) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metriken)
}

/// Startet den Metrik-Server und laeuft bis zum Abbruch des Tasks
pub async fn metrik_server_starten(bind_addr: SocketAddr, metriken: MeshtalkMetriken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(addr = %bind_addr, "Metrik-Server gestartet");
    axum::serve(listener, metrics_router(metriken)).await?;
    Ok(())
}

async fn metrics_handler(
    axum::extract::State(metriken): axum::extract::State<MeshtalkMetriken>,
) -> impl IntoResponse {
    match metriken.exportieren() {
        Ok(text) => (
            axum::http::StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(err) => {
            tracing::error!("Metriken-Export fehlgeschlagen: {err}");
            axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
