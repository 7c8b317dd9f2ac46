//! Knoten-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass der Knoten ohne Konfigurationsdatei
//! lauffaehig ist (dann allerdings ohne Talkgruppen).

use anyhow::{bail, Result};
use meshtalk_core::{DeviceId, Priority, Talkgroup};
use meshtalk_floor::{ArbitratorConfig, ClientConfig};
use meshtalk_observability::logging::{log_filter_gueltig, log_format_gueltig};
use meshtalk_protocol::codec::OpusConfig;
use meshtalk_session::{ArbitrierungsModus, LaufzeitConfig};
use meshtalk_voice::{AufbereitungConfig, JitterBufferConfig, TransportConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr};

/// Vollstaendige Knoten-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KnotenConfig {
    pub knoten: KnotenEinstellungen,
    pub floor: FloorEinstellungen,
    pub jitter: JitterEinstellungen,
    /// Codec-Parameter (Opus-Grenzen, Frame-Dauer)
    pub audio: OpusConfig,
    /// VAD und Noise Gate auf dem Sendepfad
    pub aufbereitung: AufbereitungConfig,
    pub transport: TransportEinstellungen,
    pub talkgruppen: Vec<TalkgruppenEinstellungen>,
    pub logging: LoggingEinstellungen,
    pub metriken: MetrikEinstellungen,
}

/// Arbitrierungsart der Talkgruppen
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arbitrierung {
    /// Eine Instanz entscheidet fuer alle
    #[default]
    Zentral,
    /// Jeder Knoten fuehrt eine Replik
    Verteilt,
}

/// Identitaet und Rolle des Knotens
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KnotenEinstellungen {
    /// Geraetekennung; ohne Angabe zufaellig pro Start
    pub geraete_id: Option<u32>,
    pub arbitrierung: Arbitrierung,
    /// Nur bei `zentral`: dieser Knoten ist der Arbitrator
    pub arbitrator: bool,
}

/// Floor-Timer und Arbitrator-Parameter
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FloorEinstellungen {
    pub request_timeout_ms: u64,
    pub max_wiederholungen: u32,
    /// Maximale Haltedauer (Arbitrator entzieht, Client gibt vorher selbst frei)
    pub max_hold_ms: u64,
    /// So viel frueher laeuft der Halte-Timer des Clients ab
    pub hold_marge_ms: u64,
    pub inactivity_timeout_ms: u64,
    pub max_queue_size: usize,
    /// Mindestprioritaet fuer Verdraengung bei aktivem Priority-Boost
    pub preemption_min_priority: Priority,
    pub default_hold_estimate_ms: u64,
    pub gossip_intervall_ms: u64,
    pub tick_ms: u64,
}

impl Default for FloorEinstellungen {
    fn default() -> Self {
        let client = ClientConfig::default();
        let arbitrator = ArbitratorConfig::default();
        Self {
            request_timeout_ms: client.request_timeout_ms,
            max_wiederholungen: client.max_wiederholungen,
            max_hold_ms: arbitrator.max_floor_hold_ms,
            hold_marge_ms: client.hold_marge_ms,
            inactivity_timeout_ms: arbitrator.inactivity_timeout_ms,
            max_queue_size: arbitrator.max_queue_size,
            preemption_min_priority: arbitrator.preemption_min_priority,
            default_hold_estimate_ms: arbitrator.default_hold_estimate_ms,
            gossip_intervall_ms: meshtalk_floor::STANDARD_GOSSIP_INTERVALL_MS,
            tick_ms: 50,
        }
    }
}

/// Jitter Buffer und Concealment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JitterEinstellungen {
    pub frame_time_ms: u64,
    pub min_depth_ms: u64,
    pub max_depth_ms: u64,
    /// Hoechstens so viele Concealment-Frames am Stueck
    pub max_concealment: u32,
}

impl Default for JitterEinstellungen {
    fn default() -> Self {
        let jb = JitterBufferConfig::default();
        Self {
            frame_time_ms: jb.frame_time_ms,
            min_depth_ms: jb.min_depth_ms,
            max_depth_ms: jb.max_depth_ms,
            max_concealment: meshtalk_voice::STANDARD_MAX_CONCEALMENT,
        }
    }
}

/// Socket-Optionen fuer Multicast
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportEinstellungen {
    pub schnittstelle: Ipv4Addr,
    pub dscp: u8,
    pub ttl: u32,
    pub loopback: bool,
}

impl Default for TransportEinstellungen {
    fn default() -> Self {
        let t = TransportConfig::default();
        Self {
            schnittstelle: t.schnittstelle,
            dscp: t.dscp,
            ttl: t.ttl,
            loopback: t.loopback,
        }
    }
}

/// Eine Talkgruppe mit optionaler Mitgliederliste
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TalkgruppenEinstellungen {
    #[serde(flatten)]
    pub talkgroup: Talkgroup,
    /// Ohne Liste darf jedes Geraet anfragen
    #[serde(default)]
    pub mitglieder: Option<Vec<u32>>,
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Filter-Ausdruck, z.B. "info" oder "meshtalk_floor=debug,info"
    pub level: String,
    /// "text" oder "json"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

/// Prometheus-Endpunkt
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetrikEinstellungen {
    pub aktiviert: bool,
    pub bind: SocketAddr,
}

impl Default for MetrikEinstellungen {
    fn default() -> Self {
        Self {
            aktiviert: false,
            bind: SocketAddr::from(([127, 0, 0, 1], 9300)),
        }
    }
}

impl KnotenConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let config: Self = toml::from_str(&inhalt)
                    .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }

    /// Prueft die Werte auf Widersprueche
    pub fn validieren(&self) -> Result<()> {
        let j = &self.jitter;
        if j.frame_time_ms == 0 {
            bail!("jitter.frame_time_ms darf nicht 0 sein");
        }
        if j.min_depth_ms > j.max_depth_ms {
            bail!(
                "jitter.min_depth_ms ({}) groesser als max_depth_ms ({})",
                j.min_depth_ms,
                j.max_depth_ms
            );
        }
        if let Err(e) = self.audio.validieren() {
            bail!("audio: {e}");
        }
        if let Err(e) = self.aufbereitung.validieren() {
            bail!("aufbereitung: {e}");
        }
        if j.frame_time_ms != self.audio.frame_ms as u64 {
            bail!(
                "jitter.frame_time_ms ({}) passt nicht zu audio.frame_ms ({})",
                j.frame_time_ms,
                self.audio.frame_ms
            );
        }
        if self.floor.tick_ms == 0 {
            bail!("floor.tick_ms darf nicht 0 sein");
        }
        if self.transport.dscp > 63 {
            bail!("transport.dscp muss zwischen 0 und 63 liegen");
        }

        let mut ids = HashSet::new();
        for tg in &self.talkgruppen {
            let t = &tg.talkgroup;
            if !ids.insert(t.group_id) {
                bail!("Talkgruppe {} mehrfach konfiguriert", t.group_id);
            }
            if t.max_simultaneous_talkers == 0 {
                bail!("Talkgruppe {}: max_simultaneous_talkers muss > 0 sein", t.group_id);
            }
            if !t.multicast_address.is_multicast() {
                bail!(
                    "Talkgruppe {}: {} ist keine Multicast-Adresse",
                    t.group_id,
                    t.multicast_address
                );
            }
            if t.port == u16::MAX {
                bail!("Talkgruppe {}: Port {} laesst keinen Steuerport frei", t.group_id, t.port);
            }
        }

        if !log_filter_gueltig(&self.logging.level) {
            bail!("Ungueltiger Log-Filter: '{}'", self.logging.level);
        }
        if !log_format_gueltig(&self.logging.format) {
            bail!("Ungueltiges Log-Format: '{}'", self.logging.format);
        }
        Ok(())
    }

    /// Konfigurierte oder zufaellige Geraetekennung
    pub fn geraete_id(&self) -> DeviceId {
        self.knoten.geraete_id.map(DeviceId).unwrap_or_else(DeviceId::zufaellig)
    }

    pub fn arbitrierungs_modus(&self) -> ArbitrierungsModus {
        match (self.knoten.arbitrierung, self.knoten.arbitrator) {
            (Arbitrierung::Verteilt, _) => ArbitrierungsModus::Verteilt,
            (Arbitrierung::Zentral, true) => ArbitrierungsModus::Zentral,
            (Arbitrierung::Zentral, false) => ArbitrierungsModus::Client,
        }
    }

    pub fn laufzeit_config(&self, lokal: DeviceId) -> LaufzeitConfig {
        let f = &self.floor;
        LaufzeitConfig {
            lokal,
            modus: self.arbitrierungs_modus(),
            client: ClientConfig {
                request_timeout_ms: f.request_timeout_ms,
                max_wiederholungen: f.max_wiederholungen,
                max_hold_ms: f.max_hold_ms,
                hold_marge_ms: f.hold_marge_ms,
            },
            arbitrator: ArbitratorConfig {
                max_floor_hold_ms: f.max_hold_ms,
                inactivity_timeout_ms: f.inactivity_timeout_ms,
                max_queue_size: f.max_queue_size,
                preemption_min_priority: f.preemption_min_priority,
                default_hold_estimate_ms: f.default_hold_estimate_ms,
            },
            jitter: JitterBufferConfig {
                frame_time_ms: self.jitter.frame_time_ms,
                min_depth_ms: self.jitter.min_depth_ms,
                max_depth_ms: self.jitter.max_depth_ms,
            },
            gossip_intervall_ms: f.gossip_intervall_ms,
            tick_ms: f.tick_ms,
            max_concealment: self.jitter.max_concealment,
            aufbereitung: self.aufbereitung.clone(),
        }
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            schnittstelle: self.transport.schnittstelle,
            dscp: self.transport.dscp,
            ttl: self.transport.ttl,
            loopback: self.transport.loopback,
            ..TransportConfig::default()
        }
    }
}
