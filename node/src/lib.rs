//! meshtalk-node – Bibliotheks-Root
//!
//! Verdrahtet Konfiguration, Metriken und die Talkgruppen-Laufzeiten zu
//! einem lauffaehigen Knoten.

pub mod config;

use anyhow::{Context, Result};
use config::KnotenConfig;
use meshtalk_core::{DeviceId, FloorEreignis, SystemUhr};
use meshtalk_floor::StatischeMitgliedschaft;
use meshtalk_observability::{metrik_server_starten, MeshtalkMetriken};
use meshtalk_protocol::codec::{AudioCodec, PcmCodec};
use meshtalk_protocol::crypto::KeineKrypto;
use meshtalk_session::{talkgruppe_starten, Kollaborateure, TalkgruppenHandle};
use meshtalk_voice::TalkgruppenTransport;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Haelt den laufenden Knoten-Zustand zusammen
pub struct Knoten {
    pub config: KnotenConfig,
    lokal: DeviceId,
}

impl Knoten {
    /// Erstellt einen neuen Knoten aus der gegebenen Konfiguration
    pub fn neu(config: KnotenConfig) -> Self {
        let lokal = config.geraete_id();
        Self { config, lokal }
    }

    pub fn lokal(&self) -> DeviceId {
        self.lokal
    }

    /// Externe Bausteine aller Talkgruppen dieses Knotens
    ///
    /// Ohne nativen Opus-Codec wird PCM mit der konfigurierten Frame-Groesse
    /// uebertragen.
    pub fn kollaborateure(&self, metriken: MeshtalkMetriken) -> Kollaborateure {
        let mitgliedschaft = StatischeMitgliedschaft::neu();
        for tg in &self.config.talkgruppen {
            if let Some(liste) = &tg.mitglieder {
                mitgliedschaft.setzen(
                    tg.talkgroup.group_id,
                    liste.iter().copied().map(DeviceId),
                );
            }
        }

        let samples = self.config.audio.samples_pro_frame();
        Kollaborateure {
            codec_fabrik: Arc::new(move || Box::new(PcmCodec::neu(samples)) as Box<dyn AudioCodec>),
            krypto: Arc::new(KeineKrypto),
            mitgliedschaft: Arc::new(mitgliedschaft),
            uhr: Arc::new(SystemUhr::neu()),
            metriken: Some(metriken),
        }
    }

    /// Startet alle Subsysteme und laeuft bis zum Shutdown-Signal
    ///
    /// Reihenfolge:
    /// 1. Konfiguration pruefen
    /// 2. Metriken anlegen, optional `/metrics` bereitstellen
    /// 3. Allen konfigurierten Talkgruppen beitreten
    /// 4. Auf Ctrl-C warten, dann Floors freigeben und Gruppen verlassen
    pub async fn starten(self) -> Result<()> {
        self.config.validieren()?;

        let metriken = MeshtalkMetriken::neu()?;
        if self.config.metriken.aktiviert {
            let bind = self.config.metriken.bind;
            let m = metriken.clone();
            tokio::spawn(async move {
                if let Err(e) = metrik_server_starten(bind, m).await {
                    tracing::error!(addr = %bind, fehler = %e, "Metrik-Server beendet");
                }
            });
        }

        let modus = self.config.arbitrierungs_modus();
        tracing::info!(
            lokal = %self.lokal,
            modus = ?modus,
            talkgruppen = self.config.talkgruppen.len(),
            "Knoten startet"
        );
        if self.config.talkgruppen.is_empty() {
            tracing::warn!("Keine Talkgruppen konfiguriert");
        }

        let koll = self.kollaborateure(metriken);
        let transport_config = self.config.transport_config();
        let mut handles: Vec<TalkgruppenHandle> = Vec::new();

        for tg in &self.config.talkgruppen {
            let t = &tg.talkgroup;
            let transport =
                TalkgruppenTransport::multicast(t.multicast_address, t.port, &transport_config)
                    .with_context(|| format!("Talkgruppe {} nicht beigetreten", t.group_id))?;
            let handle = talkgruppe_starten(
                t.clone(),
                transport,
                self.config.laufzeit_config(self.lokal),
                koll.clone(),
            );
            tokio::spawn(ereignisse_protokollieren(handle.ereignisse_abonnieren()));
            handles.push(handle);
        }

        tracing::info!("Knoten laeuft. Warte auf Shutdown-Signal (Ctrl-C)...");
        tokio::signal::ctrl_c().await?;
        tracing::info!("Shutdown-Signal empfangen, Knoten wird beendet");

        for handle in handles {
            let tg = handle.talkgroup();
            if let Err(e) = handle.verlassen().await {
                tracing::warn!(talkgroup = %tg, fehler = %e, "Talkgruppe nicht sauber verlassen");
            }
        }
        Ok(())
    }
}

/// Floor-Ereignisse ohne Oberflaeche ins Log schreiben
async fn ereignisse_protokollieren(mut rx: broadcast::Receiver<FloorEreignis>) {
    loop {
        match rx.recv().await {
            Ok(e) if e.ist_fehlschlag() => {
                tracing::warn!(talkgroup = %e.talkgroup(), ereignis = ?e, "Floor-Ereignis")
            }
            Ok(e) => tracing::info!(talkgroup = %e.talkgroup(), ereignis = ?e, "Floor-Ereignis"),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::debug!(verpasst = n, "Ereignis-Log hinkt hinterher")
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
