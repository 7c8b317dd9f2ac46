//! Floor-Rolle eines Knotens pro Talkgruppe
//!
//! - `Client`: reiner Teilnehmer, ein entfernter Arbitrator entscheidet
//! - `Zentral`: dieser Knoten ist der Arbitrator der Talkgruppe
//! - `Verteilt`: jeder Knoten fuehrt eine Replik (ohne zentrale Instanz)
//!
//! Alle Varianten liefern eine [`Weiterleitung`]: Nachrichten fuer den
//! lokalen Client und Nachrichten fuer das Netz.

use meshtalk_core::{DeviceId, Talkgroup, Zeitstempel};
use meshtalk_floor::{
    ArbitratorConfig, Ausgabe, FloorArbitrator, FloorStatus, Mitgliedschaft,
    VerteilteArbitrierung, Ziel,
};
use meshtalk_protocol::floor::{FloorMessage, FloorNachrichtArt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Konfigurierte Arbitrierungsart
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArbitrierungsModus {
    #[default]
    Client,
    Zentral,
    Verteilt,
}

/// Ziel der von einer Operation erzeugten Nachrichten
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Weiterleitung {
    pub an_lokal: Vec<FloorMessage>,
    pub an_netz: Vec<FloorMessage>,
}

impl Weiterleitung {
    pub fn ist_leer(&self) -> bool {
        self.an_lokal.is_empty() && self.an_netz.is_empty()
    }
}

pub enum FloorKnoten {
    Client,
    Zentral {
        lokal: DeviceId,
        arbitrator: FloorArbitrator,
    },
    Verteilt(VerteilteArbitrierung),
}

impl FloorKnoten {
    pub fn neu(
        modus: ArbitrierungsModus,
        lokal: DeviceId,
        talkgroup: Talkgroup,
        config: ArbitratorConfig,
        mitgliedschaft: Arc<dyn Mitgliedschaft>,
        gossip_intervall_ms: u64,
    ) -> Self {
        match modus {
            ArbitrierungsModus::Client => Self::Client,
            ArbitrierungsModus::Zentral => Self::Zentral {
                lokal,
                arbitrator: FloorArbitrator::neu(talkgroup, lokal, config, mitgliedschaft),
            },
            ArbitrierungsModus::Verteilt => Self::Verteilt(VerteilteArbitrierung::neu(
                lokal,
                talkgroup,
                config,
                mitgliedschaft,
                gossip_intervall_ms,
            )),
        }
    }

    pub fn modus(&self) -> ArbitrierungsModus {
        match self {
            Self::Client => ArbitrierungsModus::Client,
            Self::Zentral { .. } => ArbitrierungsModus::Zentral,
            Self::Verteilt(_) => ArbitrierungsModus::Verteilt,
        }
    }

    /// Nachricht des lokalen Clients
    pub fn lokal_senden(&mut self, msg: FloorMessage, now: Zeitstempel) -> Weiterleitung {
        match self {
            Self::Client => Weiterleitung {
                an_lokal: Vec::new(),
                an_netz: vec![msg],
            },
            Self::Zentral { lokal, arbitrator } => {
                anwenden(arbitrator, &msg, now);
                verteilen(*lokal, arbitrator.ausgaben_nehmen())
            }
            Self::Verteilt(replik) => {
                let aus = replik.lokal_senden(msg, now);
                Weiterleitung {
                    an_lokal: aus.an_lokal,
                    an_netz: aus.senden,
                }
            }
        }
    }

    /// Nachricht aus dem Netz
    pub fn empfangen(&mut self, msg: &FloorMessage, now: Zeitstempel) -> Weiterleitung {
        match self {
            Self::Client => Weiterleitung {
                an_lokal: vec![*msg],
                an_netz: Vec::new(),
            },
            Self::Zentral { lokal, arbitrator } => {
                if !matches!(
                    msg.art,
                    FloorNachrichtArt::Request { .. } | FloorNachrichtArt::Release
                ) {
                    tracing::trace!(
                        talkgroup = %msg.talkgroup_id,
                        absender = %msg.requester_id,
                        "Nachricht an Arbitrator ohne Wirkung"
                    );
                    return Weiterleitung::default();
                }
                anwenden(arbitrator, msg, now);
                verteilen(*lokal, arbitrator.ausgaben_nehmen())
            }
            Self::Verteilt(replik) => Weiterleitung {
                an_lokal: replik.empfangen(msg, now),
                an_netz: Vec::new(),
            },
        }
    }

    pub fn tick(&mut self, now: Zeitstempel) -> Weiterleitung {
        match self {
            Self::Client => Weiterleitung::default(),
            Self::Zentral { lokal, arbitrator } => {
                arbitrator.tick(now);
                verteilen(*lokal, arbitrator.ausgaben_nehmen())
            }
            Self::Verteilt(replik) => {
                let aus = replik.tick(now);
                Weiterleitung {
                    an_lokal: aus.an_lokal,
                    an_netz: aus.senden,
                }
            }
        }
    }

    /// Audio-Aktivitaet eines Halters (eigenes Senden oder zugeordneter Stream)
    ///
    /// `false` wenn `geraet` den Floor nicht haelt oder ein entfernter
    /// Arbitrator entscheidet.
    pub fn melde_aktivitaet(&mut self, geraet: DeviceId, now: Zeitstempel) -> bool {
        match self {
            Self::Client => false,
            Self::Zentral { arbitrator, .. } => arbitrator.melde_aktivitaet(geraet, now),
            Self::Verteilt(replik) => replik.melde_aktivitaet(geraet, now),
        }
    }

    /// Aktuelle Halter in Gewaehrungsreihenfolge (leer im Client-Modus)
    pub fn halter(&self) -> Vec<DeviceId> {
        match self {
            Self::Client => Vec::new(),
            Self::Zentral { arbitrator, .. } => arbitrator.halter_ids(),
            Self::Verteilt(replik) => replik.arbitrator().halter_ids(),
        }
    }

    /// Floor-Zustand; `None` wenn ein entfernter Arbitrator entscheidet
    pub fn status(&self) -> Option<FloorStatus> {
        match self {
            Self::Client => None,
            Self::Zentral { arbitrator, .. } => Some(arbitrator.status()),
            Self::Verteilt(replik) => Some(replik.status()),
        }
    }
}

fn anwenden(arbitrator: &mut FloorArbitrator, msg: &FloorMessage, now: Zeitstempel) {
    match msg.art {
        FloorNachrichtArt::Request { .. } => {
            if let Some(req) = msg.als_anfrage() {
                arbitrator.handle_request(req, now);
            }
        }
        FloorNachrichtArt::Release => {
            arbitrator.handle_release(msg.requester_id, msg.transaction_id, now)
        }
        _ => {}
    }
}

/// Broadcasts gehen an beide Seiten, gerichtete Antworten nur an ihr Ziel
fn verteilen(lokal: DeviceId, ausgaben: Vec<Ausgabe>) -> Weiterleitung {
    let mut w = Weiterleitung::default();
    for ausgabe in ausgaben {
        match ausgabe.ziel {
            Ziel::Alle => {
                w.an_lokal.push(ausgabe.nachricht);
                w.an_netz.push(ausgabe.nachricht);
            }
            Ziel::Geraet(id) if id == lokal => w.an_lokal.push(ausgabe.nachricht),
            Ziel::Geraet(_) => w.an_netz.push(ausgabe.nachricht),
        }
    }
    w
}
