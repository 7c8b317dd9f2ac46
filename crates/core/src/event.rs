//! Benutzer-sichtbare Floor-Ereignisse
//!
//! Der Kern meldet nach aussen nur wenige Dinge: Floor gewaehrt, abgelehnt
//! (mit Grund), Anfrage fehlgeschlagen (Timeout), Floor entzogen (mit Grund),
//! Warteschlangen-Position und "Talkgruppe degradiert". Alles andere
//! (Decode-Fehler, Buffer-Unterlauf) wird still per Concealment verdeckt.
//!
//! Die Zustellung erfolgt im Session-Crate ueber einen tokio-broadcast-Kanal.

use crate::types::{DeviceId, FloorGrund, TalkgroupId};
use serde::{Deserialize, Serialize};

/// Alle Ereignisse die an die Oberflaeche gemeldet werden
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FloorEreignis {
    /// Lokaler Floor gewaehrt – Uebertragung laeuft
    Gewaehrt { talkgroup: TalkgroupId },
    /// Floor-Anfrage abgelehnt
    Abgelehnt {
        talkgroup: TalkgroupId,
        grund: FloorGrund,
    },
    /// Keine Antwort auf die Floor-Anfrage (auch nach Wiederholung)
    AnfrageFehlgeschlagen { talkgroup: TalkgroupId },
    /// In der Warteschlange eingereiht oder Position aktualisiert
    Warteschlange {
        talkgroup: TalkgroupId,
        position: u16,
        geschaetzte_wartezeit_ms: u32,
    },
    /// Lokaler Floor entzogen (harte Abschaltung)
    Entzogen {
        talkgroup: TalkgroupId,
        grund: FloorGrund,
    },
    /// Lokaler Floor freigegeben (Taste losgelassen oder Halte-Timer)
    Freigegeben { talkgroup: TalkgroupId },
    /// Ein anderer Teilnehmer spricht
    SprecherAktiv {
        talkgroup: TalkgroupId,
        sprecher: DeviceId,
    },
    /// Niemand spricht
    Ruhe { talkgroup: TalkgroupId },
    /// Transport gestoert – Kern arbeitet mit veralteten Daten weiter
    Degradiert {
        talkgroup: TalkgroupId,
        grund: String,
    },
    /// Transport wieder verfuegbar
    Wiederhergestellt { talkgroup: TalkgroupId },
}

impl FloorEreignis {
    /// Talkgruppe auf die sich das Ereignis bezieht
    pub fn talkgroup(&self) -> TalkgroupId {
        match self {
            Self::Gewaehrt { talkgroup }
            | Self::Abgelehnt { talkgroup, .. }
            | Self::AnfrageFehlgeschlagen { talkgroup }
            | Self::Warteschlange { talkgroup, .. }
            | Self::Entzogen { talkgroup, .. }
            | Self::Freigegeben { talkgroup }
            | Self::SprecherAktiv { talkgroup, .. }
            | Self::Ruhe { talkgroup }
            | Self::Degradiert { talkgroup, .. }
            | Self::Wiederhergestellt { talkgroup } => *talkgroup,
        }
    }

    /// Handelt es sich um einen fuer den Benutzer relevanten Fehlschlag?
    pub fn ist_fehlschlag(&self) -> bool {
        matches!(
            self,
            Self::Abgelehnt { .. }
                | Self::AnfrageFehlgeschlagen { .. }
                | Self::Entzogen { .. }
                | Self::Degradiert { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_ist_serde_kompatibel() {
        let event = FloorEreignis::Entzogen {
            talkgroup: TalkgroupId(4),
            grund: FloorGrund::Preempted,
        };
        let json = serde_json::to_string(&event).unwrap();
        let zurueck: FloorEreignis = serde_json::from_str(&json).unwrap();
        assert_eq!(event, zurueck);
    }

    #[test]
    fn fehlschlag_klassifikation() {
        let tg = TalkgroupId(1);
        assert!(FloorEreignis::AnfrageFehlgeschlagen { talkgroup: tg }.ist_fehlschlag());
        assert!(!FloorEreignis::Gewaehrt { talkgroup: tg }.ist_fehlschlag());
        assert_eq!(FloorEreignis::Ruhe { talkgroup: tg }.talkgroup(), tg);
    }
}
