//! Push-to-Talk Taste
//!
//! Uebersetzt Tastenereignisse in Sende-Absichten. Zwei Modi: Halten
//! (senden solange gedrueckt) und Umschalten (einmal druecken startet,
//! nochmal druecken stoppt). Es werden nur Flanken gemeldet.

use meshtalk_core::Priority;
use serde::{Deserialize, Serialize};

/// Betriebsmodus der PTT-Taste
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PttModus {
    /// Taste halten um zu senden
    #[default]
    Halten,
    /// Einmal druecken zum Aktivieren, nochmals zum Deaktivieren
    Umschalten,
}

/// Flanke aus Sicht der Session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PttAbsicht {
    Druecken { priority: Priority, is_emergency: bool },
    Loslassen,
}

/// PTT-Controller einer Talkgruppe
#[derive(Debug)]
pub struct PttTaste {
    modus: PttModus,
    priority: Priority,
    /// Taste physisch gedrueckt
    gehalten: bool,
    /// Sende-Absicht aktiv
    aktiv: bool,
    notfall: bool,
    /// Stumm ueberschreibt alles
    stumm: bool,
}

impl PttTaste {
    pub fn neu(modus: PttModus, priority: Priority) -> Self {
        Self {
            modus,
            priority,
            gehalten: false,
            aktiv: false,
            notfall: false,
            stumm: false,
        }
    }

    /// Taste gedrueckt
    pub fn taste_runter(&mut self) -> Option<PttAbsicht> {
        if self.gehalten {
            return None;
        }
        self.gehalten = true;
        match self.modus {
            PttModus::Halten => self.aktivieren(),
            PttModus::Umschalten if self.aktiv => self.deaktivieren(),
            PttModus::Umschalten => self.aktivieren(),
        }
    }

    /// Taste losgelassen
    pub fn taste_hoch(&mut self) -> Option<PttAbsicht> {
        if !self.gehalten {
            return None;
        }
        self.gehalten = false;
        match self.modus {
            PttModus::Halten => self.deaktivieren(),
            PttModus::Umschalten => None,
        }
    }

    /// Notfall-Modus fuer die naechste Anfrage (wirkt ab dem naechsten Druecken)
    pub fn notfall_setzen(&mut self, notfall: bool) {
        self.notfall = notfall;
    }

    /// Stummschalten beendet eine laufende Sendung
    pub fn stumm_setzen(&mut self, stumm: bool) -> Option<PttAbsicht> {
        self.stumm = stumm;
        if stumm {
            self.deaktivieren()
        } else {
            None
        }
    }

    /// Moduswechsel setzt alle Zustaende zurueck
    pub fn modus_setzen(&mut self, modus: PttModus) -> Option<PttAbsicht> {
        self.modus = modus;
        self.gehalten = false;
        self.deaktivieren()
    }

    pub fn ist_aktiv(&self) -> bool {
        self.aktiv
    }

    pub fn modus(&self) -> PttModus {
        self.modus
    }

    fn aktivieren(&mut self) -> Option<PttAbsicht> {
        if self.stumm || self.aktiv {
            return None;
        }
        self.aktiv = true;
        Some(PttAbsicht::Druecken {
            priority: self.priority,
            is_emergency: self.notfall,
        })
    }

    fn deaktivieren(&mut self) -> Option<PttAbsicht> {
        if !self.aktiv {
            return None;
        }
        self.aktiv = false;
        Some(PttAbsicht::Loslassen)
    }
}
