//! Monotone Uhr
//!
//! Alle Timer im Floor-Control-Kern (Anfrage-Timeout, Halte- und
//! Inaktivitaets-Timer, Jitter-Buffer-Faelligkeiten) laufen ueber
//! periodische Ticks gegen einen `Zeitstempel` in Millisekunden.
//! `TestUhr` erlaubt deterministische Tests ohne echtes Warten.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Monotoner Zeitpunkt in Millisekunden
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Zeitstempel(pub u64);

impl Zeitstempel {
    /// Zeitpunkt `ms` Millisekunden spaeter
    pub fn plus_ms(self, ms: u64) -> Self {
        Self(self.0.saturating_add(ms))
    }

    /// Vergangene Millisekunden seit `frueher` (0 falls `frueher` spaeter liegt)
    pub fn ms_seit(self, frueher: Zeitstempel) -> u64 {
        self.0.saturating_sub(frueher.0)
    }

    /// Gibt den Millisekundenwert zurueck
    pub fn als_ms(self) -> u64 {
        self.0
    }
}

/// Zeitquelle
pub trait Uhr: Send + Sync {
    /// Aktueller monotoner Zeitpunkt
    fn jetzt(&self) -> Zeitstempel;
}

// ---------------------------------------------------------------------------
// SystemUhr
// ---------------------------------------------------------------------------

/// Monotone Systemuhr
///
/// Verankert beim Start an der Unix-Zeit und laeuft danach ueber `Instant`
/// weiter. Dadurch sind Anfragezeiten zwischen Knoten grob vergleichbar,
/// springen aber nie zurueck.
#[derive(Debug, Clone)]
pub struct SystemUhr {
    start: Instant,
    anker_ms: u64,
}

impl SystemUhr {
    pub fn neu() -> Self {
        let anker_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            start: Instant::now(),
            anker_ms,
        }
    }
}

impl Default for SystemUhr {
    fn default() -> Self {
        Self::neu()
    }
}

impl Uhr for SystemUhr {
    fn jetzt(&self) -> Zeitstempel {
        Zeitstempel(self.anker_ms + self.start.elapsed().as_millis() as u64)
    }
}

// ---------------------------------------------------------------------------
// TestUhr
// ---------------------------------------------------------------------------

/// Manuell gesteuerte Uhr fuer Tests und Simulationen
#[derive(Debug, Default)]
pub struct TestUhr {
    ms: Mutex<u64>,
}

impl TestUhr {
    pub fn neu(start_ms: u64) -> Self {
        Self {
            ms: Mutex::new(start_ms),
        }
    }

    /// Stellt die Uhr um `ms` Millisekunden vor
    pub fn vorstellen(&self, ms: u64) {
        *self.ms.lock() += ms;
    }

    /// Setzt die Uhr auf einen absoluten Zeitpunkt (nur vorwaerts)
    pub fn setzen(&self, ms: u64) {
        let mut aktuell = self.ms.lock();
        *aktuell = (*aktuell).max(ms);
    }
}

impl Uhr for TestUhr {
    fn jetzt(&self) -> Zeitstempel {
        Zeitstempel(*self.ms.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_uhr_ist_monoton() {
        let uhr = SystemUhr::neu();
        let a = uhr.jetzt();
        let b = uhr.jetzt();
        assert!(b >= a);
        assert!(a.als_ms() > 0);
    }

    #[test]
    fn test_uhr_vorstellen() {
        let uhr = TestUhr::neu(100);
        uhr.vorstellen(20);
        assert_eq!(uhr.jetzt(), Zeitstempel(120));
        uhr.setzen(50); // rueckwaerts wird ignoriert
        assert_eq!(uhr.jetzt(), Zeitstempel(120));
    }

    #[test]
    fn zeitstempel_arithmetik() {
        let t = Zeitstempel(1000);
        assert_eq!(t.plus_ms(500), Zeitstempel(1500));
        assert_eq!(Zeitstempel(1500).ms_seit(t), 500);
        assert_eq!(t.ms_seit(Zeitstempel(2000)), 0);
    }
}
