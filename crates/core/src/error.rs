//! Fehlertypen fuer meshtalk
//!
//! Zentraler Fehler-Enum fuer den Floor-Control-Kern. Die Varianten folgen
//! der Fehler-Taxonomie des Systems: Protokoll-, Zeitlimit-, Ressourcen- und
//! Konfliktfehler. Keiner davon ist fatal fuer eine Talkgruppe.

use thiserror::Error;

/// Globaler Result-Alias fuer meshtalk
pub type Result<T> = std::result::Result<T, PttError>;

/// Grobe Einordnung eines Fehlers (bestimmt die Behandlung)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FehlerKategorie {
    /// Fehlerhafte oder veraltete Nachricht – verwerfen und loggen
    Protokoll,
    /// Anfrage-, Halte- oder Inaktivitaets-Timer abgelaufen
    Zeitlimit,
    /// Socket/Transport-Fehler – Talkgruppe gilt als "degradiert"
    Ressource,
    /// Verteilte Knoten sind sich kurzzeitig uneinig ueber den Halter
    Konflikt,
    /// Alles andere (Konfiguration, interne Fehler)
    Sonstige,
}

/// Alle moeglichen Fehler im meshtalk-System
#[derive(Debug, Error)]
pub enum PttError {
    // --- Protokoll ---
    #[error("Protokollfehler: {0}")]
    Protokoll(String),

    #[error("Protokollversion nicht unterstuetzt: erwartet={erwartet}, erhalten={erhalten}")]
    ProtokollVersion { erwartet: u8, erhalten: u8 },

    // --- Timer ---
    #[error("Zeitlimit ueberschritten: {0}")]
    Zeitlimit(String),

    // --- Transport ---
    #[error("Ressourcenfehler: {0}")]
    Ressource(String),

    // --- Verteilter Betrieb ---
    #[error("Floor-Konflikt: {0}")]
    Konflikt(String),

    // --- Konfiguration ---
    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    // --- Intern ---
    #[error("Interner Fehler: {0}")]
    Intern(String),

    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl PttError {
    /// Erstellt einen internen Fehler aus einer beliebigen Nachricht
    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Intern(msg.into())
    }

    /// Erstellt einen Protokollfehler
    pub fn protokoll(msg: impl Into<String>) -> Self {
        Self::Protokoll(msg.into())
    }

    /// Gibt true zurueck wenn der Fehler wiederholbar sein koennte
    pub fn ist_wiederholbar(&self) -> bool {
        matches!(self, Self::Zeitlimit(_) | Self::Ressource(_) | Self::Io(_))
    }

    /// Ordnet den Fehler in die Taxonomie ein
    pub fn kategorie(&self) -> FehlerKategorie {
        match self {
            Self::Protokoll(_) | Self::ProtokollVersion { .. } => FehlerKategorie::Protokoll,
            Self::Zeitlimit(_) => FehlerKategorie::Zeitlimit,
            Self::Ressource(_) | Self::Io(_) => FehlerKategorie::Ressource,
            Self::Konflikt(_) => FehlerKategorie::Konflikt,
            Self::Konfiguration(_) | Self::Intern(_) | Self::Anyhow(_) => {
                FehlerKategorie::Sonstige
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fehler_anzeige() {
        let e = PttError::Zeitlimit("Floor-Anfrage".into());
        assert_eq!(e.to_string(), "Zeitlimit ueberschritten: Floor-Anfrage");
    }

    #[test]
    fn wiederholbar_erkennung() {
        assert!(PttError::Zeitlimit("test".into()).ist_wiederholbar());
        assert!(PttError::Ressource("socket".into()).ist_wiederholbar());
        assert!(!PttError::Protokoll("test".into()).ist_wiederholbar());
    }

    #[test]
    fn io_fehler_ist_ressourcenfehler() {
        let e: PttError = std::io::Error::new(std::io::ErrorKind::Other, "weg").into();
        assert_eq!(e.kategorie(), FehlerKategorie::Ressource);
    }

    #[test]
    fn protokoll_version_fehler() {
        let e = PttError::ProtokollVersion {
            erwartet: 1,
            erhalten: 2,
        };
        assert!(e.to_string().contains("erwartet=1"));
        assert_eq!(e.kategorie(), FehlerKategorie::Protokoll);
    }
}
