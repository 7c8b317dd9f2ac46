//! meshtalk-core – Gemeinsame Typen, Uhr und Fehlertypen
//!
//! Dieses Crate stellt die fundamentalen Bausteine bereit, die von allen
//! anderen meshtalk-Crates gemeinsam genutzt werden: Geraete- und
//! Talkgruppen-Kennungen, die Prioritaetsordnung, die monotone Uhr und
//! die fuer den Benutzer sichtbaren Floor-Ereignisse.

pub mod clock;
pub mod error;
pub mod event;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use clock::{SystemUhr, TestUhr, Uhr, Zeitstempel};
pub use error::{FehlerKategorie, PttError, Result};
pub use event::FloorEreignis;
pub use types::{DeviceId, FloorGrund, FloorRequest, Priority, Talkgroup, TalkgroupId};
