//! meshtalk-session – Sende-Session, PTT-Steuerung und Talkgruppen-Laufzeit
//!
//! ## Module
//! - [`ptt`] – PTT-Taste (Halten/Umschalten, Notfall, Stumm)
//! - [`sendepfad`] – PCM sammeln, kodieren, paketieren
//! - [`session`] – Transmission Session Manager (Floor + Audio-Pfad)
//! - [`sprecher`] – Zuordnung empfangener Streams zu Floor-Haltern
//! - [`knoten`] – Floor-Rolle pro Talkgruppe (Client, Zentral, Verteilt)
//! - [`laufzeit`] – Tokio-Tasks pro beigetretener Talkgruppe

pub mod knoten;
pub mod laufzeit;
pub mod ptt;
pub mod sendepfad;
pub mod session;
pub mod sprecher;

pub use knoten::{ArbitrierungsModus, FloorKnoten, Weiterleitung};
pub use laufzeit::{talkgruppe_starten, CodecFabrik, Kollaborateure, LaufzeitConfig, TalkgruppenHandle};
pub use ptt::{PttAbsicht, PttModus, PttTaste};
pub use sendepfad::{SendeStatistik, Sendepfad};
pub use session::{SessionAusgabe, SessionZustand, TransmissionSession};
pub use sprecher::SprecherZuordnung;
