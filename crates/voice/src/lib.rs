//! meshtalk-voice – Empfangs- und Transportpfad fuer Sprache
//!
//! Alles zwischen Socket und Lautsprecher: Multicast-Transport, adaptiver
//! Jitter Buffer und der Wiedergabe-Takt mit Concealment. Dazu die
//! Aufbereitung der Aufnahme vor dem Kodieren.
//!
//! ## Module
//! - [`dsp`] – Sprachaktivitaetserkennung und Noise Gate
//! - [`udp`] – Multicast-/Unicast-Sockets pro Talkgruppe (DSCP EF)
//! - [`jitter_buffer`] – Adaptiver Jitter Buffer mit Verlustmeldungen
//! - [`plc`] – Wiedergabe-Takt und Packet Loss Concealment

pub mod dsp;
pub mod jitter_buffer;
pub mod plc;
pub mod udp;

pub use dsp::{
    Aufbereitung, AufbereitungConfig, NoiseGate, NoiseGateConfig, Vad, VadConfig,
};
pub use jitter_buffer::{
    geteilt, AdaptiveJitterBuffer, GeteilterJitterBuffer, JitterBufferConfig,
    JitterBufferStatistik, VerlustEreignis,
};
pub use plc::{Wiedergabe, WiedergabeStatistik, STANDARD_MAX_CONCEALMENT};
pub use udp::{GruppenSocket, TalkgruppenTransport, TransportConfig, TransportFehler};
