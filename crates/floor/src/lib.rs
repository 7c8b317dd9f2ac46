//! meshtalk-floor – Floor-Arbitrierung
//!
//! - [`queue`]: Prioritaets-Warteschlange
//! - [`arbitrator`]: deterministischer Arbitrator pro Talkgruppe
//! - [`distributed`]: Replik fuer den Betrieb ohne zentrale Instanz
//! - [`client`]: FCP-Client-Zustandsmaschine
//! - [`membership`]: Mitgliedschaftspruefung

pub mod arbitrator;
pub mod client;
pub mod distributed;
pub mod membership;
pub mod queue;

pub use arbitrator::{ArbitrationResult, ArbitratorConfig, Ausgabe, FloorArbitrator, FloorStatus, Ziel};
pub use client::{ClientConfig, ClientEffekt, ClientZustand, FloorClient};
pub use distributed::{VerteilteArbitrierung, VerteilteAusgaben, STANDARD_GOSSIP_INTERVALL_MS};
pub use membership::{Mitgliedschaft, OffeneMitgliedschaft, StatischeMitgliedschaft};
pub use queue::{Einfuegen, FloorQueue};
