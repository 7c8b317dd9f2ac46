//! Transmission Session Manager
//!
//! Verbindet die FCP-Client-Zustandsmaschine mit dem Audio-Pfad einer
//! Talkgruppe. Reine Logik: der Aufrufer fuehrt die [`SessionAusgabe`]n aus.
//!
//! ```text
//! Listening --druecken--> Requesting --Granted--> Transmitting
//!     ^                       |                       |
//!     +---Denied/Timeout------+        Release/Revoked (Rest-Frame senden)
//!     +-----------------------------------------------+
//!
//! Transportfehler: jeder Zustand -> Error -> (wiederhergestellt) -> vorheriger
//! ```
//!
//! Waehrend `Transmitting` ist der Empfangspfad stumm: eingehendes Audio
//! wird verworfen, der Jitter Buffer beim Eintritt geleert. Eigene Pakete
//! (gleiche SSRC, z.B. ueber Multicast-Loopback) werden immer verworfen.

use meshtalk_core::{DeviceId, FloorEreignis, Priority, TalkgroupId, Zeitstempel};
use meshtalk_floor::{ClientConfig, ClientEffekt, ClientZustand, FloorClient};
use meshtalk_protocol::floor::FloorMessage;
use meshtalk_protocol::rtp::RtpPacket;
use meshtalk_voice::GeteilterJitterBuffer;

/// Zustand einer Talkgruppen-Session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionZustand {
    Listening,
    Requesting,
    Transmitting,
    /// Transport gestoert, Floor-Logik laeuft mit veralteten Daten weiter
    Error,
}

/// Auszufuehrende Wirkung
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAusgabe {
    /// Floor-Nachricht des lokalen Clients an die Arbitrierung
    Steuerung(FloorMessage),
    /// Sprechdurchgang beginnt
    SendepfadStarten,
    /// Sprechdurchgang endet, angefangenen Frame noch senden
    SendepfadStoppen,
    /// An die Oberflaeche melden
    Ereignis(FloorEreignis),
}

pub struct TransmissionSession {
    talkgroup: TalkgroupId,
    client: FloorClient,
    empfang: GeteilterJitterBuffer,
    eigene_ssrc: u32,
    zustand: SessionZustand,
    degradiert: Option<String>,
}

impl TransmissionSession {
    pub fn neu(
        lokal: DeviceId,
        talkgroup: TalkgroupId,
        config: ClientConfig,
        empfang: GeteilterJitterBuffer,
        eigene_ssrc: u32,
    ) -> Self {
        Self {
            talkgroup,
            client: FloorClient::neu(lokal, talkgroup, config),
            empfang,
            eigene_ssrc,
            zustand: SessionZustand::Listening,
            degradiert: None,
        }
    }

    pub fn zustand(&self) -> SessionZustand {
        if self.degradiert.is_some() {
            SessionZustand::Error
        } else {
            self.zustand
        }
    }

    pub fn talkgroup(&self) -> TalkgroupId {
        self.talkgroup
    }

    pub fn client(&self) -> &FloorClient {
        &self.client
    }

    pub fn ist_am_senden(&self) -> bool {
        self.zustand == SessionZustand::Transmitting
    }

    // -----------------------------------------------------------------------
    // Floor
    // -----------------------------------------------------------------------

    pub fn druecken(&mut self, priority: Priority, is_emergency: bool, now: Zeitstempel) -> Vec<SessionAusgabe> {
        let effekte = self.client.druecken(priority, is_emergency, now);
        self.uebersetzen(effekte)
    }

    pub fn loslassen(&mut self) -> Vec<SessionAusgabe> {
        let effekte = self.client.loslassen();
        self.uebersetzen(effekte)
    }

    /// Talkgruppe verlassen: lokal sofort auf Listening, Release best-effort
    pub fn verlassen(&mut self) -> Vec<SessionAusgabe> {
        let effekte = self.client.verlassen();
        self.uebersetzen(effekte)
    }

    pub fn steuerung_empfangen(&mut self, msg: &FloorMessage, now: Zeitstempel) -> Vec<SessionAusgabe> {
        let effekte = self.client.empfangen(msg, now);
        self.uebersetzen(effekte)
    }

    pub fn tick(&mut self, now: Zeitstempel) -> Vec<SessionAusgabe> {
        let effekte = self.client.tick(now);
        self.uebersetzen(effekte)
    }

    // -----------------------------------------------------------------------
    // Audio
    // -----------------------------------------------------------------------

    /// Empfangenes RTP-Paket in den Jitter Buffer legen
    ///
    /// Liefert `false` wenn das Paket verworfen wurde (eigenes Paket oder
    /// lokaler Sprechdurchgang).
    pub fn audio_empfangen(&mut self, paket: RtpPacket) -> bool {
        if paket.ssrc == self.eigene_ssrc {
            tracing::trace!(talkgroup = %self.talkgroup, "Eigenes Paket (Loopback) verworfen");
            return false;
        }
        if self.zustand == SessionZustand::Transmitting {
            tracing::trace!(talkgroup = %self.talkgroup, "Empfang waehrend Senden stumm");
            return false;
        }
        self.empfang.lock().put(paket);
        true
    }

    // -----------------------------------------------------------------------
    // Transport
    // -----------------------------------------------------------------------

    /// Socket-Fehler: einmalig `Degradiert` melden
    pub fn transport_fehler(&mut self, grund: impl Into<String>) -> Vec<SessionAusgabe> {
        if self.degradiert.is_some() {
            return Vec::new();
        }
        let grund = grund.into();
        tracing::warn!(talkgroup = %self.talkgroup, grund = %grund, "Talkgruppe degradiert");
        self.degradiert = Some(grund.clone());
        vec![SessionAusgabe::Ereignis(FloorEreignis::Degradiert {
            talkgroup: self.talkgroup,
            grund,
        })]
    }

    pub fn transport_wiederhergestellt(&mut self) -> Vec<SessionAusgabe> {
        match self.degradiert.take() {
            Some(_) => {
                tracing::info!(talkgroup = %self.talkgroup, "Transport wiederhergestellt");
                vec![SessionAusgabe::Ereignis(FloorEreignis::Wiederhergestellt {
                    talkgroup: self.talkgroup,
                })]
            }
            None => Vec::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Intern
    // -----------------------------------------------------------------------

    fn uebersetzen(&mut self, effekte: Vec<ClientEffekt>) -> Vec<SessionAusgabe> {
        let ausgaben = effekte
            .into_iter()
            .map(|effekt| match effekt {
                ClientEffekt::Senden(msg) => SessionAusgabe::Steuerung(msg),
                ClientEffekt::SendenStarten => {
                    self.empfang.lock().clear();
                    SessionAusgabe::SendepfadStarten
                }
                ClientEffekt::SendenStoppen => SessionAusgabe::SendepfadStoppen,
                ClientEffekt::Melden(ereignis) => SessionAusgabe::Ereignis(ereignis),
            })
            .collect();

        let neu = match self.client.zustand() {
            ClientZustand::Idle => SessionZustand::Listening,
            ClientZustand::Pending | ClientZustand::Queued { .. } => SessionZustand::Requesting,
            ClientZustand::Granted => SessionZustand::Transmitting,
        };
        if neu != self.zustand {
            tracing::debug!(
                talkgroup = %self.talkgroup,
                von = ?self.zustand,
                nach = ?neu,
                "Session-Zustand gewechselt"
            );
            self.zustand = neu;
        }
        ausgaben
    }
}
