//! FCP-Client-Zustandsmaschine
//!
//! Eine Instanz pro lokalem Anfrager und Talkgruppe. Reine Logik ohne I/O:
//! jede Eingabe (Taste, empfangene Nachricht, Tick) liefert eine Liste von
//! [`ClientEffekt`]en, die der Aufrufer ausfuehrt.
//!
//! ```text
//! Idle --druecken--> Pending --Granted--> Granted --loslassen/Revoked--> Idle
//!                       |  \--QueuePosition--> Queued --Granted--> Granted
//!                       \--Denied/Timeout--> Idle
//! ```
//!
//! Nachrichten mit fremder oder veralteter Transaktions-ID werden ignoriert.

use meshtalk_core::{DeviceId, FloorEreignis, FloorGrund, FloorRequest, Priority, TalkgroupId, Zeitstempel};
use meshtalk_protocol::floor::{FloorMessage, FloorNachrichtArt};

/// Zeitgeber des Clients
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Wartezeit auf eine Antwort bevor wiederholt wird
    pub request_timeout_ms: u64,
    /// Anzahl Wiederholungen nach dem ersten Versuch
    pub max_wiederholungen: u32,
    /// Lokaler Halte-Timer; der Client gibt selbst frei bevor der Arbitrator entzieht
    pub max_hold_ms: u64,
    /// Abzug vom Halte-Timer; der Arbitrator startet seinen Timer schon beim
    /// Gewaehren, der Client erst beim Empfang von Granted
    pub hold_marge_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 2_000,
            max_wiederholungen: 1,
            max_hold_ms: 60_000,
            hold_marge_ms: 500,
        }
    }
}

/// Von aussen sichtbarer Zustand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientZustand {
    Idle,
    Pending,
    Granted,
    Queued {
        position: u16,
        geschaetzte_wartezeit_ms: u32,
    },
}

/// Auszufuehrende Wirkung
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEffekt {
    /// Nachricht an den Arbitrator senden
    Senden(FloorMessage),
    /// Sendepfad (Aufnahme, Encode, Paketierung) starten
    SendenStarten,
    /// Sendepfad sofort stoppen
    SendenStoppen,
    /// Ereignis an die Oberflaeche melden
    Melden(FloorEreignis),
}

#[derive(Debug, Clone, Copy)]
enum Zustand {
    Idle,
    Pending {
        versuche: u32,
        frist: Zeitstempel,
    },
    Granted {
        frist: Zeitstempel,
    },
    Queued {
        position: u16,
        wartezeit_ms: u32,
    },
}

/// Client-Zustandsmaschine
pub struct FloorClient {
    lokal: DeviceId,
    talkgroup: TalkgroupId,
    config: ClientConfig,
    zustand: Zustand,
    naechste_txn: u32,
    /// Aktuelle Anfrage (Transaktion des letzten Versuchs)
    anfrage: Option<FloorRequest>,
    /// Transaktion des vorherigen Versuchs (spaete Antworten bleiben gueltig)
    vorige_txn: Option<u32>,
    /// Nach `Revoked{Preempted}`: Arbitrator hat uns wieder eingereiht
    verdraengt: Option<FloorRequest>,
}

impl FloorClient {
    pub fn neu(lokal: DeviceId, talkgroup: TalkgroupId, config: ClientConfig) -> Self {
        Self {
            lokal,
            talkgroup,
            config,
            zustand: Zustand::Idle,
            naechste_txn: 1,
            anfrage: None,
            vorige_txn: None,
            verdraengt: None,
        }
    }

    pub fn zustand(&self) -> ClientZustand {
        match self.zustand {
            Zustand::Idle => ClientZustand::Idle,
            Zustand::Pending { .. } => ClientZustand::Pending,
            Zustand::Granted { .. } => ClientZustand::Granted,
            Zustand::Queued {
                position,
                wartezeit_ms,
            } => ClientZustand::Queued {
                position,
                geschaetzte_wartezeit_ms: wartezeit_ms,
            },
        }
    }

    pub fn lokal(&self) -> DeviceId {
        self.lokal
    }

    /// Aktuell ausstehende Transaktion
    pub fn aktuelle_txn(&self) -> Option<u32> {
        self.anfrage.map(|a| a.transaction_id)
    }

    // -----------------------------------------------------------------------
    // Lokale Absichten
    // -----------------------------------------------------------------------

    /// PTT gedrueckt: Floor anfordern
    pub fn druecken(&mut self, prioritaet: Priority, notfall: bool, now: Zeitstempel) -> Vec<ClientEffekt> {
        if !matches!(self.zustand, Zustand::Idle) {
            tracing::debug!(talkgroup = %self.talkgroup, "Druecken ignoriert, Anfrage laeuft bereits");
            return Vec::new();
        }

        // Eine offene Wiedereinreihung nach Verdraengung wird durch die neue Anfrage ersetzt
        self.verdraengt = None;

        let anfrage = FloorRequest {
            requester_id: self.lokal,
            talkgroup_id: self.talkgroup,
            priority: prioritaet,
            is_emergency: notfall,
            request_time: now,
            transaction_id: self.txn_vergeben(),
        };
        self.anfrage = Some(anfrage);
        self.vorige_txn = None;
        self.zustand = Zustand::Pending {
            versuche: 0,
            frist: now.plus_ms(self.config.request_timeout_ms),
        };
        tracing::debug!(
            talkgroup = %self.talkgroup,
            txn = anfrage.transaction_id,
            prioritaet = ?anfrage.effektive_prioritaet(),
            "Floor angefordert"
        );
        vec![ClientEffekt::Senden(FloorMessage::request(&anfrage))]
    }

    /// PTT losgelassen: Floor freigeben bzw. Anfrage zurueckziehen
    pub fn loslassen(&mut self) -> Vec<ClientEffekt> {
        let mut effekte = Vec::new();
        match self.zustand {
            Zustand::Granted { .. } => {
                effekte.push(ClientEffekt::SendenStoppen);
                self.release_senden(&mut effekte);
                effekte.push(ClientEffekt::Melden(FloorEreignis::Freigegeben {
                    talkgroup: self.talkgroup,
                }));
            }
            Zustand::Pending { .. } | Zustand::Queued { .. } => {
                self.release_senden(&mut effekte);
            }
            Zustand::Idle => {
                if let Some(alt) = self.verdraengt.take() {
                    effekte.push(ClientEffekt::Senden(FloorMessage::fuer_anfrage(
                        &alt,
                        FloorNachrichtArt::Release,
                    )));
                }
            }
        }
        self.zuruecksetzen();
        effekte
    }

    /// Talkgruppe verlassen: alle Timer verwerfen, Floor best-effort freigeben
    pub fn verlassen(&mut self) -> Vec<ClientEffekt> {
        let effekte = self.loslassen();
        tracing::debug!(talkgroup = %self.talkgroup, "Client verlaesst Talkgruppe");
        effekte
    }

    // -----------------------------------------------------------------------
    // Empfang
    // -----------------------------------------------------------------------

    /// Verarbeitet eine empfangene Floor-Nachricht
    pub fn empfangen(&mut self, msg: &FloorMessage, now: Zeitstempel) -> Vec<ClientEffekt> {
        let mut effekte = Vec::new();
        if msg.talkgroup_id != self.talkgroup {
            return effekte;
        }

        match msg.art {
            FloorNachrichtArt::Taken { new_holder, .. } => {
                if new_holder != self.lokal {
                    effekte.push(ClientEffekt::Melden(FloorEreignis::SprecherAktiv {
                        talkgroup: self.talkgroup,
                        sprecher: new_holder,
                    }));
                }
                return effekte;
            }
            FloorNachrichtArt::Idle => {
                effekte.push(ClientEffekt::Melden(FloorEreignis::Ruhe {
                    talkgroup: self.talkgroup,
                }));
                return effekte;
            }
            FloorNachrichtArt::Request { .. } | FloorNachrichtArt::Release => return effekte,
            _ => {}
        }

        // Ab hier nur Antworten an uns
        if msg.requester_id != self.lokal {
            return effekte;
        }
        if !self.txn_gueltig(msg.transaction_id) {
            tracing::debug!(
                talkgroup = %self.talkgroup,
                txn = msg.transaction_id,
                "Antwort fuer veraltete Transaktion ignoriert"
            );
            return effekte;
        }

        match msg.art {
            FloorNachrichtArt::Granted { max_hold_ms } => {
                self.granted_empfangen(msg, max_hold_ms, now, &mut effekte)
            }
            FloorNachrichtArt::Denied { reason } => match self.zustand {
                Zustand::Pending { .. } | Zustand::Queued { .. } => {
                    tracing::info!(talkgroup = %self.talkgroup, grund = reason.als_str(), "Floor abgelehnt");
                    self.zuruecksetzen();
                    effekte.push(ClientEffekt::Melden(FloorEreignis::Abgelehnt {
                        talkgroup: self.talkgroup,
                        grund: reason,
                    }));
                }
                _ => {
                    tracing::debug!(talkgroup = %self.talkgroup, "Denied ausserhalb einer Anfrage ignoriert");
                }
            },
            FloorNachrichtArt::QueuePosition {
                position,
                estimated_wait_ms,
            } => match self.zustand {
                Zustand::Pending { .. } | Zustand::Queued { .. } | Zustand::Idle => {
                    if matches!(self.zustand, Zustand::Idle) {
                        // Wiedereinreihung nach Verdraengung
                        self.anfrage = self.verdraengt.take();
                    }
                    self.zustand = Zustand::Queued {
                        position,
                        wartezeit_ms: estimated_wait_ms,
                    };
                    effekte.push(ClientEffekt::Melden(FloorEreignis::Warteschlange {
                        talkgroup: self.talkgroup,
                        position,
                        geschaetzte_wartezeit_ms: estimated_wait_ms,
                    }));
                }
                Zustand::Granted { .. } => {
                    tracing::debug!(talkgroup = %self.talkgroup, "QueuePosition waehrend Granted ignoriert");
                }
            },
            FloorNachrichtArt::Revoked { reason } => {
                let war_sprecher = matches!(self.zustand, Zustand::Granted { .. });
                if war_sprecher {
                    effekte.push(ClientEffekt::SendenStoppen);
                }
                tracing::info!(talkgroup = %self.talkgroup, grund = reason.als_str(), "Floor entzogen");
                let anfrage = self.anfrage;
                self.zuruecksetzen();
                self.verdraengt = if reason == FloorGrund::Preempted {
                    anfrage
                } else {
                    None
                };
                effekte.push(ClientEffekt::Melden(FloorEreignis::Entzogen {
                    talkgroup: self.talkgroup,
                    grund: reason,
                }));
            }
            _ => {}
        }
        effekte
    }

    fn granted_empfangen(
        &mut self,
        msg: &FloorMessage,
        max_hold_ms: u32,
        now: Zeitstempel,
        effekte: &mut Vec<ClientEffekt>,
    ) {
        let halte_ms = self.halte_frist_ms(max_hold_ms);
        match self.zustand {
            Zustand::Granted { .. } => {
                if self.aktuelle_txn() == Some(msg.transaction_id) {
                    tracing::trace!(talkgroup = %self.talkgroup, "Doppeltes Granted");
                } else {
                    tracing::warn!(
                        talkgroup = %self.talkgroup,
                        txn = msg.transaction_id,
                        "Granted fuer andere Transaktion waehrend Granted ignoriert"
                    );
                }
                return;
            }
            Zustand::Idle => {
                // Nur nach Verdraengung (Wiedereinreihung) zulaessig
                self.anfrage = self.verdraengt.take();
            }
            Zustand::Pending { .. } | Zustand::Queued { .. } => {}
        }
        // Spaetes Granted fuer den vorigen Versuch: Release traegt weiter die neueste Transaktion
        self.zustand = Zustand::Granted {
            frist: now.plus_ms(halte_ms),
        };
        tracing::info!(talkgroup = %self.talkgroup, txn = msg.transaction_id, "Floor erhalten");
        effekte.push(ClientEffekt::SendenStarten);
        effekte.push(ClientEffekt::Melden(FloorEreignis::Gewaehrt {
            talkgroup: self.talkgroup,
        }));
    }

    // -----------------------------------------------------------------------
    // Timer
    // -----------------------------------------------------------------------

    /// Periodische Auswertung von Anfrage-Timeout und Halte-Timer
    pub fn tick(&mut self, now: Zeitstempel) -> Vec<ClientEffekt> {
        let mut effekte = Vec::new();
        match self.zustand {
            Zustand::Pending { versuche, frist } if now >= frist => {
                if versuche < self.config.max_wiederholungen {
                    let neue_txn = self.txn_vergeben();
                    if let Some(anfrage) = self.anfrage.as_mut() {
                        self.vorige_txn = Some(anfrage.transaction_id);
                        anfrage.transaction_id = neue_txn;
                        tracing::debug!(
                            talkgroup = %self.talkgroup,
                            txn = neue_txn,
                            versuch = versuche + 1,
                            "Floor-Anfrage wiederholt"
                        );
                        effekte.push(ClientEffekt::Senden(FloorMessage::request(anfrage)));
                    }
                    self.zustand = Zustand::Pending {
                        versuche: versuche + 1,
                        frist: now.plus_ms(self.config.request_timeout_ms),
                    };
                } else {
                    tracing::warn!(talkgroup = %self.talkgroup, "Floor-Anfrage ohne Antwort");
                    self.zuruecksetzen();
                    effekte.push(ClientEffekt::Melden(FloorEreignis::AnfrageFehlgeschlagen {
                        talkgroup: self.talkgroup,
                    }));
                }
            }
            Zustand::Granted { frist } if now >= frist => {
                tracing::info!(talkgroup = %self.talkgroup, "Halte-Timer abgelaufen, gebe Floor frei");
                effekte.push(ClientEffekt::SendenStoppen);
                self.release_senden(&mut effekte);
                effekte.push(ClientEffekt::Melden(FloorEreignis::Freigegeben {
                    talkgroup: self.talkgroup,
                }));
                self.zuruecksetzen();
            }
            _ => {}
        }
        effekte
    }

    // -----------------------------------------------------------------------
    // Hilfen
    // -----------------------------------------------------------------------

    /// Lokale Haltedauer: gewaehrte Dauer (hoechstens die eigene Grenze)
    /// abzueglich Marge. Die Marge nimmt hoechstens die Haelfte weg.
    fn halte_frist_ms(&self, gewaehrt_ms: u32) -> u64 {
        let halte_ms = (gewaehrt_ms as u64).min(self.config.max_hold_ms);
        halte_ms - self.config.hold_marge_ms.min(halte_ms / 2)
    }

    fn txn_vergeben(&mut self) -> u32 {
        let txn = self.naechste_txn;
        self.naechste_txn = self.naechste_txn.wrapping_add(1).max(1);
        txn
    }

    fn txn_gueltig(&self, txn: u32) -> bool {
        self.aktuelle_txn() == Some(txn)
            || self.vorige_txn == Some(txn)
            || self.verdraengt.map(|a| a.transaction_id) == Some(txn)
    }

    fn release_senden(&self, effekte: &mut Vec<ClientEffekt>) {
        if let Some(anfrage) = &self.anfrage {
            effekte.push(ClientEffekt::Senden(FloorMessage::fuer_anfrage(
                anfrage,
                FloorNachrichtArt::Release,
            )));
        }
    }

    fn zuruecksetzen(&mut self) {
        self.zustand = Zustand::Idle;
        self.anfrage = None;
        self.vorige_txn = None;
    }
}
