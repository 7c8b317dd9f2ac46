//! Verteilte Floor-Arbitrierung (ohne zentrale Instanz)
//!
//! Jeder Knoten fuehrt denselben deterministischen [`FloorArbitrator`] auf
//! den beobachteten Anfragen aus. Antworten des eigenen Arbitrators gehen
//! nur an den lokalen Client; auf den Draht gelangen ausschliesslich die
//! Nachrichten des lokalen Clients und der periodische Abgleich (Gossip):
//! ein `Taken` pro Halter und ein erneutes `Request` pro Wartendem.
//!
//! Abweichende Sichten werden ueber die totale Rangordnung
//! (Prioritaet, Anfragezeit, Geraetekennung) aufgeloest: meldet ein anderer
//! Knoten einen besser rangierenden Halter, wird dieser uebernommen und der
//! eigene Halter verdraengt (ist er lokal, entzieht sich der Knoten selbst).

use crate::arbitrator::{ArbitratorConfig, FloorArbitrator, FloorStatus, Ziel};
use crate::membership::Mitgliedschaft;
use meshtalk_core::{DeviceId, Talkgroup, Zeitstempel};
use meshtalk_protocol::floor::{txn_vor, FloorMessage, FloorNachrichtArt};
use std::collections::HashMap;
use std::sync::Arc;

/// Standard-Intervall fuer den Zustandsabgleich
pub const STANDARD_GOSSIP_INTERVALL_MS: u64 = 1_000;

/// Ergebnis einer Operation im verteilten Betrieb
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct VerteilteAusgaben {
    /// Nachrichten fuer den lokalen Client
    pub an_lokal: Vec<FloorMessage>,
    /// Nachrichten fuer alle anderen Knoten
    pub senden: Vec<FloorMessage>,
}

/// Lokale Replik des Floor-Zustands einer Talkgruppe
pub struct VerteilteArbitrierung {
    lokal: DeviceId,
    arbitrator: FloorArbitrator,
    /// Hoechste freigegebene Transaktion pro Geraet
    freigegeben: HashMap<DeviceId, u32>,
    gossip_intervall_ms: u64,
    naechster_gossip: Option<Zeitstempel>,
}

impl VerteilteArbitrierung {
    pub fn neu(
        lokal: DeviceId,
        talkgroup: Talkgroup,
        config: ArbitratorConfig,
        mitgliedschaft: Arc<dyn Mitgliedschaft>,
        gossip_intervall_ms: u64,
    ) -> Self {
        Self {
            lokal,
            arbitrator: FloorArbitrator::neu(talkgroup, lokal, config, mitgliedschaft),
            freigegeben: HashMap::new(),
            gossip_intervall_ms,
            naechster_gossip: None,
        }
    }

    pub fn arbitrator(&self) -> &FloorArbitrator {
        &self.arbitrator
    }

    pub fn status(&self) -> FloorStatus {
        self.arbitrator.status()
    }

    /// Nachricht des lokalen Clients: lokal anwenden und verschicken
    pub fn lokal_senden(&mut self, msg: FloorMessage, now: Zeitstempel) -> VerteilteAusgaben {
        self.anwenden(&msg, now);
        VerteilteAusgaben {
            an_lokal: self.lokale_ausgaben(),
            senden: vec![msg],
        }
    }

    /// Nachricht eines anderen Knotens
    pub fn empfangen(&mut self, msg: &FloorMessage, now: Zeitstempel) -> Vec<FloorMessage> {
        self.anwenden(msg, now);
        self.lokale_ausgaben()
    }

    /// Timer und periodischer Abgleich
    pub fn tick(&mut self, now: Zeitstempel) -> VerteilteAusgaben {
        self.arbitrator.tick(now);
        let mut ausgaben = VerteilteAusgaben {
            an_lokal: self.lokale_ausgaben(),
            senden: Vec::new(),
        };

        let faellig = self.naechster_gossip.map_or(true, |t| now >= t);
        if faellig {
            ausgaben.senden = self.gossip();
            self.naechster_gossip = Some(now.plus_ms(self.gossip_intervall_ms));
        }
        ausgaben
    }

    /// Audio eines Halters (eigenes Senden oder Empfang) haelt ihn aktiv
    pub fn melde_aktivitaet(&mut self, geraet: DeviceId, now: Zeitstempel) -> bool {
        self.arbitrator.melde_aktivitaet(geraet, now)
    }

    /// Aktuelle Sicht als Nachrichtenfolge
    pub fn gossip(&self) -> Vec<FloorMessage> {
        let mut nachrichten: Vec<FloorMessage> = self
            .arbitrator
            .halter_anfragen()
            .iter()
            .map(FloorMessage::taken)
            .collect();
        nachrichten.extend(self.arbitrator.warteschlange().iter().map(FloorMessage::request));
        nachrichten
    }

    // -----------------------------------------------------------------------
    // Intern
    // -----------------------------------------------------------------------

    fn anwenden(&mut self, msg: &FloorMessage, now: Zeitstempel) {
        match msg.art {
            FloorNachrichtArt::Request { .. } => {
                let Some(req) = msg.als_anfrage() else {
                    return;
                };
                if self.ist_freigegeben(req.requester_id, req.transaction_id) {
                    tracing::trace!(
                        anfrager = %req.requester_id,
                        txn = req.transaction_id,
                        "Bereits freigegebene Anfrage ignoriert"
                    );
                    return;
                }
                self.arbitrator.handle_request(req, now);
            }
            FloorNachrichtArt::Release => {
                let eintrag = self
                    .freigegeben
                    .entry(msg.requester_id)
                    .or_insert(msg.transaction_id);
                if txn_vor(*eintrag, msg.transaction_id) {
                    *eintrag = msg.transaction_id;
                }
                self.arbitrator
                    .handle_release(msg.requester_id, msg.transaction_id, now);
            }
            FloorNachrichtArt::Taken { .. } => self.abgleichen(msg, now),
            // Antworten fremder Arbitratoren und Idle aendern die lokale Sicht nicht
            _ => {}
        }
    }

    /// Zustandsabgleich bei gemeldetem Halter
    fn abgleichen(&mut self, msg: &FloorMessage, now: Zeitstempel) {
        let Some(halter) = msg.halter_anfrage() else {
            return;
        };
        if halter.talkgroup_id != self.arbitrator.talkgroup().group_id
            || self.ist_freigegeben(halter.requester_id, halter.transaction_id)
            || self.arbitrator.ist_halter(halter.requester_id)
        {
            return;
        }

        if self.arbitrator.uebernehmen(halter, now) {
            tracing::info!(
                talkgroup = %halter.talkgroup_id,
                halter = %halter.requester_id,
                "Abweichende Sicht: besser rangierender Halter uebernommen"
            );
        } else {
            tracing::debug!(
                talkgroup = %halter.talkgroup_id,
                gemeldet = %halter.requester_id,
                "Abweichende Sicht: gemeldeter Halter unterliegt, wird eingereiht"
            );
            self.arbitrator.handle_request(halter, now);
        }
    }

    fn ist_freigegeben(&self, geraet: DeviceId, txn: u32) -> bool {
        self.freigegeben
            .get(&geraet)
            .is_some_and(|f| txn == *f || txn_vor(txn, *f))
    }

    fn lokale_ausgaben(&mut self) -> Vec<FloorMessage> {
        let lokal = self.lokal;
        self.arbitrator
            .ausgaben_nehmen()
            .into_iter()
            .filter(|a| a.ziel == Ziel::Alle || a.ziel == Ziel::Geraet(lokal))
            .map(|a| a.nachricht)
            .collect()
    }
}
