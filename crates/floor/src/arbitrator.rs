//! Floor-Arbitrator
//!
//! Entscheidungsinstanz fuer genau eine Talkgruppe. Besitzt den
//! Floor-Zustand (Halter, Warteschlange, Revoking) exklusiv; Zugriff nur
//! ueber `handle_request`, `handle_release`, `tick` und `revoke`.
//!
//! Der Arbitrator macht selbst kein I/O. Alle erzeugten Nachrichten landen
//! im Ausgang und werden vom Aufrufer mit [`FloorArbitrator::ausgaben_nehmen`]
//! abgeholt und verschickt.
//!
//! ## Algorithmus
//!
//! 1. Notfall gegen Nicht-Notfall-Halter: Halter sofort entziehen
//!    (`Revoked{Preempted}`), wieder einreihen, Anfrager erhaelt den Floor.
//! 2. Freier Platz: sofort gewaehren.
//! 3. Belegt: bei aktivem Priority-Boost und hoeherer Prioritaet (ab
//!    `preemption_min_priority`) wie 1., sonst einreihen.
//! 4. Warteschlange voll: `Denied{MaxQueueExceeded}`.

use crate::membership::Mitgliedschaft;
use crate::queue::{Einfuegen, FloorQueue};
use meshtalk_core::{DeviceId, FloorGrund, FloorRequest, Priority, Talkgroup, Zeitstempel};
use meshtalk_protocol::floor::{txn_vor, FloorMessage, FloorNachrichtArt};
use std::collections::HashMap;
use std::sync::Arc;

/// Glaettungsfaktor fuer den gleitenden Mittelwert der Haltedauern
const HALTEDAUER_GLAETTUNG: f64 = 0.25;

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Parameter des Arbitrators
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArbitratorConfig {
    /// Maximale Haltedauer bevor der Floor mit `TimeLimitExceeded` entzogen wird
    pub max_floor_hold_ms: u64,
    /// Maximale Zeit ohne Audio-Aktivitaet des Halters
    pub inactivity_timeout_ms: u64,
    /// Maximale Laenge der Warteschlange
    pub max_queue_size: usize,
    /// Mindestprioritaet fuer Verdraengung per Priority-Boost
    pub preemption_min_priority: Priority,
    /// Startwert der geschaetzten Haltedauer fuer Wartezeit-Prognosen
    pub default_hold_estimate_ms: u64,
}

impl Default for ArbitratorConfig {
    fn default() -> Self {
        Self {
            max_floor_hold_ms: 60_000,
            inactivity_timeout_ms: 5_000,
            max_queue_size: 50,
            preemption_min_priority: Priority::Lowest,
            default_hold_estimate_ms: 10_000,
        }
    }
}

// ---------------------------------------------------------------------------
// Ergebnis- und Zustandstypen
// ---------------------------------------------------------------------------

/// Antwort auf eine Floor-Anfrage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArbitrationResult {
    GrantedImmediate,
    GrantedPreempt,
    Queued { position: u16 },
    Denied { reason: FloorGrund },
}

impl ArbitrationResult {
    pub fn ist_gewaehrt(&self) -> bool {
        matches!(self, Self::GrantedImmediate | Self::GrantedPreempt)
    }
}

/// Sichtbarer Floor-Zustand einer Talkgruppe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FloorStatus {
    Idle,
    Granted { halter: Vec<DeviceId> },
    /// Halter wurde entzogen, Nachfolger fehlt; endet mit Release oder naechstem Tick
    Revoking { halter: DeviceId },
}

/// Empfaenger einer ausgehenden Nachricht
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ziel {
    Geraet(DeviceId),
    Alle,
}

/// Ausgehende Nachricht des Arbitrators
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ausgabe {
    pub ziel: Ziel,
    pub nachricht: FloorMessage,
}

#[derive(Debug, Clone, Copy)]
struct Halter {
    anfrage: FloorRequest,
    seit: Zeitstempel,
    letzte_aktivitaet: Zeitstempel,
}

// ---------------------------------------------------------------------------
// FloorArbitrator
// ---------------------------------------------------------------------------

/// Arbitrator fuer eine Talkgruppe
pub struct FloorArbitrator {
    talkgroup: Talkgroup,
    /// Absenderkennung fuer Broadcasts ohne Anfrager (`Idle`)
    absender: DeviceId,
    config: ArbitratorConfig,
    mitgliedschaft: Arc<dyn Mitgliedschaft>,
    halter: Vec<Halter>,
    warteschlange: FloorQueue,
    revoking: Option<FloorRequest>,
    /// Letzte Transaktion und Antwort pro Anfrager (Duplikat-Unterdrueckung)
    zuletzt: HashMap<DeviceId, (u32, ArbitrationResult)>,
    haltedauer_ms: f64,
    ausgaben: Vec<Ausgabe>,
}

impl FloorArbitrator {
    pub fn neu(
        talkgroup: Talkgroup,
        absender: DeviceId,
        config: ArbitratorConfig,
        mitgliedschaft: Arc<dyn Mitgliedschaft>,
    ) -> Self {
        tracing::debug!(
            talkgroup = %talkgroup.group_id,
            max_sprecher = talkgroup.max_simultaneous_talkers,
            boost = talkgroup.priority_boost_enabled,
            "Arbitrator erstellt"
        );
        Self {
            warteschlange: FloorQueue::neu(config.max_queue_size),
            haltedauer_ms: config.default_hold_estimate_ms as f64,
            talkgroup,
            absender,
            config,
            mitgliedschaft,
            halter: Vec::new(),
            revoking: None,
            zuletzt: HashMap::new(),
            ausgaben: Vec::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Oeffentliche Operationen
    // -----------------------------------------------------------------------

    /// Bearbeitet eine Floor-Anfrage
    ///
    /// Eine wiederholte Anfrage mit derselben Transaktions-ID erzeugt weder
    /// Zustandswechsel noch Antwort; zurueckgegeben wird das fruehere Ergebnis.
    pub fn handle_request(&mut self, req: FloorRequest, now: Zeitstempel) -> ArbitrationResult {
        if req.talkgroup_id != self.talkgroup.group_id {
            tracing::warn!(
                talkgroup = %self.talkgroup.group_id,
                erhalten = %req.talkgroup_id,
                "Anfrage fuer fremde Talkgruppe"
            );
            return self.ablehnen(&req, FloorGrund::InvalidFloor);
        }
        if !self
            .mitgliedschaft
            .ist_mitglied(req.talkgroup_id, req.requester_id)
        {
            tracing::warn!(
                talkgroup = %req.talkgroup_id,
                anfrager = %req.requester_id,
                "Anfrage von Nicht-Mitglied"
            );
            return self.ablehnen(&req, FloorGrund::PermissionDenied);
        }

        if let Some((txn, ergebnis)) = self.zuletzt.get(&req.requester_id) {
            if *txn == req.transaction_id {
                tracing::debug!(
                    talkgroup = %req.talkgroup_id,
                    anfrager = %req.requester_id,
                    txn = req.transaction_id,
                    "Doppelte Anfrage unterdrueckt"
                );
                return *ergebnis;
            }
        }

        let ergebnis = self.arbitrieren(req, now);
        self.zuletzt
            .insert(req.requester_id, (req.transaction_id, ergebnis));
        ergebnis
    }

    /// Bearbeitet eine Freigabe
    ///
    /// Halter: Floor wird frei und an die Warteschlange weitergegeben.
    /// Wartender: Anfrage wird zurueckgezogen. Sonst wirkungslos.
    pub fn handle_release(&mut self, requester: DeviceId, transaction_id: u32, now: Zeitstempel) {
        if let Some(idx) = self.halter_index(requester) {
            let halter = self.halter[idx];
            if txn_vor(transaction_id, halter.anfrage.transaction_id) {
                tracing::debug!(
                    talkgroup = %self.talkgroup.group_id,
                    halter = %requester,
                    txn = transaction_id,
                    "Veraltete Freigabe ignoriert"
                );
                return;
            }
            self.halter.remove(idx);
            self.haltedauer_erfassen(halter.seit, now);
            tracing::info!(
                talkgroup = %self.talkgroup.group_id,
                halter = %requester,
                dauer_ms = now.ms_seit(halter.seit),
                "Floor freigegeben"
            );
            self.nachruecken(now);
            return;
        }

        if self.revoking.map(|r| r.requester_id) == Some(requester) {
            self.revoking = None;
            tracing::debug!(
                talkgroup = %self.talkgroup.group_id,
                halter = %requester,
                "Entzug bestaetigt"
            );
            if self.halter.is_empty() {
                self.idle_senden();
            }
            return;
        }

        if self.warteschlange.enthaelt(requester) {
            let vorher = self.warteschlange.positionen();
            self.warteschlange.entfernen(requester);
            tracing::debug!(
                talkgroup = %self.talkgroup.group_id,
                anfrager = %requester,
                "Wartende Anfrage zurueckgezogen"
            );
            self.verschiebungen_melden(&vorher, None);
            return;
        }

        tracing::debug!(
            talkgroup = %self.talkgroup.group_id,
            anfrager = %requester,
            "Freigabe ohne Floor ignoriert"
        );
    }

    /// Periodische Auswertung von Halte- und Inaktivitaets-Timern
    pub fn tick(&mut self, now: Zeitstempel) {
        if let Some(alt) = self.revoking.take() {
            tracing::debug!(
                talkgroup = %self.talkgroup.group_id,
                halter = %alt.requester_id,
                "Revoking abgeschlossen"
            );
            if self.halter.is_empty() {
                self.idle_senden();
            }
        }

        let abgelaufen: Vec<(DeviceId, FloorGrund)> = self
            .halter
            .iter()
            .filter_map(|h| {
                if now.ms_seit(h.seit) >= self.config.max_floor_hold_ms {
                    Some((h.anfrage.requester_id, FloorGrund::TimeLimitExceeded))
                } else if now.ms_seit(h.letzte_aktivitaet) >= self.config.inactivity_timeout_ms {
                    Some((h.anfrage.requester_id, FloorGrund::Inactivity))
                } else {
                    None
                }
            })
            .collect();

        for (halter, grund) in abgelaufen {
            self.entziehen(halter, grund, now);
        }
    }

    /// Administrativer Entzug; `false` wenn `halter` den Floor nicht haelt
    pub fn revoke(&mut self, halter: DeviceId, grund: FloorGrund, now: Zeitstempel) -> bool {
        if self.halter_index(halter).is_none() {
            return false;
        }
        self.entziehen(halter, grund, now);
        true
    }

    /// Meldet Audio-Aktivitaet eines Halters (setzt nur dessen
    /// Inaktivitaets-Timer zurueck); `false` wenn `geraet` nicht haelt
    pub fn melde_aktivitaet(&mut self, geraet: DeviceId, now: Zeitstempel) -> bool {
        match self.halter.iter_mut().find(|h| h.anfrage.requester_id == geraet) {
            Some(h) => {
                h.letzte_aktivitaet = now;
                true
            }
            None => false,
        }
    }

    /// Setzt `req` als Halter ein, falls der Rang es erlaubt
    ///
    /// Fuer den Zustandsabgleich im verteilten Betrieb: bei vollem Floor wird
    /// der schwaechste Halter nur verdraengt, wenn `req` besser rangiert.
    pub fn uebernehmen(&mut self, req: FloorRequest, now: Zeitstempel) -> bool {
        if self.ist_halter(req.requester_id) {
            return false;
        }
        let opfer = if self.halter.len() >= self.max_sprecher() {
            match self.schwaechster_halter() {
                Some(w) if req.rang_vergleich(&w) == std::cmp::Ordering::Less => {
                    Some(w.requester_id)
                }
                _ => return false,
            }
        } else {
            None
        };

        self.revoking = None;
        let vorher = self.warteschlange.positionen();
        self.warteschlange.entfernen(req.requester_id);
        if let Some(opfer) = opfer {
            self.verdraengen(opfer, now);
        }
        self.gewaehren(req, now);
        self.zuletzt.insert(
            req.requester_id,
            (req.transaction_id, ArbitrationResult::GrantedImmediate),
        );
        self.verschiebungen_melden(&vorher, None);
        true
    }

    /// Holt alle seit dem letzten Aufruf erzeugten Nachrichten ab
    pub fn ausgaben_nehmen(&mut self) -> Vec<Ausgabe> {
        std::mem::take(&mut self.ausgaben)
    }

    // -----------------------------------------------------------------------
    // Abfragen
    // -----------------------------------------------------------------------

    pub fn status(&self) -> FloorStatus {
        if !self.halter.is_empty() {
            FloorStatus::Granted {
                halter: self.halter_ids(),
            }
        } else if let Some(r) = self.revoking {
            FloorStatus::Revoking {
                halter: r.requester_id,
            }
        } else {
            FloorStatus::Idle
        }
    }

    pub fn halter_ids(&self) -> Vec<DeviceId> {
        self.halter.iter().map(|h| h.anfrage.requester_id).collect()
    }

    pub fn halter_anfragen(&self) -> Vec<FloorRequest> {
        self.halter.iter().map(|h| h.anfrage).collect()
    }

    pub fn ist_halter(&self, geraet: DeviceId) -> bool {
        self.halter_index(geraet).is_some()
    }

    pub fn warteschlange(&self) -> &FloorQueue {
        &self.warteschlange
    }

    pub fn talkgroup(&self) -> &Talkgroup {
        &self.talkgroup
    }

    /// Geschaetzte Wartezeit fuer eine Position (nur Anzeige)
    pub fn geschaetzte_wartezeit_ms(&self, position: u16) -> u32 {
        (position as f64 * self.haltedauer_ms).min(u32::MAX as f64) as u32
    }

    /// Schwaechster aktueller Halter (schlechtester Rang)
    pub fn schwaechster_halter(&self) -> Option<FloorRequest> {
        self.halter
            .iter()
            .map(|h| h.anfrage)
            .max_by(|a, b| a.rang_vergleich(b))
    }

    // -----------------------------------------------------------------------
    // Interne Logik
    // -----------------------------------------------------------------------

    fn arbitrieren(&mut self, req: FloorRequest, now: Zeitstempel) -> ArbitrationResult {
        // Waehrend Revoking wird wie bei freiem Floor entschieden
        if let Some(alt) = self.revoking.take() {
            tracing::debug!(
                talkgroup = %self.talkgroup.group_id,
                halter = %alt.requester_id,
                "Revoking durch neue Anfrage beendet"
            );
        }

        // Halter fragt erneut an: Floor bestaetigen
        if let Some(idx) = self.halter_index(req.requester_id) {
            let bisher = self.halter[idx].anfrage.transaction_id;
            if txn_vor(req.transaction_id, bisher) {
                tracing::debug!(
                    talkgroup = %self.talkgroup.group_id,
                    halter = %req.requester_id,
                    txn = req.transaction_id,
                    "Verspaetete Anfrage eines Halters ignoriert"
                );
                return ArbitrationResult::GrantedImmediate;
            }
            self.halter[idx].anfrage.transaction_id = req.transaction_id;
            let anfrage = self.halter[idx].anfrage;
            self.gewaehrt_senden(&anfrage);
            return ArbitrationResult::GrantedImmediate;
        }

        let vorher = self.warteschlange.positionen();

        // Bereits wartend ohne Aufwertung: Platz behalten
        if let Some(bestehend) = self.warteschlange.eintrag(req.requester_id).copied() {
            if req.effektive_prioritaet() <= bestehend.effektive_prioritaet() {
                if let Some(position) = self.warteschlange.einfuegen(req).position() {
                    self.warteposition_senden(&req, position);
                    return ArbitrationResult::Queued { position };
                }
            }
        }

        let ergebnis = if self.halter.len() < self.max_sprecher() {
            self.warteschlange.entfernen(req.requester_id);
            self.gewaehren(req, now);
            ArbitrationResult::GrantedImmediate
        } else if let Some(opfer) = self.verdraengbarer_halter(&req) {
            self.warteschlange.entfernen(req.requester_id);
            self.verdraengen(opfer, now);
            self.gewaehren(req, now);
            ArbitrationResult::GrantedPreempt
        } else {
            match self.warteschlange.einfuegen(req) {
                Einfuegen::Voll => {
                    tracing::info!(
                        talkgroup = %self.talkgroup.group_id,
                        anfrager = %req.requester_id,
                        laenge = self.warteschlange.len(),
                        "Warteschlange voll"
                    );
                    self.ablehnen(&req, FloorGrund::MaxQueueExceeded)
                }
                Einfuegen::Eingereiht { position }
                | Einfuegen::Aufgewertet { position }
                | Einfuegen::Unveraendert { position } => {
                    tracing::info!(
                        talkgroup = %self.talkgroup.group_id,
                        anfrager = %req.requester_id,
                        position,
                        prioritaet = ?req.effektive_prioritaet(),
                        "Anfrage eingereiht"
                    );
                    self.warteposition_senden(&req, position);
                    ArbitrationResult::Queued { position }
                }
            }
        };

        self.verschiebungen_melden(&vorher, Some(req.requester_id));
        ergebnis
    }

    /// Halter, der fuer `req` verdraengt werden darf
    fn verdraengbarer_halter(&self, req: &FloorRequest) -> Option<DeviceId> {
        let schwaechster = self.schwaechster_halter()?;
        if schwaechster.ist_notfall() {
            return None;
        }
        if req.ist_notfall() {
            return Some(schwaechster.requester_id);
        }
        let p = req.effektive_prioritaet();
        if self.talkgroup.priority_boost_enabled
            && p > schwaechster.effektive_prioritaet()
            && p >= self.config.preemption_min_priority
        {
            return Some(schwaechster.requester_id);
        }
        None
    }

    fn gewaehren(&mut self, req: FloorRequest, now: Zeitstempel) {
        self.halter.push(Halter {
            anfrage: req,
            seit: now,
            letzte_aktivitaet: now,
        });
        tracing::info!(
            talkgroup = %self.talkgroup.group_id,
            halter = %req.requester_id,
            prioritaet = ?req.effektive_prioritaet(),
            "Floor gewaehrt"
        );
        self.gewaehrt_senden(&req);
        self.senden(Ziel::Alle, FloorMessage::taken(&req));
    }

    /// Entzieht den Floor wegen Verdraengung und reiht den Halter wieder ein
    fn verdraengen(&mut self, opfer: DeviceId, now: Zeitstempel) {
        let Some(idx) = self.halter_index(opfer) else {
            return;
        };
        let halter = self.halter.remove(idx);
        self.haltedauer_erfassen(halter.seit, now);
        tracing::info!(
            talkgroup = %self.talkgroup.group_id,
            halter = %opfer,
            "Halter verdraengt"
        );
        self.senden(
            Ziel::Geraet(opfer),
            FloorMessage::fuer_anfrage(
                &halter.anfrage,
                FloorNachrichtArt::Revoked {
                    reason: FloorGrund::Preempted,
                },
            ),
        );
        self.warteschlange.einfuegen_erzwungen(halter.anfrage);
    }

    /// Entzieht den Floor ohne Wiedereinreihung
    fn entziehen(&mut self, opfer: DeviceId, grund: FloorGrund, now: Zeitstempel) {
        let Some(idx) = self.halter_index(opfer) else {
            return;
        };
        let halter = self.halter.remove(idx);
        self.haltedauer_erfassen(halter.seit, now);
        tracing::info!(
            talkgroup = %self.talkgroup.group_id,
            halter = %opfer,
            grund = grund.als_str(),
            "Floor entzogen"
        );
        self.senden(
            Ziel::Geraet(opfer),
            FloorMessage::fuer_anfrage(&halter.anfrage, FloorNachrichtArt::Revoked { reason: grund }),
        );

        if self.warteschlange.is_empty() {
            if self.halter.is_empty() {
                self.revoking = Some(halter.anfrage);
            }
        } else {
            self.nachruecken(now);
        }
    }

    /// Vergibt freie Plaetze an die Warteschlange; meldet `Idle` wenn niemand mehr spricht
    fn nachruecken(&mut self, now: Zeitstempel) {
        let vorher = self.warteschlange.positionen();
        while self.halter.len() < self.max_sprecher() {
            match self.warteschlange.kopf_nehmen() {
                Some(naechster) => self.gewaehren(naechster, now),
                None => break,
            }
        }
        self.verschiebungen_melden(&vorher, None);

        if self.halter.is_empty() && self.revoking.is_none() {
            self.idle_senden();
        }
    }

    fn ablehnen(&mut self, req: &FloorRequest, grund: FloorGrund) -> ArbitrationResult {
        self.senden(
            Ziel::Geraet(req.requester_id),
            FloorMessage::fuer_anfrage(req, FloorNachrichtArt::Denied { reason: grund }),
        );
        ArbitrationResult::Denied { reason: grund }
    }

    fn gewaehrt_senden(&mut self, req: &FloorRequest) {
        let max_hold_ms = self.config.max_floor_hold_ms.min(u32::MAX as u64) as u32;
        self.senden(
            Ziel::Geraet(req.requester_id),
            FloorMessage::fuer_anfrage(req, FloorNachrichtArt::Granted { max_hold_ms }),
        );
    }

    fn warteposition_senden(&mut self, req: &FloorRequest, position: u16) {
        let estimated_wait_ms = self.geschaetzte_wartezeit_ms(position);
        self.senden(
            Ziel::Geraet(req.requester_id),
            FloorMessage::fuer_anfrage(
                req,
                FloorNachrichtArt::QueuePosition {
                    position,
                    estimated_wait_ms,
                },
            ),
        );
    }

    /// Benachrichtigt alle Wartenden, deren Position sich veraendert hat
    fn verschiebungen_melden(&mut self, vorher: &HashMap<DeviceId, u16>, ausser: Option<DeviceId>) {
        let aktuell: Vec<(FloorRequest, u16)> = self
            .warteschlange
            .iter()
            .enumerate()
            .map(|(i, e)| (*e, (i + 1) as u16))
            .collect();

        for (eintrag, position) in aktuell {
            if Some(eintrag.requester_id) == ausser {
                continue;
            }
            if vorher.get(&eintrag.requester_id) != Some(&position) {
                self.warteposition_senden(&eintrag, position);
            }
        }
    }

    fn idle_senden(&mut self) {
        tracing::info!(talkgroup = %self.talkgroup.group_id, "Floor frei");
        self.senden(
            Ziel::Alle,
            FloorMessage::idle(self.talkgroup.group_id, self.absender),
        );
    }

    fn senden(&mut self, ziel: Ziel, nachricht: FloorMessage) {
        self.ausgaben.push(Ausgabe { ziel, nachricht });
    }

    fn haltedauer_erfassen(&mut self, seit: Zeitstempel, now: Zeitstempel) {
        let dauer = now.ms_seit(seit) as f64;
        self.haltedauer_ms += (dauer - self.haltedauer_ms) * HALTEDAUER_GLAETTUNG;
    }

    fn halter_index(&self, geraet: DeviceId) -> Option<usize> {
        self.halter
            .iter()
            .position(|h| h.anfrage.requester_id == geraet)
    }

    fn max_sprecher(&self) -> usize {
        self.talkgroup.max_simultaneous_talkers.max(1) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::membership::{OffeneMitgliedschaft, StatischeMitgliedschaft};
    use meshtalk_core::TalkgroupId;
    use std::net::Ipv4Addr;

    const TG: TalkgroupId = TalkgroupId(1);

    fn talkgroup() -> Talkgroup {
        Talkgroup::neu(TG, Ipv4Addr::new(239, 0, 0, 1), 5004)
    }

    fn arbitrator() -> FloorArbitrator {
        FloorArbitrator::neu(
            talkgroup(),
            DeviceId(1000),
            ArbitratorConfig::default(),
            Arc::new(OffeneMitgliedschaft),
        )
    }

    fn anfrage(id: u32, prio: Priority, zeit: u64, txn: u32) -> FloorRequest {
        FloorRequest {
            requester_id: DeviceId(id),
            talkgroup_id: TG,
            priority: prio,
            is_emergency: false,
            request_time: Zeitstempel(zeit),
            transaction_id: txn,
        }
    }

    fn arten_an(ausgaben: &[Ausgabe], ziel: Ziel) -> Vec<FloorNachrichtArt> {
        ausgaben
            .iter()
            .filter(|a| a.ziel == ziel)
            .map(|a| a.nachricht.art)
            .collect()
    }

    #[test]
    fn gewaehrung_sendet_granted_und_taken() {
        let mut arb = arbitrator();
        let erg = arb.handle_request(anfrage(1, Priority::Normal, 0, 1), Zeitstempel(0));
        assert_eq!(erg, ArbitrationResult::GrantedImmediate);

        let aus = arb.ausgaben_nehmen();
        assert_eq!(
            arten_an(&aus, Ziel::Geraet(DeviceId(1))),
            vec![FloorNachrichtArt::Granted { max_hold_ms: 60_000 }]
        );
        assert!(matches!(
            arten_an(&aus, Ziel::Alle)[..],
            [FloorNachrichtArt::Taken { new_holder: DeviceId(1), .. }]
        ));
        assert!(arb.ausgaben_nehmen().is_empty());
    }

    #[test]
    fn fremde_talkgruppe_wird_abgelehnt() {
        let mut arb = arbitrator();
        let mut req = anfrage(1, Priority::Normal, 0, 1);
        req.talkgroup_id = TalkgroupId(99);
        assert_eq!(
            arb.handle_request(req, Zeitstempel(0)),
            ArbitrationResult::Denied {
                reason: FloorGrund::InvalidFloor
            }
        );
        assert_eq!(arb.status(), FloorStatus::Idle);
    }

    #[test]
    fn nicht_mitglied_wird_abgelehnt() {
        let mitglieder = StatischeMitgliedschaft::neu();
        mitglieder.setzen(TG, [DeviceId(1)]);
        let mut arb = FloorArbitrator::neu(
            talkgroup(),
            DeviceId(1000),
            ArbitratorConfig::default(),
            Arc::new(mitglieder),
        );
        assert_eq!(
            arb.handle_request(anfrage(2, Priority::Normal, 0, 1), Zeitstempel(0)),
            ArbitrationResult::Denied {
                reason: FloorGrund::PermissionDenied
            }
        );
        assert!(arb
            .handle_request(anfrage(1, Priority::Normal, 0, 1), Zeitstempel(0))
            .ist_gewaehrt());
    }

    #[test]
    fn notfall_gegen_notfall_wird_eingereiht() {
        let mut arb = arbitrator();
        let mut a = anfrage(1, Priority::Normal, 0, 1);
        a.is_emergency = true;
        let mut b = anfrage(2, Priority::Emergency, 10, 1);
        b.is_emergency = true;
        arb.handle_request(a, Zeitstempel(0));
        assert_eq!(
            arb.handle_request(b, Zeitstempel(10)),
            ArbitrationResult::Queued { position: 1 }
        );
    }

    #[test]
    fn boost_respektiert_mindestprioritaet() {
        let mut tg = talkgroup();
        tg.priority_boost_enabled = true;
        let config = ArbitratorConfig {
            preemption_min_priority: Priority::Flash,
            ..ArbitratorConfig::default()
        };
        let mut arb =
            FloorArbitrator::neu(tg, DeviceId(1000), config, Arc::new(OffeneMitgliedschaft));
        arb.handle_request(anfrage(1, Priority::Low, 0, 1), Zeitstempel(0));
        assert_eq!(
            arb.handle_request(anfrage(2, Priority::High, 1, 1), Zeitstempel(1)),
            ArbitrationResult::Queued { position: 1 }
        );
        assert_eq!(
            arb.handle_request(anfrage(3, Priority::Flash, 2, 1), Zeitstempel(2)),
            ArbitrationResult::GrantedPreempt
        );
    }

    #[test]
    fn ohne_boost_keine_verdraengung() {
        let mut arb = arbitrator();
        arb.handle_request(anfrage(1, Priority::Low, 0, 1), Zeitstempel(0));
        assert_eq!(
            arb.handle_request(anfrage(2, Priority::Flash, 1, 1), Zeitstempel(1)),
            ArbitrationResult::Queued { position: 1 }
        );
    }

    #[test]
    fn warteschlange_voll() {
        let config = ArbitratorConfig {
            max_queue_size: 1,
            ..ArbitratorConfig::default()
        };
        let mut arb = FloorArbitrator::neu(
            talkgroup(),
            DeviceId(1000),
            config,
            Arc::new(OffeneMitgliedschaft),
        );
        arb.handle_request(anfrage(1, Priority::Normal, 0, 1), Zeitstempel(0));
        arb.handle_request(anfrage(2, Priority::Normal, 1, 1), Zeitstempel(1));
        assert_eq!(
            arb.handle_request(anfrage(3, Priority::Normal, 2, 1), Zeitstempel(2)),
            ArbitrationResult::Denied {
                reason: FloorGrund::MaxQueueExceeded
            }
        );
    }

    #[test]
    fn halter_bestaetigung_bei_neuer_transaktion() {
        let mut arb = arbitrator();
        arb.handle_request(anfrage(1, Priority::Normal, 0, 1), Zeitstempel(0));
        arb.ausgaben_nehmen();

        assert_eq!(
            arb.handle_request(anfrage(1, Priority::Normal, 0, 2), Zeitstempel(5)),
            ArbitrationResult::GrantedImmediate
        );
        let aus = arb.ausgaben_nehmen();
        assert_eq!(aus.len(), 1);
        assert_eq!(aus[0].nachricht.transaction_id, 2);
    }

    #[test]
    fn wartender_zieht_zurueck() {
        let mut arb = arbitrator();
        arb.handle_request(anfrage(1, Priority::Normal, 0, 1), Zeitstempel(0));
        arb.handle_request(anfrage(2, Priority::Normal, 1, 1), Zeitstempel(1));
        arb.handle_request(anfrage(3, Priority::Normal, 2, 1), Zeitstempel(2));
        arb.ausgaben_nehmen();

        arb.handle_release(DeviceId(2), 1, Zeitstempel(3));
        assert_eq!(arb.warteschlange().position(DeviceId(3)), Some(1));
        let aus = arb.ausgaben_nehmen();
        assert!(matches!(
            arten_an(&aus, Ziel::Geraet(DeviceId(3)))[..],
            [FloorNachrichtArt::QueuePosition { position: 1, .. }]
        ));
        assert_eq!(arb.status(), FloorStatus::Granted { halter: vec![DeviceId(1)] });
    }

    #[test]
    fn veraltete_freigabe_wird_ignoriert() {
        let mut arb = arbitrator();
        arb.handle_request(anfrage(1, Priority::Normal, 0, 5), Zeitstempel(0));
        arb.handle_release(DeviceId(1), 4, Zeitstempel(1));
        assert!(arb.ist_halter(DeviceId(1)));
        arb.handle_release(DeviceId(1), 5, Zeitstempel(2));
        assert_eq!(arb.status(), FloorStatus::Idle);
    }

    #[test]
    fn inaktivitaet_fuehrt_zu_revoking_und_idle() {
        let mut arb = arbitrator();
        arb.handle_request(anfrage(1, Priority::Normal, 0, 1), Zeitstempel(0));
        arb.ausgaben_nehmen();

        assert!(arb.melde_aktivitaet(DeviceId(1), Zeitstempel(4_000)));
        assert!(!arb.melde_aktivitaet(DeviceId(2), Zeitstempel(4_000)));
        arb.tick(Zeitstempel(8_000));
        assert!(arb.ist_halter(DeviceId(1)));

        arb.tick(Zeitstempel(9_000));
        assert_eq!(arb.status(), FloorStatus::Revoking { halter: DeviceId(1) });
        let aus = arb.ausgaben_nehmen();
        assert_eq!(
            arten_an(&aus, Ziel::Geraet(DeviceId(1))),
            vec![FloorNachrichtArt::Revoked {
                reason: FloorGrund::Inactivity
            }]
        );

        arb.tick(Zeitstempel(10_000));
        assert_eq!(arb.status(), FloorStatus::Idle);
        assert_eq!(
            arten_an(&arb.ausgaben_nehmen(), Ziel::Alle),
            vec![FloorNachrichtArt::Idle]
        );
    }

    #[test]
    fn release_bestaetigt_revoking() {
        let mut arb = arbitrator();
        arb.handle_request(anfrage(1, Priority::Normal, 0, 1), Zeitstempel(0));
        assert!(arb.revoke(DeviceId(1), FloorGrund::Administrative, Zeitstempel(10)));
        assert!(!arb.revoke(DeviceId(1), FloorGrund::Administrative, Zeitstempel(10)));
        assert!(matches!(arb.status(), FloorStatus::Revoking { .. }));
        arb.handle_release(DeviceId(1), 1, Zeitstempel(20));
        assert_eq!(arb.status(), FloorStatus::Idle);
    }

    #[test]
    fn anfrage_waehrend_revoking_wird_wie_idle_behandelt() {
        let mut arb = arbitrator();
        arb.handle_request(anfrage(1, Priority::High, 0, 1), Zeitstempel(0));
        arb.revoke(DeviceId(1), FloorGrund::Administrative, Zeitstempel(10));
        assert_eq!(
            arb.handle_request(anfrage(2, Priority::Low, 11, 1), Zeitstempel(11)),
            ArbitrationResult::GrantedImmediate
        );
    }

    #[test]
    fn mehrere_gleichzeitige_sprecher() {
        let mut tg = talkgroup();
        tg.max_simultaneous_talkers = 2;
        let mut arb = FloorArbitrator::neu(
            tg,
            DeviceId(1000),
            ArbitratorConfig::default(),
            Arc::new(OffeneMitgliedschaft),
        );
        assert!(arb
            .handle_request(anfrage(1, Priority::Normal, 0, 1), Zeitstempel(0))
            .ist_gewaehrt());
        assert!(arb
            .handle_request(anfrage(2, Priority::Normal, 1, 1), Zeitstempel(1))
            .ist_gewaehrt());
        assert_eq!(
            arb.handle_request(anfrage(3, Priority::Normal, 2, 1), Zeitstempel(2)),
            ArbitrationResult::Queued { position: 1 }
        );
    }

    #[test]
    fn stiller_mitsprecher_wird_entzogen() {
        let mut tg = talkgroup();
        tg.max_simultaneous_talkers = 2;
        let mut arb = FloorArbitrator::neu(
            tg,
            DeviceId(1000),
            ArbitratorConfig::default(),
            Arc::new(OffeneMitgliedschaft),
        );
        arb.handle_request(anfrage(1, Priority::Normal, 0, 1), Zeitstempel(0));
        arb.handle_request(anfrage(2, Priority::Normal, 1, 1), Zeitstempel(1));
        arb.ausgaben_nehmen();

        // Nur Geraet 1 spricht
        for t in (1_000..=6_000).step_by(1_000) {
            arb.melde_aktivitaet(DeviceId(1), Zeitstempel(t));
            arb.tick(Zeitstempel(t));
        }
        assert!(arb.ist_halter(DeviceId(1)));
        assert!(!arb.ist_halter(DeviceId(2)));
        assert_eq!(
            arten_an(&arb.ausgaben_nehmen(), Ziel::Geraet(DeviceId(2))),
            vec![FloorNachrichtArt::Revoked {
                reason: FloorGrund::Inactivity
            }]
        );
    }

    #[test]
    fn freigabe_nach_transaktions_wrap() {
        let mut arb = arbitrator();
        arb.handle_request(anfrage(1, Priority::Normal, 0, u32::MAX), Zeitstempel(0));
        // Wiederholung nach dem Wrap (0 wird uebersprungen)
        arb.handle_request(anfrage(1, Priority::Normal, 0, 1), Zeitstempel(10));
        arb.handle_release(DeviceId(1), u32::MAX, Zeitstempel(20));
        assert!(arb.ist_halter(DeviceId(1)));
        arb.handle_release(DeviceId(1), 1, Zeitstempel(30));
        assert_eq!(arb.status(), FloorStatus::Idle);
    }

    #[test]
    fn verspaetete_anfrage_senkt_halter_transaktion_nicht() {
        let mut arb = arbitrator();
        arb.handle_request(anfrage(1, Priority::Normal, 0, 1), Zeitstempel(0));
        arb.handle_request(anfrage(1, Priority::Normal, 0, 2), Zeitstempel(5));
        arb.ausgaben_nehmen();

        arb.handle_request(anfrage(1, Priority::Normal, 0, 1), Zeitstempel(8));
        assert!(arb.ausgaben_nehmen().is_empty());
        arb.handle_release(DeviceId(1), 2, Zeitstempel(10));
        assert_eq!(arb.status(), FloorStatus::Idle);
    }

    #[test]
    fn wartezeit_schaetzung_folgt_haltedauern() {
        let mut arb = arbitrator();
        assert_eq!(arb.geschaetzte_wartezeit_ms(2), 20_000);

        arb.handle_request(anfrage(1, Priority::Normal, 0, 1), Zeitstempel(0));
        arb.handle_release(DeviceId(1), 1, Zeitstempel(2_000));
        // 10000 + (2000 - 10000) * 0.25 = 8000
        assert_eq!(arb.geschaetzte_wartezeit_ms(1), 8_000);
    }

    #[test]
    fn uebernehmen_nur_bei_besserem_rang() {
        let mut arb = arbitrator();
        arb.handle_request(anfrage(1, Priority::Normal, 10, 1), Zeitstempel(10));

        assert!(!arb.uebernehmen(anfrage(2, Priority::Normal, 20, 1), Zeitstempel(30)));
        assert!(arb.ist_halter(DeviceId(1)));

        assert!(arb.uebernehmen(anfrage(3, Priority::Normal, 5, 1), Zeitstempel(30)));
        assert!(arb.ist_halter(DeviceId(3)));
        assert_eq!(arb.warteschlange().position(DeviceId(1)), Some(1));
    }
}
