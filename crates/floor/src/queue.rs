//! Prioritaets-Warteschlange fuer Floor-Anfragen
//!
//! Sortiert nach `FloorRequest::rang_vergleich` (Prioritaet absteigend,
//! Anfragezeit aufsteigend, Geraetekennung aufsteigend). Positionen sind
//! 1-basiert, Position 1 ist der naechste Sprecher.
//!
//! Pro Anfrager gibt es hoechstens einen Eintrag. Eine erneute Anfrage
//! ersetzt den bestehenden Eintrag nur bei hoeherer Prioritaet, sonst
//! behaelt der Anfrager seinen Platz (die Transaktions-ID wird aktualisiert).

use meshtalk_core::{DeviceId, FloorRequest};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Ergebnis eines Einfuege-Versuchs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Einfuegen {
    /// Neu eingereiht
    Eingereiht { position: u16 },
    /// Bestehender Eintrag mit hoeherer Prioritaet ersetzt
    Aufgewertet { position: u16 },
    /// Bereits eingereiht, Platz bleibt erhalten
    Unveraendert { position: u16 },
    /// Warteschlange voll
    Voll,
}

impl Einfuegen {
    pub fn position(&self) -> Option<u16> {
        match *self {
            Self::Eingereiht { position }
            | Self::Aufgewertet { position }
            | Self::Unveraendert { position } => Some(position),
            Self::Voll => None,
        }
    }
}

/// Sortierte Warteschlange wartender Anfragen
#[derive(Debug, Clone)]
pub struct FloorQueue {
    eintraege: Vec<FloorRequest>,
    max_groesse: usize,
}

impl FloorQueue {
    pub fn neu(max_groesse: usize) -> Self {
        Self {
            eintraege: Vec::new(),
            max_groesse,
        }
    }

    pub fn len(&self) -> usize {
        self.eintraege.len()
    }

    pub fn is_empty(&self) -> bool {
        self.eintraege.is_empty()
    }

    pub fn ist_voll(&self) -> bool {
        self.eintraege.len() >= self.max_groesse
    }

    /// Reiht eine Anfrage ein (beachtet die maximale Groesse)
    pub fn einfuegen(&mut self, req: FloorRequest) -> Einfuegen {
        if let Some(idx) = self.index_von(req.requester_id) {
            let bestehend = self.eintraege[idx];
            if req.effektive_prioritaet() > bestehend.effektive_prioritaet() {
                self.eintraege.remove(idx);
                let position = self.sortiert_einfuegen(req);
                return Einfuegen::Aufgewertet { position };
            }
            self.eintraege[idx].transaction_id = req.transaction_id;
            return Einfuegen::Unveraendert {
                position: (idx + 1) as u16,
            };
        }

        if self.ist_voll() {
            return Einfuegen::Voll;
        }
        Einfuegen::Eingereiht {
            position: self.sortiert_einfuegen(req),
        }
    }

    /// Reiht eine Anfrage ohne Groessenpruefung ein
    ///
    /// Verdraengte Halter werden immer wieder eingereiht, auch bei voller
    /// Warteschlange.
    pub fn einfuegen_erzwungen(&mut self, req: FloorRequest) -> u16 {
        if let Some(idx) = self.index_von(req.requester_id) {
            self.eintraege.remove(idx);
        }
        self.sortiert_einfuegen(req)
    }

    fn sortiert_einfuegen(&mut self, req: FloorRequest) -> u16 {
        let idx = self
            .eintraege
            .partition_point(|e| e.rang_vergleich(&req) == Ordering::Less);
        self.eintraege.insert(idx, req);
        (idx + 1) as u16
    }

    /// Entfernt den Eintrag eines Anfragers
    pub fn entfernen(&mut self, requester: DeviceId) -> Option<FloorRequest> {
        let idx = self.index_von(requester)?;
        Some(self.eintraege.remove(idx))
    }

    /// Nimmt die bestplatzierte Anfrage heraus
    pub fn kopf_nehmen(&mut self) -> Option<FloorRequest> {
        if self.eintraege.is_empty() {
            None
        } else {
            Some(self.eintraege.remove(0))
        }
    }

    pub fn kopf(&self) -> Option<&FloorRequest> {
        self.eintraege.first()
    }

    /// Eintrag eines Anfragers
    pub fn eintrag(&self, requester: DeviceId) -> Option<&FloorRequest> {
        self.eintraege.iter().find(|e| e.requester_id == requester)
    }

    /// 1-basierte Position eines Anfragers
    pub fn position(&self, requester: DeviceId) -> Option<u16> {
        self.index_von(requester).map(|i| (i + 1) as u16)
    }

    pub fn enthaelt(&self, requester: DeviceId) -> bool {
        self.index_von(requester).is_some()
    }

    /// Momentaufnahme aller Positionen (fuer Verschiebungs-Benachrichtigungen)
    pub fn positionen(&self) -> HashMap<DeviceId, u16> {
        self.eintraege
            .iter()
            .enumerate()
            .map(|(i, e)| (e.requester_id, (i + 1) as u16))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FloorRequest> {
        self.eintraege.iter()
    }

    pub fn leeren(&mut self) {
        self.eintraege.clear();
    }

    fn index_von(&self, requester: DeviceId) -> Option<usize> {
        self.eintraege
            .iter()
            .position(|e| e.requester_id == requester)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshtalk_core::{Priority, TalkgroupId, Zeitstempel};

    fn anfrage(id: u32, prio: Priority, zeit: u64) -> FloorRequest {
        FloorRequest {
            requester_id: DeviceId(id),
            talkgroup_id: TalkgroupId(1),
            priority: prio,
            is_emergency: false,
            request_time: Zeitstempel(zeit),
            transaction_id: 1,
        }
    }

    #[test]
    fn sortierung_nach_rang() {
        let mut q = FloorQueue::neu(10);
        q.einfuegen(anfrage(1, Priority::Routine, 10));
        q.einfuegen(anfrage(2, Priority::Flash, 20));
        q.einfuegen(anfrage(3, Priority::Routine, 5));
        q.einfuegen(anfrage(4, Priority::Routine, 5));

        let ids: Vec<u32> = q.iter().map(|e| e.requester_id.inner()).collect();
        assert_eq!(ids, vec![2, 3, 4, 1]);
        assert_eq!(q.position(DeviceId(1)), Some(4));
    }

    #[test]
    fn voll_wird_abgelehnt() {
        let mut q = FloorQueue::neu(2);
        q.einfuegen(anfrage(1, Priority::Normal, 0));
        q.einfuegen(anfrage(2, Priority::Normal, 1));
        assert_eq!(q.einfuegen(anfrage(3, Priority::High, 2)), Einfuegen::Voll);
        // Erzwungenes Einfuegen ignoriert das Limit
        assert_eq!(q.einfuegen_erzwungen(anfrage(3, Priority::High, 2)), 1);
        assert_eq!(q.len(), 3);
    }

    #[test]
    fn erneute_anfrage_behaelt_platz() {
        let mut q = FloorQueue::neu(10);
        q.einfuegen(anfrage(1, Priority::Normal, 0));
        q.einfuegen(anfrage(2, Priority::Normal, 1));

        let mut wiederholt = anfrage(1, Priority::Normal, 50);
        wiederholt.transaction_id = 9;
        assert_eq!(
            q.einfuegen(wiederholt),
            Einfuegen::Unveraendert { position: 1 }
        );
        assert_eq!(q.eintrag(DeviceId(1)).map(|e| e.transaction_id), Some(9));
        assert_eq!(q.eintrag(DeviceId(1)).map(|e| e.request_time), Some(Zeitstempel(0)));
    }

    #[test]
    fn hoehere_prioritaet_wertet_auf() {
        let mut q = FloorQueue::neu(10);
        q.einfuegen(anfrage(1, Priority::Normal, 0));
        q.einfuegen(anfrage(2, Priority::Low, 1));
        assert_eq!(
            q.einfuegen(anfrage(2, Priority::High, 2)),
            Einfuegen::Aufgewertet { position: 1 }
        );
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn kopf_und_entfernen() {
        let mut q = FloorQueue::neu(10);
        q.einfuegen(anfrage(1, Priority::Low, 0));
        q.einfuegen(anfrage(2, Priority::High, 1));
        assert_eq!(q.kopf_nehmen().map(|e| e.requester_id), Some(DeviceId(2)));
        assert!(q.entfernen(DeviceId(1)).is_some());
        assert!(q.entfernen(DeviceId(1)).is_none());
        assert!(q.is_empty());
    }
}
