//! Mitgliedschaft in Talkgruppen
//!
//! Discovery und Affiliierung sind externe Bausteine. Der Arbitrator fragt
//! nur, ob ein Anfrager legitimes Mitglied ist.

use dashmap::DashMap;
use meshtalk_core::{DeviceId, TalkgroupId};
use std::collections::HashSet;

/// Auskunft ueber die Mitglieder einer Talkgruppe
pub trait Mitgliedschaft: Send + Sync {
    fn ist_mitglied(&self, talkgroup: TalkgroupId, geraet: DeviceId) -> bool;
}

/// Jedes Geraet ist Mitglied jeder Talkgruppe
#[derive(Debug, Default, Clone, Copy)]
pub struct OffeneMitgliedschaft;

impl Mitgliedschaft for OffeneMitgliedschaft {
    fn ist_mitglied(&self, _talkgroup: TalkgroupId, _geraet: DeviceId) -> bool {
        true
    }
}

/// Explizite Mitgliederlisten pro Talkgruppe
///
/// Talkgruppen ohne Liste sind offen. Kann zur Laufzeit von der Discovery
/// aktualisiert werden.
#[derive(Debug, Default)]
pub struct StatischeMitgliedschaft {
    listen: DashMap<TalkgroupId, HashSet<DeviceId>>,
}

impl StatischeMitgliedschaft {
    pub fn neu() -> Self {
        Self::default()
    }

    /// Setzt die Mitgliederliste einer Talkgruppe
    pub fn setzen(&self, talkgroup: TalkgroupId, mitglieder: impl IntoIterator<Item = DeviceId>) {
        self.listen
            .insert(talkgroup, mitglieder.into_iter().collect());
    }

    pub fn hinzufuegen(&self, talkgroup: TalkgroupId, geraet: DeviceId) {
        self.listen.entry(talkgroup).or_default().insert(geraet);
    }

    pub fn entfernen(&self, talkgroup: TalkgroupId, geraet: DeviceId) {
        if let Some(mut liste) = self.listen.get_mut(&talkgroup) {
            liste.remove(&geraet);
        }
    }
}

impl Mitgliedschaft for StatischeMitgliedschaft {
    fn ist_mitglied(&self, talkgroup: TalkgroupId, geraet: DeviceId) -> bool {
        match self.listen.get(&talkgroup) {
            Some(liste) => liste.contains(&geraet),
            None => true,
        }
    }
}
