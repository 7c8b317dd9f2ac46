//! Zuordnung empfangener RTP-Streams zu Floor-Haltern
//!
//! Der RTP-Header traegt keine Geraete-ID, nur die SSRC. Ein Knoten mit
//! Arbitrator-Rolle braucht die Zuordnung, um Audio-Aktivitaet dem richtigen
//! Halter gutzuschreiben. Eine neue SSRC geht an den ersten entfernten
//! Halter (in Gewaehrungsreihenfolge), von dem gerade kein Stream zu hoeren
//! ist. Streams von Geraeten ohne Floor werden nicht gezaehlt.

use meshtalk_core::{DeviceId, Zeitstempel};
use std::collections::HashMap;

/// Ohne Pakete fuer diese Zeit gilt ein Stream als verstummt
pub const VERSTUMMT_MS: u64 = 2_000;

/// Zuordnungen von Geraeten ohne Floor werden danach vergessen
pub const VERGESSEN_MS: u64 = 60_000;

#[derive(Debug, Clone, Copy)]
struct Strom {
    geraet: DeviceId,
    zuletzt: Zeitstempel,
}

#[derive(Debug)]
pub struct SprecherZuordnung {
    lokal: DeviceId,
    eigene_ssrc: u32,
    stroeme: HashMap<u32, Strom>,
}

impl SprecherZuordnung {
    pub fn neu(lokal: DeviceId, eigene_ssrc: u32) -> Self {
        Self {
            lokal,
            eigene_ssrc,
            stroeme: HashMap::new(),
        }
    }

    /// Halter, dem ein Paket mit `ssrc` zuzurechnen ist
    ///
    /// `halter` in Gewaehrungsreihenfolge. `None` fuer eigene Pakete und
    /// fuer Streams, die keinem Halter zugeordnet werden koennen.
    pub fn zuordnen(
        &mut self,
        ssrc: u32,
        halter: &[DeviceId],
        now: Zeitstempel,
    ) -> Option<DeviceId> {
        if ssrc == self.eigene_ssrc {
            return None;
        }
        self.stroeme
            .retain(|_, s| halter.contains(&s.geraet) || now.ms_seit(s.zuletzt) < VERGESSEN_MS);

        if let Some(strom) = self.stroeme.get_mut(&ssrc) {
            if halter.contains(&strom.geraet) {
                strom.zuletzt = now;
                return Some(strom.geraet);
            }
        }

        // Unbekannte SSRC oder ihr Geraet haelt den Floor nicht mehr
        let lokal = self.lokal;
        let stroeme = &self.stroeme;
        let zu_hoeren = |geraet: DeviceId| {
            stroeme.iter().any(|(andere, s)| {
                *andere != ssrc && s.geraet == geraet && now.ms_seit(s.zuletzt) < VERSTUMMT_MS
            })
        };
        let mut offen = halter
            .iter()
            .copied()
            .filter(|g| *g != lokal && !zu_hoeren(*g));
        let geraet = offen.next()?;
        let mehrdeutig = offen.next().is_some();

        if mehrdeutig {
            tracing::debug!(ssrc, geraet = %geraet, "Mehrere Halter ohne Stream, erster gewaehlt");
        } else {
            tracing::trace!(ssrc, geraet = %geraet, "Stream zugeordnet");
        }
        self.stroeme.insert(ssrc, Strom { geraet, zuletzt: now });
        Some(geraet)
    }

    /// Anzahl bekannter Streams
    pub fn anzahl(&self) -> usize {
        self.stroeme.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOKAL: DeviceId = DeviceId(1);
    const EIGENE: u32 = 0xE1;

    fn zuordnung() -> SprecherZuordnung {
        SprecherZuordnung::neu(LOKAL, EIGENE)
    }

    fn t(ms: u64) -> Zeitstempel {
        Zeitstempel(ms)
    }

    #[test]
    fn eigene_pakete_zaehlen_nicht() {
        let mut z = zuordnung();
        assert_eq!(z.zuordnen(EIGENE, &[LOKAL, DeviceId(2)], t(0)), None);
        assert_eq!(z.anzahl(), 0);
    }

    #[test]
    fn ohne_halter_keine_zuordnung() {
        let mut z = zuordnung();
        assert_eq!(z.zuordnen(10, &[], t(0)), None);
        assert_eq!(z.zuordnen(10, &[LOKAL], t(0)), None);
    }

    #[test]
    fn streams_in_gewaehrungsreihenfolge() {
        let mut z = zuordnung();
        let halter = [LOKAL, DeviceId(2), DeviceId(3)];
        assert_eq!(z.zuordnen(10, &halter, t(0)), Some(DeviceId(2)));
        assert_eq!(z.zuordnen(11, &halter, t(5)), Some(DeviceId(3)));
        assert_eq!(z.zuordnen(10, &halter, t(20)), Some(DeviceId(2)));
        // Alle Halter haben einen Stream
        assert_eq!(z.zuordnen(12, &halter, t(25)), None);
    }

    #[test]
    fn spaete_pakete_des_vorgaengers_zaehlen_nicht_fuer_den_nachfolger() {
        let mut z = zuordnung();
        assert_eq!(z.zuordnen(10, &[DeviceId(2)], t(0)), Some(DeviceId(2)));

        // Geraet 2 hat freigegeben, Geraet 3 spricht
        assert_eq!(z.zuordnen(20, &[DeviceId(3)], t(100)), Some(DeviceId(3)));
        assert_eq!(z.zuordnen(10, &[DeviceId(3)], t(120)), None);
        assert_eq!(z.zuordnen(20, &[DeviceId(3)], t(140)), Some(DeviceId(3)));
    }

    #[test]
    fn neue_ssrc_nach_verstummen() {
        let mut z = zuordnung();
        assert_eq!(z.zuordnen(10, &[DeviceId(2)], t(0)), Some(DeviceId(2)));
        assert_eq!(z.zuordnen(11, &[DeviceId(2)], t(100)), None);
        // Alter Stream ist verstummt, etwa nach einem Neustart des Geraets
        assert_eq!(z.zuordnen(11, &[DeviceId(2)], t(VERSTUMMT_MS + 100)), Some(DeviceId(2)));
    }

    #[test]
    fn zuordnungen_ohne_floor_werden_vergessen() {
        let mut z = zuordnung();
        z.zuordnen(10, &[DeviceId(2)], t(0));
        assert_eq!(z.anzahl(), 1);
        assert_eq!(z.zuordnen(30, &[], t(VERGESSEN_MS)), None);
        assert_eq!(z.anzahl(), 0);
    }
}
