//! Adaptiver Jitter Buffer fuer RTP-Audio
//!
//! Ordnet eingehende Pakete nach (wrap-bewusst erweiterter) Sequenznummer
//! und gibt sie im Frame-Takt wieder aus. Ein Produzent (Netzwerk-Empfang)
//! ruft `put()`, ein Konsument (Wiedergabe-Schleife) ruft `poll()`.
//!
//! ## Ablauf
//! - **Vorpuffern**: nach dem Start, nach `clear()` und nach einem langen
//!   Unterlauf wartet der Buffer, bis das erste Paket `tiefe_ms` alt ist.
//!   Die Zieltiefe wirkt damit zu Beginn jedes Sprechdurchgangs.
//! - **Wiedergabe**: `poll()` liefert das erwartete Paket. Fehlt es, liegen
//!   aber spaetere Pakete vor, wird die Luecke uebersprungen und als
//!   [`VerlustEreignis`] in eine Abholschlange gelegt (`drain_verluste`).
//! - **Unterlauf**: leerer Buffer ergibt `None`, der Wiedergabepunkt
//!   rueckt um einen Frame vor. Nach `max_depth_ms` Unterlauf am Stueck
//!   wird neu vorgepuffert.
//!
//! ## Jitter
//! Gleitender Mittelwert (1/16) der Abweichung zwischen tatsaechlichem und
//! erwartetem Ankunftsabstand. Zieltiefe = `min_depth + 2 * jitter`,
//! begrenzt auf `[min_depth, max_depth]`. Waechst sofort, schrumpft erst
//! nach anhaltend niedrigem Jitter um einen Frame.

use meshtalk_core::{Uhr, Zeitstempel};
use meshtalk_protocol::rtp::{seq_abstand, RtpPacket};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

/// Startwert der erweiterten Sequenz (Platz fuer Pakete vor dem ersten)
const ERWEITERT_BASIS: u64 = 1 << 32;

/// Messungen mit niedrigem Jitter bevor die Tiefe um einen Frame schrumpft
const SCHRUMPF_SCHWELLE: u32 = 50;

/// Anzahl gemerkter abgespielter Sequenzen fuer die Duplikat-Erkennung
const ABGESPIELT_FENSTER: usize = 64;

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Konfiguration fuer den Jitter Buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JitterBufferConfig {
    /// Dauer eines Audio-Frames
    pub frame_time_ms: u64,
    /// Minimale Puffertiefe
    pub min_depth_ms: u64,
    /// Maximale Puffertiefe
    pub max_depth_ms: u64,
}

impl Default for JitterBufferConfig {
    fn default() -> Self {
        Self {
            frame_time_ms: 20,
            min_depth_ms: 20,
            max_depth_ms: 100,
        }
    }
}

impl JitterBufferConfig {
    /// Maximale Anzahl gepufferter Pakete (doppelte Maximaltiefe)
    fn kapazitaet(&self) -> usize {
        ((2 * self.max_depth_ms) / self.frame_time_ms.max(1)).max(1) as usize
    }
}

// ---------------------------------------------------------------------------
// Verlust und Statistik
// ---------------------------------------------------------------------------

/// Erkannte Luecke: `count` Frames nach `last_sequence` fehlen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerlustEreignis {
    pub count: u32,
    pub last_sequence: u16,
}

/// Statistiken des Jitter Buffers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JitterBufferStatistik {
    pub empfangen: u64,
    pub abgespielt: u64,
    pub duplikate: u64,
    /// Nach ihrer Abspielfrist angekommen (getrennt von echtem Verlust)
    pub verspaetet: u64,
    /// Nie angekommen (Luecken)
    pub verloren: u64,
    /// Wegen vollem Buffer verworfen
    pub ueberlauf: u64,
    pub unterlaeufe: u64,
    pub ssrc_wechsel: u64,
    pub jitter_ms: f64,
    pub tiefe_ms: u64,
    pub fuellstand: usize,
}

// ---------------------------------------------------------------------------
// AdaptiveJitterBuffer
// ---------------------------------------------------------------------------

/// Adaptiver Jitter Buffer fuer einen Audio-Strom
pub struct AdaptiveJitterBuffer {
    config: JitterBufferConfig,
    uhr: Arc<dyn Uhr>,
    pakete: BTreeMap<u64, RtpPacket>,
    ssrc: Option<u32>,
    /// Erweiterte Sequenz des naechsten abzuspielenden Pakets (`None` = Vorpuffern)
    naechste: Option<u64>,
    /// Hoechste bisher gesehene erweiterte Sequenz (Referenz fuer Wrap-Erkennung)
    hoechste: Option<u64>,
    abgespielt: VecDeque<u64>,
    unterlauf_ms: u64,
    letzte_ankunft: Option<(u64, Zeitstempel)>,
    jitter_ms: f64,
    tiefe_ms: u64,
    niedrig_zaehler: u32,
    verluste: VecDeque<VerlustEreignis>,
    statistik: JitterBufferStatistik,
}

impl AdaptiveJitterBuffer {
    pub fn neu(config: JitterBufferConfig, uhr: Arc<dyn Uhr>) -> Self {
        let tiefe_ms = config.min_depth_ms;
        Self {
            config,
            uhr,
            pakete: BTreeMap::new(),
            ssrc: None,
            naechste: None,
            hoechste: None,
            abgespielt: VecDeque::with_capacity(ABGESPIELT_FENSTER),
            unterlauf_ms: 0,
            letzte_ankunft: None,
            jitter_ms: 0.0,
            tiefe_ms,
            niedrig_zaehler: 0,
            verluste: VecDeque::new(),
            statistik: JitterBufferStatistik {
                tiefe_ms,
                ..Default::default()
            },
        }
    }

    /// Fuegt ein empfangenes Paket ein
    ///
    /// Verwirft Duplikate und Pakete hinter dem Wiedergabepunkt. Ein
    /// SSRC-Wechsel (neuer Sprecher) setzt den Strom zurueck.
    pub fn put(&mut self, paket: RtpPacket) {
        self.statistik.empfangen += 1;

        if let Some(ssrc) = self.ssrc {
            if ssrc != paket.ssrc {
                tracing::debug!(alt = ssrc, neu = paket.ssrc, "SSRC-Wechsel, Strom zurueckgesetzt");
                self.strom_zuruecksetzen();
                self.statistik.ssrc_wechsel += 1;
            }
        }
        self.ssrc = Some(paket.ssrc);

        let seq = self.erweitern(paket.sequence_number);

        if let Some(naechste) = self.naechste {
            if seq < naechste {
                if self.abgespielt.contains(&seq) {
                    self.statistik.duplikate += 1;
                    tracing::trace!(sequenz = paket.sequence_number, "Duplikat verworfen");
                } else {
                    self.statistik.verspaetet += 1;
                    tracing::debug!(
                        sequenz = paket.sequence_number,
                        rueckstand = naechste - seq,
                        "Verspaetetes Paket verworfen"
                    );
                }
                return;
            }
        }

        if self.pakete.contains_key(&seq) {
            self.statistik.duplikate += 1;
            tracing::trace!(sequenz = paket.sequence_number, "Duplikat verworfen");
            return;
        }

        self.jitter_messen(seq, paket.arrival_time);
        self.hoechste = Some(self.hoechste.map_or(seq, |h| h.max(seq)));
        self.pakete.insert(seq, paket);

        while self.pakete.len() > self.config.kapazitaet() {
            if let Some((aelteste, _)) = self.pakete.pop_first() {
                self.statistik.ueberlauf += 1;
                tracing::warn!(sequenz = aelteste as u16, "Buffer-Ueberlauf: aeltestes Paket verworfen");
                // Verworfene Pakete zaehlen nicht als Luecke
                if let (Some(naechste), Some((&erste, _))) = (self.naechste, self.pakete.first_key_value()) {
                    if naechste <= aelteste {
                        self.naechste = Some(erste);
                    }
                }
            }
        }

        self.statistik.fuellstand = self.pakete.len();
    }

    /// Naechstes faelliges Paket oder `None` (Vorpuffern bzw. Unterlauf)
    ///
    /// Blockiert nie. Bei `None` im laufenden Strom soll der Aufrufer einen
    /// Concealment-Frame erzeugen.
    pub fn poll(&mut self) -> Option<RtpPacket> {
        let naechste = match self.naechste {
            Some(n) => n,
            None => {
                let (&erste, paket) = self.pakete.first_key_value()?;
                if self.uhr.jetzt().ms_seit(paket.arrival_time) < self.tiefe_ms {
                    return None;
                }
                tracing::trace!(tiefe_ms = self.tiefe_ms, "Vorpuffern abgeschlossen");
                self.naechste = Some(erste);
                erste
            }
        };

        if let Some(paket) = self.pakete.remove(&naechste) {
            return Some(self.abspielen(naechste, paket));
        }

        match self.pakete.pop_first() {
            Some((seq, paket)) => {
                // Luecke ueberspringen und melden
                let count = (seq - naechste) as u32;
                let verlust = VerlustEreignis {
                    count,
                    last_sequence: naechste.wrapping_sub(1) as u16,
                };
                self.statistik.verloren += count as u64;
                tracing::debug!(
                    count,
                    letzte = verlust.last_sequence,
                    "Paketverlust erkannt"
                );
                self.verluste.push_back(verlust);
                Some(self.abspielen(seq, paket))
            }
            None => {
                self.statistik.unterlaeufe += 1;
                self.naechste = Some(naechste + 1);
                self.unterlauf_ms += self.config.frame_time_ms;
                if self.unterlauf_ms >= self.config.max_depth_ms {
                    tracing::trace!("Anhaltender Unterlauf, puffere neu vor");
                    self.naechste = None;
                    self.unterlauf_ms = 0;
                }
                None
            }
        }
    }

    /// Paket, das `poll()` als naechstes liefern wuerde (ohne Faelligkeit)
    pub fn peek(&self) -> Option<&RtpPacket> {
        self.pakete.values().next()
    }

    /// Aktuelle Zieltiefe in Millisekunden
    pub fn get_depth(&self) -> u64 {
        self.tiefe_ms
    }

    /// Geschaetzter Jitter in Millisekunden
    pub fn get_jitter(&self) -> f64 {
        self.jitter_ms
    }

    /// Anzahl gepufferter Pakete
    pub fn fuellstand(&self) -> usize {
        self.pakete.len()
    }

    /// Verwirft alle gepufferten Pakete und puffert neu vor
    ///
    /// Jitter-Schaetzung, Tiefe und Statistik bleiben erhalten.
    pub fn clear(&mut self) {
        self.pakete.clear();
        self.naechste = None;
        self.unterlauf_ms = 0;
        self.statistik.fuellstand = 0;
    }

    /// Vollstaendiger Neustart (inklusive Statistik)
    pub fn reset(&mut self) {
        self.strom_zuruecksetzen();
        self.ssrc = None;
        self.jitter_ms = 0.0;
        self.tiefe_ms = self.config.min_depth_ms;
        self.niedrig_zaehler = 0;
        self.statistik = JitterBufferStatistik {
            tiefe_ms: self.tiefe_ms,
            ..Default::default()
        };
    }

    /// Holt alle seit dem letzten Aufruf erkannten Verluste ab
    pub fn drain_verluste(&mut self) -> Vec<VerlustEreignis> {
        self.verluste.drain(..).collect()
    }

    pub fn statistik(&self) -> &JitterBufferStatistik {
        &self.statistik
    }

    pub fn config(&self) -> &JitterBufferConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Interne Hilfsfunktionen
    // -----------------------------------------------------------------------

    fn abspielen(&mut self, seq: u64, paket: RtpPacket) -> RtpPacket {
        self.naechste = Some(seq + 1);
        self.unterlauf_ms = 0;
        if self.abgespielt.len() == ABGESPIELT_FENSTER {
            self.abgespielt.pop_front();
        }
        self.abgespielt.push_back(seq);
        self.statistik.abgespielt += 1;
        self.statistik.fuellstand = self.pakete.len();
        paket
    }

    /// Erweitert eine 16-Bit-Sequenz relativ zur hoechsten bekannten
    fn erweitern(&self, seq: u16) -> u64 {
        match self.hoechste {
            None => ERWEITERT_BASIS + seq as u64,
            Some(referenz) => {
                let abstand = seq_abstand(seq, referenz as u16) as i64;
                (referenz as i64 + abstand) as u64
            }
        }
    }

    fn strom_zuruecksetzen(&mut self) {
        self.pakete.clear();
        self.naechste = None;
        self.hoechste = None;
        self.abgespielt.clear();
        self.unterlauf_ms = 0;
        self.letzte_ankunft = None;
        self.verluste.clear();
        self.statistik.fuellstand = 0;
    }

    fn jitter_messen(&mut self, seq: u64, ankunft: Zeitstempel) {
        if let Some((vorher_seq, vorher_ankunft)) = self.letzte_ankunft {
            let ankunft_abstand = ankunft.als_ms() as f64 - vorher_ankunft.als_ms() as f64;
            let erwartet = (seq as f64 - vorher_seq as f64) * self.config.frame_time_ms as f64;
            let abweichung = (ankunft_abstand - erwartet).abs();
            self.jitter_ms += (abweichung - self.jitter_ms) / 16.0;
            self.statistik.jitter_ms = self.jitter_ms;
            self.tiefe_anpassen();
        }
        self.letzte_ankunft = Some((seq, ankunft));
    }

    fn tiefe_anpassen(&mut self) {
        let ziel = (self.config.min_depth_ms as f64 + 2.0 * self.jitter_ms).ceil() as u64;
        let ziel = ziel.clamp(self.config.min_depth_ms, self.config.max_depth_ms);

        if ziel > self.tiefe_ms {
            tracing::debug!(alt = self.tiefe_ms, neu = ziel, "Puffertiefe erhoeht");
            self.tiefe_ms = ziel;
            self.niedrig_zaehler = 0;
        } else if ziel + self.config.frame_time_ms <= self.tiefe_ms {
            self.niedrig_zaehler += 1;
            if self.niedrig_zaehler >= SCHRUMPF_SCHWELLE {
                self.tiefe_ms = self
                    .tiefe_ms
                    .saturating_sub(self.config.frame_time_ms)
                    .max(ziel);
                self.niedrig_zaehler = 0;
                tracing::debug!(neu = self.tiefe_ms, "Puffertiefe verringert");
            }
        } else {
            self.niedrig_zaehler = 0;
        }
        self.statistik.tiefe_ms = self.tiefe_ms;
    }
}

/// Zwischen Empfangs-Task (`put`) und Wiedergabe-Task (`poll`) geteilter Buffer
pub type GeteilterJitterBuffer = Arc<Mutex<AdaptiveJitterBuffer>>;

pub fn geteilt(buffer: AdaptiveJitterBuffer) -> GeteilterJitterBuffer {
    Arc::new(Mutex::new(buffer))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
