//! Aufbereitung der Aufnahme vor dem Kodieren
//!
//! Zwei Bausteine, beide frame-weise auf 16-Bit-PCM:
//!
//! - [`Vad`]: Sprachaktivitaet aus geglaetteter Energie und
//!   Zero-Crossing-Rate. Die Schwelle folgt einem geschaetzten Rauschpegel,
//!   ein Hangover ueberbrueckt kurze Pausen.
//! - [`NoiseGate`]: daempft Signal unterhalb einer Schwelle um
//!   `unterdrueckung_db`. Hysterese zwischen Oeffnen und Schliessen,
//!   Gain mit Attack/Release geglaettet.
//!
//! Der Sendepfad verwirft Frames ohne Sprache (kein Paket, keine
//! Floor-Aktivitaet) und schickt die uebrigen durch das Gate.

use serde::{Deserialize, Serialize};

/// Vollausschlag von 16-Bit-PCM
const PCM_VOLL: f32 = 32_768.0;

/// Gewicht eines stillen Frames in der Rauschpegel-Schaetzung
const RAUSCH_NACHFUEHRUNG: f32 = 0.05;

/// Abstand der Sprachschwelle zum Rauschpegel (etwa 6 dB)
const RAUSCH_ABSTAND: f32 = 2.0;

/// Gemeinsame Schnittstelle der Aufbereitungsstufen
pub trait Aufbereitung: Send {
    /// Verarbeitet einen Frame in-place
    fn verarbeiten(&mut self, samples: &mut [i16]);

    /// Setzt den Zustand fuer einen neuen Sprechdurchgang zurueck
    fn zuruecksetzen(&mut self);

    fn ist_aktiv(&self) -> bool;
}

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Parameter der Sprachaktivitaetserkennung
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    pub aktiv: bool,
    /// 0 (unempfindlich) bis 3 (empfindlich)
    pub aggressivitaet: u8,
    /// Untergrenze der Energie-Schwelle (RMS, normiert auf 0.0..1.0)
    pub energie_schwelle: f32,
    /// Frames mit hoeherer Zero-Crossing-Rate gelten als Rauschen
    pub zcr_schwelle: f32,
    /// Frames die nach der letzten Sprache noch als aktiv gelten
    pub hangover_frames: u32,
    /// Glaettung der Energie (0.0 = keine)
    pub glaettung: f32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            aktiv: false,
            aggressivitaet: 2,
            energie_schwelle: 0.002,
            zcr_schwelle: 0.35,
            hangover_frames: 15,
            glaettung: 0.5,
        }
    }
}

impl VadConfig {
    /// Faktor auf die Schwelle; hoehere Aggressivitaet senkt sie
    fn schwellen_faktor(&self) -> f32 {
        match self.aggressivitaet {
            0 => 2.0,
            1 => 1.5,
            2 => 1.0,
            _ => 0.7,
        }
    }
}

/// Parameter des Noise Gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseGateConfig {
    pub aktiv: bool,
    /// Oeffnungs-Schwelle in dBFS
    pub oeffnen_db: f32,
    /// Schliess-Schwelle in dBFS (unterhalb von `oeffnen_db`)
    pub schliessen_db: f32,
    /// Daempfung bei geschlossenem Gate (0 bis 45 dB)
    pub unterdrueckung_db: f32,
    pub attack_ms: f32,
    pub release_ms: f32,
    pub abtastrate: u32,
}

impl Default for NoiseGateConfig {
    fn default() -> Self {
        Self {
            aktiv: false,
            oeffnen_db: -45.0,
            schliessen_db: -50.0,
            unterdrueckung_db: 25.0,
            attack_ms: 5.0,
            release_ms: 100.0,
            abtastrate: 16_000,
        }
    }
}

/// Aufbereitung der Aufnahme (Abschnitt `[aufbereitung]` der Konfiguration)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AufbereitungConfig {
    pub vad: VadConfig,
    pub noise_gate: NoiseGateConfig,
}

impl AufbereitungConfig {
    pub fn validieren(&self) -> Result<(), String> {
        if self.vad.aggressivitaet > 3 {
            return Err(format!(
                "vad.aggressivitaet muss zwischen 0 und 3 liegen: {}",
                self.vad.aggressivitaet
            ));
        }
        if !(0.0..1.0).contains(&self.vad.glaettung) {
            return Err(format!("vad.glaettung ausserhalb von [0, 1): {}", self.vad.glaettung));
        }
        let g = &self.noise_gate;
        if g.schliessen_db > g.oeffnen_db {
            return Err(format!(
                "noise_gate.schliessen_db ({}) liegt ueber oeffnen_db ({})",
                g.schliessen_db, g.oeffnen_db
            ));
        }
        if !(0.0..=45.0).contains(&g.unterdrueckung_db) {
            return Err(format!(
                "noise_gate.unterdrueckung_db muss zwischen 0 und 45 liegen: {}",
                g.unterdrueckung_db
            ));
        }
        if g.abtastrate == 0 {
            return Err("noise_gate.abtastrate darf nicht 0 sein".into());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Vad
// ---------------------------------------------------------------------------

/// Voice Activity Detector
pub struct Vad {
    config: VadConfig,
    geglaettet: f32,
    /// Geschaetzter Rauschpegel (RMS), nachgefuehrt in stillen Frames
    rauschpegel: f32,
    hangover: u32,
    sprache: bool,
}

impl Vad {
    pub fn neu(config: VadConfig) -> Self {
        Self {
            config,
            geglaettet: 0.0,
            rauschpegel: 0.0,
            hangover: 0,
            sprache: false,
        }
    }

    /// Analysiert einen Frame; veraendert die Samples nicht
    ///
    /// Deaktiviert gilt jeder Frame als Sprache.
    pub fn erkennen(&mut self, samples: &[i16]) -> bool {
        if !self.config.aktiv {
            return true;
        }
        if samples.is_empty() {
            return self.sprache;
        }

        let energie = rms(samples);
        let g = self.config.glaettung;
        self.geglaettet = g * self.geglaettet + (1.0 - g) * energie;

        let schwelle = self.schwelle();
        let laut = self.geglaettet > schwelle;
        // Sprache hat eine moderate ZCR, breitbandiges Rauschen eine hohe
        let plausibel = zero_crossing_rate(samples) < self.config.zcr_schwelle;

        if laut && plausibel {
            self.hangover = self.config.hangover_frames;
            self.sprache = true;
        } else if self.hangover > 0 {
            self.hangover -= 1;
            self.sprache = true;
        } else {
            self.sprache = false;
            self.rauschpegel = if self.rauschpegel == 0.0 {
                energie
            } else {
                (1.0 - RAUSCH_NACHFUEHRUNG) * self.rauschpegel + RAUSCH_NACHFUEHRUNG * energie
            };
        }
        self.sprache
    }

    pub fn ist_sprache(&self) -> bool {
        self.sprache
    }

    /// Aktuelle Entscheidungsschwelle (RMS, normiert)
    pub fn schwelle(&self) -> f32 {
        self.config
            .energie_schwelle
            .max(self.rauschpegel * RAUSCH_ABSTAND)
            * self.config.schwellen_faktor()
    }

    pub fn rauschpegel(&self) -> f32 {
        self.rauschpegel
    }
}

impl Aufbereitung for Vad {
    fn verarbeiten(&mut self, samples: &mut [i16]) {
        self.erkennen(samples);
    }

    /// Der Rauschpegel bleibt ueber Sprechdurchgaenge erhalten
    fn zuruecksetzen(&mut self) {
        self.geglaettet = 0.0;
        self.hangover = 0;
        self.sprache = false;
    }

    fn ist_aktiv(&self) -> bool {
        self.config.aktiv
    }
}

// ---------------------------------------------------------------------------
// NoiseGate
// ---------------------------------------------------------------------------

/// Noise Gate mit Hysterese und geglaettetem Gain
pub struct NoiseGate {
    config: NoiseGateConfig,
    offen: bool,
    gain: f32,
    /// Gain bei geschlossenem Gate
    boden: f32,
    oeffnen: f32,
    schliessen: f32,
    attack: f32,
    release: f32,
}

impl NoiseGate {
    pub fn neu(config: NoiseGateConfig) -> Self {
        let boden = db_zu_linear(-config.unterdrueckung_db);
        Self {
            offen: false,
            gain: boden,
            boden,
            oeffnen: db_zu_linear(config.oeffnen_db),
            schliessen: db_zu_linear(config.schliessen_db),
            attack: zeit_zu_koeffizient(config.attack_ms, config.abtastrate),
            release: zeit_zu_koeffizient(config.release_ms, config.abtastrate),
            config,
        }
    }

    pub fn ist_offen(&self) -> bool {
        self.offen
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }
}

impl Aufbereitung for NoiseGate {
    fn verarbeiten(&mut self, samples: &mut [i16]) {
        if !self.config.aktiv || samples.is_empty() {
            return;
        }

        // Entscheidung pro Frame, Gain-Verlauf pro Sample
        let pegel = rms(samples);
        if self.offen {
            if pegel < self.schliessen {
                self.offen = false;
            }
        } else if pegel >= self.oeffnen {
            self.offen = true;
        }
        let ziel = if self.offen { 1.0 } else { self.boden };

        for sample in samples.iter_mut() {
            if self.gain == ziel && ziel == 1.0 {
                break;
            }
            let k = if ziel > self.gain { self.attack } else { self.release };
            self.gain = k * self.gain + (1.0 - k) * ziel;
            if (self.gain - ziel).abs() < 1e-4 {
                self.gain = ziel;
            }
            *sample = (*sample as f32 * self.gain).round() as i16;
        }
    }

    fn zuruecksetzen(&mut self) {
        self.offen = false;
        self.gain = self.boden;
    }

    fn ist_aktiv(&self) -> bool {
        self.config.aktiv
    }
}

// ---------------------------------------------------------------------------
// Hilfen
// ---------------------------------------------------------------------------

/// RMS eines Frames, normiert auf 0.0..1.0
pub fn rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let summe: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    ((summe / samples.len() as f64).sqrt() / PCM_VOLL as f64) as f32
}

/// Anteil der Vorzeichenwechsel zwischen benachbarten Samples
pub fn zero_crossing_rate(samples: &[i16]) -> f32 {
    if samples.len() < 2 {
        return 0.0;
    }
    let wechsel = samples
        .windows(2)
        .filter(|w| (w[0] >= 0) != (w[1] >= 0))
        .count();
    wechsel as f32 / (samples.len() - 1) as f32
}

fn db_zu_linear(db: f32) -> f32 {
    10.0f32.powf(db / 20.0)
}

fn zeit_zu_koeffizient(ms: f32, abtastrate: u32) -> f32 {
    if ms <= 0.0 || abtastrate == 0 {
        return 0.0;
    }
    (-1000.0 / (ms * abtastrate as f32)).exp()
}
