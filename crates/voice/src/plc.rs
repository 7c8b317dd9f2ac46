//! Wiedergabe-Takt mit Packet Loss Concealment (PLC)
//!
//! Zieht pro Frame-Takt ein Paket aus dem Jitter Buffer, dekodiert es und
//! ersetzt fehlende Frames durch Concealment des Codecs.
//!
//! ## Strategien
//! 1. **Luecke vor einem Paket**: der Buffer meldet `count` verlorene Frames,
//!    dafuer werden bis zu `max_concealment` PLC-Frames vor dem Paket
//!    eingefuegt.
//! 2. **Unterlauf im laufenden Strom**: ein PLC-Frame pro Takt, bis
//!    `max_concealment` erreicht ist.
//! 3. **Stille**: danach gilt der Sprechdurchgang als beendet, der Takt
//!    liefert keine Frames mehr.
//! 4. **Dekodierfehler**: der Frame wird wie ein Verlust behandelt.

use crate::jitter_buffer::{AdaptiveJitterBuffer, VerlustEreignis};
use meshtalk_protocol::codec::{AudioCodec, PcmFrame};
use meshtalk_protocol::rtp::RtpPacket;

/// Standard: hoechstens 5 Concealment-Frames (100 ms) am Stueck
pub const STANDARD_MAX_CONCEALMENT: u32 = 5;

// ---------------------------------------------------------------------------
// Statistiken
// ---------------------------------------------------------------------------

/// Wiedergabe-Statistiken
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WiedergabeStatistik {
    /// Regulaer dekodierte Frames
    pub dekodiert: u64,
    /// Durch PLC ersetzte Frames (Verlust und Unterlauf)
    pub concealment: u64,
    /// Frames die der Codec nicht dekodieren konnte
    pub dekodierfehler: u64,
    /// Gemeldete Verluste ueber der Concealment-Grenze (nicht ersetzt)
    pub uebersprungen: u64,
}

impl WiedergabeStatistik {
    /// Anteil ersetzter Frames (0.0–1.0)
    pub fn concealment_rate(&self) -> f64 {
        let gesamt = self.dekodiert + self.concealment;
        if gesamt == 0 {
            0.0
        } else {
            self.concealment as f64 / gesamt as f64
        }
    }
}

// ---------------------------------------------------------------------------
// Wiedergabe
// ---------------------------------------------------------------------------

/// Wiedergabe-Pfad eines Empfangsstroms (nach dem Jitter Buffer)
///
/// Nicht thread-safe, gehoert dem Wiedergabe-Task.
pub struct Wiedergabe {
    codec: Box<dyn AudioCodec>,
    max_concealment: u32,
    /// Strom laeuft (mindestens ein Frame seit der letzten Stille)
    aktiv: bool,
    unterlauf_folge: u32,
    statistik: WiedergabeStatistik,
}

impl Wiedergabe {
    pub fn neu(codec: Box<dyn AudioCodec>, max_concealment: u32) -> Self {
        Self {
            codec,
            max_concealment,
            aktiv: false,
            unterlauf_folge: 0,
            statistik: WiedergabeStatistik::default(),
        }
    }

    /// Ein Wiedergabe-Takt direkt am Buffer
    ///
    /// Liefert die Frames in Abspielreihenfolge: normalerweise genau einen,
    /// nach einer Luecke zusaetzlich die Concealment-Frames davor, bei
    /// Stille keinen.
    pub fn takt(&mut self, buffer: &mut AdaptiveJitterBuffer) -> Vec<PcmFrame> {
        let paket = buffer.poll();
        let verluste = buffer.drain_verluste();
        self.verarbeiten(paket, verluste)
    }

    /// Ein Wiedergabe-Takt mit bereits entnommenem Paket
    ///
    /// Erlaubt das Dekodieren ausserhalb der Buffer-Sperre.
    pub fn verarbeiten(
        &mut self,
        paket: Option<RtpPacket>,
        verluste: Vec<VerlustEreignis>,
    ) -> Vec<PcmFrame> {
        let mut frames = Vec::new();

        match paket {
            Some(paket) => {
                for verlust in verluste {
                    let ersetzen = verlust.count.min(self.max_concealment);
                    self.statistik.uebersprungen += (verlust.count - ersetzen) as u64;
                    for _ in 0..ersetzen {
                        frames.push(self.concealment());
                    }
                }

                match self.codec.decode(&paket.payload) {
                    Some(frame) => {
                        self.statistik.dekodiert += 1;
                        frames.push(frame);
                    }
                    None => {
                        self.statistik.dekodierfehler += 1;
                        tracing::debug!(
                            sequenz = paket.sequence_number,
                            bytes = paket.payload.len(),
                            "Frame nicht dekodierbar, ersetze durch PLC"
                        );
                        frames.push(self.concealment());
                    }
                }
                self.aktiv = true;
                self.unterlauf_folge = 0;
            }
            None if self.aktiv => {
                self.unterlauf_folge += 1;
                if self.unterlauf_folge > self.max_concealment {
                    tracing::trace!("Sprechdurchgang beendet, Wiedergabe still");
                    self.aktiv = false;
                } else {
                    frames.push(self.concealment());
                }
            }
            None => {}
        }

        frames
    }

    /// Laeuft gerade ein Strom?
    pub fn ist_aktiv(&self) -> bool {
        self.aktiv
    }

    /// Sofort auf Stille umschalten (z.B. beim eigenen Senden)
    pub fn stummschalten(&mut self) {
        self.aktiv = false;
        self.unterlauf_folge = 0;
    }

    pub fn samples_pro_frame(&self) -> usize {
        self.codec.samples_pro_frame()
    }

    pub fn statistik(&self) -> &WiedergabeStatistik {
        &self.statistik
    }

    fn concealment(&mut self) -> PcmFrame {
        self.statistik.concealment += 1;
        self.codec.decode_plc()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jitter_buffer::JitterBufferConfig;
    use bytes::Bytes;
    use meshtalk_core::{TestUhr, Zeitstempel};
    use meshtalk_protocol::codec::PcmCodec;
    use std::sync::Arc;

    const SAMPLES: usize = 4;

    fn frame_bytes(wert: i16) -> Bytes {
        let mut v = Vec::new();
        for _ in 0..SAMPLES {
            v.extend_from_slice(&wert.to_be_bytes());
        }
        Bytes::from(v)
    }

    fn paket(seq: u16, wert: i16, ankunft: u64) -> RtpPacket {
        RtpPacket {
            sequence_number: seq,
            timestamp: seq as u32 * SAMPLES as u32,
            ssrc: 7,
            marker: false,
            payload_type: 111,
            payload: frame_bytes(wert),
            arrival_time: Zeitstempel(ankunft),
        }
    }

    fn aufbau() -> (Wiedergabe, AdaptiveJitterBuffer, Arc<TestUhr>) {
        let uhr = Arc::new(TestUhr::neu(0));
        let buffer = AdaptiveJitterBuffer::neu(JitterBufferConfig::default(), uhr.clone());
        let wiedergabe = Wiedergabe::neu(Box::new(PcmCodec::neu(SAMPLES)), STANDARD_MAX_CONCEALMENT);
        (wiedergabe, buffer, uhr)
    }

    #[test]
    fn luecke_wird_vor_dem_paket_verdeckt() {
        let (mut w, mut buf, uhr) = aufbau();
        buf.put(paket(1, 100, 0));
        buf.put(paket(2, 200, 20));
        buf.put(paket(4, 400, 60));
        uhr.setzen(60);

        assert_eq!(w.takt(&mut buf), vec![vec![100; SAMPLES]]);
        assert_eq!(w.takt(&mut buf), vec![vec![200; SAMPLES]]);
        // PLC aus Frame 2 (halbe Amplitude), dann Frame 4
        assert_eq!(
            w.takt(&mut buf),
            vec![vec![100; SAMPLES], vec![400; SAMPLES]]
        );
        assert_eq!(w.statistik().concealment, 1);
        assert_eq!(w.statistik().dekodiert, 3);
    }

    #[test]
    fn unterlauf_begrenzt_dann_stille() {
        let (mut w, mut buf, uhr) = aufbau();
        buf.put(paket(1, 10, 0));
        uhr.setzen(20);
        assert_eq!(w.takt(&mut buf).len(), 1);

        for _ in 0..STANDARD_MAX_CONCEALMENT {
            assert_eq!(w.takt(&mut buf).len(), 1);
        }
        assert!(w.takt(&mut buf).is_empty());
        assert!(!w.ist_aktiv());
        assert!(w.takt(&mut buf).is_empty());
    }

    #[test]
    fn ohne_strom_keine_frames() {
        let (mut w, mut buf, _uhr) = aufbau();
        assert!(w.takt(&mut buf).is_empty());
        assert_eq!(w.statistik().concealment, 0);
    }

    #[test]
    fn defekter_frame_wird_verdeckt() {
        let (mut w, mut buf, uhr) = aufbau();
        let mut kaputt = paket(1, 0, 0);
        kaputt.payload = Bytes::from_static(&[1, 2, 3]);
        buf.put(kaputt);
        uhr.setzen(20);
        let frames = w.takt(&mut buf);
        assert_eq!(frames, vec![vec![0; SAMPLES]]);
        assert_eq!(w.statistik().dekodierfehler, 1);
        assert_eq!(w.statistik().concealment, 1);
    }

    #[test]
    fn grosse_luecke_wird_gekappt() {
        let (mut w, mut buf, uhr) = aufbau();
        buf.put(paket(1, 10, 0));
        uhr.setzen(20);
        w.takt(&mut buf);
        buf.put(paket(20, 20, 25));
        let frames = w.takt(&mut buf);
        assert_eq!(frames.len(), STANDARD_MAX_CONCEALMENT as usize + 1);
        assert_eq!(w.statistik().uebersprungen, 18 - STANDARD_MAX_CONCEALMENT as u64);
    }
}
