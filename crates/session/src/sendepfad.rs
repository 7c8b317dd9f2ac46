//! Sendepfad: PCM sammeln, kodieren, paketieren
//!
//! Die Aufnahme liefert PCM in beliebigen Stueckelungen. Der Sendepfad
//! sammelt daraus ganze Frames, kodiert sie und erzeugt fertige
//! RTP-Datagramme. Beim Stoppen wird ein angefangener Frame mit Stille
//! aufgefuellt und noch verschickt.
//!
//! Vor dem Kodieren laeuft die Aufbereitung: Frames ohne Sprache verwirft
//! der VAD (der Media-Zeitstempel laeuft weiter, das naechste Sprachpaket
//! traegt das Marker-Bit), der Rest geht durch das Noise Gate.

use bytes::Bytes;
use meshtalk_protocol::codec::AudioCodec;
use meshtalk_protocol::rtp::RtpPacketizer;
use meshtalk_voice::dsp::{Aufbereitung, AufbereitungConfig, NoiseGate, Vad};

/// Statistiken des Sendepfads
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendeStatistik {
    pub frames: u64,
    pub pakete: u64,
    /// Frames die der Codec oder Paketierer abgelehnt hat
    pub verworfen: u64,
    /// Frames ohne Sprache, nicht gesendet
    pub stille: u64,
    /// Sprechdurchgaenge
    pub durchgaenge: u64,
}

pub struct Sendepfad {
    codec: Box<dyn AudioCodec>,
    packetizer: RtpPacketizer,
    puffer: Vec<i16>,
    aktiv: bool,
    statistik: SendeStatistik,
    vad: Vad,
    gate: NoiseGate,
    /// Vom VAD verworfene Frames seit dem letzten Paket
    ausgelassen: u32,
}

impl Sendepfad {
    /// Sendepfad ohne Aufbereitung
    pub fn neu(codec: Box<dyn AudioCodec>, packetizer: RtpPacketizer) -> Self {
        Self::mit_aufbereitung(codec, packetizer, &AufbereitungConfig::default())
    }

    pub fn mit_aufbereitung(
        codec: Box<dyn AudioCodec>,
        packetizer: RtpPacketizer,
        aufbereitung: &AufbereitungConfig,
    ) -> Self {
        let kapazitaet = codec.samples_pro_frame() * 2;
        Self {
            codec,
            packetizer,
            puffer: Vec::with_capacity(kapazitaet),
            aktiv: false,
            statistik: SendeStatistik::default(),
            vad: Vad::neu(aufbereitung.vad.clone()),
            gate: NoiseGate::neu(aufbereitung.noise_gate.clone()),
            ausgelassen: 0,
        }
    }

    /// Groesste Nutzlast pro Paket
    pub fn max_nutzdaten(&self) -> usize {
        self.packetizer.max_nutzdaten()
    }

    /// SSRC der eigenen Pakete (fuer die Loopback-Erkennung)
    pub fn ssrc(&self) -> u32 {
        self.packetizer.ssrc()
    }

    pub fn ist_aktiv(&self) -> bool {
        self.aktiv
    }

    /// Beginn eines Sprechdurchgangs (naechstes Paket mit Marker-Bit)
    pub fn starten(&mut self) {
        if self.aktiv {
            return;
        }
        self.aktiv = true;
        self.puffer.clear();
        self.vad.zuruecksetzen();
        self.gate.zuruecksetzen();
        self.ausgelassen = 0;
        self.packetizer.sprechbeginn_markieren();
        self.statistik.durchgaenge += 1;
        tracing::debug!(ssrc = self.ssrc(), "Sendepfad gestartet");
    }

    /// Nimmt PCM entgegen und liefert alle fertig gewordenen Datagramme
    ///
    /// Ausserhalb eines Sprechdurchgangs wird PCM verworfen.
    pub fn aufnehmen(&mut self, pcm: &[i16]) -> Vec<Bytes> {
        if !self.aktiv {
            return Vec::new();
        }
        self.puffer.extend_from_slice(pcm);

        let n = self.codec.samples_pro_frame();
        let mut datagramme = Vec::new();
        while self.puffer.len() >= n {
            let mut frame: Vec<i16> = self.puffer.drain(..n).collect();
            if let Some(d) = self.frame_senden(&mut frame) {
                datagramme.push(d);
            }
        }
        datagramme
    }

    /// Ende des Sprechdurchgangs: Rest-Frame auffuellen und senden
    pub fn stoppen(&mut self) -> Vec<Bytes> {
        if !self.aktiv {
            return Vec::new();
        }
        self.aktiv = false;

        let mut datagramme = Vec::new();
        if !self.puffer.is_empty() {
            let mut frame = std::mem::take(&mut self.puffer);
            frame.resize(self.codec.samples_pro_frame(), 0);
            if let Some(d) = self.frame_senden(&mut frame) {
                datagramme.push(d);
            }
        }
        tracing::debug!(ssrc = self.ssrc(), rest = datagramme.len(), "Sendepfad gestoppt");
        datagramme
    }

    pub fn statistik(&self) -> &SendeStatistik {
        &self.statistik
    }

    fn frame_senden(&mut self, frame: &mut [i16]) -> Option<Bytes> {
        self.statistik.frames += 1;
        if !self.vad.erkennen(frame) {
            self.statistik.stille += 1;
            self.ausgelassen += 1;
            return None;
        }
        if self.ausgelassen > 0 {
            tracing::trace!(ssrc = self.ssrc(), frames = self.ausgelassen, "Sprache nach Pause");
            self.packetizer.frames_auslassen(self.ausgelassen);
            self.packetizer.sprechbeginn_markieren();
            self.ausgelassen = 0;
        }
        self.gate.verarbeiten(frame);

        let datagramm = self
            .codec
            .encode(frame)
            .and_then(|kodiert| self.packetizer.packetize(&kodiert));
        match datagramm {
            Some(d) => {
                self.statistik.pakete += 1;
                Some(d)
            }
            None => {
                self.statistik.verworfen += 1;
                None
            }
        }
    }
}
