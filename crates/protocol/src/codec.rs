//! Codec-Schnittstelle und Konfiguration fuer die Sprachuebertragung
//!
//! Der eigentliche Sprach-Codec (Opus) ist ein externer Baustein und wird
//! nur ueber [`AudioCodec`] angesprochen: Frame rein, Bytes raus und
//! umgekehrt, plus ein Concealment-Frame bei Paketverlust.
//! [`PcmCodec`] ist die eingebaute Passthrough-Variante (16-Bit PCM,
//! big-endian), damit ein Knoten auch ohne nativen Codec lauffaehig ist.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Konstanten
// ---------------------------------------------------------------------------

/// Standard-Abtastrate fuer Sprache (Breitband)
pub const SPRACH_ABTASTRATE: u32 = 16_000;

/// Standard-Frame-Dauer in Millisekunden
pub const SPRACH_FRAME_MS: u32 = 20;

/// Untere Bitraten-Grenze fuer Opus-Sprache (kbps)
pub const MIN_BITRATE_KBPS: u16 = 6;

/// Obere Bitraten-Grenze fuer Opus-Sprache (kbps)
pub const MAX_BITRATE_KBPS: u16 = 24;

/// Ein PCM-Frame (Mono, 16 Bit)
pub type PcmFrame = Vec<i16>;

// ---------------------------------------------------------------------------
// AudioCodec
// ---------------------------------------------------------------------------

/// Externer Sprach-Codec
///
/// Implementierungen muessen fehlertolerant sein: ein Decode-Fehler liefert
/// `None`, der Aufrufer faellt dann auf [`AudioCodec::decode_plc`] zurueck.
pub trait AudioCodec: Send {
    /// Kodiert genau einen Frame mit `samples_pro_frame()` Samples
    fn encode(&mut self, pcm: &[i16]) -> Option<Bytes>;

    /// Dekodiert einen kodierten Frame
    fn decode(&mut self, daten: &[u8]) -> Option<PcmFrame>;

    /// Erzeugt einen Concealment-Frame fuer einen verlorenen Frame
    fn decode_plc(&mut self) -> PcmFrame;

    /// Samples pro Frame (z.B. 320 bei 16 kHz / 20 ms)
    fn samples_pro_frame(&self) -> usize;
}

// ---------------------------------------------------------------------------
// PcmCodec
// ---------------------------------------------------------------------------

/// Passthrough-Codec: 16-Bit PCM big-endian ("L16")
///
/// Concealment wiederholt den letzten Frame einmal mit halber Amplitude
/// und liefert danach Stille.
#[derive(Debug, Clone)]
pub struct PcmCodec {
    samples_pro_frame: usize,
    letzter_frame: Option<PcmFrame>,
}

impl PcmCodec {
    pub fn neu(samples_pro_frame: usize) -> Self {
        Self {
            samples_pro_frame,
            letzter_frame: None,
        }
    }

    /// Codec fuer 16 kHz / 20 ms
    pub fn sprache() -> Self {
        Self::neu((SPRACH_ABTASTRATE * SPRACH_FRAME_MS / 1000) as usize)
    }
}

impl AudioCodec for PcmCodec {
    fn encode(&mut self, pcm: &[i16]) -> Option<Bytes> {
        if pcm.len() != self.samples_pro_frame {
            tracing::warn!(
                erhalten = pcm.len(),
                erwartet = self.samples_pro_frame,
                "PCM-Frame mit falscher Laenge"
            );
            return None;
        }
        let mut buf = BytesMut::with_capacity(pcm.len() * 2);
        for sample in pcm {
            buf.put_i16(*sample);
        }
        Some(buf.freeze())
    }

    fn decode(&mut self, daten: &[u8]) -> Option<PcmFrame> {
        if daten.len() != self.samples_pro_frame * 2 {
            return None;
        }
        let frame: PcmFrame = daten
            .chunks_exact(2)
            .map(|b| i16::from_be_bytes([b[0], b[1]]))
            .collect();
        self.letzter_frame = Some(frame.clone());
        Some(frame)
    }

    fn decode_plc(&mut self) -> PcmFrame {
        match self.letzter_frame.take() {
            Some(letzter) => letzter.into_iter().map(|s| s / 2).collect(),
            None => vec![0; self.samples_pro_frame],
        }
    }

    fn samples_pro_frame(&self) -> usize {
        self.samples_pro_frame
    }
}

// ---------------------------------------------------------------------------
// Opus-Konfiguration
// ---------------------------------------------------------------------------

/// Konfiguration fuer den externen Opus-Codec
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpusConfig {
    /// Ziel-Bitrate in kbps (6–24)
    pub bitrate_kbps: u16,
    /// Abtastrate in Hz
    pub sample_rate: u32,
    /// Frame-Dauer in Millisekunden
    pub frame_ms: u32,
    /// Forward Error Correction
    pub fec_enabled: bool,
    /// Discontinuous Transmission
    pub dtx_enabled: bool,
}

impl Default for OpusConfig {
    fn default() -> Self {
        Self {
            bitrate_kbps: 12,
            sample_rate: SPRACH_ABTASTRATE,
            frame_ms: SPRACH_FRAME_MS,
            fec_enabled: true,
            dtx_enabled: false,
        }
    }
}

impl OpusConfig {
    /// Samples pro Frame (Mono)
    pub fn samples_pro_frame(&self) -> usize {
        (self.sample_rate * self.frame_ms / 1000) as usize
    }

    /// Validiert die Konfiguration
    pub fn validieren(&self) -> Result<(), String> {
        if !(MIN_BITRATE_KBPS..=MAX_BITRATE_KBPS).contains(&self.bitrate_kbps) {
            return Err(format!(
                "Bitrate muss zwischen {} und {} kbps liegen (war: {})",
                MIN_BITRATE_KBPS, MAX_BITRATE_KBPS, self.bitrate_kbps
            ));
        }
        if ![8_000, 12_000, 16_000, 24_000, 48_000].contains(&self.sample_rate) {
            return Err(format!("Ungueltige Abtastrate: {} Hz", self.sample_rate));
        }
        if ![10, 20, 40, 60].contains(&self.frame_ms) {
            return Err(format!("Ungueltige Frame-Dauer: {} ms", self.frame_ms));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm_codec_encode_decode() {
        let mut codec = PcmCodec::neu(4);
        let frame = vec![1, -2, 300, i16::MIN];
        let bytes = codec.encode(&frame).unwrap();
        assert_eq!(bytes.len(), 8);
        assert_eq!(codec.decode(&bytes), Some(frame));
    }

    #[test]
    fn pcm_codec_falsche_laenge() {
        let mut codec = PcmCodec::neu(4);
        assert!(codec.encode(&[1, 2, 3]).is_none());
        assert!(codec.decode(&[0u8; 5]).is_none());
    }

    #[test]
    fn pcm_codec_concealment() {
        let mut codec = PcmCodec::neu(2);
        // Ohne Vorgeschichte: Stille
        assert_eq!(codec.decode_plc(), vec![0, 0]);

        let bytes = codec.encode(&[1000, -1000]).unwrap();
        codec.decode(&bytes).unwrap();
        assert_eq!(codec.decode_plc(), vec![500, -500]);
        // Zweiter Verlust in Folge: Stille
        assert_eq!(codec.decode_plc(), vec![0, 0]);
    }

    #[test]
    fn sprache_hat_320_samples() {
        assert_eq!(PcmCodec::sprache().samples_pro_frame(), 320);
        assert_eq!(OpusConfig::default().samples_pro_frame(), 320);
    }

    #[test]
    fn opus_config_validierung() {
        assert!(OpusConfig::default().validieren().is_ok());

        let mut cfg = OpusConfig::default();
        cfg.bitrate_kbps = 5;
        assert!(cfg.validieren().is_err());
        cfg.bitrate_kbps = 25;
        assert!(cfg.validieren().is_err());

        let mut cfg = OpusConfig::default();
        cfg.frame_ms = 15;
        assert!(cfg.validieren().is_err());
    }
}
