//! RTP-Paketierung fuer Sprach-Multicast
//!
//! Verpackt kodierte Audio-Frames in RTP-Pakete (RFC 3550, fester 12-Byte-Header)
//! und entpackt sie wieder. Keine Wiederholung, keine Bestaetigung: spaete
//! Sprachdaten sind wertlos, Verluste deckt der Jitter Buffer per Concealment ab.
//!
//! ## Paketformat (Header = 12 Bytes, big-endian)
//!
//! ```text
//! Offset  Len  Beschreibung
//! ------  ---  -----------
//!  0       1   V(2) | P(1) | X(1) | CC(4)
//!  1       1   M(1) | PT(7)
//!  2       2   Sequenznummer (wrappt bei 2^16)
//!  4       4   Zeitstempel (Media-Clock, Samples)
//!  8       4   SSRC
//! 12     4*CC  CSRC-Liste (wird beim Entpacken uebersprungen)
//! 12+      N   Nutzdaten (Opus-Bytes)
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use meshtalk_core::Zeitstempel;

/// RTP-Version (immer 2)
pub const RTP_VERSION: u8 = 2;

/// Groesse des festen RTP-Headers in Bytes
pub const RTP_HEADER_SIZE: usize = 12;

/// Dynamischer Payload-Typ fuer Opus
pub const RTP_PAYLOAD_OPUS: u8 = 111;

/// Maximale Datagramm-Groesse (MTU-sicher)
pub const MAX_PACKET_SIZE: usize = 1400;

/// Maximale Nutzdaten-Laenge
pub const MAX_NUTZDATEN_LAENGE: usize = MAX_PACKET_SIZE - RTP_HEADER_SIZE;

// ---------------------------------------------------------------------------
// Sequenz-Arithmetik
// ---------------------------------------------------------------------------

/// Vorzeichenbehafteter Abstand `a - b` modulo 2^16
///
/// Positive Werte: `a` liegt nach `b`. Funktioniert ueber den Wrap 65535 -> 0.
pub fn seq_abstand(a: u16, b: u16) -> i16 {
    a.wrapping_sub(b) as i16
}

/// Liegt `a` (wrap-bewusst) vor `b`?
pub fn seq_vor(a: u16, b: u16) -> bool {
    seq_abstand(a, b) < 0
}

// ---------------------------------------------------------------------------
// RtpHeader
// ---------------------------------------------------------------------------

/// 12-Byte RTP-Header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    pub padding: bool,
    pub extension: bool,
    pub csrc_count: u8,
    /// Erstes Paket einer Sprechsequenz
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

impl RtpHeader {
    /// Erstellt einen Header ohne Padding/Extension/CSRC
    pub fn new(payload_type: u8, marker: bool, sequence_number: u16, timestamp: u32, ssrc: u32) -> Self {
        Self {
            padding: false,
            extension: false,
            csrc_count: 0,
            marker,
            payload_type: payload_type & 0x7F,
            sequence_number,
            timestamp,
            ssrc,
        }
    }

    /// Serialisiert den festen Header (big-endian)
    pub fn encode(&self) -> [u8; RTP_HEADER_SIZE] {
        let mut buf = [0u8; RTP_HEADER_SIZE];
        buf[0] = (RTP_VERSION << 6)
            | ((self.padding as u8) << 5)
            | ((self.extension as u8) << 4)
            | (self.csrc_count & 0x0F);
        buf[1] = ((self.marker as u8) << 7) | (self.payload_type & 0x7F);
        buf[2..4].copy_from_slice(&self.sequence_number.to_be_bytes());
        buf[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        buf[8..12].copy_from_slice(&self.ssrc.to_be_bytes());
        buf
    }

    /// Liest den festen Header; `None` bei zu kurzem Puffer oder falscher Version
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < RTP_HEADER_SIZE {
            return None;
        }
        if buf[0] >> 6 != RTP_VERSION {
            return None;
        }
        Some(Self {
            padding: buf[0] & 0x20 != 0,
            extension: buf[0] & 0x10 != 0,
            csrc_count: buf[0] & 0x0F,
            marker: buf[1] & 0x80 != 0,
            payload_type: buf[1] & 0x7F,
            sequence_number: u16::from_be_bytes([buf[2], buf[3]]),
            timestamp: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            ssrc: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
        })
    }
}

// ---------------------------------------------------------------------------
// RtpPacket
// ---------------------------------------------------------------------------

/// Empfangenes (entpacktes) RTP-Paket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub marker: bool,
    pub payload_type: u8,
    /// Opake Codec-Nutzdaten
    pub payload: Bytes,
    /// Lokaler Empfangszeitpunkt
    pub arrival_time: Zeitstempel,
}

/// Entpackt ein Datagramm
///
/// Gibt `None` bei fehlerhaftem Eingang zurueck (zu kurz, falsche Version,
/// CSRC/Extension/Padding ueber das Paketende hinaus). Wirft nie.
pub fn depacketize(buf: &[u8], arrival_time: Zeitstempel) -> Option<RtpPacket> {
    let header = RtpHeader::decode(buf)?;

    let mut offset = RTP_HEADER_SIZE + 4 * header.csrc_count as usize;
    if buf.len() < offset {
        return None;
    }

    if header.extension {
        // Extension-Header: 2 Byte Profil, 2 Byte Laenge in 32-Bit-Worten
        if buf.len() < offset + 4 {
            return None;
        }
        let worte = u16::from_be_bytes([buf[offset + 2], buf[offset + 3]]) as usize;
        offset += 4 + 4 * worte;
        if buf.len() < offset {
            return None;
        }
    }

    let mut ende = buf.len();
    if header.padding {
        let padding = *buf.last()? as usize;
        if padding == 0 || offset + padding > ende {
            return None;
        }
        ende -= padding;
    }

    Some(RtpPacket {
        sequence_number: header.sequence_number,
        timestamp: header.timestamp,
        ssrc: header.ssrc,
        marker: header.marker,
        payload_type: header.payload_type,
        payload: Bytes::copy_from_slice(&buf[offset..ende]),
        arrival_time,
    })
}

// ---------------------------------------------------------------------------
// RtpPacketizer
// ---------------------------------------------------------------------------

/// Sender-seitiger Paketierer – einziger Zustand ist der Sequenzzaehler
///
/// Die SSRC wird einmal pro Session zufaellig gewaehlt und bleibt stabil.
#[derive(Debug)]
pub struct RtpPacketizer {
    ssrc: u32,
    payload_type: u8,
    sequence: u16,
    timestamp: u32,
    /// Vorschub des Zeitstempels pro Frame (Samples)
    samples_pro_frame: u32,
    /// Naechstes Paket beginnt eine Sprechsequenz
    sprechbeginn: bool,
    /// Obergrenze der Nutzdaten nach Abzug der Krypto-Reserve
    max_nutzdaten: usize,
}

impl RtpPacketizer {
    /// Neuer Paketierer mit zufaelliger SSRC und zufaelligem Startpunkt
    pub fn neu(samples_pro_frame: u32) -> Self {
        Self::mit_startwerten(
            rand::random::<u32>().max(1),
            rand::random::<u16>(),
            rand::random::<u32>(),
            samples_pro_frame,
        )
    }

    /// Neuer Paketierer mit festen Startwerten (Tests, Simulation)
    pub fn mit_startwerten(ssrc: u32, sequence: u16, timestamp: u32, samples_pro_frame: u32) -> Self {
        Self {
            ssrc,
            payload_type: RTP_PAYLOAD_OPUS,
            sequence,
            timestamp,
            samples_pro_frame,
            sprechbeginn: true,
            max_nutzdaten: MAX_NUTZDATEN_LAENGE,
        }
    }

    /// Haelt `reserve` Bytes pro Paket fuer die Verschluesselung frei
    pub fn mit_reserve(mut self, reserve: usize) -> Self {
        self.max_nutzdaten = MAX_NUTZDATEN_LAENGE.saturating_sub(reserve);
        self
    }

    /// Groesste Nutzlast, die noch paketiert wird
    pub fn max_nutzdaten(&self) -> usize {
        self.max_nutzdaten
    }

    /// SSRC dieser Session
    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Naechste zu vergebende Sequenznummer
    pub fn naechste_sequenz(&self) -> u16 {
        self.sequence
    }

    /// Markiert den Beginn einer neuen Sprechsequenz (Marker-Bit im naechsten Paket)
    pub fn sprechbeginn_markieren(&mut self) {
        self.sprechbeginn = true;
    }

    /// Schiebt den Media-Zeitstempel ueber `anzahl` nicht gesendete Frames
    ///
    /// Die Sequenznummer bleibt, der Empfaenger sieht eine Pause und keinen
    /// Verlust.
    pub fn frames_auslassen(&mut self, anzahl: u32) {
        self.timestamp = self
            .timestamp
            .wrapping_add(self.samples_pro_frame.wrapping_mul(anzahl));
    }

    /// Verpackt einen kodierten Frame
    ///
    /// Vergibt die naechste Sequenznummer (wrappt bei 2^16) und schiebt den
    /// Media-Zeitstempel um einen Frame weiter. Zu grosse Nutzdaten werden
    /// abgelehnt (`None`), nicht abgeschnitten.
    pub fn packetize(&mut self, payload: &[u8]) -> Option<Bytes> {
        if payload.len() > self.max_nutzdaten {
            tracing::warn!(
                laenge = payload.len(),
                maximum = self.max_nutzdaten,
                "RTP-Nutzdaten zu gross, Frame verworfen"
            );
            return None;
        }

        let header = RtpHeader::new(
            self.payload_type,
            self.sprechbeginn,
            self.sequence,
            self.timestamp,
            self.ssrc,
        );

        let mut buf = BytesMut::with_capacity(RTP_HEADER_SIZE + payload.len());
        buf.put_slice(&header.encode());
        buf.put_slice(payload);

        self.sequence = self.sequence.wrapping_add(1);
        self.timestamp = self.timestamp.wrapping_add(self.samples_pro_frame);
        self.sprechbeginn = false;

        Some(buf.freeze())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
