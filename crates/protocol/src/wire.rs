//! Wire-Format fuer Stream-Transporte
//!
//! Auf UDP ist jede FCP-Nachricht genau ein Datagramm. Fuer Stream-basierte
//! Transporte (z.B. eine TCP-Bruecke zwischen zwei Multicast-Segmenten)
//! wird jede Nachricht mit einem Laengenpraefix gerahmt.
//!
//! ## Frame-Format
//!
//! ```text
//! +--------+--------+----...----+
//! | Laenge (u16 BE) | FCP-Nachricht |
//! +--------+--------+----...----+
//! ```

use bytes::{Buf, BufMut, BytesMut};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Decoder, Encoder};

use crate::floor::{FloorMessage, FCP_HEADER_SIZE};

/// Eine Ethernet-MTU reicht fuer jede FCP-Nachricht
pub const STANDARD_MAX_RAHMEN: usize = 1500;

/// Laengenpraefix: u16 Big Endian
pub const LAENGENFELD: usize = 2;

fn ungueltig(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

// ---------------------------------------------------------------------------
// FcpCodec
// ---------------------------------------------------------------------------

/// tokio-util Codec fuer gerahmte FCP-Nachrichten, fuer `Framed` ueber
/// einem beliebigen Byte-Stream
#[derive(Debug, Clone)]
pub struct FcpCodec {
    grenze: usize,
}

impl FcpCodec {
    pub fn neu() -> Self {
        Self::mit_grenze(STANDARD_MAX_RAHMEN)
    }

    /// Obergrenze fuer eine einzelne Nachricht; mehr als `u16::MAX` passt nicht ins Laengenfeld
    pub fn mit_grenze(grenze: usize) -> Self {
        Self {
            grenze: grenze.min(u16::MAX as usize),
        }
    }

    pub fn grenze(&self) -> usize {
        self.grenze
    }

    fn laenge_pruefen(&self, laenge: usize) -> io::Result<()> {
        if (FCP_HEADER_SIZE..=self.grenze).contains(&laenge) {
            Ok(())
        } else {
            Err(ungueltig(format!(
                "Rahmenlaenge {} ausserhalb {}..={}",
                laenge, FCP_HEADER_SIZE, self.grenze
            )))
        }
    }
}

impl Default for FcpCodec {
    fn default() -> Self {
        Self::neu()
    }
}

impl Decoder for FcpCodec {
    type Item = FloorMessage;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(kopf) = src.get(..LAENGENFELD) else {
            return Ok(None);
        };
        let laenge = u16::from_be_bytes([kopf[0], kopf[1]]) as usize;
        self.laenge_pruefen(laenge)?;

        let fehlend = (LAENGENFELD + laenge).saturating_sub(src.len());
        if fehlend > 0 {
            src.reserve(fehlend);
            return Ok(None);
        }

        src.advance(LAENGENFELD);
        let rahmen = src.split_to(laenge).freeze();
        dekodieren(&rahmen).map(Some)
    }
}

impl Encoder<FloorMessage> for FcpCodec {
    type Error = io::Error;

    fn encode(&mut self, item: FloorMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let rahmen = item.encode();
        self.laenge_pruefen(rahmen.len())?;
        dst.reserve(LAENGENFELD + rahmen.len());
        dst.put_u16(rahmen.len() as u16);
        dst.extend_from_slice(&rahmen);
        Ok(())
    }
}

fn dekodieren(rahmen: &[u8]) -> io::Result<FloorMessage> {
    FloorMessage::decode(rahmen).map_err(|e| ungueltig(format!("FCP-Rahmen unlesbar: {}", e)))
}

// ---------------------------------------------------------------------------
// Einzelne Rahmen ohne Framed
// ---------------------------------------------------------------------------

/// Liest genau eine gerahmte Nachricht vom Stream
pub async fn rahmen_lesen<R>(leser: &mut R) -> io::Result<FloorMessage>
where
    R: AsyncRead + Unpin,
{
    let laenge = leser.read_u16().await? as usize;
    FcpCodec::neu().laenge_pruefen(laenge)?;
    let mut rahmen = vec![0u8; laenge];
    leser.read_exact(&mut rahmen).await?;
    dekodieren(&rahmen)
}

/// Schreibt genau eine gerahmte Nachricht und flusht den Stream
pub async fn rahmen_schreiben<W>(schreiber: &mut W, nachricht: &FloorMessage) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut puffer = BytesMut::new();
    FcpCodec::neu().encode(*nachricht, &mut puffer)?;
    schreiber.write_all(&puffer).await?;
    schreiber.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::floor::FloorNachrichtArt;
    use meshtalk_core::{DeviceId, Priority, TalkgroupId};

    fn freigabe(txn: u32) -> FloorMessage {
        FloorMessage {
            talkgroup_id: TalkgroupId(1),
            transaction_id: txn,
            requester_id: DeviceId(2),
            floor_id: 0,
            priority: Priority::Normal,
            art: FloorNachrichtArt::Release,
        }
    }

    fn gerahmt(nachrichten: impl IntoIterator<Item = FloorMessage>) -> BytesMut {
        let mut codec = FcpCodec::neu();
        let mut puffer = BytesMut::new();
        for n in nachrichten {
            codec.encode(n, &mut puffer).unwrap();
        }
        puffer
    }

    #[test]
    fn rahmen_wird_byteweise_zusammengesetzt() {
        let ganz = gerahmt([FloorMessage::idle(TalkgroupId(3), DeviceId(5))]);
        let mut codec = FcpCodec::neu();
        let mut eingang = BytesMut::new();

        for (i, b) in ganz.iter().enumerate() {
            eingang.put_u8(*b);
            let ergebnis = codec.decode(&mut eingang).unwrap();
            if i + 1 < ganz.len() {
                assert!(ergebnis.is_none(), "zu frueh dekodiert bei Byte {}", i);
            } else {
                let n = ergebnis.expect("letztes Byte schliesst den Rahmen");
                assert_eq!(n.talkgroup_id, TalkgroupId(3));
            }
        }
    }

    #[test]
    fn aufeinanderfolgende_rahmen_in_reihenfolge() {
        let mut codec = FcpCodec::neu();
        let mut puffer = gerahmt((10..13).map(freigabe));
        let txns: Vec<u32> = std::iter::from_fn(|| codec.decode(&mut puffer).unwrap())
            .map(|n| n.transaction_id)
            .collect();
        assert_eq!(txns, vec![10, 11, 12]);
        assert!(puffer.is_empty());
    }

    #[test]
    fn laengenfeld_ausserhalb_der_grenzen() {
        let mut klein = BytesMut::from(&[0x00, 0x04, 0, 0, 0, 0][..]);
        assert!(FcpCodec::neu().decode(&mut klein).is_err());

        let mut gross = BytesMut::from(&[0x00, 0xC8][..]);
        assert!(FcpCodec::mit_grenze(24).decode(&mut gross).is_err());
        assert_eq!(FcpCodec::mit_grenze(100_000).grenze(), u16::MAX as usize);
    }

    #[test]
    fn unlesbarer_inhalt_ist_invalid_data() {
        let mut puffer = BytesMut::new();
        puffer.put_u16(FCP_HEADER_SIZE as u16);
        puffer.put_bytes(0xFF, FCP_HEADER_SIZE);
        let fehler = FcpCodec::neu().decode(&mut puffer).unwrap_err();
        assert_eq!(fehler.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn rahmen_ueber_duplex_stream() {
        let (mut a, mut b) = tokio::io::duplex(256);
        rahmen_schreiben(&mut a, &freigabe(77)).await.unwrap();
        rahmen_schreiben(&mut a, &freigabe(78)).await.unwrap();
        drop(a);

        assert_eq!(rahmen_lesen(&mut b).await.unwrap().transaction_id, 77);
        assert_eq!(rahmen_lesen(&mut b).await.unwrap().transaction_id, 78);
        let ende = rahmen_lesen(&mut b).await.unwrap_err();
        assert_eq!(ende.kind(), io::ErrorKind::UnexpectedEof);
    }
}
