//! Jitter-Buffer-Szenarien: Verlustmeldung, Sequenz-Umlauf, Umsortierung

use bytes::Bytes;
use meshtalk_core::{TestUhr, Zeitstempel};
use meshtalk_protocol::rtp::{depacketize, RtpPacketizer};
use meshtalk_voice::{AdaptiveJitterBuffer, JitterBufferConfig, VerlustEreignis};
use std::sync::Arc;

const SSRC: u32 = 0x1234_5678;

fn paket(seq: u16, ankunft: u64) -> meshtalk_protocol::rtp::RtpPacket {
    meshtalk_protocol::rtp::RtpPacket {
        sequence_number: seq,
        timestamp: (seq as u32).wrapping_mul(320),
        ssrc: SSRC,
        marker: false,
        payload_type: 111,
        payload: Bytes::copy_from_slice(&seq.to_be_bytes()),
        arrival_time: Zeitstempel(ankunft),
    }
}

fn buffer() -> (AdaptiveJitterBuffer, Arc<TestUhr>) {
    let uhr = Arc::new(TestUhr::neu(0));
    (
        AdaptiveJitterBuffer::neu(JitterBufferConfig::default(), uhr.clone()),
        uhr,
    )
}

#[test]
fn verlust_wird_mit_anzahl_und_letzter_sequenz_gemeldet() {
    let (mut buf, uhr) = buffer();
    for (seq, ankunft) in [(1u16, 0u64), (2, 20), (4, 60), (5, 80)] {
        buf.put(paket(seq, ankunft));
    }
    uhr.setzen(80);

    assert_eq!(buf.poll().map(|p| p.sequence_number), Some(1));
    assert!(buf.drain_verluste().is_empty());
    assert_eq!(buf.poll().map(|p| p.sequence_number), Some(2));
    assert!(buf.drain_verluste().is_empty());

    assert_eq!(buf.poll().map(|p| p.sequence_number), Some(4));
    assert_eq!(
        buf.drain_verluste(),
        vec![VerlustEreignis {
            count: 1,
            last_sequence: 2
        }]
    );
    assert_eq!(buf.poll().map(|p| p.sequence_number), Some(5));
    assert!(buf.drain_verluste().is_empty());

    assert_eq!(buf.statistik().verloren, 1);
    assert_eq!(buf.statistik().abgespielt, 4);
}

#[test]
fn sequenz_umlauf_wird_korrekt_sortiert() {
    let (mut buf, uhr) = buffer();
    // 65534, 65535, 0, 1 in vertauschter Reihenfolge
    buf.put(paket(65535, 0));
    buf.put(paket(0, 5));
    buf.put(paket(65534, 10));
    buf.put(paket(1, 15));
    uhr.setzen(200);

    let seqs: Vec<u16> = std::iter::from_fn(|| buf.poll().map(|p| p.sequence_number)).collect();
    assert_eq!(seqs, vec![65534, 65535, 0, 1]);
    assert!(buf.drain_verluste().is_empty());
}

#[test]
fn verlust_ueber_den_umlauf_hinweg() {
    let (mut buf, uhr) = buffer();
    buf.put(paket(65534, 0));
    buf.put(paket(1, 60));
    uhr.setzen(100);

    assert_eq!(buf.poll().map(|p| p.sequence_number), Some(65534));
    assert_eq!(buf.poll().map(|p| p.sequence_number), Some(1));
    assert_eq!(
        buf.drain_verluste(),
        vec![VerlustEreignis {
            count: 2,
            last_sequence: 65534
        }]
    );
}

#[test]
fn paketierter_strom_laeuft_durch_den_buffer() {
    let (mut buf, uhr) = buffer();
    let mut packetizer = RtpPacketizer::mit_startwerten(SSRC, 65530, 0, 320);

    let mut ankunft = 0;
    for i in 0..8u8 {
        let datagramm = packetizer.packetize(&[i; 40]).expect("Nutzdaten passen");
        let paket = depacketize(&datagramm, Zeitstempel(ankunft)).expect("gueltiges RTP");
        buf.put(paket);
        ankunft += 20;
    }
    uhr.setzen(ankunft);

    let mut erwartet = 65530u16;
    for i in 0..8u8 {
        let p = buf.poll().expect("Paket faellig");
        assert_eq!(p.sequence_number, erwartet);
        assert_eq!(p.payload[0], i);
        erwartet = erwartet.wrapping_add(1);
    }
    assert!(buf.poll().is_none());
    assert_eq!(buf.statistik().unterlaeufe, 1);
}

#[test]
fn geteilter_buffer_zwischen_tasks() {
    let uhr = Arc::new(TestUhr::neu(0));
    let geteilt = meshtalk_voice::geteilt(AdaptiveJitterBuffer::neu(
        JitterBufferConfig::default(),
        uhr.clone(),
    ));

    let produzent = {
        let geteilt = geteilt.clone();
        std::thread::spawn(move || {
            for seq in 0..5u16 {
                geteilt.lock().put(paket(seq, seq as u64 * 20));
            }
        })
    };
    produzent.join().expect("Produzent beendet");

    uhr.setzen(200);
    let mut buf = geteilt.lock();
    assert_eq!(buf.fuellstand(), 5);
    assert_eq!(buf.poll().map(|p| p.sequence_number), Some(0));
}
