//! Zwei Knoten ueber Unicast-Loopback: Floor-Vergabe und Audio-Durchlauf

use meshtalk_core::{DeviceId, FloorEreignis, Priority, Talkgroup, TalkgroupId};
use meshtalk_floor::ClientConfig;
use meshtalk_observability::MeshtalkMetriken;
use meshtalk_session::{
    talkgruppe_starten, ArbitrierungsModus, Kollaborateure, LaufzeitConfig, TalkgruppenHandle,
};
use meshtalk_voice::udp::GruppenSocket;
use meshtalk_voice::{TalkgruppenTransport, TransportConfig};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;
use tokio::sync::broadcast;

const TG: TalkgroupId = TalkgroupId(7);
const FRAME: usize = 320;

fn talkgruppe() -> Talkgroup {
    Talkgroup::neu(TG, Ipv4Addr::new(239, 7, 0, 1), 5004)
}

fn socket() -> GruppenSocket {
    let platzhalter: SocketAddr = "127.0.0.1:9".parse().unwrap();
    GruppenSocket::unicast(
        SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0),
        platzhalter,
        &TransportConfig::default(),
    )
    .expect("Loopback-Socket")
}

/// Zwei ueber Kreuz verbundene Transporte (Audio an Audio, Steuerung an Steuerung)
fn transport_paar() -> (TalkgruppenTransport, TalkgruppenTransport) {
    let mut a = TalkgruppenTransport {
        audio: socket(),
        steuerung: socket(),
    };
    let mut b = TalkgruppenTransport {
        audio: socket(),
        steuerung: socket(),
    };
    a.audio.ziel_setzen(b.audio.lokale_adresse().unwrap());
    a.steuerung.ziel_setzen(b.steuerung.lokale_adresse().unwrap());
    b.audio.ziel_setzen(a.audio.lokale_adresse().unwrap());
    b.steuerung.ziel_setzen(a.steuerung.lokale_adresse().unwrap());
    (a, b)
}

fn config(id: u32, modus: ArbitrierungsModus) -> LaufzeitConfig {
    let mut c = LaufzeitConfig::neu(DeviceId(id));
    c.modus = modus;
    c.tick_ms = 10;
    c
}

async fn warte_auf(
    rx: &mut broadcast::Receiver<FloorEreignis>,
    passt: impl Fn(&FloorEreignis) -> bool,
) -> FloorEreignis {
    tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            match rx.recv().await {
                Ok(e) if passt(&e) => return e,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("Ereigniskanal geschlossen: {e}"),
            }
        }
    })
    .await
    .expect("Ereignis nicht rechtzeitig")
}

async fn beenden(handles: Vec<TalkgruppenHandle>) {
    for h in handles {
        tokio::time::timeout(Duration::from_secs(3), h.verlassen())
            .await
            .expect("Verlassen haengt")
            .expect("Verlassen fehlgeschlagen");
    }
}

#[tokio::test]
async fn zentraler_knoten_vergibt_floor_und_audio_kommt_an() {
    let (transport_a, transport_b) = transport_paar();
    let metriken = MeshtalkMetriken::neu().unwrap();

    let mut a = talkgruppe_starten(
        talkgruppe(),
        transport_a,
        config(1, ArbitrierungsModus::Zentral),
        Kollaborateure::standard().mit_metriken(metriken.clone()),
    );
    let b = talkgruppe_starten(
        talkgruppe(),
        transport_b,
        config(2, ArbitrierungsModus::Client),
        Kollaborateure::standard(),
    );
    assert_eq!(metriken.talkgroups_active.get(), 1);

    let mut ereignisse_a = a.ereignisse_abonnieren();
    let mut ereignisse_b = b.ereignisse_abonnieren();
    let mut wiedergabe_a = a.wiedergabe_nehmen().expect("Wiedergabekanal");
    assert!(a.wiedergabe_nehmen().is_none());

    b.druecken(Priority::Normal, false).await.unwrap();
    warte_auf(&mut ereignisse_b, |e| matches!(e, FloorEreignis::Gewaehrt { .. })).await;
    warte_auf(&mut ereignisse_a, |e| {
        matches!(e, FloorEreignis::SprecherAktiv { sprecher, .. } if *sprecher == DeviceId(2))
    })
    .await;
    assert_eq!(
        metriken
            .floor_grants_total
            .with_label_values(&["normal"])
            .get(),
        1
    );

    for _ in 0..3 {
        assert!(b.audio_senden(vec![1000; FRAME]));
    }

    let frame = tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            let frame = wiedergabe_a.recv().await.expect("Wiedergabe offen");
            if frame.iter().all(|s| *s == 1000) {
                return frame;
            }
        }
    })
    .await
    .expect("Audio nicht angekommen");
    assert_eq!(frame.len(), FRAME);
    assert!(metriken.rtp_packets_received_total.get() >= 1);

    b.loslassen().await.unwrap();
    warte_auf(&mut ereignisse_a, |e| matches!(e, FloorEreignis::Ruhe { .. })).await;

    beenden(vec![a, b]).await;
    assert_eq!(metriken.talkgroups_active.get(), 0);
}

#[tokio::test]
async fn anfrage_ohne_arbitrator_schlaegt_fehl() {
    let (transport_a, transport_b) = transport_paar();
    let mut c = config(2, ArbitrierungsModus::Client);
    c.client = ClientConfig {
        request_timeout_ms: 100,
        max_wiederholungen: 1,
        ..ClientConfig::default()
    };
    let metriken = MeshtalkMetriken::neu().unwrap();
    let b = talkgruppe_starten(
        talkgruppe(),
        transport_b,
        c,
        Kollaborateure::standard().mit_metriken(metriken.clone()),
    );
    let mut ereignisse = b.ereignisse_abonnieren();

    b.druecken(Priority::High, false).await.unwrap();
    warte_auf(&mut ereignisse, |e| {
        matches!(e, FloorEreignis::AnfrageFehlgeschlagen { .. })
    })
    .await;
    assert_eq!(metriken.floor_request_failures_total.get(), 1);

    beenden(vec![b]).await;
    drop(transport_a);
}

#[tokio::test]
async fn verteilte_knoten_sehen_denselben_sprecher() {
    let (transport_a, transport_b) = transport_paar();
    let a = talkgruppe_starten(
        talkgruppe(),
        transport_a,
        config(1, ArbitrierungsModus::Verteilt),
        Kollaborateure::standard(),
    );
    let b = talkgruppe_starten(
        talkgruppe(),
        transport_b,
        config(2, ArbitrierungsModus::Verteilt),
        Kollaborateure::standard(),
    );
    let mut ereignisse_a = a.ereignisse_abonnieren();
    let mut ereignisse_b = b.ereignisse_abonnieren();

    a.druecken(Priority::Normal, false).await.unwrap();
    warte_auf(&mut ereignisse_a, |e| matches!(e, FloorEreignis::Gewaehrt { .. })).await;
    warte_auf(&mut ereignisse_b, |e| {
        matches!(e, FloorEreignis::SprecherAktiv { sprecher, .. } if *sprecher == DeviceId(1))
    })
    .await;

    // B fragt an waehrend A spricht: eingereiht
    b.druecken(Priority::Normal, false).await.unwrap();
    warte_auf(&mut ereignisse_b, |e| {
        matches!(e, FloorEreignis::Warteschlange { position: 1, .. })
    })
    .await;

    // A gibt frei: B rueckt nach
    a.loslassen().await.unwrap();
    warte_auf(&mut ereignisse_b, |e| matches!(e, FloorEreignis::Gewaehrt { .. })).await;

    beenden(vec![a, b]).await;
}
