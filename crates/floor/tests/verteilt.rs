//! Verteilter Betrieb: abweichende Sichten muessen ueber Gossip konvergieren

use meshtalk_core::{DeviceId, FloorRequest, Priority, Talkgroup, TalkgroupId, Zeitstempel};
use meshtalk_floor::{
    ArbitratorConfig, ClientConfig, ClientEffekt, ClientZustand, FloorClient, FloorStatus,
    OffeneMitgliedschaft, VerteilteArbitrierung, STANDARD_GOSSIP_INTERVALL_MS,
};
use meshtalk_protocol::floor::FloorMessage;
use std::net::Ipv4Addr;
use std::sync::Arc;

const TG: TalkgroupId = TalkgroupId(3);

/// Ein Geraet: lokaler Client plus lokale Replik
struct Knoten {
    client: FloorClient,
    replik: VerteilteArbitrierung,
}

impl Knoten {
    fn neu(id: u32) -> Self {
        Self {
            client: FloorClient::neu(DeviceId(id), TG, ClientConfig::default()),
            replik: VerteilteArbitrierung::neu(
                DeviceId(id),
                Talkgroup::neu(TG, Ipv4Addr::new(239, 3, 0, 1), 5004),
                ArbitratorConfig::default(),
                Arc::new(OffeneMitgliedschaft),
                STANDARD_GOSSIP_INTERVALL_MS,
            ),
        }
    }

    /// Fuehrt Client-Effekte aus; liefert die zu verschickenden Nachrichten
    fn ausfuehren(&mut self, effekte: Vec<ClientEffekt>, now: Zeitstempel) -> Vec<FloorMessage> {
        let mut senden = Vec::new();
        for effekt in effekte {
            if let ClientEffekt::Senden(msg) = effekt {
                let aus = self.replik.lokal_senden(msg, now);
                senden.extend(aus.senden);
                self.lokal_zustellen(aus.an_lokal, now);
            }
        }
        senden
    }

    fn lokal_zustellen(&mut self, nachrichten: Vec<FloorMessage>, now: Zeitstempel) {
        for msg in nachrichten {
            self.client.empfangen(&msg, now);
        }
    }

    fn empfangen(&mut self, msg: &FloorMessage, now: Zeitstempel) {
        let an_lokal = self.replik.empfangen(msg, now);
        self.lokal_zustellen(an_lokal, now);
    }

    fn druecken(&mut self, now: Zeitstempel) -> Vec<FloorMessage> {
        let eff = self.client.druecken(Priority::Normal, false, now);
        self.ausfuehren(eff, now)
    }

    fn loslassen(&mut self, now: Zeitstempel) -> Vec<FloorMessage> {
        let eff = self.client.loslassen();
        self.ausfuehren(eff, now)
    }

    fn sicht(&self) -> (FloorStatus, Vec<DeviceId>) {
        (
            self.replik.status(),
            self.replik
                .arbitrator()
                .warteschlange()
                .iter()
                .map(|e| e.requester_id)
                .collect(),
        )
    }
}

fn gossip_runde(knoten: &mut [Knoten], now: Zeitstempel) {
    let mut post: Vec<(usize, FloorMessage)> = Vec::new();
    for (i, k) in knoten.iter_mut().enumerate() {
        let aus = k.replik.tick(now);
        k.lokal_zustellen(aus.an_lokal, now);
        post.extend(aus.senden.into_iter().map(|m| (i, m)));
    }
    for (absender, msg) in post {
        for (i, k) in knoten.iter_mut().enumerate() {
            if i != absender {
                k.empfangen(&msg, now);
            }
        }
    }
}

#[test]
fn gleichzeitige_anfragen_konvergieren() {
    let mut a = Knoten::neu(1);
    let mut b = Knoten::neu(2);

    // Partition: beide erhalten lokal den Floor
    let von_a = a.druecken(Zeitstempel(100));
    let von_b = b.druecken(Zeitstempel(105));
    assert_eq!(a.client.zustand(), ClientZustand::Granted);
    assert_eq!(b.client.zustand(), ClientZustand::Granted);

    // Partition endet: Anfragen kreuzen sich
    for msg in &von_a {
        b.empfangen(msg, Zeitstempel(110));
    }
    for msg in &von_b {
        a.empfangen(msg, Zeitstempel(110));
    }

    let mut knoten = [a, b];
    gossip_runde(&mut knoten, Zeitstempel(200));
    gossip_runde(&mut knoten, Zeitstempel(1_200));

    let [a, b] = &knoten;
    assert_eq!(a.sicht(), b.sicht());
    assert_eq!(
        a.sicht().0,
        FloorStatus::Granted {
            halter: vec![DeviceId(1)]
        }
    );
    // Der spaetere Anfrager hat sich selbst entzogen und wartet
    assert_eq!(a.client.zustand(), ClientZustand::Granted);
    assert!(matches!(
        b.client.zustand(),
        ClientZustand::Queued { position: 1, .. }
    ));
}

#[test]
fn freigabe_gibt_an_naechsten_weiter() {
    let mut knoten = [Knoten::neu(1), Knoten::neu(2), Knoten::neu(3)];

    let post = knoten[0].druecken(Zeitstempel(0));
    for msg in &post {
        knoten[1].empfangen(msg, Zeitstempel(1));
        knoten[2].empfangen(msg, Zeitstempel(1));
    }
    let post = knoten[2].druecken(Zeitstempel(10));
    for msg in &post {
        knoten[0].empfangen(msg, Zeitstempel(11));
        knoten[1].empfangen(msg, Zeitstempel(11));
    }
    assert!(matches!(knoten[2].client.zustand(), ClientZustand::Queued { .. }));

    let post = knoten[0].loslassen(Zeitstempel(500));
    for msg in &post {
        knoten[1].empfangen(msg, Zeitstempel(501));
        knoten[2].empfangen(msg, Zeitstempel(501));
    }

    assert_eq!(knoten[2].client.zustand(), ClientZustand::Granted);
    for k in &knoten {
        assert_eq!(
            k.replik.status(),
            FloorStatus::Granted {
                halter: vec![DeviceId(3)]
            }
        );
    }
}

/// Deterministischer Zufallsgenerator fuer Zustellreihenfolgen
struct Lcg(u64);

impl Lcg {
    fn naechste(&mut self, grenze: u64) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (self.0 >> 33) % grenze
    }

    fn mischen<T>(&mut self, v: &mut [T]) {
        for i in (1..v.len()).rev() {
            let j = self.naechste(i as u64 + 1) as usize;
            v.swap(i, j);
        }
    }
}

#[test]
fn beliebige_zustellreihenfolge_konvergiert() {
    for seed in 0..20u64 {
        let mut zufall = Lcg(seed);
        let mut knoten: Vec<Knoten> = (1..=4).map(Knoten::neu).collect();

        // Jede Anfrage wird lokal sofort arbitriert, beim Rest in zufaelliger Reihenfolge
        let mut post: Vec<(usize, FloorMessage)> = Vec::new();
        for (i, k) in knoten.iter_mut().enumerate() {
            let zeit = Zeitstempel(zufall.naechste(50));
            let prio = Priority::ALLE[2 + zufall.naechste(3) as usize];
            let req = FloorRequest {
                requester_id: DeviceId(i as u32 + 1),
                talkgroup_id: TG,
                priority: prio,
                is_emergency: false,
                request_time: zeit,
                transaction_id: 1,
            };
            let aus = k.replik.lokal_senden(FloorMessage::request(&req), zeit);
            post.extend(aus.senden.into_iter().map(|m| (i, m)));
        }

        for (i, k) in knoten.iter_mut().enumerate() {
            let mut eingang: Vec<FloorMessage> = post
                .iter()
                .filter(|(absender, _)| *absender != i)
                .map(|(_, m)| *m)
                .collect();
            zufall.mischen(&mut eingang);
            for msg in &eingang {
                k.empfangen(msg, Zeitstempel(60));
            }
        }

        gossip_runde(&mut knoten, Zeitstempel(100));
        gossip_runde(&mut knoten, Zeitstempel(1_100));
        gossip_runde(&mut knoten, Zeitstempel(2_100));

        let referenz = knoten[0].sicht();
        for k in &knoten[1..] {
            assert_eq!(k.sicht(), referenz, "seed {}", seed);
        }
        let halter = match &referenz.0 {
            FloorStatus::Granted { halter } => halter.clone(),
            andere => panic!("unerwarteter Status {:?} (seed {})", andere, seed),
        };
        assert_eq!(halter.len(), 1);
        assert_eq!(referenz.1.len(), 3);
    }
}
