//! Talkgruppen-Laufzeit
//!
//! Pro beigetretener Talkgruppe laufen fuenf Tasks:
//!
//! ```text
//! Audio-Socket ---> [Audio-Empfang] --Eingang--+
//! Steuer-Socket --> [Steuer-Empfang] -Eingang--+--> [Session] --SendeBefehl--> [Senden] --> Audio-Socket
//!                                              |        |
//! Handle (PTT) ----------------Befehl----------+        +--FCP--> Steuer-Socket
//!                                                       +--FloorEreignis--> broadcast
//! Jitter Buffer <--put-- [Session]
//! Jitter Buffer --poll-> [Wiedergabe] --PcmFrame--> mpsc
//! ```
//!
//! Der Session-Task besitzt die Floor-Logik exklusiv. Der Jitter Buffer ist
//! der einzige geteilte Zustand (kurze Sperre, Dekodieren ausserhalb).
//!
//! Floor-Aktivitaet zaehlt nur fuer Halter mit Audio: der Sende-Task meldet
//! verschickte Pakete zurueck, empfangene Streams ordnet eine
//! [`SprecherZuordnung`] ueber die SSRC einem Halter zu.

use crate::knoten::{ArbitrierungsModus, FloorKnoten, Weiterleitung};
use crate::sendepfad::Sendepfad;
use crate::session::{SessionAusgabe, SessionZustand, TransmissionSession};
use crate::sprecher::SprecherZuordnung;
use meshtalk_core::{
    DeviceId, FloorEreignis, Priority, PttError, SystemUhr, Talkgroup, TalkgroupId, Uhr,
};
use meshtalk_floor::{
    ArbitratorConfig, ClientConfig, Mitgliedschaft, OffeneMitgliedschaft,
    STANDARD_GOSSIP_INTERVALL_MS,
};
use meshtalk_observability::MeshtalkMetriken;
use meshtalk_protocol::codec::{AudioCodec, PcmCodec, PcmFrame};
use meshtalk_protocol::crypto::{KeineKrypto, Krypto, KryptoKontext};
use meshtalk_protocol::floor::{FloorMessage, FloorNachrichtArt};
use meshtalk_protocol::rtp::{depacketize, RtpPacket, RtpPacketizer};
use meshtalk_voice::udp::{GruppenSocket, UDP_BUFFER_SIZE};
use meshtalk_voice::{
    geteilt, AufbereitungConfig, AdaptiveJitterBuffer, GeteilterJitterBuffer, JitterBufferConfig,
    JitterBufferStatistik, TalkgruppenTransport, Wiedergabe, STANDARD_MAX_CONCEALMENT,
};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

const BEFEHL_KANAL: usize = 32;
const EINGANG_KANAL: usize = 256;
const AUDIO_KANAL: usize = 64;
const WIEDERGABE_KANAL: usize = 64;
const EREIGNIS_KANAL: usize = 64;

/// Pause nach einem Socket-Fehler bevor erneut gelesen wird
const FEHLER_PAUSE: Duration = Duration::from_millis(200);

/// Jitter-Metriken alle N Wiedergabe-Takte aktualisieren
const METRIK_TAKTE: u32 = 50;

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Parameter einer Talkgruppen-Laufzeit
#[derive(Debug, Clone)]
pub struct LaufzeitConfig {
    pub lokal: DeviceId,
    pub modus: ArbitrierungsModus,
    pub client: ClientConfig,
    pub arbitrator: ArbitratorConfig,
    pub jitter: JitterBufferConfig,
    pub gossip_intervall_ms: u64,
    /// Takt fuer Floor-Timer
    pub tick_ms: u64,
    pub max_concealment: u32,
    /// VAD und Noise Gate vor dem Kodieren (standardmaessig aus)
    pub aufbereitung: AufbereitungConfig,
}

impl LaufzeitConfig {
    pub fn neu(lokal: DeviceId) -> Self {
        Self {
            lokal,
            modus: ArbitrierungsModus::default(),
            client: ClientConfig::default(),
            arbitrator: ArbitratorConfig::default(),
            jitter: JitterBufferConfig::default(),
            gossip_intervall_ms: STANDARD_GOSSIP_INTERVALL_MS,
            tick_ms: 50,
            max_concealment: STANDARD_MAX_CONCEALMENT,
            aufbereitung: AufbereitungConfig::default(),
        }
    }
}

/// Codec-Erzeuger (ein Codec pro Richtung)
pub type CodecFabrik = Arc<dyn Fn() -> Box<dyn AudioCodec> + Send + Sync>;

/// Externe Bausteine einer Talkgruppen-Laufzeit
#[derive(Clone)]
pub struct Kollaborateure {
    pub codec_fabrik: CodecFabrik,
    pub krypto: Arc<dyn Krypto>,
    pub mitgliedschaft: Arc<dyn Mitgliedschaft>,
    pub uhr: Arc<dyn Uhr>,
    pub metriken: Option<MeshtalkMetriken>,
}

impl Kollaborateure {
    /// PCM-Passthrough, keine Verschluesselung, offene Mitgliedschaft
    pub fn standard() -> Self {
        Self {
            codec_fabrik: Arc::new(|| Box::new(PcmCodec::sprache()) as Box<dyn AudioCodec>),
            krypto: Arc::new(KeineKrypto),
            mitgliedschaft: Arc::new(OffeneMitgliedschaft),
            uhr: Arc::new(SystemUhr::neu()),
            metriken: None,
        }
    }

    pub fn mit_metriken(mut self, metriken: MeshtalkMetriken) -> Self {
        self.metriken = Some(metriken);
        self
    }
}

// ---------------------------------------------------------------------------
// Kanal-Nachrichten
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum Befehl {
    Druecken {
        priority: Priority,
        is_emergency: bool,
    },
    Loslassen,
    Verlassen,
}

#[derive(Debug)]
enum Eingang {
    Audio(RtpPacket),
    Steuerung(FloorMessage),
    TransportFehler(String),
    TransportOk,
    /// Der Sende-Task hat Audio verschickt (Aktivitaet des lokalen Halters)
    Gesendet,
}

#[derive(Debug)]
enum SendeBefehl {
    Starten,
    Pcm(Vec<i16>),
    Stoppen,
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Zugriff auf eine laufende Talkgruppe
///
/// Wird das Handle ohne [`TalkgruppenHandle::verlassen`] gedroppt, beendet
/// sich die Laufzeit trotzdem (Befehlskanal geschlossen).
pub struct TalkgruppenHandle {
    talkgroup: TalkgroupId,
    befehle: mpsc::Sender<Befehl>,
    audio: mpsc::Sender<SendeBefehl>,
    ereignisse: broadcast::Sender<FloorEreignis>,
    zustand: watch::Receiver<SessionZustand>,
    wiedergabe: Option<mpsc::Receiver<PcmFrame>>,
    transport: Arc<TalkgruppenTransport>,
    tasks: Vec<JoinHandle<()>>,
}

impl TalkgruppenHandle {
    pub fn talkgroup(&self) -> TalkgroupId {
        self.talkgroup
    }

    pub fn zustand(&self) -> SessionZustand {
        *self.zustand.borrow()
    }

    /// PTT gedrueckt
    pub async fn druecken(&self, priority: Priority, is_emergency: bool) -> Result<(), PttError> {
        self.befehl(Befehl::Druecken {
            priority,
            is_emergency,
        })
        .await
    }

    /// PTT losgelassen
    pub async fn loslassen(&self) -> Result<(), PttError> {
        self.befehl(Befehl::Loslassen).await
    }

    /// PCM aus der Aufnahme einspeisen
    ///
    /// Ausserhalb eines Sprechdurchgangs wird das Audio verworfen. Liefert
    /// `false` wenn der Sendekanal voll oder geschlossen ist.
    pub fn audio_senden(&self, pcm: Vec<i16>) -> bool {
        match self.audio.try_send(SendeBefehl::Pcm(pcm)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!(talkgroup = %self.talkgroup, "Sendekanal voll, PCM verworfen");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn ereignisse_abonnieren(&self) -> broadcast::Receiver<FloorEreignis> {
        self.ereignisse.subscribe()
    }

    /// Empfangskanal der abzuspielenden Frames (nur einmal verfuegbar)
    pub fn wiedergabe_nehmen(&mut self) -> Option<mpsc::Receiver<PcmFrame>> {
        self.wiedergabe.take()
    }

    /// Floor best-effort freigeben, Tasks beenden, Gruppe verlassen
    pub async fn verlassen(self) -> Result<(), PttError> {
        // Schon beendet ist kein Fehler
        let _ = self.befehle.send(Befehl::Verlassen).await;
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::warn!(talkgroup = %self.talkgroup, fehler = %e, "Task nicht sauber beendet");
            }
        }
        self.transport.verlassen()?;
        tracing::info!(talkgroup = %self.talkgroup, "Talkgruppe verlassen");
        Ok(())
    }

    async fn befehl(&self, befehl: Befehl) -> Result<(), PttError> {
        self.befehle
            .send(befehl)
            .await
            .map_err(|_| PttError::Ressource(format!("Talkgruppe {} beendet", self.talkgroup)))
    }
}

// ---------------------------------------------------------------------------
// Start
// ---------------------------------------------------------------------------

/// Startet die Laufzeit einer Talkgruppe auf bereits gebundenen Sockets
///
/// Muss innerhalb einer Tokio-Runtime aufgerufen werden.
pub fn talkgruppe_starten(
    talkgroup: Talkgroup,
    transport: TalkgruppenTransport,
    config: LaufzeitConfig,
    koll: Kollaborateure,
) -> TalkgruppenHandle {
    let tg = talkgroup.group_id;
    let transport = Arc::new(transport);

    let sendepfad = sendepfad_bauen(
        (koll.codec_fabrik)(),
        koll.krypto.as_ref(),
        &config.aufbereitung,
    );
    let eigene_ssrc = sendepfad.ssrc();

    let buffer = geteilt(AdaptiveJitterBuffer::neu(config.jitter.clone(), koll.uhr.clone()));
    let wiedergabe = Wiedergabe::neu((koll.codec_fabrik)(), config.max_concealment);

    let session = TransmissionSession::neu(
        config.lokal,
        tg,
        config.client.clone(),
        buffer.clone(),
        eigene_ssrc,
    );
    let knoten = FloorKnoten::neu(
        config.modus,
        config.lokal,
        talkgroup,
        config.arbitrator.clone(),
        koll.mitgliedschaft.clone(),
        config.gossip_intervall_ms,
    );

    let (befehl_tx, befehl_rx) = mpsc::channel(BEFEHL_KANAL);
    let (eingang_tx, eingang_rx) = mpsc::channel(EINGANG_KANAL);
    let (audio_tx, audio_rx) = mpsc::channel(AUDIO_KANAL);
    let (wiedergabe_tx, wiedergabe_rx) = mpsc::channel(WIEDERGABE_KANAL);
    let (ereignis_tx, _) = broadcast::channel(EREIGNIS_KANAL);
    let (zustand_tx, zustand_rx) = watch::channel(SessionZustand::Listening);
    let (stopp_tx, stopp_rx) = watch::channel(false);

    if let Some(m) = &koll.metriken {
        m.talkgroups_active.inc();
    }

    let mut tasks = Vec::with_capacity(5);

    // Audio-Empfang
    {
        let krypto = koll.krypto.clone();
        let uhr = koll.uhr.clone();
        let kontext = KryptoKontext::audio(tg);
        let metriken = koll.metriken.clone();
        tasks.push(tokio::spawn(empfangs_schleife(
            Kanal::Audio,
            transport.clone(),
            eingang_tx.clone(),
            stopp_rx.clone(),
            koll.metriken.clone(),
            move |daten: &[u8]| {
                let klartext = krypto.decrypt(daten, &kontext)?;
                let paket = depacketize(&klartext, uhr.jetzt())?;
                if let Some(m) = &metriken {
                    m.rtp_packets_received_total.inc();
                }
                Some(Eingang::Audio(paket))
            },
        )));
    }

    // Steuer-Empfang
    {
        let krypto = koll.krypto.clone();
        let kontext = KryptoKontext::steuerung(tg);
        tasks.push(tokio::spawn(empfangs_schleife(
            Kanal::Steuerung,
            transport.clone(),
            eingang_tx.clone(),
            stopp_rx.clone(),
            koll.metriken.clone(),
            move |daten: &[u8]| {
                let klartext = krypto.decrypt(daten, &kontext)?;
                match FloorMessage::decode(&klartext) {
                    Ok(msg) => Some(Eingang::Steuerung(msg)),
                    Err(e) => {
                        tracing::debug!(talkgroup = %tg, fehler = %e, "FCP-Nachricht verworfen");
                        None
                    }
                }
            },
        )));
    }

    // Senden
    tasks.push(tokio::spawn(sende_task(
        sendepfad,
        audio_rx,
        transport.clone(),
        koll.krypto.clone(),
        tg,
        eingang_tx,
        stopp_rx.clone(),
        koll.metriken.clone(),
    )));

    // Wiedergabe
    tasks.push(tokio::spawn(wiedergabe_task(
        buffer,
        wiedergabe,
        config.jitter.frame_time_ms,
        wiedergabe_tx,
        stopp_rx,
        koll.metriken.clone(),
    )));

    // Session
    let session_task = SessionTask {
        lokal: config.lokal,
        talkgroup: tg,
        session,
        knoten,
        sprecher: SprecherZuordnung::neu(config.lokal, eigene_ssrc),
        uhr: koll.uhr.clone(),
        krypto: koll.krypto.clone(),
        transport: transport.clone(),
        audio: audio_tx.clone(),
        ereignisse: ereignis_tx.clone(),
        zustand: zustand_tx,
        metriken: koll.metriken.clone(),
    };
    tasks.push(tokio::spawn(session_task.laufen(
        befehl_rx,
        eingang_rx,
        stopp_tx,
        Duration::from_millis(config.tick_ms.max(1)),
    )));

    tracing::info!(
        talkgroup = %tg,
        lokal = %config.lokal,
        modus = ?config.modus,
        ssrc = eigene_ssrc,
        "Talkgruppe beigetreten"
    );

    TalkgruppenHandle {
        talkgroup: tg,
        befehle: befehl_tx,
        audio: audio_tx,
        ereignisse: ereignis_tx,
        zustand: zustand_rx,
        wiedergabe: Some(wiedergabe_rx),
        transport,
        tasks,
    }
}

// ---------------------------------------------------------------------------
// Session-Task
// ---------------------------------------------------------------------------

enum Arbeit {
    Ausgabe(SessionAusgabe),
    AnLokal(FloorMessage),
    AnNetz(FloorMessage),
}

struct SessionTask {
    lokal: DeviceId,
    talkgroup: TalkgroupId,
    session: TransmissionSession,
    knoten: FloorKnoten,
    sprecher: SprecherZuordnung,
    uhr: Arc<dyn Uhr>,
    krypto: Arc<dyn Krypto>,
    transport: Arc<TalkgruppenTransport>,
    audio: mpsc::Sender<SendeBefehl>,
    ereignisse: broadcast::Sender<FloorEreignis>,
    zustand: watch::Sender<SessionZustand>,
    metriken: Option<MeshtalkMetriken>,
}

impl SessionTask {
    async fn laufen(
        mut self,
        mut befehle: mpsc::Receiver<Befehl>,
        mut eingang: mpsc::Receiver<Eingang>,
        stopp: watch::Sender<bool>,
        tick: Duration,
    ) {
        let mut takt = tokio::time::interval(tick);
        takt.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                befehl = befehle.recv() => {
                    let ausgaben = match befehl {
                        Some(Befehl::Druecken { priority, is_emergency }) => {
                            self.session.druecken(priority, is_emergency, self.uhr.jetzt())
                        }
                        Some(Befehl::Loslassen) => self.session.loslassen(),
                        Some(Befehl::Verlassen) | None => {
                            let ausgaben = self.session.verlassen();
                            self.abarbeiten(ausgaben.into_iter().map(Arbeit::Ausgabe).collect()).await;
                            break;
                        }
                    };
                    self.abarbeiten(ausgaben.into_iter().map(Arbeit::Ausgabe).collect()).await;
                }
                Some(e) = eingang.recv() => {
                    let now = self.uhr.jetzt();
                    let arbeit = match e {
                        Eingang::Audio(paket) => {
                            // Zuordnung vor der Session, die waehrend des Sendens verwirft
                            let halter = self.knoten.halter();
                            if let Some(geraet) = self.sprecher.zuordnen(paket.ssrc, &halter, now) {
                                self.knoten.melde_aktivitaet(geraet, now);
                            }
                            self.session.audio_empfangen(paket);
                            VecDeque::new()
                        }
                        Eingang::Gesendet => {
                            self.knoten.melde_aktivitaet(self.lokal, now);
                            VecDeque::new()
                        }
                        Eingang::Steuerung(msg) => {
                            weiterleitung_einreihen(self.knoten.empfangen(&msg, now))
                        }
                        Eingang::TransportFehler(grund) => {
                            self.session.transport_fehler(grund).into_iter().map(Arbeit::Ausgabe).collect()
                        }
                        Eingang::TransportOk => {
                            self.session.transport_wiederhergestellt().into_iter().map(Arbeit::Ausgabe).collect()
                        }
                    };
                    self.abarbeiten(arbeit).await;
                }
                _ = takt.tick() => {
                    let now = self.uhr.jetzt();
                    let mut arbeit = weiterleitung_einreihen(self.knoten.tick(now));
                    arbeit.extend(self.session.tick(now).into_iter().map(Arbeit::Ausgabe));
                    self.abarbeiten(arbeit).await;
                }
            }
            self.zustand_melden();
        }

        self.zustand_melden();
        if let Some(m) = &self.metriken {
            m.talkgroups_active.dec();
        }
        let _ = stopp.send(true);
        tracing::debug!(talkgroup = %self.talkgroup, "Session-Task beendet");
    }

    /// Fuehrt Ausgaben aus bis keine Folgearbeit mehr entsteht
    async fn abarbeiten(&mut self, mut arbeit: VecDeque<Arbeit>) {
        while let Some(schritt) = arbeit.pop_front() {
            let now = self.uhr.jetzt();
            match schritt {
                Arbeit::Ausgabe(SessionAusgabe::Steuerung(msg)) => {
                    arbeit.extend(weiterleitung_einreihen(self.knoten.lokal_senden(msg, now)));
                }
                Arbeit::Ausgabe(SessionAusgabe::SendepfadStarten) => {
                    self.sendebefehl(SendeBefehl::Starten).await;
                }
                Arbeit::Ausgabe(SessionAusgabe::SendepfadStoppen) => {
                    self.sendebefehl(SendeBefehl::Stoppen).await;
                }
                Arbeit::Ausgabe(SessionAusgabe::Ereignis(ereignis)) => {
                    self.ereignis_melden(ereignis);
                }
                Arbeit::AnLokal(msg) => {
                    if msg.requester_id == self.lokal {
                        self.floor_metriken(&msg);
                    }
                    let ausgaben = self.session.steuerung_empfangen(&msg, now);
                    arbeit.extend(ausgaben.into_iter().map(Arbeit::Ausgabe));
                }
                Arbeit::AnNetz(msg) => {
                    if msg.requester_id != self.lokal {
                        self.floor_metriken(&msg);
                    }
                    if let Some(folge) = self.steuerung_senden(&msg).await {
                        arbeit.extend(folge.into_iter().map(Arbeit::Ausgabe));
                    }
                }
            }
        }
    }

    async fn sendebefehl(&self, befehl: SendeBefehl) {
        if self.audio.send(befehl).await.is_err() {
            tracing::warn!(talkgroup = %self.talkgroup, "Sende-Task beendet");
        }
    }

    /// Liefert Folgeausgaben wenn der Transport gestoert ist
    async fn steuerung_senden(&mut self, msg: &FloorMessage) -> Option<Vec<SessionAusgabe>> {
        let chiffrat = self
            .krypto
            .encrypt(&msg.encode(), &KryptoKontext::steuerung(self.talkgroup));
        match self.transport.steuerung.senden(&chiffrat).await {
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(talkgroup = %self.talkgroup, fehler = %e, "FCP-Nachricht nicht gesendet");
                if let Some(m) = &self.metriken {
                    m.transport_errors_total.inc();
                }
                Some(self.session.transport_fehler(format!("steuerung: {e}")))
            }
        }
    }

    fn ereignis_melden(&self, ereignis: FloorEreignis) {
        tracing::debug!(talkgroup = %self.talkgroup, ereignis = ?ereignis, "Floor-Ereignis");
        if let (FloorEreignis::AnfrageFehlgeschlagen { .. }, Some(m)) = (&ereignis, &self.metriken) {
            m.floor_request_failures_total.inc();
        }
        // Ohne Abonnenten geht das Ereignis verloren
        let _ = self.ereignisse.send(ereignis);
    }

    fn floor_metriken(&self, msg: &FloorMessage) {
        let Some(m) = &self.metriken else {
            return;
        };
        match msg.art {
            FloorNachrichtArt::Granted { .. } => m
                .floor_grants_total
                .with_label_values(&[msg.priority.als_str()])
                .inc(),
            FloorNachrichtArt::Denied { reason } => m
                .floor_denials_total
                .with_label_values(&[reason.als_str()])
                .inc(),
            FloorNachrichtArt::Revoked { reason } => m
                .floor_revocations_total
                .with_label_values(&[reason.als_str()])
                .inc(),
            _ => {}
        }
    }

    fn zustand_melden(&self) {
        let neu = self.session.zustand();
        self.zustand.send_if_modified(|z| {
            if *z == neu {
                false
            } else {
                tracing::info!(talkgroup = %self.talkgroup, zustand = ?neu, "Session-Zustand");
                *z = neu;
                true
            }
        });
    }
}

fn weiterleitung_einreihen(w: Weiterleitung) -> VecDeque<Arbeit> {
    w.an_netz
        .into_iter()
        .map(Arbeit::AnNetz)
        .chain(w.an_lokal.into_iter().map(Arbeit::AnLokal))
        .collect()
}

// ---------------------------------------------------------------------------
// Empfangs-Tasks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum Kanal {
    Audio,
    Steuerung,
}

impl Kanal {
    fn name(self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Steuerung => "steuerung",
        }
    }

    fn socket(self, transport: &TalkgruppenTransport) -> &GruppenSocket {
        match self {
            Self::Audio => &transport.audio,
            Self::Steuerung => &transport.steuerung,
        }
    }
}

async fn empfangs_schleife<F>(
    kanal: Kanal,
    transport: Arc<TalkgruppenTransport>,
    eingang: mpsc::Sender<Eingang>,
    mut stopp: watch::Receiver<bool>,
    metriken: Option<MeshtalkMetriken>,
    mut verarbeiten: F,
) where
    F: FnMut(&[u8]) -> Option<Eingang>,
{
    let socket = kanal.socket(&transport);
    let mut buf = vec![0u8; UDP_BUFFER_SIZE];
    let mut gestoert = false;

    loop {
        let ergebnis = tokio::select! {
            _ = stopp.changed() => break,
            r = socket.empfangen(&mut buf) => r,
        };

        match ergebnis {
            Ok((n, von)) => {
                if gestoert {
                    gestoert = false;
                    if eingang.send(Eingang::TransportOk).await.is_err() {
                        break;
                    }
                }
                let Some(e) = verarbeiten(&buf[..n]) else {
                    tracing::trace!(kanal = kanal.name(), von = %von, bytes = n, "Datagramm verworfen");
                    continue;
                };
                if eingang.send(e).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                if let Some(m) = &metriken {
                    m.transport_errors_total.inc();
                }
                if !gestoert {
                    gestoert = true;
                    tracing::warn!(kanal = kanal.name(), fehler = %e, "Empfang gestoert");
                    if eingang
                        .send(Eingang::TransportFehler(format!("{}: {e}", kanal.name())))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                tokio::select! {
                    _ = stopp.changed() => break,
                    _ = tokio::time::sleep(FEHLER_PAUSE) => {}
                }
            }
        }
    }
    tracing::debug!(kanal = kanal.name(), "Empfangs-Task beendet");
}

// ---------------------------------------------------------------------------
// Sende-Task
// ---------------------------------------------------------------------------

/// Sendepfad mit Platz fuer den Krypto-Zuschlag in jedem Paket
fn sendepfad_bauen(
    codec: Box<dyn AudioCodec>,
    krypto: &dyn Krypto,
    aufbereitung: &AufbereitungConfig,
) -> Sendepfad {
    let packetizer = RtpPacketizer::neu(codec.samples_pro_frame() as u32)
        .mit_reserve(krypto.zusatz_bytes());
    Sendepfad::mit_aufbereitung(codec, packetizer, aufbereitung)
}

#[allow(clippy::too_many_arguments)]
async fn sende_task(
    mut pfad: Sendepfad,
    mut befehle: mpsc::Receiver<SendeBefehl>,
    transport: Arc<TalkgruppenTransport>,
    krypto: Arc<dyn Krypto>,
    talkgroup: TalkgroupId,
    eingang: mpsc::Sender<Eingang>,
    mut stopp: watch::Receiver<bool>,
    metriken: Option<MeshtalkMetriken>,
) {
    let kontext = KryptoKontext::audio(talkgroup);
    let mut gestoert = false;

    loop {
        // Ausstehende Befehle (z.B. der letzte Stopp) vor dem Ende abarbeiten
        let befehl = tokio::select! {
            biased;
            b = befehle.recv() => match b {
                Some(b) => b,
                None => break,
            },
            _ = stopp.changed() => break,
        };

        let datagramme = match befehl {
            SendeBefehl::Starten => {
                pfad.starten();
                tracing::debug!(talkgroup = %talkgroup, "Sendepfad gestartet");
                continue;
            }
            SendeBefehl::Pcm(pcm) => pfad.aufnehmen(&pcm),
            SendeBefehl::Stoppen => {
                let rest = pfad.stoppen();
                tracing::debug!(talkgroup = %talkgroup, statistik = ?pfad.statistik(), "Sendepfad gestoppt");
                rest
            }
        };

        let mut gesendet = false;
        for datagramm in datagramme {
            let chiffrat = krypto.encrypt(&datagramm, &kontext);
            match transport.audio.senden(&chiffrat).await {
                Ok(_) => {
                    gestoert = false;
                    gesendet = true;
                    if let Some(m) = &metriken {
                        m.rtp_packets_sent_total.inc();
                    }
                }
                Err(e) => {
                    if let Some(m) = &metriken {
                        m.transport_errors_total.inc();
                    }
                    if !gestoert {
                        gestoert = true;
                        tracing::warn!(talkgroup = %talkgroup, fehler = %e, "RTP-Paket nicht gesendet");
                        let _ = eingang.try_send(Eingang::TransportFehler(format!("audio: {e}")));
                    }
                }
            }
        }
        // Eine Meldung pro Befehl; bei vollem Kanal folgt die naechste gleich
        if gesendet {
            let _ = eingang.try_send(Eingang::Gesendet);
        }
    }
    tracing::debug!(talkgroup = %talkgroup, "Sende-Task beendet");
}

// ---------------------------------------------------------------------------
// Wiedergabe-Task
// ---------------------------------------------------------------------------

async fn wiedergabe_task(
    buffer: GeteilterJitterBuffer,
    mut wiedergabe: Wiedergabe,
    frame_ms: u64,
    ausgabe: mpsc::Sender<PcmFrame>,
    mut stopp: watch::Receiver<bool>,
    metriken: Option<MeshtalkMetriken>,
) {
    let mut takt = tokio::time::interval(Duration::from_millis(frame_ms.max(1)));
    takt.set_missed_tick_behavior(MissedTickBehavior::Burst);
    let mut letzte = JitterBufferStatistik::default();
    let mut takte = 0u32;

    loop {
        tokio::select! {
            _ = stopp.changed() => break,
            _ = takt.tick() => {}
        }

        let (paket, verluste) = {
            let mut b = buffer.lock();
            (b.poll(), b.drain_verluste())
        };
        for frame in wiedergabe.verarbeiten(paket, verluste) {
            if ausgabe.try_send(frame).is_err() {
                tracing::trace!("Wiedergabe-Konsument hinkt hinterher, Frame verworfen");
            }
        }

        takte = takte.wrapping_add(1);
        if takte % METRIK_TAKTE == 0 {
            if let Some(m) = &metriken {
                let aktuell = buffer.lock().statistik().clone();
                jitter_metriken(m, &letzte, &aktuell);
                letzte = aktuell;
            }
        }
    }
    tracing::debug!(statistik = ?wiedergabe.statistik(), "Wiedergabe-Task beendet");
}

fn jitter_metriken(m: &MeshtalkMetriken, alt: &JitterBufferStatistik, neu: &JitterBufferStatistik) {
    m.jitter_late_total.inc_by(neu.verspaetet.saturating_sub(alt.verspaetet));
    m.jitter_lost_total.inc_by(neu.verloren.saturating_sub(alt.verloren));
    m.jitter_underruns_total
        .inc_by(neu.unterlaeufe.saturating_sub(alt.unterlaeufe));
    m.jitter_duplicates_total
        .inc_by(neu.duplikate.saturating_sub(alt.duplikate));
    m.jitter_depth_ms.set(neu.tiefe_ms as f64);
    m.jitter_seconds.observe(neu.jitter_ms / 1000.0);
}
