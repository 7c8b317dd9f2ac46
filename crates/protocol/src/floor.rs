//! Floor-Control-Protokoll (FCP) – binaeres Nachrichtenformat
//!
//! Jede Nachricht besteht aus einem festen 20-Byte-Header und einer Folge
//! von TLV-Attributen. Direkte Byte-Serialisierung, kein serde (laeuft als
//! UDP-Datagramm an den Steuer-Port der Talkgruppe oder gerahmt ueber
//! einen Stream-Transport, siehe [`crate::wire`]).
//!
//! ## Header (big-endian)
//!
//! ```text
//! Offset  Len  Beschreibung
//! ------  ---  -----------
//!  0       1   Version (3 Bit) | reserviert (5 Bit)
//!  1       1   Primitiv
//!  2       2   Laenge der TLV-Attribute in Bytes
//!  4       4   Conference-ID (Talkgruppe)
//!  8       4   Transaction-ID
//! 12       4   User-ID (Anfrager)
//! 16       4   Floor-ID
//! 20+      N   TLV-Attribute: Typ (1) | Laenge (1) | Wert
//! ```
//!
//! Unbekannte Attribute werden uebersprungen. Fehlerhafte Nachrichten
//! liefern `Err(FcpFehler)` – der Aufrufer verwirft und loggt sie.

use bytes::{BufMut, Bytes, BytesMut};
use meshtalk_core::{DeviceId, FloorGrund, FloorRequest, Priority, TalkgroupId, Zeitstempel};
use thiserror::Error;

/// Aktuelle FCP-Version (3 Bit)
pub const FCP_VERSION: u8 = 2;

/// Groesse des festen Headers in Bytes
pub const FCP_HEADER_SIZE: usize = 20;

// TLV-Attributtypen
const ATTR_PRIORITY: u8 = 1;
const ATTR_DURATION: u8 = 2;
const ATTR_QUEUE_POSITION: u8 = 3;
const ATTR_REJECT_REASON: u8 = 4;
const ATTR_EMERGENCY: u8 = 5;
const ATTR_REQUEST_TIME: u8 = 6;
const ATTR_NEW_HOLDER: u8 = 7;

// ---------------------------------------------------------------------------
// Fehler
// ---------------------------------------------------------------------------

/// Parse-Fehler einer FCP-Nachricht
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FcpFehler {
    #[error("Nachricht zu kurz: {0} Bytes (erwartet mindestens {FCP_HEADER_SIZE})")]
    ZuKurz(usize),

    #[error("Ungueltige FCP-Version: {0} (erwartet {FCP_VERSION})")]
    Version(u8),

    #[error("Unbekanntes Primitiv: {0}")]
    UnbekanntesPrimitiv(u8),

    #[error("Laengenfeld inkonsistent: angegeben={angegeben}, vorhanden={vorhanden}")]
    LaengeInkonsistent { angegeben: usize, vorhanden: usize },

    #[error("TLV-Attribut abgeschnitten bei Offset {0}")]
    AttributAbgeschnitten(usize),

    #[error("Ungueltiger Wert fuer Attribut {attribut}")]
    UngueltigerWert { attribut: u8 },

    #[error("Pflichtattribut fehlt: {0}")]
    FehlendesAttribut(&'static str),
}

// ---------------------------------------------------------------------------
// Primitive
// ---------------------------------------------------------------------------

/// Nachrichtenart auf dem Draht
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Primitiv {
    Request = 0,
    Granted = 1,
    Denied = 2,
    Release = 3,
    Revoked = 4,
    Taken = 5,
    Idle = 6,
    QueuePosition = 7,
}

impl Primitiv {
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Request),
            1 => Some(Self::Granted),
            2 => Some(Self::Denied),
            3 => Some(Self::Release),
            4 => Some(Self::Revoked),
            5 => Some(Self::Taken),
            6 => Some(Self::Idle),
            7 => Some(Self::QueuePosition),
            _ => None,
        }
    }
}

/// Art-spezifischer Teil einer Floor-Nachricht
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloorNachrichtArt {
    Request {
        is_emergency: bool,
        request_time: Zeitstempel,
    },
    /// `max_hold_ms`: maximale Haltedauer, nach der der Client selbst freigibt
    Granted { max_hold_ms: u32 },
    Denied { reason: FloorGrund },
    Release,
    Revoked { reason: FloorGrund },
    /// Broadcast: `new_holder` spricht jetzt (im verteilten Modus auch Zustandsabgleich)
    Taken {
        new_holder: DeviceId,
        request_time: Zeitstempel,
    },
    /// Broadcast: niemand haelt den Floor
    Idle,
    QueuePosition {
        position: u16,
        estimated_wait_ms: u32,
    },
}

impl FloorNachrichtArt {
    /// Wire-Primitiv dieser Art
    pub fn primitiv(&self) -> Primitiv {
        match self {
            Self::Request { .. } => Primitiv::Request,
            Self::Granted { .. } => Primitiv::Granted,
            Self::Denied { .. } => Primitiv::Denied,
            Self::Release => Primitiv::Release,
            Self::Revoked { .. } => Primitiv::Revoked,
            Self::Taken { .. } => Primitiv::Taken,
            Self::Idle => Primitiv::Idle,
            Self::QueuePosition { .. } => Primitiv::QueuePosition,
        }
    }
}

// ---------------------------------------------------------------------------
// Transaktions-Arithmetik
// ---------------------------------------------------------------------------

/// Liegt Transaktion `a` (wrap-bewusst) vor `b`?
///
/// Clients vergeben Transaktions-IDs aufsteigend modulo 2^32 (0 wird
/// uebersprungen). Wie bei RTP-Sequenznummern gilt `a` als aelter, wenn
/// `b` hoechstens 2^31 - 1 Schritte weiter liegt.
pub fn txn_vor(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

// ---------------------------------------------------------------------------
// FloorMessage
// ---------------------------------------------------------------------------

/// Vollstaendige Floor-Control-Nachricht
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FloorMessage {
    pub talkgroup_id: TalkgroupId,
    pub transaction_id: u32,
    pub requester_id: DeviceId,
    pub floor_id: u32,
    pub priority: Priority,
    pub art: FloorNachrichtArt,
}

impl FloorMessage {
    /// Nachricht an/ueber eine konkrete Anfrage (uebernimmt Talkgruppe, Transaktion, Prioritaet)
    pub fn fuer_anfrage(req: &FloorRequest, art: FloorNachrichtArt) -> Self {
        Self {
            talkgroup_id: req.talkgroup_id,
            transaction_id: req.transaction_id,
            requester_id: req.requester_id,
            floor_id: 0,
            priority: req.priority,
            art,
        }
    }

    /// `Request` aus einer Floor-Anfrage
    pub fn request(req: &FloorRequest) -> Self {
        Self::fuer_anfrage(
            req,
            FloorNachrichtArt::Request {
                is_emergency: req.is_emergency,
                request_time: req.request_time,
            },
        )
    }

    /// `Taken`-Broadcast fuer einen Halter
    pub fn taken(halter: &FloorRequest) -> Self {
        let mut msg = Self::fuer_anfrage(
            halter,
            FloorNachrichtArt::Taken {
                new_holder: halter.requester_id,
                request_time: halter.request_time,
            },
        );
        // Notfall-Flag geht ueber die Stufe auf den Draht
        msg.priority = halter.effektive_prioritaet();
        msg
    }

    /// `Idle`-Broadcast
    pub fn idle(talkgroup_id: TalkgroupId, absender: DeviceId) -> Self {
        Self {
            talkgroup_id,
            transaction_id: 0,
            requester_id: absender,
            floor_id: 0,
            priority: Priority::Lowest,
            art: FloorNachrichtArt::Idle,
        }
    }

    /// Rekonstruiert die Floor-Anfrage aus einer `Request`-Nachricht
    pub fn als_anfrage(&self) -> Option<FloorRequest> {
        match self.art {
            FloorNachrichtArt::Request {
                is_emergency,
                request_time,
            } => Some(FloorRequest {
                requester_id: self.requester_id,
                talkgroup_id: self.talkgroup_id,
                priority: self.priority,
                is_emergency,
                request_time,
                transaction_id: self.transaction_id,
            }),
            _ => None,
        }
    }

    /// Rekonstruiert die Anfrage des Halters aus einer `Taken`-Nachricht
    pub fn halter_anfrage(&self) -> Option<FloorRequest> {
        match self.art {
            FloorNachrichtArt::Taken {
                new_holder,
                request_time,
            } => Some(FloorRequest {
                requester_id: new_holder,
                talkgroup_id: self.talkgroup_id,
                priority: self.priority,
                is_emergency: self.priority == Priority::Emergency,
                request_time,
                transaction_id: self.transaction_id,
            }),
            _ => None,
        }
    }

    /// Ist die Nachricht ein Broadcast (nicht an einen einzelnen Anfrager gerichtet)?
    pub fn ist_broadcast(&self) -> bool {
        matches!(
            self.art,
            FloorNachrichtArt::Taken { .. } | FloorNachrichtArt::Idle
        )
    }

    // -----------------------------------------------------------------------
    // Encode
    // -----------------------------------------------------------------------

    /// Serialisiert die Nachricht
    pub fn encode(&self) -> Bytes {
        let mut attribute = BytesMut::with_capacity(32);
        tlv(&mut attribute, ATTR_PRIORITY, &[self.priority.as_u8()]);

        match self.art {
            FloorNachrichtArt::Request {
                is_emergency,
                request_time,
            } => {
                tlv(&mut attribute, ATTR_EMERGENCY, &[is_emergency as u8]);
                tlv(&mut attribute, ATTR_REQUEST_TIME, &request_time.als_ms().to_be_bytes());
            }
            FloorNachrichtArt::Granted { max_hold_ms } => {
                tlv(&mut attribute, ATTR_DURATION, &max_hold_ms.to_be_bytes());
            }
            FloorNachrichtArt::Denied { reason } | FloorNachrichtArt::Revoked { reason } => {
                tlv(&mut attribute, ATTR_REJECT_REASON, &[reason as u8]);
            }
            FloorNachrichtArt::Release | FloorNachrichtArt::Idle => {}
            FloorNachrichtArt::Taken {
                new_holder,
                request_time,
            } => {
                tlv(&mut attribute, ATTR_NEW_HOLDER, &new_holder.inner().to_be_bytes());
                tlv(&mut attribute, ATTR_REQUEST_TIME, &request_time.als_ms().to_be_bytes());
            }
            FloorNachrichtArt::QueuePosition {
                position,
                estimated_wait_ms,
            } => {
                tlv(&mut attribute, ATTR_QUEUE_POSITION, &position.to_be_bytes());
                tlv(&mut attribute, ATTR_DURATION, &estimated_wait_ms.to_be_bytes());
            }
        }

        let mut buf = BytesMut::with_capacity(FCP_HEADER_SIZE + attribute.len());
        buf.put_u8(FCP_VERSION << 5);
        buf.put_u8(self.art.primitiv() as u8);
        buf.put_u16(attribute.len() as u16);
        buf.put_u32(self.talkgroup_id.inner());
        buf.put_u32(self.transaction_id);
        buf.put_u32(self.requester_id.inner());
        buf.put_u32(self.floor_id);
        buf.put_slice(&attribute);
        buf.freeze()
    }

    // -----------------------------------------------------------------------
    // Decode
    // -----------------------------------------------------------------------

    /// Deserialisiert und validiert eine Nachricht
    ///
    /// Ueberzaehlige Bytes nach den angegebenen TLV-Attributen sind ein Fehler,
    /// damit abgeschnittene oder verkettete Datagramme auffallen.
    pub fn decode(buf: &[u8]) -> Result<Self, FcpFehler> {
        if buf.len() < FCP_HEADER_SIZE {
            return Err(FcpFehler::ZuKurz(buf.len()));
        }

        let version = buf[0] >> 5;
        if version != FCP_VERSION {
            return Err(FcpFehler::Version(version));
        }

        let primitiv =
            Primitiv::from_u8(buf[1]).ok_or(FcpFehler::UnbekanntesPrimitiv(buf[1]))?;

        let laenge = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        let vorhanden = buf.len() - FCP_HEADER_SIZE;
        if laenge != vorhanden {
            return Err(FcpFehler::LaengeInkonsistent {
                angegeben: laenge,
                vorhanden,
            });
        }

        let talkgroup_id = TalkgroupId(be_u32(&buf[4..8]));
        let transaction_id = be_u32(&buf[8..12]);
        let requester_id = DeviceId(be_u32(&buf[12..16]));
        let floor_id = be_u32(&buf[16..20]);

        let attr = Attribute::lesen(&buf[FCP_HEADER_SIZE..])?;

        let priority = attr.priority.ok_or(FcpFehler::FehlendesAttribut("priority"))?;

        let art = match primitiv {
            Primitiv::Request => FloorNachrichtArt::Request {
                is_emergency: attr.emergency.unwrap_or(false),
                request_time: attr
                    .request_time
                    .ok_or(FcpFehler::FehlendesAttribut("request_time"))?,
            },
            Primitiv::Granted => FloorNachrichtArt::Granted {
                max_hold_ms: attr.duration.ok_or(FcpFehler::FehlendesAttribut("duration"))?,
            },
            Primitiv::Denied => FloorNachrichtArt::Denied {
                reason: attr
                    .reason
                    .ok_or(FcpFehler::FehlendesAttribut("reject_reason"))?,
            },
            Primitiv::Release => FloorNachrichtArt::Release,
            Primitiv::Revoked => FloorNachrichtArt::Revoked {
                reason: attr
                    .reason
                    .ok_or(FcpFehler::FehlendesAttribut("reject_reason"))?,
            },
            Primitiv::Taken => FloorNachrichtArt::Taken {
                new_holder: attr
                    .new_holder
                    .ok_or(FcpFehler::FehlendesAttribut("new_holder"))?,
                request_time: attr.request_time.unwrap_or_default(),
            },
            Primitiv::Idle => FloorNachrichtArt::Idle,
            Primitiv::QueuePosition => FloorNachrichtArt::QueuePosition {
                position: attr
                    .queue_position
                    .ok_or(FcpFehler::FehlendesAttribut("queue_position"))?,
                estimated_wait_ms: attr.duration.unwrap_or(0),
            },
        };

        Ok(Self {
            talkgroup_id,
            transaction_id,
            requester_id,
            floor_id,
            priority,
            art,
        })
    }
}

// ---------------------------------------------------------------------------
// TLV-Hilfen
// ---------------------------------------------------------------------------

fn tlv(buf: &mut BytesMut, typ: u8, wert: &[u8]) {
    buf.put_u8(typ);
    buf.put_u8(wert.len() as u8);
    buf.put_slice(wert);
}

fn be_u32(b: &[u8]) -> u32 {
    u32::from_be_bytes([b[0], b[1], b[2], b[3]])
}

/// Gelesene TLV-Attribute (alle optional, Pflicht je nach Primitiv)
#[derive(Default)]
struct Attribute {
    priority: Option<Priority>,
    duration: Option<u32>,
    queue_position: Option<u16>,
    reason: Option<FloorGrund>,
    emergency: Option<bool>,
    request_time: Option<Zeitstempel>,
    new_holder: Option<DeviceId>,
}

impl Attribute {
    fn lesen(mut rest: &[u8]) -> Result<Self, FcpFehler> {
        let mut attr = Attribute::default();
        let mut offset = FCP_HEADER_SIZE;

        while !rest.is_empty() {
            if rest.len() < 2 {
                return Err(FcpFehler::AttributAbgeschnitten(offset));
            }
            let typ = rest[0];
            let laenge = rest[1] as usize;
            if rest.len() < 2 + laenge {
                return Err(FcpFehler::AttributAbgeschnitten(offset));
            }
            let wert = &rest[2..2 + laenge];
            let ungueltig = FcpFehler::UngueltigerWert { attribut: typ };

            match (typ, laenge) {
                (ATTR_PRIORITY, 1) => {
                    attr.priority = Some(Priority::from_u8(wert[0]).ok_or(ungueltig)?);
                }
                (ATTR_DURATION, 4) => attr.duration = Some(be_u32(wert)),
                (ATTR_QUEUE_POSITION, 2) => {
                    attr.queue_position = Some(u16::from_be_bytes([wert[0], wert[1]]));
                }
                (ATTR_REJECT_REASON, 1) => {
                    attr.reason = Some(FloorGrund::from_u8(wert[0]).ok_or(ungueltig)?);
                }
                (ATTR_EMERGENCY, 1) => attr.emergency = Some(wert[0] != 0),
                (ATTR_REQUEST_TIME, 8) => {
                    let mut b = [0u8; 8];
                    b.copy_from_slice(wert);
                    attr.request_time = Some(Zeitstempel(u64::from_be_bytes(b)));
                }
                (ATTR_NEW_HOLDER, 4) => attr.new_holder = Some(DeviceId(be_u32(wert))),
                (ATTR_PRIORITY..=ATTR_NEW_HOLDER, _) => return Err(ungueltig),
                _ => {
                    tracing::trace!(typ, laenge, "Unbekanntes FCP-Attribut uebersprungen");
                }
            }

            rest = &rest[2 + laenge..];
            offset += 2 + laenge;
        }

        Ok(attr)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn anfrage() -> FloorRequest {
        FloorRequest {
            requester_id: DeviceId(0x0A0B0C0D),
            talkgroup_id: TalkgroupId(42),
            priority: Priority::Flash,
            is_emergency: true,
            request_time: Zeitstempel(1_700_000_000_123),
            transaction_id: 7,
        }
    }

    #[test]
    fn header_layout() {
        let bytes = FloorMessage::request(&anfrage()).encode();
        assert_eq!(bytes[0] >> 5, FCP_VERSION);
        assert_eq!(bytes[0] & 0x1F, 0);
        assert_eq!(bytes[1], Primitiv::Request as u8);
        assert_eq!(&bytes[4..8], &42u32.to_be_bytes());
        assert_eq!(&bytes[8..12], &7u32.to_be_bytes());
        assert_eq!(&bytes[12..16], &[0x0A, 0x0B, 0x0C, 0x0D]);
        let laenge = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;
        assert_eq!(bytes.len(), FCP_HEADER_SIZE + laenge);
    }

    #[test]
    fn request_rekonstruiert_anfrage() {
        let req = anfrage();
        let msg = FloorMessage::decode(&FloorMessage::request(&req).encode()).unwrap();
        assert_eq!(msg.als_anfrage(), Some(req));
    }

    #[test]
    fn alle_arten_ueberleben_den_draht() {
        let req = anfrage();
        let arten = [
            FloorNachrichtArt::Granted { max_hold_ms: 60_000 },
            FloorNachrichtArt::Denied {
                reason: FloorGrund::MaxQueueExceeded,
            },
            FloorNachrichtArt::Release,
            FloorNachrichtArt::Revoked {
                reason: FloorGrund::Preempted,
            },
            FloorNachrichtArt::Taken {
                new_holder: DeviceId(99),
                request_time: Zeitstempel(5),
            },
            FloorNachrichtArt::Idle,
            FloorNachrichtArt::QueuePosition {
                position: 3,
                estimated_wait_ms: 30_000,
            },
        ];
        for art in arten {
            let msg = FloorMessage::fuer_anfrage(&req, art);
            assert_eq!(FloorMessage::decode(&msg.encode()), Ok(msg), "{:?}", art);
        }
    }

    #[test]
    fn taken_liefert_halter_anfrage() {
        let mut halter = anfrage();
        halter.is_emergency = false;
        let msg = FloorMessage::decode(&FloorMessage::taken(&halter).encode()).unwrap();
        assert!(msg.ist_broadcast());
        assert_eq!(msg.halter_anfrage(), Some(halter));
    }

    #[test]
    fn decode_zu_kurz() {
        assert_eq!(FloorMessage::decode(&[0u8; 10]), Err(FcpFehler::ZuKurz(10)));
    }

    #[test]
    fn decode_falsche_version() {
        let mut bytes = FloorMessage::request(&anfrage()).encode().to_vec();
        bytes[0] = 1 << 5;
        assert_eq!(FloorMessage::decode(&bytes), Err(FcpFehler::Version(1)));
    }

    #[test]
    fn decode_unbekanntes_primitiv() {
        let mut bytes = FloorMessage::request(&anfrage()).encode().to_vec();
        bytes[1] = 200;
        assert_eq!(
            FloorMessage::decode(&bytes),
            Err(FcpFehler::UnbekanntesPrimitiv(200))
        );
    }

    #[test]
    fn decode_abgeschnittene_nachricht() {
        let bytes = FloorMessage::request(&anfrage()).encode();
        let kurz = &bytes[..bytes.len() - 3];
        assert!(matches!(
            FloorMessage::decode(kurz),
            Err(FcpFehler::LaengeInkonsistent { .. })
        ));
    }

    #[test]
    fn decode_ungueltige_prioritaet() {
        let mut bytes = FloorMessage::request(&anfrage()).encode().to_vec();
        // Erstes Attribut ist immer PRIORITY: Typ, Laenge, Wert
        bytes[FCP_HEADER_SIZE + 2] = 9;
        assert_eq!(
            FloorMessage::decode(&bytes),
            Err(FcpFehler::UngueltigerWert {
                attribut: ATTR_PRIORITY
            })
        );
    }

    #[test]
    fn decode_fehlende_pflichtattribute() {
        let msg = FloorMessage::fuer_anfrage(&anfrage(), FloorNachrichtArt::Release);
        let mut bytes = msg.encode().to_vec();
        // Primitiv auf Denied umbiegen – REJECT_REASON fehlt
        bytes[1] = Primitiv::Denied as u8;
        assert_eq!(
            FloorMessage::decode(&bytes),
            Err(FcpFehler::FehlendesAttribut("reject_reason"))
        );
    }

    #[test]
    fn unbekannte_attribute_werden_uebersprungen() {
        let msg = FloorMessage::fuer_anfrage(&anfrage(), FloorNachrichtArt::Release);
        let mut bytes = msg.encode().to_vec();
        bytes.extend_from_slice(&[0xF0, 2, 0xAA, 0xBB]);
        let laenge = (bytes.len() - FCP_HEADER_SIZE) as u16;
        bytes[2..4].copy_from_slice(&laenge.to_be_bytes());
        assert_eq!(FloorMessage::decode(&bytes), Ok(msg));
    }

    #[test]
    fn transaktionsvergleich_ueber_den_wrap() {
        assert!(txn_vor(1, 2));
        assert!(!txn_vor(2, 1));
        assert!(!txn_vor(5, 5));
        assert!(txn_vor(u32::MAX, 1));
        assert!(!txn_vor(1, u32::MAX));
        assert!(txn_vor(u32::MAX - 3, u32::MAX));
    }

    #[test]
    fn decode_beliebiger_muell_panikt_nicht() {
        for laenge in 0..64usize {
            let muell: Vec<u8> = (0..laenge).map(|i| (i * 37 + 11) as u8).collect();
            let _ = FloorMessage::decode(&muell);
        }
    }
}
