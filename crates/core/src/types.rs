//! Gemeinsame Identifikations- und Datentypen fuer meshtalk
//!
//! Alle IDs verwenden das Newtype-Pattern um Verwechslungen zwischen
//! verschiedenen ID-Arten zur Compilezeit auszuschliessen. Auf dem Draht
//! sind beide IDs 32 Bit breit (siehe Floor-Control-Header).

use crate::clock::Zeitstempel;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::net::Ipv4Addr;

// ---------------------------------------------------------------------------
// DeviceId
// ---------------------------------------------------------------------------

/// Stabile Geraetekennung (dient auch als deterministischer Tiebreak)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub u32);

impl DeviceId {
    /// Erstellt eine neue zufaellige DeviceId (niemals 0)
    pub fn zufaellig() -> Self {
        Self(rand::random::<u32>().max(1))
    }

    /// Gibt den inneren Wert zurueck
    pub fn inner(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "geraet:{:08x}", self.0)
    }
}

// ---------------------------------------------------------------------------
// TalkgroupId
// ---------------------------------------------------------------------------

/// Kennung einer Talkgruppe (Kanal mit eigenem Floor)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TalkgroupId(pub u32);

impl TalkgroupId {
    /// Gibt den inneren Wert zurueck
    pub fn inner(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for TalkgroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tg:{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Priority
// ---------------------------------------------------------------------------

/// Prioritaetsstufe einer Floor-Anfrage (8 Stufen, strikt total geordnet)
///
/// Ein numerisch hoeherer Wert schlaegt immer einen niedrigeren.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Priority {
    Lowest = 0,
    Low = 1,
    Routine = 2,
    #[default]
    Normal = 3,
    High = 4,
    Flash = 5,
    Immediate = 6,
    /// Lebensrettende Notfall-Uebertragung – verdraengt jeden Nicht-Notfall-Halter
    Emergency = 7,
}

impl Priority {
    /// Alle Stufen in aufsteigender Reihenfolge
    pub const ALLE: [Priority; 8] = [
        Priority::Lowest,
        Priority::Low,
        Priority::Routine,
        Priority::Normal,
        Priority::High,
        Priority::Flash,
        Priority::Immediate,
        Priority::Emergency,
    ];

    /// Konvertiert ein Byte in eine `Priority`
    pub fn from_u8(byte: u8) -> Option<Self> {
        Self::ALLE.get(byte as usize).copied()
    }

    /// Wire-Wert der Stufe
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Kurzname (wie in der Konfiguration) fuer Logs und Metrik-Labels
    pub fn als_str(self) -> &'static str {
        match self {
            Self::Lowest => "lowest",
            Self::Low => "low",
            Self::Routine => "routine",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Flash => "flash",
            Self::Immediate => "immediate",
            Self::Emergency => "emergency",
        }
    }
}

// ---------------------------------------------------------------------------
// FloorGrund
// ---------------------------------------------------------------------------

/// Grund fuer `Denied` bzw. `Revoked`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum FloorGrund {
    ServerError = 0,
    PermissionDenied = 1,
    InvalidFloor = 2,
    FloorAlreadyHeld = 3,
    MaxQueueExceeded = 4,
    Preempted = 5,
    TimeLimitExceeded = 6,
    Inactivity = 7,
    Administrative = 8,
}

impl FloorGrund {
    /// Konvertiert ein Byte in einen `FloorGrund`
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::ServerError),
            1 => Some(Self::PermissionDenied),
            2 => Some(Self::InvalidFloor),
            3 => Some(Self::FloorAlreadyHeld),
            4 => Some(Self::MaxQueueExceeded),
            5 => Some(Self::Preempted),
            6 => Some(Self::TimeLimitExceeded),
            7 => Some(Self::Inactivity),
            8 => Some(Self::Administrative),
            _ => None,
        }
    }

    /// Kurzname fuer Logs und Metrik-Labels
    pub fn als_str(self) -> &'static str {
        match self {
            Self::ServerError => "server_error",
            Self::PermissionDenied => "permission_denied",
            Self::InvalidFloor => "invalid_floor",
            Self::FloorAlreadyHeld => "floor_already_held",
            Self::MaxQueueExceeded => "max_queue_exceeded",
            Self::Preempted => "preempted",
            Self::TimeLimitExceeded => "time_limit_exceeded",
            Self::Inactivity => "inactivity",
            Self::Administrative => "administrative",
        }
    }
}

// ---------------------------------------------------------------------------
// Talkgroup
// ---------------------------------------------------------------------------

fn standard_sprecher() -> u8 {
    1
}

/// Ein Kanal mit eigenem Floor, eigener Mitgliedschaft und Multicast-Adresse
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Talkgroup {
    pub group_id: TalkgroupId,
    /// Multicast-Gruppe fuer Audio (Floor-Control nutzt `port + 1`)
    pub multicast_address: Ipv4Addr,
    pub port: u16,
    /// Maximale Anzahl gleichzeitiger Sprecher (Standard: 1)
    #[serde(default = "standard_sprecher")]
    pub max_simultaneous_talkers: u8,
    /// Erlaubt Verdraengung durch hoehere (Nicht-Notfall-)Prioritaeten
    #[serde(default)]
    pub priority_boost_enabled: bool,
}

impl Talkgroup {
    /// Erstellt eine Talkgruppe mit einem Sprecher und ohne Priority-Boost
    pub fn neu(group_id: TalkgroupId, multicast_address: Ipv4Addr, port: u16) -> Self {
        Self {
            group_id,
            multicast_address,
            port,
            max_simultaneous_talkers: 1,
            priority_boost_enabled: false,
        }
    }

    /// Port fuer die Floor-Control-Nachrichten dieser Talkgruppe
    pub fn steuer_port(&self) -> u16 {
        self.port.wrapping_add(1)
    }
}

// ---------------------------------------------------------------------------
// FloorRequest
// ---------------------------------------------------------------------------

/// Unveraenderliche Floor-Anfrage eines Teilnehmers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FloorRequest {
    pub requester_id: DeviceId,
    pub talkgroup_id: TalkgroupId,
    pub priority: Priority,
    pub is_emergency: bool,
    pub request_time: Zeitstempel,
    /// Pro Anfrager monoton steigend; korreliert Antworten, unterdrueckt Duplikate
    pub transaction_id: u32,
}

impl FloorRequest {
    /// Prioritaet unter Beruecksichtigung des Notfall-Flags
    pub fn effektive_prioritaet(&self) -> Priority {
        if self.is_emergency {
            Priority::Emergency
        } else {
            self.priority
        }
    }

    /// Ist die Anfrage ein Notfall (Flag oder Stufe `Emergency`)?
    pub fn ist_notfall(&self) -> bool {
        self.effektive_prioritaet() == Priority::Emergency
    }

    /// Totale Rangordnung: `Less` bedeutet "kommt zuerst dran"
    ///
    /// Reihenfolge: Prioritaet absteigend, Anfragezeit aufsteigend,
    /// Geraetekennung aufsteigend. Auf allen Knoten identisch.
    pub fn rang_vergleich(&self, andere: &FloorRequest) -> Ordering {
        andere
            .effektive_prioritaet()
            .cmp(&self.effektive_prioritaet())
            .then(self.request_time.cmp(&andere.request_time))
            .then(self.requester_id.cmp(&andere.requester_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anfrage(id: u32, prio: Priority, zeit: u64) -> FloorRequest {
        FloorRequest {
            requester_id: DeviceId(id),
            talkgroup_id: TalkgroupId(1),
            priority: prio,
            is_emergency: false,
            request_time: Zeitstempel(zeit),
            transaction_id: 1,
        }
    }

    #[test]
    fn prioritaet_strikt_geordnet() {
        for paar in Priority::ALLE.windows(2) {
            assert!(paar[0] < paar[1]);
        }
        assert_eq!(Priority::Emergency.as_u8(), 7);
        assert_eq!(Priority::Lowest.as_u8(), 0);
    }

    #[test]
    fn prioritaet_byte_konvertierung() {
        for p in Priority::ALLE {
            assert_eq!(Priority::from_u8(p.as_u8()), Some(p));
        }
        assert_eq!(Priority::from_u8(8), None);
    }

    #[test]
    fn grund_byte_konvertierung() {
        assert_eq!(FloorGrund::from_u8(5), Some(FloorGrund::Preempted));
        assert_eq!(FloorGrund::from_u8(9), None);
    }

    #[test]
    fn rang_hoehere_prioritaet_zuerst() {
        let a = anfrage(9, Priority::Flash, 100);
        let b = anfrage(1, Priority::Routine, 0);
        assert_eq!(a.rang_vergleich(&b), Ordering::Less);
    }

    #[test]
    fn rang_gleichstand_zeit_dann_id() {
        let frueh = anfrage(9, Priority::Routine, 10);
        let spaet = anfrage(1, Priority::Routine, 20);
        assert_eq!(frueh.rang_vergleich(&spaet), Ordering::Less);

        let klein = anfrage(1, Priority::Routine, 10);
        let gross = anfrage(2, Priority::Routine, 10);
        assert_eq!(klein.rang_vergleich(&gross), Ordering::Less);
    }

    #[test]
    fn notfall_flag_hebt_prioritaet() {
        let mut a = anfrage(1, Priority::Low, 0);
        a.is_emergency = true;
        assert!(a.ist_notfall());
        assert_eq!(a.effektive_prioritaet(), Priority::Emergency);
    }

    #[test]
    fn device_id_display() {
        assert_eq!(DeviceId(0xAB).to_string(), "geraet:000000ab");
        assert_ne!(DeviceId::zufaellig().inner(), 0);
    }

    #[test]
    fn talkgroup_steuer_port() {
        let tg = Talkgroup::neu(TalkgroupId(3), Ipv4Addr::new(239, 1, 1, 3), 5004);
        assert_eq!(tg.steuer_port(), 5005);
        assert_eq!(tg.max_simultaneous_talkers, 1);
    }

    #[test]
    fn talkgroup_serde_standardwerte() {
        let json = r#"{"group_id":7,"multicast_address":"239.0.0.7","port":6000}"#;
        let tg: Talkgroup = serde_json::from_str(json).unwrap();
        assert_eq!(tg.max_simultaneous_talkers, 1);
        assert!(!tg.priority_boost_enabled);
    }
}
