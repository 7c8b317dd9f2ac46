//! Krypto-Schnittstelle am Transportrand
//!
//! Gruppenschluessel-Verwaltung und Verschluesselung sind externe Bausteine.
//! Der Kern behandelt FCP- und Audio-Nutzdaten als opaken Klartext und
//! reicht sie direkt vor dem Senden bzw. nach dem Empfangen durch [`Krypto`].

use meshtalk_core::TalkgroupId;
use serde::{Deserialize, Serialize};

/// Kanal, auf dem die Nutzdaten laufen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KryptoKanal {
    /// Floor-Control-Nachrichten
    Steuerung,
    /// RTP-Audio
    Audio,
}

impl std::fmt::Display for KryptoKanal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KryptoKanal::Steuerung => write!(f, "steuerung"),
            KryptoKanal::Audio => write!(f, "audio"),
        }
    }
}

/// Kontext fuer einen Ver-/Entschluesselungsvorgang
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KryptoKontext {
    pub talkgroup: TalkgroupId,
    pub kanal: KryptoKanal,
}

impl KryptoKontext {
    pub fn steuerung(talkgroup: TalkgroupId) -> Self {
        Self {
            talkgroup,
            kanal: KryptoKanal::Steuerung,
        }
    }

    pub fn audio(talkgroup: TalkgroupId) -> Self {
        Self {
            talkgroup,
            kanal: KryptoKanal::Audio,
        }
    }
}

/// Externer Krypto-Baustein
///
/// `decrypt` liefert `None` wenn die Daten nicht authentisch sind oder kein
/// Schluessel vorliegt; das Paket wird dann verworfen.
pub trait Krypto: Send + Sync {
    fn encrypt(&self, klartext: &[u8], kontext: &KryptoKontext) -> Vec<u8>;

    fn decrypt(&self, chiffrat: &[u8], kontext: &KryptoKontext) -> Option<Vec<u8>>;

    /// Maximaler Zuwachs von `encrypt` gegenueber dem Klartext (Nonce, Tag)
    ///
    /// Der Sendepfad haelt diese Reserve in jedem RTP-Paket frei, damit das
    /// Chiffrat noch in einen UDP-Empfangspuffer passt.
    fn zusatz_bytes(&self) -> usize {
        0
    }
}

/// Keine Verschluesselung (nur fuer Tests und geschlossene Netze)
#[derive(Debug, Default, Clone, Copy)]
pub struct KeineKrypto;

impl Krypto for KeineKrypto {
    fn encrypt(&self, klartext: &[u8], _kontext: &KryptoKontext) -> Vec<u8> {
        klartext.to_vec()
    }

    fn decrypt(&self, chiffrat: &[u8], _kontext: &KryptoKontext) -> Option<Vec<u8>> {
        Some(chiffrat.to_vec())
    }
}
