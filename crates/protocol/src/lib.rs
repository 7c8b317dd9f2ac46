//! meshtalk-protocol – Wire-Formate und Kollaborateur-Schnittstellen
//!
//! - [`rtp`]: 12-Byte-RTP-Header, Packetizer und Depacketizer fuer Audio
//! - [`floor`]: binaeres Floor-Control-Protokoll (FCP)
//! - [`wire`]: Laengenpraefix-Rahmung von FCP fuer Stream-Transporte
//! - [`codec`]: Codec-Schnittstelle (Opus extern, PCM-Passthrough intern)
//! - [`crypto`]: Krypto-Schnittstelle am Transportrand

pub mod codec;
pub mod crypto;
pub mod floor;
pub mod rtp;
pub mod wire;

pub use codec::{AudioCodec, OpusConfig, PcmCodec, PcmFrame};
pub use crypto::{KeineKrypto, Krypto, KryptoKanal, KryptoKontext};
pub use floor::{txn_vor, FcpFehler, FloorMessage, FloorNachrichtArt, Primitiv};
pub use rtp::{depacketize, RtpHeader, RtpPacket, RtpPacketizer};
pub use wire::FcpCodec;
