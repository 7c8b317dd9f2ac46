//! UDP-Transport fuer Talkgruppen (Multicast, optional Unicast)
//!
//! Pro Talkgruppe werden zwei Sockets gebunden: Audio auf `port`,
//! Floor-Steuerung auf `port + 1`. Beide treten derselben
//! Multicast-Gruppe bei und markieren ausgehende Pakete mit DSCP EF.
//!
//! ```text
//! socket2::Socket (reuse, tos, bind, join)
//!     |
//!     v
//! std::net::UdpSocket -> tokio::net::UdpSocket
//!     |
//!     +--> senden()     an Gruppe/Ziel
//!     +--> empfangen()  von allen Mitgliedern
//! ```

use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use tokio::net::UdpSocket;

/// Maximale Datagrammgroesse (RTP-Obergrenze)
pub const UDP_BUFFER_SIZE: usize = meshtalk_protocol::rtp::MAX_PACKET_SIZE;

/// DSCP Expedited Forwarding
pub const DSCP_EF: u8 = 46;

// ---------------------------------------------------------------------------
// Fehler
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum TransportFehler {
    #[error("Socket-Fehler ({schritt}): {quelle}")]
    Socket {
        schritt: &'static str,
        #[source]
        quelle: std::io::Error,
    },

    #[error("{0} ist keine Multicast-Adresse")]
    KeineMulticastAdresse(Ipv4Addr),

    #[error("Datagramm zu gross: {0} Bytes")]
    ZuGross(usize),

    #[error("E/A-Fehler: {0}")]
    Io(#[from] std::io::Error),
}

impl From<TransportFehler> for meshtalk_core::PttError {
    fn from(e: TransportFehler) -> Self {
        match e {
            TransportFehler::Io(io) => meshtalk_core::PttError::Io(io),
            andere => meshtalk_core::PttError::Ressource(andere.to_string()),
        }
    }
}

fn schritt(schritt: &'static str) -> impl FnOnce(std::io::Error) -> TransportFehler {
    move |quelle| TransportFehler::Socket { schritt, quelle }
}

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Socket-Optionen fuer den Talkgruppen-Transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Lokale Schnittstelle fuer den Gruppenbeitritt
    pub schnittstelle: Ipv4Addr,
    /// DSCP-Wert fuer ausgehende Pakete
    pub dscp: u8,
    /// Multicast-TTL (Hops)
    pub ttl: u32,
    /// Eigene Multicast-Pakete zurueckempfangen
    pub loopback: bool,
    /// Empfangspuffer des Kernels in Bytes
    pub empfangspuffer: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            schnittstelle: Ipv4Addr::UNSPECIFIED,
            dscp: DSCP_EF,
            ttl: 1,
            loopback: false,
            empfangspuffer: 256 * 1024,
        }
    }
}

// ---------------------------------------------------------------------------
// GruppenSocket
// ---------------------------------------------------------------------------

/// Gebundener UDP-Socket mit festem Ziel (Gruppe oder Unicast-Peer)
#[derive(Debug)]
pub struct GruppenSocket {
    socket: UdpSocket,
    ziel: SocketAddr,
    gruppe: Option<Ipv4Addr>,
    schnittstelle: Ipv4Addr,
}

impl GruppenSocket {
    /// Bindet auf `gruppe.port()` und tritt der Multicast-Gruppe bei
    ///
    /// Muss innerhalb einer Tokio-Runtime aufgerufen werden.
    pub fn multicast(gruppe: SocketAddrV4, config: &TransportConfig) -> Result<Self, TransportFehler> {
        let ip = *gruppe.ip();
        if !ip.is_multicast() {
            return Err(TransportFehler::KeineMulticastAdresse(ip));
        }

        let socket = socket_erstellen(config)?;
        let bind = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, gruppe.port());
        socket.bind(&bind.into()).map_err(schritt("bind"))?;
        socket
            .join_multicast_v4(&ip, &config.schnittstelle)
            .map_err(schritt("join_multicast_v4"))?;
        socket
            .set_multicast_loop_v4(config.loopback)
            .map_err(schritt("multicast_loop"))?;
        socket
            .set_multicast_ttl_v4(config.ttl)
            .map_err(schritt("multicast_ttl"))?;
        if !config.schnittstelle.is_unspecified() {
            socket
                .set_multicast_if_v4(&config.schnittstelle)
                .map_err(schritt("multicast_if"))?;
        }

        let socket = tokio_socket(socket)?;
        tracing::info!(
            gruppe = %gruppe,
            schnittstelle = %config.schnittstelle,
            dscp = config.dscp,
            "Multicast-Gruppe beigetreten"
        );

        Ok(Self {
            socket,
            ziel: SocketAddr::V4(gruppe),
            gruppe: Some(ip),
            schnittstelle: config.schnittstelle,
        })
    }

    /// Unicast-Variante (Punkt-zu-Punkt oder Tests auf Loopback)
    pub fn unicast(
        lokal: SocketAddrV4,
        ziel: SocketAddr,
        config: &TransportConfig,
    ) -> Result<Self, TransportFehler> {
        let socket = socket_erstellen(config)?;
        socket.bind(&lokal.into()).map_err(schritt("bind"))?;
        let socket = tokio_socket(socket)?;
        tracing::debug!(lokal = %lokal, ziel = %ziel, "Unicast-Socket gebunden");
        Ok(Self {
            socket,
            ziel,
            gruppe: None,
            schnittstelle: config.schnittstelle,
        })
    }

    /// Aendert das Ziel (nur sinnvoll fuer Unicast)
    pub fn ziel_setzen(&mut self, ziel: SocketAddr) {
        self.ziel = ziel;
    }

    pub fn ziel(&self) -> SocketAddr {
        self.ziel
    }

    pub fn lokale_adresse(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Sendet ein Datagramm an Gruppe bzw. Ziel
    pub async fn senden(&self, daten: &[u8]) -> Result<usize, TransportFehler> {
        if daten.len() > UDP_BUFFER_SIZE {
            return Err(TransportFehler::ZuGross(daten.len()));
        }
        let n = self.socket.send_to(daten, self.ziel).await?;
        tracing::trace!(bytes = n, ziel = %self.ziel, "UDP-Paket gesendet");
        Ok(n)
    }

    /// Wartet auf das naechste Datagramm
    pub async fn empfangen(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), TransportFehler> {
        Ok(self.socket.recv_from(buf).await?)
    }

    /// Verlaesst die Multicast-Gruppe (Unicast: ohne Wirkung)
    pub fn verlassen(&self) -> Result<(), TransportFehler> {
        if let Some(gruppe) = self.gruppe {
            socket2::SockRef::from(&self.socket)
                .leave_multicast_v4(&gruppe, &self.schnittstelle)
                .map_err(schritt("leave_multicast_v4"))?;
            tracing::info!(gruppe = %gruppe, "Multicast-Gruppe verlassen");
        }
        Ok(())
    }
}

fn socket_erstellen(config: &TransportConfig) -> Result<Socket, TransportFehler> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(schritt("socket"))?;
    socket.set_reuse_address(true).map_err(schritt("reuse_address"))?;
    #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
    socket.set_reuse_port(true).map_err(schritt("reuse_port"))?;

    // DSCP steht in den oberen 6 Bit des TOS-Bytes
    if let Err(e) = socket.set_tos((config.dscp as u32) << 2) {
        tracing::warn!(fehler = %e, dscp = config.dscp, "DSCP-Markierung nicht moeglich");
    }
    if let Err(e) = socket.set_recv_buffer_size(config.empfangspuffer) {
        tracing::debug!(fehler = %e, "Empfangspuffer nicht gesetzt");
    }
    socket.set_nonblocking(true).map_err(schritt("nonblocking"))?;
    Ok(socket)
}

fn tokio_socket(socket: Socket) -> Result<UdpSocket, TransportFehler> {
    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket).map_err(schritt("from_std"))
}

// ---------------------------------------------------------------------------
// TalkgruppenTransport
// ---------------------------------------------------------------------------

/// Audio- und Steuer-Socket einer Talkgruppe
#[derive(Debug)]
pub struct TalkgruppenTransport {
    pub audio: GruppenSocket,
    pub steuerung: GruppenSocket,
}

impl TalkgruppenTransport {
    /// Multicast auf `port` (Audio) und `port + 1` (Steuerung)
    pub fn multicast(
        adresse: Ipv4Addr,
        port: u16,
        config: &TransportConfig,
    ) -> Result<Self, TransportFehler> {
        Ok(Self {
            audio: GruppenSocket::multicast(SocketAddrV4::new(adresse, port), config)?,
            steuerung: GruppenSocket::multicast(
                SocketAddrV4::new(adresse, port.wrapping_add(1)),
                config,
            )?,
        })
    }

    pub fn verlassen(&self) -> Result<(), TransportFehler> {
        self.audio.verlassen()?;
        self.steuerung.verlassen()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback() -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)
    }

    #[tokio::test]
    async fn unicast_paket_kommt_an() {
        let config = TransportConfig::default();
        let b = GruppenSocket::unicast(loopback(), "127.0.0.1:9".parse().unwrap(), &config)
            .expect("binden");
        let b_addr = b.lokale_adresse().unwrap();
        let a = GruppenSocket::unicast(loopback(), b_addr, &config).expect("binden");

        a.senden(&[1, 2, 3, 4]).await.unwrap();

        let mut buf = [0u8; UDP_BUFFER_SIZE];
        let (n, von) = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            b.empfangen(&mut buf),
        )
        .await
        .expect("Timeout")
        .unwrap();
        assert_eq!(&buf[..n], &[1, 2, 3, 4]);
        assert_eq!(von, a.lokale_adresse().unwrap());
    }

    #[tokio::test]
    async fn zu_grosses_datagramm_wird_abgelehnt() {
        let config = TransportConfig::default();
        let a = GruppenSocket::unicast(loopback(), "127.0.0.1:9".parse().unwrap(), &config)
            .unwrap();
        let daten = vec![0u8; UDP_BUFFER_SIZE + 1];
        assert!(matches!(
            a.senden(&daten).await,
            Err(TransportFehler::ZuGross(_))
        ));
    }

    #[tokio::test]
    async fn unicast_adresse_ist_keine_gruppe() {
        let r = GruppenSocket::multicast(
            SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 5004),
            &TransportConfig::default(),
        );
        assert!(matches!(r, Err(TransportFehler::KeineMulticastAdresse(_))));
    }

    #[test]
    fn standard_markiert_ef() {
        let config = TransportConfig::default();
        assert_eq!(config.dscp, 46);
        assert_eq!((config.dscp as u32) << 2, 0xB8);
        assert!(!config.loopback);
    }
}
