//! Syslog transports: UDP, TCP and TLS.

use crate::traits::{PluginError, PluginResult};
use async_trait::async_trait;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::{lookup_host, TcpStream, UdpSocket};
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

/// A connected syslog transport.
#[async_trait]
pub trait SyslogTransport: Send {
    /// Sends one framed message.
    async fn send(&mut self, message: &str) -> PluginResult<()>;

    /// Whether messages need a trailing newline.
    fn line_delimited(&self) -> bool;

    /// Shuts the connection down once every message is sent.
    async fn close(&mut self) -> PluginResult<()> {
        Ok(())
    }
}

async fn resolve(server: &str, port: u16) -> PluginResult<SocketAddr> {
    lookup_host((server, port))
        .await
        .map_err(|e| {
            PluginError::Connection(format!("Unable to resolve syslog server {}: {}", server, e))
        })?
        .next()
        .ok_or_else(|| {
            PluginError::Connection(format!("No address found for syslog server {}.", server))
        })
}

fn send_error(protocol: &str, e: std::io::Error) -> PluginError {
    PluginError::Transport(format!(
        "Unable to send message to syslog server over {}: {}",
        protocol, e
    ))
}

pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    pub async fn connect(server: &str, port: u16) -> PluginResult<Self> {
        let addr = resolve(server, port).await?;
        let bind = if addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind).await.map_err(|e| {
            PluginError::Connection(format!("Unable to open UDP socket: {}", e))
        })?;
        socket.connect(addr).await.map_err(|e| {
            PluginError::Connection(format!("Unable to connect to {} over UDP: {}", addr, e))
        })?;
        Ok(Self { socket })
    }
}

#[async_trait]
impl SyslogTransport for UdpTransport {
    async fn send(&mut self, message: &str) -> PluginResult<()> {
        self.socket
            .send(message.as_bytes())
            .await
            .map(|_| ())
            .map_err(|e| send_error("UDP", e))
    }

    fn line_delimited(&self) -> bool {
        false
    }
}

pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    pub async fn connect(server: &str, port: u16) -> PluginResult<Self> {
        let addr = resolve(server, port).await?;
        let stream = TcpStream::connect(addr).await.map_err(|e| {
            PluginError::Connection(format!("Unable to connect to {} over TCP: {}", addr, e))
        })?;
        Ok(Self { stream })
    }
}

#[async_trait]
impl SyslogTransport for TcpTransport {
    async fn send(&mut self, message: &str) -> PluginResult<()> {
        self.stream
            .write_all(message.as_bytes())
            .await
            .map_err(|e| send_error("TCP", e))?;
        self.stream.flush().await.map_err(|e| send_error("TCP", e))
    }

    fn line_delimited(&self) -> bool {
        true
    }

    async fn close(&mut self) -> PluginResult<()> {
        self.stream.shutdown().await.map_err(|e| send_error("TCP", e))
    }
}

/// Builds the TLS client configuration, trusting either the given PEM CA
/// certificates or the webpki roots.
pub fn tls_client_config(ca_certificate: Option<&str>) -> PluginResult<ClientConfig> {
    let mut root_store = RootCertStore::empty();
    match ca_certificate.map(str::trim).filter(|pem| !pem.is_empty()) {
        Some(pem) => {
            let mut reader = pem.as_bytes();
            let mut added = 0usize;
            for cert in rustls_pemfile::certs(&mut reader) {
                let cert = cert.map_err(|e| {
                    PluginError::Configuration(format!("Unable to parse CA certificate: {}", e))
                })?;
                root_store.add(cert).map_err(|e| {
                    PluginError::Configuration(format!("Invalid CA certificate: {}", e))
                })?;
                added += 1;
            }
            if added == 0 {
                return Err(PluginError::Configuration(
                    "No certificate found in the provided CA certificate.".to_string(),
                ));
            }
        }
        None => root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
    }

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| PluginError::Configuration(format!("Invalid TLS configuration: {}", e)))?
        .with_root_certificates(root_store)
        .with_no_client_auth();
    Ok(config)
}

pub struct TlsTransport {
    stream: TlsStream<TcpStream>,
}

impl TlsTransport {
    pub async fn connect(
        server: &str,
        port: u16,
        ca_certificate: Option<&str>,
    ) -> PluginResult<Self> {
        let connector = TlsConnector::from(Arc::new(tls_client_config(ca_certificate)?));
        let server_name = ServerName::try_from(server.to_string()).map_err(|e| {
            PluginError::Configuration(format!("Invalid syslog server name {}: {}", server, e))
        })?;
        let tcp = TcpTransport::connect(server, port).await?;
        let stream = connector
            .connect(server_name, tcp.stream)
            .await
            .map_err(|e| {
                PluginError::Connection(format!(
                    "TLS handshake with {}:{} failed: {}",
                    server, port, e
                ))
            })?;
        Ok(Self { stream })
    }
}

#[async_trait]
impl SyslogTransport for TlsTransport {
    async fn send(&mut self, message: &str) -> PluginResult<()> {
        self.stream
            .write_all(message.as_bytes())
            .await
            .map_err(|e| send_error("TLS", e))?;
        self.stream.flush().await.map_err(|e| send_error("TLS", e))
    }

    fn line_delimited(&self) -> bool {
        true
    }

    /// Sends close_notify before closing the TCP stream.
    async fn close(&mut self) -> PluginResult<()> {
        self.stream.shutdown().await.map_err(|e| send_error("TLS", e))
    }
}

/// Opens a transport for the given protocol name.
pub async fn connect(
    protocol: &str,
    server: &str,
    port: u16,
    ca_certificate: Option<&str>,
) -> PluginResult<Box<dyn SyslogTransport>> {
    match protocol.to_uppercase().as_str() {
        "UDP" => Ok(Box::new(UdpTransport::connect(server, port).await?)),
        "TCP" => Ok(Box::new(TcpTransport::connect(server, port).await?)),
        "TLS" => Ok(Box::new(
            TlsTransport::connect(server, port, ca_certificate).await?,
        )),
        other => Err(PluginError::Configuration(format!(
            "Unsupported syslog protocol '{}'.",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{
        BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, Issuer,
        KeyPair, KeyUsagePurpose, SanType,
    };
    use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
    use rustls::ServerConfig;
    use std::net::IpAddr;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use tokio_rustls::TlsAcceptor;

    /// A throwaway CA and a 127.0.0.1 server certificate signed by it.
    struct TestPki {
        ca_pem: String,
        cert: CertificateDer<'static>,
        key: PrivateKeyDer<'static>,
    }

    fn test_pki() -> TestPki {
        let ca_key = KeyPair::generate().unwrap();
        let mut ca_params = CertificateParams::default();
        ca_params
            .distinguished_name
            .push(DnType::CommonName, "ioc-bridge test CA");
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
        let ca_cert = ca_params.self_signed(&ca_key).unwrap();

        let leaf_key = KeyPair::generate().unwrap();
        let mut leaf_params = CertificateParams::default();
        leaf_params
            .distinguished_name
            .push(DnType::CommonName, "syslog.test");
        leaf_params.subject_alt_names = vec![SanType::IpAddress(IpAddr::from([127, 0, 0, 1]))];
        leaf_params.is_ca = IsCa::NoCa;
        leaf_params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        leaf_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        let issuer = Issuer::from_params(&ca_params, ca_key);
        let leaf = leaf_params.signed_by(&leaf_key, &issuer).unwrap();

        TestPki {
            ca_pem: ca_cert.pem(),
            cert: leaf.der().clone(),
            key: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(leaf_key.serialize_der())),
        }
    }

    async fn tls_listener(pki: &TestPki) -> (TcpListener, TlsAcceptor) {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_no_client_auth()
            .with_single_cert(vec![pki.cert.clone()], pki.key.clone_key())
            .unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        (listener, TlsAcceptor::from(Arc::new(config)))
    }

    #[tokio::test]
    async fn test_udp_delivers_datagram() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = receiver.local_addr().unwrap().port();

        let mut transport = connect("udp", "127.0.0.1", port, None).await.unwrap();
        assert!(!transport.line_delimited());
        transport.send("<14>hello").await.unwrap();

        let mut buf = [0u8; 64];
        let n = receiver.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"<14>hello");
    }

    #[tokio::test]
    async fn test_tcp_delivers_stream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let reader = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = String::new();
            socket.read_to_string(&mut received).await.unwrap();
            received
        });

        let mut transport = connect("TCP", "127.0.0.1", port, None).await.unwrap();
        assert!(transport.line_delimited());
        transport.send("one\n").await.unwrap();
        transport.send("two\n").await.unwrap();
        transport.close().await.unwrap();

        assert_eq!(reader.await.unwrap(), "one\ntwo\n");
    }

    #[tokio::test]
    async fn test_tls_delivers_stream_and_closes_cleanly() {
        let pki = test_pki();
        let (listener, acceptor) = tls_listener(&pki).await;
        let port = listener.local_addr().unwrap().port();

        let reader = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut stream = acceptor.accept(socket).await.unwrap();
            let mut received = String::new();
            // Fails with UnexpectedEof unless the client sent close_notify.
            stream.read_to_string(&mut received).await.unwrap();
            received
        });

        let mut transport = connect("tls", "127.0.0.1", port, Some(&pki.ca_pem))
            .await
            .unwrap();
        assert!(transport.line_delimited());
        transport.send("<14>one\n").await.unwrap();
        transport.send("<14>two\n").await.unwrap();
        transport.close().await.unwrap();

        assert_eq!(reader.await.unwrap(), "<14>one\n<14>two\n");
    }

    #[tokio::test]
    async fn test_tls_rejects_untrusted_server() {
        let pki = test_pki();
        let other_ca = test_pki().ca_pem;
        let (listener, acceptor) = tls_listener(&pki).await;
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let _ = acceptor.accept(socket).await;
        });

        let err = connect("TLS", "127.0.0.1", port, Some(&other_ca))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, PluginError::Connection(_)));
    }

    #[tokio::test]
    async fn test_tcp_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = connect("TCP", "127.0.0.1", port, None).await.err().unwrap();
        assert!(matches!(err, PluginError::Connection(_)));
    }

    #[tokio::test]
    async fn test_unsupported_protocol() {
        let err = connect("RELP", "127.0.0.1", 514, None).await.err().unwrap();
        assert!(matches!(err, PluginError::Configuration(_)));
    }

    #[test]
    fn test_tls_config_rejects_garbage_ca() {
        assert!(tls_client_config(Some("not a certificate")).is_err());
        assert!(tls_client_config(None).is_ok());
    }
}
