//! HTTPS server answering every request with the client certificate report

use crate::error::Result;
use crate::listener::{with_timeout, ConnectionSource, OneShotListener, TlsConnection, TlsListener};
use crate::mtls::{HandshakePolicy, MtlsConfig};
use crate::report;
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use rustls::pki_types::CertificateDer;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinError, JoinSet};
use tokio_rustls::rustls::{self, ServerConfig};
use tokio_rustls::LazyConfigAcceptor;
use tracing::{debug, error, info, warn};

/// Serves the certificate report over mandatory mTLS
#[derive(Debug)]
pub struct IdentityServer {
    config: MtlsConfig,
    handshake_timeout: Option<Duration>,
}

impl IdentityServer {
    /// Create a server for the given configuration
    pub fn new(config: MtlsConfig) -> Self {
        IdentityServer {
            config,
            handshake_timeout: None,
        }
    }

    /// Abort handshakes that take longer than `timeout`
    pub fn with_handshake_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Accept and serve connections until the task is dropped
    pub async fn run(self, tcp: TcpListener) -> Result<()> {
        info!(
            addr = %tcp.local_addr()?,
            policy = %self.config.policy(),
            "mTLS server listening"
        );

        match self.config.policy() {
            HandshakePolicy::Static => {
                let listener = TlsListener::new(tcp, self.config.acceptor(), self.handshake_timeout);
                serve(listener).await;
            }
            HandshakePolicy::ForcedPerConnection => {
                self.run_forced(tcp).await;
            }
        }

        Ok(())
    }

    async fn run_forced(&self, tcp: TcpListener) {
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                accepted = tcp.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let config = self.config.server_config();
                        let limit = self.handshake_timeout;
                        connections.spawn(async move {
                            match forced_handshake(stream, config, limit).await {
                                Ok(conn) => serve(OneShotListener::new(conn, peer)).await,
                                Err(e) => warn!(peer = %peer, error = %e, "Forced handshake failed"),
                            }
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "TCP accept failed");
                    }
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    log_join(joined);
                }
            }
        }
    }
}

/// Read the ClientHello and run a full handshake right away
async fn forced_handshake(
    stream: TcpStream,
    config: Arc<ServerConfig>,
    limit: Option<Duration>,
) -> Result<TlsConnection> {
    let acceptor = LazyConfigAcceptor::new(rustls::server::Acceptor::default(), stream);

    with_timeout(
        async move {
            let start = acceptor.await?;
            debug!(
                sni = ?start.client_hello().server_name(),
                "ClientHello received, requesting client certificate"
            );
            start.into_stream(config).await
        },
        limit,
    )
    .await
}

/// Serve every connection the source yields, then wait for them to finish
pub async fn serve<L: ConnectionSource>(mut listener: L) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            next = listener.accept() => match next {
                Some((conn, peer)) => {
                    connections.spawn(serve_connection(conn, peer));
                }
                None => break,
            },
            Some(joined) = connections.join_next(), if !connections.is_empty() => {
                log_join(joined);
            }
        }
    }

    while let Some(joined) = connections.join_next().await {
        log_join(joined);
    }
}

fn log_join(joined: std::result::Result<(), JoinError>) {
    if let Err(e) = joined {
        error!(error = %e, "Connection task panicked");
    }
}

async fn serve_connection(conn: TlsConnection, peer: SocketAddr) {
    // verified once at handshake, reused by every request on the connection
    let chain: Option<Arc<[CertificateDer<'static>]>> =
        conn.get_ref().1.peer_certificates().map(Arc::from);

    debug!(
        peer = %peer,
        certificates = chain.as_ref().map_or(0, |c| c.len()),
        "Serving connection"
    );

    let service = service_fn(move |req: Request<Incoming>| {
        let chain = chain.clone();
        async move { Ok::<_, Infallible>(report_response(&req, chain.as_deref())) }
    });

    if let Err(e) = http1::Builder::new()
        .serve_connection(TokioIo::new(conn), service)
        .await
    {
        debug!(peer = %peer, error = %e, "Connection closed with error");
    }
}

fn report_response(
    req: &Request<Incoming>,
    chain: Option<&[CertificateDer<'static>]>,
) -> Response<Full<Bytes>> {
    debug!(method = %req.method(), uri = %req.uri(), "Request");

    let mut response = Response::new(Full::new(Bytes::from(report::render(chain))));
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server_identity::ServerIdentity;
    use crate::testing::{
        client_config, client_leaf, connect, ecnpj_san, fetch, get, mtls_config, other_name,
        rfc822_name, san, server_leaf, TestCa,
    };
    use crate::trust_pool::TrustPool;

    const CNPJ_LINE: &str = "Número do Cadastro Nacional de Pessoa Jurídica (CNPJ): 12345678000199";

    async fn start(config: MtlsConfig) -> SocketAddr {
        let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = tcp.local_addr().unwrap();
        let server = IdentityServer::new(config).with_handshake_timeout(Some(Duration::from_secs(5)));
        tokio::spawn(server.run(tcp));
        addr
    }

    async fn assert_reports_cnpj(policy: HandshakePolicy) {
        let ca = TestCa::new("AC Teste");
        let addr = start(mtls_config(&ca, policy)).await;

        let client = client_leaf(&ca, "EMPRESA LTDA:12345678000199", Some(ecnpj_san("12345678000199")));
        let response = fetch(addr, client_config(&ca, &client)).await.unwrap();

        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains("content-type: text/plain; charset=utf-8\r\n"));
        assert!(response.contains("Request TLS\n1 certificados\n\n"));
        assert!(response.contains("Certificado para Pessoa Jurídica\n"));
        assert!(response.lines().any(|line| line == CNPJ_LINE));
    }

    async fn assert_rejects_untrusted(policy: HandshakePolicy) {
        let ca = TestCa::new("AC Teste");
        let addr = start(mtls_config(&ca, policy)).await;

        let rogue_ca = TestCa::new("AC Falsa");
        let client = client_leaf(&rogue_ca, "INTRUSO", Some(ecnpj_san("99999999000199")));
        match fetch(addr, client_config(&ca, &client)).await {
            Err(_) => {}
            Ok(response) => assert!(!response.contains("Request TLS")),
        }
    }

    #[tokio::test]
    async fn test_static_reports_cnpj() {
        assert_reports_cnpj(HandshakePolicy::Static).await;
    }

    #[tokio::test]
    async fn test_forced_reports_cnpj() {
        assert_reports_cnpj(HandshakePolicy::ForcedPerConnection).await;
    }

    #[tokio::test]
    async fn test_static_rejects_untrusted_client() {
        assert_rejects_untrusted(HandshakePolicy::Static).await;
    }

    #[tokio::test]
    async fn test_forced_rejects_untrusted_client() {
        assert_rejects_untrusted(HandshakePolicy::ForcedPerConnection).await;
    }

    #[tokio::test]
    async fn test_empty_pool_rejects_every_client() {
        let ca = TestCa::new("AC Teste");
        let server = server_leaf(&ca);
        let identity = ServerIdentity::new(vec![server.cert.clone()], server.key()).unwrap();
        let config = MtlsConfig::new(&identity, &TrustPool::builder().build(), HandshakePolicy::Static)
            .unwrap();
        let addr = start(config).await;

        let client = client_leaf(&ca, "EMPRESA LTDA", None);
        match fetch(addr, client_config(&ca, &client)).await {
            Err(_) => {}
            Ok(response) => assert!(!response.contains("Request TLS")),
        }
    }

    async fn handshake_kinds(policy: HandshakePolicy) -> [Option<rustls::HandshakeKind>; 2] {
        let ca = TestCa::new("AC Teste");
        let addr = start(mtls_config(&ca, policy)).await;

        let client = client_leaf(&ca, "PRIMEIRA LTDA", Some(ecnpj_san("11111111000111")));
        // one client config, so its session cache is shared by both connections
        let config = client_config(&ca, &client);

        let mut kinds = [None, None];
        for kind in &mut kinds {
            let mut stream = connect(addr, config.clone()).await.unwrap();
            // reading to the end also consumes any TLS 1.3 ticket
            let response = get(&mut stream).await.unwrap();
            assert!(response.contains("CN=PRIMEIRA LTDA"));
            assert!(response.contains("(CNPJ): 11111111000111"));
            *kind = stream.get_ref().1.handshake_kind();
        }
        kinds
    }

    #[tokio::test]
    async fn test_forced_sequential_connections_each_handshake() {
        let kinds = handshake_kinds(HandshakePolicy::ForcedPerConnection).await;
        assert_eq!(
            kinds,
            [Some(rustls::HandshakeKind::Full), Some(rustls::HandshakeKind::Full)]
        );
    }

    #[tokio::test]
    async fn test_static_sequential_connections_resume() {
        let kinds = handshake_kinds(HandshakePolicy::Static).await;
        assert_eq!(
            kinds,
            [Some(rustls::HandshakeKind::Full), Some(rustls::HandshakeKind::Resumed)]
        );
    }

    #[tokio::test]
    async fn test_forced_distinct_clients_report_their_own_certificate() {
        let ca = TestCa::new("AC Teste");
        let addr = start(mtls_config(&ca, HandshakePolicy::ForcedPerConnection)).await;

        let first = client_leaf(&ca, "PRIMEIRA LTDA", Some(ecnpj_san("11111111000111")));
        let second = client_leaf(&ca, "SEGUNDA LTDA", Some(ecnpj_san("22222222000122")));

        let response = fetch(addr, client_config(&ca, &first)).await.unwrap();
        assert!(response.contains("CN=PRIMEIRA LTDA"));
        let response = fetch(addr, client_config(&ca, &second)).await.unwrap();
        assert!(response.contains("CN=SEGUNDA LTDA"));
        assert!(response.contains("(CNPJ): 22222222000122"));
    }

    #[tokio::test]
    async fn test_cnpj_with_inconsistent_inner_length() {
        let ca = TestCa::new("AC Teste");
        let addr = start(mtls_config(&ca, HandshakePolicy::Static)).await;

        // IA5String header declares 12 bytes, 14 digits follow
        let names = san(&[
            other_name("2.16.76.1.3.3", b"\x16\x0C12345678000199"),
            rfc822_name("contato@empresa.com.br"),
        ]);
        let client = client_leaf(&ca, "EMPRESA LTDA", Some(names));
        let response = fetch(addr, client_config(&ca, &client)).await.unwrap();

        assert!(response.contains("Certificado para Pessoa Física\n"));
        assert!(response.contains("Email do certificado: contato@empresa.com.br\n"));
        assert!(response.lines().any(|line| line == CNPJ_LINE));
    }

    #[tokio::test]
    async fn test_forced_failure_does_not_affect_open_connection() {
        let ca = TestCa::new("AC Teste");
        let addr = start(mtls_config(&ca, HandshakePolicy::ForcedPerConnection)).await;

        let trusted = client_leaf(&ca, "EMPRESA LTDA", Some(ecnpj_san("12345678000199")));
        let mut open = connect(addr, client_config(&ca, &trusted)).await.unwrap();

        let rogue_ca = TestCa::new("AC Falsa");
        let untrusted = client_leaf(&rogue_ca, "INTRUSO", None);
        match fetch(addr, client_config(&ca, &untrusted)).await {
            Err(_) => {}
            Ok(response) => assert!(!response.contains("Request TLS")),
        }

        let response = get(&mut open).await.unwrap();
        assert!(response.lines().any(|line| line == CNPJ_LINE));
    }
}
