//! Certificate and DER fixtures shared by the unit tests

use crate::mtls::{HandshakePolicy, MtlsConfig};
use crate::server_identity::ServerIdentity;
use crate::trust_pool::TrustPool;
use der::asn1::ObjectIdentifier;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, CustomExtension, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, IsCa,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName};
use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::{self, ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

/// Encode a TLV with a definite length
pub(crate) fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    let len = content.len();
    if len < 0x80 {
        out.push(len as u8);
    } else if len <= 0xFF {
        out.extend_from_slice(&[0x81, len as u8]);
    } else {
        out.extend_from_slice(&[0x82, (len >> 8) as u8, len as u8]);
    }
    out.extend_from_slice(content);
    out
}

/// `[0]` otherName with the value wrapped in `[0] EXPLICIT`
pub(crate) fn other_name(oid: &str, value_tlv: &[u8]) -> Vec<u8> {
    let oid = ObjectIdentifier::new_unwrap(oid);
    let mut content = tlv(0x06, oid.as_bytes());
    content.extend(tlv(0xA0, value_tlv));
    tlv(0xA0, &content)
}

/// `[1]` rfc822Name
pub(crate) fn rfc822_name(email: &str) -> Vec<u8> {
    tlv(0x81, email.as_bytes())
}

/// GeneralNames SEQUENCE
pub(crate) fn san(names: &[Vec<u8>]) -> Vec<u8> {
    tlv(0x30, &names.concat())
}

/// subjectAltName of an e-CNPJ certificate carrying the given CNPJ
pub(crate) fn ecnpj_san(cnpj: &str) -> Vec<u8> {
    let person_data: [&[u8]; 5] = [
        b"01021980",
        b"12345678909",
        b"10987654321",
        b"000001234567890",
        b"SSP SP",
    ];
    san(&[
        other_name("2.16.76.1.3.4", &tlv(0x04, &person_data.concat())),
        other_name("2.16.76.1.3.2", &tlv(0x04, b"MARIA DA SILVA")),
        other_name("2.16.76.1.3.3", &tlv(0x16, cnpj.as_bytes())),
        rfc822_name("contato@empresa.com.br"),
    ])
}

pub(crate) struct TestCa {
    cert: Certificate,
}

impl TestCa {
    pub(crate) fn new(common_name: &str) -> Self {
        let mut params = CertificateParams::new(Vec::<String>::new());
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.distinguished_name = DistinguishedName::new();
        params.distinguished_name.push(DnType::CountryName, "BR");
        params.distinguished_name.push(DnType::OrganizationName, "ICP-Brasil");
        params.distinguished_name.push(DnType::CommonName, common_name);

        TestCa {
            cert: Certificate::from_params(params).unwrap(),
        }
    }

    pub(crate) fn der(&self) -> CertificateDer<'static> {
        CertificateDer::from(self.cert.serialize_der().unwrap())
    }

    pub(crate) fn pem(&self) -> String {
        self.cert.serialize_pem().unwrap()
    }
}

pub(crate) struct TestLeaf {
    pub(crate) cert: CertificateDer<'static>,
    pub(crate) cert_pem: String,
    pub(crate) key_der: Vec<u8>,
    pub(crate) key_pem: String,
}

impl TestLeaf {
    pub(crate) fn key(&self) -> PrivateKeyDer<'static> {
        PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.key_der.clone()))
    }
}

fn sign(params: CertificateParams, ca: &TestCa) -> TestLeaf {
    let cert = Certificate::from_params(params).unwrap();
    let der = cert.serialize_der_with_signer(&ca.cert).unwrap();
    let cert_pem = cert.serialize_pem_with_signer(&ca.cert).unwrap();
    TestLeaf {
        cert: CertificateDer::from(der),
        cert_pem,
        key_der: cert.serialize_private_key_der(),
        key_pem: cert.serialize_private_key_pem(),
    }
}

/// Server certificate for `localhost`
pub(crate) fn server_leaf(ca: &TestCa) -> TestLeaf {
    let mut params = CertificateParams::new(vec!["localhost".to_string()]);
    params.distinguished_name = DistinguishedName::new();
    params.distinguished_name.push(DnType::CommonName, "localhost");
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
    sign(params, ca)
}

/// Client certificate with an optional raw subjectAltName value
pub(crate) fn client_leaf(ca: &TestCa, common_name: &str, san: Option<Vec<u8>>) -> TestLeaf {
    let mut params = CertificateParams::new(Vec::<String>::new());
    params.distinguished_name = DistinguishedName::new();
    params.distinguished_name.push(DnType::CountryName, "BR");
    params.distinguished_name.push(DnType::StateOrProvinceName, "SP");
    params.distinguished_name.push(DnType::LocalityName, "Sao Paulo");
    params.distinguished_name.push(DnType::OrganizationName, "ICP-Brasil");
    params.distinguished_name.push(DnType::OrganizationalUnitName, "RFB e-CNPJ A1");
    params.distinguished_name.push(DnType::CommonName, common_name);
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
    if let Some(san) = san {
        params
            .custom_extensions
            .push(CustomExtension::from_oid_content(&[2, 5, 29, 17], san));
    }
    sign(params, ca)
}

/// rustls client trusting `ca` and presenting `client`
pub(crate) fn client_config(ca: &TestCa, client: &TestLeaf) -> Arc<ClientConfig> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut roots = RootCertStore::empty();
    roots.add(ca.der()).unwrap();

    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_root_certificates(roots)
        .with_client_auth_cert(vec![client.cert.clone()], client.key())
        .unwrap();
    Arc::new(config)
}

/// Server configuration signed by `ca` that also trusts only `ca`
pub(crate) fn mtls_config(ca: &TestCa, policy: HandshakePolicy) -> MtlsConfig {
    let server = server_leaf(ca);
    let identity = ServerIdentity::new(vec![server.cert.clone()], server.key()).unwrap();

    let mut builder = TrustPool::builder();
    builder.add_pem(Path::new("memory"), ca.pem().as_bytes());
    MtlsConfig::new(&identity, &builder.build(), policy).unwrap()
}

/// Open a TLS session to `localhost` at `addr`
pub(crate) async fn connect(
    addr: SocketAddr,
    config: Arc<ClientConfig>,
) -> io::Result<TlsStream<TcpStream>> {
    let tcp = TcpStream::connect(addr).await?;
    let name = ServerName::try_from("localhost")
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    TlsConnector::from(config).connect(name, tcp).await
}

/// Send one `GET /` on an open session and read until the server closes it
pub(crate) async fn get(stream: &mut TlsStream<TcpStream>) -> io::Result<String> {
    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await?;

    let mut response = Vec::new();
    match stream.read_to_end(&mut response).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof && !response.is_empty() => {}
        Err(e) => return Err(e),
    }
    Ok(String::from_utf8_lossy(&response).into_owned())
}

/// Connect and issue one request
pub(crate) async fn fetch(addr: SocketAddr, config: Arc<ClientConfig>) -> io::Result<String> {
    let mut stream = connect(addr, config).await?;
    get(&mut stream).await
}
