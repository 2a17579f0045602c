//! Plain-text response describing the client certificate chain

use crate::icp_brasil::IdentityRecord;
use crate::peer::PeerCertificate;
use rustls::pki_types::CertificateDer;
use tracing::{info, warn};

/// Body returned when the connection carries no TLS peer context
pub const NO_TLS_BODY: &str = "TLS == nil";

/// Render the response body for a peer chain.
///
/// `None` means the connection exposed no peer certificates at all, which
/// mandatory verification should make unreachable.
pub fn render(chain: Option<&[CertificateDer<'_>]>) -> String {
    let Some(chain) = chain else {
        return NO_TLS_BODY.to_string();
    };

    info!("TLS peer certificates: {}", chain.len());

    let mut body = String::new();
    body.push_str("Request TLS\n");
    body.push_str(&format!("{} certificados\n\n", chain.len()));

    for der in chain {
        let peer = match PeerCertificate::from_der(der) {
            Ok(peer) => peer,
            Err(e) => {
                warn!("Skipping peer certificate: {}", e);
                continue;
            }
        };

        info!("Subject: {}", peer.subject());
        info!("Issuer: {}", peer.issuer());
        body.push_str(&format!("Subject: {}\n", peer.subject()));
        body.push_str(&format!("Issuer: {}\n", peer.issuer()));

        if let Some(identity) = peer.identity() {
            render_identity(&mut body, &identity);
        }
    }

    body
}

fn render_identity(body: &mut String, identity: &IdentityRecord) {
    body.push_str("\nDados do certificado\n");
    if identity.is_legal_entity() {
        body.push_str("Certificado para Pessoa Jurídica\n");
    } else {
        body.push_str("Certificado para Pessoa Física\n");
    }
    body.push_str(&format!(
        "Email do certificado: {}\n",
        identity.email().unwrap_or_default()
    ));

    for value in identity.values() {
        body.push_str(&format!("{}: {}\n", value.attribute.label(), value.text()));
    }
    body.push('\n');
}
