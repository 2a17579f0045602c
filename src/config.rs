//! Command line and environment configuration

use crate::mtls::HandshakePolicy;
use crate::trust_pool::DEFAULT_PATTERN;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// mTLS server that reports the ICP-Brasil identity of client certificates
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// HTTPS listen address
    #[arg(long, env = "ICP_MTLS_LISTEN", default_value = "0.0.0.0:443")]
    pub listen: SocketAddr,

    /// Plain HTTP listen address for the redirect to HTTPS
    #[arg(long, env = "ICP_MTLS_REDIRECT_LISTEN", default_value = "0.0.0.0:80")]
    pub redirect_listen: SocketAddr,

    /// Disable the HTTP redirect listener
    #[arg(long, env = "ICP_MTLS_NO_REDIRECT")]
    pub no_redirect: bool,

    /// Directory holding the trusted ICP-Brasil issuer certificates
    #[arg(long, env = "ICP_MTLS_CA_DIR", default_value = "./ICP-CAs")]
    pub ca_dir: PathBuf,

    /// Glob selecting certificate files inside the CA directory
    #[arg(long, env = "ICP_MTLS_CA_PATTERN", default_value = DEFAULT_PATTERN)]
    pub ca_pattern: String,

    /// Server certificate chain (PEM)
    #[arg(long, env = "ICP_MTLS_SERVER_CERT", default_value = "./localhost.cert")]
    pub server_cert: PathBuf,

    /// Server private key (PEM)
    #[arg(long, env = "ICP_MTLS_SERVER_KEY", default_value = "./localhost.key")]
    pub server_key: PathBuf,

    /// How client certificates are requested
    #[arg(long, env = "ICP_MTLS_HANDSHAKE", value_enum, default_value_t = HandshakePolicy::Static)]
    pub handshake: HandshakePolicy,

    /// Abort TLS handshakes slower than this many seconds; 0 disables the limit
    #[arg(long, env = "ICP_MTLS_HANDSHAKE_TIMEOUT_SECS", default_value_t = 10)]
    pub handshake_timeout_secs: u64,

    /// Log level used when RUST_LOG is not set
    #[arg(long, env = "ICP_MTLS_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// Resolved runtime settings
#[derive(Debug, Clone)]
pub struct Settings {
    /// HTTPS listen address
    pub listen: SocketAddr,
    /// Redirect listen address, `None` when disabled
    pub redirect_listen: Option<SocketAddr>,
    /// Trust directory
    pub ca_dir: PathBuf,
    /// Trust file pattern
    pub ca_pattern: String,
    /// Server certificate path
    pub server_cert: PathBuf,
    /// Server key path
    pub server_key: PathBuf,
    /// Handshake policy
    pub handshake: HandshakePolicy,
    /// Handshake deadline
    pub handshake_timeout: Option<Duration>,
}

impl From<Args> for Settings {
    fn from(args: Args) -> Self {
        Settings {
            listen: args.listen,
            redirect_listen: (!args.no_redirect).then_some(args.redirect_listen),
            ca_dir: args.ca_dir,
            ca_pattern: args.ca_pattern,
            server_cert: args.server_cert,
            server_key: args.server_key,
            handshake: args.handshake,
            handshake_timeout: (args.handshake_timeout_secs > 0)
                .then(|| Duration::from_secs(args.handshake_timeout_secs)),
        }
    }
}

/// Install the global fmt subscriber; `RUST_LOG` wins over `default_level`
pub fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}
