//! TLS credentials for the QUIC listener.
//!
//! Credentials are resolved in a fixed order:
//! 1. an explicit certificate/key pair (`PEER_CERT` + `PEER_KEY`, or config)
//! 2. the development pair under `~/.config/hswarm/`
//! 3. a freshly generated self-signed certificate, only when asked for
//!
//! Anything else is a startup failure.
//!
//! The listener speaks raw QUIC under its own ALPN, not HTTP/3 WebTransport;
//! clients must offer [`ALPN_PROTOCOL`] to complete the handshake.

use crate::config::Config;
use quinn::crypto::rustls::{NoInitialCipherSuite, QuicServerConfig};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Application protocol negotiated on every session
pub const ALPN_PROTOCOL: &str = "hswarm/1";

const DEFAULT_CERT_FILE: &str = "dev-cert.pem";
const DEFAULT_KEY_FILE: &str = "dev-key.pem";

/// Where the server credential comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    /// Certificate and key files named by the operator
    Explicit { cert: PathBuf, key: PathBuf },
    /// The development pair found in the default directory
    DevDefault { cert: PathBuf, key: PathBuf },
    /// In-memory self-signed certificate
    SelfSigned,
}

/// A loaded certificate chain and its private key
#[derive(Debug)]
pub struct Credentials {
    pub cert_chain: Vec<CertificateDer<'static>>,
    pub key: PrivateKeyDer<'static>,
}

/// Credential errors; all of them are fatal at startup
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error(
        "TLS cert/key required. Set PEER_CERT/PEER_KEY env or place dev-cert.pem/dev-key.pem under {} (checked: {}), or pass --self-signed",
        default_dir_display(.default_dir.as_deref()),
        display_paths(.checked)
    )]
    MissingCredentials {
        default_dir: Option<PathBuf>,
        checked: Vec<PathBuf>,
    },
    #[error("Failed to load PEM from '{}': {source}", .path.display())]
    Pem {
        path: PathBuf,
        source: rustls::pki_types::pem::Error,
    },
    #[error("No certificates found in '{}'", .0.display())]
    EmptyCertificate(PathBuf),
    #[error("Failed to generate self-signed certificate: {0}")]
    SelfSigned(#[from] rcgen::Error),
    #[error("Invalid TLS configuration: {0}")]
    Rustls(#[from] rustls::Error),
    #[error("TLS configuration unusable for QUIC: {0}")]
    Quic(#[from] NoInitialCipherSuite),
}

/// Directory probed for the development pair (`~/.config/hswarm`)
pub fn default_credential_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config/hswarm"))
}

/// Pick a credential source.
///
/// An explicit pair is used only when both paths are set; a lone cert or key
/// falls through to the default directory. Paths are checked for existence,
/// not contents.
pub fn resolve_credentials(
    cert: Option<&Path>,
    key: Option<&Path>,
    default_dir: Option<&Path>,
    allow_self_signed: bool,
) -> Result<CredentialSource, TlsError> {
    let mut checked = Vec::new();

    if let (Some(cert), Some(key)) = (cert, key) {
        return Ok(CredentialSource::Explicit {
            cert: cert.to_path_buf(),
            key: key.to_path_buf(),
        });
    }

    if let Some(dir) = default_dir {
        let cert = dir.join(DEFAULT_CERT_FILE);
        let key = dir.join(DEFAULT_KEY_FILE);
        if cert.is_file() && key.is_file() {
            return Ok(CredentialSource::DevDefault { cert, key });
        }
        checked.push(cert);
        checked.push(key);
    }

    if allow_self_signed {
        return Ok(CredentialSource::SelfSigned);
    }

    Err(TlsError::MissingCredentials {
        default_dir: default_dir.map(Path::to_path_buf),
        checked,
    })
}

impl CredentialSource {
    /// Load the certificate chain and key this source points at.
    ///
    /// `hostname` is the subject name used for a self-signed certificate.
    pub fn load(&self, hostname: &str) -> Result<Credentials, TlsError> {
        match self {
            CredentialSource::Explicit { cert, key }
            | CredentialSource::DevDefault { cert, key } => load_pem_pair(cert, key),
            CredentialSource::SelfSigned => self_signed(hostname),
        }
    }
}

/// Read a PEM certificate chain and private key from disk.
pub fn load_pem_pair(cert: &Path, key: &Path) -> Result<Credentials, TlsError> {
    let pem_error = |path: &Path| {
        let path = path.to_path_buf();
        move |source| TlsError::Pem { path, source }
    };

    let cert_chain = CertificateDer::pem_file_iter(cert)
        .map_err(pem_error(cert))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(pem_error(cert))?;
    if cert_chain.is_empty() {
        return Err(TlsError::EmptyCertificate(cert.to_path_buf()));
    }

    let key = PrivateKeyDer::from_pem_file(key).map_err(pem_error(key))?;

    Ok(Credentials { cert_chain, key })
}

/// Generate a certificate for `localhost` and `hostname`.
pub fn self_signed(hostname: &str) -> Result<Credentials, TlsError> {
    let mut names = vec!["localhost".to_string()];
    if hostname != "localhost" {
        names.push(hostname.to_string());
    }

    let rcgen::CertifiedKey { cert, key_pair } = rcgen::generate_simple_self_signed(names)?;
    Ok(Credentials {
        cert_chain: vec![cert.der().clone()],
        key: PrivatePkcs8KeyDer::from(key_pair.serialize_der()).into(),
    })
}

/// Build the QUIC server config from loaded credentials.
pub fn server_config(
    credentials: Credentials,
    max_streams: u32,
) -> Result<quinn::ServerConfig, TlsError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut crypto = rustls::ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13])?
        .with_no_client_auth()
        .with_single_cert(credentials.cert_chain, credentials.key)?;
    crypto.alpn_protocols = vec![ALPN_PROTOCOL.as_bytes().to_vec()];

    let mut server_config =
        quinn::ServerConfig::with_crypto(Arc::new(QuicServerConfig::try_from(crypto)?));

    let mut transport = quinn::TransportConfig::default();
    transport
        .max_concurrent_bidi_streams(max_streams.into())
        .max_concurrent_uni_streams(0u32.into());
    server_config.transport_config(Arc::new(transport));

    Ok(server_config)
}

/// Resolve, load and assemble the listener's TLS configuration.
pub fn load_server_config(config: &Config) -> Result<quinn::ServerConfig, TlsError> {
    let default_dir = default_credential_dir();
    let source = resolve_credentials(
        config.cert_path.as_deref(),
        config.key_path.as_deref(),
        default_dir.as_deref(),
        config.self_signed,
    )?;

    match &source {
        CredentialSource::Explicit { cert, key } => {
            info!(cert = %cert.display(), key = %key.display(), "Using configured TLS credentials")
        }
        CredentialSource::DevDefault { cert, key } => {
            info!(cert = %cert.display(), key = %key.display(), "Using development TLS credentials")
        }
        CredentialSource::SelfSigned => {
            warn!(
                host = %config.host,
                "Using a self-signed certificate; peers must skip verification"
            )
        }
    }

    server_config(source.load(&config.host)?, config.max_streams)
}

fn default_dir_display(dir: Option<&Path>) -> String {
    match dir {
        Some(dir) => format!("{}/", dir.display()),
        None => "~/.config/hswarm/".to_string(),
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    if paths.is_empty() {
        return "nothing".to_string();
    }
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_dev_pair(dir: &Path) -> (PathBuf, PathBuf) {
        let rcgen::CertifiedKey { cert, key_pair } =
            rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let cert_path = dir.join(DEFAULT_CERT_FILE);
        let key_path = dir.join(DEFAULT_KEY_FILE);
        fs::write(&cert_path, cert.pem()).unwrap();
        fs::write(&key_path, key_pair.serialize_pem()).unwrap();
        (cert_path, key_path)
    }

    #[test]
    fn test_explicit_pair_wins() {
        let dir = tempfile::tempdir().unwrap();
        write_dev_pair(dir.path());
        let source = resolve_credentials(
            Some(Path::new("/srv/cert.pem")),
            Some(Path::new("/srv/key.pem")),
            Some(dir.path()),
            true,
        )
        .unwrap();
        assert_eq!(
            source,
            CredentialSource::Explicit {
                cert: PathBuf::from("/srv/cert.pem"),
                key: PathBuf::from("/srv/key.pem"),
            }
        );
    }

    #[test]
    fn test_lone_cert_falls_back_to_default_dir() {
        let dir = tempfile::tempdir().unwrap();
        let (cert, key) = write_dev_pair(dir.path());
        let source =
            resolve_credentials(Some(Path::new("/srv/cert.pem")), None, Some(dir.path()), false)
                .unwrap();
        assert_eq!(source, CredentialSource::DevDefault { cert, key });
    }

    #[test]
    fn test_missing_credentials_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_credentials(None, None, Some(dir.path()), false).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("PEER_CERT/PEER_KEY"));
        assert!(message.contains(DEFAULT_CERT_FILE));
        match err {
            TlsError::MissingCredentials { checked, .. } => assert_eq!(checked.len(), 2),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_half_default_pair_is_not_enough() {
        let dir = tempfile::tempdir().unwrap();
        let (_, key) = write_dev_pair(dir.path());
        fs::remove_file(key).unwrap();
        assert!(resolve_credentials(None, None, Some(dir.path()), false).is_err());
    }

    #[test]
    fn test_self_signed_only_when_allowed() {
        assert_eq!(
            resolve_credentials(None, None, None, true).unwrap(),
            CredentialSource::SelfSigned
        );
        assert!(matches!(
            resolve_credentials(None, None, None, false),
            Err(TlsError::MissingCredentials { .. })
        ));
    }

    #[test]
    fn test_load_dev_pair() {
        let dir = tempfile::tempdir().unwrap();
        let (cert, key) = write_dev_pair(dir.path());
        let credentials = CredentialSource::DevDefault { cert, key }.load("127.0.0.1").unwrap();
        assert_eq!(credentials.cert_chain.len(), 1);
        assert!(server_config(credentials, 8).is_ok());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_pem_pair(&dir.path().join("nope.pem"), &dir.path().join("nope.key"))
            .unwrap_err();
        assert!(matches!(err, TlsError::Pem { .. }));
    }

    #[test]
    fn test_load_empty_certificate() {
        let dir = tempfile::tempdir().unwrap();
        let (cert, key) = write_dev_pair(dir.path());
        fs::write(&cert, "").unwrap();
        assert!(matches!(
            load_pem_pair(&cert, &key),
            Err(TlsError::EmptyCertificate(_))
        ));
    }

    #[test]
    fn test_self_signed_credentials() {
        let credentials = CredentialSource::SelfSigned.load("peer.local").unwrap();
        assert_eq!(credentials.cert_chain.len(), 1);
        assert!(server_config(credentials, 100).is_ok());
    }
}
