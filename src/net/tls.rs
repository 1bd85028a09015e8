//! TLS configuration and transport selection.

use std::fmt;
use std::path::Path;

use axum_server::tls_rustls::RustlsConfig;

use crate::config::TlsConfig;

/// How the listener speaks to browsers. Chosen once at startup.
#[derive(Clone)]
pub enum Transport {
    Secure(RustlsConfig),
    Insecure,
}

impl Transport {
    pub fn is_secure(&self) -> bool {
        matches!(self, Transport::Secure(_))
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Secure(_) => f.write_str("Secure"),
            Transport::Insecure => f.write_str("Insecure"),
        }
    }
}

/// Load TLS configuration from certificate and key files.
pub async fn load_tls_config(cert_path: &Path, key_path: &Path) -> Result<RustlsConfig, std::io::Error> {
    if !cert_path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Certificate file not found: {:?}", cert_path),
        ));
    }
    if !key_path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Private key file not found: {:?}", key_path),
        ));
    }

    RustlsConfig::from_pem_file(cert_path, key_path).await
}

/// Keep a loaded config, or fall back to plain transport on failure.
pub fn choose_transport<C, E: fmt::Display>(loaded: Option<Result<C, E>>) -> Option<C> {
    match loaded {
        Some(Ok(config)) => Some(config),
        Some(Err(e)) => {
            tracing::warn!(error = %e, "TLS unavailable, falling back to plain HTTP");
            None
        }
        None => None,
    }
}

/// Select the listener transport from configuration.
pub async fn select_transport(tls: Option<&TlsConfig>) -> Transport {
    let loaded = match tls {
        Some(tls) => Some(load_tls_config(Path::new(&tls.cert_path), Path::new(&tls.key_path)).await),
        None => None,
    };

    match choose_transport(loaded) {
        Some(config) => {
            tracing::info!("TLS certificate loaded");
            Transport::Secure(config)
        }
        None => Transport::Insecure,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_table() {
        assert_eq!(choose_transport::<u8, String>(None), None);
        assert_eq!(choose_transport::<u8, String>(Some(Err("bad pem".into()))), None);
        assert_eq!(choose_transport::<u8, String>(Some(Ok(7))), Some(7));
    }

    #[tokio::test]
    async fn missing_certificate_falls_back() {
        let tls = TlsConfig {
            cert_path: "/nonexistent/cert.pem".into(),
            key_path: "/nonexistent/key.pem".into(),
        };
        assert!(!select_transport(Some(&tls)).await.is_secure());
        assert!(!select_transport(None).await.is_secure());
    }
}
