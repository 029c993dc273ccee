//! TLS helper functions.
//!
//! Loads certificates and private keys from PEM files and builds the
//! `rustls` client configuration used by the
//! [`connector`](super::connector).  Without explicit settings the
//! bundled webpki roots are trusted and no client certificate is
//! presented.

use std::fs;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore};

use crate::config::TlsSettings;
use crate::error::ClientError;

/// Load every certificate in a PEM file.
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ClientError> {
    let certfile = fs::File::open(path).map_err(|source| ClientError::Certificate {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = BufReader::new(certfile);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| ClientError::Certificate {
            path: path.to_path_buf(),
            source,
        })?;
    if certs.is_empty() {
        return Err(ClientError::TlsSettings(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

/// Load the first private key (PKCS#1, PKCS#8 or SEC1) from a PEM file.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, ClientError> {
    let keyfile = fs::File::open(path).map_err(|source| ClientError::Certificate {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = BufReader::new(keyfile);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|source| ClientError::Certificate {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| ClientError::TlsSettings(format!("no private key found in {}", path.display())))
}

/// Build a client configuration from optional settings.
pub fn make_client_config(settings: Option<&TlsSettings>) -> Result<Arc<ClientConfig>, ClientError> {
    let default_settings = TlsSettings::default();
    let settings = settings.unwrap_or(&default_settings);

    let mut root_store = RootCertStore::empty();
    match &settings.ca_file {
        Some(ca_file) => {
            for cert in load_certs(ca_file)? {
                root_store.add(cert)?;
            }
        }
        None => root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
    }

    let builder = ClientConfig::builder().with_root_certificates(root_store);
    let config = match (&settings.client_cert, &settings.client_key) {
        (Some(cert), Some(key)) => builder.with_client_auth_cert(load_certs(cert)?, load_private_key(key)?)?,
        (None, None) => builder.with_no_client_auth(),
        _ => {
            return Err(ClientError::TlsSettings(
                "client_cert and client_key must be set together".into(),
            ))
        }
    };
    Ok(Arc::new(config))
}

/// Parse the name used for SNI and certificate verification.
pub fn server_name(name: &str) -> Result<ServerName<'static>, ClientError> {
    ServerName::try_from(name.to_owned()).map_err(|_| ClientError::InvalidServerName(name.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_trust_bundled_roots() {
        let config = make_client_config(None).unwrap();
        assert!(config.alpn_protocols.is_empty());
    }

    #[test]
    fn missing_ca_file_is_reported_with_path() {
        let settings = TlsSettings {
            ca_file: Some("/nonexistent/ca.pem".into()),
            ..TlsSettings::default()
        };
        let err = make_client_config(Some(&settings)).unwrap_err();
        match err {
            ClientError::Certificate { path, .. } => assert_eq!(path, Path::new("/nonexistent/ca.pem")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn ca_file_without_certificates_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.pem");
        fs::write(&path, "not a certificate\n").unwrap();
        let settings = TlsSettings {
            ca_file: Some(path),
            ..TlsSettings::default()
        };
        assert!(matches!(
            make_client_config(Some(&settings)),
            Err(ClientError::TlsSettings(_))
        ));
    }

    #[test]
    fn client_cert_requires_key() {
        let settings = TlsSettings {
            client_cert: Some("client.pem".into()),
            ..TlsSettings::default()
        };
        assert!(matches!(
            make_client_config(Some(&settings)),
            Err(ClientError::TlsSettings(_))
        ));
    }

    #[test]
    fn server_names() {
        assert!(server_name("rabbit.example.com").is_ok());
        assert!(server_name("127.0.0.1").is_ok());
        assert!(matches!(
            server_name("not a host"),
            Err(ClientError::InvalidServerName(_))
        ));
    }
}
