use std::fs::File;
use std::io::{self, BufReader, ErrorKind};
use std::path::Path;
use std::sync::Arc;

use pgwire::tokio::tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use pgwire::tokio::tokio_rustls::rustls::ServerConfig;
use pgwire::tokio::TlsAcceptor;

use crate::config::Config;

/// TLS acceptor for the configured PEM pair; `None` serves plain TCP.
pub fn acceptor_from_config(config: &Config) -> io::Result<Option<TlsAcceptor>> {
    match (config.tls_cert.as_deref(), config.tls_key.as_deref()) {
        (None, None) => Ok(None),
        (Some(cert), Some(key)) => build_acceptor(Path::new(cert), Path::new(key)).map(Some),
        _ => Err(io::Error::new(
            ErrorKind::InvalidInput,
            "both ROOMBOOK_TLS_CERT and ROOMBOOK_TLS_KEY must be set, or neither",
        )),
    }
}

fn read_certs(path: &Path) -> io::Result<Vec<CertificateDer<'static>>> {
    let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(File::open(path)?))
        .collect::<Result<_, _>>()?;
    if certs.is_empty() {
        return Err(io::Error::new(
            ErrorKind::InvalidInput,
            format!("no certificates found in {}", path.display()),
        ));
    }
    Ok(certs)
}

fn read_key(path: &Path) -> io::Result<PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(&mut BufReader::new(File::open(path)?))?.ok_or_else(|| {
        io::Error::new(
            ErrorKind::InvalidInput,
            format!("no private key found in {}", path.display()),
        )
    })
}

fn build_acceptor(cert: &Path, key: &Path) -> io::Result<TlsAcceptor> {
    let mut server = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(read_certs(cert)?, read_key(key)?)
        .map_err(|e| io::Error::new(ErrorKind::InvalidInput, e))?;
    server.alpn_protocols = vec![b"postgresql".to_vec()];
    Ok(TlsAcceptor::from(Arc::new(server)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(cert: Option<&str>, key: Option<&str>) -> Config {
        let mut c = Config::from_lookup(|_| None).unwrap();
        c.tls_cert = cert.map(String::from);
        c.tls_key = key.map(String::from);
        c
    }

    #[test]
    fn no_paths_means_plaintext() {
        assert!(acceptor_from_config(&config(None, None)).unwrap().is_none());
    }

    #[test]
    fn half_configured_is_rejected() {
        let err = acceptor_from_config(&config(Some("cert.pem"), None)).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(err.to_string().contains("ROOMBOOK_TLS_KEY"));
    }

    #[test]
    fn missing_cert_file_is_an_io_error() {
        let dir = std::env::temp_dir().join("roombook_test_tls_absent");
        let cert = dir.join("server.crt");
        let key = dir.join("server.key");
        let err = acceptor_from_config(&config(cert.to_str(), key.to_str())).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn empty_pem_is_rejected() {
        let dir = std::env::temp_dir().join("roombook_test_tls_empty");
        std::fs::create_dir_all(&dir).unwrap();
        let cert = dir.join("server.crt");
        std::fs::write(&cert, "").unwrap();
        let err = read_certs(&cert).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }
}
