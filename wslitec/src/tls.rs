use std::{path::Path, sync::Arc};

use anyhow::{anyhow, Context};
use tokio_rustls::{
    rustls::{
        self,
        pki_types::{pem::PemObject, CertificateDer, PrivateKeyDer},
    },
    TlsAcceptor, TlsConnector,
};

fn read_pem(path: &Path) -> anyhow::Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading {}", path.display()))
}

fn load_certs(path: &Path) -> anyhow::Result<Vec<CertificateDer<'static>>> {
    let pem = read_pem(path)?;
    let certs = CertificateDer::pem_slice_iter(&pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| anyhow!("parsing certificates in {}: {err:?}", path.display()))?;
    if certs.is_empty() {
        return Err(anyhow!("no certificates found in {}", path.display()));
    }
    Ok(certs)
}

/// Server-side TLS from a PEM certificate chain and a PEM private key.
pub fn acceptor(cert: &Path, key: &Path) -> anyhow::Result<TlsAcceptor> {
    let certs = load_certs(cert)?;
    let key = PrivateKeyDer::from_pem_slice(&read_pem(key)?)
        .map_err(|err| anyhow!("parsing private key in {}: {err:?}", key.display()))?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("building tls server config")?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Client-side TLS trusting the webpki roots plus an optional extra CA
/// (e.g. the self-signed certificate of a local server).
pub fn connector(ca: Option<&Path>) -> anyhow::Result<TlsConnector> {
    let mut root_cert_store = rustls::RootCertStore::empty();
    root_cert_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    if let Some(path) = ca {
        for cert in load_certs(path)? {
            root_cert_store
                .add(cert)
                .with_context(|| format!("adding CA from {}", path.display()))?;
        }
    }

    Ok(TlsConnector::from(Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(root_cert_store)
            .with_no_client_auth(),
    )))
}
