use std::{fs, io::BufReader, path::Path, sync::Arc};

use rustls::{
    crypto::{aws_lc_rs, CryptoProvider},
    pki_types::{CertificateDer, PrivateKeyDer},
    sign::CertifiedKey,
    ClientConfig, RootCertStore, ServerConfig,
};
use rustls_pemfile::{certs, private_key};

use crate::{
    config::{ClientCertPath, ServerCertPath},
    error::{EchoError, Result},
};

/// ALPN identifier for HTTP/2, which gRPC requires
pub const ALPN_H2: &[u8] = b"h2";

/// The process-wide default provider if one was installed, aws-lc-rs otherwise.
pub fn crypto_provider() -> Arc<CryptoProvider> {
    CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(aws_lc_rs::default_provider()))
}

fn read_pem(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|source| {
        EchoError::Io {
            path: path.to_path_buf(),
            source,
        }
    })
}

/// Reads every certificate from a PEM file, in file order.
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let pem = read_pem(path)?;
    let chain = certs(&mut BufReader::new(&*pem))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| {
            EchoError::Pem {
                path: path.to_path_buf(),
                source,
            }
        })?;

    if chain.is_empty() {
        return Err(EchoError::NoCertificates(path.to_path_buf()));
    }
    Ok(chain)
}

/// Reads the first private key (PKCS#8, PKCS#1 or SEC1) from a PEM file.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let pem = read_pem(path)?;
    private_key(&mut BufReader::new(&*pem))
        .map_err(|source| {
            EchoError::Pem {
                path: path.to_path_buf(),
                source,
            }
        })?
        .ok_or_else(|| EchoError::NoPrivateKey(path.to_path_buf()))
}

/// Builds a trust store from a PEM bundle of root certificates.
///
/// Unparsable certificates are skipped; the store must end up non-empty.
pub fn load_root_store(path: &Path) -> Result<RootCertStore> {
    let mut root_store = RootCertStore::empty();
    let (added, ignored) = root_store.add_parsable_certificates(load_certs(path)?);
    tracing::debug!("Loaded {added} root certificate(s) from {path:?} ({ignored} ignored)");

    if root_store.is_empty() {
        return Err(EchoError::NoCertificates(path.to_path_buf()));
    }
    Ok(root_store)
}

/// Builds the server's TLS identity.
///
/// Fails if either file is unusable or if the private key does not belong to
/// the leaf certificate. No client certificate is requested.
pub fn server_config(paths: &ServerCertPath) -> Result<ServerConfig> {
    let provider = crypto_provider();

    tracing::info!("Loading server identity:");
    tracing::info!("  - Server cert: {:?}", paths.cert_path);
    tracing::info!("  - Server key: {:?}", paths.key_path);

    let cert_chain = load_certs(&paths.cert_path)?;
    let key = load_private_key(&paths.key_path)?;

    let signing_key = provider.key_provider.load_private_key(key.clone_key())?;
    CertifiedKey::new(cert_chain.clone(), signing_key)
        .keys_match()
        .map_err(|_| EchoError::KeyMismatch(paths.key_path.clone()))?;

    let mut config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(cert_chain, key)?;
    config.alpn_protocols = vec![ALPN_H2.to_vec()];

    Ok(config)
}

/// Builds a client configuration that trusts only the roots in `paths.ca_path`.
pub fn client_config(paths: &ClientCertPath) -> Result<ClientConfig> {
    tracing::info!("Loading trusted roots from {:?}", paths.ca_path);
    let root_store = load_root_store(&paths.ca_path)?;

    let mut config = ClientConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()?
        .with_root_certificates(root_store)
        .with_no_client_auth();
    config.alpn_protocols = vec![ALPN_H2.to_vec()];

    Ok(config)
}
