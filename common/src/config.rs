use std::{env, path::PathBuf, time::Duration};

/// Address the server listens on when none is given
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:50051";

/// Address the client dials when none is given.
///
/// This is the TLS front door of the deployment, which forwards to the
/// server's listen port.
pub const DEFAULT_SERVER_ADDR: &str = "frontend.local:4443";

/// Upper bound on a single echo invocation, measured from its start
pub const CALL_DEADLINE: Duration = Duration::from_secs(60);

/// Payload the client sends when none is given
pub const DEFAULT_ECHO_TEXT: &str = "hello world";

const CERTS_DIR_ENV: &str = "ECHO_CERTS_DIR";
const DEFAULT_CERTS_DIR: &str = ".";

const SERVER_CERT_FILE: &str = "backend.cert";
const SERVER_KEY_FILE: &str = "backend.key";
const CLIENT_CA_FILE: &str = "frontend.cert";

fn get_certs_dir() -> PathBuf {
    env::var(CERTS_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CERTS_DIR))
}

/// Server certificate paths for TLS termination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerCertPath {
    /// Path to the PEM certificate chain, leaf first
    pub cert_path: PathBuf,
    /// Path to the PEM private key matching the leaf certificate
    pub key_path:  PathBuf,
}

impl ServerCertPath {
    /// Creates ServerCertPath with default certificate locations.
    /// Files are looked up in `$ECHO_CERTS_DIR`, or the working directory.
    pub fn new() -> Self {
        let base = get_certs_dir();
        Self {
            cert_path: base.join(SERVER_CERT_FILE),
            key_path:  base.join(SERVER_KEY_FILE),
        }
    }

    /// Uses explicit certificate and key files
    pub fn from_files(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            cert_path: cert_path.into(),
            key_path:  key_path.into(),
        }
    }
}

impl Default for ServerCertPath {
    fn default() -> Self {
        Self::new()
    }
}

/// Trust anchors the client validates the server against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCertPath {
    /// Path to a PEM bundle of one or more root certificates
    pub ca_path: PathBuf,
}

impl ClientCertPath {
    /// Creates ClientCertPath with the default root certificate location.
    pub fn new() -> Self {
        Self {
            ca_path: get_certs_dir().join(CLIENT_CA_FILE),
        }
    }

    pub fn from_file(ca_path: impl Into<PathBuf>) -> Self {
        Self {
            ca_path: ca_path.into(),
        }
    }
}

impl Default for ClientCertPath {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_paths_are_kept_verbatim() {
        let server = ServerCertPath::from_files("/etc/echo/a.pem", "/etc/echo/a.key");
        assert_eq!(server.cert_path, PathBuf::from("/etc/echo/a.pem"));
        assert_eq!(server.key_path, PathBuf::from("/etc/echo/a.key"));

        let client = ClientCertPath::from_file("roots.pem");
        assert_eq!(client.ca_path, PathBuf::from("roots.pem"));
    }

    #[test]
    fn default_file_names() {
        let server = ServerCertPath::new();
        assert!(server.cert_path.ends_with(SERVER_CERT_FILE));
        assert!(server.key_path.ends_with(SERVER_KEY_FILE));
        assert!(ClientCertPath::default().ca_path.ends_with(CLIENT_CA_FILE));
    }

    #[test]
    fn reference_deployment_defaults() {
        assert_eq!(CALL_DEADLINE, Duration::from_secs(60));
        assert!(DEFAULT_LISTEN_ADDR.ends_with(":50051"));
        assert!(DEFAULT_SERVER_ADDR.ends_with(":4443"));
    }
}
