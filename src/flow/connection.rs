//! Client and server connection descriptors

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Summary of a certificate presented on a connection
///
/// Certificates are parsed by the TLS layer; only the fields shown to the
/// operator are kept here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CertificateInfo {
    pub keyinfo: (String, u32),
    pub sha256: String,
    pub notbefore: DateTime<Utc>,
    pub notafter: DateTime<Utc>,
    pub serial: String,
    pub subject: Vec<(String, String)>,
    pub issuer: Vec<(String, String)>,
    pub altnames: Vec<String>,
}

/// One side of a proxied connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub id: String,

    /// Remote address (client address for the client side, upstream
    /// address for the server side)
    pub peername: Option<(String, u16)>,

    /// Local address of the socket
    pub sockname: Option<(String, u16)>,

    pub tls_established: bool,
    pub sni: Option<String>,
    pub alpn: Option<String>,
    pub tls_version: Option<String>,
    pub cipher: Option<String>,
    pub certificate_list: Vec<CertificateInfo>,

    pub timestamp_start: Option<DateTime<Utc>>,
    pub timestamp_tls_setup: Option<DateTime<Utc>>,
    pub timestamp_end: Option<DateTime<Utc>>,
}

impl Connection {
    pub fn new(peername: Option<(String, u16)>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            peername,
            sockname: None,
            tls_established: false,
            sni: None,
            alpn: None,
            tls_version: None,
            cipher: None,
            certificate_list: Vec::new(),
            timestamp_start: Some(Utc::now()),
            timestamp_tls_setup: None,
            timestamp_end: None,
        }
    }
}
