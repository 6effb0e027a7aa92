//! Parsed TLS handshake message contents.

/// A parsed TLS ClientHello message.
///
/// Only the fields needed to compute JA3 and to surface SNI are retained; certificates, key
/// exchange parameters, and other handshake content are out of scope (see Non-goals).
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ClientHello {
    pub version: u16,
    pub cipher_suites: Vec<u16>,
    pub extension_list: Vec<u16>,
    pub supported_groups: Vec<u16>,
    pub ec_point_formats: Vec<u8>,
    pub server_name: Option<String>,
}

/// A parsed TLS ServerHello message.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ServerHello {
    pub version: u16,
    pub cipher_suite: u16,
    pub extension_list: Vec<u16>,
}

/// The two handshake message types this system parses. Modeled as a tagged union rather than
/// dynamic dispatch: the fingerprint computer is a total function per variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Hello {
    Client(ClientHello),
    Server(ServerHello),
}
