//! Parsers for the wire protocols this system inspects.

pub mod tls;
