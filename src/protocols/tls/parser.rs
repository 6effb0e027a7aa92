//! Hand-rolled ClientHello/ServerHello parser.
//!
//! Operates on a single already-reassembled handshake message (handshake header plus body, as
//! produced by the half-stream reassembler). Deliberately does not depend on a general-purpose
//! TLS parsing crate: the truncation and failure semantics here are dictated entirely by the
//! fingerprinting use case, not by the full TLS grammar.

use byteorder::{BigEndian, ReadBytesExt};
use std::io::{Cursor, Read};
use thiserror::Error;

use super::handshake::{ClientHello, Hello, ServerHello};

const HANDSHAKE_CLIENT_HELLO: u8 = 0x01;
const HANDSHAKE_SERVER_HELLO: u8 = 0x02;

const EXT_SERVER_NAME: u16 = 0x0000;
const EXT_SUPPORTED_GROUPS: u16 = 0x000a;
const EXT_EC_POINT_FORMATS: u16 = 0x000b;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TlsParseError {
    #[error("truncated handshake message")]
    Truncated,
    #[error("unexpected handshake type {0:#x}")]
    UnexpectedType(u8),
    #[error("malformed extension")]
    MalformedExtension,
}

/// Parses a single handshake message (`handshake_type`, 3-byte length, body) into a typed
/// [`Hello`]. Returns [`TlsParseError`] on any structural violation.
pub fn parse_hello(buf: &[u8]) -> Result<Hello, TlsParseError> {
    if buf.len() < 4 {
        return Err(TlsParseError::Truncated);
    }
    let handshake_type = buf[0];
    let len = ((buf[1] as usize) << 16) | ((buf[2] as usize) << 8) | (buf[3] as usize);
    let body = buf.get(4..4 + len).ok_or(TlsParseError::Truncated)?;

    match handshake_type {
        HANDSHAKE_CLIENT_HELLO => parse_client_hello(body).map(Hello::Client),
        HANDSHAKE_SERVER_HELLO => parse_server_hello(body).map(Hello::Server),
        other => Err(TlsParseError::UnexpectedType(other)),
    }
}

fn parse_client_hello(body: &[u8]) -> Result<ClientHello, TlsParseError> {
    let mut cur = Cursor::new(body);
    let version = read_u16(&mut cur)?;
    skip(&mut cur, 32)?; // random
    skip_vec8(&mut cur)?; // session id

    let cipher_suites_len = read_u16(&mut cur)? as usize;
    if !cipher_suites_len.is_multiple_of(2) {
        return Err(TlsParseError::Truncated);
    }
    let cipher_suites = read_u16_vec(&mut cur, cipher_suites_len / 2)?;

    skip_vec8(&mut cur)?; // compression methods

    let mut extension_list = Vec::new();
    let mut supported_groups = Vec::new();
    let mut ec_point_formats = Vec::new();
    let mut server_name = None;

    if has_remaining(&cur) {
        let ext_total_len = read_u16(&mut cur)? as usize;
        let start = cur.position() as usize;
        let end = start
            .checked_add(ext_total_len)
            .filter(|&e| e <= body.len())
            .ok_or(TlsParseError::Truncated)?;

        while (cur.position() as usize) < end {
            let ext_type = read_u16(&mut cur)?;
            let ext_len = read_u16(&mut cur)? as usize;
            let ext_body = read_exact_slice(&mut cur, ext_len)?;
            extension_list.push(ext_type);

            match ext_type {
                EXT_SERVER_NAME => {
                    server_name = parse_sni(ext_body)?;
                }
                EXT_SUPPORTED_GROUPS => {
                    supported_groups = parse_u16_list_with_len_prefix(ext_body)?;
                }
                EXT_EC_POINT_FORMATS => {
                    ec_point_formats = parse_u8_list_with_len_prefix(ext_body)?;
                }
                _ => {}
            }
        }
    }

    Ok(ClientHello {
        version,
        cipher_suites,
        extension_list,
        supported_groups,
        ec_point_formats,
        server_name,
    })
}

fn parse_server_hello(body: &[u8]) -> Result<ServerHello, TlsParseError> {
    let mut cur = Cursor::new(body);
    let version = read_u16(&mut cur)?;
    skip(&mut cur, 32)?; // random
    skip_vec8(&mut cur)?; // session id
    let cipher_suite = read_u16(&mut cur)?;
    skip(&mut cur, 1)?; // compression method

    let mut extension_list = Vec::new();
    if has_remaining(&cur) {
        let ext_total_len = read_u16(&mut cur)? as usize;
        let start = cur.position() as usize;
        let end = start
            .checked_add(ext_total_len)
            .filter(|&e| e <= body.len())
            .ok_or(TlsParseError::Truncated)?;

        while (cur.position() as usize) < end {
            let ext_type = read_u16(&mut cur)?;
            let ext_len = read_u16(&mut cur)? as usize;
            let _ext_body = read_exact_slice(&mut cur, ext_len)?;
            extension_list.push(ext_type);
        }
    }

    Ok(ServerHello {
        version,
        cipher_suite,
        extension_list,
    })
}

fn parse_sni(ext_body: &[u8]) -> Result<Option<String>, TlsParseError> {
    let mut cur = Cursor::new(ext_body);
    let list_len = read_u16(&mut cur)? as usize;
    let list = read_exact_slice(&mut cur, list_len)?;
    let mut cur = Cursor::new(list);
    while has_remaining(&cur) {
        let name_type = read_u8(&mut cur)?;
        let name_len = read_u16(&mut cur)? as usize;
        let name = read_exact_slice(&mut cur, name_len)?;
        if name_type == 0x00 {
            return Ok(Some(
                std::str::from_utf8(name)
                    .map_err(|_| TlsParseError::MalformedExtension)?
                    .to_string(),
            ));
        }
    }
    Ok(None)
}

fn parse_u16_list_with_len_prefix(ext_body: &[u8]) -> Result<Vec<u16>, TlsParseError> {
    let mut cur = Cursor::new(ext_body);
    let len = read_u16(&mut cur)? as usize;
    if !len.is_multiple_of(2) {
        return Err(TlsParseError::MalformedExtension);
    }
    read_u16_vec(&mut cur, len / 2)
}

fn parse_u8_list_with_len_prefix(ext_body: &[u8]) -> Result<Vec<u8>, TlsParseError> {
    let mut cur = Cursor::new(ext_body);
    let len = read_u8(&mut cur)? as usize;
    let slice = read_exact_slice(&mut cur, len)?;
    Ok(slice.to_vec())
}

fn read_u8(cur: &mut Cursor<&[u8]>) -> Result<u8, TlsParseError> {
    cur.read_u8().map_err(|_| TlsParseError::Truncated)
}

fn read_u16(cur: &mut Cursor<&[u8]>) -> Result<u16, TlsParseError> {
    cur.read_u16::<BigEndian>()
        .map_err(|_| TlsParseError::Truncated)
}

fn read_u16_vec(cur: &mut Cursor<&[u8]>, count: usize) -> Result<Vec<u16>, TlsParseError> {
    (0..count).map(|_| read_u16(cur)).collect()
}

fn skip(cur: &mut Cursor<&[u8]>, n: usize) -> Result<(), TlsParseError> {
    let mut buf = vec![0u8; n];
    cur.read_exact(&mut buf)
        .map_err(|_| TlsParseError::Truncated)
}

/// Reads a 1-byte length prefix followed by that many bytes, discarding the contents.
fn skip_vec8(cur: &mut Cursor<&[u8]>) -> Result<(), TlsParseError> {
    let len = read_u8(cur)? as usize;
    skip(cur, len)
}

fn read_exact_slice<'a>(cur: &mut Cursor<&'a [u8]>, len: usize) -> Result<&'a [u8], TlsParseError> {
    let start = cur.position() as usize;
    let inner = *cur.get_ref();
    let slice = inner
        .get(start..start + len)
        .ok_or(TlsParseError::Truncated)?;
    cur.set_position((start + len) as u64);
    Ok(slice)
}

fn has_remaining(cur: &Cursor<&[u8]>) -> bool {
    (cur.position() as usize) < cur.get_ref().len()
}
