//! Content-Encoding decode/encode chain applied to captured bodies.
//!
//! Grounded on `decompress_body`/`_compress_body` in
//! `original_source/.../service_handling/http.py` and
//! `original_source/.../services/http.py`: tokens are comma-split and applied
//! in order, `deflate` is decoded (and re-encoded) as gzip, and unknown
//! tokens are a hard error rather than a silent pass-through.

use async_compression::tokio::bufread::{BrotliDecoder, BrotliEncoder, GzipDecoder, GzipEncoder};
use std::io::Cursor;
use tokio::io::{AsyncReadExt, BufReader};
use weezl::{BitOrder, LzwStatus, decode::Decoder as LzwDecoder, encode::Encoder as LzwEncoder};

use crate::message::{HeaderMap, get_ci};

const GZIP: &str = "gzip";
const DEFLATE: &str = "deflate";
const COMPRESS: &str = "compress";
const BR: &str = "br";
const IDENTITY: &str = "identity";

/// `compress(1)` uses a variable 9-16 bit code width, MSB-first.
const LZW_MIN_CODE_SIZE: u8 = 8;

#[derive(thiserror::Error, Debug)]
pub enum EncodingError {
    #[error("unsupported content-encoding token: {0:?}")]
    UnknownToken(String),
    #[error("io error while transcoding body: {0}")]
    Io(#[from] std::io::Error),
    #[error("lzw stream error: {0}")]
    Lzw(String),
}

/// Splits a `Content-Encoding` header value into lowercase tokens, in the
/// order they were applied (leftmost token applied first on encode).
pub fn tokenize_content_encoding(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|t| t.trim().to_ascii_lowercase())
        .filter(|t| !t.is_empty() && t != IDENTITY)
        .collect()
}

/// Reads the `Content-Encoding` tokens off a header map, if present.
pub fn content_encoding_tokens(headers: &HeaderMap) -> Vec<String> {
    get_ci(headers, "content-encoding")
        .map(|v| tokenize_content_encoding(&v.to_string()))
        .unwrap_or_default()
}

/// Applies the inverse of each encoding token, in order, to recover the
/// original body bytes.
pub async fn decode_body(tokens: &[String], body: &[u8]) -> Result<Vec<u8>, EncodingError> {
    let mut current = body.to_vec();
    for token in tokens {
        current = decode_one(token, &current).await?;
    }
    Ok(current)
}

/// Re-applies each encoding token, in order, so the body matches what the
/// recorded `Content-Encoding` header claims.
pub async fn encode_body(tokens: &[String], body: &[u8]) -> Result<Vec<u8>, EncodingError> {
    let mut current = body.to_vec();
    for token in tokens {
        current = encode_one(token, &current).await?;
    }
    Ok(current)
}

async fn decode_one(token: &str, body: &[u8]) -> Result<Vec<u8>, EncodingError> {
    match token {
        GZIP | DEFLATE => gunzip(body).await,
        COMPRESS => lzw_decompress(body),
        BR => unbrotli(body).await,
        other => Err(EncodingError::UnknownToken(other.to_string())),
    }
}

async fn encode_one(token: &str, body: &[u8]) -> Result<Vec<u8>, EncodingError> {
    match token {
        GZIP | DEFLATE => gzip(body).await,
        COMPRESS => lzw_compress(body),
        BR => brotli_compress(body).await,
        other => Err(EncodingError::UnknownToken(other.to_string())),
    }
}

async fn gunzip(body: &[u8]) -> Result<Vec<u8>, EncodingError> {
    let mut decoder = GzipDecoder::new(BufReader::new(Cursor::new(body.to_vec())));
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).await?;
    Ok(out)
}

async fn gzip(body: &[u8]) -> Result<Vec<u8>, EncodingError> {
    let mut encoder = GzipEncoder::new(BufReader::new(Cursor::new(body.to_vec())));
    let mut out = Vec::new();
    encoder.read_to_end(&mut out).await?;
    Ok(out)
}

async fn unbrotli(body: &[u8]) -> Result<Vec<u8>, EncodingError> {
    let mut decoder = BrotliDecoder::new(BufReader::new(Cursor::new(body.to_vec())));
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).await?;
    Ok(out)
}

async fn brotli_compress(body: &[u8]) -> Result<Vec<u8>, EncodingError> {
    let mut encoder = BrotliEncoder::new(BufReader::new(Cursor::new(body.to_vec())));
    let mut out = Vec::new();
    encoder.read_to_end(&mut out).await?;
    Ok(out)
}

fn lzw_decompress(body: &[u8]) -> Result<Vec<u8>, EncodingError> {
    let mut decoder = LzwDecoder::new(BitOrder::Msb, LZW_MIN_CODE_SIZE);
    let mut out = Vec::new();
    let mut input = body;
    let mut buf = [0u8; 4096];
    loop {
        let result = decoder.decode_bytes(input, &mut buf);
        out.extend_from_slice(&buf[..result.consumed_out]);
        input = &input[result.consumed_in..];
        match result.status {
            Ok(LzwStatus::Done) => break,
            Ok(LzwStatus::Ok) => continue,
            Ok(LzwStatus::NoProgress) => break,
            Err(e) => return Err(EncodingError::Lzw(e.to_string())),
        }
    }
    Ok(out)
}

fn lzw_compress(body: &[u8]) -> Result<Vec<u8>, EncodingError> {
    let mut encoder = LzwEncoder::new(BitOrder::Msb, LZW_MIN_CODE_SIZE);
    let mut out = Vec::new();
    let mut input = body;
    let mut buf = [0u8; 4096];
    loop {
        let result = encoder.encode_bytes(input, &mut buf);
        out.extend_from_slice(&buf[..result.consumed_out]);
        input = &input[result.consumed_in..];
        match result.status {
            Ok(LzwStatus::Done) => break,
            Ok(LzwStatus::Ok) => continue,
            Ok(LzwStatus::NoProgress) => break,
            Err(e) => return Err(EncodingError::Lzw(e.to_string())),
        }
    }
    Ok(out)
}
