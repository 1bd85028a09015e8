//! `Content-Encoding` handling for the buffering path.

use std::borrow::Cow;
use std::io::Read;

use axum::http::header::{HeaderMap, CONTENT_ENCODING};
use flate2::read::{DeflateDecoder, MultiGzDecoder, ZlibDecoder};

use crate::proxy::error::ProxyError;

/// Codings advertised upstream in `Accept-Encoding`.
pub const ACCEPTED_ENCODINGS: &str = "gzip, deflate";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentCoding {
    Identity,
    Gzip,
    /// zlib-wrapped or raw deflate; servers send both.
    Deflate,
    /// Anything else, including stacked codings.
    Unsupported(String),
}

impl ContentCoding {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let tokens: Vec<String> = headers
            .get_all(CONTENT_ENCODING)
            .iter()
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .flat_map(|v| {
                v.split(',')
                    .map(|t| t.trim().to_ascii_lowercase())
                    .collect::<Vec<_>>()
            })
            .filter(|t| !t.is_empty() && t != "identity")
            .collect();

        match tokens.as_slice() {
            [] => ContentCoding::Identity,
            [one] => Self::from_token(one),
            many => ContentCoding::Unsupported(many.join(", ")),
        }
    }

    fn from_token(token: &str) -> Self {
        match token {
            "gzip" | "x-gzip" => ContentCoding::Gzip,
            "deflate" => ContentCoding::Deflate,
            other => ContentCoding::Unsupported(other.to_string()),
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, ContentCoding::Unsupported(_))
    }
}

/// Undo `coding` on a fully buffered body, producing at most `limit` bytes.
pub fn decode_body<'a>(
    body: &'a [u8],
    coding: &ContentCoding,
    limit: usize,
) -> Result<Cow<'a, [u8]>, ProxyError> {
    if body.is_empty() {
        return Ok(Cow::Borrowed(body));
    }

    let decoded = match coding {
        ContentCoding::Identity => return Ok(Cow::Borrowed(body)),
        ContentCoding::Gzip => read_all(MultiGzDecoder::new(body), limit)
            .map_err(|e| ProxyError::DecodeFailure(format!("gzip: {e}")))?,
        ContentCoding::Deflate => read_all(ZlibDecoder::new(body), limit)
            .or_else(|_| read_all(DeflateDecoder::new(body), limit))
            .map_err(|e| ProxyError::DecodeFailure(format!("deflate: {e}")))?,
        ContentCoding::Unsupported(name) => {
            return Err(ProxyError::DecodeFailure(format!(
                "unsupported content-encoding {name:?}"
            )))
        }
    };

    if decoded.len() > limit {
        return Err(ProxyError::BodyTooLarge(format!(
            "decompressed body exceeds {limit} bytes"
        )));
    }
    Ok(Cow::Owned(decoded))
}

/// Read up to one byte past `limit`, enough to tell an oversized stream apart.
fn read_all(reader: impl Read, limit: usize) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    reader
        .take(limit.saturating_add(1) as u64)
        .read_to_end(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use flate2::write::{DeflateEncoder, GzEncoder, ZlibEncoder};
    use flate2::Compression;
    use std::io::Write;

    const HTML: &[u8] = b"<!doctype html><p>hello</p>";
    const LIMIT: usize = 1024;

    fn headers(values: &[&str]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for v in values {
            map.append(CONTENT_ENCODING, HeaderValue::from_str(v).unwrap());
        }
        map
    }

    #[test]
    fn coding_from_headers() {
        assert_eq!(ContentCoding::from_headers(&headers(&[])), ContentCoding::Identity);
        assert_eq!(ContentCoding::from_headers(&headers(&["identity"])), ContentCoding::Identity);
        assert_eq!(ContentCoding::from_headers(&headers(&["GZIP"])), ContentCoding::Gzip);
        assert_eq!(ContentCoding::from_headers(&headers(&["x-gzip"])), ContentCoding::Gzip);
        assert_eq!(ContentCoding::from_headers(&headers(&["deflate"])), ContentCoding::Deflate);
        assert_eq!(
            ContentCoding::from_headers(&headers(&["br"])),
            ContentCoding::Unsupported("br".into())
        );
        assert_eq!(
            ContentCoding::from_headers(&headers(&["gzip", "deflate"])),
            ContentCoding::Unsupported("gzip, deflate".into())
        );
    }

    #[test]
    fn gzip_round() {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(HTML).unwrap();
        let gz = enc.finish().unwrap();
        assert_eq!(decode_body(&gz, &ContentCoding::Gzip, LIMIT).unwrap().as_ref(), HTML);
    }

    #[test]
    fn deflate_accepts_zlib_and_raw() {
        let mut zlib = ZlibEncoder::new(Vec::new(), Compression::default());
        zlib.write_all(HTML).unwrap();
        let zlib = zlib.finish().unwrap();
        assert_eq!(decode_body(&zlib, &ContentCoding::Deflate, LIMIT).unwrap().as_ref(), HTML);

        let mut raw = DeflateEncoder::new(Vec::new(), Compression::default());
        raw.write_all(HTML).unwrap();
        let raw = raw.finish().unwrap();
        assert_eq!(decode_body(&raw, &ContentCoding::Deflate, LIMIT).unwrap().as_ref(), HTML);
    }

    #[test]
    fn corrupt_gzip_is_decode_failure() {
        let err = decode_body(b"\x1f\x8b\x08\x00garbage", &ContentCoding::Gzip, LIMIT).unwrap_err();
        assert!(matches!(err, ProxyError::DecodeFailure(_)));
    }

    #[test]
    fn decompression_stops_at_limit() {
        let mut enc = GzEncoder::new(Vec::new(), Compression::best());
        enc.write_all(&vec![b'a'; 64 * 1024]).unwrap();
        let bomb = enc.finish().unwrap();
        assert!(bomb.len() < LIMIT);

        let err = decode_body(&bomb, &ContentCoding::Gzip, LIMIT).unwrap_err();
        assert!(matches!(err, ProxyError::BodyTooLarge(_)));
        assert_eq!(decode_body(&bomb, &ContentCoding::Gzip, 64 * 1024).unwrap().len(), 64 * 1024);
    }

    #[test]
    fn empty_body_skips_decoding() {
        assert!(decode_body(b"", &ContentCoding::Gzip, LIMIT).unwrap().is_empty());
    }
}
