//! Character encoding of buffered HTML bodies.
//!
//! The rewriter works on text, but the bytes it does not touch must reach the
//! browser exactly as the upstream sent them, in the charset the forwarded
//! `Content-Type` still declares.
//!
//! Resolution order: `charset=` in `Content-Type`, then a `<meta charset>`
//! near the start of the document, then UTF-8 when the body is valid UTF-8,
//! and windows-1252 otherwise. windows-1252 maps every byte to a character
//! and back, so an undeclared legacy page survives unchanged.

use std::borrow::Cow;

use axum::http::header::{HeaderMap, CONTENT_TYPE};
use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};

use crate::rewrite::scan::find_ci;

/// How far into the body a `<meta charset>` is looked for.
const META_SNIFF_LIMIT: usize = 1024;

/// Pick the encoding used to turn `body` into text.
pub fn detect(headers: &HeaderMap, body: &[u8]) -> &'static Encoding {
    let declared = content_type_charset(headers)
        .or_else(|| meta_charset(body))
        .and_then(|label| Encoding::for_label(label.as_bytes()));

    match declared {
        Some(encoding) => encoding,
        None if std::str::from_utf8(body).is_ok() => UTF_8,
        None => WINDOWS_1252,
    }
}

/// Decode without BOM sniffing so a leading BOM is kept as a character and
/// written back by [`encode`].
pub fn decode<'a>(body: &'a [u8], encoding: &'static Encoding) -> Cow<'a, str> {
    let (text, had_errors) = encoding.decode_without_bom_handling(body);
    if had_errors {
        tracing::debug!(encoding = encoding.name(), "Malformed sequences replaced while decoding HTML");
    }
    text
}

/// Encode rewritten text back into the body's encoding.
///
/// Characters the encoding cannot represent become numeric character
/// references, which HTML reads back as the same characters.
pub fn encode(text: String, encoding: &'static Encoding) -> Vec<u8> {
    if encoding == UTF_8 {
        return text.into_bytes();
    }
    let (bytes, _, _) = encoding.encode(&text);
    bytes.into_owned()
}

/// Whether the tokenizer can run over text decoded with `encoding`.
///
/// UTF-16 bodies decode fine but `encode` would emit UTF-8, so they are left
/// alone.
pub fn is_rewritable(encoding: &'static Encoding) -> bool {
    encoding.output_encoding() == encoding
}

fn content_type_charset(headers: &HeaderMap) -> Option<String> {
    let content_type = headers.get(CONTENT_TYPE)?.to_str().ok()?;
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        name.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches(['"', '\'']).to_string())
            .filter(|label| !label.is_empty())
    })
}

/// `charset` from a `<meta charset=...>` or `<meta http-equiv content="...; charset=...">`
/// in the first [`META_SNIFF_LIMIT`] bytes.
fn meta_charset(body: &[u8]) -> Option<String> {
    let prefix = String::from_utf8_lossy(&body[..body.len().min(META_SNIFF_LIMIT)]);
    let mut from = 0;
    while let Some(at) = find_ci(&prefix, "charset", from) {
        from = at + "charset".len();
        let Some(tag_start) = prefix[..at].rfind('<') else {
            continue;
        };
        let inside_meta = find_ci(&prefix[tag_start..], "<meta", 0) == Some(0)
            && !prefix[tag_start..at].contains('>');
        if !inside_meta {
            continue;
        }

        let rest = prefix[from..].trim_start();
        let Some(rest) = rest.strip_prefix('=') else {
            continue;
        };
        let rest = rest.trim_start().trim_start_matches(['"', '\'']);
        let label: String = rest
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':' | '.'))
            .collect();
        if !label.is_empty() {
            return Some(label);
        }
    }
    None
}
