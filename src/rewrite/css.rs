//! CSS `url(...)` rewriting for `<style>` blocks and `style` attributes.

use std::borrow::Cow;

use crate::rewrite::context::RewriteContext;
use crate::rewrite::scan::{find_ci, is_ident_byte};
use crate::rewrite::url;

/// Rewrite every `url(...)` reference in a stylesheet fragment.
pub fn rewrite_css<'a>(css: &'a str, ctx: &RewriteContext) -> Cow<'a, str> {
    let bytes = css.as_bytes();
    let mut out: Option<String> = None;
    let mut copied = 0;
    let mut from = 0;

    while let Some(at) = find_ci(css, "url(", from) {
        from = at + 4;
        if at > 0 && is_ident_byte(bytes[at - 1]) {
            continue;
        }
        let Some(arg) = parse_url_arg(css, at + 4) else {
            continue;
        };
        from = arg.close + 1;

        let rewritten = url::rewrite(arg.value, ctx);
        if rewritten == arg.value {
            continue;
        }

        let buf = out.get_or_insert_with(|| String::with_capacity(css.len() + 64));
        buf.push_str(&css[copied..arg.start]);
        push_url_arg(buf, &rewritten, arg.quote);
        copied = arg.end;
    }

    match out {
        Some(mut buf) => {
            buf.push_str(&css[copied..]);
            Cow::Owned(buf)
        }
        None => Cow::Borrowed(css),
    }
}

struct UrlArg<'a> {
    value: &'a str,
    /// Span of the argument including any quotes.
    start: usize,
    end: usize,
    /// Offset of the closing `)`.
    close: usize,
    quote: Option<char>,
}

fn parse_url_arg(css: &str, open: usize) -> Option<UrlArg<'_>> {
    let bytes = css.as_bytes();
    let mut i = open;
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }

    match *bytes.get(i)? {
        quote @ (b'"' | b'\'') => {
            let value_start = i + 1;
            let value_end = value_start + css[value_start..].find(quote as char)?;
            let mut close = value_end + 1;
            while close < bytes.len() && bytes[close].is_ascii_whitespace() {
                close += 1;
            }
            if bytes.get(close) != Some(&b')') {
                return None;
            }
            Some(UrlArg {
                value: &css[value_start..value_end],
                start: i,
                end: value_end + 1,
                close,
                quote: Some(quote as char),
            })
        }
        _ => {
            let start = i;
            while i < bytes.len() && !bytes[i].is_ascii_whitespace() && bytes[i] != b')' {
                if matches!(bytes[i], b'"' | b'\'' | b'(') {
                    return None;
                }
                i += 1;
            }
            let end = i;
            while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            if bytes.get(i) != Some(&b')') {
                return None;
            }
            Some(UrlArg {
                value: &css[start..end],
                start,
                end,
                close: i,
                quote: None,
            })
        }
    }
}

fn push_url_arg(out: &mut String, value: &str, quote: Option<char>) {
    let needs_quotes = quote.is_some()
        || value
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '"' | '\'' | '(' | ')' | '\\'));
    if !needs_quotes {
        out.push_str(value);
        return;
    }

    let quote = quote.unwrap_or('"');
    out.push(quote);
    for c in value.chars() {
        if c == quote || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push(quote);
}
