//! HTML body rewriting.
//!
//! # Design
//! A single forward pass of [`Tokenizer`] splits the document into text,
//! comments, declarations, tags and raw-text element content. Only attribute
//! values of recognized tags and the content of `<style>`/`<script>` are
//! touched; every other byte is copied through as-is. Anything the tokenizer
//! cannot make sense of (an unterminated tag or comment) is emitted verbatim.
//!
//! # Rewritten references
//! | tag      | attribute |
//! |----------|-----------|
//! | `a`      | `href`    |
//! | `base`   | `href`    |
//! | `form`   | `action`  |
//! | `iframe` | `src`     |
//! | `img`    | `src`     |
//! | `link`   | `href`    |
//! | `script` | `src`     |
//!
//! plus CSS `url()` in `style` attributes and `<style>` blocks. `srcset`,
//! event-handler attributes and media elements are left alone.
//!
//! In query routing, a GET form also gets a hidden `url` field right after
//! its start tag: browsers drop the action's query on GET submission, so the
//! target has to travel as a form field.

use std::borrow::Cow;

use crate::config::RewriteConfig;
use ::url::Url;

use crate::rewrite::context::{RewriteContext, Routing};
use crate::rewrite::scan::find_ci;
use crate::rewrite::{css, script, url};

const DOCUMENT_MARKERS: [&str; 4] = ["<!doctype", "<html", "<head", "<body"];

/// Elements whose content is not markup.
const RAW_TEXT_ELEMENTS: [(&str, &str); 4] = [
    ("script", "</script"),
    ("style", "</style"),
    ("textarea", "</textarea"),
    ("title", "</title"),
];

/// True when the text looks like a whole document rather than a fragment.
pub fn is_html_document(body: &str) -> bool {
    DOCUMENT_MARKERS
        .iter()
        .any(|marker| find_ci(body, marker, 0).is_some())
}

/// Rewrite every proxied reference in an HTML document.
///
/// Bodies without a document marker are returned borrowed and unchanged.
pub fn rewrite_html<'a>(
    body: &'a str,
    ctx: &RewriteContext,
    options: &RewriteConfig,
) -> Cow<'a, str> {
    if !is_html_document(body) {
        return Cow::Borrowed(body);
    }

    let mut rewriter = HtmlRewriter {
        ctx: ctx.clone(),
        options,
        base_seen: false,
        raw_text: RawKind::Verbatim,
        out: String::with_capacity(body.len() + body.len() / 8),
    };
    for token in Tokenizer::new(body) {
        rewriter.push(token);
    }
    Cow::Owned(rewriter.out)
}

/// One lexical unit of an HTML document; each borrows its exact source bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token<'a> {
    Text(&'a str),
    Comment(&'a str),
    /// `<!doctype ...>`, `<![CDATA[...]>`, `<?xml ...?>`
    Declaration(&'a str),
    StartTag(StartTag<'a>),
    EndTag(&'a str),
    /// Content of a raw-text element, up to (not including) its end tag.
    RawText(&'a str),
}

impl<'a> Token<'a> {
    pub fn raw(&self) -> &'a str {
        match self {
            Token::Text(s)
            | Token::Comment(s)
            | Token::Declaration(s)
            | Token::EndTag(s)
            | Token::RawText(s) => s,
            Token::StartTag(tag) => tag.raw,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartTag<'a> {
    pub raw: &'a str,
    pub name: &'a str,
    pub attributes: Vec<Attribute<'a>>,
}

impl<'a> StartTag<'a> {
    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute<'a>> {
        self.attributes
            .iter()
            .find(|attr| attr.name.eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute<'a> {
    pub name: &'a str,
    pub value: Option<AttrValue<'a>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrValue<'a> {
    /// Value as written, entities not decoded, quotes excluded.
    pub raw: &'a str,
    /// Byte offset of `raw` within the tag's `raw`.
    pub start: usize,
    pub quote: Option<u8>,
}

/// Forward-only HTML tokenizer.
pub struct Tokenizer<'a> {
    src: &'a str,
    pos: usize,
    pending_close: Option<&'static str>,
}

impl<'a> Tokenizer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            src,
            pos: 0,
            pending_close: None,
        }
    }

    fn take(&mut self, len: usize) -> &'a str {
        let s = &self.src[self.pos..self.pos + len];
        self.pos += len;
        s
    }

    /// Offset of the end tag closing a raw-text element, or end of input.
    fn raw_text_end(&self, close: &str) -> usize {
        let bytes = self.src.as_bytes();
        let mut from = self.pos;
        while let Some(at) = find_ci(self.src, close, from) {
            match bytes.get(at + close.len()) {
                None => return at,
                Some(b) if b.is_ascii_whitespace() || *b == b'/' || *b == b'>' => return at,
                Some(_) => from = at + 1,
            }
        }
        self.src.len()
    }
}

impl<'a> Iterator for Tokenizer<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Token<'a>> {
        if let Some(close) = self.pending_close.take() {
            let end = self.raw_text_end(close);
            if end > self.pos {
                let len = end - self.pos;
                return Some(Token::RawText(self.take(len)));
            }
        }

        let rest = &self.src[self.pos..];
        let bytes = rest.as_bytes();
        let first = *bytes.first()?;

        if first != b'<' {
            let len = rest.find('<').unwrap_or(rest.len());
            return Some(Token::Text(self.take(len)));
        }

        if rest.starts_with("<!--") {
            let len = rest[4..].find("-->").map_or(rest.len(), |i| i + 7);
            return Some(Token::Comment(self.take(len)));
        }

        if rest.starts_with("<!") || rest.starts_with("<?") {
            let len = rest.find('>').map_or(rest.len(), |i| i + 1);
            return Some(Token::Declaration(self.take(len)));
        }

        if rest.starts_with("</") && bytes.get(2).is_some_and(u8::is_ascii_alphabetic) {
            let len = rest.find('>').map_or(rest.len(), |i| i + 1);
            return Some(Token::EndTag(self.take(len)));
        }

        if bytes.get(1).is_some_and(u8::is_ascii_alphabetic) {
            return match parse_start_tag(rest) {
                Some(tag) => {
                    self.pos += tag.raw.len();
                    self.pending_close = RAW_TEXT_ELEMENTS
                        .iter()
                        .find(|(name, _)| tag.is(name))
                        .map(|(_, close)| *close);
                    Some(Token::StartTag(tag))
                }
                // Unterminated tag: the rest of the input is not markup we can use.
                None => Some(Token::Text(self.take(rest.len()))),
            };
        }

        Some(Token::Text(self.take(1)))
    }
}

fn is_space(b: u8) -> bool {
    b.is_ascii_whitespace()
}

/// Parse `<name attr=value ...>` at the start of `input`.
///
/// Returns `None` when the input ends before the closing `>`.
fn parse_start_tag(input: &str) -> Option<StartTag<'_>> {
    let b = input.as_bytes();
    let mut i = 1;
    while i < b.len() && !(is_space(b[i]) || b[i] == b'/' || b[i] == b'>') {
        i += 1;
    }
    let name = &input[1..i];
    let mut attributes = Vec::new();

    loop {
        while i < b.len() && (is_space(b[i]) || b[i] == b'/') {
            i += 1;
        }
        if i >= b.len() {
            return None;
        }
        if b[i] == b'>' {
            i += 1;
            break;
        }

        let name_start = i;
        i += 1;
        while i < b.len() && !(is_space(b[i]) || matches!(b[i], b'/' | b'>' | b'=')) {
            i += 1;
        }
        let attr_name = &input[name_start..i];

        let mut j = i;
        while j < b.len() && is_space(b[j]) {
            j += 1;
        }
        if j >= b.len() || b[j] != b'=' {
            attributes.push(Attribute {
                name: attr_name,
                value: None,
            });
            continue;
        }

        j += 1;
        while j < b.len() && is_space(b[j]) {
            j += 1;
        }
        let value = match *b.get(j)? {
            quote @ (b'"' | b'\'') => {
                let start = j + 1;
                let end = start + input[start..].find(quote as char)?;
                i = end + 1;
                Some(AttrValue {
                    raw: &input[start..end],
                    start,
                    quote: Some(quote),
                })
            }
            b'>' => {
                i = j;
                None
            }
            _ => {
                let start = j;
                while j < b.len() && !(is_space(b[j]) || b[j] == b'>') {
                    j += 1;
                }
                i = j;
                Some(AttrValue {
                    raw: &input[start..j],
                    start,
                    quote: None,
                })
            }
        };
        attributes.push(Attribute {
            name: attr_name,
            value,
        });
    }

    Some(StartTag {
        raw: &input[..i],
        name,
        attributes,
    })
}

/// Reference-bearing attribute for a tag, if it has one we rewrite.
fn url_attribute(tag: &StartTag<'_>) -> Option<&'static str> {
    const TABLE: [(&str, &str); 7] = [
        ("a", "href"),
        ("base", "href"),
        ("form", "action"),
        ("iframe", "src"),
        ("img", "src"),
        ("link", "href"),
        ("script", "src"),
    ];
    TABLE
        .iter()
        .find(|(name, _)| tag.is(name))
        .map(|(_, attr)| *attr)
}

enum RawKind {
    Verbatim,
    Style,
    Script,
}

struct HtmlRewriter<'o> {
    ctx: RewriteContext,
    options: &'o RewriteConfig,
    base_seen: bool,
    raw_text: RawKind,
    out: String,
}

impl HtmlRewriter<'_> {
    fn push(&mut self, token: Token<'_>) {
        match token {
            Token::StartTag(tag) => self.start_tag(&tag),
            Token::RawText(text) => {
                match std::mem::replace(&mut self.raw_text, RawKind::Verbatim) {
                    RawKind::Style => self.out.push_str(&css::rewrite_css(text, &self.ctx)),
                    RawKind::Script => self.out.push_str(&script::neutralize(text, self.options)),
                    RawKind::Verbatim => self.out.push_str(text),
                }
            }
            other => self.out.push_str(other.raw()),
        }
    }

    fn start_tag(&mut self, tag: &StartTag<'_>) {
        self.raw_text = if tag.is("style") {
            RawKind::Style
        } else if tag.is("script") && tag.attribute("src").is_none() {
            RawKind::Script
        } else {
            RawKind::Verbatim
        };

        if self.options.strip_meta_csp && is_meta_csp(tag) {
            tracing::debug!("Stripped <meta> Content-Security-Policy");
            return;
        }

        let url_attr = url_attribute(tag);
        let form_target = self.get_form_target(tag);
        let mut edits: Vec<(usize, usize, String)> = Vec::new();
        let mut new_base = None;

        for attr in &tag.attributes {
            let Some(value) = &attr.value else { continue };

            let replacement = if url_attr.is_some_and(|name| attr.name.eq_ignore_ascii_case(name)) {
                let decoded = decode_entities(value.raw);
                if tag.is("base") && !self.base_seen {
                    new_base = self.ctx.base().join(decoded.trim()).ok();
                }
                changed(&decoded, url::rewrite(&decoded, &self.ctx))
            } else if attr.name.eq_ignore_ascii_case("style") {
                let decoded = decode_entities(value.raw);
                changed(&decoded, css::rewrite_css(&decoded, &self.ctx))
            } else {
                None
            };

            if let Some(replacement) = replacement {
                let (start, end, text) = encode_attr_value(value, &replacement);
                edits.push((start, end, text));
            }
        }

        if tag.is("base") && !self.base_seen {
            self.base_seen = true;
            if let Some(base) = new_base {
                self.ctx = self.ctx.with_base(base);
            }
        }

        let mut cursor = 0;
        for (start, end, text) in edits {
            self.out.push_str(&tag.raw[cursor..start]);
            self.out.push_str(&text);
            cursor = end;
        }
        self.out.push_str(&tag.raw[cursor..]);

        if let Some(target) = form_target {
            self.out.push_str("<input type=\"hidden\" name=\"url\" value=\"");
            self.out.push_str(&escape_attr(target.as_str(), '"'));
            self.out.push_str("\">");
        }
    }

    /// Upstream URL a GET form submits to, when query routing needs it
    /// carried as a hidden field.
    fn get_form_target(&self, tag: &StartTag<'_>) -> Option<Url> {
        if !tag.is("form") || !matches!(self.ctx.identity().routing(), Routing::Query) {
            return None;
        }
        let method = tag
            .attribute("method")
            .and_then(|attr| attr.value.as_ref())
            .map(|value| decode_entities(value.raw).trim().to_string())
            .unwrap_or_default();
        if !(method.is_empty() || method.eq_ignore_ascii_case("get")) {
            return None;
        }

        let action = tag
            .attribute("action")
            .and_then(|attr| attr.value.as_ref())
            .map(|value| decode_entities(value.raw).trim().to_string())
            .unwrap_or_default();
        let mut target = if action.is_empty() {
            self.ctx.base().clone()
        } else if url::is_proxied(&action, &self.ctx) {
            url::decode(&action, &self.ctx)?
        } else {
            self.ctx.base().join(&action).ok()?
        };
        if !matches!(target.scheme(), "http" | "https") {
            return None;
        }
        target.set_query(None);
        target.set_fragment(None);
        Some(target)
    }
}

fn is_meta_csp(tag: &StartTag<'_>) -> bool {
    tag.is("meta")
        && tag
            .attribute("http-equiv")
            .and_then(|attr| attr.value.as_ref())
            .is_some_and(|value| {
                decode_entities(value.raw)
                    .trim()
                    .eq_ignore_ascii_case("content-security-policy")
            })
}

fn changed(original: &str, rewritten: Cow<'_, str>) -> Option<String> {
    (rewritten != original).then(|| rewritten.into_owned())
}

/// Span to replace within the tag and its new text, quoting unquoted values
/// when the replacement would otherwise end the attribute early.
fn encode_attr_value(value: &AttrValue<'_>, text: &str) -> (usize, usize, String) {
    let start = value.start;
    let end = value.start + value.raw.len();
    match value.quote {
        Some(quote) => (start, end, escape_attr(text, quote as char)),
        None if text.bytes().any(|b| is_space(b) || matches!(b, b'"' | b'\'' | b'<' | b'>' | b'=' | b'`')) => {
            (start, end, format!("\"{}\"", escape_attr(text, '"')))
        }
        None => (start, end, escape_attr(text, '"')),
    }
}

fn escape_attr(text: &str, quote: char) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' if quote == '"' => out.push_str("&quot;"),
            '\'' if quote == '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Decode the character references that commonly appear in URLs and styles.
///
/// Unknown or unterminated references are kept literally.
pub fn decode_entities(raw: &str) -> Cow<'_, str> {
    if !raw.contains('&') {
        return Cow::Borrowed(raw);
    }

    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp + 1..];
        let decoded = after
            .bytes()
            .take(12)
            .position(|b| b == b';')
            .and_then(|semi| decode_entity(&after[..semi]).map(|c| (c, semi)));
        match decoded {
            Some((c, semi)) => {
                out.push(c);
                rest = &after[semi + 1..];
            }
            None => {
                out.push('&');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

fn decode_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "sol" => Some('/'),
        "colon" => Some(':'),
        "equals" => Some('='),
        "quest" => Some('?'),
        "num" => Some('#'),
        _ => {
            let numeric = name.strip_prefix('#')?;
            let code = match numeric.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => numeric.parse::<u32>().ok()?,
            };
            char::from_u32(code).filter(|c| *c != '\0')
        }
    }
}
