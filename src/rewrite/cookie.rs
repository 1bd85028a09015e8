//! `Set-Cookie` rewriting for third-party (framed) contexts.
//!
//! A framed page only keeps its cookies when they are `SameSite=None`, and
//! `SameSite=None` only sticks when `Secure` matches the transport the browser
//! used to reach the proxy.

use std::fmt;

/// One `Set-Cookie` value split into its pair and attribute list.
///
/// Attribute order and spelling are preserved for everything the rewrite does
/// not touch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieDirective {
    pub name: String,
    pub value: String,
    pub attributes: Vec<(String, Option<String>)>,
}

impl CookieDirective {
    /// Split a raw header value.
    ///
    /// A pair without `=` is a nameless cookie whose value is the whole pair,
    /// which is how browsers read it.
    pub fn parse(raw: &str) -> Self {
        let mut parts = raw.split(';');
        let pair = parts.next().unwrap_or_default().trim();
        let (name, value) = pair.split_once('=').unwrap_or(("", pair));

        let attributes = parts
            .map(str::trim)
            .filter(|attr| !attr.is_empty())
            .map(|attr| match attr.split_once('=') {
                Some((k, v)) => (k.trim().to_string(), Some(v.trim().to_string())),
                None => (attr.to_string(), None),
            })
            .collect();

        Self {
            name: name.trim().to_string(),
            value: value.trim().to_string(),
            attributes,
        }
    }

    pub fn remove(&mut self, attribute: &str) {
        self.attributes
            .retain(|(k, _)| !k.eq_ignore_ascii_case(attribute));
    }

    pub fn count(&self, attribute: &str) -> usize {
        self.attributes
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(attribute))
            .count()
    }

    pub fn get(&self, attribute: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(attribute))
            .and_then(|(_, v)| v.as_deref())
    }

    /// Replace any `SameSite` with exactly one `SameSite=None`.
    pub fn set_same_site_none(&mut self) {
        self.remove("samesite");
        self.attributes
            .push(("SameSite".to_string(), Some("None".to_string())));
    }

    /// Ensure exactly one `Secure` when `secure`, none otherwise.
    pub fn set_secure(&mut self, secure: bool) {
        self.remove("secure");
        if secure {
            self.attributes.push(("Secure".to_string(), None));
        }
    }
}

impl fmt::Display for CookieDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            f.write_str(&self.value)?;
        } else {
            write!(f, "{}={}", self.name, self.value)?;
        }
        for (k, v) in &self.attributes {
            match v {
                Some(v) => write!(f, "; {}={}", k, v)?,
                None => write!(f, "; {}", k)?,
            }
        }
        Ok(())
    }
}

/// Rewrite one `Set-Cookie` value.
///
/// `Domain` is dropped: it names the upstream's domain, which the browser would
/// reject for a response served from the proxy host.
pub fn rewrite_set_cookie(raw: &str, secure_transport: bool) -> String {
    let mut cookie = CookieDirective::parse(raw);
    if cookie.name.is_empty() {
        tracing::debug!(cookie = %raw, "Rewriting nameless Set-Cookie");
    }

    cookie.remove("domain");
    cookie.set_same_site_none();
    cookie.set_secure(secure_transport);
    cookie.to_string()
}
