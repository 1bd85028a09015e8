//! Neutralization of inline scripts that fight being framed.
//!
//! Only three shapes are recognized, optionally prefixed by `window.`:
//! ```text
//! top.location = x            ->  window.__embedProxyFrameBust = x
//! parent.location.href = x    ->  window.__embedProxyFrameBust = x
//! top.location.replace(x)     ->  (function(){})(x)
//! navigator.serviceWorker.register(x)
//!                             ->  (function(){return new Promise(function(){})})(x)
//! ```
//! Comparisons (`==`, `!=`) and reads are left alone.

use std::borrow::Cow;

use crate::config::RewriteConfig;
use crate::rewrite::scan::is_ident_byte;

const FRAME_BUST_SINK: &str = "window.__embedProxyFrameBust =";
const NOOP_CALL: &str = "(function(){})(";
const NEVER_RESOLVING_CALL: &str = "(function(){return new Promise(function(){})})(";

const TOP_LOCATION: &str = "top.location";
const PARENT_LOCATION: &str = "parent.location";
const SW_REGISTER: &str = "navigator.serviceWorker.register";

/// Rewrite frame-busting and service-worker registration in one script body.
pub fn neutralize<'a>(js: &'a str, options: &RewriteConfig) -> Cow<'a, str> {
    let mut needles = Vec::with_capacity(3);
    if options.neutralize_frame_busting {
        needles.extend([TOP_LOCATION, PARENT_LOCATION]);
    }
    if options.block_service_workers {
        needles.push(SW_REGISTER);
    }
    if needles.is_empty() {
        return Cow::Borrowed(js);
    }

    let mut next: Vec<Option<usize>> = needles.iter().map(|n| js.find(n)).collect();
    let mut out: Option<String> = None;
    let mut copied = 0;

    loop {
        let Some((idx, at)) = next
            .iter()
            .enumerate()
            .filter_map(|(i, pos)| pos.map(|p| (i, p)))
            .min_by_key(|&(_, p)| p)
        else {
            break;
        };
        let needle = needles[idx];

        let mut resume = at + needle.len();
        if at >= copied {
            if let Some((start, end, replacement)) = match_at(js, at, needle) {
                let buf = out.get_or_insert_with(|| String::with_capacity(js.len() + 64));
                buf.push_str(&js[copied..start]);
                buf.push_str(replacement);
                copied = end;
                resume = end;
                tracing::trace!(pattern = needle, "Neutralized inline script call site");
            }
        }
        next[idx] = js[resume..].find(needle).map(|p| p + resume);
    }

    match out {
        Some(mut buf) => {
            buf.push_str(&js[copied..]);
            Cow::Owned(buf)
        }
        None => Cow::Borrowed(js),
    }
}

/// Span `[start, end)` to replace and its replacement, when the occurrence of
/// `needle` at `at` is one of the recognized shapes.
fn match_at(js: &str, at: usize, needle: &str) -> Option<(usize, usize, &'static str)> {
    let bytes = js.as_bytes();
    let start = if js[..at].ends_with("window.") { at - 7 } else { at };
    if start > 0 && (is_ident_byte(bytes[start - 1]) || bytes[start - 1] == b'.') {
        return None;
    }

    let end = at + needle.len();
    if bytes.get(end).is_some_and(|b| is_ident_byte(*b)) {
        return None;
    }

    if needle == SW_REGISTER {
        let paren = skip_space(bytes, end);
        return (bytes.get(paren) == Some(&b'(')).then_some((start, paren + 1, NEVER_RESOLVING_CALL));
    }

    let rest = &js[end..];
    for call in [".replace(", ".assign("] {
        if rest.starts_with(call) {
            return Some((start, end + call.len(), NOOP_CALL));
        }
    }

    let mut lhs_end = end;
    if rest.starts_with(".href") && !bytes.get(end + 5).is_some_and(|b| is_ident_byte(*b)) {
        lhs_end += 5;
    }
    let eq = skip_space(bytes, lhs_end);
    if bytes.get(eq) == Some(&b'=') && bytes.get(eq + 1) != Some(&b'=') {
        return Some((start, eq + 1, FRAME_BUST_SINK));
    }
    None
}

fn skip_space(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(js: &str) -> String {
        neutralize(js, &RewriteConfig::default()).into_owned()
    }

    #[test]
    fn assignments_redirected_to_sink() {
        assert_eq!(
            run("if (top !== self) top.location = self.location;"),
            "if (top !== self) window.__embedProxyFrameBust = self.location;"
        );
        assert_eq!(
            run("window.top.location.href='/x'"),
            "window.__embedProxyFrameBust ='/x'"
        );
        assert_eq!(
            run("parent.location.href = location.href"),
            "window.__embedProxyFrameBust = location.href"
        );
    }

    #[test]
    fn navigation_calls_become_noops() {
        assert_eq!(
            run("top.location.replace(self.location.href);"),
            "(function(){})(self.location.href);"
        );
        assert_eq!(run("parent.location.assign(u)"), "(function(){})(u)");
    }

    #[test]
    fn comparisons_and_lookalikes_untouched() {
        for js in [
            "if (top.location == self.location) {}",
            "if (top.location != self.location) {}",
            "var x = top.location.hostname;",
            "stop.location = 1;",
            "obj.top.location = 1;",
            "top.locationBar = 1;",
        ] {
            assert!(matches!(neutralize(js, &RewriteConfig::default()), Cow::Borrowed(_)), "{js}");
        }
    }

    #[test]
    fn service_worker_registration_blocked() {
        assert_eq!(
            run("navigator.serviceWorker.register('/sw.js').then(ok);"),
            "(function(){return new Promise(function(){})})('/sw.js').then(ok);"
        );
        assert_eq!(
            run("window.navigator.serviceWorker.register ('/sw.js')"),
            "(function(){return new Promise(function(){})})('/sw.js')"
        );
    }

    #[test]
    fn options_disable_each_rule() {
        let js = "top.location = '/'; navigator.serviceWorker.register('/sw.js');";
        let off = RewriteConfig {
            neutralize_frame_busting: false,
            block_service_workers: false,
            ..RewriteConfig::default()
        };
        assert_eq!(neutralize(js, &off), js);

        let only_sw = RewriteConfig {
            neutralize_frame_busting: false,
            ..RewriteConfig::default()
        };
        let out = neutralize(js, &only_sw);
        assert!(out.starts_with("top.location = '/';"));
        assert!(!out.contains("navigator.serviceWorker.register"));
    }

    #[test]
    fn several_sites_in_one_script() {
        let out = run("top.location = a; parent.location = b; top.location.replace(c);");
        assert_eq!(
            out,
            "window.__embedProxyFrameBust = a; window.__embedProxyFrameBust = b; (function(){})(c);"
        );
    }
}
