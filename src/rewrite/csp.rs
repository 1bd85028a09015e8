//! `Content-Security-Policy` adjustment so the proxy may frame the page.
//!
//! Only `frame-ancestors` directives are touched. Every other byte of the
//! header value, separators and whitespace included, is copied through.

const FRAME_ANCESTORS: &str = "frame-ancestors";

fn directive_name(directive: &str) -> &str {
    directive.split_ascii_whitespace().next().unwrap_or_default()
}

fn frame_ancestors_directive(ancestors: &[String]) -> String {
    if ancestors.is_empty() {
        FRAME_ANCESTORS.to_string()
    } else {
        format!("{} {}", FRAME_ANCESTORS, ancestors.join(" "))
    }
}

/// Rewrite one policy: the first `frame-ancestors` is replaced where it
/// stands, later ones are dropped, and one is appended when none exists.
fn splice_policy(policy: &str, directive: &str) -> String {
    let mut placed = false;
    let mut kept: Vec<String> = Vec::new();

    for piece in policy.split(';') {
        if !directive_name(piece).eq_ignore_ascii_case(FRAME_ANCESTORS) {
            kept.push(piece.to_string());
            continue;
        }
        if placed {
            continue;
        }
        placed = true;
        let content_start = piece.len() - piece.trim_start().len();
        let content_end = piece.trim_end().len();
        kept.push(format!(
            "{}{}{}",
            &piece[..content_start],
            directive,
            &piece[content_end..]
        ));
    }

    if placed {
        return kept.join(";");
    }

    let body = policy.trim_end();
    let trailing = &policy[body.len()..];
    if body.ends_with(';') {
        format!("{body} {directive}{trailing}")
    } else {
        format!("{body}; {directive}{trailing}")
    }
}

/// Make every policy in a header value carry exactly one `frame-ancestors`
/// listing `ancestors`.
pub fn ensure_frame_ancestors(header_value: &str, ancestors: &[String]) -> String {
    if header_value.trim().is_empty() {
        return frame_ancestors_only(ancestors);
    }

    let directive = frame_ancestors_directive(ancestors);
    header_value
        .split(',')
        .map(|policy| {
            if policy.trim().is_empty() {
                policy.to_string()
            } else {
                splice_policy(policy, &directive)
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Policy added when the upstream sent no CSP at all.
pub fn frame_ancestors_only(ancestors: &[String]) -> String {
    frame_ancestors_directive(ancestors)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ancestors() -> Vec<String> {
        vec!["http://localhost:3000".to_string()]
    }

    fn occurrences(haystack: &str, needle: &str) -> usize {
        haystack.matches(needle).count()
    }

    #[test]
    fn replaces_existing_directive_in_place() {
        let out = ensure_frame_ancestors(
            "default-src 'self'; frame-ancestors 'none'; img-src *",
            &ancestors(),
        );
        assert_eq!(
            out,
            "default-src 'self'; frame-ancestors http://localhost:3000; img-src *"
        );
    }

    #[test]
    fn appends_when_missing() {
        let out = ensure_frame_ancestors("script-src 'self' https://cdn.test;", &ancestors());
        assert_eq!(out, "script-src 'self' https://cdn.test; frame-ancestors http://localhost:3000");
    }

    #[test]
    fn duplicates_collapse_to_one() {
        let out = ensure_frame_ancestors(
            "FRAME-ANCESTORS 'self'; default-src *; frame-ancestors https://a.test http://localhost:3000",
            &ancestors(),
        );
        assert_eq!(occurrences(&out.to_ascii_lowercase(), "frame-ancestors"), 1);
        assert_eq!(occurrences(&out, "http://localhost:3000"), 1);
        assert!(out.starts_with("frame-ancestors http://localhost:3000; default-src *"));
    }

    #[test]
    fn each_comma_separated_policy_is_rewritten() {
        let out = ensure_frame_ancestors("default-src 'self', frame-ancestors 'none'", &ancestors());
        assert_eq!(
            out,
            "default-src 'self'; frame-ancestors http://localhost:3000, frame-ancestors http://localhost:3000"
        );
    }

    #[test]
    fn untouched_directives_keep_their_exact_text() {
        let out = ensure_frame_ancestors(
            "default-src  'self'\thttps://a.test ;frame-ancestors 'none';",
            &ancestors(),
        );
        assert_eq!(
            out,
            "default-src  'self'\thttps://a.test ;frame-ancestors http://localhost:3000;"
        );

        let out = ensure_frame_ancestors("img-src * ;  ", &ancestors());
        assert_eq!(out, "img-src * ; frame-ancestors http://localhost:3000  ");
    }

    #[test]
    fn duplicate_removal_keeps_neighbours_intact() {
        let out = ensure_frame_ancestors(
            "frame-ancestors 'self';script-src  'none'; frame-ancestors *;  img-src data:",
            &ancestors(),
        );
        assert_eq!(
            out,
            "frame-ancestors http://localhost:3000;script-src  'none';  img-src data:"
        );
    }

    #[test]
    fn empty_value_gets_fresh_policy() {
        assert_eq!(ensure_frame_ancestors("  ", &ancestors()), "frame-ancestors http://localhost:3000");
    }

    #[test]
    fn extra_ancestors_listed_after_proxy() {
        let list = vec!["http://localhost:3000".to_string(), "https://app.test".to_string()];
        assert_eq!(
            frame_ancestors_only(&list),
            "frame-ancestors http://localhost:3000 https://app.test"
        );
    }
}
