//! Minimal URL helpers for location tracking and ajax filtering

/// The URL without its fragment
pub fn strip_hash(url: &str) -> &str {
    url.split_once('#').map_or(url, |(base, _)| base)
}

/// Host part of an absolute URL (`https://api.test:8080/x` gives `api.test`)
pub fn host_of(url: &str) -> Option<&str> {
    let (_, rest) = url.split_once("://")?;
    let end = rest
        .find(|c: char| matches!(c, '/' | ':' | '?' | '#'))
        .unwrap_or(rest.len());
    let host = &rest[..end];
    (!host.is_empty()).then_some(host)
}

fn origin_of(url: &str) -> Option<&str> {
    let scheme_end = url.find("://")? + 3;
    let path_start = url[scheme_end..]
        .find(|c: char| matches!(c, '/' | '?' | '#'))
        .map_or(url.len(), |i| scheme_end + i);
    Some(&url[..path_start])
}

/// Resolve `target` against the absolute URL `base`.
///
/// Handles absolute URLs, fragments, root-relative and path-relative
/// targets; query strings are carried verbatim.
pub fn resolve(base: &str, target: &str) -> String {
    if target.contains("://") {
        return target.to_string();
    }
    if target.starts_with('#') {
        return format!("{}{}", strip_hash(base), target);
    }
    let Some(origin) = origin_of(base) else {
        return target.to_string();
    };
    if target.starts_with('/') {
        return format!("{origin}{target}");
    }
    let path = strip_hash(base)
        .split_once('?')
        .map_or(strip_hash(base), |(p, _)| p);
    let dir = match path[origin.len()..].rfind('/') {
        Some(i) => &path[..origin.len() + i + 1],
        None => return format!("{origin}/{target}"),
    };
    format!("{dir}{target}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_fragments() {
        assert_eq!(strip_hash("https://a.test/x#y"), "https://a.test/x");
        assert_eq!(strip_hash("https://a.test/x"), "https://a.test/x");
    }

    #[test]
    fn extracts_hosts() {
        assert_eq!(host_of("https://api.test:8080/v1?q=1"), Some("api.test"));
        assert_eq!(host_of("http://cdn.test"), Some("cdn.test"));
        assert_eq!(host_of("/relative"), None);
    }

    #[test]
    fn resolves_relative_targets() {
        let base = "https://shop.test/cart/items?page=2#top";
        assert_eq!(resolve(base, "https://x.test/"), "https://x.test/");
        assert_eq!(resolve(base, "#checkout"), "https://shop.test/cart/items?page=2#checkout");
        assert_eq!(resolve(base, "/orders"), "https://shop.test/orders");
        assert_eq!(resolve(base, "summary"), "https://shop.test/cart/summary");
        assert_eq!(resolve("https://shop.test", "a"), "https://shop.test/a");
    }
}
