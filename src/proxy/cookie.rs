//! `Set-Cookie` rewriting for cross-origin backend sessions.
//!
//! The backend issues host-locked cookies (`__Host-`/`__Secure-` names, a `Domain` pinned to its
//! own host) that a browser will not store when they arrive through our origin. Rewriting drops
//! the prefixes and domain and pins `Secure`/`SameSite` to what the deployment can satisfy.

use crate::constants::{HOST_COOKIE_PREFIX, SECURE_COOKIE_PREFIX};
use crate::util::config::CookieModeArg;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CookieMode {
    /// HTTPS edge proxy: `Secure; SameSite=None`
    Edge,
    /// Plain-http localhost: no `Secure`, `SameSite=Lax`
    Local,
}

impl From<CookieModeArg> for CookieMode {
    fn from(value: CookieModeArg) -> Self {
        match value {
            CookieModeArg::Edge => CookieMode::Edge,
            CookieModeArg::Local => CookieMode::Local,
        }
    }
}

impl CookieMode {
    fn same_site(&self) -> &'static str {
        match self {
            CookieMode::Edge => "SameSite=None",
            CookieMode::Local => "SameSite=Lax",
        }
    }

    fn secure(&self) -> bool {
        matches!(self, CookieMode::Edge)
    }
}

pub fn strip_name_prefix(name: &str) -> &str {
    name.strip_prefix(SECURE_COOKIE_PREFIX)
        .or_else(|| name.strip_prefix(HOST_COOKIE_PREFIX))
        .unwrap_or(name)
}

/// Rewrites a single `Set-Cookie` header value
pub fn rewrite_set_cookie(value: &str, mode: CookieMode) -> String {
    let mut parts = value.split(';').map(str::trim);
    let pair = parts.next().unwrap_or_default();

    let pair = match pair.split_once('=') {
        Some((name, val)) => format!("{}={val}", strip_name_prefix(name.trim())),
        None => pair.to_string(),
    };

    let mut rewritten = vec![pair];
    for attr in parts.filter(|a| !a.is_empty()) {
        let key = attr.split('=').next().unwrap_or_default().trim();
        if key.eq_ignore_ascii_case("domain")
            || key.eq_ignore_ascii_case("secure")
            || key.eq_ignore_ascii_case("samesite")
        {
            continue;
        }

        rewritten.push(attr.to_string());
    }

    rewritten.push(mode.same_site().to_string());
    if mode.secure() {
        rewritten.push(String::from("Secure"));
    }

    rewritten.join("; ")
}

#[cfg(test)]
mod test {
    use super::*;

    const UPSTREAM: &str = "__Host-session=abc.def; Path=/; Domain=db.example.com; HttpOnly; Secure; SameSite=Strict; Max-Age=3600";

    #[test]
    fn test_edge_rewrite() {
        assert_eq!(
            rewrite_set_cookie(UPSTREAM, CookieMode::Edge),
            "session=abc.def; Path=/; HttpOnly; Max-Age=3600; SameSite=None; Secure"
        );
    }

    #[test]
    fn test_local_rewrite() {
        assert_eq!(
            rewrite_set_cookie(UPSTREAM, CookieMode::Local),
            "session=abc.def; Path=/; HttpOnly; Max-Age=3600; SameSite=Lax"
        );
    }

    #[test]
    fn test_secure_prefix_and_case() {
        let upstream = "__Secure-refresh=t0k=n; domain=.example.com; secure; samesite=lax";
        assert_eq!(
            rewrite_set_cookie(upstream, CookieMode::Edge),
            "refresh=t0k=n; SameSite=None; Secure"
        );
    }

    #[test]
    fn test_plain_cookie_untouched_name() {
        assert_eq!(
            rewrite_set_cookie("theme=dark", CookieMode::Local),
            "theme=dark; SameSite=Lax"
        );
        assert_eq!(strip_name_prefix("__Hostile"), "__Hostile");
    }
}
