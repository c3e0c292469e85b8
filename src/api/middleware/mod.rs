use http::request::Parts as ReqParts;
use http::{HeaderValue, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};

/// Builds the CORS layer from the configured origin rule: either `*` or a domain suffix such as
/// `.example.com`.
///
/// Credentials are only allowed for suffix rules; browsers reject them alongside a wildcard
/// origin.
pub fn cors(allow_origins: &str) -> CorsLayer {
    let methods = [
        Method::GET,
        Method::POST,
        Method::PATCH,
        Method::PUT,
        Method::DELETE,
        Method::OPTIONS,
    ];

    if allow_origins == "*" {
        return CorsLayer::new()
            .allow_methods(methods)
            .allow_headers(tower_http::cors::Any)
            .allow_origin(AllowOrigin::any());
    }

    let suffix = allow_origins.to_string();
    CorsLayer::new()
        .allow_methods(methods)
        .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
        .allow_credentials(true)
        .allow_origin(AllowOrigin::predicate(
            move |origin: &HeaderValue, _: &ReqParts| origin_matches(origin, &suffix),
        ))
}

/// Matches the origin's host against a dot-prefixed suffix. `.example.com` admits
/// `https://app.example.com` and `https://example.com`, never `https://evilexample.com`.
fn origin_matches(origin: &HeaderValue, suffix: &str) -> bool {
    let Ok(origin) = origin.to_str() else {
        return false;
    };
    let Some((_, authority)) = origin.split_once("://") else {
        return false;
    };

    let host = match authority.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => authority,
    };

    let Some(apex) = suffix.strip_prefix('.') else {
        return false;
    };

    host.eq_ignore_ascii_case(apex)
        || host
            .to_ascii_lowercase()
            .ends_with(&suffix.to_ascii_lowercase())
}
