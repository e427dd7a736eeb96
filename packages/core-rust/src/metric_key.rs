//! Metric names and route-signature normalization.
//!
//! A metric key is `<prefix>_<signature>` where the signature is
//! `<METHOD>_<path>` with every character outside `[_A-Za-z]` removed, so
//! `GET /health` becomes `GET_health`. Prefixes are the constants below and
//! are already inside the allowed charset.

use std::sync::LazyLock;

use regex::Regex;

/// Per-route request counter prefix.
pub const HTTP_REQUEST_COUNT: &str = "http_request_count";
/// Per-route latency histogram prefix, millisecond observations.
pub const HTTP_REQUEST_DURATION_MS: &str = "http_request_duration_ms";
/// Per-route latency histogram prefix, microsecond observations.
pub const HTTP_REQUEST_DURATION_MICRO: &str = "http_request_duration_micro";

/// Requests that made it through admission control and the handler.
pub const PROCESSED_OPS_TOTAL: &str = "broker_processed_ops_total";
/// Requests turned away by admission control.
pub const REQUESTS_REJECTED_TOTAL: &str = "broker_requests_rejected_total";

/// Histogram bucket upper bounds. Milliseconds for the `_ms` series; the
/// `_micro` series reuses the same numbers against microsecond values.
pub const LATENCY_BUCKETS: [f64; 11] = [
    1.0, 2.0, 4.0, 8.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0,
];

static DISALLOWED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("[^_A-Za-z]+").expect("metric charset pattern is valid"));

/// Strips every character outside `[_A-Za-z]`.
#[must_use]
pub fn normalize(raw: &str) -> String {
    DISALLOWED.replace_all(raw, "").into_owned()
}

/// Normalized `<METHOD>_<path>` signature of a route.
#[must_use]
pub fn route_signature(method: &str, path: &str) -> String {
    normalize(&format!("{method}_{path}"))
}

/// Full metric key for `prefix` on the given route.
#[must_use]
pub fn metric_key(prefix: &str, method: &str, path: &str) -> String {
    format!("{prefix}_{}", route_signature(method, path))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn in_charset(s: &str) -> bool {
        s.chars().all(|c| c == '_' || c.is_ascii_alphabetic())
    }

    #[test]
    fn health_route_signature() {
        assert_eq!(route_signature("GET", "/health"), "GET_health");
        assert_eq!(
            metric_key(HTTP_REQUEST_COUNT, "GET", "/health"),
            "http_request_count_GET_health"
        );
    }

    #[test]
    fn digits_and_punctuation_are_stripped() {
        assert_eq!(route_signature("GET", "/api/v2/users-42"), "GET_apivusers");
        assert_eq!(normalize("a.b:c d"), "abcd");
    }

    #[test]
    fn key_is_stable_across_calls() {
        let first = metric_key(HTTP_REQUEST_DURATION_MS, "GET", "/health");
        let second = metric_key(HTTP_REQUEST_DURATION_MS, "GET", "/health");
        assert_eq!(first, second);
        assert!(in_charset(&first));
    }

    #[test]
    fn prefixes_are_inside_the_charset() {
        for prefix in [
            HTTP_REQUEST_COUNT,
            HTTP_REQUEST_DURATION_MS,
            HTTP_REQUEST_DURATION_MICRO,
            PROCESSED_OPS_TOTAL,
            REQUESTS_REJECTED_TOTAL,
        ] {
            assert_eq!(normalize(prefix), prefix);
        }
    }

    #[test]
    fn buckets_are_strictly_increasing() {
        assert!(LATENCY_BUCKETS.windows(2).all(|w| w[0] < w[1]));
    }

    proptest! {
        #[test]
        fn normalized_output_stays_in_charset(raw in ".*") {
            prop_assert!(in_charset(&normalize(&raw)));
        }

        #[test]
        fn normalization_is_idempotent(raw in ".*") {
            let once = normalize(&raw);
            prop_assert_eq!(normalize(&once), once.clone());
        }

        #[test]
        fn signature_keeps_allowed_characters(method in "[A-Z]{3,7}", path in "/[a-z_]{0,12}") {
            let expected = format!("{method}_{}", &path[1..]);
            prop_assert_eq!(route_signature(&method, &path), expected);
        }
    }
}
