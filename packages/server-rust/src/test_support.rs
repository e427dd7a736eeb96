//! Helpers for reading values back out of the Prometheus text exposition.

/// Value of the sample whose series (name plus labels) is exactly `series`.
///
/// Counters are also matched with a `_total` suffix, which some exposition
/// formats append.
pub fn sample(rendered: &str, series: &str) -> Option<f64> {
    let with_total = format!("{series}_total");
    rendered
        .lines()
        .filter(|line| !line.starts_with('#'))
        .filter_map(|line| line.rsplit_once(' '))
        .find(|(name, _)| *name == series || *name == with_total)
        .and_then(|(_, value)| value.trim().parse().ok())
}

/// Cumulative count of the `le` bucket of histogram `name` whose bound equals `le`.
pub fn bucket_count(rendered: &str, name: &str, le: f64) -> Option<f64> {
    let prefix = format!("{name}_bucket{{");
    rendered
        .lines()
        .filter(|line| line.starts_with(&prefix))
        .find(|line| bucket_bound(line) == Some(le))
        .and_then(|line| line.rsplit_once(' '))
        .and_then(|(_, value)| value.trim().parse().ok())
}

/// Upper bounds of every bucket rendered for histogram `name`, in order.
pub fn bucket_bounds(rendered: &str, name: &str) -> Vec<f64> {
    let prefix = format!("{name}_bucket{{");
    rendered
        .lines()
        .filter(|line| line.starts_with(&prefix))
        .filter_map(bucket_bound)
        .collect()
}

fn bucket_bound(line: &str) -> Option<f64> {
    let start = line.find("le=\"")? + 4;
    let end = start + line[start..].find('"')?;
    match &line[start..end] {
        "+Inf" => Some(f64::INFINITY),
        bound => bound.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RENDERED: &str = "\
# TYPE requests counter
requests 7
# TYPE latency histogram
latency_bucket{le=\"1\"} 2
latency_bucket{le=\"2.5\"} 3
latency_bucket{le=\"+Inf\"} 4
latency_sum 9.5
latency_count 4
";

    #[test]
    fn reads_plain_samples() {
        assert_eq!(sample(RENDERED, "requests"), Some(7.0));
        assert_eq!(sample(RENDERED, "latency_count"), Some(4.0));
        assert_eq!(sample(RENDERED, "missing"), None);
    }

    #[test]
    fn reads_buckets() {
        assert_eq!(bucket_count(RENDERED, "latency", 2.5), Some(3.0));
        assert_eq!(bucket_count(RENDERED, "latency", f64::INFINITY), Some(4.0));
        assert_eq!(bucket_bounds(RENDERED, "latency"), [1.0, 2.5, f64::INFINITY]);
    }
}
