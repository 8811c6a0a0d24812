//! Sanitizes scan output before comparing it to a TestCase's recorded
//! baseline, stripping host-identifying strings that legitimately vary
//! from run to run.
//!
//! Grounded on `_analyze_scan_result` in
//! `original_source/vts-testing/vts-testing/models/test_executor.py`: the
//! recorded host, the emulator's IP, its hostname, and its container
//! network alias are joined into one alternation and stripped, with an
//! optional `:port` suffix, from both the scanner's output and the
//! recorded baseline before they're compared.

use regex::Regex;

/// Builds the sanitizing pattern for one run from every host string the
/// emulator might be reached at: `(?:{hosts})(:[0-9]+)?`, matching the
/// original's `replace_pattern`.
fn host_pattern(hosts: &[String]) -> Option<Regex> {
    let hosts: Vec<&str> = hosts.iter().map(String::as_str).filter(|h| !h.is_empty()).collect();
    if hosts.is_empty() {
        return None;
    }
    let alternation = hosts.join("|");
    Regex::new(&format!(r"(?:{alternation})(:[0-9]+)?")).ok()
}

/// Strips every occurrence of any of `hosts` (with an optional trailing
/// `:port`) from `text`, then trims the result the way the original's
/// `.strip()` does.
pub fn sanitize(text: &str, hosts: &[String]) -> String {
    match host_pattern(hosts) {
        Some(re) => re.replace_all(text, "").trim().to_string(),
        None => text.trim().to_string(),
    }
}

/// True if `actual` matches `expected` once both are sanitized against the
/// same host set.
pub fn compare(actual: &str, expected: &str, hosts: &[String]) -> bool {
    sanitize(actual, hosts) == sanitize(expected, hosts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hosts() -> Vec<String> {
        vec![
            "192.0.2.123".to_string(),
            "127.0.0.1".to_string(),
            "emulator-1".to_string(),
        ]
    }

    #[test]
    fn recorded_host_with_port_is_stripped() {
        let a = "Vulnerable host found at 192.0.2.123:443";
        let b = "Vulnerable host found at";
        assert!(compare(a, b, &hosts()));
    }

    #[test]
    fn emulator_ip_and_hostname_are_interchangeable() {
        let a = "target 127.0.0.1:8080 responded";
        let b = "target emulator-1:8080 responded";
        assert!(compare(a, b, &hosts()));
    }

    #[test]
    fn genuine_differences_still_fail() {
        assert!(!compare("2 results found", "3 results found", &hosts()));
    }

    #[test]
    fn host_independent_ports_still_differ() {
        // A port that doesn't follow one of the known hosts is not part of
        // the sanitized pattern and must still distinguish two outputs.
        assert!(!compare("listening on :9999", "listening on :8888", &hosts()));
    }

    #[test]
    fn no_hosts_still_trims_whitespace() {
        assert_eq!(sanitize("  result  ", &[]), "result");
    }
}
