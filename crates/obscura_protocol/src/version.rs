//! Release version parsing and ordering.
//!
//! Versions look like `v1.2.3` (the leading `v` is optional on input,
//! canonical on output). Anything unparseable sorts below every parseable
//! version so a malformed manifest can never mark agents outdated.

/// Parsed `(major, minor, patch)` triple.
pub fn parse(version: &str) -> Option<(u64, u64, u64)> {
    let trimmed = version.trim().trim_start_matches('v');
    // Ignore any pre-release/build suffix after the patch number.
    let core: String = trimmed
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let mut parts = core.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    let patch = parts.next()?.parse().ok()?;
    Some((major, minor, patch))
}

/// True when `candidate` is strictly newer than `current`.
pub fn is_newer(candidate: &str, current: &str) -> bool {
    match (parse(candidate), parse(current)) {
        (Some(a), Some(b)) => a > b,
        (Some(_), None) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!(parse("v1.2.3"), Some((1, 2, 3)));
        assert_eq!(parse("1.2.3"), Some((1, 2, 3)));
        assert_eq!(parse("v1.2.3-dev.5+abc123"), Some((1, 2, 3)));
        assert_eq!(parse("nightly"), None);
        assert_eq!(parse("v1.2"), None);
    }

    #[test]
    fn test_is_newer() {
        assert!(is_newer("v1.3.0", "v1.2.9"));
        assert!(is_newer("v2.0.0", "v1.99.99"));
        assert!(!is_newer("v1.2.3", "v1.2.3"));
        assert!(!is_newer("v1.2.2", "v1.2.3"));
        assert!(is_newer("v1.0.0", "garbage"));
        assert!(!is_newer("garbage", "v1.0.0"));
    }
}
