//! Semantic version ordering for rule version constraints.
//!
//! Dependency versions come out of Go module cache paths and follow the
//! `vMAJOR.MINOR.PATCH[-prerelease][+build]` shape. Comparison follows the
//! canonical semver rules: numeric fields compare numerically, a release
//! orders above any of its prereleases, prerelease identifiers compare
//! dot-wise with numeric identifiers below alphanumeric ones, and build
//! metadata never participates in ordering.

use std::cmp::Ordering;

/// A parsed version. Invalid inputs order below every valid version, so a
/// dependency with no recognizable version never satisfies a constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Version {
    major: u64,
    minor: u64,
    patch: u64,
    prerelease: Option<String>,
}

fn parse(v: &str) -> Option<Version> {
    let rest = v.strip_prefix('v')?;
    // Strip build metadata first; it is ignored entirely
    let rest = match rest.split_once('+') {
        Some((core, _meta)) => core,
        None => rest,
    };
    let (core, prerelease) = match rest.split_once('-') {
        Some((core, pre)) if !pre.is_empty() => (core, Some(pre.to_string())),
        Some(_) => return None,
        None => (rest, None),
    };
    let mut nums = core.split('.');
    let major = parse_num(nums.next()?)?;
    let minor = parse_num(nums.next()?)?;
    let patch = parse_num(nums.next()?)?;
    if nums.next().is_some() {
        return None;
    }
    Some(Version {
        major,
        minor,
        patch,
        prerelease,
    })
}

fn parse_num(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    // No leading zeros, except "0" itself
    if s.len() > 1 && s.starts_with('0') {
        return None;
    }
    s.parse().ok()
}

/// Compare two prerelease strings per the canonical rule: identifiers are
/// compared left to right, numeric ones numerically and below alphanumeric
/// ones, and a shorter identifier list orders first when it is a prefix.
fn compare_prerelease(a: &str, b: &str) -> Ordering {
    let mut xs = a.split('.');
    let mut ys = b.split('.');
    loop {
        match (xs.next(), ys.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let ord = match (parse_num(x), parse_num(y)) {
                    (Some(nx), Some(ny)) => nx.cmp(&ny),
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => x.cmp(y),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

/// Compare two version strings. Invalid versions compare below every valid
/// version and equal to each other.
pub fn compare(a: &str, b: &str) -> Ordering {
    match (parse(a), parse(b)) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(va), Some(vb)) => {
            let ord = va
                .major
                .cmp(&vb.major)
                .then(va.minor.cmp(&vb.minor))
                .then(va.patch.cmp(&vb.patch));
            if ord != Ordering::Equal {
                return ord;
            }
            match (&va.prerelease, &vb.prerelease) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(pa), Some(pb)) => compare_prerelease(pa, pb),
            }
        }
    }
}

/// Check whether a string is a well-formed version.
pub fn is_valid(v: &str) -> bool {
    parse(v).is_some()
}
