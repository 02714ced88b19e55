use crate::error::MalformedVersion;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Dotted numeric package version such as `1.2.3.4`.
///
/// Any number of components is accepted. Comparison is numeric and
/// left-to-right, with missing trailing components treated as `0`, so
/// `1.2` and `1.2.0.0` are equal.
#[derive(Debug, Clone)]
pub struct PackageVersion {
    components: Vec<u64>,
}

impl PackageVersion {
    /// Numeric components as parsed, without trailing zero padding.
    pub fn components(&self) -> &[u64] {
        &self.components
    }

    fn component(&self, index: usize) -> u64 {
        self.components.get(index).copied().unwrap_or(0)
    }
}

impl FromStr for PackageVersion {
    type Err = MalformedVersion;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let malformed = || MalformedVersion(raw.to_string());
        let components = raw
            .split('.')
            .map(|part| {
                if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(malformed());
                }
                part.parse::<u64>().map_err(|_| malformed())
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(PackageVersion { components })
    }
}

impl Ord for PackageVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.components.len().max(other.components.len());
        (0..len)
            .map(|i| self.component(i).cmp(&other.component(i)))
            .find(|ordering| ordering.is_ne())
            .unwrap_or(Ordering::Equal)
    }
}

impl PartialOrd for PackageVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for PackageVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PackageVersion {}

impl fmt::Display for PackageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for component in &self.components {
            if !first {
                f.write_str(".")?;
            }
            write!(f, "{component}")?;
            first = false;
        }
        Ok(())
    }
}

/// Whether `candidate` is strictly newer than `current`.
///
/// Surrounding whitespace in `candidate` is ignored; manifests often carry it.
pub fn is_newer(current: &str, candidate: &str) -> Result<bool, MalformedVersion> {
    let current: PackageVersion = current.parse()?;
    let candidate: PackageVersion = candidate.trim().parse()?;
    Ok(candidate > current)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compares_numerically_per_component() {
        assert!(is_newer("1.2.0.0", "1.2.0.1").unwrap());
        assert!(!is_newer("2.0.0.0", "1.9.9.9").unwrap());
        assert!(is_newer("1.9.0.0", "1.10.0.0").unwrap());
        assert!(!is_newer("1.2.3.4", "1.2.3.4").unwrap());
    }

    #[test]
    fn missing_components_count_as_zero() {
        assert!(!is_newer("1.2", "1.2.0.0").unwrap());
        assert!(is_newer("1.2", "1.2.0.1").unwrap());
        assert!(!is_newer("1.2.0.1", "1.2").unwrap());
        assert_eq!(
            "3".parse::<PackageVersion>().unwrap(),
            "3.0.0.0".parse::<PackageVersion>().unwrap()
        );
    }

    #[test]
    fn candidate_whitespace_is_trimmed() {
        assert!(is_newer("1.0.0.0", " 1.0.0.1 ").unwrap());
        assert!(is_newer("1.0.0.0", "\n\t1.0.0.1\r\n").unwrap());
    }

    #[test]
    fn rejects_non_numeric_components() {
        for bad in ["", "1..2", "1.a.0", "-1.0", "+1.0", "1.0.", "1.0 .0"] {
            assert_eq!(
                is_newer("1.0.0.0", bad),
                Err(MalformedVersion(bad.trim().to_string())),
                "candidate {bad:?}"
            );
        }
        assert!(is_newer("v1.0", "1.0").is_err());
        assert!(is_newer("1.0", "99999999999999999999999").is_err());
    }

    #[test]
    fn display_preserves_arity() {
        let version: PackageVersion = "10.0.19041".parse().unwrap();
        assert_eq!(version.to_string(), "10.0.19041");
        assert_eq!(version.components(), &[10, 0, 19041]);
    }
}
