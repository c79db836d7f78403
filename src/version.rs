//! Release label resolution.
//!
//! A release label such as `emr-5.26.0` is mapped onto the closest supported
//! release at or below it, clamped to the ends of the table.

use std::sync::LazyLock;

use regex::Regex;
use semver::Version;

use crate::error::{EmrError, Result};

/// Supported releases and the runtime version each ships, ascending.
const SUPPORTED_RELEASES: &[(&str, &str)] = &[
    ("5.0.0", "2.0.0"),
    ("5.0.3", "2.0.1"),
    ("5.2.0", "2.0.2"),
    ("5.3.0", "2.1.0"),
    ("5.6.0", "2.1.1"),
    ("5.8.0", "2.2.0"),
    ("5.11.0", "2.2.1"),
    ("5.13.0", "2.3.0"),
    ("5.16.0", "2.3.1"),
    ("5.18.0", "2.3.2"),
    ("5.20.0", "2.4.0"),
    ("5.24.0", "2.4.2"),
    ("5.25.0", "2.4.3"),
    ("5.27.0", "2.4.4"),
    ("6.0.0", "2.4.5"),
];

static RELEASE_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"emr-(\d+\.\d+\.\d+)").expect("release label pattern is valid")
});

const RELEASE_DOCS: &str =
    "https://docs.aws.amazon.com/emr/latest/ReleaseGuide/emr-release-components.html";

/// A supported release together with the runtime it maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupportedRelease {
    pub release: &'static str,
    pub spark: &'static str,
}

/// Extract the semantic version embedded in a release label.
pub fn parse_release_label(label: &str) -> Result<Version> {
    let invalid = || {
        EmrError::Validation(format!(
            "{} is not a valid emr release label. See {} for more info",
            label, RELEASE_DOCS
        ))
    };
    let captures = RELEASE_LABEL.captures(label).ok_or_else(invalid)?;
    Version::parse(&captures[1]).map_err(|_| invalid())
}

/// Resolve a release label to the supported release at or below it.
///
/// Labels below the first entry resolve to the first entry and labels above
/// the last entry resolve to the last.
pub fn resolve(label: &str) -> Result<SupportedRelease> {
    let requested = parse_release_label(label)?;

    let mut resolved = SUPPORTED_RELEASES[0];
    for entry in SUPPORTED_RELEASES {
        // Table entries are literals and always parse
        let version = Version::parse(entry.0).map_err(|e| EmrError::Internal(e.to_string()))?;
        if version > requested {
            break;
        }
        resolved = *entry;
    }

    let (release, spark) = resolved;
    tracing::debug!(label, release, spark, "Resolved release label");
    Ok(SupportedRelease { release, spark })
}

/// Runtime version for a release label.
pub fn spark_version(label: &str) -> Result<&'static str> {
    resolve(label).map(|r| r.spark)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_between_entries_to_lower() {
        assert_eq!(resolve("emr-5.26.0").unwrap().release, "5.25.0");
        assert_eq!(resolve("emr-5.1.0").unwrap().release, "5.0.3");
    }

    #[test]
    fn clamps_to_table_ends() {
        assert_eq!(resolve("emr-0.0.0").unwrap().release, "5.0.0");
        assert_eq!(resolve("emr-7.0.0").unwrap().release, "6.0.0");
    }

    #[test]
    fn exact_match_resolves_to_itself() {
        for (release, spark) in SUPPORTED_RELEASES {
            let resolved = resolve(&format!("emr-{}", release)).unwrap();
            assert_eq!(resolved.release, *release);
            assert_eq!(resolved.spark, *spark);
        }
    }

    #[test]
    fn spark_version_for_label() {
        assert_eq!(spark_version("emr-5.28.1").unwrap(), "2.4.4");
        assert_eq!(spark_version("emr-6.0.0").unwrap(), "2.4.5");
    }

    #[test]
    fn invalid_label_is_validation_error() {
        for label in ["5.26.0", "emr-5.26", "emr-latest", ""] {
            assert!(matches!(resolve(label), Err(EmrError::Validation(_))), "{}", label);
        }
    }

    #[test]
    fn resolution_is_monotonic() {
        let labels: Vec<String> = (0..8)
            .flat_map(|major| (0..30).map(move |minor| format!("emr-{}.{}.0", major, minor)))
            .collect();
        let resolved: Vec<Version> = labels
            .iter()
            .map(|l| Version::parse(resolve(l).unwrap().release).unwrap())
            .collect();
        assert!(resolved.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn table_is_sorted() {
        let versions: Vec<Version> = SUPPORTED_RELEASES
            .iter()
            .map(|(r, _)| Version::parse(r).unwrap())
            .collect();
        assert!(versions.windows(2).all(|w| w[0] < w[1]));
    }
}
