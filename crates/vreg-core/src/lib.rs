//! Core domain model for the job variant registry.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "vreg-core";

/// Reserved value meaning "not applicable / not determined". Distinct from an absent key.
pub const DEFAULT_VALUE: &str = "default";

/// Variant name -> value for a single job. Pass-through override keys share the map.
pub type VariantMap = BTreeMap<String, String>;

/// Job name -> variant map, either freshly classified or loaded from the registry.
pub type JobVariantMaps = BTreeMap<String, VariantMap>;

/// Closed set of attribute dimensions the classifier resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Dimension {
    Release,
    ReleaseMajor,
    ReleaseMinor,
    FromRelease,
    FromReleaseMajor,
    FromReleaseMinor,
    Architecture,
    Installer,
    Platform,
    Network,
    NetworkStack,
    NetworkAccess,
    Owner,
    Topology,
    Suite,
    Upgrade,
    Aggregation,
    SecurityMode,
    FeatureSet,
    Scheduler,
    ContainerRuntime,
    CGroupMode,
}

impl Dimension {
    pub const ALL: [Dimension; 22] = [
        Dimension::Release,
        Dimension::ReleaseMajor,
        Dimension::ReleaseMinor,
        Dimension::FromRelease,
        Dimension::FromReleaseMajor,
        Dimension::FromReleaseMinor,
        Dimension::Architecture,
        Dimension::Installer,
        Dimension::Platform,
        Dimension::Network,
        Dimension::NetworkStack,
        Dimension::NetworkAccess,
        Dimension::Owner,
        Dimension::Topology,
        Dimension::Suite,
        Dimension::Upgrade,
        Dimension::Aggregation,
        Dimension::SecurityMode,
        Dimension::FeatureSet,
        Dimension::Scheduler,
        Dimension::ContainerRuntime,
        Dimension::CGroupMode,
    ];

    /// Name stored in the registry's `variant_name` column.
    pub fn as_str(self) -> &'static str {
        match self {
            Dimension::Release => "Release",
            Dimension::ReleaseMajor => "ReleaseMajor",
            Dimension::ReleaseMinor => "ReleaseMinor",
            Dimension::FromRelease => "FromRelease",
            Dimension::FromReleaseMajor => "FromReleaseMajor",
            Dimension::FromReleaseMinor => "FromReleaseMinor",
            Dimension::Architecture => "Architecture",
            Dimension::Installer => "Installer",
            Dimension::Platform => "Platform",
            Dimension::Network => "Network",
            Dimension::NetworkStack => "NetworkStack",
            Dimension::NetworkAccess => "NetworkAccess",
            Dimension::Owner => "Owner",
            Dimension::Topology => "Topology",
            Dimension::Suite => "Suite",
            Dimension::Upgrade => "Upgrade",
            Dimension::Aggregation => "Aggregation",
            Dimension::SecurityMode => "SecurityMode",
            Dimension::FeatureSet => "FeatureSet",
            Dimension::Scheduler => "Scheduler",
            Dimension::ContainerRuntime => "ContainerRuntime",
            Dimension::CGroupMode => "CGroupMode",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown variant dimension: {0}")]
pub struct UnknownDimension(pub String);

impl FromStr for Dimension {
    type Err = UnknownDimension;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Dimension::ALL
            .into_iter()
            .find(|d| d.as_str() == s)
            .ok_or_else(|| UnknownDimension(s.to_string()))
    }
}

/// `major.minor` release version, ordered numerically (4.9 < 4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReleaseVersion {
    pub major: u32,
    pub minor: u32,
}

impl ReleaseVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Parses an exact `major.minor` token; anything else (including `4.16.1`) is rejected.
    pub fn parse(token: &str) -> Option<Self> {
        let (major, minor) = token.split_once('.')?;
        if major.is_empty()
            || minor.is_empty()
            || !major.bytes().all(|b| b.is_ascii_digit())
            || !minor.bytes().all(|b| b.is_ascii_digit())
        {
            return None;
        }
        Some(Self {
            major: major.parse().ok()?,
            minor: minor.parse().ok()?,
        })
    }
}

impl fmt::Display for ReleaseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// One registry row: a single (job, variant) assignment.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobVariant {
    pub job_name: String,
    pub variant_name: String,
    pub variant_value: String,
}

impl JobVariant {
    pub fn new(
        job_name: impl Into<String>,
        variant_name: impl Into<String>,
        variant_value: impl Into<String>,
    ) -> Self {
        Self {
            job_name: job_name.into(),
            variant_name: variant_name.into(),
            variant_value: variant_value.into(),
        }
    }
}

/// Groups registry rows by job. Later rows for the same (job, variant) replace earlier ones.
pub fn group_rows_by_job(rows: impl IntoIterator<Item = JobVariant>) -> JobVariantMaps {
    let mut grouped = JobVariantMaps::new();
    for row in rows {
        grouped
            .entry(row.job_name)
            .or_default()
            .insert(row.variant_name, row.variant_value);
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimension_names_round_trip_through_from_str() {
        for dim in Dimension::ALL {
            assert_eq!(dim.as_str().parse::<Dimension>(), Ok(dim));
        }
        assert!("Region".parse::<Dimension>().is_err());
    }

    #[test]
    fn dimension_serializes_as_registry_name() {
        let json = serde_json::to_string(&Dimension::CGroupMode).expect("serialize");
        assert_eq!(json, "\"CGroupMode\"");
    }

    #[test]
    fn release_versions_order_numerically() {
        let a = ReleaseVersion::parse("4.9").expect("4.9");
        let b = ReleaseVersion::parse("4.10").expect("4.10");
        assert!(a < b);
        assert_eq!(b.to_string(), "4.10");
        assert_eq!(ReleaseVersion::parse("4.16.1"), None);
        assert_eq!(ReleaseVersion::parse("v4.16"), None);
        assert_eq!(ReleaseVersion::parse("4."), None);
    }

    #[test]
    fn rows_group_into_per_job_maps() {
        let grouped = group_rows_by_job(vec![
            JobVariant::new("job-a", "Platform", "aws"),
            JobVariant::new("job-a", "Network", "ovn"),
            JobVariant::new("job-b", "Platform", "gcp"),
        ]);
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped["job-a"].len(), 2);
        assert_eq!(grouped["job-b"]["Platform"], "gcp");
    }
}
