//! Job-name rule set and variant classifier.
//!
//! Classification runs in three passes over an immutable job name:
//! name-derived rules, then caller overrides for anything still unresolved,
//! then per-dimension defaults.

use std::collections::BTreeMap;

use regex::Regex;
use tracing::debug;
use vreg_core::{Dimension, ReleaseVersion, VariantMap, DEFAULT_VALUE};

pub const CRATE_NAME: &str = "vreg-classifier";

/// Releases before this one default to the sdn network plugin.
pub const OVN_DEFAULT_SINCE: ReleaseVersion = ReleaseVersion::new(4, 12);

/// Cluster metadata keys that can appear in a variants file but are never variants.
pub const IGNORED_OVERRIDE_KEYS: &[&str] = &[
    "CloudRegion",
    "CloudZone",
    "ClusterVersionHistory",
    "MasterNodesUpdated",
];

/// Derives a variant map for a job from its name plus externally supplied overrides.
///
/// Implementations must be total and deterministic.
pub trait VariantClassifier: Send + Sync {
    fn classify(&self, job_name: &str, overrides: &BTreeMap<String, String>) -> VariantMap;
}

#[derive(Debug, Clone, Copy)]
enum Pattern {
    /// `-`-delimited alternatives, e.g. `"arm64|arm"` matches `-arm64-` or a trailing `-arm`.
    Token(&'static str),
    /// A raw regex, used where a rule is a prefix rather than a whole token.
    Raw(&'static str),
}

impl Pattern {
    fn compile(self) -> Regex {
        let source = match self {
            Pattern::Token(alternatives) => format!("(?i)(?:^|-)(?:{alternatives})(?:-|$)"),
            Pattern::Raw(raw) => format!("(?i){raw}"),
        };
        Regex::new(&source).expect("built-in rule patterns are valid regexes")
    }
}

/// Ordered (dimension, value, pattern) table. Within a dimension the first match wins.
const NAME_RULES: &[(Dimension, &str, Pattern)] = &[
    (Dimension::Architecture, "arm64", Pattern::Token("arm64|arm|aarch64|multi-a-a")),
    (Dimension::Architecture, "ppc64le", Pattern::Token("ppc64le|multi-p-p")),
    (Dimension::Architecture, "s390x", Pattern::Token("s390x|multi-z-z")),
    (Dimension::Architecture, "heterogeneous", Pattern::Raw("(?:^|-)heterogeneous(?:-|$)|-multi-")),
    (Dimension::Architecture, "amd64", Pattern::Token("amd64|x86|x86_64")),
    (Dimension::Installer, "hypershift", Pattern::Token("hypershift|hcp")),
    (Dimension::Installer, "rosa", Pattern::Token("rosa")),
    (Dimension::Installer, "assisted", Pattern::Token("assisted")),
    (Dimension::Installer, "upi", Pattern::Token("upi")),
    (Dimension::Platform, "rosa", Pattern::Token("rosa")),
    (Dimension::Platform, "alibaba", Pattern::Token("alibaba")),
    (Dimension::Platform, "aws", Pattern::Token("aws")),
    (Dimension::Platform, "azure", Pattern::Token("azure")),
    (Dimension::Platform, "gcp", Pattern::Token("gcp")),
    (Dimension::Platform, "libvirt", Pattern::Token("libvirt")),
    (Dimension::Platform, "metal", Pattern::Token("metal|baremetal|baremetalds")),
    (Dimension::Platform, "nutanix", Pattern::Token("nutanix")),
    (Dimension::Platform, "openstack", Pattern::Token("openstack")),
    (Dimension::Platform, "ovirt", Pattern::Token("ovirt")),
    (Dimension::Platform, "vsphere", Pattern::Token("vsphere")),
    (Dimension::Network, "ovn", Pattern::Token("ovn")),
    (Dimension::Network, "sdn", Pattern::Token("sdn")),
    (Dimension::NetworkStack, "dual", Pattern::Token("dualstack|dual")),
    (Dimension::NetworkStack, "ipv6", Pattern::Token("ipv6")),
    (Dimension::NetworkStack, "ipv4", Pattern::Token("ipv4")),
    (Dimension::NetworkAccess, "proxy", Pattern::Token("proxy")),
    (Dimension::NetworkAccess, "disconnected", Pattern::Token("disconnected")),
    (Dimension::Owner, "perfscale", Pattern::Token("perfscale")),
    (Dimension::Owner, "cnf", Pattern::Token("telco5g|cnf")),
    (Dimension::Owner, "service-delivery", Pattern::Token("osde2e")),
    (Dimension::Topology, "external", Pattern::Token("hypershift|hcp")),
    (Dimension::Topology, "single", Pattern::Token("single-node")),
    (Dimension::Topology, "compact", Pattern::Token("compact")),
    (Dimension::Suite, "serial", Pattern::Token("serial")),
    (Dimension::Suite, "parallel", Pattern::Token("parallel|conformance")),
    (Dimension::SecurityMode, "fips", Pattern::Token("fips")),
    (Dimension::ContainerRuntime, "crun", Pattern::Token("crun")),
    (Dimension::CGroupMode, "v1", Pattern::Token("cgroupsv1")),
];

/// Fallback values applied after overrides. Dimensions missing here (releases,
/// platform, network) are either derived or legitimately absent.
const DEFAULTS: &[(Dimension, &str)] = &[
    (Dimension::Architecture, "amd64"),
    (Dimension::Installer, "ipi"),
    (Dimension::NetworkStack, "ipv4"),
    (Dimension::NetworkAccess, DEFAULT_VALUE),
    (Dimension::Owner, "eng"),
    (Dimension::Topology, "ha"),
    (Dimension::Suite, "unknown"),
    (Dimension::Upgrade, "none"),
    (Dimension::Aggregation, "none"),
    (Dimension::SecurityMode, DEFAULT_VALUE),
    (Dimension::FeatureSet, DEFAULT_VALUE),
    (Dimension::Scheduler, DEFAULT_VALUE),
    (Dimension::ContainerRuntime, "runc"),
    (Dimension::CGroupMode, "v2"),
];

/// A single compiled name rule.
#[derive(Debug, Clone)]
pub struct NameRule {
    pub dimension: Dimension,
    pub value: &'static str,
    pattern: Regex,
}

impl NameRule {
    pub fn matches(&self, job_name: &str) -> bool {
        self.pattern.is_match(job_name)
    }
}

/// Compiled rule set. Build once and reuse; matching never allocates regexes.
#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: Vec<NameRule>,
    upgrade: Regex,
    upgrade_out_of_change: Regex,
}

impl RuleSet {
    pub fn builtin() -> Self {
        let rules = NAME_RULES
            .iter()
            .map(|&(dimension, value, pattern)| NameRule {
                dimension,
                value,
                pattern: pattern.compile(),
            })
            .collect();
        Self {
            rules,
            upgrade: Pattern::Token("upgrade").compile(),
            upgrade_out_of_change: Pattern::Token("upgrade-out-of-change").compile(),
        }
    }

    pub fn rules(&self) -> &[NameRule] {
        &self.rules
    }

    /// First matching rule value for one dimension, or `None` when the rule set abstains.
    pub fn match_dimension(&self, dimension: Dimension, job_name: &str) -> Option<&'static str> {
        self.rules
            .iter()
            .filter(|rule| rule.dimension == dimension)
            .find(|rule| rule.matches(job_name))
            .map(|rule| rule.value)
    }

    /// Release, from-release and upgrade type as encoded in the job name.
    pub fn release_info(&self, job_name: &str) -> ReleaseInfo {
        let mut releases = release_tokens(job_name);
        releases.sort();
        releases.dedup();

        let (Some(&from), Some(&to)) = (releases.first(), releases.last()) else {
            return ReleaseInfo::default();
        };

        if releases.len() > 1 {
            let upgrade = if releases.len() == 2
                && to.major == from.major
                && to.minor == from.minor + 1
            {
                UpgradeType::Minor
            } else {
                UpgradeType::Multi
            };
            return ReleaseInfo {
                release: Some(to),
                from_release: Some(from),
                upgrade: Some(upgrade),
            };
        }

        if !self.upgrade.is_match(job_name) {
            return ReleaseInfo {
                release: Some(to),
                from_release: None,
                upgrade: None,
            };
        }

        let upgrade = if self.upgrade_out_of_change.is_match(job_name) {
            UpgradeType::MicroDowngrade
        } else {
            UpgradeType::Micro
        };
        ReleaseInfo {
            release: Some(to),
            from_release: Some(to),
            upgrade: Some(upgrade),
        }
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::builtin()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeType {
    Minor,
    Micro,
    MicroDowngrade,
    Multi,
}

impl UpgradeType {
    pub fn as_str(self) -> &'static str {
        match self {
            UpgradeType::Minor => "minor",
            UpgradeType::Micro => "micro",
            UpgradeType::MicroDowngrade => "micro-downgrade",
            UpgradeType::Multi => "multi",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReleaseInfo {
    pub release: Option<ReleaseVersion>,
    pub from_release: Option<ReleaseVersion>,
    pub upgrade: Option<UpgradeType>,
}

fn release_tokens(job_name: &str) -> Vec<ReleaseVersion> {
    job_name.split('-').filter_map(ReleaseVersion::parse).collect()
}

/// OpenShift CI job-name classifier.
#[derive(Debug, Clone, Default)]
pub struct OcpVariantClassifier {
    rules: RuleSet,
}

impl OcpVariantClassifier {
    pub fn new() -> Self {
        Self {
            rules: RuleSet::builtin(),
        }
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    fn name_variants(&self, job_name: &str) -> VariantMap {
        let mut variants = VariantMap::new();

        let info = self.rules.release_info(job_name);
        if let Some(release) = info.release {
            set_release(&mut variants, Dimension::Release, release);
        }
        if let Some(from) = info.from_release {
            set_release(&mut variants, Dimension::FromRelease, from);
        }
        if let Some(upgrade) = info.upgrade {
            insert(&mut variants, Dimension::Upgrade, upgrade.as_str());
        }

        for rule in self.rules.rules() {
            let key = rule.dimension.as_str();
            if !variants.contains_key(key) && rule.matches(job_name) {
                variants.insert(key.to_string(), rule.value.to_string());
            }
        }
        variants
    }
}

impl VariantClassifier for OcpVariantClassifier {
    fn classify(&self, job_name: &str, overrides: &BTreeMap<String, String>) -> VariantMap {
        let mut variants = self.name_variants(job_name);

        for (key, value) in overrides {
            if IGNORED_OVERRIDE_KEYS.contains(&key.as_str()) {
                continue;
            }
            if let Some(resolved) = variants.get(key) {
                if resolved != value {
                    debug!(job = job_name, variant = %key, resolved = %resolved, ignored = %value,
                        "job name overrules variants file");
                }
                continue;
            }
            variants.insert(key.clone(), value.clone());
        }

        fill_release_parts(&mut variants, Dimension::Release);
        fill_release_parts(&mut variants, Dimension::FromRelease);

        if !variants.contains_key(Dimension::Network.as_str()) {
            let release = variants
                .get(Dimension::Release.as_str())
                .and_then(|r| ReleaseVersion::parse(r));
            if let Some(release) = release {
                let network = if release < OVN_DEFAULT_SINCE { "sdn" } else { "ovn" };
                insert(&mut variants, Dimension::Network, network);
            }
        }

        for (dimension, value) in DEFAULTS {
            variants
                .entry(dimension.as_str().to_string())
                .or_insert_with(|| value.to_string());
        }
        variants
    }
}

fn insert(variants: &mut VariantMap, dimension: Dimension, value: &str) {
    variants.insert(dimension.as_str().to_string(), value.to_string());
}

fn release_part_dimensions(dimension: Dimension) -> (Dimension, Dimension) {
    match dimension {
        Dimension::FromRelease => (Dimension::FromReleaseMajor, Dimension::FromReleaseMinor),
        _ => (Dimension::ReleaseMajor, Dimension::ReleaseMinor),
    }
}

fn set_release(variants: &mut VariantMap, dimension: Dimension, release: ReleaseVersion) {
    let (major, minor) = release_part_dimensions(dimension);
    insert(variants, dimension, &release.to_string());
    insert(variants, major, &release.major.to_string());
    insert(variants, minor, &release.minor.to_string());
}

/// Decomposes an override-supplied release that arrived without its major/minor parts.
fn fill_release_parts(variants: &mut VariantMap, dimension: Dimension) {
    let Some(release) = variants
        .get(dimension.as_str())
        .and_then(|r| ReleaseVersion::parse(r))
    else {
        return;
    };
    let (major, minor) = release_part_dimensions(dimension);
    variants
        .entry(major.as_str().to_string())
        .or_insert_with(|| release.major.to_string());
    variants
        .entry(minor.as_str().to_string())
        .or_insert_with(|| release.minor.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(job: &str) -> VariantMap {
        OcpVariantClassifier::new().classify(job, &BTreeMap::new())
    }

    #[test]
    fn every_builtin_pattern_compiles() {
        let rules = RuleSet::builtin();
        assert_eq!(rules.rules().len(), NAME_RULES.len());
    }

    #[test]
    fn tokens_match_only_on_dash_boundaries() {
        let rules = RuleSet::builtin();
        // `osde2e` must not be mistaken for the `osd` family or `-e2e` noise.
        assert_eq!(rules.match_dimension(Dimension::Platform, "periodic-ci-openshift-osde2e-main"), None);
        assert_eq!(rules.match_dimension(Dimension::Installer, "e2e-ovn-powervs-capi-multi-p-p"), None);
        assert_eq!(rules.match_dimension(Dimension::Architecture, "openshift-multiarch-master"), None);
        assert_eq!(rules.match_dimension(Dimension::Platform, "e2e-AWS-ovn"), Some("aws"));
    }

    #[test]
    fn architecture_rules_prefer_specific_arches_over_multi() {
        let rules = RuleSet::builtin();
        assert_eq!(rules.match_dimension(Dimension::Architecture, "e2e-aws-ovn-multi-a-a"), Some("arm64"));
        assert_eq!(rules.match_dimension(Dimension::Architecture, "e2e-ovn-multi-z-z"), Some("s390x"));
        assert_eq!(rules.match_dimension(Dimension::Architecture, "e2e-ovn-multi-p-p"), Some("ppc64le"));
        assert_eq!(rules.match_dimension(Dimension::Architecture, "e2e-aws-ovn-multi-x-ax"), Some("heterogeneous"));
        assert_eq!(rules.match_dimension(Dimension::Architecture, "nightly-x86-payload"), Some("amd64"));
    }

    #[test]
    fn release_info_orders_release_tokens_numerically() {
        let rules = RuleSet::builtin();
        let info = rules.release_info("nightly-4.9-upgrade-from-stable-4.10");
        assert_eq!(info.release, Some(ReleaseVersion::new(4, 10)));
        assert_eq!(info.from_release, Some(ReleaseVersion::new(4, 9)));
        assert_eq!(info.upgrade, Some(UpgradeType::Minor));
    }

    #[test]
    fn two_releases_more_than_one_minor_apart_is_multi() {
        let info = RuleSet::builtin().release_info("ci-4.16-upgrade-from-stable-4.14");
        assert_eq!(info.upgrade, Some(UpgradeType::Multi));
        assert_eq!(info.from_release, Some(ReleaseVersion::new(4, 14)));
    }

    #[test]
    fn repeated_release_token_is_not_an_upgrade() {
        let info = RuleSet::builtin().release_info("release-4.16-periodics-4.16-e2e-aws");
        assert_eq!(info.release, Some(ReleaseVersion::new(4, 16)));
        assert_eq!(info.from_release, None);
        assert_eq!(info.upgrade, None);
    }

    #[test]
    fn classification_is_total_for_garbage_names() {
        let variants = classify("");
        for (dimension, value) in DEFAULTS {
            assert_eq!(variants.get(dimension.as_str()).map(String::as_str), Some(*value));
        }
        assert!(!variants.contains_key("Platform"));
        assert!(!variants.contains_key("Network"));
        assert!(!variants.contains_key("Release"));
    }

    #[test]
    fn override_release_is_decomposed_and_drives_network_default() {
        let overrides = BTreeMap::from([("Release".to_string(), "4.11".to_string())]);
        let variants = OcpVariantClassifier::new().classify("periodic-ci-openshift-e2e-aws", &overrides);
        assert_eq!(variants["Release"], "4.11");
        assert_eq!(variants["ReleaseMajor"], "4");
        assert_eq!(variants["ReleaseMinor"], "11");
        assert_eq!(variants["Network"], "sdn");
    }

    #[test]
    fn override_fills_unresolved_dimension_before_default() {
        let overrides = BTreeMap::from([
            ("Architecture".to_string(), "arm64".to_string()),
            ("FeatureSet".to_string(), "techpreview".to_string()),
        ]);
        let variants = OcpVariantClassifier::new().classify("nightly-4.16-e2e-aws-ovn", &overrides);
        assert_eq!(variants["Architecture"], "arm64");
        assert_eq!(variants["FeatureSet"], "techpreview");
    }

    #[test]
    fn empty_override_value_is_kept_as_a_value() {
        let overrides = BTreeMap::from([("Scheduler".to_string(), String::new())]);
        let variants = OcpVariantClassifier::new().classify("nightly-4.16-e2e-aws", &overrides);
        assert_eq!(variants.get("Scheduler").map(String::as_str), Some(""));
    }

    #[test]
    fn classification_is_deterministic() {
        let job = "periodic-ci-openshift-release-master-nightly-4.16-e2e-aws-ovn-proxy";
        assert_eq!(classify(job), classify(job));
    }
}
