//! Version derivation for a single build.
//!
//! The external version calculator hands over a [`BuildVersionInfo`] record
//! (numeric triple, branch, commit and the commit count since the version
//! anchor). [`VersionComponents::try_from`] validates it into a shape where the
//! "pre-release label present iff not a release build" rule is carried by the
//! type, and [`derive`] turns that into every version string downstream build,
//! packaging and publishing tools consume.
//!
//! # Example
//!
//! ```
//! use release_flow_version::version::{
//!     BuildVersionInfo,
//!     VersionComponents,
//!     derive,
//! };
//!
//! let info: BuildVersionInfo = serde_json::from_str(
//!     r#"{
//!         "major": 1, "minor": 2, "patch": 3,
//!         "preReleaseLabel": "feature-test-stuff",
//!         "sha": "3b8a8098a534380da8a61a1ecb56b570cb52a20a",
//!         "buildType": "working-branch",
//!         "branchName": "feature/test-stuff",
//!         "commitDate": "2020-02-07T15:52:51Z",
//!         "commitsSinceVersionSource": 4,
//!         "versionSourceSha": "b4220df81906afc0e804ab133ab5d825502a26ed"
//!     }"#,
//! )?;
//! let components = VersionComponents::try_from(info)?;
//! let derived = derive(&components);
//!
//! assert_eq!(derived.sem_ver, "1.2.3-feature-test-stuff.4");
//! assert_eq!(derived.nuget_version, "1.2.3-feature-test-stuff0004");
//! # Ok::<(), anyhow::Error>(())
//! ```

use std::sync::LazyLock;

use anyhow::Result;
use chrono::{
    DateTime,
    SecondsFormat,
    Utc,
};
use regex::Regex;
use serde::Deserialize;

/// Build type reported by the calculator for release builds.
pub const RELEASE_BUILD_TYPE: &str = "release";

/// Width `CommitsSinceVersionSourcePadded` is zero-padded to.
pub const COMMITS_PAD_WIDTH: usize = 4;

/// Number of leading sha characters in `ShortSha`.
pub const SHORT_SHA_LEN: usize = 7;

static NON_BRANCH_TOKEN_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9-]").expect("branch token pattern is valid"));

/// Version record as produced by the external version calculator.
///
/// Field names follow the calculator's camelCase JSON. Convenience fields the
/// calculator may also send (`shortSha`, `majorMinor`, ...) are ignored and
/// recomputed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildVersionInfo {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    #[serde(default)]
    pub pre_release_label: Option<String>,
    pub sha: String,
    pub build_type: String,
    pub branch_name: String,
    pub commit_date: DateTime<Utc>,
    pub commits_since_version_source: u32,
    pub version_source_sha: String,
}

/// Release builds carry no pre-release data; every other build type carries a
/// label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildKind {
    Release,
    PreRelease { build_type: String, label: String },
}

impl BuildKind {
    /// The build type as reported by the calculator.
    pub fn build_type(&self) -> &str {
        match self {
            BuildKind::Release => RELEASE_BUILD_TYPE,
            BuildKind::PreRelease { build_type, .. } => build_type,
        }
    }

    /// The pre-release label, `None` for release builds.
    pub fn label(&self) -> Option<&str> {
        match self {
            BuildKind::Release => None,
            BuildKind::PreRelease { label, .. } => Some(label),
        }
    }
}

/// Validated version inputs for one derivation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionComponents {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub kind: BuildKind,
    pub branch_name: String,
    pub sha: String,
    pub version_source_sha: String,
    pub commit_date: DateTime<Utc>,
    pub commits_since_version_source: u32,
}

impl VersionComponents {
    /// `{major}.{minor}`
    pub fn major_minor(&self) -> String {
        format!("{}.{}", self.major, self.minor)
    }

    /// `{major}.{minor}.{patch}`
    pub fn major_minor_patch(&self) -> String {
        format!("{}.{}.{}", self.major, self.minor, self.patch)
    }

    pub fn short_sha(&self) -> &str {
        short_sha(&self.sha)
    }
}

impl TryFrom<BuildVersionInfo> for VersionComponents {
    type Error = anyhow::Error;

    /// Rejects records that break the label/build-type pairing instead of
    /// guessing which of the two fields is wrong.
    fn try_from(info: BuildVersionInfo) -> Result<Self> {
        let label = info.pre_release_label.filter(|label| !label.is_empty());

        let is_release = info.build_type == RELEASE_BUILD_TYPE;

        let kind = match (is_release, label) {
            (true, None) => BuildKind::Release,
            (true, Some(label)) => anyhow::bail!(
                "Release build must not carry a pre-release label, got '{}'",
                label
            ),
            (false, None) => anyhow::bail!(
                "Build type '{}' requires a pre-release label, none was supplied",
                info.build_type
            ),
            (false, Some(label)) => BuildKind::PreRelease {
                build_type: info.build_type,
                label,
            },
        };

        Ok(Self {
            major: info.major,
            minor: info.minor,
            patch: info.patch,
            kind,
            branch_name: info.branch_name,
            sha: info.sha,
            version_source_sha: info.version_source_sha,
            commit_date: info.commit_date,
            commits_since_version_source: info.commits_since_version_source,
        })
    }
}

/// Every string handed to the pipeline for one build.
///
/// Pre-release-only fields are empty strings for release builds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedVersion {
    pub major: String,
    pub minor: String,
    pub patch: String,
    pub major_minor: String,
    pub major_minor_patch: String,
    pub branch_name: String,
    pub escaped_branch_name: String,
    pub build_type: String,
    pub pre_release_label: String,
    pub sha: String,
    pub short_sha: String,
    pub commit_date: String,
    pub commits_since_version_source: String,
    pub version_source_sha: String,
    pub commits_since_version_source_padded: String,
    pub pre_release_tag: String,
    pub pre_release_tag_with_dash: String,
    pub pre_release_number: String,
    pub full_build_meta_data: String,
    pub sem_ver: String,
    pub legacy_sem_ver: String,
    pub assembly_sem_ver: String,
    pub assembly_sem_file_ver: String,
    pub informational_version: String,
    pub nuget_version: String,
    pub nuget_pre_release_tag: String,
}

impl DerivedVersion {
    /// Output variables in emission order, keyed by their pipeline names.
    pub fn variables(&self) -> [(&'static str, &str); 26] {
        [
            ("Major", self.major.as_str()),
            ("Minor", self.minor.as_str()),
            ("Patch", self.patch.as_str()),
            ("MajorMinor", self.major_minor.as_str()),
            ("MajorMinorPatch", self.major_minor_patch.as_str()),
            ("BranchName", self.branch_name.as_str()),
            ("EscapedBranchName", self.escaped_branch_name.as_str()),
            ("BuildType", self.build_type.as_str()),
            ("PreReleaseLabel", self.pre_release_label.as_str()),
            ("Sha", self.sha.as_str()),
            ("ShortSha", self.short_sha.as_str()),
            ("CommitDate", self.commit_date.as_str()),
            ("CommitsSinceVersionSource", self.commits_since_version_source.as_str()),
            ("VersionSourceSha", self.version_source_sha.as_str()),
            (
                "CommitsSinceVersionSourcePadded",
                self.commits_since_version_source_padded.as_str(),
            ),
            ("PreReleaseTag", self.pre_release_tag.as_str()),
            ("PreReleaseTagWithDash", self.pre_release_tag_with_dash.as_str()),
            ("PreReleaseNumber", self.pre_release_number.as_str()),
            ("FullBuildMetaData", self.full_build_meta_data.as_str()),
            ("SemVer", self.sem_ver.as_str()),
            ("LegacySemVer", self.legacy_sem_ver.as_str()),
            ("AssemblySemVer", self.assembly_sem_ver.as_str()),
            ("AssemblySemFileVer", self.assembly_sem_file_ver.as_str()),
            ("InformationalVersion", self.informational_version.as_str()),
            ("NuGetVersion", self.nuget_version.as_str()),
            ("NuGetPreReleaseTag", self.nuget_pre_release_tag.as_str()),
        ]
    }
}

/// Derive every version string for `info`.
///
/// Semantic versions use a dotted pre-release (`1.2.3-label.4`). The legacy
/// and NuGet forms drop the dot because their grammars do not allow it, the
/// NuGet form also zero-pads the number so it sorts lexically. Assembly
/// versions are purely numeric and never carry the pre-release part.
pub fn derive(info: &VersionComponents) -> DerivedVersion {
    let major_minor = info.major_minor();
    let major_minor_patch = info.major_minor_patch();
    let commits_padded = pad_commit_count(info.commits_since_version_source);
    let full_build_meta_data = format!("Branch.{}.Sha.{}", info.branch_name, info.sha);

    let (pre_release_number, pre_release_tag, legacy_suffix, nuget_pre_release_tag) =
        match &info.kind {
            BuildKind::Release => (String::new(), String::new(), String::new(), String::new()),
            BuildKind::PreRelease { label, .. } => {
                let number = info.commits_since_version_source.to_string();
                (
                    number.clone(),
                    format!("{}.{}", label, number),
                    format!("-{}{}", label, number),
                    format!("{}{}", label, commits_padded),
                )
            }
        };

    let pre_release_tag_with_dash = with_dash(&pre_release_tag);
    let sem_ver = format!("{}{}", major_minor_patch, pre_release_tag_with_dash);

    DerivedVersion {
        major: info.major.to_string(),
        minor: info.minor.to_string(),
        patch: info.patch.to_string(),
        branch_name: info.branch_name.clone(),
        escaped_branch_name: escape_branch_name(&info.branch_name),
        build_type: info.kind.build_type().to_string(),
        pre_release_label: info.kind.label().unwrap_or_default().to_string(),
        sha: info.sha.clone(),
        short_sha: info.short_sha().to_string(),
        commit_date: format_commit_date(&info.commit_date),
        commits_since_version_source: info.commits_since_version_source.to_string(),
        version_source_sha: info.version_source_sha.clone(),
        commits_since_version_source_padded: commits_padded,
        pre_release_tag,
        pre_release_tag_with_dash,
        pre_release_number,
        informational_version: format!("{}+{}", sem_ver, full_build_meta_data),
        full_build_meta_data,
        legacy_sem_ver: format!("{}{}", major_minor_patch, legacy_suffix),
        assembly_sem_ver: format!("{}.0.0", major_minor),
        assembly_sem_file_ver: format!("{}.0", major_minor_patch),
        nuget_version: format!("{}{}", major_minor_patch, with_dash(&nuget_pre_release_tag)),
        nuget_pre_release_tag,
        sem_ver,
        major_minor,
        major_minor_patch,
    }
}

/// Replace every character outside `[A-Za-z0-9-]` with `-`.
pub fn escape_branch_name(branch_name: &str) -> String {
    NON_BRANCH_TOKEN_CHARS
        .replace_all(branch_name, "-")
        .into_owned()
}

/// Zero-pad to [`COMMITS_PAD_WIDTH`]; wider counts are emitted unpadded.
pub fn pad_commit_count(count: u32) -> String {
    format!("{:0width$}", count, width = COMMITS_PAD_WIDTH)
}

/// First [`SHORT_SHA_LEN`] characters of `sha`, or all of it when shorter.
pub fn short_sha(sha: &str) -> &str {
    sha.get(..SHORT_SHA_LEN).unwrap_or(sha)
}

/// UTC timestamp with millisecond precision, e.g. `2020-02-07T15:52:51.000Z`.
pub fn format_commit_date(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn with_dash(tag: &str) -> String {
    if tag.is_empty() {
        String::new()
    } else {
        format!("-{}", tag)
    }
}
