//! Monotonic identity for a packaged extension and its build tasks.
//!
//! The publishing host keeps every uploaded task version and always runs the
//! numerically highest one. A republish of the same `major.minor.patch` must
//! therefore produce a strictly larger task patch, so the version components
//! are packed into one integer with fixed decimal weights:
//!
//! ```text
//! base        = major * 10000 + minor * 100 + patch
//! pre-release = base * 10000 + preReleaseNumber * 100 + buildCounter
//! release     = base * 100 + buildCounter
//! ```
//!
//! The weights are part of the published contract. Changing them breaks the
//! ordering against every version already uploaded, so components are range
//! checked instead of being allowed to spill into their neighbour.

use std::fmt;
use std::sync::LazyLock;

use anyhow::Result;
use clap::ValueEnum;
use regex::Regex;
use serde::{
    Deserialize,
    Serialize,
};
use serde_json::{
    Map,
    Value,
};

/// Exclusive upper bound for every component packed into two decimal digits.
pub const COMPONENT_LIMIT: u32 = 100;

/// Weight of `major` in the base, and of the base in a pre-release patch.
pub const MAJOR_WEIGHT: u64 = 10_000;

/// Weight of `minor` in the base, and of the base in a release patch.
pub const MINOR_WEIGHT: u64 = 100;

/// Weight of the pre-release number in the fourth manifest version component.
pub const MANIFEST_PRE_RELEASE_WEIGHT: u64 = 1_000;

/// Gallery flag marking a pre-release extension.
pub const PREVIEW_FLAG: &str = "Preview";

static NON_EXTENSION_ID_CHARS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[^A-Za-z0-9_-]").expect("extension id pattern is valid")
});

/// Build type of a packaging run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum BuildType {
    /// Developer build, published privately.
    #[default]
    Local,
    /// Beta build, published publicly as a preview.
    Beta,
    /// Release build.
    Release,
}

impl fmt::Display for BuildType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildType::Local => write!(f, "local"),
            BuildType::Beta => write!(f, "beta"),
            BuildType::Release => write!(f, "release"),
        }
    }
}

/// Whether a packaging run produces a release or a numbered pre-release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseChannel {
    Release,
    PreRelease { label: String, number: u32 },
}

/// Validated inputs of a packaging run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityInputs {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub build_type: BuildType,
    pub channel: ReleaseChannel,
    pub build_counter: u32,
}

impl IdentityInputs {
    /// Validate packaging inputs.
    ///
    /// A non-empty `pre_release_label` makes the run a pre-release. A label on
    /// a `release` build type is rejected, as is any component that would not
    /// fit its two decimal digits.
    pub fn new(
        (major, minor, patch): (u32, u32, u32),
        build_type: BuildType,
        pre_release_label: Option<&str>,
        pre_release_number: u32,
        build_counter: u32,
    ) -> Result<Self> {
        check_width("minor", minor)?;
        check_width("patch", patch)?;
        check_width("build counter", build_counter)?;

        let channel = match pre_release_label.filter(|label| !label.is_empty()) {
            None => ReleaseChannel::Release,
            Some(label) if build_type == BuildType::Release => anyhow::bail!(
                "Release builds cannot carry a pre-release label, got '{}'",
                label
            ),
            Some(label) => {
                check_width("pre-release number", pre_release_number)?;
                ReleaseChannel::PreRelease {
                    label: label.to_string(),
                    number: pre_release_number,
                }
            }
        };

        Ok(Self {
            major,
            minor,
            patch,
            build_type,
            channel,
            build_counter,
        })
    }

    pub fn is_pre_release(&self) -> bool {
        matches!(self.channel, ReleaseChannel::PreRelease { .. })
    }
}

fn check_width(field: &str, value: u32) -> Result<()> {
    if value >= COMPONENT_LIMIT {
        anyhow::bail!(
            "{} must be below {} to keep task versions ordered, got {}",
            field,
            COMPONENT_LIMIT,
            value
        );
    }
    Ok(())
}

/// `major * 10000 + minor * 100 + patch`
pub fn base_weight(major: u32, minor: u32, patch: u32) -> u64 {
    u64::from(major) * MAJOR_WEIGHT + u64::from(minor) * MINOR_WEIGHT + u64::from(patch)
}

/// Task patch for `inputs`, strictly increasing in the build counter and, for
/// pre-releases, in the pre-release number.
pub fn task_patch(inputs: &IdentityInputs) -> u64 {
    let base = base_weight(inputs.major, inputs.minor, inputs.patch);
    let counter = u64::from(inputs.build_counter);
    match &inputs.channel {
        ReleaseChannel::Release => base * MINOR_WEIGHT + counter,
        ReleaseChannel::PreRelease { number, .. } => {
            base * MAJOR_WEIGHT + u64::from(*number) * MINOR_WEIGHT + counter
        }
    }
}

/// Suffix appended to the extension id and name of a pre-release.
///
/// `beta` is tied to the major/minor line so each beta line gets its own
/// extension; other labels are reduced to characters extension ids accept.
pub fn extension_suffix(label: &str, major: u32, minor: u32) -> String {
    match label {
        "beta" => format!("{}-{}-beta", major, minor),
        other => NON_EXTENSION_ID_CHARS.replace_all(other, "_").into_owned(),
    }
}

/// Identity assigned to one packaging run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskIdentity {
    pub major: u32,
    pub minor: u32,
    /// Extension manifest version; pre-releases carry a fourth component.
    pub manifest_version: String,
    /// Id/name suffix, only for pre-releases.
    pub suffix: Option<String>,
    pub task_patch: u64,
    pub public: bool,
}

impl TaskIdentity {
    pub fn new(inputs: &IdentityInputs) -> Self {
        let base_version = format!("{}.{}.{}", inputs.major, inputs.minor, inputs.patch);

        let (manifest_version, suffix, public) = match &inputs.channel {
            ReleaseChannel::Release => (base_version, None, true),
            ReleaseChannel::PreRelease { label, number } => {
                let build = u64::from(*number) * MANIFEST_PRE_RELEASE_WEIGHT
                    + u64::from(inputs.build_counter);
                (
                    format!("{}.{}", base_version, build),
                    Some(extension_suffix(label, inputs.major, inputs.minor)),
                    inputs.build_type == BuildType::Beta,
                )
            }
        };

        Self {
            major: inputs.major,
            minor: inputs.minor,
            manifest_version,
            suffix,
            task_patch: task_patch(inputs),
            public,
        }
    }
}

/// Extension manifest (`vss-extension.json`).
///
/// Only the fields the stamp touches are typed; everything else is carried
/// through unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionManifest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub publisher: String,
    #[serde(default)]
    pub public: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gallery_flags: Option<Vec<String>>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl ExtensionManifest {
    /// Stamp `identity` into the manifest.
    ///
    /// Expects the unstamped source manifest: the pre-release suffix is
    /// always appended to `id` and `name`, so stamping an already stamped
    /// manifest appends it twice.
    pub fn apply(&mut self, identity: &TaskIdentity, publisher: &str) {
        self.version = identity.manifest_version.clone();
        self.publisher = publisher.to_string();
        self.public = identity.public;

        let Some(suffix) = &identity.suffix else {
            return;
        };

        self.id = format!("{}-{}", self.id, suffix);
        self.name = format!("{} ({})", self.name, suffix);

        let flags = self.gallery_flags.get_or_insert_with(Vec::new);
        if !flags.iter().any(|flag| flag == PREVIEW_FLAG) {
            flags.push(PREVIEW_FLAG.to_string());
        }
    }
}

/// Version block of a task manifest (`task.json`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TaskVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

/// Task manifest (`task.json`), typed only as far as its version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskManifest {
    #[serde(default)]
    pub version: TaskVersion,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl TaskManifest {
    pub fn apply(&mut self, identity: &TaskIdentity) {
        self.version = TaskVersion {
            major: u64::from(identity.major),
            minor: u64::from(identity.minor),
            patch: identity.task_patch,
        };
    }
}
