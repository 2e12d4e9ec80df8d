//! Stamp extension and task manifests with a monotonic identity command.
//!
//! This command runs at packaging time. It computes the extension version and
//! the task patch for a build, stamps them into a copy of the extension
//! manifest (`vss-extension.json`) and into any task manifests (`task.json`).
//! Pre-release builds get their own extension id and name so each label
//! publishes as a separate extension.
//!
//! # Examples
//!
//! ```bash
//! # Release build
//! release-flow-version stamp --version 1.2.3 --build-type release --build-counter 4
//!
//! # Beta build, published as a public preview
//! release-flow-version stamp --major 2 --minor 0 --patch 1 \
//!     --build-type beta --pre-release-label beta --pre-release-number 3 \
//!     --task-manifest dist/ReleaseFlowGitVersionV0/task.json
//!
//! # Get JSON output with the computed identity
//! release-flow-version stamp --version 1.2.3 --format json
//! ```

use std::path::PathBuf;

use anyhow::{
    Context,
    Result,
};
use cargo_plugin_utils::logger::Logger;
use clap::Parser;

use super::common::{
    parse_version,
    read_json,
    write_json,
};
use crate::identity::{
    BuildType,
    ExtensionManifest,
    IdentityInputs,
    TaskIdentity,
    TaskManifest,
};

/// Arguments for the `stamp` command.
#[derive(Parser, Debug)]
pub struct StampArgs {
    /// Major version.
    #[arg(long, env = "RELEASE_FLOW_MAJOR", default_value_t = 0)]
    pub major: u32,

    /// Minor version (below 100).
    #[arg(long, env = "RELEASE_FLOW_MINOR", default_value_t = 0)]
    pub minor: u32,

    /// Patch version (below 100).
    #[arg(long, env = "RELEASE_FLOW_PATCH", default_value_t = 0)]
    pub patch: u32,

    /// Numeric version as `X.Y.Z`, instead of `--major/--minor/--patch`.
    #[arg(
        long,
        env = "RELEASE_FLOW_VERSION",
        conflicts_with_all = ["major", "minor", "patch"]
    )]
    pub version: Option<String>,

    /// Per-pipeline build counter (below 100).
    #[arg(long, env = "BUILD_COUNTER", default_value_t = 0)]
    pub build_counter: u32,

    /// Build type.
    #[arg(long, value_enum, env = "RELEASE_FLOW_BUILD_TYPE", default_value = "local")]
    pub build_type: BuildType,

    /// Pre-release sequence number (below 100).
    #[arg(long, env = "RELEASE_FLOW_PRE_RELEASE_NUMBER", default_value_t = 1)]
    pub pre_release_number: u32,

    /// Pre-release label; makes the build a pre-release when non-empty.
    #[arg(long, env = "RELEASE_FLOW_PRE_RELEASE_LABEL")]
    pub pre_release_label: Option<String>,

    /// Marketplace publisher written into the extension manifest.
    #[arg(long, env = "EXTENSION_PUBLISHER", default_value = "local")]
    pub publisher: String,

    /// Unstamped extension manifest to read.
    #[arg(
        long,
        env = "RELEASE_FLOW_EXTENSION_SOURCE",
        default_value = "extension/vss-extension.json"
    )]
    pub extension_source: PathBuf,

    /// Where the stamped extension manifest is written.
    #[arg(
        long,
        env = "RELEASE_FLOW_EXTENSION_MANIFEST",
        default_value = "dist/vss-extension.json"
    )]
    pub extension_manifest: PathBuf,

    /// Path to a packaged task manifest, stamped in place; may be repeated.
    ///
    /// The environment fallback takes a comma-separated list.
    #[arg(long, env = "RELEASE_FLOW_TASK_MANIFEST", value_delimiter = ',')]
    pub task_manifest: Vec<PathBuf>,

    /// Output format for the computed identity.
    ///
    /// - `version`: Print just the extension version
    /// - `json`: Print JSON with version, id suffix, task patch and public
    ///   fields
    #[arg(long, env = "RELEASE_FLOW_STAMP_FORMAT", default_value = "version")]
    pub format: String,
}

/// Compute the build's identity and stamp it into the manifests.
///
/// The extension manifest is read from `--extension-source` and the stamped
/// copy written to `--extension-manifest`, so re-running with the same
/// arguments produces the same output. Task manifests only have their version
/// replaced and are stamped in place. A failure leaves every output file
/// untouched.
///
/// # Errors
///
/// Returns an error if:
/// - `--version` is not a valid `X.Y.Z` version
/// - A component does not fit its two decimal digits (minor, patch, build
///   counter, pre-release number must be below 100)
/// - A pre-release label is given for a `release` build
/// - A manifest cannot be read, parsed or written
///
/// # Examples
///
/// ```no_run
/// use release_flow_version::commands::{
///     StampArgs,
///     stamp,
/// };
/// use release_flow_version::identity::BuildType;
///
/// let args = StampArgs {
///     major: 2,
///     minor: 0,
///     patch: 1,
///     version: None,
///     build_counter: 12,
///     build_type: BuildType::Beta,
///     pre_release_number: 3,
///     pre_release_label: Some("beta".to_string()),
///     publisher: "release-flow".to_string(),
///     extension_source: "extension/vss-extension.json".into(),
///     extension_manifest: "dist/vss-extension.json".into(),
///     task_manifest: vec!["dist/ReleaseFlowGitVersionV0/task.json".into()],
///     format: "version".to_string(),
/// };
/// stamp(args)?;
/// # Ok::<(), anyhow::Error>(())
/// ```
///
/// # Example Output
///
/// With `--format version`:
/// ```text
/// 2.0.1.3012
/// ```
///
/// With `--format json`:
/// ```json
/// {"version":"2.0.1.3012","suffix":"2-0-beta","taskPatch":200010312,"public":true}
/// ```
pub fn stamp(args: StampArgs) -> Result<()> {
    if !matches!(args.format.as_str(), "version" | "json") {
        anyhow::bail!("Invalid format: {}", args.format);
    }

    let mut logger = Logger::new();

    logger.status("Calculating", "task identity");
    let triple = match &args.version {
        Some(version) => parse_version(version)?,
        None => (args.major, args.minor, args.patch),
    };
    let inputs = IdentityInputs::new(
        triple,
        args.build_type,
        args.pre_release_label.as_deref(),
        args.pre_release_number,
        args.build_counter,
    )?;
    let identity = TaskIdentity::new(&inputs);

    logger.status("Reading", &args.extension_source.display().to_string());
    let mut manifest: ExtensionManifest = read_json(&args.extension_source)?;
    manifest.apply(&identity, &args.publisher);

    let mut tasks = Vec::with_capacity(args.task_manifest.len());
    for path in &args.task_manifest {
        logger.status("Reading", &path.display().to_string());
        let mut task: TaskManifest = read_json(path)?;
        task.apply(&identity);
        tasks.push((path, task));
    }

    // Nothing is written until every manifest has been read and stamped.
    logger.status("Stamping", &args.extension_manifest.display().to_string());
    write_json(&args.extension_manifest, &manifest)?;
    for (path, task) in &tasks {
        logger.status("Stamping", &path.display().to_string());
        write_json(path, task)?;
    }

    logger.finish();

    match args.format.as_str() {
        "version" => println!("{}", identity.manifest_version),
        _ => {
            let json = serde_json::json!({
                "version": identity.manifest_version,
                "suffix": identity.suffix,
                "taskPatch": identity.task_patch,
                "public": identity.public,
            });
            println!(
                "{}",
                serde_json::to_string(&json).context("Failed to serialize identity")?
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use serde_json::Value;
    use tempfile::TempDir;

    use super::*;

    struct Manifests {
        source: PathBuf,
        extension: PathBuf,
        task: PathBuf,
    }

    fn write_manifests(dir: &Path) -> Manifests {
        let source = dir.join("vss-extension.source.json");
        std::fs::write(
            &source,
            r#"{
                "manifestVersion": 1,
                "id": "release-flow",
                "name": "Release Flow",
                "version": "0.0.0",
                "publisher": "nobody",
                "public": false,
                "galleryFlags": ["Public"]
            }"#,
        )
        .unwrap();

        let task = dir.join("task.json");
        std::fs::write(
            &task,
            r#"{
                "id": "9b5f3a2e",
                "name": "ReleaseFlowGitVersion",
                "version": { "Major": 0, "Minor": 0, "Patch": 0 },
                "instanceNameFormat": "Release Flow version"
            }"#,
        )
        .unwrap();

        Manifests {
            source,
            extension: dir.join("vss-extension.json"),
            task,
        }
    }

    fn args(manifests: &Manifests) -> StampArgs {
        StampArgs {
            major: 0,
            minor: 0,
            patch: 0,
            version: None,
            build_counter: 0,
            build_type: BuildType::Local,
            pre_release_number: 1,
            pre_release_label: None,
            publisher: "release-flow-test".to_string(),
            extension_source: manifests.source.clone(),
            extension_manifest: manifests.extension.clone(),
            task_manifest: vec![manifests.task.clone()],
            format: "version".to_string(),
        }
    }

    fn read(path: &Path) -> Value {
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    #[test]
    fn test_stamp_beta_pre_release() {
        let dir = TempDir::new().unwrap();
        let manifests = write_manifests(dir.path());
        let source_before = std::fs::read_to_string(&manifests.source).unwrap();

        let mut args = args(&manifests);
        args.major = 2;
        args.patch = 1;
        args.build_type = BuildType::Beta;
        args.pre_release_label = Some("beta".to_string());
        args.pre_release_number = 3;
        args.build_counter = 12;
        stamp(args).unwrap();

        let manifest = read(&manifests.extension);
        assert_eq!(manifest["version"], "2.0.1.3012");
        assert_eq!(manifest["id"], "release-flow-2-0-beta");
        assert_eq!(manifest["name"], "Release Flow (2-0-beta)");
        assert_eq!(manifest["publisher"], "release-flow-test");
        assert_eq!(manifest["public"], true);
        assert_eq!(manifest["galleryFlags"], serde_json::json!(["Public", "Preview"]));
        assert_eq!(manifest["manifestVersion"], 1);

        let task = read(&manifests.task);
        assert_eq!(
            task["version"],
            serde_json::json!({"Major": 2, "Minor": 0, "Patch": 200010312u64})
        );
        assert_eq!(task["instanceNameFormat"], "Release Flow version");

        assert_eq!(
            std::fs::read_to_string(&manifests.source).unwrap(),
            source_before
        );
    }

    #[test]
    fn test_stamp_release() {
        let dir = TempDir::new().unwrap();
        let manifests = write_manifests(dir.path());

        let mut args = args(&manifests);
        args.version = Some("v1.2.3".to_string());
        args.build_type = BuildType::Release;
        args.build_counter = 4;
        stamp(args).unwrap();

        let manifest = read(&manifests.extension);
        assert_eq!(manifest["version"], "1.2.3");
        assert_eq!(manifest["id"], "release-flow");
        assert_eq!(manifest["public"], true);
        assert_eq!(manifest["galleryFlags"], serde_json::json!(["Public"]));
        assert_eq!(read(&manifests.task)["version"]["Patch"], 1020304);
    }

    #[test]
    fn test_stamp_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let manifests = write_manifests(dir.path());

        let make_args = || {
            let mut args = args(&manifests);
            args.version = Some("1.4.0".to_string());
            args.pre_release_label = Some("feature/login".to_string());
            args.build_counter = 2;
            args
        };

        stamp(make_args()).unwrap();
        let first = std::fs::read_to_string(&manifests.extension).unwrap();
        let first_task = std::fs::read_to_string(&manifests.task).unwrap();
        stamp(make_args()).unwrap();

        assert_eq!(std::fs::read_to_string(&manifests.extension).unwrap(), first);
        assert_eq!(std::fs::read_to_string(&manifests.task).unwrap(), first_task);
        let manifest = read(&manifests.extension);
        assert_eq!(manifest["id"], "release-flow-feature_login");
        assert_eq!(manifest["public"], false);
    }

    #[test]
    fn test_stamp_label_matching_id_tail() {
        let dir = TempDir::new().unwrap();
        let manifests = write_manifests(dir.path());

        let mut args = args(&manifests);
        args.pre_release_label = Some("flow".to_string());
        stamp(args).unwrap();

        let manifest = read(&manifests.extension);
        assert_eq!(manifest["id"], "release-flow-flow");
        assert_eq!(manifest["name"], "Release Flow (flow)");
    }

    #[test]
    fn test_stamp_rejects_out_of_range_counter() {
        let dir = TempDir::new().unwrap();
        let manifests = write_manifests(dir.path());
        let task_before = std::fs::read_to_string(&manifests.task).unwrap();

        let mut args = args(&manifests);
        args.build_counter = 100;
        assert!(stamp(args).is_err());

        assert!(!manifests.extension.exists());
        assert_eq!(std::fs::read_to_string(&manifests.task).unwrap(), task_before);
    }

    #[test]
    fn test_stamp_broken_task_manifest_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let manifests = write_manifests(dir.path());
        std::fs::write(&manifests.extension, r#"{"id":"x","name":"X","version":"0.0.0"}"#)
            .unwrap();
        let extension_before = std::fs::read_to_string(&manifests.extension).unwrap();
        let good_task_before = std::fs::read_to_string(&manifests.task).unwrap();

        let broken = dir.path().join("broken-task.json");
        std::fs::write(&broken, "{ broken").unwrap();

        let mut args = args(&manifests);
        args.task_manifest.push(broken);
        assert!(stamp(args).is_err());

        assert_eq!(
            std::fs::read_to_string(&manifests.extension).unwrap(),
            extension_before
        );
        assert_eq!(
            std::fs::read_to_string(&manifests.task).unwrap(),
            good_task_before
        );
    }

    #[test]
    fn test_stamp_invalid_format() {
        let dir = TempDir::new().unwrap();
        let manifests = write_manifests(dir.path());

        let mut args = args(&manifests);
        args.format = "invalid".to_string();
        assert!(stamp(args).is_err());
    }

    #[test]
    fn test_stamp_missing_manifest() {
        let manifests = Manifests {
            source: "/nonexistent/vss-extension.json".into(),
            extension: "/nonexistent/dist/vss-extension.json".into(),
            task: "/nonexistent/task.json".into(),
        };
        assert!(stamp(args(&manifests)).is_err());
    }

    #[test]
    #[serial_test::serial]
    fn test_stamp_args_from_environment() {
        // SAFETY: serialized with the other environment tests.
        unsafe {
            std::env::set_var("RELEASE_FLOW_VERSION", "3.1.4");
            std::env::set_var("RELEASE_FLOW_TASK_MANIFEST", "a/task.json,b/task.json");
            std::env::set_var("RELEASE_FLOW_STAMP_FORMAT", "json");
        }
        let parsed = StampArgs::try_parse_from(["stamp"]);
        unsafe {
            std::env::remove_var("RELEASE_FLOW_VERSION");
            std::env::remove_var("RELEASE_FLOW_TASK_MANIFEST");
            std::env::remove_var("RELEASE_FLOW_STAMP_FORMAT");
        }

        let args = parsed.unwrap();
        assert_eq!(args.version.as_deref(), Some("3.1.4"));
        assert_eq!(
            args.task_manifest,
            vec![PathBuf::from("a/task.json"), PathBuf::from("b/task.json")]
        );
        assert_eq!(args.format, "json");
        assert_eq!(
            args.extension_source,
            PathBuf::from("extension/vss-extension.json")
        );
    }
}
