//! Derive pipeline version variables command.
//!
//! Reads the version record produced by the version calculator, derives every
//! version string from it and hands each one to the pipeline as an output
//! variable.
//!
//! # Examples
//!
//! ```bash
//! # Azure Pipelines logging commands (default)
//! release-flow-version derive --version-info version-info.json
//!
//! # Read the record from stdin and also set the build number
//! calculator | release-flow-version derive --version-info - --update-build-number
//!
//! # GitHub Actions
//! release-flow-version derive --version-info version-info.json --format github-actions
//!
//! # Resolve the record against a repository checked out elsewhere
//! release-flow-version derive --repo-root ../checkout --version-info version-info.json
//! ```

use std::io;
use std::path::PathBuf;

use anyhow::{
    Context,
    Result,
};
use cargo_plugin_utils::logger::Logger;
use clap::Parser;

use super::common::{
    WorkingDirGuard,
    read_json,
};
use crate::output::{
    AzurePipelinesSink,
    GithubActionsSink,
    JsonSink,
    OutputFormat,
    VariableSink,
    emit_variables,
};
use crate::version::{
    self,
    BuildVersionInfo,
    VersionComponents,
};

/// Arguments for the `derive` command.
#[derive(Parser, Debug)]
pub struct DeriveArgs {
    /// Path to the version record written by the version calculator.
    ///
    /// Use `-` to read the record from stdin. Relative paths are resolved
    /// against `--repo-root` when one is given.
    #[arg(long, env = "RELEASE_FLOW_VERSION_INFO", default_value = "-")]
    pub version_info: PathBuf,

    /// Repository root to run in.
    ///
    /// When it differs from the current directory the command changes into
    /// it for the duration of the run and changes back afterwards.
    #[arg(long, env = "RELEASE_FLOW_REPO_ROOT")]
    pub repo_root: Option<PathBuf>,

    /// Also set the pipeline build number to the semantic version.
    #[arg(long, env = "UPDATE_BUILD_NUMBER")]
    pub update_build_number: bool,

    /// Where the output variables are sent.
    #[arg(long, value_enum, default_value = "azure-pipelines")]
    pub format: OutputFormat,

    /// Path to GitHub Actions output file.
    ///
    /// Only used with `--format github-actions`; stdout when unset.
    #[arg(long, env = "GITHUB_OUTPUT")]
    pub github_output: Option<PathBuf>,
}

/// Derive every version variable and emit it to the selected output.
///
/// Nothing is emitted unless the record was read and validated, so a failed
/// run never leaves a partial variable set. With the Azure Pipelines output a
/// failure is also reported to the pipeline as a failed task.
///
/// # Errors
///
/// Returns an error if:
/// - The repository root does not exist or cannot be entered
/// - The version record cannot be read or parsed
/// - The record pairs a pre-release label with a release build, or omits the
///   label on any other build
/// - An output variable cannot be written
///
/// # Examples
///
/// ```no_run
/// use release_flow_version::commands::{
///     DeriveArgs,
///     derive,
/// };
/// use release_flow_version::output::OutputFormat;
///
/// let args = DeriveArgs {
///     version_info: "version-info.json".into(),
///     repo_root: None,
///     update_build_number: false,
///     format: OutputFormat::AzurePipelines,
///     github_output: None,
/// };
/// derive(args)?;
/// # Ok::<(), anyhow::Error>(())
/// ```
///
/// # Example Output
///
/// ```text
/// ##vso[task.setvariable variable=Major;isOutput=true;issecret=false;]1
/// ...
/// ##vso[task.setvariable variable=SemVer;isOutput=true;issecret=false;]1.2.3-feature-test-stuff.4
/// ...
/// ```
pub fn derive(args: DeriveArgs) -> Result<()> {
    let format = args.format;
    let result = run(args);

    if let Err(error) = &result
        && format == OutputFormat::AzurePipelines
    {
        AzurePipelinesSink::new(io::stdout()).report_failure(&format!("{:#}", error))?;
    }

    result
}

fn run(args: DeriveArgs) -> Result<()> {
    let mut logger = Logger::new();

    let _guard = match &args.repo_root {
        Some(root) => {
            let guard = WorkingDirGuard::enter(root)?;
            if guard.is_some() {
                logger.status("Using", &format!("repository root {}", root.display()));
            }
            guard
        }
        None => None,
    };

    logger.status("Reading", "version info");
    let info: BuildVersionInfo = read_json(&args.version_info)?;
    let components = VersionComponents::try_from(info)
        .with_context(|| format!("Invalid version info in {}", args.version_info.display()))?;

    logger.status("Deriving", &format!("versions for {}", components.branch_name));
    let derived = version::derive(&components);
    logger.finish();

    let mut sink = open_sink(args.format, args.github_output)?;
    emit_variables(&derived, sink.as_mut(), args.update_build_number, &mut logger)
}

fn open_sink(
    format: OutputFormat,
    github_output: Option<PathBuf>,
) -> Result<Box<dyn VariableSink>> {
    let sink: Box<dyn VariableSink> = match format {
        OutputFormat::AzurePipelines => Box::new(AzurePipelinesSink::new(io::stdout())),
        OutputFormat::GithubActions => match github_output {
            Some(path) => Box::new(GithubActionsSink::append_to(&path)?),
            None => Box::new(GithubActionsSink::new(io::stdout())),
        },
        OutputFormat::Json => Box::new(JsonSink::new(io::stdout())),
    };
    Ok(sink)
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::path::Path;

    use tempfile::TempDir;

    use super::*;

    const PRE_RELEASE: &str = r#"{
        "major": 1,
        "minor": 2,
        "patch": 3,
        "preReleaseLabel": "feature-test-stuff",
        "sha": "3b8a8098a534380da8a61a1ecb56b570cb52a20a",
        "shortSha": "3b8a809",
        "buildType": "working-branch",
        "branchName": "feature/test-stuff",
        "commitDate": "2020-02-07T15:52:51.000Z",
        "commitsSinceVersionSource": 4,
        "versionSourceSha": "b4220df81906afc0e804ab133ab5d825502a26ed"
    }"#;

    const RELEASE_WITH_LABEL: &str = r#"{
        "major": 1,
        "minor": 2,
        "patch": 3,
        "preReleaseLabel": "beta",
        "sha": "3b8a8098a534380da8a61a1ecb56b570cb52a20a",
        "buildType": "release",
        "branchName": "v1.2.3",
        "commitDate": "2020-02-07T15:52:51.000Z",
        "commitsSinceVersionSource": 4,
        "versionSourceSha": "b4220df81906afc0e804ab133ab5d825502a26ed"
    }"#;

    fn write_record(dir: &Path, content: &str) -> PathBuf {
        let path = dir.join("version-info.json");
        std::fs::write(&path, content).unwrap();
        path
    }

    fn args(version_info: PathBuf, format: OutputFormat) -> DeriveArgs {
        DeriveArgs {
            version_info,
            repo_root: None,
            update_build_number: false,
            format,
            github_output: None,
        }
    }

    #[test]
    fn test_derive_github_actions_output() {
        let dir = TempDir::new().unwrap();
        let record = write_record(dir.path(), PRE_RELEASE);
        let output = dir.path().join("github_output");

        let mut args = args(record, OutputFormat::GithubActions);
        args.github_output = Some(output.clone());
        args.update_build_number = true;
        derive(args).unwrap();

        let content = std::fs::read_to_string(&output).unwrap();
        assert_eq!(content.lines().count(), 26);
        assert!(content.contains("SemVer=1.2.3-feature-test-stuff.4\n"));
        assert!(content.contains("LegacySemVer=1.2.3-feature-test-stuff4\n"));
        assert!(content.contains("NuGetVersion=1.2.3-feature-test-stuff0004\n"));
        assert!(content.contains("ShortSha=3b8a809\n"));
        assert!(content.contains("EscapedBranchName=feature-test-stuff\n"));
    }

    #[test]
    fn test_derive_json_output() {
        let dir = TempDir::new().unwrap();
        let record = write_record(dir.path(), PRE_RELEASE);
        assert!(derive(args(record, OutputFormat::Json)).is_ok());
    }

    #[test]
    fn test_derive_rejects_release_with_label_without_output() {
        let dir = TempDir::new().unwrap();
        let record = write_record(dir.path(), RELEASE_WITH_LABEL);
        let output = dir.path().join("github_output");

        let mut args = args(record, OutputFormat::GithubActions);
        args.github_output = Some(output.clone());
        let err = derive(args).unwrap_err();

        assert!(format!("{:#}", err).contains("must not carry a pre-release label"));
        assert!(!output.exists());
    }

    #[test]
    fn test_derive_missing_record() {
        let result = derive(args(
            "/nonexistent/version-info.json".into(),
            OutputFormat::AzurePipelines,
        ));
        assert!(result.is_err());
    }

    #[test]
    #[serial_test::serial]
    fn test_derive_resolves_record_against_repo_root() {
        let original = env::current_dir().unwrap();
        let repo = TempDir::new().unwrap();
        write_record(repo.path(), PRE_RELEASE);

        let mut args = args("version-info.json".into(), OutputFormat::Json);
        args.repo_root = Some(repo.path().to_path_buf());
        assert!(derive(args).is_ok());

        assert_eq!(env::current_dir().unwrap(), original);
    }

    #[test]
    #[serial_test::serial]
    fn test_derive_restores_directory_on_failure() {
        let original = env::current_dir().unwrap();
        let repo = TempDir::new().unwrap();
        write_record(repo.path(), "{ not json");

        let mut args = args("version-info.json".into(), OutputFormat::Json);
        args.repo_root = Some(repo.path().to_path_buf());
        assert!(derive(args).is_err());

        assert_eq!(env::current_dir().unwrap(), original);
    }
}
