#![doc = include_str!("../README.md")]

/// Command implementations and argument types.
///
/// # Example: Deriving variables from a build script
///
/// ```no_run
/// use release_flow_version::commands::{
///     DeriveArgs,
///     derive,
/// };
/// use release_flow_version::output::OutputFormat;
///
/// derive(DeriveArgs {
///     version_info: "version-info.json".into(),
///     repo_root: None,
///     update_build_number: true,
///     format: OutputFormat::AzurePipelines,
///     github_output: None,
/// })?;
/// # Ok::<(), anyhow::Error>(())
/// ```
pub mod commands;
/// Monotonic task and extension identity.
pub mod identity;
/// Output-variable sinks.
pub mod output;
/// Version derivation.
pub mod version;
