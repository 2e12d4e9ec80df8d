//! Output-variable sinks.
//!
//! A sink receives each derived variable exactly once and, when requested,
//! the build number. Sinks are only handed values after derivation has
//! succeeded, so a failed run never leaves half a variable set behind.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use anyhow::{
    Context,
    Result,
};
use cargo_plugin_utils::logger::Logger;
use clap::ValueEnum;
use serde_json::{
    Map,
    Value,
};

use crate::version::DerivedVersion;

/// Where derived variables are sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Azure Pipelines logging commands on stdout.
    #[default]
    AzurePipelines,
    /// `name=value` lines in the GitHub Actions output file.
    GithubActions,
    /// One JSON object on stdout.
    Json,
}

/// Receiver for output variables.
pub trait VariableSink {
    /// Reject a value this sink cannot represent, before anything is written.
    fn check_value(&self, _name: &str, _value: &str) -> Result<()> {
        Ok(())
    }

    fn set_variable(&mut self, name: &str, value: &str) -> Result<()>;

    /// Send the build number. Returns `false` when the host has no build
    /// number to update.
    fn update_build_number(&mut self, build_number: &str) -> Result<bool>;

    /// Report a task failure to the host.
    fn report_failure(&mut self, _message: &str) -> Result<()> {
        Ok(())
    }

    /// Flush anything buffered.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Emit every variable of `derived` in order, then the build number if
/// `update_build_number` is set.
///
/// Every value is checked against the sink first, so a value the sink rejects
/// leaves its output untouched.
pub fn emit_variables(
    derived: &DerivedVersion,
    sink: &mut dyn VariableSink,
    update_build_number: bool,
    logger: &mut Logger,
) -> Result<()> {
    let variables = derived.variables();
    for (name, value) in variables {
        sink.check_value(name, value)?;
    }

    for (name, value) in variables {
        sink.set_variable(name, value)
            .with_context(|| format!("Failed to set output variable {}", name))?;
        logger.print_message(&format!("{} = {}", name, value));
    }

    if update_build_number {
        let updated = sink
            .update_build_number(&derived.sem_ver)
            .context("Failed to update build number")?;
        if updated {
            logger.status("Updated", &format!("build number to {}", derived.sem_ver));
        } else {
            logger.warning("Skipping", "build number update (not supported by this output)");
        }
    }

    sink.finish()
}

/// Writes Azure Pipelines `##vso[...]` logging commands.
pub struct AzurePipelinesSink<W: Write> {
    out: W,
}

impl<W: Write> AzurePipelinesSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> VariableSink for AzurePipelinesSink<W> {
    fn set_variable(&mut self, name: &str, value: &str) -> Result<()> {
        writeln!(
            self.out,
            "##vso[task.setvariable variable={};isOutput=true;issecret=false;]{}",
            escape_property(name),
            escape_data(value)
        )?;
        Ok(())
    }

    fn update_build_number(&mut self, build_number: &str) -> Result<bool> {
        writeln!(
            self.out,
            "##vso[build.updatebuildnumber]{}",
            escape_data(build_number)
        )?;
        Ok(true)
    }

    fn report_failure(&mut self, message: &str) -> Result<()> {
        let message = escape_data(message);
        writeln!(self.out, "##vso[task.issue type=error;]{}", message)?;
        writeln!(self.out, "##vso[task.complete result=Failed;]{}", message)?;
        self.out.flush()?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

/// Escape a logging command message.
fn escape_data(value: &str) -> String {
    value
        .replace('%', "%AZP25")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}

/// Escape a logging command property value.
fn escape_property(value: &str) -> String {
    escape_data(value).replace(';', "%3B").replace(']', "%5D")
}

/// Appends `name=value` lines for GitHub Actions.
pub struct GithubActionsSink<W: Write> {
    out: W,
}

impl<W: Write> GithubActionsSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl GithubActionsSink<std::fs::File> {
    /// Open the `GITHUB_OUTPUT` file for appending.
    pub fn append_to(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        Ok(Self::new(file))
    }
}

impl<W: Write> VariableSink for GithubActionsSink<W> {
    fn check_value(&self, name: &str, value: &str) -> Result<()> {
        if value.contains(['\n', '\r']) {
            anyhow::bail!("Value of {} spans multiple lines", name);
        }
        Ok(())
    }

    fn set_variable(&mut self, name: &str, value: &str) -> Result<()> {
        self.check_value(name, value)?;
        writeln!(self.out, "{}={}", name, value)?;
        Ok(())
    }

    fn update_build_number(&mut self, _build_number: &str) -> Result<bool> {
        Ok(false)
    }

    fn finish(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

/// Collects variables and writes them as one JSON object on `finish`.
pub struct JsonSink<W: Write> {
    out: W,
    values: Map<String, Value>,
}

impl<W: Write> JsonSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            values: Map::new(),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> VariableSink for JsonSink<W> {
    fn set_variable(&mut self, name: &str, value: &str) -> Result<()> {
        if self
            .values
            .insert(name.to_string(), Value::String(value.to_string()))
            .is_some()
        {
            anyhow::bail!("Output variable {} set twice", name);
        }
        Ok(())
    }

    fn update_build_number(&mut self, build_number: &str) -> Result<bool> {
        self.values.insert(
            "BuildNumber".to_string(),
            Value::String(build_number.to_string()),
        );
        Ok(true)
    }

    fn finish(&mut self) -> Result<()> {
        let json =
            serde_json::to_string_pretty(&self.values).context("Failed to serialize variables")?;
        writeln!(self.out, "{}", json)?;
        self.out.flush()?;
        Ok(())
    }
}
