use anyhow::anyhow;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

use crate::archive::{UnpackError, UnpackResult};
use crate::error::{ExtractionError, InstallError};
use crate::fs_utils::remove_path_if_exists;
use crate::runner::{CommandRunner, CommandSpec};
use crate::safety::verify_tree;

type UnpackFn<'a> = Box<dyn FnOnce(&Path) -> UnpackResult<()> + 'a>;

/// One way of producing an unpacked tree in a destination directory.
pub struct Strategy<'a> {
    name: &'static str,
    tool: Option<&'static str>,
    verify_output: bool,
    unpack: UnpackFn<'a>,
}

impl<'a> Strategy<'a> {
    /// Self-contained strategy; entries are validated while unpacking.
    pub fn in_process<F>(name: &'static str, unpack: F) -> Self
    where
        F: FnOnce(&Path) -> UnpackResult<()> + 'a,
    {
        Self {
            name,
            tool: None,
            verify_output: false,
            unpack: Box::new(unpack),
        }
    }

    /// Strategy backed by an external tool. Its output is verified entry by
    /// entry before it is accepted.
    pub fn external<F>(tool: &'static str, unpack: F) -> Self
    where
        F: FnOnce(&Path) -> UnpackResult<()> + 'a,
    {
        Self {
            name: tool,
            tool: Some(tool),
            verify_output: true,
            unpack: Box::new(unpack),
        }
    }
}

/// Ordered fallback chain: the first strategy that succeeds wins, a safety
/// violation ends the chain at once, and the last failure is reported.
pub struct ExtractionChain<'a> {
    format: &'static str,
    strategies: Vec<Strategy<'a>>,
}

impl<'a> ExtractionChain<'a> {
    pub fn new(format: &'static str) -> Self {
        Self {
            format,
            strategies: Vec::new(),
        }
    }

    pub fn then(mut self, strategy: Strategy<'a>) -> Self {
        self.strategies.push(strategy);
        self
    }

    pub fn run(self, runner: &dyn CommandRunner, dest: &Path) -> Result<(), InstallError> {
        let format = self.format;
        let mut primary: Option<String> = None;
        let mut last: Option<ExtractionError> = None;

        for strategy in self.strategies {
            if let Some(tool) = strategy.tool {
                if !runner.exists(tool) {
                    debug!(format, tool, "fallback tool not available");
                    last = Some(ExtractionError::FallbackUnavailable {
                        format,
                        tool,
                        primary: describe_primary(&primary),
                    });
                    continue;
                }
            }

            reset_dir(dest)?;
            debug!(format, strategy = strategy.name, dest = %dest.display(), "extracting");
            match (strategy.unpack)(dest) {
                Ok(()) => {
                    if strategy.verify_output {
                        let checked = verify_tree(dest)?;
                        debug!(format, strategy = strategy.name, checked, "verified extracted tree");
                    }
                    return Ok(());
                }
                Err(UnpackError::Safety(err)) => return Err(err.into()),
                Err(UnpackError::Failed(err)) => {
                    let error = format!("{err:#}");
                    warn!(format, strategy = strategy.name, %error, "extraction strategy failed");
                    last = Some(match strategy.tool {
                        Some(tool) => ExtractionError::FallbackFailed {
                            format,
                            tool,
                            primary: describe_primary(&primary),
                            source: err,
                        },
                        None => {
                            if primary.is_none() {
                                primary = Some(error.clone());
                            }
                            ExtractionError::Malformed {
                                format,
                                reason: error,
                            }
                        }
                    });
                }
            }
        }

        Err(last
            .unwrap_or_else(|| ExtractionError::Malformed {
                format,
                reason: "no extraction strategy configured".to_string(),
            })
            .into())
    }
}

/// Runs an external extraction command, mapping every failure (including
/// timeouts and cancellation) to an ordinary strategy failure.
pub fn run_tool(runner: &dyn CommandRunner, spec: &CommandSpec) -> UnpackResult<()> {
    runner
        .run(spec)
        .map(|_| ())
        .map_err(|err| UnpackError::Failed(anyhow!(err)))
}

fn describe_primary(primary: &Option<String>) -> String {
    primary
        .clone()
        .unwrap_or_else(|| "no in-process strategy".to_string())
}

fn reset_dir(dest: &Path) -> Result<(), InstallError> {
    remove_path_if_exists(dest).map_err(ExtractionError::Scratch)?;
    fs::create_dir_all(dest).map_err(ExtractionError::Scratch)?;
    Ok(())
}
