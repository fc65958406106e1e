// SPDX-License-Identifier: GPL-3.0-only

use std::process::Command;

use which::which;

use crate::error::{DriverError, Result};

/// Captured output of a successful command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs external commands; a non-zero exit is an error
pub trait CommandRunner: Send + Sync {
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput>;
}

pub fn render(program: &str, args: &[String]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}

/// Executes commands on the host, resolving binaries through PATH
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        let binary = which(program).map_err(|_| DriverError::ToolNotFound(program.to_string()))?;
        let rendered = render(program, args);

        let output = Command::new(&binary)
            .args(args)
            .output()
            .map_err(|error| DriverError::ExternalProcess {
                command: rendered.clone(),
                code: None,
                stderr: error.to_string(),
            })?;

        if !output.status.success() {
            return Err(DriverError::ExternalProcess {
                command: rendered,
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}
