// SPDX-License-Identifier: GPL-3.0-only

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use storage_rbd::tools::render;
use storage_rbd::{CommandOutput, CommandRunner, DriverError, Result};

use crate::memory::lock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

impl Invocation {
    pub fn rendered(&self) -> String {
        render(&self.program, &self.args)
    }
}

enum Scripted {
    Output(String),
    Failure { code: i32, stderr: String },
}

/// Records every command and replays queued results per program.
///
/// Programs without a queued result succeed with empty output.
#[derive(Default)]
pub struct ScriptedRunner {
    calls: Mutex<Vec<Invocation>>,
    script: Mutex<HashMap<String, VecDeque<Scripted>>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_output(&self, program: &str, stdout: impl Into<String>) {
        self.push(program, Scripted::Output(stdout.into()));
    }

    pub fn push_failure(&self, program: &str, code: i32, stderr: impl Into<String>) {
        self.push(
            program,
            Scripted::Failure {
                code,
                stderr: stderr.into(),
            },
        );
    }

    fn push(&self, program: &str, entry: Scripted) {
        lock(&self.script)
            .entry(program.to_string())
            .or_default()
            .push_back(entry);
    }

    pub fn calls(&self) -> Vec<Invocation> {
        lock(&self.calls).clone()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        lock(&self.calls).push(Invocation {
            program: program.to_string(),
            args: args.to_vec(),
        });

        let next = lock(&self.script)
            .get_mut(program)
            .and_then(VecDeque::pop_front);

        match next {
            None => Ok(CommandOutput::default()),
            Some(Scripted::Output(stdout)) => Ok(CommandOutput {
                stdout,
                stderr: String::new(),
            }),
            Some(Scripted::Failure { code, stderr }) => Err(DriverError::ExternalProcess {
                command: render(program, args),
                code: Some(code),
                stderr,
            }),
        }
    }
}
