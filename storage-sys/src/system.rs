// SPDX-License-Identifier: GPL-3.0-only

//! The door to the machine
//!
//! Activation managers never run commands or touch files directly; they go
//! through a [`System`]. [`LinuxSystem`] runs the real tools, tests plug in a
//! scripted implementation.

use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;

use tracing::{debug, warn};

use crate::error::{Result, SysError};

/// Exit status and captured output of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// Turns a non-zero exit code into [`SysError::CommandFailed`]
    pub fn check(self, program: &str) -> Result<Self> {
        if self.success() {
            return Ok(self);
        }
        Err(SysError::CommandFailed {
            program: program.to_string(),
            code: self.code,
            stderr: self.stderr.trim().to_string(),
        })
    }
}

/// A long-running process watched by polling
pub trait FormatProcess: Send {
    /// Whether the process got going (produced output or already exited)
    fn has_started(&mut self) -> bool;

    /// Exit code once the process is gone, `None` while it runs
    fn try_wait(&mut self) -> Result<Option<i32>>;

    /// Output produced since the previous call
    fn take_output(&mut self) -> String;

    fn kill(&mut self);
}

pub trait System: Send + Sync {
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput>;

    fn spawn(&self, program: &str, args: &[&str]) -> Result<Box<dyn FormatProcess>>;

    fn read_file(&self, path: &Path) -> Result<String>;

    fn write_file(&self, path: &Path, contents: &str) -> Result<()>;

    /// Entry names of a directory
    fn list_dir(&self, path: &Path) -> Result<Vec<String>>;

    fn tool_available(&self, name: &str) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LinuxSystem;

impl LinuxSystem {
    pub fn new() -> Self {
        Self
    }
}

impl System for LinuxSystem {
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        if !self.tool_available(program) {
            return Err(SysError::ToolNotFound(program.to_string()));
        }
        debug!("running {program} {}", args.join(" "));
        let output = Command::new(program).args(args).output()?;
        Ok(CommandOutput {
            // Killed by a signal
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    fn spawn(&self, program: &str, args: &[&str]) -> Result<Box<dyn FormatProcess>> {
        if !self.tool_available(program) {
            return Err(SysError::ToolNotFound(program.to_string()));
        }
        debug!("spawning {program} {}", args.join(" "));
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let (sender, lines) = mpsc::channel();
        if let Some(stdout) = child.stdout.take() {
            thread::spawn(move || {
                for line in BufReader::new(stdout).lines() {
                    let Ok(line) = line else { break };
                    if sender.send(line).is_err() {
                        break;
                    }
                }
            });
        }

        Ok(Box::new(ChildProcess {
            child,
            lines,
            pending: String::new(),
            seen_output: false,
            exited: None,
        }))
    }

    fn read_file(&self, path: &Path) -> Result<String> {
        Ok(std::fs::read_to_string(path)?)
    }

    fn write_file(&self, path: &Path, contents: &str) -> Result<()> {
        Ok(std::fs::write(path, contents)?)
    }

    fn list_dir(&self, path: &Path) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(path)? {
            names.push(entry?.file_name().to_string_lossy().to_string());
        }
        names.sort();
        Ok(names)
    }

    fn tool_available(&self, name: &str) -> bool {
        which::which(name).is_ok()
    }
}

/// Child process whose stdout is drained by a reader thread
struct ChildProcess {
    child: Child,
    lines: Receiver<String>,
    /// Lines read but not yet handed out by `take_output`
    pending: String,
    seen_output: bool,
    exited: Option<i32>,
}

impl ChildProcess {
    fn drain_lines(&mut self) {
        while let Ok(line) = self.lines.try_recv() {
            self.seen_output = true;
            self.pending.push_str(&line);
            self.pending.push('\n');
        }
    }
}

impl FormatProcess for ChildProcess {
    fn has_started(&mut self) -> bool {
        self.drain_lines();
        if self.seen_output || self.exited.is_some() {
            return true;
        }
        matches!(self.try_wait(), Ok(Some(_)))
    }

    fn try_wait(&mut self) -> Result<Option<i32>> {
        if let Some(code) = self.exited {
            return Ok(Some(code));
        }
        let status = self.child.try_wait()?;
        self.exited = status.map(|status| status.code().unwrap_or(-1));
        Ok(self.exited)
    }

    fn take_output(&mut self) -> String {
        self.drain_lines();
        std::mem::take(&mut self.pending)
    }

    fn kill(&mut self) {
        if let Err(e) = self.child.kill() {
            warn!("could not kill process {}: {e}", self.child.id());
        }
        let _ = self.child.wait();
    }
}
