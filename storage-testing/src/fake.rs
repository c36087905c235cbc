// SPDX-License-Identifier: GPL-3.0-only

//! Scripted stand-ins for the machine

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use storage_sys::{CommandOutput, FormatProcess, Result, SysError, System};

/// Successful command printing `stdout`
pub fn output(stdout: &str) -> CommandOutput {
    CommandOutput {
        code: 0,
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

pub fn exit_code(code: i32) -> CommandOutput {
    CommandOutput {
        code,
        stdout: String::new(),
        stderr: format!("exit code {code}"),
    }
}

#[derive(Default)]
struct FakeState {
    /// Answers per full command line; the last one is repeated
    responses: HashMap<String, VecDeque<CommandOutput>>,
    files: BTreeMap<PathBuf, String>,
    dirs: BTreeMap<PathBuf, Vec<String>>,
    processes: VecDeque<FakeFormatProcess>,
    missing_tools: BTreeSet<String>,
    calls: Vec<String>,
}

/// [`System`] answering from a script. Commands nobody scripted succeed
/// without output.
#[derive(Default)]
pub struct FakeSystem {
    state: Mutex<FakeState>,
}

impl FakeSystem {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        // A test that panicked while holding the lock already failed
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queues the answer to `command_line` ("program arg arg")
    pub fn on(&self, command_line: &str, answer: CommandOutput) -> &Self {
        self.state()
            .responses
            .entry(command_line.to_string())
            .or_default()
            .push_back(answer);
        self
    }

    pub fn file(&self, path: &str, contents: &str) -> &Self {
        self.state()
            .files
            .insert(PathBuf::from(path), contents.to_string());
        self
    }

    pub fn dir(&self, path: &str, entries: &[&str]) -> &Self {
        self.state().dirs.insert(
            PathBuf::from(path),
            entries.iter().map(|entry| entry.to_string()).collect(),
        );
        self
    }

    pub fn missing_tool(&self, name: &str) -> &Self {
        self.state().missing_tools.insert(name.to_string());
        self
    }

    /// Process handed out by the next `spawn`
    pub fn next_process(&self, process: FakeFormatProcess) -> &Self {
        self.state().processes.push_back(process);
        self
    }

    /// Every command line run or spawned so far
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn calls_to(&self, program: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| call.split_whitespace().next() == Some(program))
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }
}

fn command_line(program: &str, args: &[&str]) -> String {
    std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ")
}

impl System for FakeSystem {
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        let line = command_line(program, args);
        let mut state = self.state();
        if state.missing_tools.contains(program) {
            return Err(SysError::ToolNotFound(program.to_string()));
        }
        state.calls.push(line.clone());
        let Some(queue) = state.responses.get_mut(&line) else {
            return Ok(CommandOutput::default());
        };
        let answer = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        Ok(answer.unwrap_or_default())
    }

    fn spawn(&self, program: &str, args: &[&str]) -> Result<Box<dyn FormatProcess>> {
        let mut state = self.state();
        if state.missing_tools.contains(program) {
            return Err(SysError::ToolNotFound(program.to_string()));
        }
        state.calls.push(command_line(program, args));
        let process = state
            .processes
            .pop_front()
            .unwrap_or_else(|| FakeFormatProcess::running_for(0, 0));
        Ok(Box::new(process))
    }

    fn read_file(&self, path: &Path) -> Result<String> {
        self.state().files.get(path).cloned().ok_or_else(|| {
            SysError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                path.display().to_string(),
            ))
        })
    }

    fn write_file(&self, path: &Path, contents: &str) -> Result<()> {
        self.state()
            .files
            .insert(path.to_path_buf(), contents.to_string());
        Ok(())
    }

    fn list_dir(&self, path: &Path) -> Result<Vec<String>> {
        self.state().dirs.get(path).cloned().ok_or_else(|| {
            SysError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                path.display().to_string(),
            ))
        })
    }

    fn tool_available(&self, name: &str) -> bool {
        !self.state().missing_tools.contains(name)
    }
}

/// Format process following a fixed script of polls
pub struct FakeFormatProcess {
    started: bool,
    polls: VecDeque<Option<i32>>,
    exit: i32,
    outputs: VecDeque<String>,
    killed: Arc<AtomicBool>,
}

impl FakeFormatProcess {
    /// Runs for `polls` polls, then exits with `exit`
    pub fn running_for(polls: usize, exit: i32) -> Self {
        let mut script: VecDeque<Option<i32>> = std::iter::repeat_n(None, polls).collect();
        script.push_back(Some(exit));
        Self {
            started: true,
            polls: script,
            exit,
            outputs: VecDeque::new(),
            killed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Never gets going
    pub fn stalled() -> Self {
        let mut process = Self::running_for(0, 0);
        process.started = false;
        process
    }

    /// Output returned by successive polls
    pub fn with_output(mut self, outputs: &[&str]) -> Self {
        self.outputs = outputs.iter().map(|output| output.to_string()).collect();
        self
    }

    /// Flag raised once the process got killed
    pub fn kill_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.killed)
    }
}

impl FormatProcess for FakeFormatProcess {
    fn has_started(&mut self) -> bool {
        self.started
    }

    fn try_wait(&mut self) -> Result<Option<i32>> {
        Ok(self.polls.pop_front().unwrap_or(Some(self.exit)))
    }

    fn take_output(&mut self) -> String {
        self.outputs.pop_front().unwrap_or_default()
    }

    fn kill(&mut self) {
        self.killed.store(true, Ordering::SeqCst);
    }
}
