// SPDX-License-Identifier: GPL-3.0-only

//! Low-level formatting of DASDs through `dasdfmt`
//!
//! A [`FormatJob`] goes idle → starting → running → finished. Each call to
//! [`FormatJob::poll_once`] advances it by at most one step and never sleeps;
//! [`FormatJob::run_to_completion`] polls at the configured interval until
//! the job is finished, blocking the calling thread.

use std::sync::Arc;
use std::time::{Duration, Instant};

use storage_contracts::{EventBus, FormatEvent, FormatStatus, OperationId, Subscription};
use storage_types::{ActivationSettings, DasdDevice};
use tracing::{error, info, warn};

use crate::system::{FormatProcess, System};

pub const DASDFMT: &str = "dasdfmt";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatState {
    Idle,
    Starting,
    Running,
    Finished { success: bool, exit_code: Option<i32> },
}

pub struct FormatJob {
    operation_id: OperationId,
    system: Arc<dyn System>,
    devices: Vec<DasdDevice>,
    statuses: Vec<FormatStatus>,
    state: FormatState,
    process: Option<Box<dyn FormatProcess>>,
    started_at: Option<Instant>,
    poll_interval: Duration,
    start_timeout: Duration,
    events: EventBus<FormatEvent>,
}

impl FormatJob {
    pub fn new(
        system: Arc<dyn System>,
        devices: Vec<DasdDevice>,
        settings: &ActivationSettings,
    ) -> Self {
        let statuses = devices
            .iter()
            .map(|device| FormatStatus {
                id: device.id.clone(),
                total_cylinders: 0,
                formatted_cylinders: 0,
                done: false,
            })
            .collect();
        Self {
            operation_id: OperationId::new(),
            system,
            devices,
            statuses,
            state: FormatState::Idle,
            process: None,
            started_at: None,
            poll_interval: settings.poll_interval(),
            start_timeout: settings.start_timeout(),
            events: EventBus::new(),
        }
    }

    pub fn operation_id(&self) -> OperationId {
        self.operation_id
    }

    pub fn state(&self) -> FormatState {
        self.state
    }

    pub fn statuses(&self) -> &[FormatStatus] {
        &self.statuses
    }

    pub fn devices(&self) -> &[DasdDevice] {
        &self.devices
    }

    pub fn subscribe(&self) -> Subscription<FormatEvent> {
        self.events.subscribe()
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, FormatState::Finished { .. })
    }

    /// Advances the job by one step and returns the new state
    pub fn poll_once(&mut self) -> FormatState {
        match self.state {
            FormatState::Idle => self.start(),
            FormatState::Starting => self.check_started(),
            FormatState::Running => self.check_running(),
            FormatState::Finished { .. } => {}
        }
        self.state
    }

    /// Polls until the job finishes. Returns whether formatting succeeded.
    pub fn run_to_completion(&mut self) -> bool {
        loop {
            match self.poll_once() {
                FormatState::Finished { success, .. } => return success,
                FormatState::Idle => {}
                FormatState::Starting => {
                    std::thread::sleep(self.poll_interval.min(Duration::from_millis(100)))
                }
                FormatState::Running => std::thread::sleep(self.poll_interval),
            }
        }
    }

    fn start(&mut self) {
        let Some(args) = dasdfmt_args(&self.devices) else {
            warn!("no DASD to format");
            self.finish(false, None);
            return;
        };
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        info!("formatting {} DASDs", self.devices.len());
        match self.system.spawn(DASDFMT, &args) {
            Ok(process) => {
                self.process = Some(process);
                self.started_at = Some(Instant::now());
                self.state = FormatState::Starting;
            }
            Err(e) => {
                error!("could not start {DASDFMT}: {e}");
                self.finish(false, None);
            }
        }
    }

    fn check_started(&mut self) {
        let Some(process) = self.process.as_mut() else {
            self.finish(false, None);
            return;
        };
        if process.has_started() {
            self.state = FormatState::Running;
            return;
        }
        let waited = self.started_at.map(|at| at.elapsed()).unwrap_or_default();
        if waited >= self.start_timeout {
            error!("{DASDFMT} did not start within {:?}", self.start_timeout);
            process.kill();
            self.finish(false, None);
        }
    }

    fn check_running(&mut self) {
        let Some(process) = self.process.as_mut() else {
            self.finish(false, None);
            return;
        };
        let status = process.try_wait();
        let output = process.take_output();
        update_statuses(&mut self.statuses, &self.devices, &output);

        match status {
            Ok(None) => {
                self.events.publish(FormatEvent::Progress {
                    operation_id: self.operation_id,
                    statuses: self.statuses.clone(),
                });
            }
            Ok(Some(code)) => {
                if code == 0 {
                    for status in self.statuses.iter_mut() {
                        status.formatted_cylinders = status.total_cylinders;
                        status.done = true;
                    }
                } else {
                    warn!("{DASDFMT} exited with code {code}");
                }
                self.finish(code == 0, Some(code));
            }
            Err(e) => {
                error!("lost track of {DASDFMT}: {e}");
                self.finish(false, None);
            }
        }
    }

    fn finish(&mut self, success: bool, exit_code: Option<i32>) {
        self.process = None;
        self.state = FormatState::Finished { success, exit_code };
        info!("DASD format finished (success: {success})");
        self.events.publish(FormatEvent::Finished {
            operation_id: self.operation_id,
            success,
            exit_code,
        });
    }
}

fn dasdfmt_args(devices: &[DasdDevice]) -> Option<Vec<String>> {
    let paths: Vec<String> = devices.iter().filter_map(DasdDevice::device_path).collect();
    if paths.is_empty() {
        return None;
    }
    let mut args = vec![
        "-Y".to_string(),
        "-P".to_string(),
        paths.len().to_string(),
        "-b".to_string(),
        "4096".to_string(),
        "-y".to_string(),
        "-d".to_string(),
        "cdl".to_string(),
        "-m".to_string(),
        "1".to_string(),
    ];
    for path in paths {
        args.push("-f".to_string());
        args.push(path);
    }
    Some(args)
}

/// Reads `[<device>:] cyl <done> of <total>` progress lines
fn update_statuses(statuses: &mut [FormatStatus], devices: &[DasdDevice], output: &str) {
    for line in output.lines() {
        let Some((done, total)) = parse_cylinders(line) else {
            continue;
        };
        let index = devices
            .iter()
            .position(|device| {
                device.device_name.as_deref().is_some_and(|name| {
                    let line = line.trim_start().trim_start_matches("/dev/");
                    line.strip_prefix(name).is_some_and(|rest| rest.starts_with(':'))
                })
            })
            .or((devices.len() == 1).then_some(0));
        if let Some(status) = index.and_then(|index| statuses.get_mut(index)) {
            status.total_cylinders = total;
            status.formatted_cylinders = done.min(total);
        }
    }
}

fn parse_cylinders(line: &str) -> Option<(u64, u64)> {
    let mut words = line.split_whitespace().skip_while(|word| *word != "cyl");
    words.next()?;
    let done = words.next()?.parse().ok()?;
    if words.next()? != "of" {
        return None;
    }
    let total = words.next()?.parse().ok()?;
    Some((done, total))
}
