//! Service control for the broker, database and worker daemons.
//!
//! Two backends: SysV init scripts (`/etc/init.d/<svc> <action>`) and
//! systemd (`systemctl <action> <svc>.service`). Worker processes that
//! outlive their init script are found through `/proc` and signalled
//! directly.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;

use crate::config::{ServiceManagerKind, ServicesConfig};
use crate::error::{ProvisionError, Result};
use crate::exec;

pub trait ServiceControl {
    /// Whether a supervised entry exists for `name`.
    fn has_service(&self, name: &str) -> bool;
    fn start(&self, name: &str) -> Result<()>;
    fn stop(&self, name: &str) -> Result<()>;
    /// `instance` selects e.g. a PostgreSQL cluster version where the backend supports it.
    fn restart(&self, name: &str, instance: Option<&str>) -> Result<()>;
    fn reload(&self, name: &str, instance: Option<&str>) -> Result<()>;
}

/// Processes we may have to signal by command line.
pub trait ProcessTable {
    /// Send `signal` to every process whose command line contains `pattern`
    /// (never the current process). Returns how many were signalled.
    fn signal_matching(&self, pattern: &str, signal: Signal) -> Result<usize>;
}

/// `/etc/init.d` scripts.
#[derive(Debug, Clone)]
pub struct SysvInit {
    pub init_dir: PathBuf,
}

impl SysvInit {
    fn script(&self, name: &str) -> PathBuf {
        self.init_dir.join(name)
    }

    fn invoke(&self, name: &str, action: &str, instance: Option<&str>) -> Result<()> {
        let mut cmd = Command::new(self.script(name));
        cmd.arg(action);
        if let Some(instance) = instance {
            cmd.arg(instance);
        }
        exec::run(&mut cmd)?;
        Ok(())
    }
}

impl ServiceControl for SysvInit {
    fn has_service(&self, name: &str) -> bool {
        self.script(name).is_file()
    }

    fn start(&self, name: &str) -> Result<()> {
        self.invoke(name, "start", None)
    }

    fn stop(&self, name: &str) -> Result<()> {
        self.invoke(name, "stop", None)
    }

    fn restart(&self, name: &str, instance: Option<&str>) -> Result<()> {
        self.invoke(name, "restart", instance)
    }

    fn reload(&self, name: &str, instance: Option<&str>) -> Result<()> {
        self.invoke(name, "reload", instance)
    }
}

/// `systemctl`. The umbrella unit covers every instance, so `instance` is ignored.
#[derive(Debug, Clone, Default)]
pub struct Systemd;

impl Systemd {
    fn unit(name: &str) -> String {
        format!("{name}.service")
    }

    fn systemctl(action: &str, name: &str) -> Result<()> {
        exec::run(Command::new("systemctl").args([action, &Self::unit(name)]))?;
        Ok(())
    }
}

impl ServiceControl for Systemd {
    fn has_service(&self, name: &str) -> bool {
        exec::run_unchecked(Command::new("systemctl").args(["cat", &Self::unit(name)]))
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn start(&self, name: &str) -> Result<()> {
        Self::systemctl("start", name)
    }

    fn stop(&self, name: &str) -> Result<()> {
        Self::systemctl("stop", name)
    }

    fn restart(&self, name: &str, _instance: Option<&str>) -> Result<()> {
        Self::systemctl("restart", name)
    }

    fn reload(&self, name: &str, _instance: Option<&str>) -> Result<()> {
        Self::systemctl("reload", name)
    }
}

/// Pick the backend; `auto` means systemd when it is PID 1.
pub fn service_control(cfg: &ServicesConfig) -> Box<dyn ServiceControl> {
    let use_systemd = match cfg.manager {
        ServiceManagerKind::Systemd => true,
        ServiceManagerKind::Sysv => false,
        ServiceManagerKind::Auto => Path::new("/run/systemd/system").is_dir(),
    };
    if use_systemd {
        log::debug!("Using systemd for service control");
        Box::new(Systemd)
    } else {
        log::debug!("Using init scripts in {}", cfg.init_dir.display());
        Box::new(SysvInit {
            init_dir: cfg.init_dir.clone(),
        })
    }
}

/// Live process table read from `/proc`.
#[derive(Debug, Clone)]
pub struct ProcProcesses {
    pub proc_root: PathBuf,
}

impl Default for ProcProcesses {
    fn default() -> Self {
        Self {
            proc_root: PathBuf::from("/proc"),
        }
    }
}

impl ProcProcesses {
    fn matching_pids(&self, pattern: &str) -> Result<Vec<i32>> {
        let own = std::process::id() as i32;
        let entries =
            fs::read_dir(&self.proc_root).map_err(|e| ProvisionError::io(&self.proc_root, e))?;

        let mut pids = Vec::new();
        for entry in entries.flatten() {
            let Some(pid) = entry.file_name().to_str().and_then(|n| n.parse::<i32>().ok()) else {
                continue;
            };
            if pid == own {
                continue;
            }
            // Processes can vanish between readdir and read.
            let Ok(raw) = fs::read(entry.path().join("cmdline")) else {
                continue;
            };
            if cmdline_matches(&raw, pattern) {
                pids.push(pid);
            }
        }
        Ok(pids)
    }
}

/// NUL-separated `/proc/<pid>/cmdline` contains `pattern`.
pub fn cmdline_matches(raw: &[u8], pattern: &str) -> bool {
    if raw.is_empty() {
        return false;
    }
    let joined: Vec<u8> = raw.iter().map(|&b| if b == 0 { b' ' } else { b }).collect();
    String::from_utf8_lossy(&joined).contains(pattern)
}

impl ProcessTable for ProcProcesses {
    fn signal_matching(&self, pattern: &str, signal: Signal) -> Result<usize> {
        let mut signalled = 0;
        for pid in self.matching_pids(pattern)? {
            match kill(Pid::from_raw(pid), signal) {
                Ok(()) => signalled += 1,
                Err(Errno::ESRCH) => {}
                Err(e) => {
                    return Err(ProvisionError::System(format!(
                        "failed to send {signal} to {pid}: {e}"
                    )));
                }
            }
        }
        Ok(signalled)
    }
}

/// What stopping the workers took.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerShutdown {
    pub stopped_service: bool,
    pub terminated: usize,
    pub killed: usize,
}

impl WorkerShutdown {
    pub fn did_anything(&self) -> bool {
        self.stopped_service || self.terminated > 0 || self.killed > 0
    }
}

/// Graceful stop, grace period, then SIGKILL for anything still holding on.
pub fn shutdown_workers(
    services: &dyn ServiceControl,
    procs: &dyn ProcessTable,
    cfg: &ServicesConfig,
) -> Result<WorkerShutdown> {
    let mut summary = WorkerShutdown::default();

    if services.has_service(&cfg.worker_service) {
        match services.stop(&cfg.worker_service) {
            Ok(()) => summary.stopped_service = true,
            Err(e) => log::warn!("Stopping {} failed: {e}", cfg.worker_service),
        }
    }

    summary.terminated = procs.signal_matching(&cfg.worker_pattern, Signal::SIGTERM)?;

    if summary.stopped_service || summary.terminated > 0 {
        log::info!(
            "Waiting {}s for {} workers to exit",
            cfg.grace_period_secs,
            cfg.worker_pattern
        );
        thread::sleep(Duration::from_secs(cfg.grace_period_secs));
    }

    summary.killed = procs.signal_matching(&cfg.worker_pattern, Signal::SIGKILL)?;
    if summary.killed > 0 {
        log::warn!(
            "Killed {} {} worker(s) that ignored the stop request",
            summary.killed,
            cfg.worker_pattern
        );
    }

    Ok(summary)
}
