//! Interface restart orchestration
//!
//! Walks the config directory, takes every `wg*.conf` interface down and
//! back up via `wg-quick`, and aggregates per-interface results into a
//! summary. The "up" phase always runs even when "down" failed: `wg-quick
//! down` on an interface that is not running fails, and that must not stop
//! the interface from being brought up.
//!
//! Commands are spawned with argument vectors, never through a shell, and
//! each invocation runs under a timeout so one wedged interface cannot
//! stall the whole batch. Concurrent restart requests are serialized.

use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{info, warn};

const CONFIG_EXTENSION: &str = "conf";

/// Which wg-quick phase failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RestartPhase {
    Down,
    Up,
}

impl RestartPhase {
    fn as_arg(&self) -> &'static str {
        match self {
            Self::Down => "down",
            Self::Up => "up",
        }
    }
}

impl std::fmt::Display for RestartPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_arg())
    }
}

/// One failed phase for one interface
#[derive(Debug, Clone, Serialize)]
pub struct PhaseFailure {
    pub phase: RestartPhase,
    pub detail: String,
}

/// Outcome for a single interface
#[derive(Debug, Clone, Serialize)]
pub struct InterfaceRestart {
    pub interface: String,
    /// True when the up phase succeeded, regardless of the down phase.
    pub started: bool,
    pub failures: Vec<PhaseFailure>,
}

/// Aggregate classification of a restart cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RestartSummary {
    NoneFound,
    AllRestarted { count: usize },
    SomeErrors { errors: usize, restarted: usize },
}

/// Full restart report: aggregate plus per-interface detail
#[derive(Debug, Clone, Serialize)]
pub struct RestartReport {
    pub summary: RestartSummary,
    pub interfaces: Vec<InterfaceRestart>,
}

/// Drives wg-quick over every config file in the config directory.
pub struct RestartOrchestrator {
    wg_quick: PathBuf,
    config_dir: PathBuf,
    command_timeout: Duration,
    // Two overlapping full-restart cycles would race on interface state.
    lock: Mutex<()>,
}

impl RestartOrchestrator {
    pub fn new(
        wg_quick: impl Into<PathBuf>,
        config_dir: impl Into<PathBuf>,
        command_timeout: Duration,
    ) -> Self {
        Self {
            wg_quick: wg_quick.into(),
            config_dir: config_dir.into(),
            command_timeout,
            lock: Mutex::new(()),
        }
    }

    /// Interface names derived from `*.conf` files, sorted lexicographically
    /// so restart order is reproducible across platforms.
    pub fn discover_interfaces(&self) -> Result<Vec<String>, String> {
        let entries = match std::fs::read_dir(&self.config_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(
                    "Config directory {} does not exist",
                    self.config_dir.display()
                );
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(format!(
                    "Failed to list {}: {}",
                    self.config_dir.display(),
                    e
                ))
            }
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| e.to_string())?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(CONFIG_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Restart every discovered interface and aggregate the results.
    pub async fn restart_all(&self) -> Result<RestartReport, String> {
        let _guard = self.lock.lock().await;

        let names = self.discover_interfaces()?;
        let mut interfaces = Vec::with_capacity(names.len());

        for name in names {
            let mut failures = Vec::new();

            if let Err(detail) = self.run_phase(RestartPhase::Down, &name).await {
                warn!("Error stopping {}: {}", name, detail);
                failures.push(PhaseFailure {
                    phase: RestartPhase::Down,
                    detail,
                });
            }

            // Up runs unconditionally; a failed down usually just means the
            // interface was not running.
            let started = match self.run_phase(RestartPhase::Up, &name).await {
                Ok(()) => {
                    info!("Restarted interface {}", name);
                    true
                }
                Err(detail) => {
                    warn!("Error starting {}: {}", name, detail);
                    failures.push(PhaseFailure {
                        phase: RestartPhase::Up,
                        detail,
                    });
                    false
                }
            };

            interfaces.push(InterfaceRestart {
                interface: name,
                started,
                failures,
            });
        }

        let restarted = interfaces.iter().filter(|i| i.started).count();
        let errors = interfaces.iter().filter(|i| !i.failures.is_empty()).count();
        let summary = if interfaces.is_empty() {
            RestartSummary::NoneFound
        } else if errors == 0 {
            RestartSummary::AllRestarted { count: restarted }
        } else {
            RestartSummary::SomeErrors { errors, restarted }
        };

        Ok(RestartReport {
            summary,
            interfaces,
        })
    }

    async fn run_phase(&self, phase: RestartPhase, interface: &str) -> Result<(), String> {
        let output = tokio::time::timeout(
            self.command_timeout,
            Command::new(&self.wg_quick)
                .arg(phase.as_arg())
                .arg(interface)
                .output(),
        )
        .await
        .map_err(|_| {
            format!(
                "wg-quick {} {} timed out after {}s",
                phase,
                interface,
                self.command_timeout.as_secs()
            )
        })?
        .map_err(|e| format!("Failed to spawn {}: {}", self.wg_quick.display(), e))?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if stderr.is_empty() {
                Err(format!("wg-quick {} {} exited with {}", phase, interface, output.status))
            } else {
                Err(stderr)
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    fn write_configs(dir: &Path, names: &[&str]) {
        for name in names {
            std::fs::write(dir.join(format!("{}.conf", name)), "[Interface]\n").unwrap();
        }
    }

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn orchestrator(wg_quick: impl Into<PathBuf>, dir: &Path) -> RestartOrchestrator {
        RestartOrchestrator::new(wg_quick, dir, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_none_found() {
        let dir = tempfile::tempdir().unwrap();
        let report = orchestrator("true", dir.path()).restart_all().await.unwrap();
        assert_eq!(report.summary, RestartSummary::NoneFound);
        assert!(report.interfaces.is_empty());
    }

    #[tokio::test]
    async fn test_missing_config_dir_is_none_found() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let report = orchestrator("true", &missing).restart_all().await.unwrap();
        assert_eq!(report.summary, RestartSummary::NoneFound);
    }

    #[tokio::test]
    async fn test_all_restarted() {
        let dir = tempfile::tempdir().unwrap();
        write_configs(dir.path(), &["wg0", "wg1"]);

        let report = orchestrator("true", dir.path()).restart_all().await.unwrap();
        assert_eq!(report.summary, RestartSummary::AllRestarted { count: 2 });
        assert!(report.interfaces.iter().all(|i| i.failures.is_empty()));
    }

    #[tokio::test]
    async fn test_all_phases_failing() {
        let dir = tempfile::tempdir().unwrap();
        write_configs(dir.path(), &["wg0", "wg1", "wg2"]);

        let report = orchestrator("false", dir.path()).restart_all().await.unwrap();
        assert_eq!(
            report.summary,
            RestartSummary::SomeErrors {
                errors: 3,
                restarted: 0
            }
        );
        for iface in &report.interfaces {
            assert!(!iface.started);
            assert_eq!(iface.failures.len(), 2);
        }
    }

    #[tokio::test]
    async fn test_up_runs_even_when_down_fails() {
        let dir = tempfile::tempdir().unwrap();
        write_configs(dir.path(), &["wg0"]);
        // Fails the down phase, succeeds the up phase.
        let script = write_script(dir.path(), "fake-wg-quick", r#"[ "$1" = up ]"#);

        let report = orchestrator(&script, dir.path()).restart_all().await.unwrap();
        assert_eq!(
            report.summary,
            RestartSummary::SomeErrors {
                errors: 1,
                restarted: 1
            }
        );
        let iface = &report.interfaces[0];
        assert!(iface.started);
        assert_eq!(iface.failures.len(), 1);
        assert_eq!(iface.failures[0].phase, RestartPhase::Down);
    }

    #[tokio::test]
    async fn test_failure_carries_stderr() {
        let dir = tempfile::tempdir().unwrap();
        write_configs(dir.path(), &["wg0"]);
        let script = write_script(
            dir.path(),
            "fake-wg-quick",
            "echo 'resolvconf: command not found' >&2; exit 1",
        );

        let report = orchestrator(&script, dir.path()).restart_all().await.unwrap();
        let iface = &report.interfaces[0];
        assert!(iface.failures[0]
            .detail
            .contains("resolvconf: command not found"));
    }

    #[tokio::test]
    async fn test_timeout_counts_as_phase_failure() {
        let dir = tempfile::tempdir().unwrap();
        write_configs(dir.path(), &["wg0"]);
        let script = write_script(dir.path(), "fake-wg-quick", "sleep 5");

        let orchestrator =
            RestartOrchestrator::new(&script, dir.path(), Duration::from_millis(100));
        let report = orchestrator.restart_all().await.unwrap();
        assert_eq!(
            report.summary,
            RestartSummary::SomeErrors {
                errors: 1,
                restarted: 0
            }
        );
        assert!(report.interfaces[0].failures[0].detail.contains("timed out"));
    }

    #[tokio::test]
    async fn test_discovery_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        write_configs(dir.path(), &["wg2", "wg10", "wg0"]);
        std::fs::write(dir.path().join("notes.txt"), "ignore me").unwrap();
        std::fs::write(dir.path().join("wg5.conf.bak"), "ignore me").unwrap();

        let names = orchestrator("true", dir.path())
            .discover_interfaces()
            .unwrap();
        // Lexicographic, not numeric: wg10 sorts before wg2.
        assert_eq!(names, vec!["wg0", "wg10", "wg2"]);
    }
}
