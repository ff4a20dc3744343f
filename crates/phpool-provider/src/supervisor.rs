use crate::SupervisorError;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub const DEFAULT_RELOAD_TIMEOUT: Duration = Duration::from_secs(5);

/// External process supervisor that owns the PHP-FPM services.
pub trait Supervisor: Send + Sync {
    fn reload(&self, service: &str) -> Result<(), SupervisorError>;
}

/// systemd via `systemctl`: `reload`, falling back to `reload-or-restart`.
/// Each invocation is killed if it outlives the timeout.
#[derive(Debug, Clone)]
pub struct Systemctl {
    program: PathBuf,
    prefix: Vec<String>,
    timeout: Duration,
}

impl Default for Systemctl {
    fn default() -> Self {
        Self::new(DEFAULT_RELOAD_TIMEOUT)
    }
}

impl Systemctl {
    pub fn new(timeout: Duration) -> Self {
        Self {
            program: PathBuf::from("systemctl"),
            prefix: Vec::new(),
            timeout,
        }
    }

    /// Run `program prefix.. <action> <service>` instead of `systemctl`,
    /// e.g. `sudo systemctl`.
    #[must_use]
    pub fn with_command<I, S>(mut self, program: impl Into<PathBuf>, prefix: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.program = program.into();
        self.prefix = prefix.into_iter().map(Into::into).collect();
        self
    }

    fn run(&self, action: &str, service: &str) -> Result<(), SupervisorError> {
        let mut command = self.program.display().to_string();
        for arg in self.prefix.iter().map(String::as_str).chain([action, service]) {
            command.push(' ');
            command.push_str(arg);
        }
        debug!("running {command}");
        let mut child = Command::new(&self.program)
            .args(&self.prefix)
            .args([action, service])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| SupervisorError::Spawn {
                service: service.to_owned(),
                command: command.clone(),
                source,
            })?;
        // drained concurrently so a chatty child cannot block on a full pipe
        let stderr_reader = child.stderr.take().map(|mut pipe| {
            std::thread::spawn(move || {
                let mut buf = String::new();
                let _ = pipe.read_to_string(&mut buf);
                buf
            })
        });

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(SupervisorError::Timeout {
                        service: service.to_owned(),
                        command,
                        secs: self.timeout.as_secs(),
                    });
                }
                Ok(None) => std::thread::sleep(Duration::from_millis(25)),
                Err(source) => {
                    return Err(SupervisorError::Spawn {
                        service: service.to_owned(),
                        command,
                        source,
                    })
                }
            }
        };

        if status.success() {
            return Ok(());
        }
        let stderr = stderr_reader
            .and_then(|reader| reader.join().ok())
            .unwrap_or_default();
        Err(SupervisorError::Failed {
            service: service.to_owned(),
            command,
            status: status.to_string(),
            stderr: stderr.trim().to_owned(),
        })
    }
}

impl Supervisor for Systemctl {
    fn reload(&self, service: &str) -> Result<(), SupervisorError> {
        match self.run("reload", service) {
            Ok(()) => Ok(()),
            Err(SupervisorError::Failed { stderr, .. }) => {
                warn!("reload of {service} failed ({stderr}), trying reload-or-restart");
                self.run("reload-or-restart", service)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Run through sh rather than exec'ing the freshly written file, which can
    // fail with ETXTBSY while other test threads fork.
    fn fake(dir: &std::path::Path, body: &str, timeout: Duration) -> Systemctl {
        let path = dir.join("fake-systemctl");
        std::fs::write(&path, format!("{body}\n")).unwrap();
        Systemctl::new(timeout).with_command("/bin/sh", [path.display().to_string()])
    }

    #[test]
    fn reload_success() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("calls");
        fake(
            dir.path(),
            &format!("echo \"$@\" >> {}", log.display()),
            DEFAULT_RELOAD_TIMEOUT,
        )
        .reload("php82-php-fpm")
        .unwrap();
        let calls = std::fs::read_to_string(log).unwrap();
        assert_eq!(calls.trim(), "reload php82-php-fpm");
    }

    #[test]
    fn falls_back_to_reload_or_restart() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("calls");
        let body = format!(
            "echo \"$1\" >> {}\n[ \"$1\" = reload-or-restart ] || {{ echo 'not loaded' >&2; exit 1; }}",
            log.display()
        );
        fake(dir.path(), &body, DEFAULT_RELOAD_TIMEOUT)
            .reload("lsws")
            .unwrap();
        let calls = std::fs::read_to_string(log).unwrap();
        assert_eq!(calls, "reload\nreload-or-restart\n");
    }

    #[test]
    fn reports_failure_with_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let err = fake(
            dir.path(),
            "echo 'Unit php99-fpm.service not found.' >&2; exit 5",
            DEFAULT_RELOAD_TIMEOUT,
        )
        .reload("php99-fpm")
        .unwrap_err();
        match err {
            SupervisorError::Failed { stderr, command, .. } => {
                assert!(stderr.contains("not found"));
                assert!(command.contains("reload-or-restart"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn large_stderr_does_not_stall_the_child() {
        let dir = tempfile::tempdir().unwrap();
        let body = "i=0\nwhile [ $i -lt 2000 ]; do\n  echo 'Job for php82-php-fpm.service failed because the control process exited' >&2\n  i=$((i+1))\ndone\nexit 1";
        let err = fake(dir.path(), body, Duration::from_secs(5))
            .run("reload", "php82-php-fpm")
            .unwrap_err();
        match err {
            SupervisorError::Failed { stderr, .. } => {
                assert!(stderr.len() > 64 * 1024);
                assert!(stderr.starts_with("Job for php82-php-fpm.service"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn hung_reload_is_killed() {
        let dir = tempfile::tempdir().unwrap();
        let started = Instant::now();
        let err = fake(dir.path(), "exec sleep 30", Duration::from_millis(300))
            .reload("php82-php-fpm")
            .unwrap_err();
        assert!(matches!(err, SupervisorError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn missing_binary_is_spawn_error() {
        let err = Systemctl::default()
            .with_command("/nonexistent/systemctl", Vec::<String>::new())
            .reload("x")
            .unwrap_err();
        assert!(matches!(err, SupervisorError::Spawn { .. }));
    }
}
