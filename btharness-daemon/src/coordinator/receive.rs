/*!
 * OBEX Receive
 * Runs the push receiver for one bounded window and watches the save directory
 */

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::DeviceCoordinator;
use crate::bluez::{Bus, ObexBus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ReceiveOutcome {
    Received { path: PathBuf },
    Rejected { path: PathBuf },
    NoFile,
    Error { reason: String },
}

fn list_entries(dir: &Path) -> io::Result<BTreeSet<OsString>> {
    fs::read_dir(dir)?
        .map(|entry| entry.map(|entry| entry.file_name()))
        .collect()
}

impl<B: Bus, O: ObexBus> DeviceCoordinator<B, O> {
    /// Accept one incoming file into `dir` within `timeout`.
    ///
    /// `decide` is asked about the new file; a rejected file is deleted.
    /// Without a callback every file is accepted. The receiver is stopped
    /// before this returns.
    pub fn receive_file(
        &mut self,
        dir: &Path,
        timeout: Duration,
        decide: Option<&mut dyn FnMut(&Path) -> bool>,
    ) -> ReceiveOutcome {
        let outcome = self.run_receiver(dir, timeout, decide);
        self.stop_receiver();
        outcome
    }

    fn run_receiver(
        &mut self,
        dir: &Path,
        timeout: Duration,
        decide: Option<&mut dyn FnMut(&Path) -> bool>,
    ) -> ReceiveOutcome {
        if let Err(err) = fs::create_dir_all(dir) {
            warn!("Cannot create save directory {}: {}", dir.display(), err);
            return ReceiveOutcome::Error {
                reason: err.to_string(),
            };
        }

        if self.stop_receiver() {
            info!("Stopped previous OPP receiver");
        }

        let existing = match list_entries(dir) {
            Ok(entries) => entries,
            Err(err) => {
                return ReceiveOutcome::Error {
                    reason: err.to_string(),
                }
            }
        };

        let dir_arg = dir.to_string_lossy();
        match self.settings.receiver.spawn("{dir}", &dir_arg) {
            Ok(process) => {
                info!("OPP server started (pid {}). Waiting for incoming file...", process.id());
                self.receiver = Some(process);
            }
            Err(err) => {
                warn!("Error starting OPP server: {}", err);
                return ReceiveOutcome::Error {
                    reason: err.to_string(),
                };
            }
        }

        let deadline = Instant::now() + timeout;
        let incoming = loop {
            match list_entries(dir) {
                Ok(current) => {
                    if let Some(name) = current.difference(&existing).next() {
                        break dir.join(name);
                    }
                }
                Err(err) => {
                    warn!("Cannot scan {}: {}", dir.display(), err);
                    return ReceiveOutcome::Error {
                        reason: err.to_string(),
                    };
                }
            }

            let now = Instant::now();
            if now >= deadline {
                info!("No file received within {:?}", timeout);
                return ReceiveOutcome::NoFile;
            }
            thread::sleep((deadline - now).min(self.settings.receive_poll));
        };

        info!("Incoming file: {}", incoming.display());
        let accepted = match decide {
            Some(decide) => decide(&incoming),
            None => true,
        };

        if accepted {
            info!("File accepted");
            return ReceiveOutcome::Received { path: incoming };
        }

        info!("File rejected");
        if let Err(err) = fs::remove_file(&incoming) {
            warn!("Failed to delete rejected file {}: {}", incoming.display(), err);
        }
        ReceiveOutcome::Rejected { path: incoming }
    }

    /// Stop the receiver this coordinator started. Returns whether one was running.
    pub fn stop_receiver(&mut self) -> bool {
        let Some(mut process) = self.receiver.take() else {
            return false;
        };
        let was_running = process.is_running();
        if let Err(err) = process.terminate() {
            warn!("{}", err);
        }
        if was_running {
            info!("OPP server stopped");
        }
        was_running
    }

    pub fn receiver_running(&mut self) -> bool {
        self.receiver
            .as_mut()
            .map(|process| process.is_running())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluez::Adapter;
    use crate::coordinator::CoordinatorSettings;
    use crate::process::ProgramSpec;
    use crate::testing::FakeBus;
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    fn coordinator() -> DeviceCoordinator<FakeBus, FakeBus> {
        let settings = CoordinatorSettings {
            receive_poll: Duration::from_millis(20),
            receiver: ProgramSpec::new("sleep", &["30".into()]),
            ..CoordinatorSettings::default()
        };
        DeviceCoordinator::new(Adapter::new("hci0"), FakeBus::new(), FakeBus::new(), settings)
    }

    /// Receiver that writes its pid to `pid_file` before idling.
    fn traced_coordinator(pid_file: &Path) -> DeviceCoordinator<FakeBus, FakeBus> {
        let script = format!("echo $$ > '{}'; exec sleep 30", pid_file.display());
        let settings = CoordinatorSettings {
            receive_poll: Duration::from_millis(20),
            receiver: ProgramSpec::new("sh", &["-c".into(), script]),
            ..CoordinatorSettings::default()
        };
        DeviceCoordinator::new(Adapter::new("hci0"), FakeBus::new(), FakeBus::new(), settings)
    }

    fn assert_receiver_gone(pid_file: &Path) {
        let pid: i32 = fs::read_to_string(pid_file)
            .expect("receiver pid recorded")
            .trim()
            .parse()
            .unwrap();
        assert_eq!(kill(Pid::from_raw(pid), None), Err(Errno::ESRCH));
    }

    fn deliver_later(dir: &Path, name: &str) -> thread::JoinHandle<()> {
        let file = dir.join(name);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            fs::write(file, b"BEGIN:VCARD\nEND:VCARD\n").unwrap();
        })
    }

    #[test]
    fn test_accepted_file_is_kept() {
        let dir = tempfile::tempdir().expect("tempdir");
        let run = tempfile::tempdir().expect("tempdir");
        let pid_file = run.path().join("receiver.pid");
        fs::write(dir.path().join("old.txt"), b"old").unwrap();
        let mut c = traced_coordinator(&pid_file);

        let writer = deliver_later(dir.path(), "card.vcf");
        let outcome = c.receive_file(dir.path(), Duration::from_secs(5), None);
        writer.join().unwrap();

        let expected = dir.path().join("card.vcf");
        assert_eq!(outcome, ReceiveOutcome::Received { path: expected.clone() });
        assert!(expected.exists());
        assert!(!c.receiver_running());
        assert_receiver_gone(&pid_file);
    }

    #[test]
    fn test_rejected_file_is_deleted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let run = tempfile::tempdir().expect("tempdir");
        let pid_file = run.path().join("receiver.pid");
        let mut c = traced_coordinator(&pid_file);
        let mut asked = Vec::new();
        let mut reject = |path: &Path| {
            asked.push(path.to_path_buf());
            false
        };

        let writer = deliver_later(dir.path(), "unwanted.bin");
        let outcome = c.receive_file(dir.path(), Duration::from_secs(5), Some(&mut reject));
        writer.join().unwrap();

        let expected = dir.path().join("unwanted.bin");
        assert_eq!(outcome, ReceiveOutcome::Rejected { path: expected.clone() });
        assert_eq!(asked, vec![expected.clone()]);
        assert!(!expected.exists());
        assert!(!c.receiver_running());
        assert_receiver_gone(&pid_file);
    }

    #[test]
    fn test_timeout_without_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let run = tempfile::tempdir().expect("tempdir");
        let pid_file = run.path().join("receiver.pid");
        let mut c = traced_coordinator(&pid_file);

        let started = Instant::now();
        let outcome = c.receive_file(dir.path(), Duration::from_millis(300), None);
        assert_eq!(outcome, ReceiveOutcome::NoFile);
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(!c.receiver_running());
        assert_receiver_gone(&pid_file);
    }

    #[test]
    fn test_missing_directory_is_created() {
        let dir = tempfile::tempdir().expect("tempdir");
        let nested = dir.path().join("incoming/opp");
        let mut c = coordinator();

        let outcome = c.receive_file(&nested, Duration::from_millis(50), None);
        assert_eq!(outcome, ReceiveOutcome::NoFile);
        assert!(nested.is_dir());
    }

    #[test]
    fn test_receiver_spawn_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = CoordinatorSettings {
            receiver: ProgramSpec::new("btharness-no-such-receiver", &[]),
            ..CoordinatorSettings::default()
        };
        let mut c = DeviceCoordinator::new(Adapter::new("hci0"), FakeBus::new(), FakeBus::new(), settings);

        let outcome = c.receive_file(dir.path(), Duration::from_millis(50), None);
        assert!(matches!(outcome, ReceiveOutcome::Error { .. }));
        assert!(!c.stop_receiver());
    }

    #[test]
    fn test_outcome_serializes_with_result_tag() {
        let json = serde_json::to_string(&ReceiveOutcome::NoFile).unwrap();
        assert_eq!(json, r#"{"result":"no_file"}"#);
    }
}
