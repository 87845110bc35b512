/*!
 * A2DP Stream
 * Plays a local file through the audio server while a device is attached
 */

use std::path::Path;

use tracing::{error, info, warn};

use super::{DeviceCoordinator, Outcome};
use crate::bluez::{Bus, ObexBus};

impl<B: Bus, O: ObexBus> DeviceCoordinator<B, O> {
    /// Start the configured player on `file`, replacing any stream this coordinator started.
    pub fn start_a2dp_stream(&mut self, address: &str, file: &Path) -> Outcome {
        let path = match self.locate(address) {
            Ok(path) => path,
            Err(outcome) => return outcome,
        };
        info!("Device path: {}", path);

        if !file.exists() {
            warn!("File path {} does not exist", file.display());
            return Outcome::Invalid(format!("file not found: {}", file.display()));
        }

        self.stop_a2dp_stream();

        info!("Starting stream with {}", file.display());
        match self.settings.player.spawn("{file}", &file.to_string_lossy()) {
            Ok(process) => {
                self.stream = Some(process);
                Outcome::Success
            }
            Err(err) => {
                error!("Stream error: {}", err);
                Outcome::Error(err.to_string())
            }
        }
    }

    pub fn stop_a2dp_stream(&mut self) -> Outcome {
        let Some(mut process) = self.stream.take() else {
            return Outcome::Unchanged;
        };
        if let Err(err) = process.terminate() {
            warn!("{}", err);
            return Outcome::Error(err.to_string());
        }
        info!("Stream stopped");
        Outcome::Success
    }

    pub fn stream_running(&mut self) -> bool {
        self.stream
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
    use std::fs;

    const ADDR: &str = "AA:BB:CC:DD:EE:FF";

    fn coordinator(bus: FakeBus) -> DeviceCoordinator<FakeBus, FakeBus> {
        let settings = CoordinatorSettings {
            player: ProgramSpec::new("sleep", &["30".into()]),
            ..CoordinatorSettings::default()
        };
        DeviceCoordinator::new(Adapter::new("hci0"), bus, FakeBus::new(), settings)
    }

    fn tone() -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("tone.wav");
        fs::write(&file, b"RIFF").unwrap();
        (dir, file)
    }

    #[test]
    fn test_stream_unknown_device_not_found() {
        let (_dir, file) = tone();
        let mut c = coordinator(FakeBus::new());
        assert_eq!(c.start_a2dp_stream(ADDR, &file), Outcome::NotFound);
        assert!(!c.stream_running());
    }

    #[test]
    fn test_stream_missing_file_is_invalid() {
        let mut c = coordinator(FakeBus::new().with_device("hci0", ADDR, true, true));
        let outcome = c.start_a2dp_stream(ADDR, Path::new("/nonexistent/tone.wav"));
        assert!(matches!(outcome, Outcome::Invalid(_)));
        assert!(!c.stream_running());
    }

    #[test]
    fn test_stream_start_and_stop() {
        let (_dir, file) = tone();
        let mut c = coordinator(FakeBus::new().with_device("hci0", ADDR, true, true));

        assert_eq!(c.start_a2dp_stream(ADDR, &file), Outcome::Success);
        assert!(c.stream_running());

        assert_eq!(c.stop_a2dp_stream(), Outcome::Success);
        assert!(!c.stream_running());
        assert_eq!(c.stop_a2dp_stream(), Outcome::Unchanged);
    }

    #[test]
    fn test_restart_replaces_previous_stream() {
        let (_dir, file) = tone();
        let mut c = coordinator(FakeBus::new().with_device("hci0", ADDR, true, true));

        assert_eq!(c.start_a2dp_stream(ADDR, &file), Outcome::Success);
        assert_eq!(c.start_a2dp_stream(ADDR, &file), Outcome::Success);
        assert!(c.stream_running());

        c.shutdown();
        assert!(!c.stream_running());
    }
}
