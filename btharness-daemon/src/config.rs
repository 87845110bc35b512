use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::coordinator::CoordinatorSettings;
use crate::process::ProgramSpec;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub socket_path: String,
    pub bluetooth: BluetoothConfig,
    pub transfer: TransferConfig,
    pub audio: AudioConfig,
    pub phonebook: PhonebookConfig,
    pub hci: HciConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BluetoothConfig {
    pub adapter: String,
    pub agent_capability: String,
    pub call_timeout_ms: u64,
    pub pair_settle_ms: u64,
    pub remove_settle_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransferConfig {
    pub send_timeout_secs: u64,
    pub receive_timeout_secs: u64,
    pub receive_poll_ms: u64,
    pub save_directory: PathBuf,
    pub receiver_program: String,
    /// `{dir}` is replaced with the save directory.
    pub receiver_args: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AudioConfig {
    pub player_program: String,
    /// `{file}` is replaced with the audio file path.
    pub player_args: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PhonebookConfig {
    pub settle_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HciConfig {
    pub tool: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: "/run/btharness/bthd.sock".to_string(),
            bluetooth: BluetoothConfig::default(),
            transfer: TransferConfig::default(),
            audio: AudioConfig::default(),
            phonebook: PhonebookConfig::default(),
            hci: HciConfig::default(),
        }
    }
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            adapter: "hci0".to_string(),
            agent_capability: "NoInputNoOutput".to_string(),
            call_timeout_ms: 25_000,
            pair_settle_ms: 1_000,
            remove_settle_ms: 500,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            send_timeout_secs: 10,
            receive_timeout_secs: 20,
            receive_poll_ms: 1_000,
            save_directory: PathBuf::from("/tmp"),
            receiver_program: "obexpushd".to_string(),
            receiver_args: vec!["-B".into(), "-o".into(), "{dir}".into(), "-n".into()],
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            player_program: "paplay".to_string(),
            player_args: vec!["{file}".to_string()],
        }
    }
}

impl Default for PhonebookConfig {
    fn default() -> Self {
        Self { settle_ms: 1_000 }
    }
}

impl Default for HciConfig {
    fn default() -> Self {
        Self {
            tool: "hcitool".to_string(),
        }
    }
}

impl DaemonConfig {
    pub fn load(path: &str) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(toml::from_str(&content)?),
            Err(_) => {
                // Create default config if not found
                let config = Self::default();
                let _ = fs::write(path, toml::to_string_pretty(&config)?);
                Ok(config)
            }
        }
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.bluetooth.call_timeout_ms)
    }

    pub fn phonebook_settle(&self) -> Duration {
        Duration::from_millis(self.phonebook.settle_ms)
    }

    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            pair_settle: Duration::from_millis(self.bluetooth.pair_settle_ms),
            remove_settle: Duration::from_millis(self.bluetooth.remove_settle_ms),
            send_timeout: Duration::from_secs(self.transfer.send_timeout_secs),
            receive_timeout: Duration::from_secs(self.transfer.receive_timeout_secs),
            receive_poll: Duration::from_millis(self.transfer.receive_poll_ms),
            save_directory: self.transfer.save_directory.clone(),
            receiver: ProgramSpec::new(&self.transfer.receiver_program, &self.transfer.receiver_args),
            player: ProgramSpec::new(&self.audio.player_program, &self.audio.player_args),
        }
    }
}
