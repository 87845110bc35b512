/*!
 * AVRCP Media Control
 * Transport commands, volume and playback state for a connected sink
 */

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{DeviceCoordinator, Outcome};
use crate::bluez::{
    Bus, ObexBus, RegistryError, Value, MEDIA_CONTROL_INTERFACE, MEDIA_PLAYER_INTERFACE,
    MEDIA_TRANSPORT_INTERFACE,
};

pub const MAX_VOLUME: u8 = 127;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaCommand {
    Play,
    Pause,
    Next,
    Previous,
    Rewind,
}

impl MediaCommand {
    pub fn method(&self) -> &'static str {
        match self {
            MediaCommand::Play => "Play",
            MediaCommand::Pause => "Pause",
            MediaCommand::Next => "Next",
            MediaCommand::Previous => "Previous",
            MediaCommand::Rewind => "Rewind",
        }
    }
}

impl FromStr for MediaCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "play" => Ok(MediaCommand::Play),
            "pause" => Ok(MediaCommand::Pause),
            "next" => Ok(MediaCommand::Next),
            "previous" => Ok(MediaCommand::Previous),
            "rewind" => Ok(MediaCommand::Rewind),
            other => Err(format!("invalid media control command: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub title: String,
    pub artist: String,
    pub album: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackInfo {
    pub status: String,
    pub track: TrackInfo,
    /// Milliseconds.
    pub position: u64,
    /// Milliseconds, 0 when the player does not report it.
    pub duration: u64,
}

fn dict_text(track: &std::collections::BTreeMap<String, Value>, key: &str) -> String {
    track
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

impl<B: Bus, O: ObexBus> DeviceCoordinator<B, O> {
    /// Send an AVRCP command. Commands outside the allow-list never reach the bus.
    pub fn media_control(&self, command: &str, address: &str) -> Outcome {
        let command = match command.parse::<MediaCommand>() {
            Ok(command) => command,
            Err(reason) => {
                info!("{}", reason);
                return Outcome::Invalid(reason);
            }
        };

        let path = match self
            .registry()
            .find_interface_under_adapter(MEDIA_CONTROL_INTERFACE, address)
        {
            Ok(Some(path)) => path,
            Ok(None) => {
                info!("No MediaControl1 interface found for {} under {}", address, self.adapter.path());
                return Outcome::NotFound;
            }
            Err(err) => {
                warn!("Exception while getting MediaControl1 interface: {}", err);
                return err.into();
            }
        };

        match self.bus.call(&path, MEDIA_CONTROL_INTERFACE, command.method()) {
            Ok(()) => {
                info!("AVRCP {} sent successfully to {}", command.method(), address);
                Outcome::Success
            }
            Err(err) => {
                warn!("AVRCP command {} failed: {}", command.method(), err);
                err.into()
            }
        }
    }

    fn transport_path(&self, address: &str) -> Result<Option<String>, RegistryError> {
        self.registry()
            .find_interface_under_adapter(MEDIA_TRANSPORT_INTERFACE, address)
    }

    pub fn get_media_volume(&self, address: &str) -> Option<u8> {
        let read = || -> Result<Option<u8>, RegistryError> {
            let Some(path) = self.transport_path(address)? else {
                return Ok(None);
            };
            let volume = self
                .bus
                .get_property(&path, MEDIA_TRANSPORT_INTERFACE, "Volume")?
                .expect_u64("Volume")?;
            Ok(u8::try_from(volume).ok())
        };

        read().unwrap_or_else(|err| {
            warn!("Failed to get volume: {}", err);
            None
        })
    }

    /// Set the transport volume (0-127). Returns false when it could not be applied.
    pub fn set_media_volume(&self, address: &str, volume: u8) -> bool {
        if volume > MAX_VOLUME {
            warn!("Volume {} out of range 0-{}", volume, MAX_VOLUME);
            return false;
        }

        let write = || -> Result<bool, RegistryError> {
            let Some(path) = self.transport_path(address)? else {
                return Ok(false);
            };
            self.bus.set_property(
                &path,
                MEDIA_TRANSPORT_INTERFACE,
                "Volume",
                Value::U16(u16::from(volume)),
            )?;
            Ok(true)
        };

        match write() {
            Ok(true) => {
                info!("Volume set to {}", volume);
                true
            }
            Ok(false) => {
                info!("No media transport for {}", address);
                false
            }
            Err(err) => {
                warn!("Failed to set volume: {}", err);
                false
            }
        }
    }

    pub fn get_media_playback_info(&self, address: &str) -> Option<PlaybackInfo> {
        let read = || -> Result<Option<PlaybackInfo>, RegistryError> {
            let Some(path) = self
                .registry()
                .find_interface_under_adapter(MEDIA_PLAYER_INTERFACE, address)?
            else {
                return Ok(None);
            };

            let status = self.bus.get_property(&path, MEDIA_PLAYER_INTERFACE, "Status")?;
            let track = self.bus.get_property(&path, MEDIA_PLAYER_INTERFACE, "Track")?;
            let position = self
                .bus
                .get_property(&path, MEDIA_PLAYER_INTERFACE, "Position")?
                .expect_u64("Position")?;

            let track = track.as_dict().cloned().unwrap_or_default();
            Ok(Some(PlaybackInfo {
                status: status.as_str().unwrap_or_default().to_string(),
                track: TrackInfo {
                    title: dict_text(&track, "Title"),
                    artist: dict_text(&track, "Artist"),
                    album: dict_text(&track, "Album"),
                },
                position,
                duration: track.get("Duration").and_then(Value::as_u64).unwrap_or(0),
            }))
        };

        read().unwrap_or_else(|err| {
            warn!("Failed to get media playback info: {}", err);
            None
        })
    }
}
