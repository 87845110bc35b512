/*!
 * OBEX Object Push
 * One tracked session per coordinator and a single-shot status wait
 */

use std::fmt;
use std::path::Path;
use std::sync::mpsc::{sync_channel, Receiver};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::DeviceCoordinator;
use crate::bluez::{Bus, ObexBus, RegistryError};

pub const OPP_TARGET: &str = "opp";

/// Upper bound on a single blocking pump, so the deadline is honoured closely.
const PUMP_SLICE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Queued,
    Active,
    Suspended,
    Complete,
    Error,
    Unknown,
}

impl TransferStatus {
    pub fn parse(status: &str) -> Self {
        match status {
            "queued" => TransferStatus::Queued,
            "active" => TransferStatus::Active,
            "suspended" => TransferStatus::Suspended,
            "complete" => TransferStatus::Complete,
            "error" => TransferStatus::Error,
            _ => TransferStatus::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Queued => "queued",
            TransferStatus::Active => "active",
            TransferStatus::Suspended => "suspended",
            TransferStatus::Complete => "complete",
            TransferStatus::Error => "error",
            TransferStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    Notified(String),
    TimedOut,
}

/// Wait until `slot` holds a status or `timeout` elapses, whichever is first.
///
/// `pump` dispatches pending notifications and may block for at most the
/// duration it is given. Nothing else is awaited.
pub fn wait_for_status<P>(
    slot: &Receiver<String>,
    timeout: Duration,
    mut pump: P,
) -> Result<WaitOutcome, RegistryError>
where
    P: FnMut(Duration) -> Result<(), RegistryError>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if let Ok(status) = slot.try_recv() {
            return Ok(WaitOutcome::Notified(status));
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(WaitOutcome::TimedOut);
        }
        pump((deadline - now).min(PUMP_SLICE))?;
    }
}

impl<B: Bus, O: ObexBus> DeviceCoordinator<B, O> {
    /// Push `file` to `address` and report the transfer status.
    pub fn send_file(&mut self, address: &str, file: &Path) -> TransferStatus {
        if !file.exists() {
            info!("File does not exist: {}", file.display());
            return TransferStatus::Error;
        }

        self.retire_session();
        match self.push(address, file) {
            Ok(status) => status,
            Err(err) => {
                warn!("OBEX send to {} failed: {}", address, err);
                TransferStatus::Error
            }
        }
    }

    fn push(&mut self, address: &str, file: &Path) -> Result<TransferStatus, RegistryError> {
        let session = self.obex.create_session(address, OPP_TARGET)?;
        self.last_session = Some(session.clone());
        info!("Created OBEX session: {}", session);

        let transfer = self.obex.send_file(&session, file)?;
        info!("Started transfer: {}", transfer);

        let (sender, slot) = sync_channel(1);
        let watch = self.obex.watch_transfer(&transfer, sender)?;
        let obex = &self.obex;
        let waited = wait_for_status(&slot, self.settings.send_timeout, |limit| obex.process(limit));
        if let Err(err) = self.obex.unwatch(watch) {
            warn!("Failed to drop transfer watch: {}", err);
        }

        match self.obex.remove_session(&session) {
            Ok(()) => {
                info!("Removed OBEX session after transfer: {}", session);
                self.last_session = None;
            }
            Err(err) => warn!("Error removing OBEX session {}: {}", session, err),
        }

        let status = match waited? {
            WaitOutcome::Notified(status) => {
                info!("Transfer status changed to: {}", status);
                TransferStatus::parse(&status)
            }
            WaitOutcome::TimedOut => {
                info!("No transfer status within {:?}", self.settings.send_timeout);
                TransferStatus::Unknown
            }
        };

        Ok(status)
    }

    /// Best-effort teardown of the previously tracked session.
    pub(crate) fn retire_session(&mut self) {
        if let Some(session) = self.last_session.take() {
            match self.obex.remove_session(&session) {
                Ok(()) => info!("Removed previous OBEX session: {}", session),
                Err(err) => info!("Failed to remove previous OBEX session {}: {}", session, err),
            }
        }
    }

    pub fn tracked_session(&self) -> Option<&str> {
        self.last_session.as_deref()
    }
}
