/*!
 * Harness Worker
 * Single thread that owns the coordinator and serves requests one at a time
 */

use std::path::Path;
use std::sync::mpsc as std_mpsc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::bluez::{Bus, PhonebookBus, RegistryError};
use crate::coordinator::{DeviceCoordinator, Outcome};
use crate::hci::{self, HciExecutor};
use crate::phonebook::PhonebookSession;
use crate::protocol::{Request, Response};

pub type Job = (Request, oneshot::Sender<Response>);

const QUEUE_DEPTH: usize = 32;

/// Everything a request may touch. Lives on the worker thread only.
pub struct Harness<B: Bus, O: PhonebookBus> {
    coordinator: DeviceCoordinator<B, O>,
    hci: HciExecutor,
    agent_capability: String,
    phonebook_settle: Duration,
    phonebook: Option<PhonebookSession>,
}

fn flag(result: Result<bool, RegistryError>) -> Response {
    match result {
        Ok(value) => Response::Flag { value },
        Err(err) => Response::error(err.to_string()),
    }
}

impl<B: Bus, O: PhonebookBus> Harness<B, O> {
    pub fn new(
        coordinator: DeviceCoordinator<B, O>,
        hci: HciExecutor,
        agent_capability: &str,
        phonebook_settle: Duration,
    ) -> Self {
        Self {
            coordinator,
            hci,
            agent_capability: agent_capability.to_string(),
            phonebook_settle,
            phonebook: None,
        }
    }

    pub fn coordinator(&self) -> &DeviceCoordinator<B, O> {
        &self.coordinator
    }

    pub fn handle(&mut self, request: Request) -> Response {
        debug!("Handling {:?}", request);
        let c = &mut self.coordinator;
        match request {
            Request::Ping => Response::Pong {
                adapter: c.adapter().name().to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            Request::Shutdown => Response::Ack {
                message: "shutting down".to_string(),
            },

            Request::ListAdapters => match c.adapters() {
                Ok(adapters) => Response::Adapters { adapters },
                Err(err) => Response::error(err.to_string()),
            },
            Request::PairedDevices => match c.paired_devices() {
                Ok(devices) => Response::Devices { devices },
                Err(err) => Response::error(err.to_string()),
            },
            Request::DiscoveredDevices => match c.discovered_devices() {
                Ok(devices) => Response::Discovered { devices },
                Err(err) => Response::error(err.to_string()),
            },
            Request::ConnectedA2dpDevices { role } => match c.connected_a2dp_devices(role) {
                Ok(devices) => Response::Devices { devices },
                Err(err) => Response::error(err.to_string()),
            },
            Request::StartDiscovery => Response::Outcome {
                result: c.start_discovery(),
            },
            Request::StopDiscovery => Response::Outcome {
                result: c.stop_discovery(),
            },
            Request::RegisterAgent { capability } => {
                let capability = capability.unwrap_or_else(|| self.agent_capability.clone());
                Response::Outcome {
                    result: c.register_agent(&capability),
                }
            }

            Request::Pair { address } => Response::Outcome { result: c.pair(&address) },
            Request::Connect { address } => Response::Outcome { result: c.connect(&address) },
            Request::Disconnect { address } => Response::Outcome {
                result: c.disconnect(&address),
            },
            Request::RemoveDevice { address } => Response::Outcome {
                result: c.remove_device(&address),
            },
            Request::IsPaired { address } => flag(c.is_paired(&address)),
            Request::IsConnected { address } => flag(c.is_connected(&address)),

            Request::SendFile { address, file } => Response::Transfer {
                status: c.send_file(&address, &file),
            },
            Request::ReceiveFile {
                directory,
                timeout_secs,
                accept,
            } => {
                let directory = directory.unwrap_or_else(|| c.settings().save_directory.clone());
                let timeout = timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or(c.settings().receive_timeout);
                let mut decide = |_: &Path| accept;
                Response::Received {
                    result: c.receive_file(&directory, timeout, Some(&mut decide)),
                }
            }
            Request::StopReceiver => Response::Flag {
                value: c.stop_receiver(),
            },

            Request::MediaControl { address, command } => Response::Outcome {
                result: c.media_control(&command, &address),
            },
            Request::GetVolume { address } => Response::Volume {
                volume: c.get_media_volume(&address),
            },
            Request::SetVolume { address, volume } => Response::Flag {
                value: c.set_media_volume(&address, volume),
            },
            Request::PlaybackInfo { address } => Response::Playback {
                info: c.get_media_playback_info(&address),
            },
            Request::StartStream { address, file } => Response::Outcome {
                result: c.start_a2dp_stream(&address, &file),
            },
            Request::StopStream => Response::Outcome {
                result: c.stop_a2dp_stream(),
            },

            Request::HciList { group } => Response::HciCommands {
                commands: hci::list(group.as_deref()),
            },
            Request::HciRun {
                group,
                command,
                values,
            } => match self.hci.run(&group, &command, &values) {
                Ok(output) => Response::HciResult { output },
                Err(err) => Response::error(err.to_string()),
            },

            pbap => self.handle_phonebook(pbap),
        }
    }

    fn handle_phonebook(&mut self, request: Request) -> Response {
        if let Request::PbapOpen { address } = request {
            self.close_phonebook();
            return match PhonebookSession::open(self.coordinator.obex(), &address, self.phonebook_settle) {
                Ok(session) => {
                    let path = session.path().to_string();
                    self.phonebook = Some(session);
                    Response::PhonebookSession { path }
                }
                Err(err) => Response::error(err.to_string()),
            };
        }

        if let Request::PbapClose = request {
            return match self.phonebook.take() {
                Some(session) => match session.close(self.coordinator.obex()) {
                    Ok(()) => Response::Outcome {
                        result: Outcome::Success,
                    },
                    Err(err) => Response::error(err.to_string()),
                },
                None => Response::Outcome {
                    result: Outcome::Unchanged,
                },
            };
        }

        let Some(session) = self.phonebook.as_ref() else {
            return Response::error("no phonebook session is open");
        };
        let bus = self.coordinator.obex();
        let result = match request {
            Request::PbapSelect { location, folder } => session
                .select(bus, &location, &folder)
                .map(|()| Response::Ack {
                    message: format!("selected {}/{}", location, folder),
                }),
            Request::PbapSize => session.size(bus).map(|size| Response::PhonebookSize { size }),
            Request::PbapFilterFields => session
                .filter_fields(bus)
                .map(|fields| Response::FilterFields { fields }),
            Request::PbapList => session.list(bus).map(|entries| Response::Entries { entries }),
            Request::PbapPull { handle, target } => session
                .pull(bus, &handle, target.as_deref())
                .map(|path| Response::PhonebookTransfer { path }),
            Request::PbapPullAll { target } => session
                .pull_all(bus, target.as_deref())
                .map(|path| Response::PhonebookTransfer { path }),
            Request::PbapSearch { field, value } => session
                .search(bus, &field, &value)
                .map(|entries| Response::Entries { entries }),
            Request::PbapProperty { name } => session
                .property(bus, &name)
                .map(|value| Response::Property { name, value }),
            other => return Response::error(format!("unsupported request: {:?}", other)),
        };
        result.unwrap_or_else(|err| Response::error(err.to_string()))
    }

    fn close_phonebook(&mut self) {
        if let Some(session) = self.phonebook.take() {
            if let Err(err) = session.close(self.coordinator.obex()) {
                warn!("Failed to close phonebook session: {}", err);
            }
        }
    }

    pub fn shutdown(&mut self) {
        self.close_phonebook();
        self.coordinator.shutdown();
    }
}

/// Start the worker thread. `build` runs on that thread, so bus handles never
/// cross threads; its error is returned here.
pub fn spawn<B, O, F>(build: F) -> Result<(mpsc::Sender<Job>, thread::JoinHandle<()>)>
where
    B: Bus + 'static,
    O: PhonebookBus + 'static,
    F: FnOnce() -> Result<Harness<B, O>> + Send + 'static,
{
    let (jobs_tx, mut jobs_rx) = mpsc::channel::<Job>(QUEUE_DEPTH);
    let (ready_tx, ready_rx) = std_mpsc::sync_channel::<Result<()>>(1);

    let handle = thread::Builder::new()
        .name("bthd-worker".to_string())
        .spawn(move || {
            let mut harness = match build() {
                Ok(harness) => {
                    let _ = ready_tx.send(Ok(()));
                    harness
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                    return;
                }
            };

            info!("Worker ready on {}", harness.coordinator().adapter().name());
            while let Some((request, reply)) = jobs_rx.blocking_recv() {
                let response = harness.handle(request);
                if reply.send(response).is_err() {
                    debug!("Client went away before the response was ready");
                }
            }

            info!("Worker stopping");
            harness.shutdown();
        })
        .context("failed to start worker thread")?;

    ready_rx
        .recv()
        .map_err(|_| anyhow!("worker thread exited during startup"))??;
    Ok((jobs_tx, handle))
}
