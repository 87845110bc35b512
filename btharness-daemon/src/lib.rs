/*!
 * Bluetooth controller test harness
 * BlueZ device sessions, OBEX transfers, phonebook access and raw HCI commands
 */

pub mod bluez;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod hci;
pub mod ipc;
pub mod phonebook;
pub mod process;
pub mod protocol;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;
