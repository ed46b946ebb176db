//! Per-device GATT session

use super::discovery::Query;
use super::types::PrimaryService;
use crate::address::BdAddr;
use crate::att::AttError;
use crate::connection::{AttribConnection, Completion, ConnRef};
use crate::error::ClientResult;
use crate::config::ClientConfig;
use crate::transport::{ConnectOptions, ConnectionProfile, TransportConnector};
use log::{debug, info};
use std::collections::VecDeque;

/// Progress of attribute discovery for a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryState {
    Idle,
    ConnectingTransport,
    DiscoveringPrimary,
    DiscoveringCharacteristics,
    DiscoveringDescriptors,
    Ready,
    Failed,
}

#[derive(Debug)]
pub struct ServiceSession {
    pub device: String,
    pub local: BdAddr,
    pub remote: BdAddr,
    pub profile: ConnectionProfile,
    pub services: Vec<PrimaryService>,
    pub state: DiscoveryState,
    pub(crate) connection: Option<AttribConnection>,
    /// Reference waiting for the transport to come up before primary
    /// discovery starts
    pub(crate) discovery_token: Option<ConnRef>,
    pub(crate) completions: VecDeque<Completion>,
    /// Discovery queries issued and not yet completed
    pub(crate) discovery_pending: usize,
    next_generation: u64,
}

impl ServiceSession {
    pub fn new(device: &str, local: BdAddr, remote: BdAddr, profile: ConnectionProfile) -> Self {
        Self {
            device: device.to_string(),
            local,
            remote,
            profile,
            services: Vec::new(),
            state: DiscoveryState::Idle,
            connection: None,
            discovery_token: None,
            completions: VecDeque::new(),
            discovery_pending: 0,
            next_generation: 1,
        }
    }

    pub fn service(&self, start: u16) -> Option<&PrimaryService> {
        self.services.iter().find(|s| s.start == start)
    }

    pub fn service_mut(&mut self, start: u16) -> Option<&mut PrimaryService> {
        self.services.iter_mut().find(|s| s.start == start)
    }

    pub fn service_by_path(&self, path: &str) -> Option<&PrimaryService> {
        self.services.iter().find(|s| s.path == path)
    }

    /// Takes a reference on the current connection, opening one if there is
    /// none. A connection opened for listening stays in listen mode. A
    /// connection whose transport was lost gets a new transport and keeps
    /// the references its watchers hold.
    pub(crate) fn connect(
        &mut self,
        connector: &mut dyn TransportConnector,
        config: &ClientConfig,
        listen: bool,
    ) -> ClientResult<ConnRef> {
        if let Some(conn) = self.connection.as_mut() {
            if conn.is_disconnected() {
                let options = ConnectOptions::new(
                    self.local,
                    self.remote,
                    self.profile,
                    config.security_level,
                    listen || conn.is_listen(),
                )?;
                let transport = connector.connect(&options)?;

                info!("Reconnecting to {} ({} references kept)", self.remote, conn.refs());
                conn.reopen(transport);
            }

            if listen {
                conn.set_listen();
            }
            return Ok(conn.acquire());
        }

        let options = ConnectOptions::new(
            self.local,
            self.remote,
            self.profile,
            config.security_level,
            listen,
        )?;
        let transport = connector.connect(&options)?;

        let generation = self.next_generation;
        self.next_generation += 1;

        info!(
            "Connecting to {} ({:?}, listen {})",
            self.remote, self.profile, listen
        );
        let (conn, conn_ref) = AttribConnection::open(transport, generation, listen);
        self.connection = Some(conn);

        Ok(conn_ref)
    }

    /// Extra reference on the live connection, `None` once it is gone
    pub(crate) fn acquire(&mut self) -> Option<ConnRef> {
        self.connection.as_mut().map(|conn| conn.acquire())
    }

    /// Hands a reference back, destroying the connection when it was the last.
    pub(crate) fn release(&mut self, conn_ref: ConnRef) {
        let last = match self.connection.as_mut() {
            Some(conn) => conn.release(conn_ref),
            None => {
                debug!("Reference released after connection was destroyed");
                false
            }
        };

        if last {
            self.destroy_connection();
        }
    }

    /// Closes the connection regardless of its reference count. Every
    /// pending query is completed with `ConnectionGone`.
    pub(crate) fn destroy_connection(&mut self) {
        if let Some(conn) = self.connection.take() {
            self.completions.extend(conn.shutdown());
        }

        if let Some(token) = self.discovery_token.take() {
            self.completions.push_back(Completion::Release(token));
        }
    }

    /// Handles loss of the transport, reported by the remote side or by a
    /// failed connect. Pending queries complete with `ConnectionGone` and
    /// release their references. The connection stays while watchers still
    /// hold references. Returns `false` if the loss was already handled.
    pub(crate) fn connection_lost(&mut self) -> bool {
        let Some(conn) = self.connection.as_mut() else {
            return false;
        };

        if !conn.mark_disconnected() {
            return false;
        }

        self.completions.extend(conn.fail_pending());

        if let Some(token) = self.discovery_token.take() {
            self.completions.push_back(Completion::Release(token));
        }

        true
    }

    pub(crate) fn send_request(&mut self, query: Query, pdu: Vec<u8>, conn_ref: ConnRef) {
        match self.connection.as_mut() {
            Some(conn) if conn.generation() == conn_ref.generation() && !conn.is_disconnected() => {
                conn.send_request(query, pdu, conn_ref)
            }
            _ => {
                let pending = crate::connection::PendingQuery {
                    query,
                    pdu,
                    conn_ref,
                };
                self.completions
                    .push_back(Completion::Query(pending, Err(AttError::ConnectionGone)));
            }
        }
    }

    /// Collects whatever the connection has ready to transmit
    pub(crate) fn pump(&mut self) {
        if let Some(conn) = self.connection.as_mut() {
            self.completions.extend(conn.pump());
        }
    }

    pub(crate) fn next_completion(&mut self) -> Option<Completion> {
        self.pump();
        self.completions.pop_front()
    }
}
