//! Attribute client directory
//!
//! `AttribClient` owns one `ServiceSession` per registered device and is the
//! entry point for every event: control-surface calls, transport
//! completions and subscriber exits. All methods run on one event loop.

use crate::address::BdAddr;
use crate::att::constants::*;
use crate::att::pdu::{AttPacket, WriteCommand};
use crate::att::AttError;
use crate::config::ClientConfig;
use crate::connection::Completion;
use crate::error::{ClientError, ClientResult, TransportError};
use crate::gatt::discovery::{self, Engine};
use crate::gatt::session::{DiscoveryState, ServiceSession};
use crate::gatt::types::{Characteristic, PrimaryService};
use crate::gatt::{cache, notify, watcher};
use crate::storage::DeviceStorage;
use crate::surface::{Capability, CharacteristicInfo, ObjectRegistry, PropertyValue, WatchId, WatcherBus};
use crate::transport::{ConnectionProfile, TransportConnector};
use log::{debug, error, info, warn};

/// External collaborators of the client
pub struct Backends {
    pub connector: Box<dyn TransportConnector>,
    pub storage: Box<dyn DeviceStorage>,
    pub registry: Box<dyn ObjectRegistry>,
    pub bus: Box<dyn WatcherBus>,
}

pub struct AttribClient {
    config: ClientConfig,
    backends: Backends,
    sessions: Vec<ServiceSession>,
}

fn characteristic_info(chr: &Characteristic) -> CharacteristicInfo {
    CharacteristicInfo {
        path: chr.path.clone(),
        uuid: chr.uuid,
        name: String::new(),
        description: chr.description.clone(),
        value: chr.value.clone(),
        format: chr.format,
        properties: chr.properties,
    }
}

impl AttribClient {
    pub fn new(config: ClientConfig, backends: Backends) -> Self {
        Self {
            config,
            backends,
            sessions: Vec::new(),
        }
    }

    fn session_index(&self, device: &str) -> Option<usize> {
        self.sessions.iter().position(|s| s.device == device)
    }

    /// Session index and start handle of the service at `path`
    fn locate_service(&self, path: &str) -> Option<(usize, u16)> {
        self.sessions.iter().enumerate().find_map(|(i, session)| {
            session.service_by_path(path).map(|service| (i, service.start))
        })
    }

    /// Session index, service start and value handle of the characteristic
    /// at `path`
    fn locate_characteristic(&self, path: &str) -> Option<(usize, u16, u16)> {
        self.sessions.iter().enumerate().find_map(|(i, session)| {
            session.services.iter().find_map(|service| {
                service
                    .characteristics
                    .iter()
                    .find(|c| c.path == path)
                    .map(|c| (i, service.start, c.handle))
            })
        })
    }

    /// Runs every queued completion of a session until nothing is left to
    /// transmit or finish.
    fn drive(&mut self, index: usize) {
        let Some(session) = self.sessions.get_mut(index) else {
            return;
        };

        let mut engine = Engine {
            storage: self.backends.storage.as_mut(),
            registry: self.backends.registry.as_mut(),
            config: &self.config,
        };

        while let Some(completion) = session.next_completion() {
            match completion {
                Completion::Query(pending, result) => {
                    discovery::complete(session, &mut engine, pending, result)
                }
                Completion::Release(conn_ref) => session.release(conn_ref),
            }
        }
    }

    /// Loads the device's attribute tree from storage, publishing it on a hit
    fn load_from_cache(&mut self, session: &mut ServiceSession) -> ClientResult<bool> {
        let storage = &*self.backends.storage;
        if !cache::load_services(session, storage)? {
            return Ok(false);
        }

        discovery::publish_services(session, self.backends.registry.as_mut());

        let starts: Vec<u16> = session.services.iter().map(|s| s.start).collect();
        for start in starts {
            if cache::load_characteristics(session, start, storage)? {
                if let Some(service) = session.service(start) {
                    discovery::publish_characteristics(service, self.backends.registry.as_mut());
                }
            }
        }

        cache::load_attributes(session, storage)?;
        Ok(true)
    }

    /// Starts tracking a device. The attribute tree comes from storage when
    /// present, otherwise a connection is opened and discovery queued on it.
    pub fn register_device(
        &mut self,
        device: &str,
        local: BdAddr,
        remote: BdAddr,
        profile: ConnectionProfile,
    ) -> ClientResult<()> {
        if self.session_index(device).is_some() {
            return Err(ClientError::AlreadyExists);
        }

        if !profile.is_valid() {
            return Err(ClientError::InvalidArguments);
        }

        let mut session = ServiceSession::new(device, local, remote, profile);

        if self.config.use_cache {
            match self.load_from_cache(&mut session) {
                Ok(true) => {
                    info!("Primary services of {} loaded from storage", remote);
                    session.state = DiscoveryState::Ready;
                    self.sessions.push(session);
                    return Ok(());
                }
                Ok(false) => {}
                Err(e) => warn!("Failed to load attribute cache: {}", e),
            }
        }

        let conn_ref = match session.connect(self.backends.connector.as_mut(), &self.config, false) {
            Ok(conn_ref) => conn_ref,
            Err(e) => {
                error!("Failed to connect to {}: {}", remote, e);
                return Err(e);
            }
        };

        match profile {
            ConnectionProfile::LowEnergy => debug!("GATT over Low Energy"),
            ConnectionProfile::BasicRate { .. } => debug!("GATT over Basic Rate"),
        }

        session.discovery_token = Some(conn_ref);
        session.state = DiscoveryState::ConnectingTransport;
        self.sessions.push(session);

        Ok(())
    }

    /// Unpublishes and drops a device. Pending queries finish with
    /// `ConnectionGone` before the session goes away.
    pub fn unregister_device(&mut self, device: &str) {
        let Some(index) = self.session_index(device) else {
            return;
        };

        let session = &mut self.sessions[index];
        for service in &mut session.services {
            for chr in &service.characteristics {
                self.backends
                    .registry
                    .unregister_object(&chr.path, Capability::Characteristic);
            }
            self.backends
                .registry
                .unregister_object(&service.path, Capability::Service);

            for watcher in service.watchers.drain(..) {
                self.backends.bus.remove_watch(watcher.watch);
                session.completions.push_back(Completion::Release(watcher.conn_ref));
            }
        }

        session.destroy_connection();
        self.drive(index);

        let session = self.sessions.remove(index);
        info!("Unregistered {}", session.device);
    }

    /// Completion of a connect attempt started by this client
    pub fn handle_connect_result(&mut self, device: &str, result: Result<(), TransportError>) {
        let Some(index) = self.session_index(device) else {
            return;
        };

        let session = &mut self.sessions[index];
        let Some(conn) = session.connection.as_mut() else {
            return;
        };

        match result {
            Ok(()) => {
                debug!("Transport to {} connected", session.remote);
                conn.set_ready();
                watcher::register_events(conn);

                if let Some(token) = session.discovery_token.take() {
                    discovery::start_primary(session, token);
                }
            }
            Err(e) => {
                error!("{}", e);
                if session.state == DiscoveryState::ConnectingTransport {
                    session.state = DiscoveryState::Failed;
                }
                session.connection_lost();
            }
        }

        self.drive(index);
    }

    /// An ATT PDU received from the device's transport
    pub fn handle_pdu(&mut self, device: &str, pdu: &[u8]) -> ClientResult<()> {
        let index = self.session_index(device).ok_or(ClientError::DoesNotExist)?;
        if pdu.is_empty() {
            return Err(ClientError::Att(AttError::InvalidPdu));
        }

        let session = &mut self.sessions[index];
        let Some(conn) = session.connection.as_mut() else {
            debug!("PDU for {} without a connection", device);
            return Ok(());
        };

        let opcode = pdu[0];
        if opcode == ATT_HANDLE_VALUE_NTF || opcode == ATT_HANDLE_VALUE_IND {
            if !conn.has_event(opcode) {
                debug!("No handler for opcode 0x{:02X}", opcode);
                return Ok(());
            }

            let result = notify::dispatch(session, self.backends.bus.as_mut(), pdu);
            self.drive(index);
            return result;
        }

        if let Some(completion) = conn.take_response(pdu) {
            session.completions.push_back(completion);
        }
        self.drive(index);

        Ok(())
    }

    /// Remote initiated disconnection of the device's transport. Only the
    /// references of pending queries are released, so registered watchers
    /// keep the connection until they leave.
    pub fn handle_disconnect(&mut self, device: &str) {
        let Some(index) = self.session_index(device) else {
            return;
        };

        let session = &mut self.sessions[index];
        if !session.connection_lost() {
            return;
        }

        info!("{} disconnected", session.remote);
        self.drive(index);
    }

    /// A subscriber left the bus. Fired by the watch installed at watcher
    /// registration.
    pub fn subscriber_exited(&mut self, watch: WatchId) {
        for index in 0..self.sessions.len() {
            if watcher::exited(&mut self.sessions[index], watch) {
                self.drive(index);
                return;
            }
        }
    }

    pub fn get_characteristics(&self, service_path: &str) -> ClientResult<Vec<CharacteristicInfo>> {
        let (index, start) = self
            .locate_service(service_path)
            .ok_or(ClientError::DoesNotExist)?;

        let service = self.sessions[index]
            .service(start)
            .ok_or(ClientError::DoesNotExist)?;

        Ok(service.characteristics.iter().map(characteristic_info).collect())
    }

    pub fn get_properties(&self, characteristic_path: &str) -> ClientResult<CharacteristicInfo> {
        let (index, start, handle) = self
            .locate_characteristic(characteristic_path)
            .ok_or(ClientError::DoesNotExist)?;

        self.sessions[index]
            .service(start)
            .and_then(|s| s.characteristic(handle))
            .map(characteristic_info)
            .ok_or(ClientError::DoesNotExist)
    }

    /// Writes a characteristic value with a Write Command and replaces the
    /// cached value without waiting for the server.
    pub fn set_property(
        &mut self,
        characteristic_path: &str,
        name: &str,
        value: PropertyValue,
    ) -> ClientResult<()> {
        let (index, start, handle) = self
            .locate_characteristic(characteristic_path)
            .ok_or(ClientError::DoesNotExist)?;

        let bytes = match (name, value) {
            ("Value", PropertyValue::Bytes(bytes)) => bytes,
            _ => return Err(ClientError::InvalidArguments),
        };

        let session = &mut self.sessions[index];
        let conn_ref = session.connect(self.backends.connector.as_mut(), &self.config, false)?;

        let pdu = WriteCommand {
            handle,
            value: bytes.clone(),
        }
        .serialize();
        if let Some(conn) = session.connection.as_mut() {
            conn.send_command(pdu, conn_ref);
        }

        let updated = session
            .service_mut(start)
            .and_then(|s| s.characteristic_mut(handle))
            .map(|chr| chr.set_value(&bytes))
            .unwrap_or(Ok(()));

        self.drive(index);
        updated
    }

    pub fn register_watcher(&mut self, service_path: &str, sender: &str, path: &str) -> ClientResult<()> {
        let (index, start) = self
            .locate_service(service_path)
            .ok_or(ClientError::DoesNotExist)?;

        let result = watcher::register(
            &mut self.sessions[index],
            self.backends.connector.as_mut(),
            self.backends.bus.as_mut(),
            &self.config,
            start,
            sender,
            path,
        );
        self.drive(index);
        result
    }

    pub fn unregister_watcher(&mut self, service_path: &str, sender: &str, path: &str) -> ClientResult<()> {
        let (index, start) = self
            .locate_service(service_path)
            .ok_or(ClientError::DoesNotExist)?;

        let result = watcher::unregister(
            &mut self.sessions[index],
            self.backends.bus.as_mut(),
            start,
            sender,
            path,
        );
        self.drive(index);
        result
    }

    pub fn device_state(&self, device: &str) -> Option<DiscoveryState> {
        self.session_index(device).map(|i| self.sessions[i].state)
    }

    pub fn services(&self, device: &str) -> Option<&[PrimaryService]> {
        self.session_index(device)
            .map(|i| self.sessions[i].services.as_slice())
    }

    /// References currently held on the device's connection, `None` when
    /// it has no connection
    pub fn connection_refs(&self, device: &str) -> Option<usize> {
        self.session_index(device)
            .and_then(|i| self.sessions[i].connection.as_ref())
            .map(|conn| conn.refs())
    }
}
