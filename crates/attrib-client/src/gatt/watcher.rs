//! Characteristic watcher registry
//!
//! Each watcher holds one connection reference for as long as it stays
//! registered, keeping a listen-mode connection open.

use super::session::ServiceSession;
use super::types::Watcher;
use crate::att::constants::{ATT_HANDLE_VALUE_IND, ATT_HANDLE_VALUE_NTF};
use crate::config::ClientConfig;
use crate::connection::AttribConnection;
use crate::error::{ClientError, ClientResult};
use crate::surface::{is_object_path, WatchId, WatcherBus};
use crate::transport::TransportConnector;
use log::debug;

/// Registers the notification and indication handlers once the transport
/// is up
pub(crate) fn register_events(conn: &mut AttribConnection) {
    if conn.is_ready() && conn.is_listen() {
        conn.register_event(ATT_HANDLE_VALUE_NTF);
        conn.register_event(ATT_HANDLE_VALUE_IND);
    }
}

pub(crate) fn register(
    session: &mut ServiceSession,
    connector: &mut dyn TransportConnector,
    bus: &mut dyn WatcherBus,
    config: &ClientConfig,
    service_start: u16,
    sender: &str,
    path: &str,
) -> ClientResult<()> {
    if sender.is_empty() || !is_object_path(path) {
        return Err(ClientError::InvalidArguments);
    }

    if session.service(service_start).is_none() {
        return Err(ClientError::DoesNotExist);
    }

    let conn_ref = session.connect(connector, config, true)?;
    if let Some(conn) = session.connection.as_mut() {
        register_events(conn);
    }

    let watch = bus.add_disconnect_watch(sender);
    let watcher = Watcher {
        name: sender.to_string(),
        path: path.to_string(),
        watch,
        conn_ref,
    };

    match session.service_mut(service_start) {
        Some(service) => {
            debug!("{} registered watcher {} {}", service.path, sender, path);
            service.watchers.push(watcher);
        }
        None => {
            bus.remove_watch(watch);
            session.release(watcher.conn_ref);
        }
    }

    Ok(())
}

pub(crate) fn unregister(
    session: &mut ServiceSession,
    bus: &mut dyn WatcherBus,
    service_start: u16,
    sender: &str,
    path: &str,
) -> ClientResult<()> {
    let service = session
        .service_mut(service_start)
        .ok_or(ClientError::DoesNotExist)?;

    let index = service
        .watchers
        .iter()
        .position(|w| w.name == sender && w.path == path)
        .ok_or(ClientError::NotAuthorized)?;

    let watcher = service.watchers.remove(index);
    debug!("{} unregistered watcher {} {}", service.path, sender, path);

    bus.remove_watch(watcher.watch);
    session.release(watcher.conn_ref);

    Ok(())
}

/// Drops the watcher installed under `watch`. Returns `false` if this
/// session has none.
pub(crate) fn exited(session: &mut ServiceSession, watch: WatchId) -> bool {
    let found = session.services.iter_mut().find_map(|service| {
        let index = service.watchers.iter().position(|w| w.watch == watch)?;
        debug!("{} watcher {} exited", service.path, service.watchers[index].name);
        Some(service.watchers.remove(index))
    });

    match found {
        Some(watcher) => {
            session.release(watcher.conn_ref);
            true
        }
        None => false,
    }
}
