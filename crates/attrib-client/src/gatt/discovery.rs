//! Discovery protocol engine
//!
//! Each in-flight request carries a `Query` naming what its response
//! continues: the primary service pages, one characteristic chain per
//! service, descriptor pages and single reads. Services are addressed by
//! start handle and characteristics by value handle, so a query whose target
//! has disappeared only hands back its reference.

use super::cache;
use super::session::{DiscoveryState, ServiceSession};
use super::types::{Characteristic, CharacteristicProperties, PresentationFormat, PrimaryService};
use crate::att::constants::*;
use crate::att::pdu::{
    AttPacket, FindInformationRequest, FindInformationResponse, HandleUuidPair, ReadByGroupTypeRequest,
    ReadByGroupTypeResponse, ReadByTypeRequest, ReadByTypeResponse, ReadRequest,
};
use crate::att::{AttError, AttResult};
use crate::config::ClientConfig;
use crate::connection::{ConnRef, PendingQuery};
use crate::storage::DeviceStorage;
use crate::surface::{Capability, ObjectRegistry};
use crate::uuid::Uuid;
use log::{debug, error, info, trace, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// Read By Group Type page starting at `start`
    PrimaryServices { start: u16 },
    /// Read By Type page of one service's characteristic declarations
    Characteristics { service: u16, start: u16 },
    /// Find Information page over one characteristic's descriptors
    Descriptors {
        service: u16,
        characteristic: u16,
        start: u16,
        end: u16,
    },
    UserDescription {
        service: u16,
        characteristic: u16,
        handle: u16,
    },
    PresentationFormat {
        service: u16,
        characteristic: u16,
        handle: u16,
    },
    Value { service: u16, characteristic: u16 },
}

/// Collaborators the engine writes to while handling responses
pub(crate) struct Engine<'a> {
    pub storage: &'a mut dyn DeviceStorage,
    pub registry: &'a mut dyn ObjectRegistry,
    pub config: &'a ClientConfig,
}

fn request(session: &mut ServiceSession, query: Query, pdu: Vec<u8>, conn_ref: ConnRef) {
    session.discovery_pending += 1;
    session.send_request(query, pdu, conn_ref);
}

/// Starts primary service discovery over the whole handle range
pub(crate) fn start_primary(session: &mut ServiceSession, conn_ref: ConnRef) {
    info!("Discovering primary services of {}", session.remote);
    session.state = DiscoveryState::DiscoveringPrimary;

    request(
        session,
        Query::PrimaryServices {
            start: ATT_HANDLE_MIN,
        },
        ReadByGroupTypeRequest::primary_services(ATT_HANDLE_MIN).serialize(),
        conn_ref,
    );
}

/// Publishes every service object of the session
pub(crate) fn publish_services(session: &ServiceSession, registry: &mut dyn ObjectRegistry) {
    for service in &session.services {
        registry.register_object(&service.path, Capability::Service);
        debug!("Registered: {}", service.path);
        registry.device_service_added(&session.device, &service.path);
    }
}

/// Publishes the characteristic objects of one service
pub(crate) fn publish_characteristics(service: &PrimaryService, registry: &mut dyn ObjectRegistry) {
    for chr in &service.characteristics {
        registry.register_object(&chr.path, Capability::Characteristic);
        debug!("Registered: {}", chr.path);
    }
}

/// Runs the continuation of a completed query
pub(crate) fn complete(
    session: &mut ServiceSession,
    engine: &mut Engine<'_>,
    pending: PendingQuery,
    result: AttResult<Vec<u8>>,
) {
    let PendingQuery {
        query, conn_ref, ..
    } = pending;

    session.discovery_pending = session.discovery_pending.saturating_sub(1);

    if matches!(result, Err(AttError::ConnectionGone | AttError::Transport(_))) {
        debug!("{:?} ended: {:?}", query, result);
        session.state = DiscoveryState::Failed;
        session.release(conn_ref);
        return;
    }

    match query {
        Query::PrimaryServices { start } => primary_complete(session, engine, start, conn_ref, result),
        Query::Characteristics { service, start } => {
            characteristics_complete(session, engine, service, start, conn_ref, result)
        }
        Query::Descriptors {
            service,
            characteristic,
            start,
            end,
        } => descriptors_complete(session, service, characteristic, start, end, conn_ref, result),
        Query::UserDescription {
            service,
            characteristic,
            handle,
        } => {
            if let Ok(pdu) = result {
                update_description(session, engine, service, characteristic, handle, &pdu[1..]);
            }
            session.release(conn_ref);
        }
        Query::PresentationFormat {
            service,
            characteristic,
            handle,
        } => {
            if let Ok(pdu) = result {
                update_format(session, engine, service, characteristic, handle, &pdu[1..]);
            }
            session.release(conn_ref);
        }
        Query::Value {
            service,
            characteristic,
        } => {
            if let Ok(pdu) = result {
                if let Some(chr) = session
                    .service_mut(service)
                    .and_then(|s| s.characteristic_mut(characteristic))
                {
                    if chr.set_value(&pdu[1..]).is_err() {
                        warn!("Can't change characteristic 0x{:04X}", characteristic);
                    }
                }
            }
            session.release(conn_ref);
        }
    }

    if session.discovery_pending == 0
        && matches!(
            session.state,
            DiscoveryState::DiscoveringPrimary
                | DiscoveryState::DiscoveringCharacteristics
                | DiscoveryState::DiscoveringDescriptors
        )
    {
        info!("Discovery of {} complete", session.remote);
        session.state = DiscoveryState::Ready;
    }
}

fn primary_complete(
    session: &mut ServiceSession,
    engine: &mut Engine<'_>,
    start: u16,
    conn_ref: ConnRef,
    result: AttResult<Vec<u8>>,
) {
    let pdu = match result {
        Ok(pdu) => pdu,
        Err(e) if e.is_attribute_not_found() => {
            primary_finished(session, engine, conn_ref);
            return;
        }
        Err(e) => {
            error!("Discover all primary services failed: {}", e);
            session.state = DiscoveryState::Failed;
            session.release(conn_ref);
            return;
        }
    };

    let rsp = match ReadByGroupTypeResponse::parse(&pdu) {
        Ok(rsp) => rsp,
        Err(_) => {
            error!("Protocol error in Read By Group Type response");
            session.state = DiscoveryState::Failed;
            session.release(conn_ref);
            return;
        }
    };

    trace!("Read By Group Type response with {} entries", rsp.data.len());

    let mut last_end = 0u16;
    for entry in &rsp.data {
        last_end = last_end.max(entry.end_group_handle);

        if entry.handle > entry.end_group_handle || entry.handle < start {
            warn!(
                "Skipping service with invalid range 0x{:04X}-0x{:04X}",
                entry.handle, entry.end_group_handle
            );
            continue;
        }

        if session.services.iter().any(|s| entry.handle <= s.end && s.start <= entry.end_group_handle) {
            warn!(
                "Skipping service 0x{:04X}-0x{:04X} overlapping a known service",
                entry.handle, entry.end_group_handle
            );
            continue;
        }

        let Some(uuid) = Uuid::try_from_slice_le(&entry.value) else {
            warn!("Invalid UUID found in group response");
            continue;
        };

        debug!(
            "Primary service {} at 0x{:04X}-0x{:04X}",
            uuid, entry.handle, entry.end_group_handle
        );
        let service = PrimaryService::new(&session.device, entry.handle, entry.end_group_handle, uuid);
        session.services.push(service);
    }

    if last_end == ATT_HANDLE_MAX || last_end < start {
        primary_finished(session, engine, conn_ref);
        return;
    }

    let next = last_end + 1;
    request(
        session,
        Query::PrimaryServices { start: next },
        ReadByGroupTypeRequest::primary_services(next).serialize(),
        conn_ref,
    );
}

fn primary_finished(session: &mut ServiceSession, engine: &mut Engine<'_>, conn_ref: ConnRef) {
    if session.services.is_empty() {
        info!("No primary services found on {}", session.remote);
        session.release(conn_ref);
        return;
    }

    if let Err(e) = cache::store_services(session, engine.storage) {
        warn!("Failed to store services: {}", e);
    }
    publish_services(session, engine.registry);

    session.state = DiscoveryState::DiscoveringCharacteristics;

    let ranges: Vec<(u16, u16)> = session.services.iter().map(|s| (s.start, s.end)).collect();
    for (start, end) in ranges {
        let Some(chain_ref) = session.acquire() else {
            break;
        };
        request(
            session,
            Query::Characteristics {
                service: start,
                start,
            },
            ReadByTypeRequest::characteristics(start, end).serialize(),
            chain_ref,
        );
    }

    session.release(conn_ref);
}

fn characteristics_complete(
    session: &mut ServiceSession,
    engine: &mut Engine<'_>,
    service_start: u16,
    start: u16,
    conn_ref: ConnRef,
    result: AttResult<Vec<u8>>,
) {
    let pdu = match result {
        Ok(pdu) => pdu,
        Err(e) if e.is_attribute_not_found() => {
            characteristics_finished(session, engine, service_start, conn_ref);
            return;
        }
        Err(e) => {
            debug!("Discover all characteristics failed: {}", e);
            session.release(conn_ref);
            return;
        }
    };

    let rsp = match ReadByTypeResponse::parse(&pdu) {
        Ok(rsp) if rsp.length == ATT_CHAR_DECL_LEN_16 || rsp.length == ATT_CHAR_DECL_LEN_128 => rsp,
        _ => {
            warn!("Protocol error in characteristic declarations of service 0x{:04X}", service_start);
            session.release(conn_ref);
            return;
        }
    };

    let Some(service) = session.service_mut(service_start) else {
        session.release(conn_ref);
        return;
    };

    let mut last = 0u16;
    for decl in &rsp.data {
        let properties = CharacteristicProperties::from_bits_retain(decl.value[0]);
        let handle = u16::from_le_bytes([decl.value[1], decl.value[2]]);
        let Some(uuid) = Uuid::try_from_slice_le(&decl.value[3..]) else {
            continue;
        };

        if handle <= last || !service.contains(handle) {
            warn!("Skipping characteristic with value handle 0x{:04X}", handle);
            continue;
        }

        if let Some(previous) = service.characteristics.last_mut() {
            previous.end = decl.handle.saturating_sub(1);
        }

        trace!("Characteristic {} at 0x{:04X}", uuid, handle);
        let chr = Characteristic::new(&service.path, handle, service.end, properties, uuid);
        service.characteristics.push(chr);
        last = handle;
    }

    let service_end = service.end;
    if last == 0 || last < start || last >= service_end {
        characteristics_finished(session, engine, service_start, conn_ref);
        return;
    }

    let next = last + 1;
    request(
        session,
        Query::Characteristics {
            service: service_start,
            start: next,
        },
        ReadByTypeRequest::characteristics(next, service_end).serialize(),
        conn_ref,
    );
}

fn characteristics_finished(
    session: &mut ServiceSession,
    engine: &mut Engine<'_>,
    service_start: u16,
    conn_ref: ConnRef,
) {
    if let Err(e) = cache::store_characteristics(session, service_start, engine.storage) {
        warn!("Failed to store characteristics: {}", e);
    }

    let Some(service) = session.service(service_start) else {
        session.release(conn_ref);
        return;
    };
    publish_characteristics(service, engine.registry);

    let targets: Vec<(u16, u16)> = service.characteristics.iter().map(|c| (c.handle, c.end)).collect();

    if session.state == DiscoveryState::DiscoveringCharacteristics {
        session.state = DiscoveryState::DiscoveringDescriptors;
    }

    for (handle, end) in targets {
        if engine.config.discover_descriptors && handle < end {
            if let Some(desc_ref) = session.acquire() {
                request(
                    session,
                    Query::Descriptors {
                        service: service_start,
                        characteristic: handle,
                        start: handle + 1,
                        end,
                    },
                    FindInformationRequest {
                        start_handle: handle + 1,
                        end_handle: end,
                    }
                    .serialize(),
                    desc_ref,
                );
            }
        }

        if engine.config.read_values {
            if let Some(value_ref) = session.acquire() {
                request(
                    session,
                    Query::Value {
                        service: service_start,
                        characteristic: handle,
                    },
                    ReadRequest { handle }.serialize(),
                    value_ref,
                );
            }
        }
    }

    session.release(conn_ref);
}

fn descriptors_complete(
    session: &mut ServiceSession,
    service: u16,
    characteristic: u16,
    start: u16,
    end: u16,
    conn_ref: ConnRef,
    result: AttResult<Vec<u8>>,
) {
    let rsp = match result.and_then(|pdu| FindInformationResponse::parse(&pdu)) {
        Ok(rsp) => rsp,
        Err(e) => {
            trace!("Find Information for 0x{:04X} ended: {}", characteristic, e);
            session.release(conn_ref);
            return;
        }
    };

    trace!("Find Information response received");

    let mut last = 0u16;
    for pair in &rsp.information_data {
        let handle = pair.handle();
        last = last.max(handle);

        // Only 16-bit descriptor types are of interest
        let HandleUuidPair::Uuid16(_, uuid16) = pair else {
            continue;
        };

        let query = match *uuid16 {
            CHAR_USER_DESC_UUID => Query::UserDescription {
                service,
                characteristic,
                handle,
            },
            CHAR_FORMAT_UUID => Query::PresentationFormat {
                service,
                characteristic,
                handle,
            },
            _ => continue,
        };

        if let Some(read_ref) = session.acquire() {
            request(session, query, ReadRequest { handle }.serialize(), read_ref);
        }
    }

    if last >= start && last < end {
        let next = last + 1;
        request(
            session,
            Query::Descriptors {
                service,
                characteristic,
                start: next,
                end,
            },
            FindInformationRequest {
                start_handle: next,
                end_handle: end,
            }
            .serialize(),
            conn_ref,
        );
    } else {
        session.release(conn_ref);
    }
}

fn update_description(
    session: &mut ServiceSession,
    engine: &mut Engine<'_>,
    service: u16,
    characteristic: u16,
    handle: u16,
    value: &[u8],
) {
    let Some(chr) = session
        .service_mut(service)
        .and_then(|s| s.characteristic_mut(characteristic))
    else {
        return;
    };

    chr.description = Some(cache::description_from_bytes(value));

    if let Err(e) = cache::store_attribute(session, engine.storage, handle, CHAR_USER_DESC_UUID, value) {
        warn!("Failed to store user description: {}", e);
    }
}

fn update_format(
    session: &mut ServiceSession,
    engine: &mut Engine<'_>,
    service: u16,
    characteristic: u16,
    handle: u16,
    value: &[u8],
) {
    let Some(format) = PresentationFormat::parse(value) else {
        debug!("Presentation format of 0x{:04X} too short", characteristic);
        return;
    };

    let Some(chr) = session
        .service_mut(service)
        .and_then(|s| s.characteristic_mut(characteristic))
    else {
        return;
    };

    chr.format = Some(format);

    if let Err(e) = cache::store_attribute(session, engine.storage, handle, CHAR_FORMAT_UUID, &format.to_bytes()) {
        warn!("Failed to store presentation format: {}", e);
    }
}
