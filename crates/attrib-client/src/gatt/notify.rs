//! Handle Value Notification and Indication dispatch

use super::session::ServiceSession;
use crate::att::pdu::{HandleValueConfirmation, HandleValueEvent};
use crate::error::ClientResult;
use crate::surface::WatcherBus;
use log::{debug, warn};

/// Applies an unsolicited value PDU to the cached tree and fans it out to
/// the watchers of the owning service.
///
/// Indications for a known handle are confirmed before anything else.
/// Events for unknown handles are dropped without a confirmation.
pub(crate) fn dispatch(
    session: &mut ServiceSession,
    bus: &mut dyn WatcherBus,
    pdu: &[u8],
) -> ClientResult<()> {
    let event = match HandleValueEvent::parse(pdu) {
        Ok(event) => event,
        Err(_) => {
            debug!("Ignoring malformed handle value PDU");
            return Ok(());
        }
    };

    let found = session.services.iter().enumerate().find_map(|(s, service)| {
        service
            .characteristics
            .iter()
            .position(|c| c.handle == event.handle)
            .map(|c| (s, c))
    });

    let Some((s, c)) = found else {
        debug!("Attribute handle 0x{:04x} not found", event.handle);
        return Ok(());
    };

    if event.indication {
        if let Some(conn) = session.connection.as_mut() {
            conn.send_now(&HandleValueConfirmation.serialize());
        }
    }

    let service = &mut session.services[s];
    let chr = &mut service.characteristics[c];
    if let Err(e) = chr.set_value(&event.value) {
        warn!("Can't change characteristic 0x{:04x}", event.handle);
        return Err(e);
    }

    for watcher in &service.watchers {
        bus.value_changed(&watcher.name, &watcher.path, &chr.path, &event.value);
    }

    Ok(())
}
