//! Attribute connection handle
//!
//! One transport session shared by every query and watcher of a device. The
//! connection is kept alive by explicit references: each holder owns a
//! `ConnRef` and hands it back exactly once. Requests are serialized, one
//! in flight at a time.

use crate::att::constants::*;
use crate::att::pdu::{is_response_opcode, response_opcode, AttPacket, ErrorResponse};
use crate::att::{AttError, AttResult};
use crate::gatt::discovery::Query;
use crate::transport::AttTransport;
use log::{debug, trace, warn};
use std::collections::VecDeque;

/// One counted reference on an `AttribConnection`.
///
/// Not `Clone`: a reference is created by `acquire` and consumed by
/// `release`. A reference issued by a connection that has since been
/// destroyed is stale and releasing it changes nothing.
#[must_use]
#[derive(Debug, PartialEq, Eq)]
pub struct ConnRef {
    generation: u64,
}

impl ConnRef {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// A request waiting to go out or waiting for its response
#[derive(Debug)]
pub(crate) struct PendingQuery {
    pub query: Query,
    pub pdu: Vec<u8>,
    pub conn_ref: ConnRef,
}

impl PendingQuery {
    pub fn request_opcode(&self) -> u8 {
        self.pdu.first().copied().unwrap_or_default()
    }
}

#[derive(Debug)]
enum Outgoing {
    Request(PendingQuery),
    /// PDU that expects no response
    Command { pdu: Vec<u8>, conn_ref: ConnRef },
}

/// Work produced by the connection for its owner to finish
#[derive(Debug)]
pub(crate) enum Completion {
    /// A query ended, successfully or not. The continuation must run.
    Query(PendingQuery, AttResult<Vec<u8>>),
    /// A reference whose holder is done with it
    Release(ConnRef),
}

pub struct AttribConnection {
    transport: Box<dyn AttTransport>,
    generation: u64,
    refs: usize,
    /// Opened for unsolicited PDUs
    listen: bool,
    /// Transport reported connected
    ready: bool,
    /// Unsolicited opcodes with a registered handler
    events: Vec<u8>,
    outgoing: VecDeque<Outgoing>,
    in_flight: Option<PendingQuery>,
    disconnected: bool,
}

impl std::fmt::Debug for AttribConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttribConnection")
            .field("generation", &self.generation)
            .field("refs", &self.refs)
            .field("listen", &self.listen)
            .field("ready", &self.ready)
            .field("events", &self.events)
            .field("queued", &self.outgoing.len())
            .field("in_flight", &self.in_flight.is_some())
            .finish()
    }
}

impl AttribConnection {
    /// Wraps a freshly opened transport. The returned reference belongs to
    /// the caller.
    pub fn open(transport: Box<dyn AttTransport>, generation: u64, listen: bool) -> (Self, ConnRef) {
        debug!("Opening attribute connection (generation {})", generation);

        let conn = Self {
            transport,
            generation,
            refs: 1,
            listen,
            ready: false,
            events: Vec::new(),
            outgoing: VecDeque::new(),
            in_flight: None,
            disconnected: false,
        };

        (conn, ConnRef { generation })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn refs(&self) -> usize {
        self.refs
    }

    pub fn is_listen(&self) -> bool {
        self.listen
    }

    pub fn set_listen(&mut self) {
        self.listen = true;
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn set_ready(&mut self) {
        self.ready = true;
    }

    pub fn acquire(&mut self) -> ConnRef {
        self.refs += 1;
        trace!("Connection {} refs {}", self.generation, self.refs);
        ConnRef {
            generation: self.generation,
        }
    }

    /// Gives a reference back. Returns `true` when this was the last one and
    /// the connection must be destroyed.
    pub fn release(&mut self, conn_ref: ConnRef) -> bool {
        if conn_ref.generation != self.generation {
            debug!(
                "Ignoring stale reference (generation {}, current {})",
                conn_ref.generation, self.generation
            );
            return false;
        }

        self.refs = self.refs.saturating_sub(1);
        trace!("Connection {} refs {}", self.generation, self.refs);
        self.refs == 0
    }

    /// Queues a request. It goes out once the transport is ready and every
    /// earlier request has been answered.
    pub(crate) fn send_request(&mut self, query: Query, pdu: Vec<u8>, conn_ref: ConnRef) {
        trace!("Queueing request opcode 0x{:02X} for {:?}", pdu[0], query);
        self.outgoing.push_back(Outgoing::Request(PendingQuery {
            query,
            pdu,
            conn_ref,
        }));
    }

    /// Queues a PDU that gets no response. `conn_ref` is handed back as
    /// soon as the PDU has been transmitted.
    pub fn send_command(&mut self, pdu: Vec<u8>, conn_ref: ConnRef) {
        self.outgoing.push_back(Outgoing::Command { pdu, conn_ref });
    }

    /// Transmits immediately, bypassing the queue
    pub fn send_now(&mut self, pdu: &[u8]) {
        if let Err(e) = self.transport.send(pdu) {
            warn!("Failed to send opcode 0x{:02X}: {}", pdu[0], e);
        }
    }

    /// Registers a handler for an unsolicited opcode. Returns `false` when one
    /// is already registered.
    pub fn register_event(&mut self, opcode: u8) -> bool {
        if self.events.contains(&opcode) {
            return false;
        }

        debug!("Registered event opcode 0x{:02X}", opcode);
        self.events.push(opcode);
        true
    }

    pub fn has_event(&self, opcode: u8) -> bool {
        self.events.contains(&opcode)
    }

    /// Moves queued PDUs onto the transport while it is ready and no request
    /// is waiting for its response.
    pub(crate) fn pump(&mut self) -> Vec<Completion> {
        let mut completions = Vec::new();

        while self.ready && self.in_flight.is_none() {
            let Some(next) = self.outgoing.pop_front() else {
                break;
            };

            match next {
                Outgoing::Request(pending) => match self.transport.send(&pending.pdu) {
                    Ok(()) => {
                        trace!("Sent request opcode 0x{:02X}", pending.request_opcode());
                        self.in_flight = Some(pending);
                    }
                    Err(e) => {
                        warn!("Failed to send request: {}", e);
                        completions.push(Completion::Query(
                            pending,
                            Err(AttError::Transport(e.to_string())),
                        ));
                    }
                },
                Outgoing::Command { pdu, conn_ref } => {
                    if let Err(e) = self.transport.send(&pdu) {
                        warn!("Failed to send command opcode 0x{:02X}: {}", pdu[0], e);
                    }
                    completions.push(Completion::Release(conn_ref));
                }
            }
        }

        completions
    }

    /// Pairs a response PDU with the in-flight request.
    ///
    /// PDUs that cannot answer a request, such as server-initiated requests,
    /// are dropped and leave the in-flight request waiting.
    pub(crate) fn take_response(&mut self, pdu: &[u8]) -> Option<Completion> {
        if !is_response_opcode(pdu[0]) {
            debug!("Ignoring unsolicited opcode 0x{:02X}", pdu[0]);
            return None;
        }

        let Some(pending) = self.in_flight.take() else {
            warn!("Received opcode 0x{:02X} with no pending request", pdu[0]);
            return None;
        };

        let request_opcode = pending.request_opcode();
        let result = if pdu[0] == ATT_ERROR_RSP {
            match ErrorResponse::parse(pdu) {
                Ok(rsp) if rsp.request_opcode == request_opcode => {
                    debug!(
                        "Error response to opcode 0x{:02X}: {:?} on handle 0x{:04X}",
                        request_opcode,
                        rsp.error_code(),
                        rsp.handle
                    );
                    Err(rsp.into_error())
                }
                Ok(rsp) => {
                    warn!(
                        "Error response for opcode 0x{:02X}, but pending request is 0x{:02X}",
                        rsp.request_opcode, request_opcode
                    );
                    Err(AttError::InvalidPdu)
                }
                Err(e) => Err(e),
            }
        } else if response_opcode(request_opcode) == Some(pdu[0]) {
            Ok(pdu.to_vec())
        } else {
            warn!(
                "Received opcode 0x{:02X} while waiting for a response to 0x{:02X}",
                pdu[0], request_opcode
            );
            Err(AttError::InvalidPdu)
        };

        Some(Completion::Query(pending, result))
    }

    /// Records loss of the transport. Returns `false` if it was already seen.
    pub fn mark_disconnected(&mut self) -> bool {
        if self.disconnected {
            return false;
        }

        self.disconnected = true;
        self.ready = false;
        true
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    /// Swaps in a freshly opened transport after a disconnect. References,
    /// generation and listen mode carry over. Event handlers are installed
    /// again once the new transport is ready.
    pub fn reopen(&mut self, transport: Box<dyn AttTransport>) {
        debug!("Reopening attribute connection (generation {})", self.generation);
        self.transport.close();
        self.transport = transport;
        self.ready = false;
        self.disconnected = false;
        self.events.clear();
    }

    /// Completes every queued and in-flight request with `ConnectionGone`.
    /// Queued commands are dropped and their references handed back.
    pub(crate) fn fail_pending(&mut self) -> Vec<Completion> {
        let mut completions = Vec::new();

        if let Some(pending) = self.in_flight.take() {
            completions.push(Completion::Query(pending, Err(AttError::ConnectionGone)));
        }

        for outgoing in self.outgoing.drain(..) {
            match outgoing {
                Outgoing::Request(pending) => {
                    completions.push(Completion::Query(pending, Err(AttError::ConnectionGone)))
                }
                Outgoing::Command { pdu, conn_ref } => {
                    debug!("Dropping unsent command opcode 0x{:02X}", pdu[0]);
                    completions.push(Completion::Release(conn_ref));
                }
            }
        }

        completions
    }

    /// Closes the transport and fails every queued and in-flight request
    /// with `ConnectionGone`.
    pub(crate) fn shutdown(mut self) -> Vec<Completion> {
        debug!(
            "Destroying attribute connection (generation {})",
            self.generation
        );
        self.transport.close();
        self.fail_pending()
    }
}
