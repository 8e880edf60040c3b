//! OpenFlow application interface shim.
//!
//! Switch events reach the application over the messenger on the
//! `<service_name>.ofa` service. This module decodes the event frames and
//! routes them to the typed handlers the application registered; the
//! lifecycle coordinator consults
//! [`openflow_application_interface_is_initialized`] during teardown so an
//! initialised interface is finalised before the messenger goes away.
//!
//! Event wire format, after the messenger's own tag header:
//!
//! - switch ready / disconnected: 8-byte big-endian dpid
//! - packet-in: 8-byte dpid, 2-byte ingress port, then the raw packet

use std::sync::Arc;

use parking_lot::Mutex;
use switchyard_buffer::Buffer;

use crate::{lifecycle, messenger};

/// Tag of switch-ready events.
pub const SWITCH_READY_TAG: u16 = 0x0001;

/// Tag of switch-disconnected events.
pub const SWITCH_DISCONNECTED_TAG: u16 = 0x0002;

/// Tag of packet-in events.
pub const PACKET_IN_TAG: u16 = 0x0003;

/// Suffix appended to the service name for the event channel.
const SERVICE_SUFFIX: &str = "ofa";

/// A packet a switch forwarded to the controller.
#[derive(Debug)]
pub struct PacketIn {
    /// Switch that forwarded the packet.
    pub dpid: u64,
    /// Port the packet arrived on.
    pub in_port: u16,
    /// The raw packet bytes.
    pub data: Buffer,
}

/// Handler invoked when a switch completes its handshake.
pub type SwitchHandler = Arc<dyn Fn(u64) + Send + Sync>;

/// Handler invoked for each packet-in.
pub type PacketInHandler = Arc<dyn Fn(PacketIn) + Send + Sync>;

/// The application's switch-event handlers. Unset handlers drop their
/// events silently.
#[derive(Clone, Default)]
pub struct SwitchEventHandlers {
    /// Called with the dpid of each newly ready switch.
    pub switch_ready: Option<SwitchHandler>,
    /// Called with the dpid of each disconnected switch.
    pub switch_disconnected: Option<SwitchHandler>,
    /// Called for each packet forwarded to the controller.
    pub packet_in: Option<PacketInHandler>,
}

struct OpenflowInterface {
    handlers: SwitchEventHandlers,
    service: String,
}

static OPENFLOW: Mutex<Option<OpenflowInterface>> = Mutex::new(None);

/// Register `handlers` for switch events.
///
/// Requires an initialised runtime (the event channel is named after the
/// service). Returns false when already initialised or when the messenger
/// refuses the registration.
pub fn init_openflow_application_interface(handlers: SwitchEventHandlers) -> bool {
    let service = format!("{}.{SERVICE_SUFFIX}", lifecycle::service_name());

    let mut guard = OPENFLOW.lock();
    if guard.is_some() {
        tracing::warn!("the openflow application interface is already initialized");
        return false;
    }
    if !messenger::add_message_received_callback(&service, handle_switch_event) {
        return false;
    }
    *guard = Some(OpenflowInterface { handlers, service });
    true
}

/// Whether switch-event handlers are registered.
#[must_use]
pub fn openflow_application_interface_is_initialized() -> bool {
    OPENFLOW.lock().is_some()
}

/// Drop the registered handlers and leave the event channel.
///
/// Returns false when the interface was not initialised.
pub fn finalize_openflow_application_interface() -> bool {
    let removed = { OPENFLOW.lock().take() };
    match removed {
        Some(interface) => {
            messenger::delete_message_received_callback(&interface.service);
            true
        }
        None => false,
    }
}

pub(crate) fn finalize_if_initialized() {
    if openflow_application_interface_is_initialized() {
        finalize_openflow_application_interface();
    }
}

fn handle_switch_event(tag: u16, data: &Buffer) {
    let handlers = { OPENFLOW.lock().as_ref().map(|interface| interface.handlers.clone()) };
    let Some(handlers) = handlers else { return };

    match tag {
        SWITCH_READY_TAG => match decode_dpid(data) {
            Some(dpid) => {
                if let Some(handler) = &handlers.switch_ready {
                    handler(dpid);
                }
            }
            None => tracing::warn!("malformed switch-ready event dropped"),
        },
        SWITCH_DISCONNECTED_TAG => match decode_dpid(data) {
            Some(dpid) => {
                if let Some(handler) = &handlers.switch_disconnected {
                    handler(dpid);
                }
            }
            None => tracing::warn!("malformed switch-disconnected event dropped"),
        },
        PACKET_IN_TAG => match decode_packet_in(data) {
            Some(packet_in) => {
                if let Some(handler) = &handlers.packet_in {
                    handler(packet_in);
                }
            }
            None => tracing::warn!("malformed packet-in event dropped"),
        },
        _ => tracing::debug!(tag, "unhandled switch event"),
    }
}

fn decode_dpid(data: &Buffer) -> Option<u64> {
    let payload = data.payload();
    let bytes: [u8; 8] = payload.get(..8)?.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}

/// Split a packet-in frame into its addressing fields and packet bytes.
/// The caller's buffer is left untouched; the returned packet data is a
/// copy with the addressing prefix trimmed away.
fn decode_packet_in(data: &Buffer) -> Option<PacketIn> {
    let (dpid, in_port) = {
        let payload = data.payload();
        let dpid_bytes: [u8; 8] = payload.get(..8)?.try_into().ok()?;
        let port_bytes: [u8; 2] = payload.get(8..10)?.try_into().ok()?;
        (u64::from_be_bytes(dpid_bytes), u16::from_be_bytes(port_bytes))
    };

    let packet = data.duplicate();
    drop(packet.trim_front(10));
    Some(PacketIn { dpid, in_port, data: packet })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::SERIAL;

    fn event(dpid: u64, rest: &[u8]) -> Buffer {
        let buffer = Buffer::new();
        buffer.append_bytes(&dpid.to_be_bytes());
        if !rest.is_empty() {
            buffer.append_bytes(rest);
        }
        buffer
    }

    #[test]
    fn dpid_events_decode_the_big_endian_dpid() {
        let buffer = event(0x1122_3344_5566_7788, &[]);

        assert_eq!(decode_dpid(&buffer), Some(0x1122_3344_5566_7788));
    }

    #[test]
    fn short_events_are_rejected() {
        let buffer = Buffer::new();
        buffer.append_bytes(&[1, 2, 3]);

        assert!(decode_dpid(&buffer).is_none());
        assert!(decode_packet_in(&buffer).is_none());
    }

    #[test]
    fn packet_in_splits_addressing_from_packet_bytes() {
        let buffer = event(9, &[0x00, 0x07, 0xca, 0xfe]);

        let packet_in = decode_packet_in(&buffer).unwrap();

        assert_eq!(packet_in.dpid, 9);
        assert_eq!(packet_in.in_port, 7);
        assert_eq!(packet_in.data.to_vec(), vec![0xca, 0xfe]);
        // The source buffer still carries the full event.
        assert_eq!(buffer.len(), 12);
    }

    #[test]
    fn packet_in_with_empty_packet_is_valid() {
        let buffer = event(3, &[0x00, 0x01]);

        let packet_in = decode_packet_in(&buffer).unwrap();

        assert_eq!(packet_in.in_port, 1);
        assert!(packet_in.data.is_empty());
    }

    #[test]
    fn dispatch_routes_events_to_the_registered_handlers() {
        let _guard = SERIAL.lock();

        let ready: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(Vec::new()));
        let packets: Arc<Mutex<Vec<(u64, u16, Vec<u8>)>>> = Arc::new(Mutex::new(Vec::new()));
        let ready_sink = Arc::clone(&ready);
        let packet_sink = Arc::clone(&packets);

        *OPENFLOW.lock() = Some(OpenflowInterface {
            handlers: SwitchEventHandlers {
                switch_ready: Some(Arc::new(move |dpid| ready_sink.lock().push(dpid))),
                switch_disconnected: None,
                packet_in: Some(Arc::new(move |packet_in: PacketIn| {
                    packet_sink.lock().push((
                        packet_in.dpid,
                        packet_in.in_port,
                        packet_in.data.to_vec(),
                    ));
                })),
            },
            service: "test.ofa".to_string(),
        });

        handle_switch_event(SWITCH_READY_TAG, &event(5, &[]));
        handle_switch_event(SWITCH_DISCONNECTED_TAG, &event(5, &[]));
        handle_switch_event(PACKET_IN_TAG, &event(6, &[0x00, 0x02, 0xaa]));
        handle_switch_event(0x7777, &event(5, &[]));

        assert_eq!(ready.lock().clone(), vec![5]);
        assert_eq!(packets.lock().clone(), vec![(6, 2, vec![0xaa])]);

        *OPENFLOW.lock() = None;
    }
}
