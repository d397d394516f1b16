//! CAN bus abstraction (C1).
//!
//! Wraps a single physical interface behind `send`/`recv` plus a
//! higher-level `request_response` that serializes a full round trip under
//! a per-bus mutex. Reply matching is positional (the next frame received
//! within the timeout), not ID-filtered — this mirrors the converter's
//! strict request/reply protocol in `original_source/ZEKA_EVI_gateway.py`'s
//! `zeka_request_response_cycle`.

use std::sync::Mutex;
use std::time::Duration;

use log::{trace, warn};
use socketcan::{CanFrame, CanSocket, EmbeddedFrame, Frame, Id, Socket, StandardId};

use crate::error::{BusName, GatewayError, GatewayResult};

const REPLY_TIMEOUT: Duration = Duration::from_secs(1);

/// A single CAN frame: an 11-bit arbitration ID plus up to 8 payload bytes.
/// `len` is the actual DLC; `data[len..]` is unused padding, not part of
/// the frame that goes on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawFrame {
    pub id: u16,
    pub data: [u8; 8],
    pub len: u8,
}

impl RawFrame {
    /// Builds a full 8-byte frame.
    pub fn new(id: u16, data: [u8; 8]) -> Self {
        RawFrame { id, data, len: 8 }
    }

    /// Builds a frame with a DLC shorter than 8, e.g. the supervisor
    /// heartbeat's single-byte NMT state frame.
    pub fn short(id: u16, payload: &[u8]) -> Self {
        debug_assert!(payload.len() <= 8);
        let mut data = [0u8; 8];
        data[..payload.len()].copy_from_slice(payload);
        RawFrame {
            id,
            data,
            len: payload.len() as u8,
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }
}

/// The physical transport a `Bus` drives. Abstracted so tests can run
/// without real sockets or root privileges.
pub trait CanTransport: Send {
    fn send_raw(&self, frame: &RawFrame) -> GatewayResult<()>;
    fn recv_raw(&self, timeout: Duration) -> GatewayResult<Option<RawFrame>>;
}

/// Real Linux SocketCAN transport.
pub struct SocketCanTransport {
    socket: CanSocket,
    bus: BusName,
}

impl SocketCanTransport {
    pub fn open(channel: &str, bus: BusName) -> GatewayResult<Self> {
        let socket = CanSocket::open(channel).map_err(|source| GatewayError::BusOpen {
            bus,
            source,
        })?;
        Ok(SocketCanTransport { socket, bus })
    }
}

impl CanTransport for SocketCanTransport {
    fn send_raw(&self, frame: &RawFrame) -> GatewayResult<()> {
        let id = StandardId::new(frame.id).ok_or(GatewayError::InitFailure(
            "arbitration id does not fit in 11 bits",
        ))?;
        let can_frame =
            CanFrame::new(Id::Standard(id), frame.payload()).ok_or(GatewayError::InitFailure(
                "frame payload longer than 8 bytes",
            ))?;
        trace!("{} bus: send {:03x} {:02x?}", self.bus, frame.id, frame.payload());
        self.socket
            .write_frame(&can_frame)
            .map_err(|source| GatewayError::BusSend {
                bus: self.bus,
                source,
            })
    }

    fn recv_raw(&self, timeout: Duration) -> GatewayResult<Option<RawFrame>> {
        self.socket
            .set_read_timeout(timeout)
            .map_err(|source| GatewayError::BusRecv {
                bus: self.bus,
                source,
            })?;
        match self.socket.read_frame() {
            Ok(frame) => {
                let id = match frame.id() {
                    Id::Standard(sid) => sid.as_raw(),
                    Id::Extended(eid) => eid.as_raw() as u16,
                };
                let payload = frame.data();
                trace!("{} bus: recv {:03x} {:02x?}", self.bus, id, payload);
                Ok(Some(RawFrame::short(id, payload)))
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(None),
            Err(source) => Err(GatewayError::BusRecv {
                bus: self.bus,
                source,
            }),
        }
    }
}

/// Mutex-guarded bus handle providing serialized request/response.
pub struct Bus {
    transport: Mutex<Box<dyn CanTransport>>,
    name: BusName,
}

impl Bus {
    pub fn new(transport: Box<dyn CanTransport>, name: BusName) -> Self {
        Bus {
            transport: Mutex::new(transport),
            name,
        }
    }

    pub fn send(&self, frame: RawFrame) -> GatewayResult<()> {
        let transport = self.transport.lock().expect("bus mutex poisoned");
        transport.send_raw(&frame)
    }

    pub fn recv(&self, timeout: Duration) -> GatewayResult<Option<RawFrame>> {
        let transport = self.transport.lock().expect("bus mutex poisoned");
        transport.recv_raw(timeout)
    }

    /// Sends `frame` then blocks for the next frame within the reply
    /// timeout, holding the bus mutex for the whole round trip so no two
    /// requests are ever in flight on this bus at once.
    pub fn request_response(&self, frame: RawFrame) -> GatewayResult<Option<RawFrame>> {
        let transport = self.transport.lock().expect("bus mutex poisoned");
        transport.send_raw(&frame)?;
        let reply = transport.recv_raw(REPLY_TIMEOUT)?;
        if reply.is_none() {
            warn!("{} bus: no reply to {:03x} within timeout", self.name, frame.id);
        }
        Ok(reply)
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    /// In-memory transport double: replays a scripted queue of replies and
    /// records every frame sent, for asserting ordering/serialization
    /// properties without real hardware.
    pub struct FakeTransport {
        pub replies: StdMutex<VecDeque<Option<RawFrame>>>,
        pub sent: StdMutex<Vec<RawFrame>>,
    }

    impl FakeTransport {
        pub fn new(replies: Vec<Option<RawFrame>>) -> Self {
            FakeTransport {
                replies: StdMutex::new(replies.into()),
                sent: StdMutex::new(Vec::new()),
            }
        }
    }

    impl CanTransport for FakeTransport {
        fn send_raw(&self, frame: &RawFrame) -> GatewayResult<()> {
            self.sent.lock().unwrap().push(*frame);
            Ok(())
        }

        fn recv_raw(&self, _timeout: Duration) -> GatewayResult<Option<RawFrame>> {
            Ok(self.replies.lock().unwrap().pop_front().flatten())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::FakeTransport;
    use super::*;

    #[test]
    fn request_response_sends_then_returns_next_frame() {
        let reply = RawFrame::new(0x10C, [0xA0, 1, 2, 3, 4, 5, 6, 7]);
        let transport = FakeTransport::new(vec![Some(reply)]);
        let bus = Bus::new(Box::new(transport), BusName::Converter);
        let request = RawFrame::new(0x109, [0xA0, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
        let got = bus.request_response(request).unwrap();
        assert_eq!(got, Some(reply));
    }

    #[test]
    fn missing_reply_is_not_an_error() {
        let transport = FakeTransport::new(vec![None]);
        let bus = Bus::new(Box::new(transport), BusName::Converter);
        let request = RawFrame::new(0x109, [0; 8]);
        let got = bus.request_response(request).unwrap();
        assert_eq!(got, None);
    }

    #[test]
    fn short_frame_has_a_truncated_payload() {
        let frame = RawFrame::short(0x700, &[0x05]);
        assert_eq!(frame.len, 1);
        assert_eq!(frame.payload(), &[0x05]);
    }
}
