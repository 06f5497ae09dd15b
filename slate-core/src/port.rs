//! The memory port protocol between a tile core and its memory hierarchy.

use crate::dram::Dram;
use std::fmt::Debug;

/// Capability set a tile core requires from its memory.
///
/// The port carries two independent paths:
///
/// - **Synchronous helpers** ([`read32`](Self::read32)/[`write32`](Self::write32)) used by the
///   loader, the debugger, and accelerators. These act on the backing store immediately and must
///   not disturb the timed channel. The core never interleaves them with a pending request.
/// - **Timed request/response channel** used by the core's fetch and data accesses. At most one
///   transaction is outstanding: [`can_request`](Self::can_request) is `true` iff nothing is in
///   flight *and* no response is latched. A request issued on cycle `t` with latency `L`
///   produces a valid response no earlier than cycle `t + L`, and the response persists until
///   [`resp_consume`](Self::resp_consume) is called. Write responses carry data 0 and must still
///   be consumed.
///
/// Issuing a request while `can_request()` is `false` is a protocol violation; implementations
/// must fail loudly (panic) rather than silently dropping either transaction.
pub trait MemoryPort: Debug {
    /// Synchronously read the 32-bit word at `addr`.
    fn read32(&mut self, addr: u32) -> u32;

    /// Synchronously write a 32-bit word to `addr`.
    fn write32(&mut self, addr: u32, value: u32);

    /// Advance the port one time step.
    fn cycle(&mut self);

    /// Returns `true` when a new timed request may be issued.
    fn can_request(&self) -> bool;

    /// Initiate a timed read of the word at `addr`.
    fn request_read32(&mut self, addr: u32);

    /// Initiate a timed write of `value` to `addr`.
    fn request_write32(&mut self, addr: u32, value: u32);

    /// Returns `true` while a response is latched.
    fn resp_valid(&self) -> bool;

    /// The data of the latched response (0 for writes).
    fn resp_data(&self) -> u32;

    /// Dismiss the latched response, freeing the port for the next request.
    fn resp_consume(&mut self);
}

/// Direct DRAM adapter: a [`MemoryPort`] that services every request against the backing
/// [`Dram`] in the cycle it is issued.
///
/// The request/response handshake is preserved (a one-entry response latch that must be
/// consumed), so a core driving this port still sees the same protocol as with a timed port,
/// just with no added latency.
#[derive(Debug)]
pub struct DirectPort {
    dram: Dram,
    resp_valid: bool,
    resp_data: u32,
}

impl DirectPort {
    pub fn new(dram: Dram) -> Self {
        Self {
            dram,
            resp_valid: false,
            resp_data: 0,
        }
    }

    /// Access the backing DRAM, e.g. for allocation or bulk preloading.
    pub fn dram(&self) -> &Dram {
        &self.dram
    }

    /// Mutable access to the backing DRAM.
    pub fn dram_mut(&mut self) -> &mut Dram {
        &mut self.dram
    }
}

impl MemoryPort for DirectPort {
    fn read32(&mut self, addr: u32) -> u32 {
        self.dram.read_u32(addr)
    }

    fn write32(&mut self, addr: u32, value: u32) {
        self.dram.write_u32(addr, value);
    }

    fn cycle(&mut self) {}

    fn can_request(&self) -> bool {
        !self.resp_valid
    }

    fn request_read32(&mut self, addr: u32) {
        assert!(self.can_request(), "read request issued while busy");
        self.resp_data = self.dram.read_u32(addr);
        self.resp_valid = true;
    }

    fn request_write32(&mut self, addr: u32, value: u32) {
        assert!(self.can_request(), "write request issued while busy");
        self.dram.write_u32(addr, value);
        self.resp_data = 0;
        self.resp_valid = true;
    }

    fn resp_valid(&self) -> bool {
        self.resp_valid
    }

    fn resp_data(&self) -> u32 {
        self.resp_data
    }

    fn resp_consume(&mut self) {
        self.resp_valid = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_port_read_round_trip() {
        let mut port = DirectPort::new(Dram::new());
        port.write32(0x20, 0xCAFE_F00D);
        assert_eq!(0xCAFE_F00D, port.read32(0x20));
    }

    #[test]
    fn test_direct_port_request_response() {
        let mut port = DirectPort::new(Dram::new());
        port.write32(0x40, 7);
        assert!(port.can_request());
        port.request_read32(0x40);
        // Serviced immediately, but the latch still gates new requests.
        assert!(port.resp_valid());
        assert!(!port.can_request());
        assert_eq!(7, port.resp_data());
        port.resp_consume();
        assert!(port.can_request());
    }

    #[test]
    fn test_direct_port_write_response_is_zero() {
        let mut port = DirectPort::new(Dram::new());
        port.request_write32(0x44, 99);
        assert!(port.resp_valid());
        assert_eq!(0, port.resp_data());
        port.resp_consume();
        assert_eq!(99, port.read32(0x44));
    }

    #[test]
    #[should_panic(expected = "busy")]
    fn test_direct_port_rejects_double_request() {
        let mut port = DirectPort::new(Dram::new());
        port.request_read32(0);
        port.request_read32(4);
    }
}
