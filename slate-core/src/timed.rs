//! Fixed-latency memory port wrapper.

use crate::port::MemoryPort;
use log::trace;

/// A [`MemoryPort`] that sits in front of a backing port and forces every timed transaction to
/// take a fixed number of cycles before its response appears.
///
/// Only one transaction can be outstanding. The countdown starts at `latency` when a request is
/// accepted and is decremented once per [`cycle`](MemoryPort::cycle); when it reaches zero the
/// transaction is serviced against the backing port and the response latched. The request cycle
/// and the service cycle are distinct, so even `latency == 0` needs one `cycle()` call before
/// the response shows up.
///
/// The synchronous [`read32`](MemoryPort::read32)/[`write32`](MemoryPort::write32) helpers pass
/// straight through to the backing port with no delay, for loader/debugger/accelerator use.
#[derive(Debug)]
pub struct TimedPort<P> {
    backing: P,
    latency: u32,
    in_flight: bool,
    is_write: bool,
    req_addr: u32,
    req_wdata: u32,
    countdown: u32,
    resp_valid: bool,
    resp_data: u32,
}

impl<P: MemoryPort> TimedPort<P> {
    pub fn new(backing: P, latency: u32) -> Self {
        Self {
            backing,
            latency,
            in_flight: false,
            is_write: false,
            req_addr: 0,
            req_wdata: 0,
            countdown: 0,
            resp_valid: false,
            resp_data: 0,
        }
    }

    /// Change the latency. Applies to the next accepted request; an in-flight transaction keeps
    /// its original countdown.
    pub fn set_latency(&mut self, latency: u32) {
        self.latency = latency;
    }

    pub fn latency(&self) -> u32 {
        self.latency
    }

    /// Access the backing port.
    pub fn backing(&self) -> &P {
        &self.backing
    }

    /// Mutable access to the backing port.
    pub fn backing_mut(&mut self) -> &mut P {
        &mut self.backing
    }
}

impl<P: MemoryPort> MemoryPort for TimedPort<P> {
    fn read32(&mut self, addr: u32) -> u32 {
        self.backing.read32(addr)
    }

    fn write32(&mut self, addr: u32, value: u32) {
        self.backing.write32(addr, value);
    }

    fn cycle(&mut self) {
        if self.in_flight && self.countdown > 0 {
            self.countdown -= 1;
        }
        if self.in_flight && self.countdown == 0 && !self.resp_valid {
            if self.is_write {
                self.backing.write32(self.req_addr, self.req_wdata);
                self.resp_data = 0;
            } else {
                self.resp_data = self.backing.read32(self.req_addr);
            }
            trace!(
                "timed port: serviced {} addr={:#010x} data={:#010x}",
                if self.is_write { "write" } else { "read" },
                self.req_addr,
                self.resp_data
            );
            self.resp_valid = true;
            self.in_flight = false;
        }
    }

    fn can_request(&self) -> bool {
        !self.in_flight && !self.resp_valid
    }

    fn request_read32(&mut self, addr: u32) {
        assert!(self.can_request(), "timed read request issued while busy");
        self.in_flight = true;
        self.is_write = false;
        self.req_addr = addr;
        self.countdown = self.latency;
    }

    fn request_write32(&mut self, addr: u32, value: u32) {
        assert!(self.can_request(), "timed write request issued while busy");
        self.in_flight = true;
        self.is_write = true;
        self.req_addr = addr;
        self.req_wdata = value;
        self.countdown = self.latency;
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
    use crate::dram::Dram;
    use crate::port::DirectPort;

    fn port(latency: u32) -> TimedPort<DirectPort> {
        TimedPort::new(DirectPort::new(Dram::new()), latency)
    }

    #[test]
    fn test_read_takes_latency_cycles() {
        let mut port = port(2);
        port.write32(0x80, 0x1234);
        port.request_read32(0x80);
        assert!(!port.resp_valid());
        port.cycle(); // countdown 2 -> 1
        assert!(!port.resp_valid());
        port.cycle(); // countdown 1 -> 0, serviced
        assert!(port.resp_valid());
        assert_eq!(0x1234, port.resp_data());
    }

    #[test]
    fn test_latency_zero_still_takes_one_cycle() {
        let mut port = port(0);
        port.write32(0x80, 5);
        port.request_read32(0x80);
        assert!(!port.resp_valid());
        port.cycle();
        assert!(port.resp_valid());
        assert_eq!(5, port.resp_data());
    }

    #[test]
    fn test_write_deferred_until_serviced() {
        let mut port = port(3);
        port.request_write32(0x90, 0xABCD);
        // The backing store must not see the write until the countdown expires.
        assert_eq!(0, port.backing().dram().read_u32(0x90));
        for _ in 0..3 {
            port.cycle();
        }
        assert!(port.resp_valid());
        assert_eq!(0, port.resp_data());
        assert_eq!(0xABCD, port.backing().dram().read_u32(0x90));
    }

    #[test]
    fn test_response_persists_until_consumed() {
        let mut port = port(1);
        port.write32(0, 77);
        port.request_read32(0);
        port.cycle();
        for _ in 0..5 {
            port.cycle();
            assert!(port.resp_valid());
            assert_eq!(77, port.resp_data());
        }
        assert!(!port.can_request());
        port.resp_consume();
        assert!(port.can_request());
    }

    #[test]
    fn test_sync_helpers_bypass_timed_channel() {
        let mut port = port(4);
        port.request_read32(0x10);
        // Synchronous access while a request is in flight does not disturb it.
        port.write32(0x10, 42);
        assert_eq!(42, port.read32(0x10));
        for _ in 0..4 {
            port.cycle();
        }
        assert!(port.resp_valid());
        assert_eq!(42, port.resp_data());
    }

    #[test]
    #[should_panic(expected = "busy")]
    fn test_rejects_request_while_in_flight() {
        let mut port = port(2);
        port.request_read32(0);
        port.request_write32(4, 1);
    }
}
