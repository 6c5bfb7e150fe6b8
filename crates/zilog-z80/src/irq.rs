//! The Z80-family interrupt daisy-chain endpoint.
//!
//! Every interrupt source in a Z80 peripheral (each CTC channel, each PIO
//! port) owns one of these. The chain is formed by call order: the system
//! seeds `IEIO` high, ticks the devices from highest to lowest priority,
//! and each endpoint clears `IEIO` while it has a request pending or an
//! interrupt under service, which freezes everything downstream.
//!
//! Lifecycle of a request:
//!
//! 1. the device calls [`IntLine::request`] when its interrupt condition
//!    fires (and interrupts are enabled on the device);
//! 2. while the enable input is high the endpoint asserts `INT` every tick;
//! 3. during the CPU's acknowledge cycle (`M1|IORQ`) the highest-priority
//!    requesting endpoint places its vector on the data bus and enters
//!    service;
//! 4. the virtual `RETI` pin retires the service state of the
//!    highest-priority endpoint currently under service.

use crate::pins::{self, IEIO, INT, IORQ, M1, RETI};

/// Daisy-chain interrupt state for one interrupt source.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntLine {
    needed: bool,
    requested: bool,
    serviced: bool,
}

impl IntLine {
    /// Raise an interrupt request. Latched until acknowledged.
    pub fn request(&mut self) {
        self.needed = true;
    }

    /// True between acknowledge and RETI.
    #[must_use]
    pub const fn under_service(&self) -> bool {
        self.serviced
    }

    /// Drop all interrupt state (device reset).
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Run one tick of the daisy-chain protocol. `vector` is the byte this
    /// source places on the data bus when acknowledged.
    #[must_use]
    pub fn tick(&mut self, mut pins: u64, vector: u8) -> u64 {
        // RETI retires the highest-priority serviced source; consuming the
        // pin stops it from also retiring sources further down the chain.
        if self.serviced && pins & RETI != 0 && pins & IEIO != 0 {
            self.serviced = false;
            pins &= !RETI;
        }
        if pins & IEIO != 0 {
            // A new request waits out our own service period; it would
            // otherwise re-enter the handler before RETI.
            if self.needed && !self.serviced {
                self.needed = false;
                self.requested = true;
            }
            if self.requested {
                if pins & (M1 | IORQ) == M1 | IORQ {
                    pins = pins::with_data(pins, vector);
                    self.requested = false;
                    self.serviced = true;
                } else {
                    pins |= INT;
                }
            }
            if self.requested || self.serviced {
                pins &= !IEIO;
            }
        }
        pins
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pins::data;

    #[test]
    fn request_asserts_int_when_enabled() {
        let mut line = IntLine::default();
        line.request();
        let pins = line.tick(IEIO, 0xE4);
        assert!(pins & INT != 0);
        assert!(pins & IEIO == 0, "pending request blocks downstream");
    }

    #[test]
    fn request_held_while_chain_disabled() {
        let mut line = IntLine::default();
        line.request();
        let pins = line.tick(0, 0xE4);
        assert!(pins & INT == 0);
        // Enable arrives later; the request is still there.
        let pins = line.tick(IEIO, 0xE4);
        assert!(pins & INT != 0);
    }

    #[test]
    fn acknowledge_places_vector_and_enters_service() {
        let mut line = IntLine::default();
        line.request();
        let _ = line.tick(IEIO, 0xE4);
        let pins = line.tick(IEIO | M1 | IORQ, 0xE4);
        assert_eq!(data(pins), 0xE4);
        assert!(line.under_service());
        assert!(pins & IEIO == 0, "service blocks downstream");
    }

    #[test]
    fn reti_retires_service_once() {
        let mut line = IntLine::default();
        line.request();
        let _ = line.tick(IEIO, 0xE4);
        let _ = line.tick(IEIO | M1 | IORQ, 0xE4);
        let pins = line.tick(IEIO | RETI, 0xE4);
        assert!(!line.under_service());
        assert!(pins & RETI == 0, "RETI is consumed");
        assert!(pins & IEIO != 0, "chain re-enabled downstream");
    }
}
