//! Control-port allocation.
//!
//! Hands out candidate TCP ports for new emulator instances: a monotonic
//! counter above a configured base, where each candidate is bind-tested on
//! all interfaces and skipped if taken. The test listener is released
//! before the port is handed out, so another process can still win the
//! race; the driver's connect retry absorbs that.

use parking_lot::Mutex;
use std::net::TcpListener;
use tn3270_common::{WorkflowError, WorkflowResult};
use tracing::debug;

/// Process-wide allocator of unique control ports.
pub struct PortAllocator {
    base: u16,
    next: Mutex<u16>,
}

impl PortAllocator {
    /// Creates an allocator whose first candidate is `base + 1`.
    pub fn new(base: u16) -> Self {
        Self {
            base,
            next: Mutex::new(base),
        }
    }

    /// Returns the next free port above the base. Two calls never return
    /// the same port within one process.
    pub fn next(&self) -> WorkflowResult<u16> {
        let mut next = self.next.lock();
        loop {
            if *next == u16::MAX {
                return Err(WorkflowError::PortsExhausted {
                    base: self.base,
                    attempts: (u16::MAX - self.base) as u32,
                });
            }
            *next += 1;
            let candidate = *next;
            if port_available(candidate) {
                return Ok(candidate);
            }
            debug!(port = candidate, "Port is in use, trying next port");
        }
    }
}

/// Bind-tests a port on all interfaces, releasing it immediately.
fn port_available(port: u16) -> bool {
    TcpListener::bind(("0.0.0.0", port)).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    /// Picks a base in a range unlikely to collide with other services.
    fn free_base() -> u16 {
        let probe = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        probe.local_addr().unwrap().port()
    }

    #[test]
    fn test_allocations_are_unique_and_increasing() {
        let allocator = PortAllocator::new(free_base());
        let mut seen = HashSet::new();
        let mut last = 0;
        for _ in 0..10 {
            let port = allocator.next().unwrap();
            assert!(port > last, "ports must increase");
            assert!(seen.insert(port), "port {port} handed out twice");
            last = port;
        }
    }

    #[test]
    fn test_occupied_candidate_is_skipped() {
        let base = free_base();
        let allocator = PortAllocator::new(base);

        // Occupy the first candidate so the allocator must move past it.
        let occupied = match TcpListener::bind(("0.0.0.0", base + 1)) {
            Ok(listener) => listener,
            // Another process got there first, which is the same situation.
            Err(_) => return,
        };

        let port = allocator.next().unwrap();
        assert_ne!(port, base + 1);
        assert!(port > base + 1);
        drop(occupied);
    }

    #[test]
    fn test_exhaustion_is_reported() {
        let allocator = PortAllocator::new(u16::MAX - 1);
        // One candidate may remain; after that the counter hits the ceiling.
        let _ = allocator.next();
        let err = allocator.next().unwrap_err();
        assert!(matches!(err, WorkflowError::PortsExhausted { .. }));
    }
}
