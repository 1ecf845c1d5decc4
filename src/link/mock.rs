//! Mock link implementation for testing and development.
//!
//! Clones of a [`MockTransport`] share state, so a test keeps one clone to script the link
//! while the session owns another.
use std::{
    collections::VecDeque,
    io,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use super::{LinkError, LinkTransport};

#[derive(Debug, Default)]
struct MockState {
    open: bool,
    opened_at: Vec<Instant>,
    failing_opens: usize,
    write_calls: usize,
    fail_write_on: Option<usize>,
    written: Vec<Vec<u8>>,
    written_at: Vec<Instant>,
    inbound: VecDeque<u8>,
    dropped: bool,
}

#[derive(Debug, Clone)]
pub struct MockTransport {
    shared: Arc<(Mutex<MockState>, Condvar)>,
    read_timeout: Duration,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            shared: Arc::new((Mutex::new(MockState::default()), Condvar::new())),
            read_timeout: Duration::from_millis(5),
        }
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.shared.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes the next `count` calls to `open` fail.
    pub fn fail_next_opens(&self, count: usize) {
        self.state().failing_opens = count;
    }

    /// Makes the `call`-th write (counted from 1 over the mock's lifetime) fail with a
    /// disconnect.
    pub fn fail_write_on(&self, call: usize) {
        self.state().fail_write_on = Some(call);
    }

    /// Queues bytes for the reader, as if they arrived from the bus.
    pub fn push_inbound(&self, bytes: &[u8]) {
        self.state().inbound.extend(bytes);
        self.shared.1.notify_all();
    }

    /// Simulates the peer going away; the next read fails with a disconnect.
    pub fn drop_link(&self) {
        self.state().dropped = true;
        self.shared.1.notify_all();
    }

    /// Every successful write, in order.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.state().written.clone()
    }

    pub fn write_calls(&self) -> usize {
        self.state().write_calls
    }

    /// Time of each successful write, parallel to [`written`](Self::written).
    pub fn write_times(&self) -> Vec<Instant> {
        self.state().written_at.clone()
    }

    pub fn open_count(&self) -> usize {
        self.state().opened_at.len()
    }

    /// Time of every call to `open`, failed ones included.
    pub fn open_times(&self) -> Vec<Instant> {
        self.state().opened_at.clone()
    }
}

impl LinkTransport for MockTransport {
    fn open(&mut self) -> Result<(), LinkError> {
        let mut state = self.state();
        state.opened_at.push(Instant::now());
        if state.failing_opens > 0 {
            state.failing_opens -= 1;
            return Err(LinkError::OpenFailed {
                target: self.describe(),
                source: io::Error::new(io::ErrorKind::ConnectionRefused, "scripted failure"),
            });
        }

        state.open = true;
        state.dropped = false;
        Ok(())
    }

    fn close(&mut self) {
        self.state().open = false;
    }

    fn is_open(&self) -> bool {
        self.state().open
    }

    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, LinkError> {
        let mut state = self.state();
        if state.inbound.is_empty() && !state.dropped {
            state = self
                .shared
                .1
                .wait_timeout(state, self.read_timeout)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }

        if !state.open {
            return Err(LinkError::NotOpen);
        }
        if state.dropped {
            state.dropped = false;
            state.open = false;
            return Err(LinkError::Disconnected);
        }

        let count = buf.len().min(state.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(state.inbound.drain(..count)) {
            *slot = byte;
        }
        Ok(count)
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        let mut state = self.state();
        if !state.open {
            return Err(LinkError::NotOpen);
        }

        state.write_calls += 1;
        if state.fail_write_on == Some(state.write_calls) {
            state.open = false;
            return Err(LinkError::Disconnected);
        }

        state.written.push(bytes.to_vec());
        state.written_at.push(Instant::now());
        Ok(())
    }

    fn describe(&self) -> String {
        String::from("mock link")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_open_failures() {
        let mut transport = MockTransport::new();
        transport.fail_next_opens(2);

        assert!(transport.open().is_err());
        assert!(transport.open().is_err());
        assert!(transport.open().is_ok());
        assert!(transport.is_open());
        assert_eq!(transport.open_count(), 3);
    }

    #[test]
    fn inbound_bytes_are_read_in_order() {
        let mut transport = MockTransport::new();
        let script = transport.clone();
        transport.open().unwrap();

        let mut buf = [0; 2];
        assert_eq!(transport.read_available(&mut buf).unwrap(), 0);

        script.push_inbound(&[1, 2, 3]);
        assert_eq!(transport.read_available(&mut buf).unwrap(), 2);
        assert_eq!(buf, [1, 2]);
        assert_eq!(transport.read_available(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], 3);
    }

    #[test]
    fn scripted_write_failure_closes_link() {
        let mut transport = MockTransport::new();
        transport.open().unwrap();
        transport.fail_write_on(2);

        transport.write_all(&[1]).unwrap();
        assert!(matches!(
            transport.write_all(&[2]),
            Err(LinkError::Disconnected)
        ));
        assert!(!transport.is_open());
        assert!(matches!(transport.write_all(&[3]), Err(LinkError::NotOpen)));

        transport.open().unwrap();
        transport.write_all(&[4]).unwrap();
        assert_eq!(transport.written(), vec![vec![1], vec![4]]);
    }

    #[test]
    fn dropped_link_fails_next_read() {
        let mut transport = MockTransport::new();
        transport.open().unwrap();
        transport.drop_link();

        assert!(matches!(
            transport.read_available(&mut [0; 4]),
            Err(LinkError::Disconnected)
        ));
        assert!(!transport.is_open());
    }
}
