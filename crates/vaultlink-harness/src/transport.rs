//! In-memory mock transport.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use bytes::Bytes;
use vaultlink_core::{
    DeviceState, PoolEntry, Transport,
    error::{DeviceError, Result},
};

/// Responder invoked for every host send; its return frames land in the
/// receive pool, simulating the device's replies.
pub type Responder = Box<dyn FnMut(&[u8]) -> Vec<Bytes> + Send>;

struct Inner {
    connected: bool,
    device_state: DeviceState,
    pool: VecDeque<PoolEntry>,
    next_pool_id: u64,
    sent: Vec<Bytes>,
    sequence: u16,
    responder: Option<Responder>,
    fail_sends: bool,
    disconnect_on_send: bool,
}

/// Scripted in-memory [`Transport`].
///
/// Frames the "device" produces are queued into an internal pool, either
/// directly via [`MockTransport::queue_frame`] or by a responder closure
/// reacting to host sends. All host sends are recorded for assertions.
///
/// The mock is cheaply cloneable; clones share state, letting a test hold a
/// handle while an operation owns another.
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<Mutex<Inner>>,
}

impl MockTransport {
    /// New connected transport reporting `device_state`.
    #[must_use]
    pub fn new(device_state: DeviceState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                connected: true,
                device_state,
                pool: VecDeque::new(),
                next_pool_id: 0,
                sent: Vec::new(),
                sequence: 0,
                responder: None,
                fail_sends: false,
                disconnect_on_send: false,
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock only means another test thread panicked; the
        // state itself is still usable for assertions.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Install a responder producing device replies for each host send.
    pub fn set_responder(&self, responder: impl FnMut(&[u8]) -> Vec<Bytes> + Send + 'static) {
        self.lock().responder = Some(Box::new(responder));
    }

    /// Queue a device frame into the receive pool.
    pub fn queue_frame(&self, frame: impl Into<Bytes>) {
        let mut inner = self.lock();
        let id = inner.next_pool_id;
        inner.next_pool_id += 1;
        inner.pool.push_back(PoolEntry { id, data: frame.into() });
    }

    /// Frames the host has sent so far.
    #[must_use]
    pub fn sent(&self) -> Vec<Bytes> {
        self.lock().sent.clone()
    }

    /// Flip the connected flag.
    pub fn set_connected(&self, connected: bool) {
        self.lock().connected = connected;
    }

    /// Report a different device state from now on.
    pub fn set_device_state(&self, device_state: DeviceState) {
        self.lock().device_state = device_state;
    }

    /// Pin the sequence counter (the "latest issued" value).
    pub fn set_sequence(&self, sequence: u16) {
        self.lock().sequence = sequence;
    }

    /// Make every subsequent send fail while staying connected.
    pub fn fail_sends(&self) {
        self.lock().fail_sends = true;
    }

    /// Make the next send drop the connection mid-write.
    pub fn disconnect_on_send(&self) {
        self.lock().disconnect_on_send = true;
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self) -> Result<()> {
        self.lock().connected = true;
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        self.lock().connected = false;
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.lock().connected
    }

    async fn before_operation(&self) -> Result<()> {
        Ok(())
    }

    async fn after_operation(&self) -> Result<()> {
        Ok(())
    }

    async fn send(&self, data: &[u8]) -> Result<()> {
        let replies = {
            let mut inner = self.lock();

            if inner.disconnect_on_send {
                inner.disconnect_on_send = false;
                inner.connected = false;
                return Err(DeviceError::ConnectionClosed);
            }
            if !inner.connected {
                return Err(DeviceError::ConnectionClosed);
            }
            if inner.fail_sends {
                return Err(DeviceError::WriteError);
            }

            inner.sent.push(Bytes::copy_from_slice(data));

            match inner.responder.as_mut() {
                Some(responder) => responder(data),
                None => Vec::new(),
            }
        };

        let mut inner = self.lock();
        for frame in replies {
            let id = inner.next_pool_id;
            inner.next_pool_id += 1;
            inner.pool.push_back(PoolEntry { id, data: frame });
        }
        Ok(())
    }

    async fn receive(&self) -> Result<Option<Bytes>> {
        let mut inner = self.lock();
        if !inner.connected {
            return Err(DeviceError::ConnectionClosed);
        }
        Ok(inner.pool.pop_front().map(|entry| entry.data))
    }

    async fn peek(&self) -> Result<Vec<PoolEntry>> {
        let inner = self.lock();
        if !inner.connected {
            return Err(DeviceError::ConnectionClosed);
        }
        Ok(inner.pool.iter().cloned().collect())
    }

    async fn get_device_state(&self) -> Result<DeviceState> {
        Ok(self.lock().device_state)
    }

    async fn get_sequence_number(&self) -> u16 {
        self.lock().sequence
    }

    async fn get_new_sequence_number(&self) -> u16 {
        let mut inner = self.lock();
        inner.sequence = inner.sequence.wrapping_add(1);
        inner.sequence
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pool_is_fifo_and_peek_does_not_consume() {
        let transport = MockTransport::new(DeviceState::Main);
        transport.queue_frame(Bytes::from_static(&[1]));
        transport.queue_frame(Bytes::from_static(&[2]));

        let peeked = transport.peek().await.unwrap();
        assert_eq!(peeked.len(), 2);

        assert_eq!(transport.receive().await.unwrap(), Some(Bytes::from_static(&[1])));
        assert_eq!(transport.receive().await.unwrap(), Some(Bytes::from_static(&[2])));
        assert_eq!(transport.receive().await.unwrap(), None);
    }

    #[tokio::test]
    async fn responder_feeds_the_pool() {
        let transport = MockTransport::new(DeviceState::Main);
        transport.set_responder(|sent| vec![Bytes::copy_from_slice(sent)]);

        transport.send(&[0xAB, 0xCD]).await.unwrap();
        assert_eq!(
            transport.receive().await.unwrap(),
            Some(Bytes::from_static(&[0xAB, 0xCD]))
        );
    }

    #[tokio::test]
    async fn sequence_counter_advances() {
        let transport = MockTransport::new(DeviceState::Main);
        assert_eq!(transport.get_new_sequence_number().await, 1);
        assert_eq!(transport.get_new_sequence_number().await, 2);
        assert_eq!(transport.get_sequence_number().await, 2);
    }

    #[tokio::test]
    async fn disconnect_on_send_drops_the_connection() {
        let transport = MockTransport::new(DeviceState::Main);
        transport.disconnect_on_send();

        assert_eq!(transport.send(&[1]).await, Err(DeviceError::ConnectionClosed));
        assert!(!transport.is_connected().await);
    }
}
