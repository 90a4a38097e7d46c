//! In-process byte queue implementing the full stream contract.
//!
//! Used to run sessions without a socket, mostly in tests and benches. An
//! optional write budget simulates a sink that fills up: once the budget is
//! spent, writes fail with `WouldBlock` until it is raised again.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use super::{lock, ByteStream, Capabilities, Readiness};
use crate::error::{ProtocolError, Result};

#[derive(Default)]
struct MemoryState {
    data: VecDeque<u8>,
    closed: bool,
    write_budget: Option<usize>,
}

#[derive(Default)]
pub struct MemoryStream {
    state: Mutex<MemoryState>,
    notify: Arc<Notify>,
}

impl MemoryStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stream that accepts at most `budget` bytes before blocking
    pub fn with_write_budget(budget: usize) -> Self {
        let stream = Self::default();
        if let Ok(mut state) = stream.state.lock() {
            state.write_budget = Some(budget);
        }
        stream
    }

    pub fn set_write_budget(&self, budget: Option<usize>) -> Result<()> {
        lock(&self.state)?.write_budget = budget;
        self.notify.notify_one();
        Ok(())
    }

    /// Mark the stream closed. Buffered bytes stay readable; once drained,
    /// reads report `ConnectionClosed`.
    pub fn close(&self) -> Result<()> {
        lock(&self.state)?.closed = true;
        self.notify.notify_one();
        Ok(())
    }

    pub fn is_closed(&self) -> Result<bool> {
        Ok(lock(&self.state)?.closed)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(lock(&self.state)?.data.is_empty())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(lock(&self.state)?.data.len())
    }

    /// Drain every queued byte
    pub fn take_all(&self) -> Result<Vec<u8>> {
        Ok(lock(&self.state)?.data.drain(..).collect())
    }

    /// Copy of the queued bytes without draining them
    pub fn snapshot(&self) -> Result<Vec<u8>> {
        Ok(lock(&self.state)?.data.iter().copied().collect())
    }

    pub fn readiness(&self) -> Readiness {
        Readiness::Notify(self.notify.clone())
    }
}

impl ByteStream for MemoryStream {
    fn capabilities(&self) -> Capabilities {
        Capabilities::DUPLEX.with_peek()
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let mut state = lock(&self.state)?;
        let n = copy_front(&state, buf)?;
        state.data.drain(..n);
        Ok(n)
    }

    fn peek(&self, buf: &mut [u8]) -> Result<usize> {
        copy_front(&*lock(&self.state)?, buf)
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        let mut state = lock(&self.state)?;
        if state.closed {
            return Err(ProtocolError::ConnectionClosed);
        }
        let n = match state.write_budget {
            Some(0) if !buf.is_empty() => return Err(ProtocolError::WouldBlock),
            Some(budget) => budget.min(buf.len()),
            None => buf.len(),
        };
        state.data.try_reserve(n)?;
        state.data.extend(&buf[..n]);
        if let Some(budget) = state.write_budget.as_mut() {
            *budget -= n;
        }
        drop(state);
        self.notify.notify_one();
        Ok(n)
    }
}

fn copy_front(state: &MemoryState, buf: &mut [u8]) -> Result<usize> {
    if buf.is_empty() {
        return Ok(0);
    }
    if state.data.is_empty() {
        return Err(if state.closed {
            ProtocolError::ConnectionClosed
        } else {
            ProtocolError::WouldBlock
        });
    }
    let n = buf.len().min(state.data.len());
    for (dst, src) in buf.iter_mut().zip(state.data.iter()) {
        *dst = *src;
    }
    Ok(n)
}
