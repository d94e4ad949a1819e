//! Socket data plane buffer
//!
//! A bounded byte FIFO. In datagram mode the FIFO also records message
//! boundaries, and reads and writes move whole messages.

use crate::{ObjectError, Result};
use std::collections::VecDeque;

pub(crate) struct DataBuffer {
    bytes: VecDeque<u8>,
    /// Length of every queued datagram, oldest first
    datagrams: VecDeque<usize>,
    max: usize,
}

impl DataBuffer {
    pub fn new(max: usize) -> Result<Self> {
        let mut bytes = VecDeque::new();
        bytes
            .try_reserve_exact(max)
            .map_err(|_| ObjectError::NoMemory)?;
        Ok(Self {
            bytes,
            datagrams: VecDeque::new(),
            max,
        })
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub fn max_size(&self) -> usize {
        self.max
    }

    pub fn free(&self) -> usize {
        self.max - self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.bytes.len() >= self.max
    }

    /// Length of the datagram a read would return next
    pub fn next_datagram(&self) -> Option<usize> {
        self.datagrams.front().copied()
    }

    /// Append as much of `src` as fits
    pub fn write_stream(&mut self, src: &[u8]) -> usize {
        let n = src.len().min(self.free());
        self.bytes.extend(&src[..n]);
        n
    }

    /// Append `src` as one message
    ///
    /// # Errors
    /// `OutOfRange` if the message can never fit, `ShouldWait` if it does not
    /// fit right now.
    pub fn write_datagram(&mut self, src: &[u8]) -> Result<usize> {
        if src.len() > self.max {
            return Err(ObjectError::OutOfRange);
        }
        if src.len() > self.free() {
            return Err(ObjectError::ShouldWait);
        }
        self.datagrams
            .try_reserve(1)
            .map_err(|_| ObjectError::NoMemory)?;
        self.bytes.extend(src);
        self.datagrams.push_back(src.len());
        Ok(src.len())
    }

    /// Copy out the front of the buffer, consuming it unless `peek`
    ///
    /// In datagram mode one message is returned, truncated to `dst`; a
    /// consuming read discards the truncated tail.
    pub fn read(&mut self, dst: &mut [u8], datagram: bool, peek: bool) -> usize {
        let available = if datagram {
            self.datagrams.front().copied().unwrap_or(0)
        } else {
            self.bytes.len()
        };
        let n = dst.len().min(available);
        for (d, s) in dst.iter_mut().zip(self.bytes.iter()).take(n) {
            *d = *s;
        }
        if peek {
            return n;
        }

        let consumed = if datagram {
            self.datagrams.pop_front();
            available
        } else {
            n
        };
        self.bytes.drain(..consumed);
        n
    }
}
