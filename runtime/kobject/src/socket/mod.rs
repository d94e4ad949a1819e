//! Sockets
//!
//! A bidirectional byte transport between two peered endpoints. Each end
//! owns the buffer it reads from; writing on one side appends to the other
//! side's buffer.
//!
//! # Planes
//! - Data plane: a bounded stream, or bounded messages with
//!   [`SocketOptions::DATAGRAM`]
//! - Control plane ([`SocketOptions::HAS_CONTROL`]): one small message in
//!   flight per direction
//! - Accept queue ([`SocketOptions::HAS_ACCEPT`]): one handle in flight per
//!   direction, moved with [`share`](SocketDispatcher::share) and
//!   [`accept`](SocketDispatcher::accept)
//!
//! Nothing here blocks. A read on an empty buffer or a write to a full one
//! returns `ShouldWait`; the caller waits on the signals and retries.

mod buffer;

use self::buffer::DataBuffer;
use crate::config::{self, Limits};
use crate::dispatcher::{Dispatcher, ObjType};
use crate::handle::Handle;
use crate::kref::KernelRef;
use crate::peered::{PeerEnd, PeerEndpoint, PeeredDispatcher};
use crate::rights::Rights;
use crate::signals::Signals;
use crate::state::Deferred;
use crate::{ObjectError, Result};
use bitflags::bitflags;

bitflags! {
    /// Creation options
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SocketOptions: u32 {
        const DATAGRAM    = 1 << 0;
        const HAS_CONTROL = 1 << 1;
        const HAS_ACCEPT  = 1 << 2;
    }
}

bitflags! {
    /// Directions for [`SocketDispatcher::shutdown`]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShutdownFlags: u32 {
        /// This side stops reading; the peer can no longer write
        const READ  = 1 << 0;
        /// This side stops writing
        const WRITE = 1 << 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadType {
    Consume,
    /// Copy out without consuming or changing any signal
    Peek,
}

/// Snapshot returned by [`SocketDispatcher::get_info`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketInfo {
    pub options: SocketOptions,
    pub rx_buf_max: usize,
    pub rx_buf_size: usize,
    /// Bytes the next read can return
    pub rx_buf_available: usize,
    pub tx_buf_max: usize,
    pub tx_buf_size: usize,
}

struct ControlMsg {
    msg: Vec<u8>,
    capacity: usize,
}

/// Per-side socket state, guarded by the pair's shared lock
pub struct SocketEnd {
    options: SocketOptions,
    data: DataBuffer,
    control: Option<ControlMsg>,
    accept_queue: Option<Handle>,
    read_disabled: bool,
    read_threshold: usize,
    write_threshold: usize,
}

impl SocketEnd {
    fn new(options: SocketOptions, limits: &Limits) -> Result<Self> {
        let control = if options.contains(SocketOptions::HAS_CONTROL) {
            let mut msg = Vec::new();
            msg.try_reserve_exact(limits.control_msg_size)
                .map_err(|_| ObjectError::NoMemory)?;
            Some(ControlMsg {
                msg,
                capacity: limits.control_msg_size,
            })
        } else {
            None
        };
        Ok(Self {
            options,
            data: DataBuffer::new(limits.socket_buffer_size)?,
            control,
            accept_queue: None,
            read_disabled: false,
            read_threshold: 0,
            write_threshold: 0,
        })
    }

    fn is_datagram(&self) -> bool {
        self.options.contains(SocketOptions::DATAGRAM)
    }
}

impl PeerEndpoint for SocketEnd {
    const TYPE: ObjType = ObjType::Socket;
    const DEFAULT_RIGHTS: Rights = Rights::BASIC
        .union(Rights::IO)
        .union(Rights::PROPERTY)
        .union(Rights::SIGNAL)
        .union(Rights::SIGNAL_PEER);

    fn on_zero_handles_locked(&mut self, deferred: &mut Deferred) {
        // A handle parked here must not outlive the last handle to its queue.
        if let Some(parked) = self.accept_queue.take() {
            deferred.defer_drop(parked);
        }
    }

    fn on_peer_zero_handles_locked(&mut self, _deferred: &mut Deferred) -> (Signals, Signals) {
        (Signals::WRITABLE, Signals::PEER_CLOSED)
    }
}

pub type SocketDispatcher = PeeredDispatcher<SocketEnd>;

impl PeeredDispatcher<SocketEnd> {
    /// Create a connected pair of sockets
    ///
    /// # Errors
    /// `InvalidArgs` for unknown option bits, `NoMemory` if the buffers
    /// cannot be allocated.
    pub fn create(
        options: SocketOptions,
    ) -> Result<(KernelRef<SocketDispatcher>, KernelRef<SocketDispatcher>, Rights)> {
        if !SocketOptions::all().contains(options) {
            return Err(ObjectError::InvalidArgs);
        }
        let limits = config::limits();

        let mut initial = Signals::WRITABLE;
        if options.contains(SocketOptions::HAS_CONTROL) {
            initial |= Signals::CONTROL_WRITABLE;
        }
        if options.contains(SocketOptions::HAS_ACCEPT) {
            initial |= Signals::SHARE;
        }

        let end0 = SocketEnd::new(options, limits)?;
        let end1 = SocketEnd::new(options, limits)?;
        let (a, b) =
            PeeredDispatcher::publish_pair(PeerEnd::new(end0, initial), PeerEnd::new(end1, initial));
        Ok((a, b, SocketEnd::DEFAULT_RIGHTS))
    }

    pub fn options(&self) -> SocketOptions {
        self.lock().mine().inner.options
    }

    /// Write into the peer's buffer
    ///
    /// # Returns
    /// Bytes written; a stream write may be short.
    ///
    /// # Errors
    /// `PeerClosed`, `BadState` after this side's writes were shut down,
    /// `ShouldWait` when the peer's buffer is full, plus datagram sizing
    /// errors.
    pub fn write(&self, src: &[u8]) -> Result<usize> {
        let mut deferred = Deferred::new();
        let mut guard = self.lock();
        let (mine, peer) = guard.split_open()?;

        if mine.state.signals().contains(Signals::WRITE_DISABLED) {
            return Err(ObjectError::BadState);
        }
        if src.is_empty() {
            return Ok(0);
        }

        let rx = &mut peer.inner;
        if rx.data.is_full() {
            return Err(ObjectError::ShouldWait);
        }
        let was_empty = rx.data.is_empty();
        let written = if rx.is_datagram() {
            rx.data.write_datagram(src)?
        } else {
            rx.data.write_stream(src)
        };

        let mut set = Signals::empty();
        if written > 0 && was_empty {
            set |= Signals::READABLE;
        }
        if rx.read_threshold > 0 && rx.data.size() >= rx.read_threshold {
            set |= Signals::READ_THRESHOLD;
        }
        let rx_full = rx.data.is_full();
        let rx_free = rx.data.free();
        peer.state
            .update_state_locked(Signals::empty(), set, &mut deferred);

        let mut clear = Signals::empty();
        if rx_full {
            clear |= Signals::WRITABLE;
        }
        if mine.inner.write_threshold > 0 && rx_free < mine.inner.write_threshold {
            clear |= Signals::WRITE_THRESHOLD;
        }
        mine.state
            .update_state_locked(clear, Signals::empty(), &mut deferred);
        Ok(written)
    }

    /// Read from this side's buffer
    ///
    /// # Errors
    /// On an empty buffer: `PeerClosed` once the peer is gone, `BadState`
    /// after reads were shut down, `ShouldWait` otherwise.
    pub fn read(&self, ty: ReadType, dst: &mut [u8]) -> Result<usize> {
        let mut deferred = Deferred::new();
        let mut guard = self.lock();
        let (mine, peer) = guard.split();
        let peer_open = mine.peer_open;
        let rx = &mut mine.inner;

        if rx.data.is_empty() {
            if !peer_open {
                return Err(ObjectError::PeerClosed);
            }
            if rx.read_disabled {
                return Err(ObjectError::BadState);
            }
            return Err(ObjectError::ShouldWait);
        }

        let datagram = rx.is_datagram();
        if ty == ReadType::Peek {
            return Ok(rx.data.read(dst, datagram, true));
        }

        let was_full = rx.data.is_full();
        let n = rx.data.read(dst, datagram, false);

        let mut clear = Signals::empty();
        if rx.data.is_empty() {
            clear |= Signals::READABLE;
        }
        if rx.read_threshold > 0 && rx.data.size() < rx.read_threshold {
            clear |= Signals::READ_THRESHOLD;
        }
        let rx_full = rx.data.is_full();
        let rx_free = rx.data.free();
        mine.state
            .update_state_locked(clear, Signals::empty(), &mut deferred);

        if peer_open {
            let mut set = Signals::empty();
            if was_full
                && !rx_full
                && !peer.state.signals().contains(Signals::WRITE_DISABLED)
            {
                set |= Signals::WRITABLE;
            }
            if peer.inner.write_threshold > 0 && rx_free >= peer.inner.write_threshold {
                set |= Signals::WRITE_THRESHOLD;
            }
            peer.state
                .update_state_locked(Signals::empty(), set, &mut deferred);
        }
        Ok(n)
    }

    /// Send one control-plane message to the peer
    ///
    /// # Errors
    /// `NotSupported` without a control plane, `InvalidArgs` for an empty
    /// message, `OutOfRange` above capacity, `ShouldWait` while the previous
    /// message is unread.
    pub fn write_control(&self, src: &[u8]) -> Result<()> {
        let mut deferred = Deferred::new();
        let mut guard = self.lock();
        let (mine, peer) = guard.split();

        let capacity = match &mine.inner.control {
            Some(control) => control.capacity,
            None => return Err(ObjectError::NotSupported),
        };
        if src.is_empty() {
            return Err(ObjectError::InvalidArgs);
        }
        if src.len() > capacity {
            return Err(ObjectError::OutOfRange);
        }
        if !mine.peer_open {
            return Err(ObjectError::PeerClosed);
        }
        let Some(control) = peer.inner.control.as_mut() else {
            return Err(ObjectError::BadState);
        };
        if !control.msg.is_empty() {
            return Err(ObjectError::ShouldWait);
        }

        control.msg.extend_from_slice(src);
        peer.state
            .update_state_locked(Signals::empty(), Signals::CONTROL_READABLE, &mut deferred);
        mine.state
            .update_state_locked(Signals::CONTROL_WRITABLE, Signals::empty(), &mut deferred);
        Ok(())
    }

    /// Take the pending control-plane message, truncated to `dst`
    pub fn read_control(&self, dst: &mut [u8]) -> Result<usize> {
        let mut deferred = Deferred::new();
        let mut guard = self.lock();
        let (mine, peer) = guard.split();

        let Some(control) = mine.inner.control.as_mut() else {
            return Err(ObjectError::BadState);
        };
        if control.msg.is_empty() {
            return Err(ObjectError::ShouldWait);
        }
        let n = dst.len().min(control.msg.len());
        dst[..n].copy_from_slice(&control.msg[..n]);
        control.msg.clear();

        mine.state
            .update_state_locked(Signals::CONTROL_READABLE, Signals::empty(), &mut deferred);
        if mine.peer_open {
            peer.state
                .update_state_locked(Signals::empty(), Signals::CONTROL_WRITABLE, &mut deferred);
        }
        Ok(n)
    }

    /// Park `handle` in the peer's accept queue
    ///
    /// # Errors
    /// `NotSupported` without an accept queue, `BadState` for a socket that
    /// may not be shared (see [`check_shareable`](Self::check_shareable)),
    /// `PeerClosed`, `ShouldWait` while the queue is occupied.
    pub fn share(&self, handle: Handle) -> Result<()> {
        if let Some(to_send) = handle.downcast::<SocketDispatcher>() {
            self.check_shareable(&to_send)?;
        }

        let mut deferred = Deferred::new();
        let mut guard = self.lock();
        let (mine, peer) = guard.split();
        if !mine.inner.options.contains(SocketOptions::HAS_ACCEPT) {
            return Err(ObjectError::NotSupported);
        }
        if !mine.peer_open {
            return Err(ObjectError::PeerClosed);
        }
        if peer.inner.accept_queue.is_some() {
            return Err(ObjectError::ShouldWait);
        }

        peer.inner.accept_queue = Some(handle);
        peer.state
            .update_state_locked(Signals::empty(), Signals::ACCEPT, &mut deferred);
        mine.state
            .update_state_locked(Signals::SHARE, Signals::empty(), &mut deferred);
        Ok(())
    }

    /// Take the handle parked in this side's accept queue
    pub fn accept(&self) -> Result<Handle> {
        let mut deferred = Deferred::new();
        let mut guard = self.lock();
        let (mine, peer) = guard.split();
        if !mine.inner.options.contains(SocketOptions::HAS_ACCEPT) {
            return Err(ObjectError::NotSupported);
        }
        let Some(handle) = mine.inner.accept_queue.take() else {
            return Err(ObjectError::ShouldWait);
        };

        mine.state
            .update_state_locked(Signals::ACCEPT, Signals::empty(), &mut deferred);
        if mine.peer_open {
            peer.state
                .update_state_locked(Signals::empty(), Signals::SHARE, &mut deferred);
        }
        Ok(handle)
    }

    /// Whether `to_send` may travel over this socket
    ///
    /// Sockets that can carry sockets, and either end of this pair, are
    /// refused so that sharing can never form a cycle.
    pub fn check_shareable(&self, to_send: &SocketDispatcher) -> Result<()> {
        if to_send.options().contains(SocketOptions::HAS_ACCEPT) {
            return Err(ObjectError::BadState);
        }
        let koid = to_send.get_koid();
        if koid == self.get_koid() || koid == self.peer_koid() {
            return Err(ObjectError::BadState);
        }
        Ok(())
    }

    /// Disable reading and/or writing on this side and the matching
    /// direction on the peer
    pub fn shutdown(&self, how: ShutdownFlags) -> Result<()> {
        if !ShutdownFlags::all().contains(how) {
            return Err(ObjectError::InvalidArgs);
        }
        let shut_read = how.contains(ShutdownFlags::READ);
        let shut_write = how.contains(ShutdownFlags::WRITE);

        let mut deferred = Deferred::new();
        let mut guard = self.lock();
        let (mine, peer) = guard.split();

        let mut want = Signals::empty();
        if shut_read {
            want |= Signals::PEER_WRITE_DISABLED;
        }
        if shut_write {
            want |= Signals::WRITE_DISABLED;
        }
        if mine.state.signals().contains(want) {
            return Ok(());
        }

        let (mut clear, mut set) = (Signals::empty(), Signals::empty());
        if shut_read {
            mine.inner.read_disabled = true;
            set |= Signals::PEER_WRITE_DISABLED;
        }
        if shut_write {
            clear |= Signals::WRITABLE;
            set |= Signals::WRITE_DISABLED;
        }
        mine.state.update_state_locked(clear, set, &mut deferred);

        if mine.peer_open {
            let (mut clear, mut set) = (Signals::empty(), Signals::empty());
            if shut_read {
                clear |= Signals::WRITABLE;
                set |= Signals::WRITE_DISABLED;
            }
            if shut_write {
                peer.inner.read_disabled = true;
                set |= Signals::PEER_WRITE_DISABLED;
            }
            peer.state.update_state_locked(clear, set, &mut deferred);
        }
        log::debug!("socket {} shutdown {:?}", self.get_koid(), how);
        Ok(())
    }

    /// Stop writing; the peer drains what is buffered
    pub fn half_close(&self) -> Result<()> {
        self.shutdown(ShutdownFlags::WRITE)
    }

    /// Raise `READ_THRESHOLD` while at least `value` bytes are buffered
    ///
    /// Zero disables the signal.
    pub fn set_read_threshold(&self, value: usize) -> Result<()> {
        let mut deferred = Deferred::new();
        let mut guard = self.lock();
        let mine = guard.mine();
        if value > mine.inner.data.max_size() {
            return Err(ObjectError::InvalidArgs);
        }
        mine.inner.read_threshold = value;
        if value > 0 && mine.inner.data.size() >= value {
            mine.state
                .update_state_locked(Signals::empty(), Signals::READ_THRESHOLD, &mut deferred);
        } else {
            mine.state
                .update_state_locked(Signals::READ_THRESHOLD, Signals::empty(), &mut deferred);
        }
        Ok(())
    }

    /// Raise `WRITE_THRESHOLD` while the peer has room for `value` bytes
    ///
    /// Zero disables the signal.
    pub fn set_write_threshold(&self, value: usize) -> Result<()> {
        let mut deferred = Deferred::new();
        let mut guard = self.lock();
        let (mine, peer) = guard.split_open()?;
        if value > peer.inner.data.max_size() {
            return Err(ObjectError::InvalidArgs);
        }
        mine.inner.write_threshold = value;
        if value > 0 && peer.inner.data.free() >= value {
            mine.state
                .update_state_locked(Signals::empty(), Signals::WRITE_THRESHOLD, &mut deferred);
        } else {
            mine.state
                .update_state_locked(Signals::WRITE_THRESHOLD, Signals::empty(), &mut deferred);
        }
        Ok(())
    }

    pub fn read_threshold(&self) -> usize {
        self.lock().mine().inner.read_threshold
    }

    pub fn write_threshold(&self) -> usize {
        self.lock().mine().inner.write_threshold
    }

    pub fn get_info(&self) -> SocketInfo {
        let mut guard = self.lock();
        let (mine, peer) = guard.split();
        let rx = &mine.inner;
        let rx_buf_available = if rx.is_datagram() {
            rx.data.next_datagram().unwrap_or(0)
        } else {
            rx.data.size()
        };
        let (tx_buf_max, tx_buf_size) = if mine.peer_open {
            (peer.inner.data.max_size(), peer.inner.data.size())
        } else {
            (0, 0)
        };
        SocketInfo {
            options: rx.options,
            rx_buf_max: rx.data.max_size(),
            rx_buf_size: rx.data.size(),
            rx_buf_available,
            tx_buf_max,
            tx_buf_size,
        }
    }
}
