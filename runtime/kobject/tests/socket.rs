//! Integration tests for sockets

mod common;

use common::RecordingObserver;
use kobject::*;
use std::thread;

fn socket_pair(
    options: SocketOptions,
) -> (KernelRef<SocketDispatcher>, KernelRef<SocketDispatcher>, Rights) {
    SocketDispatcher::create(options).unwrap()
}

fn read_all(socket: &SocketDispatcher) -> Vec<u8> {
    let mut out = vec![0u8; 64];
    let n = socket.read(ReadType::Consume, &mut out).unwrap();
    out.truncate(n);
    out
}

#[test]
fn test_write_read_in_order() {
    let (side0, side1, _) = socket_pair(SocketOptions::empty());
    let waiter = RecordingObserver::new(Signals::READABLE);
    side1.add_observer(waiter.clone(), None).unwrap();

    assert_eq!(side0.write(b"abc").unwrap(), 3);
    assert_eq!(waiter.removed(), 1);
    assert_eq!(read_all(&side1), b"abc");

    side0.write(b"de").unwrap();
    side0.write(b"f").unwrap();
    assert_eq!(read_all(&side1), b"def");
}

/// A handle travelling through the accept queue does not disturb the bytes
/// written around it
#[test]
fn test_share_and_accept_keep_data_intact() {
    let (side0, side1, _) = socket_pair(SocketOptions::HAS_ACCEPT);
    let (carried, _carried_peer, carried_rights) = socket_pair(SocketOptions::empty());
    let carried_koid = carried.get_koid();

    side0.write(b"before-").unwrap();
    side0.share(Handle::make(carried, carried_rights)).unwrap();
    side0.write(b"after").unwrap();

    assert!(side1.signals().contains(Signals::ACCEPT));
    assert!(!side0.signals().contains(Signals::SHARE));

    let (other, _, other_rights) = socket_pair(SocketOptions::empty());
    assert_eq!(
        side0.share(Handle::make(other, other_rights)),
        Err(ObjectError::ShouldWait)
    );

    let accepted = side1.accept().unwrap();
    assert_eq!(accepted.dispatcher().get_koid(), carried_koid);
    assert!(accepted.downcast::<SocketDispatcher>().is_some());
    assert!(side0.signals().contains(Signals::SHARE));
    assert!(!side1.signals().contains(Signals::ACCEPT));
    assert_eq!(side1.accept().err(), Some(ObjectError::ShouldWait));

    assert_eq!(read_all(&side1), b"before-after");
}

/// Handles moving through the accept queue while another thread streams
/// bytes leave the stream intact and in order
#[test]
fn test_share_accept_concurrent_with_stream() {
    const TOTAL: usize = 64 * 1024;
    const CHUNK: usize = 61;
    const SHARES: usize = 200;

    let (side0, side1, _) = socket_pair(SocketOptions::HAS_ACCEPT);
    let expected: Vec<u8> = (0..TOTAL).map(|i| (i % 251) as u8).collect();

    let (sent, received, accepted) = crossbeam::scope(|s| {
        let side0 = &side0;
        let side1 = &side1;
        let expected = &expected;

        s.spawn(move |_| {
            let mut offset = 0;
            while offset < TOTAL {
                let end = (offset + CHUNK).min(TOTAL);
                match side0.write(&expected[offset..end]) {
                    Ok(n) => offset += n,
                    Err(ObjectError::ShouldWait) => thread::yield_now(),
                    Err(e) => panic!("write failed: {:?}", e),
                }
            }
        });

        let sharer = s.spawn(move |_| {
            let mut sent = Vec::with_capacity(SHARES);
            while sent.len() < SHARES {
                let (event, rights) = EventDispatcher::create(0).unwrap();
                let koid = event.get_koid();
                match side0.share(Handle::make(event, rights)) {
                    Ok(()) => sent.push(koid),
                    Err(ObjectError::ShouldWait) => thread::yield_now(),
                    Err(e) => panic!("share failed: {:?}", e),
                }
            }
            sent
        });

        let receiver = s.spawn(move |_| {
            let mut received = Vec::with_capacity(TOTAL);
            let mut accepted = Vec::with_capacity(SHARES);
            let mut buf = [0u8; 97];
            while received.len() < TOTAL || accepted.len() < SHARES {
                match side1.read(ReadType::Consume, &mut buf) {
                    Ok(n) => received.extend_from_slice(&buf[..n]),
                    Err(ObjectError::ShouldWait) => {}
                    Err(e) => panic!("read failed: {:?}", e),
                }
                match side1.accept() {
                    Ok(handle) => accepted.push(handle.dispatcher().get_koid()),
                    Err(ObjectError::ShouldWait) => {}
                    Err(e) => panic!("accept failed: {:?}", e),
                }
                thread::yield_now();
            }
            (received, accepted)
        });

        let sent = sharer.join().unwrap();
        let (received, accepted) = receiver.join().unwrap();
        (sent, received, accepted)
    })
    .unwrap();

    assert!(received == expected, "byte stream corrupted or reordered");
    assert_eq!(accepted, sent);
    assert!(side0.signals().contains(Signals::SHARE));
    assert!(!side1.signals().intersects(Signals::ACCEPT | Signals::READABLE));
}

#[test]
fn test_share_rejects_cycles() {
    let (side0, side1, rights) = socket_pair(SocketOptions::HAS_ACCEPT);
    assert_eq!(
        side0.share(Handle::make(side1.clone(), rights)),
        Err(ObjectError::BadState)
    );
    assert_eq!(
        side0.share(Handle::make(side0.clone(), rights)),
        Err(ObjectError::BadState)
    );

    let (acceptor, _, acceptor_rights) = socket_pair(SocketOptions::HAS_ACCEPT);
    assert_eq!(
        side0.share(Handle::make(acceptor, acceptor_rights)),
        Err(ObjectError::BadState)
    );

    let (plain0, _plain1, _) = socket_pair(SocketOptions::empty());
    let (event, event_rights) = EventDispatcher::create(0).unwrap();
    assert_eq!(
        plain0.share(Handle::make(event, event_rights)),
        Err(ObjectError::NotSupported)
    );
}

/// Shutting down reads on one side stops the other side's writes, while
/// bytes already buffered stay readable
#[test]
fn test_shutdown_read_keeps_buffered_data() {
    let (side0, side1, _) = socket_pair(SocketOptions::empty());
    side1.write(b"queued").unwrap();

    side0.shutdown(ShutdownFlags::READ).unwrap();
    assert!(side0.signals().contains(Signals::PEER_WRITE_DISABLED));
    assert!(side1.signals().contains(Signals::WRITE_DISABLED));
    assert!(!side1.signals().contains(Signals::WRITABLE));
    assert_eq!(side1.write(b"more"), Err(ObjectError::BadState));

    assert_eq!(read_all(&side0), b"queued");
    let mut out = [0u8; 4];
    assert_eq!(
        side0.read(ReadType::Consume, &mut out),
        Err(ObjectError::BadState)
    );

    // Repeating a shutdown is a no-op
    side0.shutdown(ShutdownFlags::READ).unwrap();
}

#[test]
fn test_peer_close_leaves_data_readable() {
    let (side0, side1, rights) = socket_pair(SocketOptions::empty());
    side1.write(b"last words").unwrap();
    drop(Handle::make(side1, rights));

    let signals = side0.signals();
    assert!(signals.contains(Signals::PEER_CLOSED));
    assert!(!signals.contains(Signals::WRITABLE));
    assert!(signals.contains(Signals::READABLE));

    assert_eq!(side0.write(b"x"), Err(ObjectError::PeerClosed));
    assert_eq!(read_all(&side0), b"last words");
    let mut out = [0u8; 4];
    assert_eq!(
        side0.read(ReadType::Consume, &mut out),
        Err(ObjectError::PeerClosed)
    );

    let info = side0.get_info();
    assert_eq!(info.tx_buf_max, 0);
    assert_eq!(info.rx_buf_size, 0);
}

/// A handle parked in the accept queue is released with the queue
#[test]
fn test_parked_handle_closed_with_socket() {
    let (side0, side1, rights) = socket_pair(SocketOptions::HAS_ACCEPT);
    let (event, event_rights) = EventDispatcher::create(0).unwrap();
    side0
        .share(Handle::make(event.clone(), event_rights))
        .unwrap();
    assert_eq!(event.handle_count(), 1);

    drop(Handle::make(side1, rights));
    assert_eq!(event.handle_count(), 0);
}

#[test]
fn test_info_reports_both_directions() {
    let (side0, side1, _) = socket_pair(SocketOptions::DATAGRAM);
    side0.write(b"hello").unwrap();
    side0.write(b"yo").unwrap();

    let rx = side1.get_info();
    assert_eq!(rx.options, SocketOptions::DATAGRAM);
    assert_eq!(rx.rx_buf_size, 7);
    assert_eq!(rx.rx_buf_available, 5);
    assert_eq!(rx.rx_buf_max, config::limits().socket_buffer_size);

    let tx = side0.get_info();
    assert_eq!(tx.tx_buf_size, 7);
    assert_eq!(tx.rx_buf_size, 0);
}
