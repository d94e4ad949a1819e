//! Integration tests for object identity and teardown

use kobject::*;
use std::cell::Cell;
use std::collections::BTreeSet;

#[test]
fn test_koids_strictly_increase() {
    let mut last = 0;
    for _ in 0..100 {
        let (event, _) = EventDispatcher::create(0).unwrap();
        assert!(event.get_koid() > last);
        assert!(event.get_koid() >= FIRST_KOID);
        last = event.get_koid();
    }
}

#[test]
fn test_koids_unique_across_threads() {
    let koids: Vec<Koid> = crossbeam::scope(|s| {
        let workers: Vec<_> = (0..4)
            .map(|_| {
                s.spawn(|_| {
                    (0..250)
                        .map(|_| {
                            let (a, b, _) = EventPairDispatcher::create(0).unwrap();
                            [a.get_koid(), b.get_koid()]
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        workers
            .into_iter()
            .flat_map(|w| w.join().unwrap())
            .flatten()
            .collect()
    })
    .unwrap();

    let unique: BTreeSet<Koid> = koids.iter().copied().collect();
    assert_eq!(unique.len(), koids.len());
}

thread_local! {
    static DEPTH: Cell<usize> = const { Cell::new(0) };
    static MAX_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Decrements the destructor depth once the rest of a link is gone
struct DepthProbe;

impl Drop for DepthProbe {
    fn drop(&mut self) {
        DEPTH.with(|d| d.set(d.get() - 1));
    }
}

struct LinkKind;

struct LinkState {
    // Drops before `probe`, so a recursive teardown would nest here.
    next: Option<KernelRef<SoloDispatcher<LinkKind>>>,
    probe: DepthProbe,
}

impl SoloKind for LinkKind {
    type State = LinkState;

    const TYPE: ObjType = ObjType::Event;
    const DEFAULT_RIGHTS: Rights = Rights::BASIC;

    fn on_destroy(&self, _state: &mut LinkState) {
        DEPTH.with(|d| {
            d.set(d.get() + 1);
            MAX_DEPTH.with(|m| m.set(m.get().max(d.get())));
        });
    }
}

/// A long ownership chain is torn down iteratively
#[test]
fn test_chain_teardown_has_constant_depth() {
    const LINKS: usize = 100_000;

    // A small stack makes a recursive teardown overflow long before the end.
    let worker = std::thread::Builder::new()
        .stack_size(256 * 1024)
        .spawn(|| {
            let mut head: Option<KernelRef<SoloDispatcher<LinkKind>>> = None;
            for _ in 0..LINKS {
                let state = LinkState {
                    next: head.take(),
                    probe: DepthProbe,
                };
                head = Some(SoloDispatcher::publish(LinkKind, state, Signals::empty()));
            }
            let before = counters::snapshot();
            drop(head);
            let after = counters::snapshot();

            assert!(!deleter::is_deleting());
            assert_eq!(deleter::pending(), 0);
            assert!(
                after.destroyed(ObjType::Event) - before.destroyed(ObjType::Event)
                    >= LINKS as u64
            );
            (MAX_DEPTH.with(|m| m.get()), DEPTH.with(|d| d.get()))
        })
        .unwrap();

    let (max_depth, depth) = worker.join().unwrap();
    assert_eq!(max_depth, 1);
    assert_eq!(depth, 0);
}

#[test]
fn test_zero_handles_and_destroy_are_separate() {
    let (a, b, rights) = EventPairDispatcher::create(0).unwrap();
    let handle = Handle::make(a.clone(), rights);
    assert_eq!(a.handle_count(), 1);

    drop(handle);
    assert_eq!(a.handle_count(), 0);
    // The object is still alive through `a`, only its handles are gone
    assert!(b.signals().contains(Signals::PEER_CLOSED));
    assert_eq!(a.get_type(), ObjType::EventPair);
    assert!(a.is_waitable());
}
