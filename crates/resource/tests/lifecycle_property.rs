//! Property tests for lifecycle request ordering and final state

mod common;

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use proptest::prelude::*;
use tether_resource::{CountingHook, RequestKind, Resource, ResourceOptions};

use common::{Reply, Scripted};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Open,
    Close,
    Destroy,
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![Just(Op::Open), Just(Op::Close), Just(Op::Destroy)]
}

fn scripted(deferred: bool) -> Scripted {
    let hooks = Scripted::new();
    if deferred {
        for kind in [RequestKind::Open, RequestKind::Close, RequestKind::Destroy] {
            hooks.reply(kind, Reply::Later);
        }
    }
    hooks
}

/// Issue `ops` against a fresh library-owned resource and settle every
/// parked hook. Returns the resource and the callback indices in firing
/// order.
fn drive(ops: &[Op], hooks: &Scripted, counter: &Arc<CountingHook>) -> (Resource, Vec<usize>) {
    let resource = Resource::new(
        ResourceOptions::new()
            .hooks(hooks.clone())
            .alloc_hook(counter.clone()),
    )
    .unwrap();
    let fired = Rc::new(RefCell::new(Vec::new()));

    for (i, op) in ops.iter().enumerate() {
        let fired = fired.clone();
        let done = move |_: &Resource, _: tether_resource::Result<()>| fired.borrow_mut().push(i);
        let issued = match op {
            Op::Open => resource.open(done),
            Op::Close => resource.close(done),
            Op::Destroy => resource.destroy(done),
        };
        issued.unwrap();
    }
    hooks.settle();

    let fired = fired.borrow().clone();
    (resource, fired)
}

proptest! {
    /// Every terminal callback fires exactly once, in issuance order.
    #[test]
    fn callbacks_fire_once_in_order(
        ops in prop::collection::vec(arb_op(), 1..16),
        deferred in any::<bool>(),
    ) {
        let hooks = scripted(deferred);
        let counter = Arc::new(CountingHook::new());
        let (resource, fired) = drive(&ops, &hooks, &counter);

        let expected: Vec<usize> = (0..ops.len()).collect();
        prop_assert_eq!(fired, expected);
        prop_assert_eq!(resource.pending(), 0);
        prop_assert_eq!(resource.queued(), 0);
        prop_assert_eq!(hooks.parked(), 0);
    }

    /// With hooks that always succeed, the resource ends up destroyed iff a
    /// destroy was issued.
    #[test]
    fn destroyed_iff_destroy_issued(
        ops in prop::collection::vec(arb_op(), 1..16),
        deferred in any::<bool>(),
    ) {
        let hooks = scripted(deferred);
        let counter = Arc::new(CountingHook::new());
        let (resource, _) = drive(&ops, &hooks, &counter);

        let destroyed = ops.contains(&Op::Destroy);
        prop_assert_eq!(resource.is_destroyed(), destroyed);
        prop_assert_eq!(resource.is_released(), destroyed);
        if destroyed {
            prop_assert!(!resource.is_opened());
            prop_assert!(resource.is_closed());
        }
    }

    /// Library-owned resources and requests leave no outstanding allocation
    /// once every handle is gone.
    #[test]
    fn allocations_balance(
        ops in prop::collection::vec(arb_op(), 0..16),
        deferred in any::<bool>(),
    ) {
        let hooks = scripted(deferred);
        let counter = Arc::new(CountingHook::new());
        let (resource, _) = drive(&ops, &hooks, &counter);
        drop(resource);

        let stats = counter.stats();
        prop_assert!(stats.is_balanced(), "unbalanced: {:?}", stats);
        // One resource plus at least one request per issued operation.
        prop_assert!(stats.alloc > ops.len());
    }
}
