//! Process-wide allocation accounting.
//!
//! Kept in its own test binary so no other test moves the global counters.

use std::sync::Arc;

use tether_resource::alloc::{self, AllocStats};
use tether_resource::{CountingHook, RequestOptions, Resource, ResourceOptions};

#[test]
fn global_counters_balance_after_full_lifecycle() {
    let hook = Arc::new(CountingHook::new());
    alloc::set_hook(Some(hook.clone()));
    let before = alloc::stats();

    {
        let resource = Resource::new(ResourceOptions::new()).unwrap();
        resource.open(|_, _| {}).unwrap();
        resource.submit(RequestOptions::user().data(vec![0u8; 64])).unwrap();
        resource.close(|_, _| {}).unwrap();
        resource.destroy(|_, _| {}).unwrap();
        assert!(resource.is_released());
    }

    // Caller-owned entities are not accounted.
    let caller = Resource::init(ResourceOptions::new()).unwrap();
    caller.destroy(|_, _| {}).unwrap();

    let after = alloc::stats();
    alloc::set_hook(None);

    let delta = AllocStats {
        alloc: after.alloc - before.alloc,
        free: after.free - before.free,
    };
    // The resource itself, four explicit requests and the close queued by
    // destroy, plus the two requests of the caller-owned destroy.
    assert_eq!(delta.alloc, 8);
    assert!(delta.is_balanced());
    assert_eq!(hook.stats(), delta);
    assert_eq!(alloc::alloc_count(), after.alloc);
    assert_eq!(alloc::free_count(), after.free);
}
