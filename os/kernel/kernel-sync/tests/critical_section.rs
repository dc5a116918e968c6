use kernel_sync::CriticalSection;
use std::panic;

#[test]
fn enter_and_raii_release() {
    let cs = CriticalSection::new(0_u32);

    {
        let mut g = cs.enter();
        *g = 41;
        assert!(cs.is_held());
    }
    assert!(!cs.is_held());

    {
        let mut g = cs.enter();
        *g += 1;
        assert_eq!(*g, 42);
    }
}

#[test]
fn try_enter_fails_while_held() {
    let cs = CriticalSection::new(1u8);

    let g1 = cs.try_enter();
    assert!(g1.is_some());
    assert_eq!(**g1.as_ref().unwrap(), 1);

    assert!(cs.try_enter().is_none());

    drop(g1);
    assert!(cs.try_enter().is_some());
}

#[test]
fn early_return_releases_section() {
    fn fallible(cs: &CriticalSection<Vec<u32>>, fail: bool) -> Result<usize, &'static str> {
        let mut g = cs.enter();
        g.push(1);
        if fail {
            return Err("bail out");
        }
        g.push(2);
        Ok(g.len())
    }

    let cs = CriticalSection::new(Vec::new());
    assert_eq!(fallible(&cs, true), Err("bail out"));
    assert!(!cs.is_held());
    assert_eq!(fallible(&cs, false), Ok(3));
    assert_eq!(cs.with(|v| v.clone()), vec![1, 1, 2]);
}

#[test]
fn get_mut_and_into_inner() {
    let mut cs = CriticalSection::new(vec![1, 2, 3]);
    cs.get_mut().push(4);
    assert_eq!(cs.into_inner(), vec![1, 2, 3, 4]);
}

#[test]
fn contended_updates_are_exclusive() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;

    let threads = 8;
    let iters = 5_000;

    let cs = Arc::new(CriticalSection::new((0usize, 0usize)));
    let inside = Arc::new(AtomicUsize::new(0));
    let start = Arc::new(Barrier::new(threads));

    let mut handles = Vec::with_capacity(threads);
    for _ in 0..threads {
        let cs = Arc::clone(&cs);
        let inside = Arc::clone(&inside);
        let start = Arc::clone(&start);
        handles.push(thread::spawn(move || {
            start.wait();
            for _ in 0..iters {
                cs.with(|(used, allocs)| {
                    let prev = inside.fetch_add(1, Ordering::SeqCst);
                    assert_eq!(prev, 0, "mutual exclusion violated");
                    *used += 4096;
                    *allocs += 1;
                    inside.fetch_sub(1, Ordering::SeqCst);
                });
                thread::yield_now();
            }
        }));
    }

    for h in handles {
        h.join().unwrap();
    }

    let (used, allocs) = cs.with(|c| *c);
    assert_eq!(allocs, threads * iters);
    assert_eq!(used, threads * iters * 4096);
}

#[test]
fn section_is_released_on_panic() {
    let cs = CriticalSection::new(0u32);

    let res = panic::catch_unwind(panic::AssertUnwindSafe(|| {
        cs.with(|v| {
            *v = 123;
            panic!("boom");
        });
    }));
    assert!(res.is_err(), "expected panic");

    assert_eq!(cs.with(|v| *v), 123);
}

#[test]
fn critical_section_is_sync_for_send_data() {
    fn takes_sync<S: Sync>(_s: &S) {}
    let cs = CriticalSection::new(0u8);
    takes_sync(&cs);
}
