use autopool::{Release, CAPACITY};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

struct Counter(AtomicUsize);

impl Counter {
    const fn new() -> Self {
        Self(AtomicUsize::new(0))
    }

    fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

impl Release for Counter {
    fn release(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Registers `then` on release; used to autorelease during teardown
struct Chained {
    hits: Counter,
    then: &'static Counter,
}

impl Release for Chained {
    fn release(&self) {
        self.hits.release();
        autopool::autorelease(self.then);
    }
}

/// Opens a scope of its own on release; used to push during teardown
struct Scoped {
    hits: Counter,
    inner: &'static Counter,
    pages_seen: AtomicUsize,
}

impl Release for Scoped {
    fn release(&self) {
        self.hits.release();
        autopool::scope(|| {
            autopool::autorelease(self.inner);
        });
        autopool::print_all();
        autopool::print_hiwat();
        let seen = autopool::snapshot().pages.len() + autopool::hiwat() as usize;
        self.pages_seen.store(seen, Ordering::SeqCst);
    }
}

fn distinct(count: usize) -> Vec<&'static Counter> {
    (0..count)
        .map(|_| &*Box::leak(Box::new(Counter::new())))
        .collect()
}

#[test]
fn test_threads_have_independent_pools() {
    static LEFT: Counter = Counter::new();
    static RIGHT: Counter = Counter::new();

    let left = thread::spawn(|| {
        let token = autopool::push();
        // Distinct objects so coalescing cannot shrink the count
        for object in distinct(300) {
            autopool::autorelease(object);
        }
        autopool::autorelease(&LEFT);
        let snapshot = autopool::snapshot();
        autopool::pop(token);
        (snapshot, autopool::hiwat())
    });

    let right = thread::spawn(|| {
        let token = autopool::push();
        autopool::autorelease(&RIGHT);
        let snapshot = autopool::snapshot();
        autopool::pop(token);
        (snapshot, autopool::hiwat())
    });

    let (left_snapshot, left_hiwat) = left.join().expect("left thread");
    let (right_snapshot, right_hiwat) = right.join().expect("right thread");

    assert_ne!(left_snapshot.thread, right_snapshot.thread);
    assert_eq!(left_snapshot.pending_releases(), 301);
    assert_eq!(right_snapshot.pending_releases(), 1);
    assert_eq!(left_snapshot.pages.len(), 302 / CAPACITY + 1);
    assert_eq!(right_snapshot.pages.len(), 1);

    assert_eq!(left_hiwat, 302);
    assert_eq!(right_hiwat, 0);
    assert_eq!(LEFT.get(), 1);
    assert_eq!(RIGHT.get(), 1);
}

#[test]
fn test_thread_exit_releases_pending() {
    static PENDING: Counter = Counter::new();

    thread::spawn(|| {
        let _outer = autopool::push();
        autopool::autorelease(&PENDING);
        let _inner = autopool::push();
        autopool::autorelease(&PENDING);
        autopool::autorelease(&PENDING);
        // Exits without popping
    })
    .join()
    .expect("thread");

    assert_eq!(PENDING.get(), 3);
}

#[test]
fn test_thread_exit_with_placeholder_only() {
    thread::spawn(|| {
        let _token = autopool::push();
    })
    .join()
    .expect("thread");
}

#[test]
fn test_autorelease_during_teardown_leaks() {
    static LATE: Counter = Counter::new();
    static FIRST: Chained = Chained {
        hits: Counter::new(),
        then: &LATE,
    };

    thread::spawn(|| {
        let _token = autopool::push();
        autopool::autorelease(&FIRST);
    })
    .join()
    .expect("thread");

    assert_eq!(FIRST.hits.get(), 1);
    assert_eq!(LATE.get(), 0);
}

#[test]
fn test_scope_during_teardown_is_inert() {
    static INNER: Counter = Counter::new();
    static SCOPED: Scoped = Scoped {
        hits: Counter::new(),
        inner: &INNER,
        pages_seen: AtomicUsize::new(usize::MAX),
    };

    thread::spawn(|| {
        let _token = autopool::push();
        autopool::autorelease(&SCOPED);
    })
    .join()
    .expect("thread");

    assert_eq!(SCOPED.hits.get(), 1);
    assert_eq!(INNER.get(), 0);
    // Introspection sees an empty pool once it is torn down
    assert_eq!(SCOPED.pages_seen.load(Ordering::SeqCst), 0);
}
