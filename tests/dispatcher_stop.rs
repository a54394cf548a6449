//! S6: stopping the provider while reads are in flight cancels every one
//! of them (success=false) and the next `worker()` call reports done.

use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use nanoserve::provider::{AsyncProvider, AsyncProviderConfig};
use nanoserve::resource::AsyncResource;
use nanoserve::socket;

#[test]
fn s6_stop_cancels_all_in_flight_reads() {
    let provider = AsyncProvider::new(AsyncProviderConfig { epoll_dispatchers: 1, poll_dispatchers: 0, scheduler: false, threads: 1 })
        .expect("provider");

    let counter = Arc::new(AtomicUsize::new(0));
    let mut keep_alive = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(3600);

    for _ in 0..10 {
        let (a, b) = socket::pair().expect("socket pair");
        let fd = a.as_raw_fd();
        let counter = counter.clone();
        provider
            .wait_async(
                AsyncResource::Readable(fd),
                deadline,
                Box::new(move |success| {
                    assert!(!success, "expected cancellation, not readiness");
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .expect("registration accepted");
        keep_alive.push((a, b));
    }

    provider.stop();

    let mut iterations = 0;
    while provider.worker() {
        iterations += 1;
        assert!(iterations < 1000, "worker() never drained");
    }

    assert_eq!(counter.load(Ordering::SeqCst), 10);
    assert!(!provider.worker());
}
