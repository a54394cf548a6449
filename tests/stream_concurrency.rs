//! S4: two concurrent `write_async` callers on the same multi-writer
//! stream never interleave their bytes on the wire.

use std::io::Read;
use std::sync::mpsc;

use nanoserve::provider::{AsyncProvider, AsyncProviderConfig};
use nanoserve::socket;
use nanoserve::stream::Stream;

#[test]
fn s4_concurrent_writes_never_interleave() {
    let provider = AsyncProvider::new(AsyncProviderConfig { epoll_dispatchers: 1, poll_dispatchers: 0, scheduler: false, threads: 1 })
        .expect("provider");
    let (a, mut b) = socket::pair().expect("socket pair");
    b.set_nonblocking(false).expect("blocking peer");
    let stream = Stream::new(a, provider);

    let (tx, rx) = mpsc::channel();
    let tx2 = tx.clone();
    let s1 = stream.clone();
    let s2 = stream.clone();

    let t1 = std::thread::spawn(move || {
        s1.write_async(b"AA".to_vec(), Box::new(move |ok| tx.send(ok).unwrap()));
    });
    let t2 = std::thread::spawn(move || {
        s2.write_async(b"BB".to_vec(), Box::new(move |ok| tx2.send(ok).unwrap()));
    });
    t1.join().unwrap();
    t2.join().unwrap();

    assert!(rx.recv().unwrap());
    assert!(rx.recv().unwrap());

    let mut buf = [0u8; 4];
    b.read_exact(&mut buf).expect("read combined writes");
    let combined = String::from_utf8_lossy(&buf).to_string();
    assert!(combined == "AABB" || combined == "BBAA", "writes interleaved: {combined}");
}
