use stagebuf_buffer::{Allocator, ByteBuffer};
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Barrier,
    },
    thread,
};

#[derive(Default)]
struct Counting {
    recycled: AtomicUsize,
}

impl Allocator for Counting {
    fn take(&self, size: usize) -> Option<Box<[u8]>> {
        Some(vec![0u8; size].into_boxed_slice())
    }

    fn recycle(&self, _: Box<[u8]>) {
        self.recycled.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn concurrent_release_recycles_once() {
    const HANDLES: usize = 16;
    const ROUNDS: usize = 50;

    let counting = Arc::new(Counting::default());
    let pool: Arc<dyn Allocator> = counting.clone();

    for round in 0..ROUNDS {
        let mut root = ByteBuffer::allocate_in(HANDLES * 4, &pool);
        for i in 0..HANDLES {
            root.put(&(i as u32).to_be_bytes()).unwrap();
        }
        let slices: Vec<_> = (0..HANDLES).map(|i| root.get_slice(i * 4, 4)).collect();
        assert_eq!(root.references(), HANDLES + 1);
        drop(root);

        let barrier = Arc::new(Barrier::new(HANDLES));
        let workers: Vec<_> = slices
            .into_iter()
            .enumerate()
            .map(|(i, slice)| {
                let barrier = barrier.clone();
                thread::spawn(move || {
                    assert_eq!(slice.unread(), (i as u32).to_be_bytes());
                    barrier.wait();
                    drop(slice);
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(counting.recycled.load(Ordering::SeqCst), round + 1);
    }
}

#[test]
fn weak_upgrade_races_release() {
    let counting = Arc::new(Counting::default());
    let pool: Arc<dyn Allocator> = counting.clone();

    let mut root = ByteBuffer::allocate_in(8, &pool);
    root.put(b"abcdefgh").unwrap();
    let weak = root.downgrade();

    let upgrader = thread::spawn(move || {
        while let Some(handle) = weak.try_add_reference() {
            assert_eq!(handle.unread(), b"abcdefgh");
        }
        assert!(weak.add_reference().is_err());
    });
    thread::sleep(std::time::Duration::from_millis(10));
    drop(root);

    upgrader.join().unwrap();
    assert_eq!(counting.recycled.load(Ordering::SeqCst), 1);
}

#[test]
fn handles_move_across_threads() {
    let mut root = ByteBuffer::allocate(64).with_auto_grow(true);
    root.put(b"ping").unwrap();
    let reference = root.add_reference();

    let echoed = thread::spawn(move || {
        let mut reply = ByteBuffer::allocate(4).with_auto_grow(true);
        reply.put(reference.unread()).unwrap();
        reply.put(b"-pong").unwrap();
        reference.dispose();
        reply
    })
    .join()
    .unwrap();

    assert_eq!(echoed.unread(), b"ping-pong");
    assert_eq!(root.references(), 1);
}
