//! One detector driven from several real threads.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use racetrack_core::{Detector, DetectorConfig, LockId, RaceKind, ThreadId};

const WORKERS: u64 = 8;
const ITERATIONS: u64 = 500;

fn setup() -> (Detector, Arc<AtomicUsize>, Arc<Mutex<Vec<RaceKind>>>) {
    let detector = Detector::new();
    let count = Arc::new(AtomicUsize::new(0));
    let kinds = Arc::new(Mutex::new(Vec::new()));
    let (c, k) = (Arc::clone(&count), Arc::clone(&kinds));
    detector
        .init(DetectorConfig::default().with_shadow_shards(16), move |race| {
            c.fetch_add(1, Ordering::Relaxed);
            k.lock().unwrap().push(race.kind);
        })
        .unwrap();
    (detector, count, kinds)
}

#[test]
fn test_disjoint_and_locked_accesses_do_not_race() {
    let (detector, races, _) = setup();
    let handles: Vec<_> = (0..WORKERS)
        .map(|i| detector.fork(ThreadId(0), ThreadId(i + 1)).unwrap())
        .collect();
    let counter = 0xC0;
    let lock = LockId(0x10C);

    thread::scope(|s| {
        for (i, handle) in (0u64..).zip(&handles) {
            let detector = &detector;
            s.spawn(move || {
                let private = 0x10_0000 + i * 0x1000;
                detector.func_enter(handle, 0x400 + i).unwrap();
                for n in 0..ITERATIONS {
                    detector.write(handle, private + (n % 64) * 8, n, 8).unwrap();
                    detector.read(handle, private + (n % 64) * 8, n, 8).unwrap();
                }
                for n in 0..ITERATIONS / 10 {
                    detector.acquire(handle, lock).unwrap();
                    detector.read(handle, counter, n, 8).unwrap();
                    detector.write(handle, counter, n, 8).unwrap();
                    detector.release(handle, lock).unwrap();
                }
                detector.func_exit(handle).unwrap();
            });
        }
    });

    for i in 0..WORKERS {
        detector.join(ThreadId(0), ThreadId(i + 1)).unwrap();
    }
    let summary = detector.finalize().unwrap();
    assert_eq!(races.load(Ordering::Relaxed), 0);
    assert_eq!(summary.unjoined, vec![ThreadId(0)]);
}

#[test]
fn test_unsynchronized_writes_race_regardless_of_interleaving() {
    let (detector, races, kinds) = setup();
    let handles: Vec<_> = (0..WORKERS)
        .map(|i| detector.fork(ThreadId(0), ThreadId(i + 1)).unwrap())
        .collect();

    thread::scope(|s| {
        for handle in &handles {
            let detector = &detector;
            s.spawn(move || detector.write(handle, 0xBAD, 0, 4).unwrap());
        }
    });
    detector.finalize().unwrap();

    // Every write after the first conflicts with exactly one earlier writer.
    assert_eq!(races.load(Ordering::Relaxed), usize::try_from(WORKERS - 1).unwrap());
    assert!(kinds.lock().unwrap().iter().all(|k| *k == RaceKind::WriteWrite));
}
