use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use cadence_core::scheduler::SchedulerExt;

use super::{MainThreadScheduler, ThreadRunLoop};

fn push(log: &Arc<Mutex<Vec<u32>>>, value: u32) -> impl FnOnce() + Send + 'static {
    let log = Arc::clone(log);
    move || log.lock().unwrap().push(value)
}

#[test]
fn main_thread_calls_run_inline_in_order() {
    let run_loop = ThreadRunLoop::for_current_thread();
    let scheduler = MainThreadScheduler::new(run_loop.clone());
    let log = Arc::new(Mutex::new(Vec::new()));

    for i in 0..5 {
        scheduler.schedule_fn(push(&log, i));
        assert_eq!(log.lock().unwrap().len() as u32, i + 1, "ran before schedule returned");
    }
    assert_eq!(*log.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    assert_eq!(run_loop.run_pending(), 0, "inline path posts nothing");
}

#[test]
fn background_calls_wait_for_the_run_loop() {
    let run_loop = ThreadRunLoop::for_current_thread();
    let scheduler = MainThreadScheduler::new(run_loop.clone());
    let ran_on = Arc::new(Mutex::new(Vec::new()));

    let s = scheduler.clone();
    let r = Arc::clone(&ran_on);
    thread::spawn(move || {
        assert!(!s.is_main_thread());
        for _ in 0..3 {
            let r = Arc::clone(&r);
            s.schedule_fn(move || r.lock().unwrap().push(thread::current().id()));
        }
    })
    .join()
    .unwrap();

    assert!(ran_on.lock().unwrap().is_empty());
    assert_eq!(scheduler.pending_count(), 3);

    run_loop.run_pending();
    let main_id = thread::current().id();
    assert_eq!(*ran_on.lock().unwrap(), vec![main_id; 3]);
    assert_eq!(scheduler.pending_count(), 0);
}

#[test]
fn background_work_runs_before_later_main_thread_work() {
    let run_loop = ThreadRunLoop::for_current_thread();
    let scheduler = MainThreadScheduler::new(run_loop.clone());
    let log = Arc::new(Mutex::new(Vec::new()));

    let (s, l) = (scheduler.clone(), Arc::clone(&log));
    thread::spawn(move || {
        s.schedule_fn(push(&l, 0));
        s.schedule_fn(push(&l, 1));
    })
    .join()
    .unwrap();

    let (s, l) = (scheduler.clone(), Arc::clone(&log));
    thread::spawn(move || s.schedule_fn(push(&l, 2)))
        .join()
        .unwrap();

    scheduler.schedule_fn(push(&log, 3));
    scheduler.schedule_fn(push(&log, 4));
    assert_eq!(*log.lock().unwrap(), vec![0, 1, 2, 3, 4]);

    // The posted drain finds nothing left to do.
    run_loop.run_pending();
    assert_eq!(*log.lock().unwrap(), vec![0, 1, 2, 3, 4]);
}

#[test]
fn many_background_posts_drain_exactly_once() {
    let run_loop = ThreadRunLoop::for_current_thread();
    let scheduler = MainThreadScheduler::new(run_loop.clone());
    let log = Arc::new(Mutex::new(Vec::new()));

    let producers: Vec<_> = (0..4u32)
        .map(|p| {
            let s = scheduler.clone();
            let l = Arc::clone(&log);
            thread::spawn(move || {
                for i in 0..50 {
                    s.schedule_fn(push(&l, p * 1000 + i));
                }
            })
        })
        .collect();
    for p in producers {
        p.join().unwrap();
    }

    let posted = run_loop.run_pending();
    assert!(posted >= 1);
    assert!(posted <= 200, "at most one drain request per action");

    let log = log.lock().unwrap();
    assert_eq!(log.len(), 200);
    for p in 0..4u32 {
        let ours: Vec<u32> = log.iter().copied().filter(|v| v / 1000 == p).collect();
        let expected: Vec<u32> = (0..50).map(|i| p * 1000 + i).collect();
        assert_eq!(ours, expected, "producer {p} order preserved");
    }
    assert_eq!(scheduler.metrics().executed, 200);
}

#[test]
fn disposing_before_drain_prevents_execution() {
    let run_loop = ThreadRunLoop::for_current_thread();
    let scheduler = MainThreadScheduler::new(run_loop.clone());
    let log = Arc::new(Mutex::new(Vec::new()));

    let (s, l) = (scheduler.clone(), Arc::clone(&log));
    let (keep, cancel) = thread::spawn(move || (s.schedule_fn(push(&l, 1)), s.schedule_fn(push(&l, 2))))
        .join()
        .unwrap();

    cancel.dispose();
    run_loop.run_pending();
    assert_eq!(*log.lock().unwrap(), vec![1]);
    assert!(!keep.is_disposed());
    assert_eq!(scheduler.metrics().skipped, 1);
}

#[test]
fn closed_run_loop_rejects_work() {
    let run_loop = ThreadRunLoop::for_current_thread();
    let scheduler = MainThreadScheduler::new(run_loop.clone());
    run_loop.close();

    let hits = Arc::new(AtomicUsize::new(0));
    let (s, h) = (scheduler.clone(), Arc::clone(&hits));
    let handle = thread::spawn(move || {
        s.schedule_fn(move || {
            h.fetch_add(1, Ordering::SeqCst);
        })
    })
    .join()
    .unwrap();

    assert!(handle.is_disposed());
    assert_eq!(scheduler.pending_count(), 0);

    // Every later call is refused outright, even on the designated thread.
    let h = Arc::clone(&hits);
    let later = scheduler.schedule_fn(move || {
        h.fetch_add(1, Ordering::SeqCst);
    });
    assert!(later.is_disposed());
    assert_eq!(hits.load(Ordering::SeqCst), 0);

    let m = scheduler.metrics();
    assert_eq!(m.rejected, 2);
    assert_eq!(m.executed, 0);
}

#[test]
fn drives_a_dedicated_main_thread() {
    let (tx, rx) = mpsc::channel();
    let main = thread::spawn(move || {
        let run_loop = ThreadRunLoop::for_current_thread();
        tx.send(Arc::clone(&run_loop)).unwrap();
        run_loop.run_until_stopped();
    });
    let run_loop = rx.recv().unwrap();
    let scheduler = MainThreadScheduler::new(run_loop.clone());
    let ran_on = Arc::new(Mutex::new(Vec::new()));

    for _ in 0..3 {
        let r = Arc::clone(&ran_on);
        scheduler.schedule_fn(move || r.lock().unwrap().push(thread::current().id()));
    }

    let deadline = Instant::now() + Duration::from_secs(5);
    while ran_on.lock().unwrap().len() < 3 {
        assert!(Instant::now() < deadline, "main thread never drained");
        thread::sleep(Duration::from_millis(5));
    }
    run_loop.stop();
    main.join().unwrap();

    assert_eq!(*ran_on.lock().unwrap(), vec![run_loop.owner(); 3]);
}
