use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;

use cadence_core::config::{QueueKind, WorkerPoolConfig};
use cadence_core::disposable::DisposableRef;
use cadence_core::scheduler::{offset, DateScheduler, DateSchedulerExt, SchedulerExt};

use super::WorkerPoolScheduler;

fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    done()
}

fn counter() -> (Arc<AtomicUsize>, impl Fn() -> usize) {
    let count = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&count);
    (count, move || c.load(Ordering::SeqCst))
}

#[test]
fn suspended_pool_holds_actions_until_resumed() {
    let scheduler = WorkerPoolScheduler::concurrent(4).unwrap();
    scheduler.suspend();
    assert!(scheduler.is_suspended());

    let submitter = thread::current().id();
    let (count, read) = counter();
    let ran_off_thread = Arc::new(AtomicUsize::new(0));
    for _ in 0..5 {
        let (c, off) = (Arc::clone(&count), Arc::clone(&ran_off_thread));
        scheduler.schedule_fn(move || {
            if thread::current().id() != submitter {
                off.fetch_add(1, Ordering::SeqCst);
            }
            c.fetch_add(1, Ordering::SeqCst);
        });
    }

    thread::sleep(Duration::from_millis(50));
    assert_eq!(read(), 0);
    assert_eq!(scheduler.backlog(), 5);

    scheduler.resume();
    assert!(wait_until(Duration::from_secs(5), || read() == 5));
    assert_eq!(ran_off_thread.load(Ordering::SeqCst), 5);
    assert_eq!(scheduler.metrics().executed, 5);
}

#[test]
fn suspended_serial_pool_resumes_in_submission_order() {
    let scheduler = WorkerPoolScheduler::new(&WorkerPoolConfig {
        start_suspended: true,
        ..WorkerPoolConfig::serial()
    })
    .unwrap();
    assert!(scheduler.is_suspended());

    let log = Arc::new(Mutex::new(Vec::new()));
    for i in 0..10 {
        let l = Arc::clone(&log);
        scheduler.schedule_fn(move || l.lock().unwrap().push(i));
    }
    thread::sleep(Duration::from_millis(30));
    assert!(log.lock().unwrap().is_empty());

    scheduler.resume();
    assert!(wait_until(Duration::from_secs(5), || log.lock().unwrap().len() == 10));
    assert_eq!(*log.lock().unwrap(), (0..10).collect::<Vec<_>>());
}

#[test]
fn schedule_never_runs_inline_even_from_a_worker() {
    let scheduler = WorkerPoolScheduler::serial().unwrap();
    let (tx, rx) = mpsc::channel();

    let s = scheduler.clone();
    scheduler.schedule_fn(move || {
        let ran_inline = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&ran_inline);
        s.schedule_fn(move || {
            r.fetch_add(1, Ordering::SeqCst);
        });
        // A serial worker cannot run the nested action before this one ends.
        tx.send(ran_inline.load(Ordering::SeqCst)).unwrap();
    });

    let seen = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(seen, 0);
    assert!(wait_until(Duration::from_secs(5), || scheduler.metrics().executed == 2));
}

#[test]
fn past_dates_run_as_soon_as_possible() {
    let scheduler = WorkerPoolScheduler::concurrent(2).unwrap();
    let (count, read) = counter();
    let c = Arc::clone(&count);
    scheduler.schedule_after_fn(Utc::now() - chrono::Duration::seconds(30), move || {
        c.fetch_add(1, Ordering::SeqCst);
    });
    assert!(wait_until(Duration::from_secs(5), || read() == 1));
    assert_eq!(scheduler.armed_timers(), 0);
}

#[test]
fn equal_dates_run_in_submission_order() {
    let scheduler = WorkerPoolScheduler::serial().unwrap();
    let date = offset(scheduler.now(), Duration::from_millis(40));
    let log = Arc::new(Mutex::new(Vec::new()));
    for i in 0..1000 {
        let l = Arc::clone(&log);
        scheduler.schedule_after_fn(date, move || l.lock().unwrap().push(i));
    }
    assert!(wait_until(Duration::from_secs(10), || log.lock().unwrap().len() == 1000));
    assert_eq!(*log.lock().unwrap(), (0..1000).collect::<Vec<_>>());
}

#[test]
fn equal_past_dates_run_in_submission_order() {
    let scheduler = WorkerPoolScheduler::serial().unwrap();
    scheduler.suspend();
    let date = Utc::now() - chrono::Duration::seconds(1);
    let log = Arc::new(Mutex::new(Vec::new()));
    for i in 0..200 {
        let l = Arc::clone(&log);
        scheduler.schedule_after_fn(date, move || l.lock().unwrap().push(i));
    }
    scheduler.resume();
    assert!(wait_until(Duration::from_secs(10), || log.lock().unwrap().len() == 200));
    assert_eq!(*log.lock().unwrap(), (0..200).collect::<Vec<_>>());
}

#[test]
fn now_tracks_the_wall_clock() {
    let scheduler = WorkerPoolScheduler::serial().unwrap();
    let before = Utc::now();
    let first = scheduler.now();
    thread::sleep(Duration::from_millis(20));
    let second = scheduler.now();
    assert!(second > first);
    assert!((first - before).num_seconds().abs() < 1);
}

#[test]
fn delayed_action_waits_for_its_date() {
    let scheduler = WorkerPoolScheduler::concurrent(2).unwrap();
    let started = Instant::now();
    let (tx, rx) = mpsc::channel();
    scheduler.schedule_after_interval(Duration::from_millis(60), move || {
        tx.send(started.elapsed()).unwrap();
    });
    assert_eq!(scheduler.armed_timers(), 1);

    let elapsed = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(elapsed >= Duration::from_millis(50), "fired after {elapsed:?}");
}

#[test]
fn disposed_delayed_action_never_runs() {
    let scheduler = WorkerPoolScheduler::concurrent(2).unwrap();
    let (count, read) = counter();
    let c = Arc::clone(&count);
    let handle = scheduler.schedule_after_interval(Duration::from_millis(30), move || {
        c.fetch_add(1, Ordering::SeqCst);
    });
    handle.dispose();
    assert_eq!(scheduler.armed_timers(), 0);

    thread::sleep(Duration::from_millis(80));
    assert_eq!(read(), 0);
}

#[test]
fn disposed_immediate_action_is_skipped() {
    let scheduler = WorkerPoolScheduler::serial().unwrap();
    scheduler.suspend();
    let (count, read) = counter();
    let c = Arc::clone(&count);
    let handle = scheduler.schedule_fn(move || {
        c.fetch_add(1, Ordering::SeqCst);
    });
    handle.dispose();
    scheduler.resume();

    assert!(wait_until(Duration::from_secs(5), || scheduler.metrics().skipped == 1));
    assert_eq!(read(), 0);
}

#[test]
fn repeating_action_stops_after_dispose() {
    let scheduler = WorkerPoolScheduler::concurrent(2).unwrap();
    let (count, read) = counter();
    let c = Arc::clone(&count);
    let handle = scheduler.schedule_repeating_fn(
        Utc::now(),
        Duration::from_millis(5),
        Duration::ZERO,
        move || {
            c.fetch_add(1, Ordering::SeqCst);
        },
    );

    assert!(wait_until(Duration::from_secs(5), || read() >= 3));
    handle.dispose();
    assert_eq!(scheduler.armed_timers(), 0);

    // A firing that passed its disposal check just before may still finish.
    thread::sleep(Duration::from_millis(20));
    let fired = read();
    thread::sleep(Duration::from_millis(60));
    assert_eq!(read(), fired, "no firing after dispose returned");
}

#[test]
fn repeating_action_can_dispose_itself() {
    let scheduler = WorkerPoolScheduler::serial().unwrap();
    let slot: Arc<Mutex<Option<DisposableRef>>> = Arc::new(Mutex::new(None));
    let (count, read) = counter();

    // Hold the pool until the handle is stored so the first firing sees it.
    scheduler.suspend();
    let (c, s) = (Arc::clone(&count), Arc::clone(&slot));
    let handle = scheduler.schedule_repeating_fn(
        Utc::now(),
        Duration::from_millis(2),
        Duration::ZERO,
        move || {
            if c.fetch_add(1, Ordering::SeqCst) + 1 == 3 {
                if let Some(h) = s.lock().unwrap().as_ref() {
                    h.dispose();
                }
            }
        },
    );
    *slot.lock().unwrap() = Some(Arc::clone(&handle));
    scheduler.resume();

    assert!(wait_until(Duration::from_secs(5), || handle.is_disposed()));
    thread::sleep(Duration::from_millis(40));
    assert_eq!(read(), 3);
}

#[test]
fn suspended_repeating_action_does_not_pile_up() {
    let scheduler = WorkerPoolScheduler::serial().unwrap();
    scheduler.suspend();
    let (count, read) = counter();
    let c = Arc::clone(&count);
    let handle = scheduler.schedule_repeating_fn(
        Utc::now(),
        Duration::from_millis(2),
        Duration::ZERO,
        move || {
            c.fetch_add(1, Ordering::SeqCst);
        },
    );

    thread::sleep(Duration::from_millis(40));
    assert_eq!(read(), 0);
    assert!(scheduler.backlog() <= 1);

    handle.dispose();
    scheduler.resume();
    assert!(wait_until(Duration::from_secs(5), || scheduler.backlog() == 0));
    assert_eq!(read(), 0);
}

#[test]
fn leeway_coalesces_nearby_registrations() {
    let scheduler = WorkerPoolScheduler::concurrent(2).unwrap();
    let fired_at = Arc::new(Mutex::new(Vec::new()));
    let start = Utc::now();

    let mut handles = Vec::new();
    for delay_ms in [20u64, 40] {
        let f = Arc::clone(&fired_at);
        handles.push(scheduler.schedule_repeating_fn(
            offset(start, Duration::from_millis(delay_ms)),
            Duration::from_secs(60),
            Duration::from_millis(40),
            move || f.lock().unwrap().push(Instant::now()),
        ));
    }

    assert!(wait_until(Duration::from_secs(5), || fired_at.lock().unwrap().len() == 2));
    for h in &handles {
        h.dispose();
    }
    let fired = fired_at.lock().unwrap();
    let gap = if fired[1] > fired[0] {
        fired[1] - fired[0]
    } else {
        fired[0] - fired[1]
    };
    assert!(gap < Duration::from_millis(15), "firings {gap:?} apart");
}

#[test]
fn unbounded_interval_and_leeway_are_clamped() {
    let scheduler = WorkerPoolScheduler::concurrent(2).unwrap();
    let (count, read) = counter();
    let c = Arc::clone(&count);
    let repeating = scheduler.schedule_repeating_fn(
        scheduler.now(),
        Duration::MAX,
        Duration::MAX,
        move || {
            c.fetch_add(1, Ordering::SeqCst);
        },
    );
    assert!(wait_until(Duration::from_secs(5), || read() == 1));

    let (tx, rx) = mpsc::channel();
    scheduler.schedule_after_interval(Duration::from_millis(20), move || {
        tx.send(()).unwrap();
    });
    assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
    assert_eq!(read(), 1);
    assert_eq!(scheduler.armed_timers(), 1);
    repeating.dispose();
}

#[test]
fn far_future_date_stays_armed() {
    let scheduler = WorkerPoolScheduler::serial().unwrap();
    let handle = scheduler.schedule_after_fn(chrono::DateTime::<Utc>::MAX_UTC, || {});
    assert_eq!(scheduler.armed_timers(), 1);
    assert!(!handle.is_disposed());
}

#[test]
fn shutdown_rejects_later_work() {
    let scheduler = WorkerPoolScheduler::concurrent(2).unwrap();
    scheduler.shutdown();
    scheduler.shutdown();
    assert!(scheduler.is_shut_down());

    let (count, read) = counter();
    let c = Arc::clone(&count);
    let now = scheduler.schedule_fn(move || {
        c.fetch_add(1, Ordering::SeqCst);
    });
    let later = scheduler.schedule_after_interval(Duration::from_millis(1), || {});
    let repeating = scheduler.schedule_repeating_fn(
        Utc::now(),
        Duration::from_millis(1),
        Duration::ZERO,
        || {},
    );

    assert!(now.is_disposed());
    assert!(later.is_disposed());
    assert!(repeating.is_disposed());
    thread::sleep(Duration::from_millis(20));
    assert_eq!(read(), 0);

    let m = scheduler.metrics();
    assert_eq!(m.rejected, 3);
    assert_eq!(m.scheduled, 0);
}

#[test]
fn shutdown_drops_backlog_and_disarms_timers() {
    let scheduler = WorkerPoolScheduler::serial().unwrap();
    scheduler.suspend();
    let (count, read) = counter();
    let mut handles = Vec::new();
    for _ in 0..3 {
        let c = Arc::clone(&count);
        handles.push(scheduler.schedule_fn(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
    }
    handles.push(scheduler.schedule_after_interval(Duration::from_secs(60), || {}));
    assert_eq!(scheduler.armed_timers(), 1);
    assert!(handles.iter().all(|h| !h.is_disposed()));

    scheduler.shutdown();
    assert_eq!(scheduler.backlog(), 0);
    assert_eq!(scheduler.armed_timers(), 0);
    assert!(handles.iter().all(|h| h.is_disposed()));
    let m = scheduler.metrics();
    assert_eq!(m.rejected, 4);
    assert_eq!(m.scheduled, 4);

    scheduler.resume();
    thread::sleep(Duration::from_millis(30));
    assert_eq!(read(), 0);
}

#[test]
fn shutdown_counts_a_queued_repeating_firing_once() {
    let scheduler = WorkerPoolScheduler::serial().unwrap();
    scheduler.suspend();
    let handle = scheduler.schedule_repeating_fn(
        scheduler.now(),
        Duration::from_millis(2),
        Duration::ZERO,
        || {},
    );
    assert!(wait_until(Duration::from_secs(5), || scheduler.backlog() == 1));

    scheduler.shutdown();
    assert!(handle.is_disposed());
    assert_eq!(scheduler.metrics().rejected, 1);
}

#[test]
fn panicking_action_does_not_poison_the_pool() {
    let scheduler = WorkerPoolScheduler::serial().unwrap();
    let (count, read) = counter();
    scheduler.schedule_fn(|| panic!("action failed"));
    let c = Arc::clone(&count);
    scheduler.schedule_fn(move || {
        c.fetch_add(1, Ordering::SeqCst);
    });
    assert!(wait_until(Duration::from_secs(5), || read() == 1));
}

#[test]
fn kind_reflects_config() {
    assert_eq!(WorkerPoolScheduler::serial().unwrap().kind(), QueueKind::Serial);
    assert_eq!(
        WorkerPoolScheduler::concurrent(2).unwrap().kind(),
        QueueKind::Concurrent
    );
}
