use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use serde::Serialize;
use switchyard::{Bindable, BridgeConfig, DispatchError, MethodTable, QuickJsEngine, Window};

const PRODUCERS: usize = 8;
const JOBS_PER_PRODUCER: usize = 200;

#[derive(Debug, Default, Serialize)]
struct Counter {
    value: i64,
}

impl Bindable for Counter {
    fn register(methods: &mut MethodTable<Self>) {
        methods.method("Add", |counter: &mut Counter, n: i64| counter.value += n);
    }
}

fn window() -> Window<QuickJsEngine> {
    Window::quickjs(BridgeConfig::default()).expect("window")
}

#[test]
fn jobs_from_many_threads_run_once_on_the_ui_thread() {
    let mut window = window();
    let ui_thread = thread::current().id();
    let ran = Arc::new(Mutex::new(HashSet::new()));
    let off_thread = Arc::new(AtomicUsize::new(0));

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|producer| {
            let handle = window.dispatch_handle();
            let ran = Arc::clone(&ran);
            let off_thread = Arc::clone(&off_thread);
            thread::spawn(move || {
                for job in 0..JOBS_PER_PRODUCER {
                    let ran = Arc::clone(&ran);
                    let off_thread = Arc::clone(&off_thread);
                    handle
                        .dispatch(move |_| {
                            if thread::current().id() != ui_thread {
                                off_thread.fetch_add(1, Ordering::SeqCst);
                            }
                            let fresh = ran.lock().unwrap().insert((producer, job));
                            assert!(fresh, "job {producer}/{job} ran twice");
                        })
                        .expect("dispatch");
                }
            })
        })
        .collect();

    for producer in producers {
        producer.join().expect("producer thread");
    }

    assert_eq!(window.pending_jobs(), PRODUCERS * JOBS_PER_PRODUCER);
    assert_eq!(window.run_until_idle(), PRODUCERS * JOBS_PER_PRODUCER);
    assert_eq!(window.pending_jobs(), 0);
    assert_eq!(ran.lock().unwrap().len(), PRODUCERS * JOBS_PER_PRODUCER);
    assert_eq!(off_thread.load(Ordering::SeqCst), 0);
}

#[test]
fn tokio_tasks_feed_a_running_loop() {
    let mut window = window();
    let ran = Arc::new(AtomicUsize::new(0));
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .build()
        .expect("runtime");

    let handle = window.dispatch_handle();
    let counter = Arc::clone(&ran);
    rt.spawn(async move {
        let tasks: Vec<_> = (0..PRODUCERS)
            .map(|_| {
                let handle = handle.clone();
                let counter = Arc::clone(&counter);
                tokio::spawn(async move {
                    for _ in 0..JOBS_PER_PRODUCER {
                        let counter = Arc::clone(&counter);
                        handle
                            .dispatch(move |_| {
                                counter.fetch_add(1, Ordering::SeqCst);
                            })
                            .expect("dispatch");
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.expect("producer task");
        }
        handle
            .dispatch(|window| window.terminate())
            .expect("dispatch terminate");
    });

    window.run();

    assert!(window.is_terminated());
    assert_eq!(ran.load(Ordering::SeqCst), PRODUCERS * JOBS_PER_PRODUCER);
}

#[test]
fn scheduled_sync_reaches_script() {
    let mut window = window();
    let counter = Arc::new(Mutex::new(Counter::default()));
    let sync = window.bind("counter", Arc::clone(&counter)).expect("bind");
    let handle = window.dispatch_handle();

    let worker_state = Arc::clone(&counter);
    thread::spawn(move || {
        worker_state.lock().unwrap().value = 12;
        sync.schedule(&handle).expect("schedule");
    })
    .join()
    .expect("worker thread");

    assert_eq!(window.run_until_idle(), 1);
    let value: i64 = window
        .engine()
        .eval_with("counter.data.value", "dispatch_test.js")
        .expect("value");
    assert_eq!(value, 12);
}

#[test]
fn stale_tokens_do_nothing() {
    let mut window = window();
    let ran = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&ran);
    let token = window
        .dispatch(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .expect("dispatch");
    assert!(window.drain_one(token));
    assert!(!window.drain_one(token));

    // The loop still sees the wake event for the drained token.
    assert_eq!(window.run_until_idle(), 1);
    assert_eq!(ran.load(Ordering::SeqCst), 1);

    let raw = token.into_raw();
    assert!(!window.drain_one(switchyard::DispatchToken::from_raw(raw)));
}

#[test]
fn terminated_and_closed_windows_refuse_jobs() {
    let window = window();
    let handle = window.dispatch_handle();

    window.terminate();
    let err = thread::spawn(move || handle.dispatch(|_| {}).unwrap_err())
        .join()
        .expect("thread");
    assert_eq!(err, DispatchError::Terminated);

    let window = self::window();
    let handle = window.dispatch_handle();
    drop(window);
    assert_eq!(handle.dispatch(|_| {}).unwrap_err(), DispatchError::WindowClosed);
}
