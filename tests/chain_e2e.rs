//! End-to-end continuation chain behavior: sealing, value flow, error
//! routing, and placement of individual links.

mod common;

use common::init_test_logging;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use twinpool::{CoroHandle, ErrorKind, PoolKind, QueueId, TaskDispatcher};

fn dispatcher() -> TaskDispatcher {
    init_test_logging();
    TaskDispatcher::builder().coro_threads(2).io_threads(1).build()
}

#[test]
fn chain_runs_links_in_order_after_end() {
    let dispatcher = dispatcher();
    let order = Arc::new(Mutex::new(Vec::new()));

    let o1 = Arc::clone(&order);
    let o2 = Arc::clone(&order);
    let o3 = Arc::clone(&order);
    let mut ctx = dispatcher
        .post_first(move |handle: CoroHandle<i32>| async move {
            o1.lock().unwrap().push(1);
            handle.set(1);
            0
        })
        .unwrap()
        .then(move |handle| async move {
            o2.lock().unwrap().push(2);
            handle.set(2);
            0
        })
        .unwrap()
        .then(move |handle| async move {
            o3.lock().unwrap().push(3);
            handle.set(3);
            0
        })
        .unwrap()
        .end();

    assert_eq!(ctx.get().unwrap(), 3);
    assert_eq!(&*order.lock().unwrap(), &[1, 2, 3]);
}

#[test]
fn error_skips_to_handler_and_chain_continues() {
    // f1 -> f2 (fails) -> e (absorbs) -> f4; the terminal future carries
    // f4's value.
    let dispatcher = dispatcher();
    let handler_saw = Arc::new(Mutex::new(None));

    let handler_saw_in_link = Arc::clone(&handler_saw);
    let mut ctx = dispatcher
        .post_first(|handle: CoroHandle<i32>| async move {
            handle.set(1);
            0
        })
        .unwrap()
        .then(|_handle| async move { 23 })
        .unwrap()
        .on_error(move |handle| async move {
            *handler_saw_in_link.lock().unwrap() = handle.chain_error();
            0
        })
        .unwrap()
        .then(|handle| async move {
            handle.set(4);
            0
        })
        .unwrap()
        .end();

    assert_eq!(ctx.get().unwrap(), 4);
    let seen = handler_saw.lock().unwrap().clone().expect("handler ran");
    assert_eq!(seen.kind(), ErrorKind::User(23));
}

#[test]
fn unhandled_error_resolves_the_terminal_future() {
    let dispatcher = dispatcher();
    let skipped = Arc::new(AtomicUsize::new(0));

    let skipped_in_link = Arc::clone(&skipped);
    let mut ctx = dispatcher
        .post_first(|_handle: CoroHandle<i32>| async move { 7 })
        .unwrap()
        .then(move |handle| async move {
            skipped_in_link.fetch_add(1, Ordering::Relaxed);
            handle.set(0);
            0
        })
        .unwrap()
        .end();

    assert_eq!(ctx.get().unwrap_err().kind(), ErrorKind::User(7));
    assert_eq!(skipped.load(Ordering::Relaxed), 0, "then must be skipped");
}

#[test]
fn finally_runs_on_both_paths() {
    let dispatcher = dispatcher();

    // Success path: finally's set is the last value.
    let mut ok = dispatcher
        .post_first(|handle: CoroHandle<i32>| async move {
            handle.set(1);
            0
        })
        .unwrap()
        .finally(|handle| async move {
            handle.set(2);
            0
        })
        .unwrap()
        .end();
    assert_eq!(ok.get().unwrap(), 2);

    // Error path: finally runs, the error is still delivered.
    let ran = Arc::new(AtomicUsize::new(0));
    let ran_in_link = Arc::clone(&ran);
    let mut err = dispatcher
        .post_first(|_handle: CoroHandle<i32>| async move { 9 })
        .unwrap()
        .finally(move |handle| async move {
            ran_in_link.fetch_add(1, Ordering::Relaxed);
            handle.set(0);
            0
        })
        .unwrap()
        .end();
    assert_eq!(err.get().unwrap_err().kind(), ErrorKind::User(9));
    assert_eq!(ran.load(Ordering::Relaxed), 1);
}

#[test]
fn links_run_strictly_after_their_predecessor() {
    let dispatcher = dispatcher();
    let predecessor_finished = Arc::new(AtomicUsize::new(0));

    let flag_set = Arc::clone(&predecessor_finished);
    let flag_check = Arc::clone(&predecessor_finished);
    let mut ctx = dispatcher
        .post_first(move |handle: CoroHandle<bool>| async move {
            // Yield a few times so the successor has every chance to run
            // early if ordering were broken.
            for _ in 0..5 {
                handle.yield_now().await;
            }
            flag_set.store(1, Ordering::Release);
            handle.set(true);
            0
        })
        .unwrap()
        .then_on(QueueId::Any, false, move |handle| async move {
            let saw = flag_check.load(Ordering::Acquire) == 1;
            handle.set(saw);
            0
        })
        .unwrap()
        .end();

    assert!(ctx.get().unwrap(), "successor started before predecessor finished");
}

#[test]
fn attachments_after_end_are_rejected() {
    let dispatcher = dispatcher();
    let ctx = dispatcher
        .post_first(|handle: CoroHandle<i32>| async move {
            handle.set(1);
            0
        })
        .unwrap()
        .end();
    let err = ctx.then(|_handle| async move { 0 }).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
}

#[test]
fn attachments_after_finally_are_rejected() {
    let dispatcher = dispatcher();
    let ctx = dispatcher
        .post_first(|handle: CoroHandle<i32>| async move {
            handle.set(1);
            0
        })
        .unwrap()
        .finally(|handle| async move {
            handle.set(2);
            0
        })
        .unwrap();
    let err = ctx.then(|_handle| async move { 0 }).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
}

#[test]
fn future_access_seals_the_chain() {
    let dispatcher = dispatcher();
    let mut ctx = dispatcher
        .post_first(|handle: CoroHandle<i32>| async move {
            handle.set(5);
            0
        })
        .unwrap();
    assert!(ctx.is_chainable());
    let future = ctx.future();
    assert!(!ctx.is_chainable());
    assert_eq!(future.get().unwrap(), 5);
}

#[test]
fn dropping_an_unsealed_chain_still_schedules_it() {
    let dispatcher = dispatcher();
    let ran = Arc::new(AtomicUsize::new(0));

    let ran_in_task = Arc::clone(&ran);
    let ctx = dispatcher
        .post_first(move |handle: CoroHandle<()>| async move {
            ran_in_task.fetch_add(1, Ordering::Relaxed);
            handle.set(());
            0
        })
        .unwrap();
    drop(ctx);

    dispatcher.drain().unwrap();
    assert_eq!(ran.load(Ordering::Relaxed), 1);
}

#[test]
fn success_without_set_breaks_the_promise() {
    let dispatcher = dispatcher();
    let mut ctx = dispatcher
        .post(|_handle: CoroHandle<i32>| async move { 0 })
        .unwrap();
    assert_eq!(ctx.get().unwrap_err().kind(), ErrorKind::BrokenPromise);
}

#[test]
fn links_can_target_other_queues() {
    let dispatcher = dispatcher();
    let queues_seen = Arc::new(Mutex::new(Vec::new()));

    let q1 = Arc::clone(&queues_seen);
    let q2 = Arc::clone(&queues_seen);
    let mut ctx = dispatcher
        .post_first_on(QueueId::Index(0), false, move |handle: CoroHandle<()>| {
            async move {
                q1.lock().unwrap().push(handle.queue_id());
                handle.set(());
                0
            }
        })
        .unwrap()
        .then_on(QueueId::Index(1), false, move |handle| async move {
            q2.lock().unwrap().push(handle.queue_id());
            handle.set(());
            0
        })
        .unwrap()
        .end();
    ctx.wait();

    let queues_seen = queues_seen.lock().unwrap();
    assert_eq!(&*queues_seen, &[Some(0), Some(1)]);
}

#[test]
fn terminal_future_resolves_exactly_once() {
    let dispatcher = dispatcher();
    let mut ctx = dispatcher
        .post_first(|handle: CoroHandle<i32>| async move {
            handle.set(1);
            0
        })
        .unwrap()
        .then(|_handle| async move { 3 })
        .unwrap()
        .on_error(|handle| async move {
            handle.set(2);
            0
        })
        .unwrap()
        .end();

    // The handler absorbed the error and was the last link: its value
    // wins, and repeated reads agree.
    assert_eq!(ctx.get().unwrap(), 2);
    assert_eq!(ctx.get().unwrap(), 2);
    assert!(ctx.wait_for(Duration::from_millis(1)));
    dispatcher.drain().unwrap();
    assert_eq!(dispatcher.size(PoolKind::All, QueueId::All).unwrap(), 0);
}
