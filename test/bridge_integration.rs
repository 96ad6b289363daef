//! Async Bridge Integration Tests
//!
//! Delivery guarantees of completion tokens as seen from outside the crate.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use node_compat::runtime::{self, register, spawn, CallerContext};
use node_compat::NodeError;

#[test]
fn test_spawned_operation_delivers_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let context = CallerContext::new();

    let pending = spawn("test.sum", || Ok((1..=10).sum::<u32>())).unwrap();
    let seen = Arc::clone(&calls);
    pending.then_on(&context, move |result| {
        assert_eq!(result.unwrap(), 55);
        seen.fetch_add(1, Ordering::SeqCst);
    });

    assert_eq!(context.run_until(1, Duration::from_secs(5)), 1);
    assert_eq!(context.run_until_idle(Duration::from_millis(50)), 0);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_second_settle_rejected() {
    let (token, pending) = register::<&'static str>("test.twice");
    token.on_success("first").unwrap();

    let err = token.on_success("second").unwrap_err();
    assert!(matches!(err, NodeError::AlreadySettled(_)));
    assert_eq!(err.code(), "ERR_ALREADY_SETTLED");
    assert_eq!(pending.wait().unwrap(), "first");
}

#[test]
fn test_error_result_delivered() {
    let pending = spawn::<(), _>("test.fail", || Err(NodeError::Closed("FileHandle"))).unwrap();
    let err = pending.wait().unwrap_err();
    assert!(err.is_state_error());
}

#[test]
fn test_dropped_token_abandons() {
    let (token, pending) = register::<u8>("test.dropped");
    thread::spawn(move || drop(token)).join().unwrap();

    let err = pending.wait().unwrap_err();
    assert!(matches!(err, NodeError::Abandoned("test.dropped")));
}

#[test]
fn test_panicking_operation_abandons() {
    let pending = spawn::<u8, _>("test.panic", || panic!("worker failure")).unwrap();
    assert!(matches!(
        pending.wait().unwrap_err(),
        NodeError::Abandoned("test.panic")
    ));
}

#[test]
fn test_settled_before_then_runs_inline() {
    let (token, pending) = register::<u8>("test.early");
    token.on_success(9).unwrap();
    assert!(pending.is_settled());

    let got = Arc::new(AtomicUsize::new(0));
    let slot = Arc::clone(&got);
    pending.then(move |result| {
        slot.store(result.unwrap() as usize, Ordering::SeqCst);
    });
    assert_eq!(got.load(Ordering::SeqCst), 9);
}

#[test]
fn test_unsettled_token_keeps_runtime_alive() {
    let (token, pending) = register::<()>("test.keepalive");
    assert!(runtime::has_refs());
    assert!(!token.is_fired());

    token.on_success(()).unwrap();
    assert!(token.is_fired());
    pending.wait().unwrap();
}

#[test]
fn test_many_concurrent_operations() {
    let pendings: Vec<_> = (0..64u64)
        .map(|i| {
            spawn("test.square", move || {
                thread::sleep(Duration::from_millis(i % 4));
                Ok(i * i)
            })
            .unwrap()
        })
        .collect();

    let total: u64 = pendings.into_iter().map(|p| p.wait().unwrap()).sum();
    assert_eq!(total, (0..64u64).map(|i| i * i).sum::<u64>());
}

#[test]
fn test_pending_is_a_future() {
    let pending = spawn("test.future", || Ok(String::from("ready"))).unwrap();
    let value = futures::executor::block_on(async { pending.await });
    assert_eq!(value.unwrap(), "ready");
}
