//! Promise callbacks run with an empty context, whoever completes the
//! promise and whoever registered the callback.

#[macro_use]
mod common;

use common::*;
use std::sync::mpsc;
use std::thread;
use strand::cx::{ContextCarrier, IdentityTag};
use strand::{Error, ErrorKind, Promise};

fn init_test(test_name: &str) {
    init_test_logging();
    test_phase!(test_name);
}

fn ambient_identity() -> Option<String> {
    ContextCarrier::get::<IdentityTag>().map(|t| t.id().to_owned())
}

#[test]
fn callback_registered_before_completion_sees_empty_context() {
    init_test("callback_registered_before_completion_sees_empty_context");
    let promise: Promise<u32> = Promise::new();
    let (tx, rx) = mpsc::channel();

    // Thread B registers under its own context.
    let registrant = promise.clone();
    thread::spawn(move || {
        ContextCarrier::with_element(IdentityTag::new("B"), || {
            registrant.on_success(move |value| {
                let _ = tx.send((*value, ambient_identity(), ContextCarrier::current().is_empty()));
            });
        });
    })
    .join()
    .expect("registrant thread");

    // Thread A completes under a different context; the callback runs there.
    let completer = promise.clone();
    thread::spawn(move || {
        ContextCarrier::with_element(IdentityTag::new("A"), || {
            completer.resolve(7).expect("resolve");
            assert_eq!(ambient_identity().as_deref(), Some("A"), "completer context restored");
        });
    })
    .join()
    .expect("completer thread");

    let (value, identity, empty) = rx.recv_timeout(JOIN_TIMEOUT).expect("callback ran");
    assert_eq!(value, 7);
    assert_with_log!(identity.is_none(), "no identity leaks into the callback", None::<String>, identity);
    assert!(empty);
    test_complete!("callback_registered_before_completion_sees_empty_context");
}

#[test]
fn callback_registered_after_completion_sees_empty_context() {
    init_test("callback_registered_after_completion_sees_empty_context");
    let promise = ContextCarrier::with_element(IdentityTag::new("A"), || Promise::resolved(1_u8));
    let (tx, rx) = mpsc::channel();

    ContextCarrier::with_element(IdentityTag::new("B"), || {
        promise.on_processed(move |_| {
            let _ = tx.send(ambient_identity());
        });
        assert_eq!(ambient_identity().as_deref(), Some("B"), "registrant context restored");
    });
    assert_eq!(rx.recv_timeout(JOIN_TIMEOUT).expect("callback ran"), None);
}

#[test]
fn error_callback_isolated_and_submitted_promise_rejects() {
    init_test("error_callback_isolated_and_submitted_promise_rejects");
    let TestPool { pool: _pool, exec } = test_pool(2);
    let (tx, rx) = mpsc::channel();

    let promise = ContextCarrier::with_element(IdentityTag::new("submitter"), || {
        exec.submit_promise(|| -> strand::Result<u8> {
            assert_eq!(ambient_identity().as_deref(), Some("submitter"));
            Err(Error::user("rejected in task"))
        })
    })
    .expect("submit");
    promise.on_error(move |err| {
        let _ = tx.send((err.kind(), ambient_identity()));
    });

    let (kind, identity) = rx.recv_timeout(JOIN_TIMEOUT).expect("error callback ran");
    assert_eq!(kind, ErrorKind::User);
    assert_eq!(identity, None);
    assert!(promise.blocking_get(JOIN_TIMEOUT).is_err());
}

#[test]
fn chained_promise_runs_isolated_and_second_resolution_rejected() {
    init_test("chained_promise_runs_isolated_and_second_resolution_rejected");
    let promise: Promise<u32> = Promise::new();
    let doubled = promise.then(|v| Ok((v * 2, ambient_identity())));

    ContextCarrier::with_element(IdentityTag::new("A"), || {
        promise.resolve(21).expect("first resolution");
    });
    let err = promise.resolve(99).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DoubleCompletion);

    let (value, identity) = doubled.blocking_get(JOIN_TIMEOUT).expect("chained");
    assert_eq!(value, 42);
    assert_eq!(identity, None);
}

#[test]
fn panicking_callback_does_not_poison_promise() {
    init_test("panicking_callback_does_not_poison_promise");
    let promise: Promise<u32> = Promise::new();
    let (tx, rx) = mpsc::channel();
    promise.on_success(|_| panic!("callback blew up"));
    promise.on_success(move |v| {
        let _ = tx.send(*v);
    });
    promise.resolve(5).expect("resolve");
    assert_eq!(rx.recv_timeout(JOIN_TIMEOUT).expect("second callback"), 5);
    assert_eq!(promise.blocking_get(JOIN_TIMEOUT).expect("value"), 5);
}
