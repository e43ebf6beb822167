//! Event-correlated call scenarios against the in-process counter program.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use helloworld_client::{
    await_event_for_call, CallHarness, ClientError, Program, SimulatedTransport,
};
use helloworld_core::{CountChangeEvent, ProgramEvent, COUNT_CHANGE_EVENT, PROGRAM_ID};

const TIMEOUT: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn program() -> Program {
    Program::new(PROGRAM_ID, Box::new(SimulatedTransport::new(PROGRAM_ID)))
}

fn silent_program() -> Program {
    Program::new(
        PROGRAM_ID,
        Box::new(SimulatedTransport::without_event_delivery(PROGRAM_ID)),
    )
}

fn count_change(data: u64, label: &str) -> ProgramEvent {
    CountChangeEvent {
        data,
        label: label.into(),
    }
    .into()
}

// ===========================================================================
// 1. Event payloads
// ===========================================================================

#[tokio::test]
async fn create_emits_zero_create() {
    let program = program();
    let event = await_event_for_call(&program, COUNT_CHANGE_EVENT, "create", TIMEOUT)
        .await
        .unwrap();
    assert_eq!(event, count_change(0, "create"));
    assert_eq!(event.name(), COUNT_CHANGE_EVENT);
}

#[tokio::test]
async fn increment_on_fresh_counter_emits_zero_inc() {
    let program = program();
    await_event_for_call(&program, COUNT_CHANGE_EVENT, "create", TIMEOUT)
        .await
        .unwrap();
    let event = await_event_for_call(&program, COUNT_CHANGE_EVENT, "increment", TIMEOUT)
        .await
        .unwrap();
    assert_eq!(event, count_change(0, "inc"));
}

#[tokio::test]
async fn harness_sequence_returns_one_event_per_call() {
    let harness = CallHarness::new(Arc::new(program()), TIMEOUT);
    let events = vec![
        harness.count_change("create").await.unwrap(),
        harness.count_change("increment").await.unwrap(),
        harness.count_change("increment").await.unwrap(),
    ];
    let observed: Vec<(u64, &str)> = events.iter().map(|e| (e.data, e.label.as_str())).collect();
    assert_eq!(observed, vec![(0, "create"), (0, "inc"), (1, "inc")]);
}

// ===========================================================================
// 2. Registration lifecycle
// ===========================================================================

#[tokio::test]
async fn no_registrations_leak_after_calls() {
    let program = program();
    for method in ["create", "increment", "increment", "create"] {
        await_event_for_call(&program, COUNT_CHANGE_EVENT, method, TIMEOUT)
            .await
            .unwrap();
        assert_eq!(program.listener_count(), 0, "leak after {}", method);
    }
}

#[tokio::test]
async fn unrelated_listener_survives_call() {
    let program = program();
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    let id = program
        .add_event_listener(COUNT_CHANGE_EVENT, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    await_event_for_call(&program, COUNT_CHANGE_EVENT, "create", TIMEOUT)
        .await
        .unwrap();

    assert_eq!(program.listener_count(), 1);
    assert_eq!(seen.load(Ordering::SeqCst), 1);
    assert!(program.remove_event_listener(id));
}

#[test]
fn removing_listener_twice_is_noop() {
    let program = program();
    let a = program.add_event_listener(COUNT_CHANGE_EVENT, |_| {}).unwrap();
    let b = program.add_event_listener(COUNT_CHANGE_EVENT, |_| {}).unwrap();

    assert!(program.remove_event_listener(a));
    assert!(!program.remove_event_listener(a));
    assert_eq!(program.listener_count(), 1);
    assert!(program.remove_event_listener(b));
}

// ===========================================================================
// 3. Ordering
// ===========================================================================

#[tokio::test]
async fn synchronous_emission_is_not_missed() {
    // the simulator delivers logs before `invoke` returns
    let program = program();
    let event = await_event_for_call(&program, COUNT_CHANGE_EVENT, "create", TIMEOUT)
        .await
        .unwrap();
    assert_eq!(event, count_change(0, "create"));
}

#[tokio::test]
async fn listener_added_after_call_misses_event() {
    let program = program();
    program.invoke("create").await.unwrap();

    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    let id = program
        .add_event_listener(COUNT_CHANGE_EVENT, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 0);
    program.remove_event_listener(id);
}

#[tokio::test]
async fn concurrent_calls_each_resolve() {
    let program = program();
    program.invoke("create").await.unwrap();

    let (a, b) = tokio::join!(
        await_event_for_call(&program, COUNT_CHANGE_EVENT, "increment", TIMEOUT),
        await_event_for_call(&program, COUNT_CHANGE_EVENT, "increment", TIMEOUT),
    );
    assert_eq!(a.unwrap().as_count_change().unwrap().label, "inc");
    assert_eq!(b.unwrap().as_count_change().unwrap().label, "inc");
    assert_eq!(program.listener_count(), 0);
}

// ===========================================================================
// 4. Failure paths deregister
// ===========================================================================

#[tokio::test]
async fn timeout_deregisters() {
    let program = silent_program();
    let err = await_event_for_call(
        &program,
        COUNT_CHANGE_EVENT,
        "create",
        Duration::from_millis(50),
    )
    .await
    .unwrap_err();

    match err {
        ClientError::EventTimeout { event, method, .. } => {
            assert_eq!(event, COUNT_CHANGE_EVENT);
            assert_eq!(method, "create");
        }
        other => panic!("expected EventTimeout, got {:?}", other),
    }
    assert_eq!(program.listener_count(), 0);
}

#[tokio::test]
async fn rejected_call_deregisters() {
    let program = program();
    let err = await_event_for_call(&program, COUNT_CHANGE_EVENT, "increment", TIMEOUT)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::TransactionRejected(_)));
    assert_eq!(program.listener_count(), 0);
}

#[tokio::test]
async fn cancelled_wait_deregisters() {
    let program = silent_program();
    let outer = tokio::time::timeout(
        Duration::from_millis(50),
        await_event_for_call(&program, COUNT_CHANGE_EVENT, "create", Duration::from_secs(60)),
    )
    .await;
    assert!(outer.is_err());
    assert_eq!(program.listener_count(), 0);
}

#[tokio::test]
async fn unknown_names_rejected() {
    let program = program();
    let err = await_event_for_call(&program, "resetEvent", "create", TIMEOUT)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::UnknownEvent(_)));

    let err = await_event_for_call(&program, COUNT_CHANGE_EVENT, "reset", TIMEOUT)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::UnknownMethod(_)));
    assert_eq!(program.listener_count(), 0);
}
