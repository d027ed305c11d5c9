//! Deadlines: where they come from and what they tear down.

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
    time::Duration,
};

use tidepool_harness::{
    current_connection, ArgumentError, ExampleError, ExampleGroup, LoopbackBroker, Options,
};

use super::{assert_elapsed, logical_group, TICK};

/// Record the pass time at which loop after hooks run.
fn track_finish(group: &ExampleGroup) -> Rc<Cell<Option<Duration>>> {
    let finished = Rc::new(Cell::new(None));
    let slot = finished.clone();
    group.em_after(move |ctx| {
        slot.set(Some(ctx.reactor().now()));
        Ok(())
    });
    finished
}

#[test]
fn example_without_done_times_out() {
    let group = logical_group("forgetful");
    let finished = track_finish(&group);

    let result = group.run_plain(Some(Duration::from_secs(1)), |_ctx| async move { Ok(()) });

    assert_eq!(
        result,
        Err(ExampleError::TimeoutExceeded(Duration::from_secs(1)))
    );
    assert_elapsed(
        finished.get().expect("em_after ran"),
        Duration::from_secs(1),
        TICK,
    );
}

#[test]
fn group_default_timeout_applies_without_run_timeout() {
    let group = logical_group("defaults");
    group.set_default_timeout(Duration::from_millis(500));

    let result = group.run_plain(None, |_ctx| async move { Ok(()) });

    assert_eq!(
        result,
        Err(ExampleError::TimeoutExceeded(Duration::from_millis(500)))
    );
}

#[test]
fn run_timeout_beats_group_default() {
    let group = logical_group("override");
    group.set_default_timeout(Duration::from_secs(2));

    let result = group.run_plain(Some(Duration::from_millis(250)), |_ctx| async move { Ok(()) });

    assert_eq!(
        result,
        Err(ExampleError::TimeoutExceeded(Duration::from_millis(250)))
    );
}

#[test]
fn spec_timeout_option_beats_run_timeout() {
    let group = logical_group("spec timeout");
    group.set_connection_lifecycle(Rc::new(LoopbackBroker::new()));

    let result = group.run_connection_backed(
        Options::new().with("spec_timeout", 0.25),
        Some(Duration::from_secs(1)),
        |ctx| async move {
            assert!(!ctx.options().contains_key("spec_timeout"));
            Ok(())
        },
    );

    assert_eq!(
        result,
        Err(ExampleError::TimeoutExceeded(Duration::from_millis(250)))
    );
}

#[test]
fn in_body_timeout_replaces_the_deadline() {
    let group = logical_group("in body");
    let finished = track_finish(&group);

    let result = group.run_plain(Some(Duration::from_secs(1)), |ctx| async move {
        assert_eq!(ctx.deadline(), Some(Duration::from_secs(1)));
        ctx.timeout(Duration::from_millis(250))?;
        assert_eq!(ctx.deadline(), Some(Duration::from_millis(250)));
        Ok(())
    });

    assert_eq!(
        result,
        Err(ExampleError::TimeoutExceeded(Duration::from_millis(250)))
    );
    assert_elapsed(
        finished.get().expect("em_after ran"),
        Duration::from_millis(250),
        TICK,
    );
}

#[test]
fn done_before_the_deadline_cancels_it() {
    let group = logical_group("quick");
    let finished = track_finish(&group);

    let result = group.run_plain(Some(Duration::from_secs(5)), |ctx| async move {
        ctx.done_in(Duration::from_millis(100));
        Ok(())
    });

    assert_eq!(result, Ok(()));
    assert_elapsed(
        finished.get().expect("em_after ran"),
        Duration::from_millis(100),
        TICK,
    );
}

#[test]
fn delayed_done_past_the_deadline_loses() {
    let group = logical_group("too slow");
    let finished = track_finish(&group);

    let result = group.run_plain(Some(Duration::from_millis(500)), |ctx| async move {
        ctx.done_in(Duration::from_secs(2));
        Ok(())
    });

    assert_eq!(
        result,
        Err(ExampleError::TimeoutExceeded(Duration::from_millis(500)))
    );
    assert_elapsed(
        finished.get().expect("em_after ran"),
        Duration::from_millis(500),
        TICK,
    );
}

#[test]
fn timeout_forces_a_stalled_teardown() {
    let group = logical_group("stalled close");
    let broker = Rc::new(LoopbackBroker::new().with_stalled_close());
    group.set_connection_lifecycle(broker.clone());
    let finished = track_finish(&group);

    let opened = Rc::new(RefCell::new(None));

    let slot = opened.clone();
    let result = group.run_connection_backed(
        Options::new(),
        Some(Duration::from_millis(500)),
        move |ctx| async move {
            *slot.borrow_mut() = ctx.connection();
            ctx.done();
            Ok(())
        },
    );

    assert_eq!(
        result,
        Err(ExampleError::TimeoutExceeded(Duration::from_millis(500)))
    );
    assert_elapsed(
        finished.get().expect("em_after ran"),
        Duration::from_millis(500),
        TICK,
    );
    assert_eq!(broker.stats().closes, 0);
    assert_eq!(broker.stats().cleanups, 1);
    assert_eq!(broker.open_connections(), 0);
    let connection = opened.borrow_mut().take().expect("body saw the connection");
    assert!(!connection.is_connected());
    assert!(current_connection().is_none());
}

#[test]
fn out_of_range_spec_timeout_is_rejected_before_running() {
    let group = logical_group("huge spec_timeout");
    let broker = Rc::new(LoopbackBroker::new());
    group.set_connection_lifecycle(broker.clone());
    let finished = track_finish(&group);

    let result = group.run_connection_backed(
        Options::new().with("spec_timeout", 1e30),
        None,
        |ctx| async move {
            ctx.done();
            Ok(())
        },
    );

    assert!(
        matches!(
            result,
            Err(ExampleError::Argument(ArgumentError::InvalidArgument { ref operation, .. }))
                if operation == "spec_timeout"
        ),
        "{result:?}"
    );
    assert!(finished.get().is_none());
    assert_eq!(broker.stats().connects, 0);
}
