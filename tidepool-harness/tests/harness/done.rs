//! Finishing examples: done, failures and crashes.

use std::{cell::Cell, rc::Rc, time::Duration};

use tidepool_harness::{ExampleContext, ExampleError, ExampleResult};

use super::{call_log, logical_group, record};

#[test]
fn second_done_is_ignored() {
    let group = logical_group("twice");
    let blocks = Rc::new(Cell::new(0));
    let teardowns = Rc::new(Cell::new(0));
    let counted = teardowns.clone();
    group.em_after(move |_| {
        counted.set(counted.get() + 1);
        Ok(())
    });

    let first = blocks.clone();
    let second = blocks.clone();
    let result = group.run_plain(Some(Duration::from_secs(1)), move |ctx| async move {
        ctx.done_with(move || first.set(first.get() + 1));
        ctx.done_with(move || second.set(second.get() + 10));
        Ok(())
    });

    assert_eq!(result, Ok(()));
    assert_eq!(blocks.get(), 1);
    assert_eq!(teardowns.get(), 1);
}

#[test]
fn done_block_runs_before_loop_after_hooks() {
    let log = call_log();
    let group = logical_group("block");
    group.em_after(record(&log, "em_after"));

    let block_log = log.clone();
    group
        .run_plain(Some(Duration::from_secs(1)), move |ctx| async move {
            ctx.done_with(move || block_log.borrow_mut().push("block".to_string()));
            Ok(())
        })
        .expect("example passes");

    assert_eq!(*log.borrow(), vec!["block", "em_after"]);
}

#[test]
fn earliest_delayed_done_wins() {
    let log = call_log();
    let group = logical_group("race");

    let slow = log.clone();
    let fast = log.clone();
    group
        .run_plain(Some(Duration::from_secs(1)), move |ctx| async move {
            ctx.done_in_with(Duration::from_millis(300), move || {
                slow.borrow_mut().push("slow".to_string())
            });
            ctx.done_in_with(Duration::from_millis(100), move || {
                fast.borrow_mut().push("fast".to_string())
            });
            Ok(())
        })
        .expect("example passes");

    assert_eq!(*log.borrow(), vec!["fast"]);
}

#[test]
fn body_error_fails_the_example() {
    let group = logical_group("error");

    let result = group.run_plain(Some(Duration::from_secs(1)), |_ctx| async move {
        Err("x".into())
    });

    assert_eq!(result, Err(ExampleError::Body("x".to_string())));
}

#[test]
fn failed_assertion_in_body_is_reported() {
    let log = call_log();
    let group = logical_group("assertion");
    group.em_after(record(&log, "em_after"));

    let result = group.run_plain(Some(Duration::from_secs(1)), |_ctx| async move {
        assert_eq!(1, 2, "numbers differ");
        Ok(())
    });

    assert!(
        matches!(&result, Err(ExampleError::Panicked(message)) if message.contains("numbers differ")),
        "{result:?}"
    );
    assert_eq!(*log.borrow(), vec!["em_after"]);
}

#[test]
fn fail_from_a_reactor_callback() {
    let group = logical_group("callback failure");

    let result = group.run_plain(Some(Duration::from_secs(1)), |ctx| async move {
        let failing = ctx.clone();
        ctx.reactor()
            .add_timer(Duration::from_millis(50), move || failing.fail("broken"))?;
        Ok(())
    });

    assert_eq!(result, Err(ExampleError::Body("broken".to_string())));
}

#[test]
fn first_failure_wins_over_later_timeout() {
    let group = logical_group("first wins");

    let result = group.run_plain(Some(Duration::from_millis(100)), |ctx| async move {
        ctx.timeout(Duration::from_millis(100))?;
        ctx.fail("earlier");
        Ok(())
    });

    assert_eq!(result, Err(ExampleError::Body("earlier".to_string())));
}

#[test]
fn crashing_callback_still_runs_after_hooks() {
    let running_at_teardown = Rc::new(Cell::new(None));
    let group = logical_group("crash");
    let slot = running_at_teardown.clone();
    group.em_after(move |ctx| {
        slot.set(Some(ctx.is_reactor_running()));
        Ok(())
    });
    let log = call_log();
    group.after(record(&log, "after"));

    let result = group.run_plain(Some(Duration::from_secs(1)), |ctx| async move {
        ctx.reactor().next_tick(|| panic!("reactor blew up"))?;
        Ok(())
    });

    assert_eq!(
        result,
        Err(ExampleError::Panicked("reactor blew up".to_string()))
    );
    assert_eq!(running_at_teardown.get(), Some(false));
    assert_eq!(*log.borrow(), vec!["after"]);
}

fn raising_body(_ctx: ExampleContext) -> futures::future::Ready<ExampleResult<()>> {
    panic!("raised before the body started")
}

#[test]
fn body_panicking_before_its_future_fails_the_example() {
    let log = call_log();
    let group = logical_group("raising body");
    group
        .em_after(record(&log, "em_after"))
        .after(record(&log, "after"));

    let result = group.run_plain(Some(Duration::from_secs(1)), raising_body);

    assert_eq!(
        result,
        Err(ExampleError::Panicked(
            "raised before the body started".to_string()
        ))
    );
    assert_eq!(*log.borrow(), vec!["em_after", "after"]);
}
