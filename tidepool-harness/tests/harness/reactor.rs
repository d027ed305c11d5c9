//! Reactor primitives used from inside examples, and the wall clock.

use std::{cell::Cell, rc::Rc, time::Duration};

use tidepool_harness::{Deferrable, DeferredStatus, ExampleError, ExampleGroup};

use super::logical_group;

#[test]
fn deferrable_success_finishes_the_example() {
    let group = logical_group("deferrable");
    let received = Rc::new(Cell::new(None));

    let slot = received.clone();
    let result = group.run_plain(Some(Duration::from_secs(1)), move |ctx| async move {
        let deferred: Deferrable<u32> = Deferrable::new();
        let finisher = ctx.clone();
        deferred.callback(move |value| finisher.done_with(move || slot.set(Some(value))));

        let producer = deferred.clone();
        ctx.reactor()
            .add_timer(Duration::from_millis(100), move || producer.succeed(5))?;
        Ok(())
    });

    assert_eq!(result, Ok(()));
    assert_eq!(received.get(), Some(5));
}

#[test]
fn deferrable_timeout_fails_the_example() {
    let group = logical_group("deferrable timeout");

    let result = group.run_plain(Some(Duration::from_secs(1)), |ctx| async move {
        let deferred: Deferrable<u32> = Deferrable::new();
        let failer = ctx.clone();
        deferred.errback(move |error| failer.fail(error));
        deferred.timeout(
            &ctx.reactor(),
            Duration::from_millis(200),
            ExampleError::body("deferred timed out"),
        )?;
        assert!(matches!(deferred.status(), DeferredStatus::Pending));
        Ok(())
    });

    assert_eq!(
        result,
        Err(ExampleError::Body("deferred timed out".to_string()))
    );
}

#[test]
fn periodic_timer_ticks_until_cancelled() {
    let group = logical_group("periodic");
    let ticks = Rc::new(Cell::new(0));

    let counter = ticks.clone();
    let result = group.run_plain(Some(Duration::from_secs(1)), move |ctx| async move {
        let reactor = ctx.reactor();
        let finisher = ctx.clone();
        let id = Rc::new(Cell::new(None));
        let own_id = id.clone();
        let timer_reactor = reactor.clone();
        let timer = reactor.add_periodic_timer(Duration::from_millis(50), move || {
            counter.set(counter.get() + 1);
            if counter.get() == 3 {
                if let Some(id) = own_id.get() {
                    timer_reactor.cancel_timer(id);
                }
                finisher.done();
            }
        })?;
        id.set(Some(timer));
        Ok(())
    });

    assert_eq!(result, Ok(()));
    assert_eq!(ticks.get(), 3);
}

#[test]
fn body_can_sleep_on_the_reactor() {
    let group = logical_group("sleep");
    let woke_at = Rc::new(Cell::new(None));

    let slot = woke_at.clone();
    let result = group.run_plain(Some(Duration::from_secs(1)), move |ctx| async move {
        ctx.reactor().sleep(Duration::from_millis(300)).await?;
        slot.set(Some(ctx.reactor().now()));
        ctx.done();
        Ok(())
    });

    assert_eq!(result, Ok(()));
    super::assert_elapsed(
        woke_at.get().expect("body woke up"),
        Duration::from_millis(300),
        super::TICK,
    );
}

#[test]
fn wall_clock_done_in() {
    tidepool_harness::logging::try_init_for_tests();
    let group = ExampleGroup::new("wall clock");
    let finished = Rc::new(Cell::new(None));
    let slot = finished.clone();
    group.em_after(move |ctx| {
        slot.set(Some(ctx.reactor().now()));
        Ok(())
    });

    let result = group.run_plain(Some(Duration::from_secs(5)), |ctx| async move {
        ctx.done_in(Duration::from_millis(20));
        Ok(())
    });

    assert_eq!(result, Ok(()));
    let elapsed = finished.get().expect("em_after ran");
    assert!(elapsed >= Duration::from_millis(20), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(5), "{elapsed:?}");
}

#[test]
fn wall_clock_timeout() {
    tidepool_harness::logging::try_init_for_tests();
    let group = ExampleGroup::new("wall timeout");

    let result = group.run_plain(Some(Duration::from_millis(30)), |_ctx| async move { Ok(()) });

    assert_eq!(
        result,
        Err(ExampleError::TimeoutExceeded(Duration::from_millis(30)))
    );
}
