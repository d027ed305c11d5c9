//! Connection-backed examples against the loopback broker.

use std::{cell::RefCell, rc::Rc, time::Duration};

use tidepool_harness::{
    current_connection, json, ArgumentError, BrokerStats, ConnectionError, ExampleError,
    ExampleMode, LoopbackBroker, Options,
};

use super::{call_log, logical_group, record};

#[test]
fn connection_is_up_in_the_body_and_gone_afterwards() {
    let group = logical_group("lifecycle");
    let broker = Rc::new(LoopbackBroker::new());
    group.set_connection_lifecycle(broker.clone());

    let result = group.run_connection_backed(
        Options::new(),
        Some(Duration::from_secs(1)),
        |ctx| async move {
            assert_eq!(ctx.mode(), ExampleMode::ConnectionBacked);
            assert!(ctx.is_connected());
            let id = ctx.connection().map(|c| c.id());
            assert_eq!(current_connection().map(|c| c.id()), id);
            ctx.done();
            Ok(())
        },
    );

    assert_eq!(result, Ok(()));
    assert!(current_connection().is_none());
    assert_eq!(broker.open_connections(), 0);
    assert_eq!(
        broker.stats(),
        BrokerStats {
            connects: 1,
            refused: 0,
            closes: 1,
            cleanups: 1,
        }
    );
}

#[test]
fn consecutive_examples_never_share_a_connection() {
    let group = logical_group("isolation");
    let broker = Rc::new(LoopbackBroker::new());
    group.set_connection_lifecycle(broker.clone());

    for _ in 0..2 {
        group
            .run_connection_backed(Options::new(), Some(Duration::from_secs(1)), |ctx| async move {
                ctx.done();
                Ok(())
            })
            .expect("example passes");
    }

    let plain = logical_group("plain afterwards");
    plain
        .run_plain(Some(Duration::from_secs(1)), |ctx| async move {
            assert!(ctx.connection().is_none());
            assert!(current_connection().is_none());
            ctx.done();
            Ok(())
        })
        .expect("example passes");

    assert_eq!(broker.stats().connects, 2);
    assert_eq!(broker.stats().cleanups, 2);
}

#[test]
fn failing_body_still_closes_and_cleans_up() {
    let group = logical_group("failing body");
    let broker = Rc::new(LoopbackBroker::new());
    group.set_connection_lifecycle(broker.clone());

    let result = group.run_connection_backed(
        Options::new(),
        Some(Duration::from_secs(1)),
        |_ctx| async move { Err("publish rejected".into()) },
    );

    assert_eq!(result, Err(ExampleError::Body("publish rejected".to_string())));
    assert_eq!(broker.stats().closes, 1);
    assert_eq!(broker.stats().cleanups, 1);
    assert!(current_connection().is_none());
}

#[test]
fn unreachable_host_fails_without_running_the_body() {
    let log = call_log();
    let group = logical_group("unreachable");
    let broker = Rc::new(LoopbackBroker::new().with_unreachable_host("Impossible"));
    group.set_connection_lifecycle(broker.clone());
    group
        .em_after(record(&log, "em_after"))
        .amqp_before(record(&log, "amqp_before"))
        .amqp_after(record(&log, "amqp_after"));

    let body_log = log.clone();
    let result = group.run_connection_backed(
        Options::new().with("host", "Impossible"),
        Some(Duration::from_secs(1)),
        move |ctx| async move {
            body_log.borrow_mut().push("body".to_string());
            ctx.done();
            Ok(())
        },
    );

    assert_eq!(
        result,
        Err(ExampleError::Connection(ConnectionError::Unreachable {
            host: "Impossible".to_string(),
            port: 5672,
        }))
    );
    assert_eq!(*log.borrow(), vec!["em_after"]);
    assert_eq!(broker.stats().refused, 1);
    assert_eq!(broker.stats().cleanups, 1);
}

#[test]
fn wrong_credentials_are_refused() {
    let group = logical_group("credentials");
    group.set_connection_lifecycle(Rc::new(LoopbackBroker::new()));

    let result = group.run_connection_backed(
        Options::new().with("user", "guest").with("pass", "wrong"),
        Some(Duration::from_secs(1)),
        |ctx| async move {
            ctx.done();
            Ok(())
        },
    );

    assert!(result.as_ref().is_err_and(|e| e.is_connection()));
    assert_eq!(
        result,
        Err(ExampleError::Connection(ConnectionError::AccessRefused {
            user: "guest".to_string(),
        }))
    );
}

#[test]
fn slow_handshake_hits_the_connection_timeout() {
    let group = logical_group("handshake");
    group.set_connection_lifecycle(Rc::new(
        LoopbackBroker::new().with_connect_latency(Duration::from_secs(5)),
    ));

    let result = group.run_connection_backed(
        Options::new().with("timeout", 0.25),
        Some(Duration::from_secs(10)),
        |ctx| async move {
            ctx.done();
            Ok(())
        },
    );

    assert_eq!(
        result,
        Err(ExampleError::Connection(ConnectionError::Timeout(
            Duration::from_millis(250)
        )))
    );
}

#[test]
fn missing_lifecycle_is_an_argument_error() {
    let log = call_log();
    let group = logical_group("no broker");
    group.before(record(&log, "before")).after(record(&log, "after"));

    let result = group.run_connection_backed(Options::new(), None, |ctx| async move {
        ctx.done();
        Ok(())
    });

    assert_eq!(
        result,
        Err(ExampleError::Argument(ArgumentError::MissingConnectionLifecycle))
    );
    assert!(log.borrow().is_empty());
}

#[test]
fn group_defaults_sit_under_call_site_options() {
    let group = logical_group("defaults");
    group.set_connection_lifecycle(Rc::new(LoopbackBroker::new().with_vhost("/test")));
    group.set_default_options(Options::new().with("user", "guest").with("vhost", "/"));

    let result = group.run_connection_backed(
        Options::new().with("vhost", "/test"),
        Some(Duration::from_secs(1)),
        |ctx| async move {
            assert_eq!(ctx.options().get("user"), Some(&json!("guest")));
            assert_eq!(ctx.options().get("vhost"), Some(&json!("/test")));
            assert!(ctx.is_connected());
            ctx.done();
            Ok(())
        },
    );

    assert_eq!(result, Ok(()));
}

#[test]
fn unknown_vhost_is_refused() {
    let group = logical_group("vhost");
    group.set_connection_lifecycle(Rc::new(LoopbackBroker::new()));

    let result = group.run_connection_backed(
        Options::new().with("vhost", "/missing"),
        Some(Duration::from_secs(1)),
        |ctx| async move {
            ctx.done();
            Ok(())
        },
    );

    assert_eq!(
        result,
        Err(ExampleError::Connection(ConnectionError::UnknownVhost {
            vhost: "/missing".to_string(),
        }))
    );
}

#[test]
fn group_mode_selects_connection_backed_runs() {
    let group = logical_group("mode");
    group.set_connection_lifecycle(Rc::new(LoopbackBroker::new()));
    group.set_default_timeout(Duration::from_secs(1));
    group.set_mode(ExampleMode::ConnectionBacked);

    let result = group.run(|ctx| async move {
        assert!(ctx.is_connected());
        ctx.done();
        Ok(())
    });

    assert_eq!(result, Ok(()));
}

#[test]
fn reactor_crash_still_cleans_up_once() {
    let group = logical_group("crash with connection");
    let broker = Rc::new(LoopbackBroker::new());
    group.set_connection_lifecycle(broker.clone());
    let reactor_at_teardown = Rc::new(RefCell::new(None));
    let slot = reactor_at_teardown.clone();
    group.after(move |ctx| {
        *slot.borrow_mut() = Some(ctx.reactor());
        Ok(())
    });
    let opened = Rc::new(RefCell::new(None));

    let connection_slot = opened.clone();
    let result = group.run_connection_backed(
        Options::new(),
        Some(Duration::from_secs(1)),
        move |ctx| async move {
            *connection_slot.borrow_mut() = ctx.connection();
            ctx.reactor().next_tick(|| panic!("reactor blew up"))?;
            Ok(())
        },
    );

    assert_eq!(
        result,
        Err(ExampleError::Panicked("reactor blew up".to_string()))
    );
    let reactor = reactor_at_teardown.borrow_mut().take().expect("after hook ran");
    assert!(!reactor.is_running());
    assert_eq!(broker.stats().cleanups, 1);
    assert_eq!(broker.stats().closes, 0);
    assert_eq!(broker.open_connections(), 0);
    let connection = opened.borrow_mut().take().expect("body saw the connection");
    assert!(!connection.is_connected());
    assert!(current_connection().is_none());
}
