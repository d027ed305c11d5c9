//! Per-example copies of group metadata, defaults and option profiles.

use std::{io::Write, rc::Rc, time::Duration};

use tidepool_harness::{json, ExampleError, LoopbackBroker, Options};

use super::logical_group;

#[test]
fn metadata_edits_stay_inside_the_example() {
    let group = logical_group("metadata");
    group.set_metadata("attempt", 1);

    group
        .run_plain(Some(Duration::from_secs(1)), |ctx| async move {
            assert_eq!(ctx.metadata().get("attempt"), Some(&json!(1)));
            ctx.with_metadata(|metadata| metadata.insert("attempt".to_string(), json!(2)));
            assert_eq!(ctx.metadata().get("attempt"), Some(&json!(2)));
            ctx.done();
            Ok(())
        })
        .expect("example passes");

    group
        .run_plain(Some(Duration::from_secs(1)), |ctx| async move {
            assert_eq!(ctx.metadata().get("attempt"), Some(&json!(1)));
            ctx.done();
            Ok(())
        })
        .expect("example passes");

    assert_eq!(group.metadata().get("attempt"), Some(&json!(1)));
}

#[test]
fn nested_default_timeout_does_not_leak_outwards() {
    let outer = logical_group("outer");
    outer.set_default_timeout(Duration::from_secs(2));
    let inner = outer.describe("inner");
    inner.set_default_timeout(Duration::from_millis(250));

    let inner_result = inner.run_plain(None, |_ctx| async move { Ok(()) });
    let outer_result = outer.run_plain(None, |ctx| async move {
        assert_eq!(ctx.deadline(), Some(Duration::from_secs(2)));
        ctx.done_in(Duration::from_millis(500));
        Ok(())
    });

    assert_eq!(
        inner_result,
        Err(ExampleError::TimeoutExceeded(Duration::from_millis(250)))
    );
    assert_eq!(outer_result, Ok(()));
}

#[test]
fn options_profile_file_feeds_default_options() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    write!(
        file,
        r#"{{"test": {{"user": "tester", "pass": "secret", "vhost": "/test"}}}}"#
    )
    .expect("write profile");

    let group = logical_group("profile");
    group.set_connection_lifecycle(Rc::new(
        LoopbackBroker::new()
            .with_user("tester", "secret")
            .with_vhost("/test"),
    ));
    group.set_default_options(
        Options::from_profile_file(file.path(), "test").expect("profile present"),
    );

    let result = group.run_connection_backed(
        Options::new(),
        Some(Duration::from_secs(1)),
        |ctx| async move {
            assert_eq!(ctx.options().get("user"), Some(&json!("tester")));
            assert!(ctx.is_connected());
            ctx.done();
            Ok(())
        },
    );

    assert_eq!(result, Ok(()));
}

#[test]
fn missing_profile_is_reported() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    write!(file, r#"{{"test": {{}}}}"#).expect("write profile");

    assert!(Options::from_profile_file(file.path(), "production").is_err());
}
