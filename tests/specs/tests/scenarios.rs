// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end scenarios: real sockets against a real in-process hub.

use std::time::Duration;

use serde_json::json;

use streamhub_specs::TestHub;

#[test]
fn public_subscribe_and_push() -> anyhow::Result<()> {
    let hub = TestHub::start()?;
    let mut client = hub.connect("/")?;

    client.send_text(r#"{"method":"subscribe","streams":["ethusdt.depth"]}"#)?;
    assert_eq!(
        client.recv_json()?,
        json!({"data": {"message": "subscribed", "streams": ["ethusdt.depth"]}})
    );

    hub.inject("public.ethusdt.depth", r#"{"asks":[[1,2]]}"#)?;
    assert_eq!(client.recv_json()?, json!({"ethusdt.depth": {"asks": [[1, 2]]}}));
    Ok(())
}

#[test]
fn private_records_route_by_uid() -> anyhow::Result<()> {
    let hub = TestHub::start()?;
    let mut u1 = hub.connect_as("/private", "U1", "member")?;
    let mut u2 = hub.connect_as("/private", "U2", "member")?;

    u1.send_text(r#"{"method":"subscribe","streams":["balance"]}"#)?;
    assert_eq!(
        u1.recv_json()?,
        json!({"data": {"message": "subscribed", "streams": ["balance"]}})
    );
    u2.send_text(r#"{"method":"subscribe","streams":["balance"]}"#)?;
    assert_eq!(
        u2.recv_json()?,
        json!({"data": {"message": "subscribed", "streams": ["balance"]}})
    );

    hub.inject("private.U1.balance", r#"{"BTC":"1"}"#)?;

    assert_eq!(u1.recv_json()?, json!({"balance": {"BTC": "1"}}));
    u2.expect_silence(Duration::from_millis(300))?;
    Ok(())
}

#[test]
fn prefixed_subscription_is_role_gated() -> anyhow::Result<()> {
    let hub = TestHub::start()?;
    let mut member = hub.connect_as("/", "U3", "member")?;

    member.send_text(r#"{"method":"subscribe","streams":["system.alerts.all"]}"#)?;

    // The refusal and the aggregate ack are enqueued in order but drained by
    // a pool of writers, so arrival order is not guaranteed.
    let frames = [member.recv_json()?, member.recv_json()?];
    let refusal = json!({"data": {"message": "cannot subscribe to system.alerts.all"}});
    let ack = json!({"data": {"message": "subscribed", "streams": []}});
    assert!(frames.contains(&refusal), "missing refusal in {frames:?}");
    assert!(frames.contains(&ack), "missing ack in {frames:?}");

    assert_eq!(
        hub.hub().index().read().prefixed_topic_len("system", "alerts.all"),
        None
    );
    Ok(())
}

#[test]
fn prefixed_subscription_admitted_for_system_role() -> anyhow::Result<()> {
    let hub = TestHub::start()?;
    let mut operator = hub.connect_as("/", "U4", "operator")?;

    operator.send_text(r#"{"method":"subscribe","streams":["system.alerts.all"]}"#)?;
    assert_eq!(
        operator.recv_json()?,
        json!({"data": {"message": "subscribed", "streams": ["system.alerts.all"]}})
    );

    hub.inject("system.alerts.all", r#"{"sev":"high"}"#)?;
    assert_eq!(operator.recv_json()?, json!({"alerts.all": {"sev": "high"}}));
    Ok(())
}

#[test]
fn heartbeat_round_trip() -> anyhow::Result<()> {
    let hub = TestHub::start()?;
    let mut client = hub.connect("/")?;

    client.send_text("ping")?;
    assert_eq!(client.recv_text()?, "pong");

    // Whitespace-mangled heartbeats still count.
    client.send_text("  ping \n")?;
    assert_eq!(client.recv_text()?, "pong");
    Ok(())
}

#[test]
fn duplicate_subscribe_is_idempotent() -> anyhow::Result<()> {
    let hub = TestHub::start()?;
    let mut client = hub.connect("/")?;

    client.send_text(r#"{"method":"subscribe","streams":["x.y","x.y"]}"#)?;
    assert_eq!(
        client.recv_json()?,
        json!({"data": {"message": "subscribed", "streams": ["x.y"]}})
    );

    assert_eq!(hub.hub().index().read().public_topic_len("x.y"), Some(1));
    Ok(())
}

#[test]
fn unsubscribe_round_trip() -> anyhow::Result<()> {
    let hub = TestHub::start()?;
    let mut client = hub.connect("/")?;

    client.send_text(r#"{"method":"subscribe","streams":["a.b","c.d"]}"#)?;
    assert_eq!(
        client.recv_json()?,
        json!({"data": {"message": "subscribed", "streams": ["a.b", "c.d"]}})
    );

    client.send_text(r#"{"method":"unsubscribe","streams":["a.b"]}"#)?;
    assert_eq!(
        client.recv_json()?,
        json!({"data": {"message": "unsubscribed", "streams": ["c.d"]}})
    );

    assert_eq!(hub.hub().index().read().public_topic_len("a.b"), None);
    assert_eq!(hub.hub().index().read().public_topic_len("c.d"), Some(1));
    Ok(())
}

#[test]
fn disconnect_cleans_every_namespace() -> anyhow::Result<()> {
    let hub = TestHub::start()?;
    let mut client = hub.connect_as("/private", "U5", "admin")?;

    client.send_text(r#"{"method":"subscribe","streams":["x.y","system.a.b","balance"]}"#)?;
    assert_eq!(
        client.recv_json()?,
        json!({"data": {"message": "subscribed", "streams": ["x.y", "system.a.b", "balance"]}})
    );

    client.close();

    hub.wait_index("all topics dropped after disconnect", |index| {
        index.public_topic_len("x.y").is_none()
            && index.prefixed_topic_len("system", "a.b").is_none()
            && index.private_topics_for("U5").is_none()
            && index.connection_count() == 0
    })?;
    Ok(())
}

#[test]
fn malformed_frames_keep_the_session() -> anyhow::Result<()> {
    let hub = TestHub::start()?;
    let mut client = hub.connect("/")?;

    client.send_text("this is not json")?;
    assert_eq!(client.recv_json()?, json!({"error": "parse error"}));

    client.send_text(r#"{"method":"dance","streams":[]}"#)?;
    assert_eq!(client.recv_json()?, json!({"error": "unsupported method"}));

    // The session still works afterwards.
    client.send_text(r#"{"method":"subscribe","streams":["e.f"]}"#)?;
    assert_eq!(
        client.recv_json()?,
        json!({"data": {"message": "subscribed", "streams": ["e.f"]}})
    );
    Ok(())
}

#[test]
fn private_endpoint_rejects_anonymous_upgrade() -> anyhow::Result<()> {
    let hub = TestHub::start()?;
    match hub.connect("/private") {
        Ok(_) => anyhow::bail!("anonymous /private upgrade should fail"),
        Err(e) => assert!(e.to_string().contains("401"), "unexpected error: {e}"),
    }
    Ok(())
}

#[test]
fn unknown_paths_are_rejected() -> anyhow::Result<()> {
    let hub = TestHub::start()?;
    match hub.connect("/nope") {
        Ok(_) => anyhow::bail!("unknown path upgrade should fail"),
        Err(e) => assert!(e.to_string().contains("404"), "unexpected error: {e}"),
    }
    Ok(())
}

#[test]
fn anonymous_private_stream_subscribe_is_ignored() -> anyhow::Result<()> {
    let hub = TestHub::start()?;
    let mut client = hub.connect("/")?;

    client.send_text(r#"{"method":"subscribe","streams":["balance","x.y"]}"#)?;
    assert_eq!(
        client.recv_json()?,
        json!({"data": {"message": "subscribed", "streams": ["x.y"]}})
    );
    Ok(())
}
