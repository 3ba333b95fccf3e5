use crate::*;

use cairn_core::message::{
    DelitemRequest, ErrorKind, GetitemReply, GetitemRequest, ItemAck, RemoteError, SetitemRequest,
};
use cairn_core::wire::Status;
use cairn_core::CodecId;
use serde_json::json;

fn setitem(key: &str, value: Value, reply: bool) -> SetitemRequest {
    SetitemRequest {
        key: key.into(),
        value,
        reply,
    }
}

fn getitem(key: &str, queue: &str) -> GetitemRequest {
    GetitemRequest {
        key: key.into(),
        queue: json!(queue),
    }
}

#[tokio::test]
async fn setitem_then_getitem_round_trips() -> Result<()> {
    let fabric = Fabric::new();
    let worker = start_worker(&fabric).await?;
    let mut scheduler = Scheduler::bind_at(&fabric, SCHEDULER).await?;

    let value = json!({"rows": [1, 2, 3], "name": "x"});
    scheduler
        .send(worker.address(), Function::Setitem, &setitem("x", value.clone(), false))
        .await?;

    // Frames are handled in order, so the getitem sees the write.
    let reply = scheduler
        .request(worker.address(), Function::Getitem, &getitem("x", "some-key"))
        .await?;
    assert_eq!(reply.header.function, Function::GetitemAck);
    assert_eq!(reply.header.status, Status::Ok);

    let body: GetitemReply = reply.decode()?;
    assert_eq!(body.value, Ok(value.clone()));
    assert_eq!(body.queue, json!("some-key"));
    assert_eq!(worker.data().get("x"), Some(value));
    Ok(())
}

#[tokio::test]
async fn setitem_without_reply_is_silent() -> Result<()> {
    let fabric = Fabric::new();
    let worker = start_worker(&fabric).await?;
    let mut scheduler = Scheduler::bind_at(&fabric, SCHEDULER).await?;

    scheduler
        .send(worker.address(), Function::Setitem, &setitem("z", json!(30), false))
        .await?;
    assert!(eventually(|| worker.data().get("z") == Some(json!(30))).await);
    scheduler.expect_silence(Duration::from_millis(50)).await?;
    Ok(())
}

#[tokio::test]
async fn setitem_with_reply_is_acknowledged() -> Result<()> {
    let fabric = Fabric::new();
    let worker = start_worker(&fabric).await?;
    let mut scheduler = Scheduler::bind_at(&fabric, SCHEDULER).await?;

    let reply = scheduler
        .request(worker.address(), Function::Setitem, &setitem("z", json!(30), true))
        .await?;
    assert_eq!(reply.header.function, Function::SetitemAck);
    assert_eq!(reply.decode::<ItemAck>()?.key, "z");
    assert_eq!(worker.data().get("z"), Some(json!(30)));
    Ok(())
}

#[tokio::test]
async fn setitem_overwrites() -> Result<()> {
    let fabric = Fabric::new();
    let worker = start_worker(&fabric).await?;
    let mut scheduler = Scheduler::bind_at(&fabric, SCHEDULER).await?;

    for value in [json!(1), json!("two")] {
        scheduler
            .request(worker.address(), Function::Setitem, &setitem("k", value, true))
            .await?;
    }
    assert_eq!(worker.data().get("k"), Some(json!("two")));
    assert_eq!(worker.data().len(), 1);
    Ok(())
}

#[tokio::test]
async fn getitem_of_missing_key_is_an_error_value() -> Result<()> {
    let fabric = Fabric::new();
    let worker = start_worker(&fabric).await?;
    let mut scheduler = Scheduler::bind_at(&fabric, SCHEDULER).await?;

    let reply = scheduler
        .request(worker.address(), Function::Getitem, &getitem("nope", "q"))
        .await?;
    assert_eq!(reply.header.function, Function::GetitemAck);
    assert_eq!(reply.header.status, Status::Error);

    let body: GetitemReply = reply.decode()?;
    let err = body.value.unwrap_err();
    assert_eq!(err.kind, ErrorKind::KeyNotFound);
    assert_eq!(body.queue, json!("q"));
    Ok(())
}

#[tokio::test]
async fn delitem_is_indistinguishable_from_never_set() -> Result<()> {
    let fabric = Fabric::new();
    let worker = start_worker(&fabric).await?;
    let mut scheduler = Scheduler::bind_at(&fabric, SCHEDULER).await?;

    scheduler
        .request(worker.address(), Function::Setitem, &setitem("gone", json!(5), true))
        .await?;
    let reply = scheduler
        .request(
            worker.address(),
            Function::Delitem,
            &DelitemRequest {
                key: "gone".into(),
                reply: true,
            },
        )
        .await?;
    assert_eq!(reply.header.function, Function::DelitemAck);
    assert_eq!(reply.decode::<ItemAck>()?.key, "gone");

    let deleted: GetitemReply = scheduler
        .request(worker.address(), Function::Getitem, &getitem("gone", ""))
        .await?
        .decode()?;
    let never: GetitemReply = scheduler
        .request(worker.address(), Function::Getitem, &getitem("never", ""))
        .await?
        .decode()?;

    assert_eq!(deleted.value.unwrap_err().kind, never.value.unwrap_err().kind);
    assert!(!worker.data().contains("gone"));
    Ok(())
}

#[tokio::test]
async fn delitem_of_missing_key_is_a_noop() -> Result<()> {
    let fabric = Fabric::new();
    let worker = start_worker(&fabric).await?;
    let mut scheduler = Scheduler::bind_at(&fabric, SCHEDULER).await?;
    worker.data().insert("keep", json!(true));

    scheduler
        .send(
            worker.address(),
            Function::Delitem,
            &DelitemRequest {
                key: "absent".into(),
                reply: false,
            },
        )
        .await?;
    scheduler.expect_silence(Duration::from_millis(50)).await?;
    assert_eq!(worker.data().snapshot().len(), 1);
    Ok(())
}

#[tokio::test]
async fn getitem_reply_in_msgpack() -> Result<()> {
    let fabric = Fabric::new();
    let worker = start_worker(&fabric).await?;
    let mut scheduler = Scheduler::bind_at(&fabric, SCHEDULER).await?;
    worker.data().insert("x", json!([1, 2.5, "three"]));

    let header = Header::new(Function::Getitem)
        .with_jobid(Some(2))
        .with_address(scheduler.address().clone())
        .with_reply_codec(CodecId::MessagePack);
    scheduler.send_with(worker.address(), header, &getitem("x", "m")).await?;

    let reply = scheduler.recv().await?;
    assert_eq!(reply.header.codec, Some(CodecId::MessagePack));
    assert!(serde_json::from_slice::<Value>(&reply.payload).is_err());

    let body: GetitemReply = reply.decode()?;
    assert_eq!(body.value, Ok(json!([1, 2.5, "three"])));
    Ok(())
}

#[tokio::test]
async fn msgpack_request_is_understood() -> Result<()> {
    let fabric = Fabric::new();
    let worker = start_worker(&fabric).await?;
    let mut scheduler = Scheduler::bind_at(&fabric, SCHEDULER).await?;

    let header = Header::new(Function::Setitem)
        .with_jobid(Some(5))
        .with_address(scheduler.address().clone())
        .with_codec(CodecId::MessagePack);
    scheduler
        .send_with(worker.address(), header, &setitem("packed", json!({"a": 1}), true))
        .await?;

    let reply = scheduler.recv().await?;
    // Replies default to the request's codec.
    assert_eq!(reply.header.codec, Some(CodecId::MessagePack));
    assert_eq!(reply.decode::<ItemAck>()?.key, "packed");
    assert_eq!(worker.data().get("packed"), Some(json!({"a": 1})));
    Ok(())
}

#[tokio::test]
async fn remote_error_display_reaches_requester() -> Result<()> {
    let fabric = Fabric::new();
    let worker = start_worker(&fabric).await?;
    let mut scheduler = Scheduler::bind_at(&fabric, SCHEDULER).await?;

    let body: GetitemReply = scheduler
        .request(worker.address(), Function::Getitem, &getitem("missing", ""))
        .await?
        .decode()?;
    assert_eq!(body.value, Err(RemoteError::key_not_found("missing")));
    Ok(())
}
