use crate::*;

use cairn_core::message::{ErrorKind, Registration, RemoteError};
use cairn_core::wire::Status;
use cairn_core::CodecId;

#[tokio::test]
async fn status_reply_echoes_jobid_and_address() -> Result<()> {
    let fabric = Fabric::new();
    let worker = start_worker_with(&fabric, WorkerOptions::default().address("inproc://alice")).await?;
    let mut scheduler = Scheduler::bind_at(&fabric, SCHEDULER).await?;

    let header = Header::new(Function::Status)
        .with_jobid(Some(3))
        .with_address(scheduler.address().clone());
    scheduler.send_with(worker.address(), header, &Value::Null).await?;

    let reply = scheduler.recv().await?;
    assert_eq!(reply.header.function, Function::Status);
    assert_eq!(reply.header.jobid, Some(3));
    assert_eq!(reply.header.status, Status::Ok);
    assert_eq!(reply.header.address, Some(Address::from("inproc://alice")));
    assert_eq!(reply.decode::<String>()?, "OK");
    Ok(())
}

#[tokio::test]
async fn worker_registers_with_scheduler() -> Result<()> {
    let fabric = Fabric::new();
    // The worker announces itself before the scheduler is even bound.
    let worker = start_worker(&fabric).await?;
    let mut scheduler = Scheduler::bind_at(&fabric, SCHEDULER).await?;

    let frame = scheduler.recv_any().await?;
    assert_eq!(frame.header.function, Function::Register);
    assert_eq!(&frame.from, worker.address());
    assert_eq!(&frame.decode::<Registration>()?.address, worker.address());
    Ok(())
}

#[tokio::test]
async fn reply_goes_to_header_address_over_sender() -> Result<()> {
    let fabric = Fabric::new();
    let worker = start_worker(&fabric).await?;
    let scheduler = Scheduler::bind_at(&fabric, SCHEDULER).await?;
    let mut observer = Scheduler::bind(&fabric).await?;

    let header = Header::new(Function::Status)
        .with_jobid(Some(9))
        .with_address(observer.address().clone());
    scheduler.send_with(worker.address(), header, &Value::Null).await?;

    let reply = observer.recv().await?;
    assert_eq!(reply.header.jobid, Some(9));
    assert_eq!(&reply.from, worker.address());
    Ok(())
}

#[tokio::test]
async fn reply_falls_back_to_sender_without_header_address() -> Result<()> {
    let fabric = Fabric::new();
    let worker = start_worker(&fabric).await?;
    let mut scheduler = Scheduler::bind_at(&fabric, SCHEDULER).await?;

    let header = Header::new(Function::Status).with_jobid(Some(4));
    scheduler.send_with(worker.address(), header, &Value::Null).await?;

    assert_eq!(scheduler.recv().await?.header.jobid, Some(4));
    Ok(())
}

#[tokio::test]
async fn unknown_function_gets_error_reply() -> Result<()> {
    let fabric = Fabric::new();
    let worker = start_worker(&fabric).await?;
    let mut scheduler = Scheduler::bind_at(&fabric, SCHEDULER).await?;

    let reply = scheduler
        .request(worker.address(), Function::from("frobnicate".to_string()), &Value::Null)
        .await?;
    assert_eq!(reply.header.function, Function::Error);
    assert_eq!(reply.header.status, Status::Error);
    assert_eq!(reply.decode::<RemoteError>()?.kind, ErrorKind::UnknownRequest);

    // The loop keeps serving.
    let reply = scheduler.request(worker.address(), Function::Status, &Value::Null).await?;
    assert_eq!(reply.header.status, Status::Ok);
    Ok(())
}

#[tokio::test]
async fn undecodable_payload_gets_decode_error() -> Result<()> {
    let fabric = Fabric::new();
    let worker = start_worker(&fabric).await?;
    let mut scheduler = Scheduler::bind_at(&fabric, SCHEDULER).await?;

    let header = Header::new(Function::Getitem)
        .with_jobid(Some(11))
        .with_address(scheduler.address().clone());
    scheduler
        .send_raw(worker.address(), header.encode()?, Bytes::from_static(b"{not json"))
        .await?;

    let reply = scheduler.recv().await?;
    assert_eq!(reply.header.function, Function::Error);
    assert_eq!(reply.header.jobid, Some(11));
    assert_eq!(reply.decode::<RemoteError>()?.kind, ErrorKind::Decode);
    Ok(())
}

#[tokio::test]
async fn undecodable_header_is_answered_to_sender() -> Result<()> {
    let fabric = Fabric::new();
    let worker = start_worker(&fabric).await?;
    let mut scheduler = Scheduler::bind_at(&fabric, SCHEDULER).await?;

    scheduler
        .send_raw(worker.address(), Bytes::from_static(b"\x00\x01"), Bytes::new())
        .await?;

    let reply = scheduler.recv().await?;
    assert_eq!(reply.header.function, Function::Error);
    assert_eq!(reply.header.jobid, None);
    assert_eq!(reply.decode::<RemoteError>()?.kind, ErrorKind::Decode);
    Ok(())
}

#[tokio::test]
async fn reply_kinds_are_never_answered() -> Result<()> {
    let fabric = Fabric::new();
    let worker = start_worker(&fabric).await?;
    let mut scheduler = Scheduler::bind_at(&fabric, SCHEDULER).await?;

    for function in [Function::GetitemAck, Function::ComputeAck, Function::Error] {
        scheduler.send(worker.address(), function, &Value::Null).await?;
    }
    scheduler.expect_silence(Duration::from_millis(100)).await?;
    Ok(())
}

#[tokio::test]
async fn status_reply_honours_reply_codec() -> Result<()> {
    let fabric = Fabric::new();
    let worker = start_worker(&fabric).await?;
    let mut scheduler = Scheduler::bind_at(&fabric, SCHEDULER).await?;

    let header = Header::new(Function::Status)
        .with_jobid(Some(1))
        .with_address(scheduler.address().clone())
        .with_reply_codec(CodecId::MessagePack);
    scheduler.send_with(worker.address(), header, &Value::Null).await?;

    let reply = scheduler.recv().await?;
    assert_eq!(reply.header.codec, Some(CodecId::MessagePack));
    assert_eq!(reply.decode::<String>()?, "OK");
    Ok(())
}
