use crate::*;

use cairn_core::message::{ComputeReply, ComputeRequest, Locations, SetitemRequest, TaskSpec};
use cairn_core::wire::Status;
use cairn_services::TcpTransport;
use serde_json::json;

async fn tcp_worker(transport: &Arc<TcpTransport>, scheduler: &Scheduler) -> Result<Worker> {
    let options = WorkerOptions::default().scheduler(scheduler.address().clone());
    let worker = Worker::start(transport.clone(), registry(), options).await?;
    Ok(worker)
}

#[tokio::test]
async fn status_over_tcp() -> Result<()> {
    let transport = Arc::new(TcpTransport::localhost());
    let mut scheduler = Scheduler::bind(transport.as_ref()).await?;
    let worker = tcp_worker(&transport, &scheduler).await?;
    assert!(worker.address().as_str().starts_with("tcp://127.0.0.1:"));

    let registration = scheduler.recv_any().await?;
    assert_eq!(registration.header.function, Function::Register);

    let reply = scheduler.request(worker.address(), Function::Status, &Value::Null).await?;
    assert_eq!(reply.header.status, Status::Ok);
    assert_eq!(reply.header.address.as_ref(), Some(worker.address()));
    assert_eq!(reply.decode::<String>()?, "OK");
    Ok(())
}

#[tokio::test]
async fn compute_across_tcp_workers() -> Result<()> {
    let transport = Arc::new(TcpTransport::localhost());
    let mut scheduler = Scheduler::bind(transport.as_ref()).await?;
    let a = tcp_worker(&transport, &scheduler).await?;
    let b = tcp_worker(&transport, &scheduler).await?;

    let set = SetitemRequest {
        key: "x".into(),
        value: json!(10),
        reply: true,
    };
    scheduler.request(a.address(), Function::Setitem, &set).await?;

    let request = ComputeRequest {
        key: "c".into(),
        task: TaskSpec::new("add").key("x").literal(1),
        locations: Locations::from([("x".to_string(), vec![a.address().clone()])]),
        queue: json!("q-key"),
    };
    let body: ComputeReply = scheduler
        .request(b.address(), Function::Compute, &request)
        .await?
        .decode()?;

    assert_eq!(body.status, Status::Ok);
    assert_eq!(body.queue, json!("q-key"));
    assert_eq!(b.data().get("c"), Some(json!(11)));
    Ok(())
}
