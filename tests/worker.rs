use std::sync::{Arc, Mutex};
use std::time::Duration;

use procvisor::{
    Inbound, LineReader, ORPHAN_MESSAGE, Outbound, Service, ServiceError, WorkerExit,
    WorkerLink, WorkerRuntime, encode_line,
};
use serde_json::{Value, json};
use tokio::io::{AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;

#[derive(Default)]
struct Echo {
    fail_start: Option<&'static str>,
    fail_stop: Option<&'static str>,
    seen: Arc<Mutex<Vec<Value>>>,
    link: Option<WorkerLink>,
}

#[async_trait::async_trait]
impl Service for Echo {
    async fn start(&mut self, link: WorkerLink) -> Result<(), ServiceError> {
        if let Some(msg) = self.fail_start {
            return Err(msg.into());
        }
        self.link = Some(link);
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), ServiceError> {
        match self.fail_stop {
            Some(msg) => Err(msg.into()),
            None => Ok(()),
        }
    }

    async fn on_message(&mut self, payload: Value) {
        self.seen.lock().unwrap().push(payload.clone());
        if let Some(link) = &self.link {
            link.request();
            link.send(payload);
        }
    }
}

struct Supervisor {
    reader: LineReader<BufReader<ReadHalf<DuplexStream>>>,
    writer: WriteHalf<DuplexStream>,
}

impl Supervisor {
    async fn send(&mut self, msg: &Outbound) {
        let line = encode_line(msg).unwrap();
        self.writer.write_all(line.as_bytes()).await.unwrap();
    }

    async fn send_raw(&mut self, raw: &str) {
        self.writer.write_all(raw.as_bytes()).await.unwrap();
    }

    async fn recv(&mut self) -> Inbound {
        tokio::time::timeout(Duration::from_secs(5), self.reader.next_message::<Inbound>())
            .await
            .expect("worker went quiet")
            .unwrap()
            .expect("channel closed")
            .unwrap()
    }
}

fn spawn(
    service: Echo,
    configure: impl FnOnce(
        WorkerRuntime<BufReader<ReadHalf<DuplexStream>>, WriteHalf<DuplexStream>>,
    ) -> WorkerRuntime<BufReader<ReadHalf<DuplexStream>>, WriteHalf<DuplexStream>>,
) -> (
    Supervisor,
    JoinHandle<Result<WorkerExit, procvisor::WorkerError>>,
) {
    let (sup, worker) = tokio::io::duplex(64 * 1024);
    let (worker_r, worker_w) = tokio::io::split(worker);
    let (sup_r, sup_w) = tokio::io::split(sup);

    let runtime = configure(WorkerRuntime::new(BufReader::new(worker_r), worker_w));
    let handle = tokio::spawn(runtime.run(service));
    (
        Supervisor {
            reader: LineReader::new(BufReader::new(sup_r)),
            writer: sup_w,
        },
        handle,
    )
}

#[tokio::test]
async fn reports_started_and_stops_on_request() {
    let (mut sup, worker) = spawn(Echo::default(), |rt| rt);

    assert_eq!(sup.recv().await, Inbound::Started);
    sup.send(&Outbound::Stop).await;

    let exit = worker.await.unwrap().unwrap();
    assert_eq!(exit, WorkerExit::Stopped);
    assert_eq!(exit.code(), 0);
}

#[tokio::test]
async fn start_failure_is_reported() {
    let service = Echo {
        fail_start: Some("port in use"),
        ..Echo::default()
    };
    let (mut sup, worker) = spawn(service, |rt| rt);

    assert_eq!(sup.recv().await, Inbound::error("port in use"));
    let exit = worker.await.unwrap().unwrap();
    assert_eq!(exit, WorkerExit::StartFailed);
    assert_eq!(exit.code(), 1);
}

#[tokio::test]
async fn stop_failure_is_reported() {
    let service = Echo {
        fail_stop: Some("failed"),
        ..Echo::default()
    };
    let (mut sup, worker) = spawn(service, |rt| rt);

    assert_eq!(sup.recv().await, Inbound::Started);
    sup.send(&Outbound::Stop).await;
    assert_eq!(sup.recv().await, Inbound::error("failed"));
    assert_eq!(worker.await.unwrap().unwrap(), WorkerExit::StopFailed);
}

#[tokio::test]
async fn channel_eof_stops_gracefully() {
    let (mut sup, worker) = spawn(Echo::default(), |rt| rt);

    assert_eq!(sup.recv().await, Inbound::Started);
    sup.writer.shutdown().await.unwrap();

    assert_eq!(worker.await.unwrap().unwrap(), WorkerExit::Stopped);
}

#[tokio::test]
async fn payloads_reach_the_service_and_back() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let service = Echo {
        seen: seen.clone(),
        ..Echo::default()
    };
    let (mut sup, worker) = spawn(service, |rt| rt);

    assert_eq!(sup.recv().await, Inbound::Started);
    sup.send(&Outbound::message(json!({ "n": 1 }))).await;

    assert_eq!(sup.recv().await, Inbound::Request);
    assert_eq!(
        sup.recv().await,
        Inbound::Message {
            payload: json!({ "n": 1 })
        }
    );
    assert_eq!(*seen.lock().unwrap(), vec![json!({ "n": 1 })]);

    sup.send(&Outbound::Stop).await;
    assert_eq!(worker.await.unwrap().unwrap(), WorkerExit::Stopped);
}

#[tokio::test]
async fn invalid_lines_are_skipped() {
    let (mut sup, worker) = spawn(Echo::default(), |rt| rt);

    assert_eq!(sup.recv().await, Inbound::Started);
    sup.send_raw("not json\n").await;
    sup.send_raw("{\"type\":\"reboot\"}\n").await;
    sup.send(&Outbound::Stop).await;

    assert_eq!(worker.await.unwrap().unwrap(), WorkerExit::Stopped);
}

#[tokio::test]
async fn stale_heartbeat_orphans_the_worker() {
    let (mut sup, worker) = spawn(Echo::default(), |rt| {
        rt.with_heartbeat(Some(Duration::from_millis(20)))
            .with_tolerance(2)
    });

    assert_eq!(sup.recv().await, Inbound::Started);
    sup.send(&Outbound::Heartbeat { timestamp: 1 }).await;

    let report = sup.recv().await;
    assert!(report.is_orphan());
    assert_eq!(report, Inbound::error(ORPHAN_MESSAGE));
    let exit = worker.await.unwrap().unwrap();
    assert_eq!(exit, WorkerExit::Orphaned);
    assert_eq!(exit.code(), 0);
}

#[tokio::test]
async fn watchdog_waits_for_the_first_heartbeat() {
    let (mut sup, worker) = spawn(Echo::default(), |rt| {
        rt.with_heartbeat(Some(Duration::from_millis(10)))
            .with_tolerance(1)
    });

    assert_eq!(sup.recv().await, Inbound::Started);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!worker.is_finished());

    sup.send(&Outbound::Stop).await;
    assert_eq!(worker.await.unwrap().unwrap(), WorkerExit::Stopped);
}
