//! Self-forking pool: the same binary is the supervisor and, with `--worker`, a worker.
//!
//! ```text
//! cargo run --example pool --features logging
//! ```
//!
//! Every worker counts ticks as "requests", so with `max_connections = 5` each one is
//! recycled every few seconds. Ctrl-C stops the pool gracefully.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use procvisor::{
    LogWriter, PoolConfig, PoolSupervisor, Service, ServiceError, Subscribe, Target, WorkerLink,
    WorkerRuntime,
};
use serde_json::Value;
use tokio::task::JoinHandle;

struct Ticker {
    task: Option<JoinHandle<()>>,
}

#[async_trait]
impl Service for Ticker {
    async fn start(&mut self, link: WorkerLink) -> Result<(), ServiceError> {
        self.task = Some(tokio::spawn(async move {
            let mut every = tokio::time::interval(Duration::from_secs(1));
            while !link.is_closed() {
                every.tick().await;
                link.request();
            }
        }));
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), ServiceError> {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        Ok(())
    }

    async fn on_message(&mut self, payload: Value) {
        tracing::info!(%payload, pid = std::process::id(), "worker got a message");
    }
}

async fn worker() -> anyhow::Result<()> {
    let exit = WorkerRuntime::stdio().run(Ticker { task: None }).await?;
    std::process::exit(exit.code());
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    // stdout carries the protocol, so logs go to stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    if std::env::args().nth(1).as_deref() == Some("--worker") {
        return worker().await;
    }

    let cfg = PoolConfig {
        enhanced: true,
        count: 2,
        respawn_delay: Duration::from_secs(2),
        max_connections: 5,
        stop_timeout: Some(Duration::from_secs(10)),
        ..PoolConfig::default()
    };
    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
    let pool = PoolSupervisor::builder(Target::current_exe()?.arg("--worker"), cfg)
        .with_subscribers(subs)
        .build();

    pool.start().await?;
    pool.send(serde_json::json!({ "hello": "workers" }));
    // already running: this only waits for the signal, then stops
    pool.run_until_signal().await?;
    Ok(())
}
