//! Runs a shell command to completion, then a second one past its deadline.
//!
//! ```text
//! cargo run --example run_once
//! ```

use std::time::Duration;

use procvisor::{ChildSupervisor, SupervisorError, Target};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "debug".into()),
        )
        .init();

    ChildSupervisor::run_once(Target::new("sh").args(["-c", "echo done >&2"]), None).await?;
    println!("first job finished");

    let slow = Target::new("sleep").arg("10");
    match ChildSupervisor::run_once(slow, Some(Duration::from_millis(500))).await {
        Err(err @ SupervisorError::Timeout { .. }) => println!("second job: {err}"),
        other => anyhow::bail!("unexpected outcome: {other:?}"),
    }
    Ok(())
}
