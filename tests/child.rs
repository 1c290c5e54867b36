mod common;

use std::time::Duration;

use common::{Behaviour, Boot, FakeLauncher, OnStop, drain, settle, target, wait_for};
use procvisor::{
    ChildConfig, ChildSupervisor, EventKind, Inbound, Outbound, Signal, Status, SupervisorError,
    TIMEOUT_MESSAGE,
};
use serde_json::json;
use tokio::time::Instant;

fn child(cfg: ChildConfig, launcher: &FakeLauncher) -> ChildSupervisor {
    ChildSupervisor::builder(target(), cfg)
        .with_launcher(launcher.clone())
        .build()
}

fn statuses(kinds: Vec<EventKind>) -> Vec<Status> {
    kinds
        .into_iter()
        .filter_map(|k| match k {
            EventKind::Status(s) => Some(s),
            _ => None,
        })
        .collect()
}

fn enhanced() -> ChildConfig {
    ChildConfig {
        enhanced: true,
        ..ChildConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn start_walks_starting_then_ok() {
    let launcher = FakeLauncher::new();
    let child = child(ChildConfig::default(), &launcher);
    let mut rx = child.subscribe();

    child.start().await.unwrap();

    assert_eq!(child.status(), Status::Ok);
    assert_eq!(statuses(drain(&mut rx)), vec![Status::Starting, Status::Ok]);
    assert!(!launcher.proc(0).opts().pooled);
}

#[tokio::test(start_paused = true)]
async fn enhanced_start_waits_for_started() {
    let launcher = FakeLauncher::new().with_default(Behaviour::boot(Boot::Silent));
    let child = child(enhanced(), &launcher);

    let starting = tokio::spawn({
        let child = child.clone();
        async move { child.start().await }
    });
    settle().await;
    assert_eq!(child.status(), Status::Starting);

    launcher.proc(0).report(Inbound::Started);
    starting.await.unwrap().unwrap();
    assert_eq!(child.status(), Status::Ok);
}

#[tokio::test(start_paused = true)]
async fn stop_in_ready_emits_nothing() {
    let launcher = FakeLauncher::new();
    let child = child(ChildConfig::default(), &launcher);
    let mut rx = child.subscribe();

    child.stop().await.unwrap();
    settle().await;

    assert!(drain(&mut rx).is_empty());
    assert_eq!(child.status(), Status::Ready);
}

#[tokio::test(start_paused = true)]
async fn plain_stop_terminates_and_returns_to_ready() {
    let launcher = FakeLauncher::new();
    let child = child(ChildConfig::default(), &launcher);
    child.start().await.unwrap();
    let mut rx = child.subscribe();

    child.stop().await.unwrap();

    assert_eq!(launcher.proc(0).signals(), vec![Signal::Terminate]);
    assert_eq!(
        statuses(drain(&mut rx)),
        vec![Status::Stopping, Status::Ready]
    );
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(launcher.launches(), 1);
}

#[tokio::test(start_paused = true)]
async fn enhanced_stop_sends_stop_message() {
    let launcher = FakeLauncher::new();
    let child = child(enhanced(), &launcher);
    child.start().await.unwrap();

    child.stop().await.unwrap();

    let proc = launcher.proc(0);
    assert!(proc.sent().contains(&Outbound::Stop));
    assert!(proc.signals().is_empty());
    assert_eq!(child.status(), Status::Ready);
}

#[tokio::test(start_paused = true)]
async fn stop_deadline_kills_stubborn_process() {
    let launcher = FakeLauncher::new().with_default(Behaviour::stubborn());
    let cfg = ChildConfig {
        stop_timeout: Some(Duration::from_secs(2)),
        ..enhanced()
    };
    let child = child(cfg, &launcher);
    child.start().await.unwrap();

    let begin = Instant::now();
    child.stop().await.unwrap();

    assert!(begin.elapsed() >= Duration::from_secs(2));
    assert_eq!(launcher.proc(0).signals(), vec![Signal::Kill]);
    assert_eq!(child.status(), Status::Ready);
}

#[tokio::test(start_paused = true)]
async fn stop_error_surfaces_verbatim() {
    let launcher = FakeLauncher::new().with_default(Behaviour {
        on_stop: OnStop::Fail("failed"),
        ..Behaviour::default()
    });
    let child = child(enhanced(), &launcher);
    child.start().await.unwrap();

    let err = child.stop().await.unwrap_err();
    assert!(matches!(err, SupervisorError::Stop { .. }));
    assert_eq!(err.to_string(), "failed");
}

#[tokio::test(start_paused = true)]
async fn crash_walks_respawn_starting_ok() {
    let launcher = FakeLauncher::new();
    let child = child(ChildConfig::default(), &launcher);
    child.start().await.unwrap();
    let mut rx = child.subscribe();

    let begin = Instant::now();
    launcher.proc(0).crash(1);

    let respawn = wait_for(&mut rx, |k| matches!(k, EventKind::Respawn { .. })).await;
    assert!(begin.elapsed() >= Duration::from_secs(1));
    assert_eq!(respawn.pid(), Some(launcher.proc(1).pid()));
    assert_eq!(child.status(), Status::Ok);

    launcher.proc(1).crash(1);
    wait_for(&mut rx, |k| matches!(k, EventKind::Respawn { .. })).await;
    assert_eq!(launcher.launches(), 3);
}

#[tokio::test(start_paused = true)]
async fn respawn_emits_statuses_in_order() {
    let launcher = FakeLauncher::new();
    let child = child(ChildConfig::default(), &launcher);
    child.start().await.unwrap();
    let mut rx = child.subscribe();

    launcher.proc(0).crash(1);
    let mut seen = Vec::new();
    loop {
        let ev = wait_for(&mut rx, |_| true).await;
        match ev.kind {
            EventKind::Status(s) => seen.push(s),
            EventKind::Respawn { .. } => break,
            _ => {}
        }
    }
    assert_eq!(seen, vec![Status::Respawn, Status::Starting, Status::Ok]);
}

#[tokio::test(start_paused = true)]
async fn raw_kill_counts_as_a_crash() {
    let launcher = FakeLauncher::new();
    let child = child(ChildConfig::default(), &launcher);
    child.start().await.unwrap();
    let mut rx = child.subscribe();

    child.kill(Signal::Terminate);
    wait_for(&mut rx, |k| matches!(k, EventKind::Respawn { .. })).await;

    assert_eq!(launcher.launches(), 2);
    assert_eq!(child.status(), Status::Ok);
}

#[tokio::test(start_paused = true)]
async fn crash_without_respawn_returns_to_ready() {
    let launcher = FakeLauncher::new();
    let cfg = ChildConfig {
        respawn: false,
        ..ChildConfig::default()
    };
    let child = child(cfg, &launcher);
    child.start().await.unwrap();

    launcher.proc(0).crash(1);
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(child.status(), Status::Ready);
    assert_eq!(launcher.launches(), 1);
}

#[tokio::test(start_paused = true)]
async fn stop_during_respawn_leaves_restart_scheduled() {
    let launcher = FakeLauncher::new();
    let child = child(ChildConfig::default(), &launcher);
    child.start().await.unwrap();

    launcher.proc(0).crash(1);
    settle().await;
    assert_eq!(child.status(), Status::Respawn);
    let mut rx = child.subscribe();

    child.stop().await.unwrap();
    settle().await;
    assert_eq!(child.status(), Status::Respawn);
    assert!(statuses(drain(&mut rx)).is_empty());

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(child.status(), Status::Ok);
    assert_eq!(launcher.launches(), 2);
}

#[tokio::test(start_paused = true)]
async fn stop_while_starting_succeeds_without_transition() {
    let launcher = FakeLauncher::new().with_default(Behaviour::boot(Boot::Silent));
    let child = child(enhanced(), &launcher);

    let starting = tokio::spawn({
        let child = child.clone();
        async move { child.start().await }
    });
    settle().await;
    assert_eq!(child.status(), Status::Starting);
    let mut rx = child.subscribe();

    child.stop().await.unwrap();
    settle().await;
    assert_eq!(child.status(), Status::Starting);
    assert!(statuses(drain(&mut rx)).is_empty());
    assert!(launcher.proc(0).signals().is_empty());

    launcher.proc(0).report(Inbound::Started);
    starting.await.unwrap().unwrap();
    assert_eq!(child.status(), Status::Ok);
}

#[tokio::test(start_paused = true)]
async fn stop_while_stopping_succeeds() {
    let launcher = FakeLauncher::new().with_default(Behaviour::stubborn());
    let child = child(enhanced(), &launcher);
    child.start().await.unwrap();

    let first = tokio::spawn({
        let child = child.clone();
        async move { child.stop().await }
    });
    settle().await;
    assert_eq!(child.status(), Status::Stopping);

    child.stop().await.unwrap();
    assert_eq!(child.status(), Status::Stopping);
    first.abort();
}

#[tokio::test(start_paused = true)]
async fn start_error_is_final() {
    let launcher =
        FakeLauncher::new().with_default(Behaviour::boot(Boot::FailExit("failed", 1)));
    let cfg = ChildConfig {
        respawn: false,
        ..enhanced()
    };
    let child = child(cfg, &launcher);
    let mut rx = child.subscribe();

    let err = child.start().await.unwrap_err();
    assert!(matches!(err, SupervisorError::Startup { .. }));
    assert_eq!(err.to_string(), "failed");

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(launcher.launches(), 1);
    assert_eq!(child.status(), Status::Ready);
    let kinds = drain(&mut rx);
    assert!(
        kinds
            .iter()
            .any(|k| matches!(k, EventKind::WorkerError { message, .. } if message == "failed"))
    );
    assert!(!kinds.iter().any(|k| matches!(k, EventKind::Respawn { .. })));
}

#[tokio::test(start_paused = true)]
async fn once_timeout_kills_and_fails() {
    let launcher = FakeLauncher::new().with_default(Behaviour::stubborn());
    let child = child(ChildConfig::once(Some(Duration::from_secs(1))), &launcher);

    let begin = Instant::now();
    let err = child.start().await.unwrap_err();

    assert!(begin.elapsed() >= Duration::from_secs(1));
    assert!(matches!(err, SupervisorError::Timeout { .. }));
    assert_eq!(err.to_string(), TIMEOUT_MESSAGE);
    assert_eq!(err.to_string(), "Process timeout reached, killed");
    assert_eq!(launcher.proc(0).signals(), vec![Signal::Kill]);
    assert_eq!(child.status(), Status::Ready);
}

#[tokio::test(start_paused = true)]
async fn once_resolves_on_clean_exit() {
    let launcher = FakeLauncher::new().with_default(Behaviour::boot(Boot::Exit(0)));
    let child = child(ChildConfig::once(None), &launcher);
    let mut rx = child.subscribe();

    child.start().await.unwrap();

    assert_eq!(
        statuses(drain(&mut rx)),
        vec![Status::Starting, Status::Ok, Status::Ready]
    );
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(launcher.launches(), 1);
}

#[tokio::test(start_paused = true)]
async fn once_fails_on_non_zero_exit() {
    let launcher = FakeLauncher::new().with_default(Behaviour::boot(Boot::Exit(2)));
    let child = child(ChildConfig::once(None), &launcher);

    let err = child.start().await.unwrap_err();
    assert_eq!(err.to_string(), "process exited with code 2");
}

#[tokio::test(start_paused = true)]
async fn once_reports_process_error() {
    let launcher = FakeLauncher::new().with_default(Behaviour::boot(Boot::Fail("bad input")));
    let child = child(ChildConfig::once(None), &launcher);

    let starting = tokio::spawn({
        let child = child.clone();
        async move { child.start().await }
    });
    settle().await;
    launcher.proc(0).crash(1);

    let err = starting.await.unwrap().unwrap_err();
    assert_eq!(err.to_string(), "bad input");
}

#[tokio::test(start_paused = true)]
async fn messages_pass_through() {
    let launcher = FakeLauncher::new();
    let child = child(ChildConfig::default(), &launcher);

    // nothing to deliver to yet
    child.send("ping");
    settle().await;

    child.start().await.unwrap();
    let mut rx = child.subscribe();
    child.send("ping");
    settle().await;
    assert!(launcher.proc(0).sent().contains(&Outbound::message("ping")));

    launcher.proc(0).report(Inbound::Message {
        payload: json!("pong"),
    });
    let ev = wait_for(&mut rx, |k| matches!(k, EventKind::Message { .. })).await;
    assert_eq!(
        ev.kind,
        EventKind::Message {
            worker: 1,
            payload: json!("pong"),
        }
    );
}

#[tokio::test(start_paused = true)]
async fn second_start_is_rejected_while_starting() {
    let launcher = FakeLauncher::new().with_default(Behaviour::boot(Boot::Silent));
    let child = child(enhanced(), &launcher);

    let first = tokio::spawn({
        let child = child.clone();
        async move { child.start().await }
    });
    settle().await;

    let err = child.start().await.unwrap_err();
    assert!(matches!(err, SupervisorError::Busy { operation: "start" }));
    first.abort();
}
