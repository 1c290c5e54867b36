//! # OS signal handling.
//!
//! - [`wait_for_shutdown_signal`] completes when the supervisor process is asked to
//!   terminate (`run_until_signal`).
//! - [`wait_for_stop_signal`] is the worker-side variant: a pooled worker only
//!   honours `SIGHUP` (terminal signals are meant for its supervisor), a single
//!   process also honours `SIGINT`/`SIGTERM`.
//!
//! Both register their listeners when called, so create the future once and keep it
//! pinned across a `select!` loop.

/// Waits for SIGINT, SIGTERM, SIGQUIT or SIGHUP (Ctrl-C elsewhere).
#[cfg(unix)]
pub(crate) async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;
    let mut sighup = signal(SignalKind::hangup())?;

    tokio::select! {
        _ = sigint.recv()  => {},
        _ = sigterm.recv() => {},
        _ = sigquit.recv() => {},
        _ = sighup.recv()  => {},
    }
    Ok(())
}

/// Waits for Ctrl-C.
#[cfg(not(unix))]
pub(crate) async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

/// Waits for a graceful-stop signal addressed to a worker.
#[cfg(unix)]
pub(crate) async fn wait_for_stop_signal(pooled: bool) -> std::io::Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sighup = signal(SignalKind::hangup())?;
    // pooled workers still register these so the default action (exit) is suppressed
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    loop {
        tokio::select! {
            _ = sighup.recv() => return Ok("SIGHUP"),
            _ = sigint.recv() => {
                if !pooled {
                    return Ok("SIGINT");
                }
                tracing::debug!("ignored SIGINT");
            }
            _ = sigterm.recv() => {
                if !pooled {
                    return Ok("SIGTERM");
                }
                tracing::debug!("ignored SIGTERM");
            }
        }
    }
}

/// Waits for Ctrl-C; pooled workers never stop on it.
#[cfg(not(unix))]
pub(crate) async fn wait_for_stop_signal(pooled: bool) -> std::io::Result<&'static str> {
    if pooled {
        std::future::pending::<()>().await;
    }
    tokio::signal::ctrl_c().await?;
    Ok("CTRL-C")
}
