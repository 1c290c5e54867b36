use std::fmt;

/// Status of a single supervised process.
///
/// ```text
///  ready ──start──► starting ──online/started──► ok ──stop──► stopping ──exit──► ready
///                      ▲                          │
///                      └──── delay ── respawn ◄───┘ unexpected exit
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Status {
    /// No process; `start()` may be called.
    #[default]
    Ready,
    /// A process was spawned and is not confirmed up yet.
    Starting,
    /// The process is up.
    Ok,
    /// The process died unexpectedly; a restart is scheduled.
    Respawn,
    /// `stop()` is waiting for the process to exit.
    Stopping,
}

impl Status {
    /// Lowercase name, as carried in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Ready => "ready",
            Status::Starting => "starting",
            Status::Ok => "ok",
            Status::Respawn => "respawn",
            Status::Stopping => "stopping",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
