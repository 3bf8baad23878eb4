//! Dispatcher (component G): the single-threaded event loop.
//!
//! Each iteration computes the nearest due timer, polls every bound socket
//! for at most that long in total, handles each readable datagram, then
//! fires every timer whose deadline has passed — in that order, per §4.G.
//! The loop itself never returns on normal operation; tests instead drive
//! [`Dispatcher::step`] directly rather than [`Dispatcher::run`].

use std::sync::Arc;
use std::time::Duration;

use log::warn;

use crate::runtime::Runtime;
use crate::socket::Socket;

/// The longest the dispatcher will wait with nothing scheduled, so it can
/// still notice external shutdown requests promptly.
const IDLE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Drives a [`Runtime`] against one socket per interface it owns. There is
/// no multiplexing primitive here (no `select`/`epoll` wrapper crate) —
/// each interface's socket gets a slice of the overall wait budget every
/// iteration, round-robin, which is sufficient for the handful of
/// interfaces this client typically manages and keeps the loop
/// single-threaded and synchronous, matching every other collaborator here.
pub struct Dispatcher<'a> {
    runtime: &'a mut Runtime,
    sockets: Vec<(String, Arc<dyn Socket>)>,
}

impl<'a> Dispatcher<'a> {
    pub fn new(runtime: &'a mut Runtime, sockets: Vec<(String, Arc<dyn Socket>)>) -> Self {
        Dispatcher { runtime, sockets }
    }

    /// One iteration of the loop. Polls every interface's socket for its
    /// share of the wait budget, handling each readable datagram, then
    /// fires every timer due by the time it returns.
    pub fn step(&mut self) {
        let wait = self.wait_duration();
        let share = if self.sockets.is_empty() {
            wait
        } else {
            (wait / self.sockets.len() as u32).max(Duration::from_millis(1))
        };
        for (interface_name, socket) in &self.sockets {
            match socket.recv_timeout(share) {
                Ok(Some(bytes)) => self.runtime.handle_datagram(interface_name, &bytes),
                Ok(None) => {}
                Err(e) => warn!("{interface_name}: socket error: {e}"),
            }
        }
        self.runtime.fire_due_timers();
    }

    fn wait_duration(&self) -> Duration {
        let Some(deadline) = self.runtime.next_deadline() else {
            return IDLE_POLL_INTERVAL;
        };
        let now = self.runtime.now();
        deadline.saturating_duration_since(now).min(IDLE_POLL_INTERVAL)
    }

    /// Run forever. `should_stop` is polled once per iteration so the
    /// binary's signal handler can request a clean exit (SIGINT/SIGTERM,
    /// §5) without this module knowing about signals directly.
    pub fn run(&mut self, mut should_stop: impl FnMut() -> bool) {
        loop {
            if should_stop() {
                self.runtime.shutdown();
                return;
            }
            self.step();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::client::{Client, ClientConfig};
    use crate::clock::{AbsTime, FakeClock};
    use crate::duid::Duid;
    use crate::error::ScriptError;
    use crate::interface::{Interface, InterfaceFlags};
    use crate::journal::Journal;
    use crate::script::{ExitOutcome, ScriptInvocation, ScriptRunner};
    use crate::socket::RecordingSocket;
    use crate::timer::ClientId;
    use std::collections::HashMap;

    struct NoopRunner;
    impl ScriptRunner for NoopRunner {
        fn run(&self, _invocation: &ScriptInvocation) -> Result<ExitOutcome, ScriptError> {
            Ok(ExitOutcome::Exited(0))
        }
    }

    fn fresh_journal() -> Journal {
        static COUNTER: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
        let n = COUNTER.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!("dhcp4-core-dispatcher-test-{}-{n}", std::process::id()));
        let _ = std::fs::remove_file(&path);
        Journal::open(&path, None::<&std::path::Path>).unwrap().0
    }

    #[test]
    fn one_step_with_nothing_scheduled_does_not_panic() {
        let hw = vec![1, 2, 0, 0, 0, 0, 1];
        let mut iface = Interface::new("eth0", hw.clone(), InterfaceFlags::REQUESTED);
        iface
            .live_clients
            .push(Client::new(ClientId(1), "eth0", [2, 0, 0, 0, 0, 1], ClientConfig::default()));
        let mut sockets: HashMap<String, Arc<dyn Socket>> = HashMap::new();
        sockets.insert("eth0".to_string(), Arc::new(RecordingSocket::default()));
        let mut rt = Runtime::new(
            vec![iface],
            Duid::new_ll(&hw),
            Box::new(FakeClock::new(AbsTime::from_secs(1000))),
            Box::new(NoopRunner),
            fresh_journal(),
            sockets,
            Vec::new(),
        );
        rt.start_all();
        let poll_socket: Arc<dyn Socket> = Arc::new(RecordingSocket::default());
        let mut dispatcher = Dispatcher::new(&mut rt, vec![("eth0".to_string(), poll_socket)]);
        dispatcher.step();
    }
}
