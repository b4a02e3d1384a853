//! Signal relay between the host process and the nested process.
//!
//! Termination and user signals received by this process are forwarded to
//! the nested process instead of being acted on locally. Window size
//! changes resize the console when one is attached.

use std::thread::JoinHandle;

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use sharemnt_common::error::{Result, ShareMntError};
use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM, SIGUSR1, SIGUSR2, SIGWINCH};
use signal_hook::iterator::{Handle, Signals};

use crate::process::Process;
use crate::tty::{Console, Resizer};

/// Signals passed through to the nested process.
pub const FORWARDED: [i32; 6] = [SIGHUP, SIGINT, SIGQUIT, SIGTERM, SIGUSR1, SIGUSR2];

/// Relays signals to a running process for the duration of a run.
///
/// Handlers are installed on construction, so signals arriving between
/// construction and [`SignalRelay::forward`] are queued rather than acted
/// on. Dropping the relay closes it.
pub struct SignalRelay {
    signals: Option<Signals>,
    handle: Handle,
    console: Option<Console>,
    watcher: Option<JoinHandle<()>>,
}

impl SignalRelay {
    /// Installs the relay, taking ownership of the console if any.
    ///
    /// # Errors
    ///
    /// Returns [`ShareMntError::Relay`] if the handlers cannot be
    /// registered.
    pub fn new(console: Option<Console>) -> Result<Self> {
        let mut wanted = FORWARDED.to_vec();
        wanted.push(SIGWINCH);
        let signals = Signals::new(&wanted).map_err(|e| ShareMntError::Relay {
            message: format!("cannot register signal handlers: {e}"),
        })?;
        Ok(Self {
            handle: signals.handle(),
            signals: Some(signals),
            console,
            watcher: None,
        })
    }

    /// Relays signals to the started `process` until it exits, then
    /// returns its exit code.
    ///
    /// # Errors
    ///
    /// Returns an error if the process was not started, the relay was
    /// already used, or waiting for the process fails.
    pub fn forward(&mut self, process: &mut Process) -> Result<i32> {
        let pid = process
            .pid()
            .and_then(|pid| i32::try_from(pid).ok())
            .map(Pid::from_raw)
            .ok_or_else(|| ShareMntError::Relay {
                message: "process has not been started".into(),
            })?;
        let mut signals = self.signals.take().ok_or_else(|| ShareMntError::Relay {
            message: "relay already forwarding".into(),
        })?;

        let resizer = match self.console.as_mut() {
            Some(console) => {
                console.spawn_io()?;
                let resizer = console.resizer()?;
                resizer.resize()?;
                Some(resizer)
            }
            None => None,
        };

        self.watcher = Some(std::thread::spawn(move || {
            for signal in signals.forever() {
                dispatch(signal, pid, resizer.as_ref());
            }
        }));
        process.wait()
    }

    /// Stops relaying and releases the console. Calling it again is a
    /// no-op.
    pub fn close(&mut self) {
        self.handle.close();
        if let Some(watcher) = self.watcher.take() {
            let _ = watcher.join();
        }
        if let Some(mut console) = self.console.take() {
            console.close();
        }
    }
}

impl Drop for SignalRelay {
    fn drop(&mut self) {
        self.close();
    }
}

fn dispatch(signal: i32, pid: Pid, resizer: Option<&Resizer>) {
    if signal == SIGWINCH {
        if let Some(resizer) = resizer {
            if let Err(e) = resizer.resize() {
                tracing::warn!(error = %e, "failed to resize console");
            }
        }
        return;
    }
    let Ok(signal) = Signal::try_from(signal) else {
        return;
    };
    tracing::debug!(%pid, ?signal, "forwarding signal");
    if let Err(e) = kill(pid, signal) {
        tracing::debug!(%pid, ?signal, error = %e, "signal not delivered");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_requires_a_started_process() {
        let mut relay = SignalRelay::new(None).unwrap();
        let mut process = Process::new(vec!["true".into()], Vec::new());
        assert!(matches!(
            relay.forward(&mut process),
            Err(ShareMntError::Relay { .. })
        ));
    }

    #[test]
    fn forward_returns_exit_code_and_close_is_repeatable() {
        let mut relay = SignalRelay::new(None).unwrap();
        let mut process = Process::inheriting_env(vec!["sh".into(), "-c".into(), "exit 7".into()]);
        let mut cmd = process.command(&[]).unwrap();
        process.attach(cmd.spawn().unwrap());

        assert_eq!(relay.forward(&mut process).unwrap(), 7);
        relay.close();
        relay.close();
    }

    #[test]
    fn terminate_is_forwarded_to_the_process() {
        let mut relay = SignalRelay::new(None).unwrap();
        let mut process = Process::inheriting_env(vec!["sleep".into(), "30".into()]);
        let mut cmd = process.command(&[]).unwrap();
        process.attach(cmd.spawn().unwrap());

        let pid = process.pid().unwrap();
        dispatch(SIGTERM, Pid::from_raw(i32::try_from(pid).unwrap()), None);
        assert_eq!(relay.forward(&mut process).unwrap(), 128 + SIGTERM);
    }
}
