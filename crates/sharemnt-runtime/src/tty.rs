//! Pseudo-terminal console for interactive nested processes.

use std::fs::File;
use std::io::{self, IsTerminal, Read, Write};
use std::os::fd::{AsFd, AsRawFd, OwnedFd};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use nix::errno::Errno;
use nix::fcntl::{FcntlArg, FdFlag, fcntl};
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::pty::{Winsize, openpty};
use sharemnt_common::error::{Result, ShareMntError};

const PTMX: &str = "/dev/ptmx";

/// How long the output pump waits for data before rechecking for a stop.
const POLL_INTERVAL_MS: u16 = 50;

/// Reads allowed after a stop before the pump gives up on a busy slave.
const DRAIN_READS: usize = 64;

/// A pseudo-terminal pair bridged to the caller's stdio.
///
/// The slave end is handed to the nested process; the master end is pumped
/// to and from the caller's terminal, which is kept in raw mode until the
/// console is closed.
#[derive(Debug)]
pub struct Console {
    master: OwnedFd,
    slave: Option<OwnedFd>,
    raw_mode: bool,
    stop: Arc<AtomicBool>,
    output: Option<JoinHandle<()>>,
}

impl Console {
    /// Allocates a pseudo-terminal sized like the controlling terminal,
    /// with the slave owned by `root_uid`.
    ///
    /// # Errors
    ///
    /// Returns an error if the pair cannot be allocated or chowned.
    pub fn open(root_uid: u32) -> Result<Self> {
        let size = current_size();
        let pty = openpty(size.as_ref(), None).map_err(|e| ShareMntError::sys("openpty", e))?;
        for fd in [&pty.master, &pty.slave] {
            let _ = fcntl(fd, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))
                .map_err(|e| ShareMntError::sys("set close-on-exec on pty", e))?;
        }
        std::os::unix::fs::fchown(&pty.slave, Some(root_uid), None)
            .map_err(|e| ShareMntError::io(PTMX, e))?;
        tracing::debug!(root_uid, "pseudo-terminal allocated");
        Ok(Self {
            master: pty.master,
            slave: Some(pty.slave),
            raw_mode: false,
            stop: Arc::new(AtomicBool::new(false)),
            output: None,
        })
    }

    /// Hands out the slave end; subsequent calls return `None`.
    pub fn take_slave(&mut self) -> Option<OwnedFd> {
        self.slave.take()
    }

    /// Returns a handle that resizes this console.
    ///
    /// # Errors
    ///
    /// Returns an error if the master cannot be duplicated.
    pub fn resizer(&self) -> Result<Resizer> {
        let master = self.master.try_clone().map_err(|e| ShareMntError::io(PTMX, e))?;
        Ok(Resizer { master })
    }

    /// Switches the caller's terminal to raw mode and starts copying bytes
    /// between it and the master end.
    ///
    /// # Errors
    ///
    /// Returns an error if raw mode cannot be enabled or the master cannot
    /// be duplicated.
    pub fn spawn_io(&mut self) -> Result<()> {
        if io::stdin().is_terminal() {
            crossterm::terminal::enable_raw_mode()
                .map_err(|e| ShareMntError::io("/dev/tty", e))?;
            self.raw_mode = true;
        }

        let mut input = File::from(self.master.try_clone().map_err(|e| ShareMntError::io(PTMX, e))?);
        let output = File::from(self.master.try_clone().map_err(|e| ShareMntError::io(PTMX, e))?);
        let stop = Arc::clone(&self.stop);

        // Blocks on stdin for the rest of the run; never joined.
        let _ = std::thread::spawn(move || {
            let _ = pump(&mut io::stdin().lock(), &mut input);
        });
        self.output = Some(std::thread::spawn(move || {
            if let Err(e) = drain(&output, &mut io::stdout().lock(), &stop) {
                tracing::debug!(error = %e, "console output stopped");
            }
        }));
        Ok(())
    }

    /// Copies output still buffered in the console, then restores the
    /// caller's terminal. Does not wait for processes still holding the
    /// slave end.
    pub fn close(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(output) = self.output.take() {
            let _ = output.join();
        }
        if self.raw_mode {
            if let Err(e) = crossterm::terminal::disable_raw_mode() {
                tracing::warn!(error = %e, "failed to restore terminal mode");
            }
            self.raw_mode = false;
        }
    }
}

impl Drop for Console {
    fn drop(&mut self) {
        self.close();
    }
}

/// Resizes a console to the current size of the controlling terminal.
#[derive(Debug)]
pub struct Resizer {
    master: OwnedFd,
}

impl Resizer {
    /// Copies the controlling terminal's size onto the console.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be applied.
    pub fn resize(&self) -> Result<()> {
        let Some(size) = current_size() else {
            return Ok(());
        };
        // SAFETY: `master` is an open pseudo-terminal master and `size`
        // outlives the call.
        let rc = unsafe { libc::ioctl(self.master.as_raw_fd(), libc::TIOCSWINSZ, &raw const size) };
        if rc < 0 {
            return Err(ShareMntError::io(PTMX, io::Error::last_os_error()));
        }
        tracing::debug!(rows = size.ws_row, cols = size.ws_col, "console resized");
        Ok(())
    }
}

fn current_size() -> Option<Winsize> {
    let (cols, rows) = crossterm::terminal::size().ok()?;
    Some(Winsize {
        ws_row: rows,
        ws_col: cols,
        ws_xpixel: 0,
        ws_ypixel: 0,
    })
}

/// Copies bytes until end of stream. `EIO` on a master whose slave has
/// been closed by every holder counts as end of stream.
fn pump(from: &mut impl Read, to: &mut impl Write) -> io::Result<u64> {
    let mut buf = [0_u8; 4096];
    let mut total = 0_u64;
    loop {
        let n = match from.read(&mut buf) {
            Ok(0) => return Ok(total),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.raw_os_error() == Some(libc::EIO) => return Ok(total),
            Err(e) => return Err(e),
        };
        to.write_all(&buf[..n])?;
        to.flush()?;
        total += n as u64;
    }
}

/// Copies master output until every slave holder hangs up or `stop` is
/// raised. After a stop only output that is already buffered is copied.
fn drain(from: &File, to: &mut impl Write, stop: &AtomicBool) -> io::Result<u64> {
    let mut buf = [0_u8; 4096];
    let mut total = 0_u64;
    let mut after_stop = 0_usize;
    loop {
        let stopping = stop.load(Ordering::Acquire);
        if stopping {
            if after_stop == DRAIN_READS {
                return Ok(total);
            }
            after_stop += 1;
        }
        let timeout = if stopping {
            PollTimeout::ZERO
        } else {
            PollTimeout::from(POLL_INTERVAL_MS)
        };
        let mut fds = [PollFd::new(from.as_fd(), PollFlags::POLLIN)];
        match poll(&mut fds, timeout) {
            Ok(0) if stopping => return Ok(total),
            Ok(0) | Err(Errno::EINTR) => continue,
            Ok(_) => {}
            Err(e) => return Err(e.into()),
        }
        let n = match (&*from).read(&mut buf) {
            Ok(0) => return Ok(total),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.raw_os_error() == Some(libc::EIO) => return Ok(total),
            Err(e) => return Err(e),
        };
        to.write_all(&buf[..n])?;
        to.flush()?;
        total += n as u64;
    }
}
