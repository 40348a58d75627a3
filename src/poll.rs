//! Readiness multiplexing over a registered set of file descriptors.
//!
//! A thin wrapper around `poll(2)` via nix. The tap interface registers its
//! capture descriptor here, and the forwarder adds the client socket so one
//! blocking wait covers both directions.

use std::os::fd::{BorrowedFd, RawFd};

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

/// Readiness reported for one registered descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub fd: RawFd,
    pub readable: bool,
    pub hangup: bool,
}

/// A registration set polled level-triggered for readable readiness.
///
/// Registered descriptors must remain open until unregistered; the set holds
/// raw descriptors, not owners.
#[derive(Debug, Default)]
pub struct Poll {
    fds: Vec<RawFd>,
}

impl Poll {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, fd: RawFd) {
        if !self.fds.contains(&fd) {
            self.fds.push(fd);
        }
    }

    pub fn unregister(&mut self, fd: RawFd) {
        self.fds.retain(|&registered| registered != fd);
    }

    /// Wait up to `timeout_ms` (`None` blocks indefinitely) and report every
    /// descriptor with pending readability or hang-up. An empty result means
    /// the timeout elapsed. `EINTR` is surfaced to the caller, which treats
    /// it as a zero-event wakeup so a pending shutdown flag gets observed.
    pub fn wait(&self, timeout_ms: Option<u16>) -> Result<Vec<Event>, Errno> {
        let mut poll_fds: Vec<PollFd> = self
            .fds
            .iter()
            // Registered fds are open by the contract above.
            .map(|&fd| PollFd::new(unsafe { BorrowedFd::borrow_raw(fd) }, PollFlags::POLLIN))
            .collect();

        let timeout = match timeout_ms {
            Some(ms) => PollTimeout::from(ms),
            None => PollTimeout::NONE,
        };
        poll(&mut poll_fds, timeout)?;

        let mut events = Vec::new();
        for (index, poll_fd) in poll_fds.iter().enumerate() {
            let revents = poll_fd.revents().unwrap_or(PollFlags::empty());
            let readable = revents.contains(PollFlags::POLLIN);
            let hangup = revents.contains(PollFlags::POLLHUP);
            if readable || hangup {
                events.push(Event {
                    fd: self.fds[index],
                    readable,
                    hangup,
                });
            }
        }
        Ok(events)
    }
}
