// src/exec/process_group.rs

//! OS process group of a spawned child.
//!
//! The child is made the leader of a fresh group at spawn time, so every
//! descendant it starts is in the same group and a single signal to the group
//! reaches the whole subtree.

use std::io;

use tokio::process::{Child, Command};

/// Put the command's process in its own group once spawned.
pub fn isolate(cmd: &mut Command) {
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.as_std_mut().process_group(0);
    }
    #[cfg(windows)]
    {
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
        cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
    }
}

/// Handle to the group led by a spawned child.
#[derive(Debug, Clone, Copy)]
pub struct ProcessGroup {
    leader: Option<u32>,
}

impl ProcessGroup {
    pub fn of(child: &Child) -> Self {
        Self { leader: child.id() }
    }

    pub fn leader(&self) -> Option<u32> {
        self.leader
    }

    /// Ask every process in the group to stop (SIGINT).
    pub fn interrupt(&self) -> io::Result<()> {
        #[cfg(unix)]
        {
            self.signal(libc::SIGINT)
        }
        #[cfg(not(unix))]
        {
            // No console-control equivalent without a console attached;
            // callers escalate to `terminate` instead.
            Ok(())
        }
    }

    /// Forcibly kill every process in the group.
    pub fn terminate(&self, child: &mut Child) -> io::Result<()> {
        #[cfg(unix)]
        {
            match self.signal(libc::SIGKILL) {
                Ok(()) => Ok(()),
                Err(_) => child.start_kill(),
            }
        }
        #[cfg(not(unix))]
        {
            child.start_kill()
        }
    }

    #[cfg(unix)]
    fn signal(&self, signal: libc::c_int) -> io::Result<()> {
        let Some(pgid) = self.leader else {
            return Ok(());
        };
        // SAFETY: killpg has no memory-safety preconditions.
        let rc = unsafe { libc::killpg(pgid as libc::pid_t, signal) };
        if rc == -1 {
            let err = io::Error::last_os_error();
            // ESRCH: the group is already gone.
            if err.raw_os_error() == Some(libc::ESRCH) {
                return Ok(());
            }
            return Err(err);
        }
        Ok(())
    }
}
