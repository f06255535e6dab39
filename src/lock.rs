//! Single-daemon guard for the base directory.
//!
//! The daemon takes an exclusive flock() on `linkdrop.lock` at startup and
//! holds it for its lifetime. The holder's pid is written into the file so a
//! second daemon can say who is in the way.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, Write};
use std::path::Path;

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

const LOCK_FILE_NAME: &str = "linkdrop.lock";

/// Held for as long as the daemon runs; released on drop.
pub struct DaemonLock {
    file: File,
}

impl DaemonLock {
    /// Fails with `WouldBlock` when another daemon already owns `base_path`.
    pub fn acquire(base_path: &Path) -> io::Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(base_path.join(LOCK_FILE_NAME))?;

        if let Err(err) = try_flock(&file) {
            if err.kind() != io::ErrorKind::WouldBlock {
                return Err(err);
            }

            let mut holder = String::new();
            file.read_to_string(&mut holder)?;
            let holder = match holder.trim() {
                "" => "another process".to_string(),
                pid => format!("pid {pid}"),
            };
            return Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                format!("{} is locked by a running linkdrop daemon ({holder})", base_path.display()),
            ));
        }

        file.set_len(0)?;
        file.rewind()?;
        write!(file, "{}", std::process::id())?;
        file.flush()?;

        Ok(DaemonLock { file })
    }
}

#[cfg(unix)]
fn try_flock(file: &File) -> io::Result<()> {
    let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if result == 0 {
        return Ok(());
    }

    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        Some(code) if code == libc::EWOULDBLOCK || code == libc::EAGAIN => {
            Err(io::ErrorKind::WouldBlock.into())
        }
        _ => Err(err),
    }
}

#[cfg(not(unix))]
fn try_flock(_file: &File) -> io::Result<()> {
    Ok(())
}

impl Drop for DaemonLock {
    fn drop(&mut self) {
        // a stale pid must not outlive the lock
        let _ = self.file.set_len(0);

        #[cfg(unix)]
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
    }
}
