//! Scoped stderr redirection around audio backend initialisation.
//!
//! ALSA and JACK print device-probing chatter straight to file descriptor 2
//! when cpal opens a device.  [`StderrSilencer`] points fd 2 at the null
//! device for as long as the guard lives and restores the original
//! descriptor on drop, including when device setup fails.
//!
//! Only the raw descriptor is redirected.  Errors returned by cpal still
//! propagate normally and our own `log` output goes wherever the host's
//! logger writes once the guard is gone.

/// RAII guard; stderr is restored when it is dropped.
pub struct StderrSilencer {
    #[cfg(unix)]
    saved: Option<std::os::fd::OwnedFd>,
}

impl StderrSilencer {
    /// Redirect stderr to the null device.
    ///
    /// Redirection is best effort: if the null device cannot be opened or
    /// the descriptor cannot be duplicated, stderr is left untouched.
    #[cfg(unix)]
    pub fn new() -> Self {
        use std::io::Write;
        use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

        let _ = std::io::stderr().flush();

        let devnull = match std::fs::OpenOptions::new().write(true).open("/dev/null") {
            Ok(f) => f,
            Err(e) => {
                log::debug!("stderr-silencer: cannot open /dev/null: {e}");
                return Self { saved: None };
            }
        };

        // SAFETY: dup/dup2 only operate on descriptors we own or on fd 2,
        // which stays open for the life of the process.
        let saved = unsafe {
            let fd = libc::dup(libc::STDERR_FILENO);
            if fd < 0 {
                return Self { saved: None };
            }
            let saved = OwnedFd::from_raw_fd(fd);
            if libc::dup2(devnull.as_raw_fd(), libc::STDERR_FILENO) < 0 {
                return Self { saved: None };
            }
            saved
        };

        Self { saved: Some(saved) }
    }

    #[cfg(not(unix))]
    pub fn new() -> Self {
        Self {}
    }

    /// Whether stderr is currently redirected by this guard.
    pub fn is_active(&self) -> bool {
        #[cfg(unix)]
        {
            self.saved.is_some()
        }
        #[cfg(not(unix))]
        {
            false
        }
    }
}

impl Default for StderrSilencer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for StderrSilencer {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Some(saved) = self.saved.take() {
            use std::os::fd::AsRawFd;
            // SAFETY: `saved` is a valid descriptor duplicated from fd 2.
            unsafe {
                libc::dup2(saved.as_raw_fd(), libc::STDERR_FILENO);
            }
        }
    }
}

/// Run `f` with stderr silenced when `enabled` is set.
pub fn with_silenced_stderr<T>(enabled: bool, f: impl FnOnce() -> T) -> T {
    let _guard = enabled.then(StderrSilencer::new);
    f()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // fd 2 is process-wide; overlapping guards would restore out of order.
    static FD2: Mutex<()> = Mutex::new(());

    #[test]
    fn closure_result_passes_through() {
        let _serial = FD2.lock().unwrap_or_else(|e| e.into_inner());
        let out = with_silenced_stderr(true, || 41 + 1);
        assert_eq!(out, 42);
    }

    #[test]
    fn errors_are_not_swallowed() {
        let _serial = FD2.lock().unwrap_or_else(|e| e.into_inner());
        let out: Result<(), String> = with_silenced_stderr(true, || Err("device busy".into()));
        assert_eq!(out.unwrap_err(), "device busy");
    }

    #[cfg(unix)]
    #[test]
    fn stderr_descriptor_is_restored() {
        use std::os::fd::AsRawFd;

        fn fd2_identity() -> (u64, u64) {
            let mut st: libc::stat = unsafe { std::mem::zeroed() };
            let rc = unsafe { libc::fstat(libc::STDERR_FILENO, &mut st) };
            assert_eq!(rc, 0);
            (st.st_dev as u64, st.st_ino as u64)
        }

        let _serial = FD2.lock().unwrap_or_else(|e| e.into_inner());
        let before = fd2_identity();
        {
            let guard = StderrSilencer::new();
            if guard.is_active() {
                let null = std::fs::File::open("/dev/null").unwrap();
                let mut st: libc::stat = unsafe { std::mem::zeroed() };
                unsafe { libc::fstat(null.as_raw_fd(), &mut st) };
                assert_eq!(fd2_identity(), (st.st_dev as u64, st.st_ino as u64));
            }
        }
        assert_eq!(fd2_identity(), before);
    }
}
