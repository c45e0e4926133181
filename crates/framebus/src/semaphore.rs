use nix::errno::Errno;
use nix::sys::time::TimeSpec;
use nix::time::{ClockId, clock_gettime};
use std::ffi::CString;
use std::os::raw::c_int;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SemaphoreError {
    #[error("{op} failed on semaphore {name}: {errno}")]
    Failed {
        op: &'static str,
        name: String,
        errno: Errno,
    },
    #[error("Invalid semaphore name: {0:?}")]
    InvalidName(String),
}

/// POSIX named semaphore shared between processes.
///
/// Used both as a binary cross-process lock (initial value 1) and as the
/// "data ready" doorbell readers block on.
pub struct Semaphore {
    sem: *mut libc::sem_t,
    name: String,
}

impl Semaphore {
    /// Open the semaphore, creating it with `initial_value` if it does not exist.
    /// The value of an existing semaphore is left untouched.
    pub fn create(name: &str, initial_value: u32) -> Result<Self, SemaphoreError> {
        let c_name = c_name(name)?;

        let sem = unsafe {
            libc::sem_open(
                c_name.as_ptr(),
                libc::O_CREAT,
                0o600 as libc::c_uint,
                initial_value as libc::c_uint,
            )
        };

        if sem == libc::SEM_FAILED {
            return Err(failed("sem_open", name));
        }

        Ok(Self {
            sem,
            name: name.to_string(),
        })
    }

    pub fn open(name: &str) -> Result<Self, SemaphoreError> {
        let c_name = c_name(name)?;

        let sem = unsafe { libc::sem_open(c_name.as_ptr(), 0) };

        if sem == libc::SEM_FAILED {
            return Err(failed("sem_open", name));
        }

        Ok(Self {
            sem,
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Decrement without blocking. Returns `false` if the value was 0.
    pub fn try_wait(&self) -> Result<bool, SemaphoreError> {
        loop {
            let ret = unsafe { libc::sem_trywait(self.sem) };
            if ret == 0 {
                return Ok(true);
            }
            match Errno::last() {
                Errno::EAGAIN => return Ok(false),
                Errno::EINTR => continue,
                errno => return Err(self.error("sem_trywait", errno)),
            }
        }
    }

    /// Decrement, blocking up to `timeout`. Returns `false` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<bool, SemaphoreError> {
        if timeout.is_zero() {
            return self.try_wait();
        }

        let now = clock_gettime(ClockId::CLOCK_REALTIME)
            .map_err(|errno| self.error("clock_gettime", errno))?;
        let deadline = deadline_after(now, timeout);

        loop {
            let ret = unsafe { libc::sem_timedwait(self.sem, deadline.as_ref()) };
            if ret == 0 {
                return Ok(true);
            }
            match Errno::last() {
                Errno::ETIMEDOUT => return Ok(false),
                Errno::EINTR => continue,
                errno => return Err(self.error("sem_timedwait", errno)),
            }
        }
    }

    pub fn post(&self) -> Result<(), SemaphoreError> {
        let ret = unsafe { libc::sem_post(self.sem) };
        if ret != 0 {
            return Err(self.error("sem_post", Errno::last()));
        }
        Ok(())
    }

    pub fn value(&self) -> Result<i32, SemaphoreError> {
        let mut val: c_int = 0;
        let ret = unsafe { libc::sem_getvalue(self.sem, &mut val) };
        if ret != 0 {
            return Err(self.error("sem_getvalue", Errno::last()));
        }
        Ok(val)
    }

    /// Consume every pending post. Returns how many were drained.
    pub fn drain(&self) -> Result<usize, SemaphoreError> {
        let mut drained = 0;
        while self.try_wait()? {
            drained += 1;
        }
        Ok(drained)
    }

    /// Acquire the semaphore as a lock, giving up after `timeout`.
    pub fn lock(&self, timeout: Duration) -> Result<Option<SemaphoreGuard<'_>>, SemaphoreError> {
        if self.wait_timeout(timeout)? {
            Ok(Some(SemaphoreGuard { sem: self }))
        } else {
            Ok(None)
        }
    }

    /// Remove the name from the system. Returns `false` if it was already gone.
    pub fn unlink(name: &str) -> Result<bool, SemaphoreError> {
        let c_name = c_name(name)?;
        let ret = unsafe { libc::sem_unlink(c_name.as_ptr()) };
        if ret != 0 {
            return match Errno::last() {
                Errno::ENOENT => Ok(false),
                errno => Err(SemaphoreError::Failed {
                    op: "sem_unlink",
                    name: name.to_string(),
                    errno,
                }),
            };
        }
        Ok(true)
    }

    fn error(&self, op: &'static str, errno: Errno) -> SemaphoreError {
        SemaphoreError::Failed {
            op,
            name: self.name.clone(),
            errno,
        }
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            libc::sem_close(self.sem);
        }
    }
}

unsafe impl Send for Semaphore {}
unsafe impl Sync for Semaphore {}

/// Releases the lock when dropped.
pub struct SemaphoreGuard<'a> {
    sem: &'a Semaphore,
}

impl Drop for SemaphoreGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.sem.post() {
            tracing::error!(error = %e, "Failed to release semaphore lock");
        }
    }
}

fn c_name(name: &str) -> Result<CString, SemaphoreError> {
    if !name.starts_with('/') || name[1..].contains('/') {
        return Err(SemaphoreError::InvalidName(name.to_string()));
    }
    CString::new(name).map_err(|_| SemaphoreError::InvalidName(name.to_string()))
}

/// Absolute `CLOCK_REALTIME` deadline `timeout` after `now`, saturating
/// instead of overflowing for very long timeouts.
fn deadline_after(now: TimeSpec, timeout: Duration) -> TimeSpec {
    const NANOS_PER_SEC: i64 = 1_000_000_000;

    let mut sec = i64::from(now.tv_sec())
        .saturating_add(i64::try_from(timeout.as_secs()).unwrap_or(i64::MAX));
    let mut nsec = i64::from(now.tv_nsec()) + i64::from(timeout.subsec_nanos());
    if nsec >= NANOS_PER_SEC {
        sec = sec.saturating_add(1);
        nsec -= NANOS_PER_SEC;
    }

    let sec = libc::time_t::try_from(sec).unwrap_or(libc::time_t::MAX);
    TimeSpec::new(sec, nsec as _)
}

fn failed(op: &'static str, name: &str) -> SemaphoreError {
    SemaphoreError::Failed {
        op,
        name: name.to_string(),
        errno: Errno::last(),
    }
}
