//! Counting wake-token primitive backing the dispatcher.
//!
//! Semantics are those of a semaphore carried on a file descriptor: `post`
//! adds tokens, `wait` blocks until at least one token is available and
//! consumes exactly one. On Linux this is `eventfd(2)` in `EFD_SEMAPHORE`
//! mode, which lets many producers wake one blocked consumer without a
//! per-item condition variable. Elsewhere the same contract is kept with a
//! mutex-guarded counter and a condvar.

use std::io;

#[cfg(target_os = "linux")]
mod imp {
    use super::io;
    use nix::sys::eventfd::{EfdFlags, EventFd};
    use std::os::fd::{AsFd, AsRawFd};

    pub struct Semaphore {
        fd: EventFd,
    }

    impl Semaphore {
        pub fn new() -> io::Result<Self> {
            let fd = EventFd::from_value_and_flags(0, EfdFlags::EFD_SEMAPHORE)
                .map_err(|e| io::Error::from_raw_os_error(e as i32))?;
            Ok(Self { fd })
        }

        pub fn post(&self, tokens: u64) -> io::Result<()> {
            self.fd
                .write(tokens)
                .map_err(|e| io::Error::from_raw_os_error(e as i32))?;
            Ok(())
        }

        /// Blocks until a token is available and consumes one.
        ///
        /// Returns `false` for an interrupted wait (the caller treats it as a
        /// spurious wake and re-checks its own state).
        pub fn wait(&self) -> io::Result<bool> {
            let mut buf = [0u8; 8];
            match nix::unistd::read(self.fd.as_fd().as_raw_fd(), &mut buf) {
                Ok(_) => Ok(true),
                Err(nix::errno::Errno::EINTR) => Ok(false),
                Err(e) => Err(io::Error::from_raw_os_error(e as i32)),
            }
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod imp {
    use super::io;
    use parking_lot::{Condvar, Mutex};

    pub struct Semaphore {
        tokens: Mutex<u64>,
        available: Condvar,
    }

    impl Semaphore {
        pub fn new() -> io::Result<Self> {
            Ok(Self {
                tokens: Mutex::new(0),
                available: Condvar::new(),
            })
        }

        pub fn post(&self, tokens: u64) -> io::Result<()> {
            let mut count = self.tokens.lock();
            *count += tokens;
            drop(count);
            self.available.notify_one();
            Ok(())
        }

        pub fn wait(&self) -> io::Result<bool> {
            let mut count = self.tokens.lock();
            while *count == 0 {
                self.available.wait(&mut count);
            }
            *count -= 1;
            Ok(true)
        }
    }
}

pub(crate) use imp::Semaphore;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_post_then_wait() {
        let sem = Semaphore::new().unwrap();
        sem.post(1).unwrap();
        assert!(sem.wait().unwrap());
    }

    #[test]
    fn test_one_token_per_post() {
        let sem = Arc::new(Semaphore::new().unwrap());
        sem.post(3).unwrap();
        assert!(sem.wait().unwrap());
        assert!(sem.wait().unwrap());
        assert!(sem.wait().unwrap());
    }

    #[test]
    fn test_wait_blocks_until_posted() {
        let sem = Arc::new(Semaphore::new().unwrap());
        let waiter = Arc::clone(&sem);

        let handle = thread::spawn(move || waiter.wait().unwrap());

        thread::sleep(std::time::Duration::from_millis(20));
        sem.post(1).unwrap();
        assert!(handle.join().unwrap());
    }
}
