//! Synchronization primitives over pthread and POSIX semaphores
//!
//! - `Locker<T>` - mutex owning its data, scoped release via `LockerGuard`
//! - `Sem` - counting semaphore, the pool's "work available" signal
//! - `Cond` - condition variable paired with a `Locker`
//!
//! Every constructor reports an OS initialization failure as
//! `HttpdError::SyncInit` instead of panicking. The OS objects are boxed
//! because pthread objects must not move once initialized.
//!
//! Wait/post/lock failures on an initialized object come back as
//! `HttpdError::Sync`. Callers treat those as logic errors.

use crate::error::{last_errno, HttpdError, Result};

use core::cell::UnsafeCell;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};

// ============================================================================
// Locker
// ============================================================================

/// A pthread mutex protecting a value of type T
///
/// # Example
///
/// ```ignore
/// let queue = Locker::new(VecDeque::new())?;
/// {
///     let mut q = queue.lock()?;
///     q.push_back(task);
/// } // unlocked here
/// ```
pub struct Locker<T> {
    mutex: Box<UnsafeCell<libc::pthread_mutex_t>>,
    data: UnsafeCell<T>,
}

// Safety: the mutex serializes all access to T
unsafe impl<T: Send> Send for Locker<T> {}
unsafe impl<T: Send> Sync for Locker<T> {}

impl<T> Locker<T> {
    pub fn new(value: T) -> Result<Self> {
        // Safety: an all-zero pthread_mutex_t is valid storage for init
        let mutex: Box<UnsafeCell<libc::pthread_mutex_t>> =
            Box::new(UnsafeCell::new(unsafe { std::mem::zeroed() }));
        let rc = unsafe { libc::pthread_mutex_init(mutex.get(), std::ptr::null()) };
        if rc != 0 {
            return Err(HttpdError::SyncInit { what: "locker", errno: rc });
        }
        Ok(Self {
            mutex,
            data: UnsafeCell::new(value),
        })
    }

    /// Block until the lock is held
    pub fn lock(&self) -> Result<LockerGuard<'_, T>> {
        let rc = unsafe { libc::pthread_mutex_lock(self.mutex.get()) };
        if rc != 0 {
            return Err(HttpdError::Sync(rc));
        }
        Ok(LockerGuard {
            locker: self,
            _not_send: PhantomData,
        })
    }

    /// Acquire without blocking; `None` if another thread holds it
    pub fn try_lock(&self) -> Option<LockerGuard<'_, T>> {
        let rc = unsafe { libc::pthread_mutex_trylock(self.mutex.get()) };
        if rc != 0 {
            return None;
        }
        Some(LockerGuard {
            locker: self,
            _not_send: PhantomData,
        })
    }

    fn raw(&self) -> *mut libc::pthread_mutex_t {
        self.mutex.get()
    }
}

impl<T> Drop for Locker<T> {
    fn drop(&mut self) {
        unsafe {
            libc::pthread_mutex_destroy(self.mutex.get());
        }
    }
}

/// Releases the `Locker` when dropped. Must stay on the locking thread.
pub struct LockerGuard<'a, T> {
    locker: &'a Locker<T>,
    _not_send: PhantomData<*const ()>,
}

impl<'a, T> Deref for LockerGuard<'a, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // Safety: we hold the lock
        unsafe { &*self.locker.data.get() }
    }
}

impl<'a, T> DerefMut for LockerGuard<'a, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        // Safety: we hold the lock
        unsafe { &mut *self.locker.data.get() }
    }
}

impl<'a, T> Drop for LockerGuard<'a, T> {
    fn drop(&mut self) {
        unsafe {
            libc::pthread_mutex_unlock(self.locker.raw());
        }
    }
}

// ============================================================================
// Sem
// ============================================================================

/// Process-private POSIX counting semaphore
pub struct Sem {
    sem: Box<UnsafeCell<libc::sem_t>>,
}

// Safety: sem_* calls are thread-safe by definition
unsafe impl Send for Sem {}
unsafe impl Sync for Sem {}

impl Sem {
    /// Create with an initial count
    pub fn new(initial: u32) -> Result<Self> {
        let sem: Box<UnsafeCell<libc::sem_t>> =
            Box::new(UnsafeCell::new(unsafe { std::mem::zeroed() }));
        let rc = unsafe { libc::sem_init(sem.get(), 0, initial as libc::c_uint) };
        if rc != 0 {
            return Err(HttpdError::SyncInit { what: "sem", errno: last_errno() });
        }
        Ok(Self { sem })
    }

    /// Block until the count is positive, then decrement it.
    ///
    /// Interrupted waits are restarted.
    pub fn wait(&self) -> Result<()> {
        loop {
            if unsafe { libc::sem_wait(self.sem.get()) } == 0 {
                return Ok(());
            }
            let errno = last_errno();
            if errno != libc::EINTR {
                return Err(HttpdError::Sync(errno));
            }
        }
    }

    /// Decrement if positive; `Ok(false)` when the count is zero
    pub fn try_wait(&self) -> Result<bool> {
        loop {
            if unsafe { libc::sem_trywait(self.sem.get()) } == 0 {
                return Ok(true);
            }
            match last_errno() {
                libc::EAGAIN => return Ok(false),
                libc::EINTR => continue,
                errno => return Err(HttpdError::Sync(errno)),
            }
        }
    }

    /// Increment the count, waking one waiter
    pub fn post(&self) -> Result<()> {
        if unsafe { libc::sem_post(self.sem.get()) } != 0 {
            return Err(HttpdError::Sync(last_errno()));
        }
        Ok(())
    }

    /// Current count (a snapshot)
    pub fn value(&self) -> Result<i32> {
        let mut v: libc::c_int = 0;
        if unsafe { libc::sem_getvalue(self.sem.get(), &mut v) } != 0 {
            return Err(HttpdError::Sync(last_errno()));
        }
        Ok(v)
    }
}

impl Drop for Sem {
    fn drop(&mut self) {
        unsafe {
            libc::sem_destroy(self.sem.get());
        }
    }
}

// ============================================================================
// Cond
// ============================================================================

/// pthread condition variable used together with a `Locker`
pub struct Cond {
    cond: Box<UnsafeCell<libc::pthread_cond_t>>,
}

unsafe impl Send for Cond {}
unsafe impl Sync for Cond {}

impl Cond {
    pub fn new() -> Result<Self> {
        let cond: Box<UnsafeCell<libc::pthread_cond_t>> =
            Box::new(UnsafeCell::new(unsafe { std::mem::zeroed() }));
        let rc = unsafe { libc::pthread_cond_init(cond.get(), std::ptr::null()) };
        if rc != 0 {
            return Err(HttpdError::SyncInit { what: "cond", errno: rc });
        }
        Ok(Self { cond })
    }

    /// Atomically release the guard's lock and sleep until signaled.
    ///
    /// The lock is held again on return. Spurious wakeups are possible;
    /// prefer `wait_while`.
    pub fn wait<T>(&self, guard: &mut LockerGuard<'_, T>) -> Result<()> {
        let rc = unsafe { libc::pthread_cond_wait(self.cond.get(), guard.locker.raw()) };
        if rc != 0 {
            return Err(HttpdError::Sync(rc));
        }
        Ok(())
    }

    /// Wait until `condition` returns false for the protected value
    pub fn wait_while<'a, T, F>(
        &self,
        mut guard: LockerGuard<'a, T>,
        mut condition: F,
    ) -> Result<LockerGuard<'a, T>>
    where
        F: FnMut(&mut T) -> bool,
    {
        while condition(&mut *guard) {
            self.wait(&mut guard)?;
        }
        Ok(guard)
    }

    /// Wake one waiter
    pub fn signal(&self) -> Result<()> {
        let rc = unsafe { libc::pthread_cond_signal(self.cond.get()) };
        if rc != 0 {
            return Err(HttpdError::Sync(rc));
        }
        Ok(())
    }
}

impl Drop for Cond {
    fn drop(&mut self) {
        unsafe {
            libc::pthread_cond_destroy(self.cond.get());
        }
    }
}
