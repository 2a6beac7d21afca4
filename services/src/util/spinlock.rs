use core::sync::atomic::{AtomicBool, Ordering};
use crossbeam_utils::Backoff;
use lock_api::{GuardSend, Mutex, MutexGuard, RawMutex};

pub struct RawSpinlock {
    locked: AtomicBool,
}
impl RawSpinlock {
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }
}

unsafe impl RawMutex for RawSpinlock {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: RawSpinlock = RawSpinlock::new();

    type GuardMarker = GuardSend;

    fn lock(&self) {
        let backoff = Backoff::new();
        while !self.try_lock() {
            backoff.snooze();
        }
    }

    fn try_lock(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    unsafe fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }
}

pub type SpinlockGuard<'a, T> = MutexGuard<'a, RawSpinlock, T>;

/// Spinning mutex usable from any core, including ones that never entered the host
/// environment's event services.
pub struct Spinlock<T> {
    mutex: Mutex<RawSpinlock, T>,
}

impl<T> Spinlock<T> {
    pub const fn new(data: T) -> Self {
        Self {
            mutex: Mutex::new(data),
        }
    }

    pub fn lock(&self) -> SpinlockGuard<'_, T> {
        self.mutex.lock()
    }

    pub fn try_lock(&self) -> Option<SpinlockGuard<'_, T>> {
        self.mutex.try_lock()
    }

    pub fn is_locked(&self) -> bool {
        self.mutex.is_locked()
    }
}

impl<T: Default> Default for Spinlock<T> {
    fn default() -> Self {
        Self {
            mutex: Mutex::new(T::default()),
        }
    }
}

impl<T: core::fmt::Debug> core::fmt::Debug for Spinlock<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Spinlock").field("mutex", &self.mutex).finish()
    }
}
