// SPDX-License-Identifier: MPL-2.0

//! The seam between the scheduler and the host real-time kernel.
//!
//! The scheduler does not create threads or keep time on its own. It relies
//! on a [`Kernel`]: a handful of primitives that any preemptive,
//! priority-scheduled RTOS provides. Firmware ports implement `Kernel` over
//! their kernel's native services. Hosted builds use
//! [`HostKernel`](crate::host::HostKernel).
//!
//! Priorities follow the convention of the target kernel family: a *higher*
//! number is *more* urgent. [`Priority`] checks its range on construction;
//! use [`make_priority`] when the value is a compile-time constant.

/// A thread priority level.
///
/// Wraps a `u8` where a higher value is more urgent. Zero is reserved for
/// the kernel's idle context and is never a valid thread priority.
///
/// Use [`new`](Self::new) for checked construction, or [`make_priority`]
/// when the priority is a constant (an invalid constant then fails the
/// build instead of panicking at runtime).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(transparent)]
pub struct Priority(u8);

impl Priority {
    /// Define a new priority.
    ///
    /// Returns `None` if the value isn't valid; see [`is_valid`](Self::is_valid).
    #[inline]
    pub const fn new(priority: u8) -> Option<Self> {
        if Self::is_valid(priority) {
            Some(Self(priority))
        } else {
            None
        }
    }

    /// Returns `true` if `priority` is a valid thread priority.
    #[inline]
    pub const fn is_valid(priority: u8) -> bool {
        priority > 0
    }

    /// The least-urgent valid priority.
    #[inline]
    pub const fn lowest() -> Self {
        Self(1)
    }

    /// The most-urgent valid priority.
    #[inline]
    pub const fn highest() -> Self {
        Self(u8::MAX)
    }

    /// Returns `true` if this priority preempts `other`.
    #[inline]
    pub const fn is_more_urgent_than(self, other: Self) -> bool {
        self.0 > other.0
    }

    /// Get the raw priority value.
    #[inline]
    pub const fn get(self) -> u8 {
        self.0
    }
}

/// Make a thread priority, panicking if the value is invalid.
///
/// Evaluate this in a constant context to turn the panic into a build
/// failure.
///
/// ```
/// use halsched::kernel::{make_priority, Priority};
///
/// const SENSOR: Priority = make_priority(178);
/// ```
///
/// ```compile_fail
/// # use halsched::kernel::{make_priority, Priority};
/// const INVALID: Priority = make_priority(0);
/// ```
#[inline]
pub const fn make_priority(priority: u8) -> Priority {
    match Priority::new(priority) {
        Some(priority) => priority,
        None => panic!("invalid thread priority"),
    }
}

/// Configuration for a kernel thread.
///
/// Everything here is fixed at creation time. The scheduler never negotiates
/// thread parameters at runtime; the one exception is the bounded priority
/// boost, which goes through [`Kernel::set_current_priority`].
#[derive(Debug, Clone, Copy)]
pub struct ThreadOptions<'a> {
    /// A name for the thread, used for diagnostics.
    pub name: &'a str,
    /// The thread's fixed priority.
    pub priority: Priority,
    /// The thread's stack allocation, in bytes.
    pub stack_size: usize,
}

/// The kernel refused to create a thread.
///
/// This is unrecoverable for the scheduler: the fixed thread set cannot be
/// partially constructed, so startup must abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SpawnError(pub(crate) ());

/// Primitives the scheduler needs from the host real-time kernel.
///
/// Implementations must be cheap to call from multiple threads; every worker
/// thread holds a shared reference to the kernel for the life of the
/// process.
///
/// # Contract
///
/// - [`now_us`](Self::now_us) is monotonic and shared by all threads.
/// - [`sleep_us`](Self::sleep_us) suspends the calling thread; it never
///   spin-waits at the scheduler's request.
/// - [`set_current_priority`](Self::set_current_priority) affects only the
///   calling thread and returns the priority it replaced.
pub trait Kernel: Sync + 'static {
    /// Identifies a thread, for [`thread_id`](Self::thread_id) comparisons.
    type ThreadId: Copy + PartialEq + Send + Sync + core::fmt::Debug;

    /// Create a thread that runs `entrypoint` at a fixed priority.
    ///
    /// The thread runs until the process ends; the scheduler never joins or
    /// destroys it, so no handle is returned.
    fn spawn<F>(&self, options: &ThreadOptions<'_>, entrypoint: F) -> Result<(), SpawnError>
    where
        F: FnOnce() + Send + 'static;

    /// The monotonic time, in microseconds.
    fn now_us(&self) -> u64;

    /// Block the calling thread for at least `us` microseconds.
    fn sleep_us(&self, us: u64);

    /// Relinquish the CPU to other ready threads.
    fn yield_now(&self);

    /// Identify the calling thread.
    fn thread_id(&self) -> Self::ThreadId;

    /// The calling thread's current priority.
    fn current_priority(&self) -> Priority;

    /// Change the calling thread's priority, returning the previous one.
    fn set_current_priority(&self, priority: Priority) -> Priority;

    /// Reset the platform. Does not return.
    ///
    /// `hold_in_bootloader` asks the platform to stay in its bootloader
    /// after the reset, for firmware upload.
    fn reset(&self, hold_in_bootloader: bool) -> !;
}
