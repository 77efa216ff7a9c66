// SPDX-License-Identifier: MPL-2.0

//! The scheduler: worker threads, delays, the boost window, and lifecycle.
//!
//! A [`Scheduler`] owns the fixed worker-thread set:
//!
//! - the **timer** worker, highest priority, dispatches the timer registry
//!   every [`timer_period_us`](SchedulerOptions::timer_period_us) and
//!   evaluates the failsafe deadline;
//! - the **io** worker dispatches the io registry at a coarser period;
//! - the **storage** and **uart** workers each run one fixed collaborator
//!   body at the lowest priorities.
//!
//! Threads are created once by [`init`](Scheduler::init) and run for the
//! life of the process. Priorities and stack sizes are build-time constants
//! ([`TIMER_PRIORITY`] and friends); the only runtime priority change is the
//! bounded boost inside
//! [`delay_microseconds_boost`](Scheduler::delay_microseconds_boost).
//!
//! # Suspending timer dispatch
//!
//! [`suspend_timer_procs`](Scheduler::suspend_timer_procs) gates the timer
//! registry for timing-sensitive critical sections elsewhere in the system
//! (in-place flash writes, for example). The gate nests: each suspend must
//! be matched by a resume, and dispatch resumes only when the last suspender
//! releases. While suspended, the timer worker keeps its tick cadence and
//! keeps consuming failsafe deadlines, so no backlog accumulates; each
//! skipped pass latches the [`timer_event_missed`](Scheduler::timer_event_missed)
//! diagnostic.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use spin::Mutex as SpinMutex;

use crate::{
    failsafe::Failsafe,
    kernel::{make_priority, Kernel, Priority, SpawnError, ThreadOptions},
    registry::{DispatchOutcome, PeriodicProc, ProcRegistry, RegistryFull},
    Proc,
};

/// Priority of the application's main thread.
pub const MAIN_PRIORITY: Priority = make_priority(180);

/// Priority the calling thread holds inside a boosted delay.
///
/// Strictly more urgent than [`TIMER_PRIORITY`] and [`IO_PRIORITY`], so a
/// boosted thread cannot be preempted by either dispatch worker.
pub const BOOST_PRIORITY: Priority = make_priority(182);

/// Priority of the timer dispatch worker.
pub const TIMER_PRIORITY: Priority = make_priority(178);

/// Priority of the uart service worker.
pub const UART_PRIORITY: Priority = make_priority(60);

/// Priority of the storage service worker.
pub const STORAGE_PRIORITY: Priority = make_priority(59);

/// Priority of the io dispatch worker.
pub const IO_PRIORITY: Priority = make_priority(58);

/// How long a boosted delay stays boosted, in microseconds.
///
/// The boost exists to let the main loop finish a priority-sensitive
/// handoff — starting the attitude-estimator update — without jitter from
/// the dispatch workers. It needs to cover that handoff and nothing more;
/// a longer window would just starve the timer worker.
pub const BOOST_WINDOW_US: u16 = 150;

/// Suggested stack allocation for the application's main thread, in bytes.
pub const MAIN_THREAD_STACK_SIZE: usize = 8192;

const TIMER_THREAD_STACK_SIZE: usize = 2048;
const IO_THREAD_STACK_SIZE: usize = 2048;
const STORAGE_THREAD_STACK_SIZE: usize = 2048;
const UART_THREAD_STACK_SIZE: usize = 2048;

/// Configuration for a [`Scheduler`].
///
/// Cadences are per-worker tick periods in microseconds. The storage and
/// uart workers run fixed, non-registrable bodies supplied here; leave a
/// body `None` and its thread is simply not created.
///
/// ```
/// use halsched::scheduler::SchedulerOptions;
///
/// let mut opts = SchedulerOptions::default();
/// assert_eq!(opts.timer_period_us, 1_000);
/// assert_eq!(opts.io_period_us, 20_000);
/// opts.io_period_us = 50_000;
/// ```
#[derive(Clone, Copy)]
#[non_exhaustive]
pub struct SchedulerOptions {
    /// Tick period of the timer dispatch worker. Default: 1 ms.
    pub timer_period_us: u32,
    /// Tick period of the io dispatch worker. Default: 20 ms.
    pub io_period_us: u32,
    /// Tick period of the storage worker. Default: 10 ms.
    pub storage_period_us: u32,
    /// Tick period of the uart worker. Default: 1 ms.
    pub uart_period_us: u32,
    /// The storage worker's body (a storage flush hook). Default: `None`.
    pub storage_proc: Option<&'static dyn PeriodicProc>,
    /// The uart worker's body (a UART service hook). Default: `None`.
    pub uart_proc: Option<&'static dyn PeriodicProc>,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            timer_period_us: 1_000,
            io_period_us: 20_000,
            storage_period_us: 10_000,
            uart_period_us: 1_000,
            storage_proc: None,
            uart_proc: None,
        }
    }
}

/// An error from [`Scheduler::init`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InitError {
    /// `init` was already called; the worker set is running.
    AlreadyRunning,
    /// The kernel refused a worker thread.
    ///
    /// The fixed thread set cannot be partially constructed. Treat this as
    /// fatal and abort startup.
    Spawn(SpawnError),
}

impl From<SpawnError> for InitError {
    fn from(err: SpawnError) -> Self {
        Self::Spawn(err)
    }
}

#[derive(Clone, Copy)]
struct DelayCallback {
    proc: Proc,
    min_time_ms: u16,
}

/// Restores the calling thread's priority when dropped.
///
/// The restore rides on `Drop` so it holds on every exit path out of the
/// boosted region, early returns included.
struct BoostGuard<'k, K: Kernel> {
    kernel: &'k K,
    previous: Priority,
}

impl<'k, K: Kernel> BoostGuard<'k, K> {
    fn raise(kernel: &'k K) -> Self {
        let previous = kernel.set_current_priority(BOOST_PRIORITY);
        Self { kernel, previous }
    }
}

impl<K: Kernel> Drop for BoostGuard<'_, K> {
    fn drop(&mut self) {
        self.kernel.set_current_priority(self.previous);
    }
}

/// The HAL scheduler.
///
/// See the [module documentation](crate::scheduler) for the worker model and
/// the [crate documentation](crate) for a usage example. Construct one per
/// process, give it a stable address for the life of the process, and call
/// [`init`](Scheduler::init) once during bring-up.
pub struct Scheduler<K: Kernel> {
    kernel: K,
    options: SchedulerOptions,
    /// Identity of the thread that constructed the scheduler.
    main_thread: K::ThreadId,

    timer_procs: ProcRegistry,
    io_procs: ProcRegistry,
    delay_callback: SpinMutex<Option<DelayCallback>>,
    failsafe: SpinMutex<Failsafe>,

    suspend_depth: AtomicU32,
    timer_event_missed: AtomicBool,
    initialized: AtomicBool,
    hal_initialized: AtomicBool,
    running: AtomicBool,
}

impl<K: Kernel> Scheduler<K> {
    /// Allocate a scheduler with default options.
    ///
    /// The calling thread is captured as the main thread; see
    /// [`in_main_thread`](Self::in_main_thread).
    pub fn new(kernel: K) -> Self {
        Self::with_options(kernel, SchedulerOptions::default())
    }

    /// Allocate a scheduler with the given options.
    pub fn with_options(kernel: K, options: SchedulerOptions) -> Self {
        let main_thread = kernel.thread_id();
        Self {
            kernel,
            options,
            main_thread,
            timer_procs: ProcRegistry::new("timer"),
            io_procs: ProcRegistry::new("io"),
            delay_callback: SpinMutex::new(None),
            failsafe: SpinMutex::new(Failsafe::new()),
            suspend_depth: AtomicU32::new(0),
            timer_event_missed: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
            hal_initialized: AtomicBool::new(false),
            running: AtomicBool::new(false),
        }
    }

    /// Access the host kernel.
    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    /// Create the worker threads and start dispatching.
    ///
    /// Workers are created in descending priority order — timer, io,
    /// storage, uart — so the urgent ones are servicing their registries
    /// while the rest come up. The order is for reproducibility, not
    /// correctness; the workers are independent.
    ///
    /// Callable once. A second call returns [`InitError::AlreadyRunning`]
    /// and changes nothing.
    pub fn init(&'static self) -> Result<(), InitError> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(InitError::AlreadyRunning);
        }

        self.kernel.spawn(
            &ThreadOptions {
                name: "sched_timer",
                priority: TIMER_PRIORITY,
                stack_size: TIMER_THREAD_STACK_SIZE,
            },
            move || self.timer_thread(),
        )?;
        self.kernel.spawn(
            &ThreadOptions {
                name: "sched_io",
                priority: IO_PRIORITY,
                stack_size: IO_THREAD_STACK_SIZE,
            },
            move || self.io_thread(),
        )?;
        if let Some(proc) = self.options.storage_proc {
            let period = self.options.storage_period_us;
            self.kernel.spawn(
                &ThreadOptions {
                    name: "sched_storage",
                    priority: STORAGE_PRIORITY,
                    stack_size: STORAGE_THREAD_STACK_SIZE,
                },
                move || self.service_thread(proc, period),
            )?;
        }
        if let Some(proc) = self.options.uart_proc {
            let period = self.options.uart_period_us;
            self.kernel.spawn(
                &ThreadOptions {
                    name: "sched_uart",
                    priority: UART_PRIORITY,
                    stack_size: UART_THREAD_STACK_SIZE,
                },
                move || self.service_thread(proc, period),
            )?;
        }

        log::debug!("scheduler workers running");
        Ok(())
    }

    //
    // Registration surface, called by drivers and subsystems during startup.
    //

    /// Append a callback to the timer registry.
    ///
    /// Timer callbacks run on the highest-priority worker at the timer
    /// cadence. Reserve this registry for deadline-sensitive work such as
    /// sensor sampling; everything else belongs in the io registry.
    pub fn register_timer_process(
        &self,
        proc: &'static dyn PeriodicProc,
    ) -> Result<(), RegistryFull> {
        self.timer_procs.register(proc)
    }

    /// Append a callback to the io registry.
    pub fn register_io_process(
        &self,
        proc: &'static dyn PeriodicProc,
    ) -> Result<(), RegistryFull> {
        self.io_procs.register(proc)
    }

    /// Bind the delay callback, replacing any previous binding.
    ///
    /// [`delay`](Self::delay) invokes `proc` once, before the wait, whenever
    /// the requested delay is at least `min_time_ms`. This lets low-priority
    /// background work — watchdog servicing, typically — piggyback on the
    /// main loop's long waits.
    pub fn register_delay_callback(&self, proc: Proc, min_time_ms: u16) {
        *self.delay_callback.lock() = Some(DelayCallback { proc, min_time_ms });
    }

    /// Arm the failsafe watchdog, resetting its deadline.
    ///
    /// While armed, the timer worker invokes `proc` whenever `period_us`
    /// elapses without the deadline being serviced — at most once per
    /// elapsed period, repeating for as long as the stall persists. Firing
    /// never disarms. Re-arming with a zero period disarms; that is the only
    /// disarm path.
    pub fn register_timer_failsafe(&self, proc: Proc, period_us: u32) {
        let now = self.kernel.now_us();
        let mut failsafe = self.failsafe.lock();
        failsafe.arm(proc, period_us, now);
        if failsafe.is_armed() {
            log::debug!("failsafe armed, period {period_us} us");
        } else {
            log::debug!("failsafe disarmed");
        }
    }

    //
    // Timer suspend gate.
    //

    /// Suspend timer-registry dispatch.
    ///
    /// The gate nests: dispatch stays suspended until every suspend has been
    /// matched by a [`resume_timer_procs`](Self::resume_timer_procs). The
    /// timer worker keeps ticking and keeps evaluating the failsafe while
    /// suspended; only the registry entries are skipped.
    pub fn suspend_timer_procs(&self) {
        self.suspend_depth.fetch_add(1, Ordering::AcqRel);
    }

    /// Release one level of the timer suspend gate.
    ///
    /// An unmatched resume is a caller bug; it is logged and otherwise
    /// ignored.
    pub fn resume_timer_procs(&self) {
        let unbalanced = self
            .suspend_depth
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |depth| {
                depth.checked_sub(1)
            })
            .is_err();
        if unbalanced {
            log::warn!("resume_timer_procs without a matching suspend");
        }
    }

    /// `true` while at least one suspend is outstanding.
    pub fn timer_procs_suspended(&self) -> bool {
        self.suspend_depth.load(Ordering::Acquire) > 0
    }

    /// `true` if a timer tick ever went unserviced.
    ///
    /// Latched by the timer worker when a tick's dispatch was skipped —
    /// suspended gate or a still-busy previous pass. Sticky, diagnostic
    /// only.
    pub fn timer_event_missed(&self) -> bool {
        self.timer_event_missed.load(Ordering::Acquire)
    }

    //
    // Delay primitives, called from the invoking thread.
    //

    /// Block the calling thread for at least `ms` milliseconds.
    ///
    /// If a delay callback is bound and `ms` meets its minimum interval, the
    /// callback runs once before the wait begins.
    pub fn delay(&self, ms: u16) {
        let callback = *self.delay_callback.lock();
        if let Some(callback) = callback {
            if ms >= callback.min_time_ms {
                (callback.proc)();
            }
        }
        self.kernel.sleep_us(u64::from(ms) * 1_000);
    }

    /// Block the calling thread for at least `us` microseconds.
    ///
    /// Never invokes the delay callback; that's reserved for [`delay`](Self::delay).
    pub fn delay_microseconds(&self, us: u16) {
        self.kernel.sleep_us(u64::from(us));
    }

    /// [`delay_microseconds`](Self::delay_microseconds), boosted.
    ///
    /// For up to the first [`BOOST_WINDOW_US`] of the wait, the calling
    /// thread runs at [`BOOST_PRIORITY`] — above both dispatch workers — so
    /// the main loop can complete a timing-critical handoff without being
    /// preempted. Any remainder of the wait runs at the caller's original
    /// priority. This is a deliberate, bounded priority inversion.
    ///
    /// The original priority is restored on every exit path before this
    /// returns.
    pub fn delay_microseconds_boost(&self, us: u16) {
        let boosted = us.min(BOOST_WINDOW_US);
        {
            let _boost = BoostGuard::raise(&self.kernel);
            self.kernel.sleep_us(u64::from(boosted));
        }
        let remainder = us - boosted;
        if remainder > 0 {
            self.kernel.sleep_us(u64::from(remainder));
        }
    }

    //
    // Lifecycle signals and queries.
    //

    /// Record that the main control loop completed its first full pass.
    ///
    /// Called once by the application. Components poll
    /// [`is_system_initialized`](Self::is_system_initialized) to gate
    /// behavior that must wait for a complete first cycle, such as enabling
    /// the failsafe.
    pub fn system_initialized(&self) {
        self.initialized.store(true, Ordering::Release);
        log::info!("system initialized");
    }

    /// `true` once [`system_initialized`](Self::system_initialized) was called.
    pub fn is_system_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Record that the hardware abstraction layer is ready.
    ///
    /// Independent of application-level readiness.
    pub fn hal_initialized(&self) {
        self.hal_initialized.store(true, Ordering::Release);
    }

    /// `true` once [`hal_initialized`](Self::hal_initialized) was called.
    pub fn is_hal_initialized(&self) -> bool {
        self.hal_initialized.load(Ordering::Acquire)
    }

    /// `true` if called from the thread that constructed the scheduler.
    ///
    /// Subsystems use this to assert correct-thread invariants.
    pub fn in_main_thread(&self) -> bool {
        self.kernel.thread_id() == self.main_thread
    }

    /// Reset the platform. Does not return.
    pub fn reboot(&self, hold_in_bootloader: bool) -> ! {
        log::info!("rebooting, hold_in_bootloader={hold_in_bootloader}");
        self.kernel.reset(hold_in_bootloader)
    }

    //
    // Diagnostics.
    //

    /// The timer registry, for diagnostics and test introspection.
    pub fn timer_procs(&self) -> &ProcRegistry {
        &self.timer_procs
    }

    /// The io registry, for diagnostics and test introspection.
    pub fn io_procs(&self) -> &ProcRegistry {
        &self.io_procs
    }

    //
    // Worker bodies.
    //

    fn timer_thread(&'static self) {
        log::debug!("timer worker up");
        let period = u64::from(self.options.timer_period_us);
        let mut next = self.kernel.now_us() + period;
        loop {
            if self.suspend_depth.load(Ordering::Acquire) == 0 {
                if self.timer_procs.dispatch() == DispatchOutcome::Rejected {
                    self.timer_event_missed.store(true, Ordering::Release);
                }
            } else {
                self.timer_event_missed.store(true, Ordering::Release);
            }

            // The failsafe check follows registry dispatch within the same
            // tick, and keeps running while dispatch is suspended. The
            // callback is invoked outside the lock.
            let due = self.failsafe.lock().fire_due(self.kernel.now_us());
            if let Some(proc) = due {
                log::warn!("failsafe period elapsed; invoking failsafe");
                proc();
            }

            self.next_tick(&mut next, period);
        }
    }

    fn io_thread(&'static self) {
        log::debug!("io worker up");
        let period = u64::from(self.options.io_period_us);
        let mut next = self.kernel.now_us() + period;
        loop {
            self.io_procs.dispatch();
            self.next_tick(&mut next, period);
        }
    }

    fn service_thread(&'static self, proc: &'static dyn PeriodicProc, period_us: u32) {
        let period = u64::from(period_us);
        let mut next = self.kernel.now_us() + period;
        loop {
            proc.poll();
            self.next_tick(&mut next, period);
        }
    }

    /// Sleep until the next tick boundary.
    ///
    /// Always a kernel sleep or yield, never a spin, so lower-priority
    /// workers keep their CPU headroom. If the previous pass overran its
    /// period, the cadence rebases from now instead of bursting through the
    /// missed boundaries.
    fn next_tick(&self, next: &mut u64, period: u64) {
        let now = self.kernel.now_us();
        if *next > now {
            self.kernel.sleep_us(*next - now);
        } else {
            self.kernel.yield_now();
            *next = now;
        }
        *next += period;
    }
}

#[cfg(all(test, feature = "host"))]
mod tests {
    use super::{SchedulerOptions, Scheduler, BOOST_PRIORITY, IO_PRIORITY, TIMER_PRIORITY};
    use crate::{host::HostKernel, kernel::Kernel};
    use core::sync::atomic::{AtomicU32, Ordering};

    fn scheduler() -> Scheduler<HostKernel> {
        Scheduler::new(HostKernel::new())
    }

    #[test]
    fn boost_priority_clears_both_workers() {
        assert!(BOOST_PRIORITY.is_more_urgent_than(TIMER_PRIORITY));
        assert!(BOOST_PRIORITY.is_more_urgent_than(IO_PRIORITY));
    }

    #[test]
    fn suspend_gate_nests() {
        let sched = scheduler();
        assert!(!sched.timer_procs_suspended());

        sched.suspend_timer_procs();
        sched.suspend_timer_procs();
        assert!(sched.timer_procs_suspended());

        sched.resume_timer_procs();
        assert!(sched.timer_procs_suspended());
        sched.resume_timer_procs();
        assert!(!sched.timer_procs_suspended());

        // Unbalanced resume is ignored.
        sched.resume_timer_procs();
        assert!(!sched.timer_procs_suspended());
    }

    #[test]
    fn delay_callback_gated_by_minimum_interval() {
        static CALLS: AtomicU32 = AtomicU32::new(0);
        fn count() {
            CALLS.fetch_add(1, Ordering::Relaxed);
        }

        let sched = scheduler();
        sched.register_delay_callback(count, 10);

        sched.delay(2);
        assert_eq!(CALLS.load(Ordering::Relaxed), 0);

        sched.delay(10);
        assert_eq!(CALLS.load(Ordering::Relaxed), 1);

        sched.delay(25);
        assert_eq!(CALLS.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn boost_restores_priority() {
        let sched = scheduler();
        let before = sched.kernel().current_priority();
        sched.delay_microseconds_boost(200);
        assert_eq!(sched.kernel().current_priority(), before);
    }

    #[test]
    fn lifecycle_flags() {
        let sched = scheduler();
        assert!(!sched.is_system_initialized());
        assert!(!sched.is_hal_initialized());
        assert!(sched.in_main_thread());

        sched.hal_initialized();
        assert!(sched.is_hal_initialized());
        assert!(!sched.is_system_initialized());

        sched.system_initialized();
        assert!(sched.is_system_initialized());
    }

    #[test]
    fn default_options() {
        let opts = SchedulerOptions::default();
        assert_eq!(opts.timer_period_us, 1_000);
        assert_eq!(opts.io_period_us, 20_000);
        assert_eq!(opts.storage_period_us, 10_000);
        assert_eq!(opts.uart_period_us, 1_000);
        assert!(opts.storage_proc.is_none());
        assert!(opts.uart_proc.is_none());
    }
}
