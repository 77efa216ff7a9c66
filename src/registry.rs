// SPDX-License-Identifier: MPL-2.0

//! Fixed-capacity tables of periodic callbacks.
//!
//! A [`ProcRegistry`] holds up to [`MAX_PROCS`] bound callbacks, generalized
//! by [`PeriodicProc`]. Insertion order is dispatch order, always. The
//! registry never allocates: entries are non-owning `&'static` references,
//! and the table is a fixed array behind a short-lived lock.
//!
//! Each registry is serviced by exactly one dedicated worker thread, but
//! registration may arrive from any thread. [`register`](ProcRegistry::register)
//! and [`dispatch`](ProcRegistry::dispatch) take the same lock; dispatch
//! holds it only long enough to copy the (at most eight) entries out, so a
//! registration racing a pass settles no later than the next pass.
//!
//! Duplicate registrations are not detected. Registering the same callback
//! twice runs it twice per pass; that's a caller error, not a rejected one.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use spin::Mutex as SpinMutex;

/// The capacity of each callback registry.
pub const MAX_PROCS: usize = 8;

/// A periodic callback bound to a driver instance.
///
/// Drivers implement this on the object whose method should run each
/// dispatch pass, then register a `&'static` reference to it. The registry
/// does not own the receiver; keeping it alive for the life of the process
/// is the registrant's responsibility, which the `'static` bound enforces.
///
/// `poll` executes on the registry's worker thread. It should be quick:
/// there is no per-entry timeout, and time spent here delays every later
/// entry in the same registry.
///
/// ```
/// use halsched::registry::{PeriodicProc, ProcRegistry};
/// use core::sync::atomic::{AtomicU32, Ordering};
///
/// struct Baro;
/// static SAMPLES: AtomicU32 = AtomicU32::new(0);
///
/// impl PeriodicProc for Baro {
///     fn poll(&self) {
///         SAMPLES.fetch_add(1, Ordering::Relaxed);
///     }
/// }
///
/// static REGISTRY: ProcRegistry = ProcRegistry::new("timer");
/// static BARO: Baro = Baro;
///
/// REGISTRY.register(&BARO).unwrap();
/// assert_eq!(REGISTRY.index_of(&BARO), Some(0));
/// ```
///
/// Closures that implement `Fn() + Sync` work too, via the blanket
/// implementation; they still need a `'static` home.
pub trait PeriodicProc: Sync {
    /// Run one iteration of this callback.
    fn poll(&self);
}

impl<F> PeriodicProc for F
where
    F: Fn() + Sync,
{
    fn poll(&self) {
        (self)();
    }
}

/// The registry is at capacity; the registration was dropped.
///
/// Rejections are never fatal. The registry also counts them
/// (see [`ProcRegistry::rejected`]) so that a dropped driver callback is
/// observable after the fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RegistryFull(pub(crate) ());

/// The result of a dispatch pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DispatchOutcome {
    /// Every registered callback ran once, in registration order.
    Completed,
    /// A pass was already active on this registry; nothing ran.
    ///
    /// Nested dispatch is rejected rather than deferred. The entries will
    /// run on the next regular pass of the owning worker.
    Rejected,
}

impl DispatchOutcome {
    /// `true` if the pass ran to completion.
    pub const fn is_completed(self) -> bool {
        matches!(self, Self::Completed)
    }
}

type Slot = Option<&'static dyn PeriodicProc>;

struct ProcTable {
    slots: [Slot; MAX_PROCS],
    count: usize,
}

/// A fixed-capacity, append-only table of periodic callbacks.
///
/// See the [module documentation](crate::registry) for the concurrency
/// contract.
pub struct ProcRegistry {
    label: &'static str,
    table: SpinMutex<ProcTable>,
    /// Re-entrancy latch: set for the duration of a dispatch pass.
    dispatching: AtomicBool,
    rejected: AtomicU32,
}

impl ProcRegistry {
    /// Allocate an empty registry.
    ///
    /// `label` names the registry in diagnostics ("timer", "io").
    pub const fn new(label: &'static str) -> Self {
        Self {
            label,
            table: SpinMutex::new(ProcTable {
                slots: [None; MAX_PROCS],
                count: 0,
            }),
            dispatching: AtomicBool::new(false),
            rejected: AtomicU32::new(0),
        }
    }

    /// Append a callback to the table.
    ///
    /// Dispatch order is append order. If the table is full, the callback is
    /// dropped, the rejection counter increments, and the existing entries
    /// are untouched.
    pub fn register(&self, proc: &'static dyn PeriodicProc) -> Result<(), RegistryFull> {
        let mut table = self.table.lock();
        if table.count == MAX_PROCS {
            drop(table);
            self.rejected.fetch_add(1, Ordering::Relaxed);
            log::warn!("{} registry full; dropping registration", self.label);
            return Err(RegistryFull(()));
        }
        let index = table.count;
        table.slots[index] = Some(proc);
        table.count = index + 1;
        Ok(())
    }

    /// Run one dispatch pass: every entry once, in registration order.
    ///
    /// If a pass is already active on this registry, returns
    /// [`DispatchOutcome::Rejected`] without running anything. Callbacks are
    /// invoked outside the table lock, so they may themselves register.
    pub fn dispatch(&self) -> DispatchOutcome {
        if self
            .dispatching
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            log::debug!("rejected nested {} dispatch", self.label);
            return DispatchOutcome::Rejected;
        }

        let (slots, count) = {
            let table = self.table.lock();
            (table.slots, table.count)
        };
        for proc in slots[..count].iter().flatten() {
            proc.poll();
        }

        self.dispatching.store(false, Ordering::Release);
        DispatchOutcome::Completed
    }

    /// The number of registered callbacks.
    pub fn len(&self) -> usize {
        self.table.lock().count
    }

    /// `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// How many registrations were dropped at capacity.
    pub fn rejected(&self) -> u32 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// The dispatch position of `proc`, if it's registered.
    ///
    /// Matches by receiver address. If the same callback was registered
    /// more than once, this is the position of its first entry.
    pub fn index_of(&self, proc: &'static dyn PeriodicProc) -> Option<usize> {
        let addr = (proc as *const dyn PeriodicProc).cast::<()>();
        let table = self.table.lock();
        table.slots[..table.count].iter().position(|slot| {
            slot.is_some_and(|entry| (entry as *const dyn PeriodicProc).cast::<()>() == addr)
        })
    }
}
