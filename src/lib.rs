// SPDX-License-Identifier: MPL-2.0

//! Halsched is the real-time task scheduler for a flight controller's
//! hardware abstraction layer.
//!
//! The scheduler owns a fixed set of priority-ordered worker threads. Two of
//! them — the timer worker and the io worker — dispatch small tables of
//! periodic callbacks that drivers register during startup. Two more run
//! fixed storage-flush and UART-service bodies. On top of that, the scheduler
//! provides blocking delay primitives for the main control loop, including a
//! bounded priority boost that suppresses loop-timing jitter, and a failsafe
//! watchdog that detects a stalled main loop.
//!
//! # Getting started
//!
//! A [`Scheduler`] is generic over a [`Kernel`](kernel::Kernel): the host
//! real-time kernel that supplies threads, priorities, and timekeeping. On a
//! hosted platform, use [`HostKernel`](host::HostKernel) (behind the
//! default-on `host` feature). The scheduler must live for the life of the
//! process, since its worker threads are never joined.
//!
//! ```no_run
//! use halsched::{host::HostKernel, registry::PeriodicProc, Scheduler};
//! use core::sync::atomic::{AtomicU32, Ordering};
//!
//! struct Baro;
//! static SAMPLES: AtomicU32 = AtomicU32::new(0);
//!
//! impl PeriodicProc for Baro {
//!     fn poll(&self) {
//!         SAMPLES.fetch_add(1, Ordering::Relaxed);
//!     }
//! }
//!
//! static BARO: Baro = Baro;
//!
//! let sched: &'static Scheduler<HostKernel> =
//!     Box::leak(Box::new(Scheduler::new(HostKernel::new())));
//!
//! sched.register_timer_process(&BARO).unwrap();
//! sched.init().unwrap();
//!
//! // ... first pass of the main control loop ...
//! sched.system_initialized();
//! loop {
//!     sched.delay_microseconds_boost(150);
//!     // run one control cycle, then rest until the next
//!     sched.delay(10);
//!     # break;
//! }
//! ```
//!
//! # Registration happens at startup
//!
//! The timer and io registries hold at most
//! [`MAX_PROCS`](registry::MAX_PROCS) entries each, and they hold non-owning
//! `&'static` references. Drivers are expected to register while the system
//! is bringing itself up. Registration remains safe after the workers start
//! — adds are serialized against dispatch by a lock — but an entry
//! registered mid-pass is only guaranteed to run from the *next* pass
//! onward.
//!
//! # Callbacks are trusted
//!
//! Dispatch invokes callbacks in registration order and applies no per-entry
//! timeout. A callback that blocks stalls every later entry in its registry
//! and the whole dispatch period. That is a driver-correctness contract, not
//! something the scheduler defends against.

#![no_std]
#![warn(
    elided_lifetimes_in_paths,
    explicit_outlives_requirements,
    let_underscore_drop,
    missing_docs,
    semicolon_in_expressions_from_macros,
    trivial_numeric_casts,
    unsafe_op_in_unsafe_fn,
    unreachable_pub,
    unused_qualifications,
    clippy::cast_possible_truncation,
    clippy::map_unwrap_or,
    clippy::manual_assert,
    clippy::missing_safety_doc,
    clippy::redundant_closure_for_method_calls,
    clippy::semicolon_if_nothing_returned,
    clippy::undocumented_unsafe_blocks
)]

#[cfg(any(test, feature = "host"))]
extern crate std;

mod failsafe;
#[cfg(feature = "host")]
pub mod host;
pub mod kernel;
pub mod registry;
pub mod scheduler;

pub use scheduler::Scheduler;

/// A zero-argument callback.
///
/// Used for the delay callback and the failsafe callback. These are plain
/// function pointers on purpose: they carry no state, so they can be stored
/// and invoked from any thread without lifetime concerns.
pub type Proc = fn();
