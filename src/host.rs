// SPDX-License-Identifier: MPL-2.0

//! A hosted [`Kernel`] for tests and software-in-the-loop runs.
//!
//! [`HostKernel`] backs the scheduler with `std` threads and a monotonic
//! clock from [`Instant`]. One honest caveat: a desktop OS does not offer
//! the strict priority preemption of a real-time kernel, so priorities here
//! are a per-thread ledger — faithfully recorded, returned by the queries,
//! swapped by the boost — while actual scheduling is left to the host OS.
//! Every timing property still holds (sleeps are real sleeps, the clock is
//! real time); only preemption *order* is simulated by accounting. Firmware
//! ports supply the real thing.
//!
//! The thread that constructs the kernel is treated as the application's
//! main thread and is accounted at [`MAIN_PRIORITY`].

use std::{
    collections::HashMap,
    string::ToString,
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

use crate::{
    kernel::{Kernel, Priority, SpawnError, ThreadOptions},
    scheduler::MAIN_PRIORITY,
};

/// A `std`-thread kernel. See the [module documentation](crate::host).
pub struct HostKernel {
    origin: Instant,
    priorities: Arc<Mutex<HashMap<thread::ThreadId, Priority>>>,
}

impl HostKernel {
    /// Allocate a hosted kernel.
    ///
    /// The calling thread is registered at [`MAIN_PRIORITY`].
    pub fn new() -> Self {
        let mut priorities = HashMap::new();
        priorities.insert(thread::current().id(), MAIN_PRIORITY);
        Self {
            origin: Instant::now(),
            priorities: Arc::new(Mutex::new(priorities)),
        }
    }

    fn priority_of(&self, id: thread::ThreadId) -> Priority {
        // Threads that weren't spawned through this kernel (extra test
        // threads, mostly) are accounted at the main priority.
        self.priorities
            .lock()
            .unwrap()
            .get(&id)
            .copied()
            .unwrap_or(MAIN_PRIORITY)
    }
}

impl Default for HostKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl Kernel for HostKernel {
    type ThreadId = thread::ThreadId;

    fn spawn<F>(&self, options: &ThreadOptions<'_>, entrypoint: F) -> Result<(), SpawnError>
    where
        F: FnOnce() + Send + 'static,
    {
        let priorities = Arc::clone(&self.priorities);
        let priority = options.priority;
        let result = thread::Builder::new()
            .name(options.name.to_string())
            .stack_size(options.stack_size)
            .spawn(move || {
                // Record our own priority before running the entrypoint, so
                // the ledger is consistent by the time the body can ask.
                priorities
                    .lock()
                    .unwrap()
                    .insert(thread::current().id(), priority);
                entrypoint();
            });
        match result {
            Ok(handle) => {
                // Detached on purpose: worker threads live as long as the
                // process.
                drop(handle);
                Ok(())
            }
            Err(err) => {
                log::error!("host kernel failed to spawn {}: {err}", options.name);
                Err(SpawnError(()))
            }
        }
    }

    fn now_us(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_micros()).unwrap_or(u64::MAX)
    }

    fn sleep_us(&self, us: u64) {
        thread::sleep(Duration::from_micros(us));
    }

    fn yield_now(&self) {
        thread::yield_now();
    }

    fn thread_id(&self) -> Self::ThreadId {
        thread::current().id()
    }

    fn current_priority(&self) -> Priority {
        self.priority_of(thread::current().id())
    }

    fn set_current_priority(&self, priority: Priority) -> Priority {
        self.priorities
            .lock()
            .unwrap()
            .insert(thread::current().id(), priority)
            .unwrap_or(MAIN_PRIORITY)
    }

    fn reset(&self, hold_in_bootloader: bool) -> ! {
        // A hosted "platform reset" ends the process. The bootloader flag
        // has nothing to hold; surface it in the exit code instead.
        log::info!("host kernel reset, hold_in_bootloader={hold_in_bootloader}");
        std::process::exit(i32::from(hold_in_bootloader))
    }
}

#[cfg(test)]
mod tests {
    use super::HostKernel;
    use crate::{
        kernel::{make_priority, Kernel, ThreadOptions},
        scheduler::MAIN_PRIORITY,
    };
    use std::{boxed::Box, sync::mpsc};

    #[test]
    fn clock_is_monotonic() {
        let kernel = HostKernel::new();
        let a = kernel.now_us();
        kernel.sleep_us(2_000);
        let b = kernel.now_us();
        assert!(b >= a + 2_000);
    }

    #[test]
    fn constructor_thread_holds_main_priority() {
        let kernel = HostKernel::new();
        assert_eq!(kernel.current_priority(), MAIN_PRIORITY);
    }

    #[test]
    fn priority_swap_returns_previous() {
        let kernel = HostKernel::new();
        let boosted = make_priority(182);
        let previous = kernel.set_current_priority(boosted);
        assert_eq!(kernel.current_priority(), boosted);
        assert_eq!(kernel.set_current_priority(previous), boosted);
        assert_eq!(kernel.current_priority(), previous);
    }

    #[test]
    fn spawned_thread_sees_its_priority() {
        let kernel: &'static HostKernel = Box::leak(Box::new(HostKernel::new()));
        let priority = make_priority(178);
        let (send, recv) = mpsc::channel();
        kernel
            .spawn(
                &ThreadOptions {
                    name: "probe",
                    priority,
                    stack_size: 2048,
                },
                move || send.send(kernel.current_priority()).unwrap(),
            )
            .unwrap();
        assert_eq!(recv.recv().unwrap(), priority);
    }
}
