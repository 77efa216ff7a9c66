// SPDX-License-Identifier: MPL-2.0

//! Lifecycle: init-once, thread identity, and the fixed service workers.

use halsched::{
    host::HostKernel,
    registry::PeriodicProc,
    scheduler::{InitError, SchedulerOptions},
    Scheduler,
};
use std::{
    sync::atomic::{AtomicBool, AtomicU32, Ordering},
    thread,
    time::Duration,
};

fn leak_scheduler() -> &'static Scheduler<HostKernel> {
    let _ = env_logger::builder().is_test(true).try_init();
    Box::leak(Box::new(Scheduler::new(HostKernel::new())))
}

#[test]
fn init_is_once() {
    let sched = leak_scheduler();
    sched.init().unwrap();
    assert_eq!(sched.init(), Err(InitError::AlreadyRunning));
}

#[test]
fn workers_are_not_the_main_thread() {
    static CHECKED: AtomicBool = AtomicBool::new(false);
    static IN_MAIN: AtomicBool = AtomicBool::new(true);

    let sched = leak_scheduler();
    assert!(sched.in_main_thread());

    let probe = Box::leak(Box::new(move || {
        IN_MAIN.store(sched.in_main_thread(), Ordering::Relaxed);
        CHECKED.store(true, Ordering::Relaxed);
    }));
    sched.register_timer_process(probe).unwrap();
    sched.init().unwrap();

    thread::sleep(Duration::from_millis(50));
    assert!(CHECKED.load(Ordering::Relaxed), "timer worker never ran");
    assert!(!IN_MAIN.load(Ordering::Relaxed));
    assert!(sched.in_main_thread());
}

struct CountingBody(AtomicU32);

impl CountingBody {
    const fn new() -> Self {
        Self(AtomicU32::new(0))
    }
    fn count(&self) -> u32 {
        self.0.load(Ordering::Relaxed)
    }
}

impl PeriodicProc for CountingBody {
    fn poll(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }
}

#[test]
fn storage_and_uart_workers_run_their_fixed_bodies() {
    static STORAGE: CountingBody = CountingBody::new();
    static UART: CountingBody = CountingBody::new();

    let _ = env_logger::builder().is_test(true).try_init();
    let mut options = SchedulerOptions::default();
    options.storage_period_us = 5_000;
    options.uart_period_us = 5_000;
    options.storage_proc = Some(&STORAGE);
    options.uart_proc = Some(&UART);

    let sched: &'static Scheduler<HostKernel> =
        Box::leak(Box::new(Scheduler::with_options(HostKernel::new(), options)));
    sched.init().unwrap();

    thread::sleep(Duration::from_millis(60));
    assert!(STORAGE.count() >= 2, "storage body barely ran");
    assert!(UART.count() >= 2, "uart body barely ran");

    // The fixed bodies are not registry entries.
    assert!(sched.timer_procs().is_empty());
    assert!(sched.io_procs().is_empty());
}
