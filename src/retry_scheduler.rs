//! A thread-safe wrapper around an interface that allows scheduling arbitrary logic to
//! retry until it succeeds (or is stopped), plus thread-safe synchronous access to the
//! wrapped interface in the meantime.
//!
//! The scheduler is designed to only schedule 1 callback at a time, until it is either
//! replaced or stopped.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// An RAII handle for stopping the scheduler. Created under the scheduler's lock and
/// handed by reference to retry callbacks; its cleanup runs in the drop path only if
/// `request_stop` was called, and assumes the lock is already held by the invoking path.
pub struct SchedulerStopToken<'a> {
    stop_requested: bool,
    cleanup: Option<Box<dyn FnOnce() + 'a>>,
}

impl<'a> SchedulerStopToken<'a> {
    fn new(cleanup: impl FnOnce() + 'a) -> Self {
        Self {
            stop_requested: false,
            cleanup: Some(Box::new(cleanup)),
        }
    }

    pub fn request_stop(&mut self) {
        self.stop_requested = true;
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested
    }
}

impl Drop for SchedulerStopToken<'_> {
    fn drop(&mut self) {
        if self.stop_requested {
            if let Some(cleanup) = self.cleanup.take() {
                cleanup();
            }
        }
    }
}

/// Defines the executor's execution logic when it is scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Execution {
    /// Executed in the calling thread immediately, then scheduled for retry afterward.
    Immediate,
    /// The first sleep duration is taken and the calling thread sleeps for it (while
    /// still holding the scheduler lock), then behaves like `Immediate`.
    ImmediateWithSleep,
    /// Executed only by the worker thread, never synchronously.
    ScheduledOnly,
}

/// Options for `RetryScheduler::schedule`.
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Remaining sleep durations; the last one is reused indefinitely. Must be non-empty
    /// and every duration must be non-zero.
    pub sleep_durations: Vec<Duration>,
    pub execution: Execution,
}

type RetryFn<T> = Box<dyn FnMut(&mut T, &mut SchedulerStopToken<'_>) + Send>;

struct State<T> {
    sleep_durations: Vec<Duration>,
    retry_function: Option<RetryFn<T>>,
    syncing: bool,
    keep_alive: bool,
}

/// Thread-safe wrapper around an interface `T`, providing at-most-one background retry of
/// a scheduled operation plus synchronous thread-safe access to `T`.
pub struct RetryScheduler<T> {
    iface: Arc<Mutex<T>>,
    state: Arc<Mutex<State<T>>>,
    cv: Arc<Condvar>,
    thread: Option<JoinHandle<()>>,
}

fn take_next_duration(durations: &mut Vec<Duration>) -> Duration {
    if durations.len() > 1 {
        durations.remove(0)
    } else {
        durations.last().copied().unwrap_or(Duration::ZERO)
    }
}

impl<T: Send + 'static> RetryScheduler<T> {
    pub fn new(iface: T) -> Self {
        let iface = Arc::new(Mutex::new(iface));
        let state = Arc::new(Mutex::new(State {
            sleep_durations: Vec::new(),
            retry_function: None,
            syncing: false,
            keep_alive: true,
        }));
        let cv = Arc::new(Condvar::new());

        let thread = {
            let iface = iface.clone();
            let state = state.clone();
            let cv = cv.clone();
            std::thread::spawn(move || worker_loop(iface, state, cv))
        };

        Self {
            iface,
            state,
            cv,
            thread: Some(thread),
        }
    }

    /// Schedules `exec_fn` to run per `options`. Replaces any previously scheduled
    /// function. Panics if `options.sleep_durations` is empty or contains a zero duration
    /// (a programming error, mirroring the original's `std::logic_error`).
    pub fn schedule(
        &self,
        mut exec_fn: impl FnMut(&mut T, &mut SchedulerStopToken<'_>) + Send + 'static,
        options: SchedulerOptions,
    ) {
        assert!(
            !options.sleep_durations.is_empty(),
            "at least 1 sleep duration must be specified in RetryScheduler::schedule"
        );
        assert!(
            options.sleep_durations.iter().all(|d| !d.is_zero()),
            "all of the durations specified in RetryScheduler::schedule must be larger than 0"
        );

        let mut guard = self.state.lock().expect("retry scheduler mutex poisoned");

        let mut sleep_durations = options.sleep_durations.clone();
        // `stop_requested` mirrors the C++ stop token's flag; its cleanup (clearing
        // whatever was previously scheduled) is applied explicitly below rather than via
        // `Drop`, since the closure would otherwise need to borrow `guard` while `guard`
        // is already borrowed for the synchronous invocation above it.
        let mut stop_requested = false;
        let mut panicked = false;

        if options.execution != Execution::ScheduledOnly {
            if options.execution == Execution::ImmediateWithSleep {
                let first = take_next_duration(&mut sleep_durations);
                std::thread::sleep(first);
            }

            let mut iface_guard = self.iface.lock().expect("retry scheduler interface mutex poisoned");
            let result = catch_unwind(AssertUnwindSafe(|| {
                let mut stop_token = SchedulerStopToken::new(|| {});
                exec_fn(&mut iface_guard, &mut stop_token);
                stop_token.stop_requested()
            }));
            drop(iface_guard);
            match result {
                Ok(requested) => stop_requested = requested,
                Err(_) => {
                    tracing::error!(
                        "Exception thrown in the RetryScheduler::schedule. Stopping scheduler."
                    );
                    panicked = true;
                }
            }
        }

        if panicked || stop_requested {
            // Requesting a stop during the synchronous invocation (or a panic) clears
            // whatever was previously scheduled and skips installing the new function.
            guard.retry_function = None;
            guard.sleep_durations = Vec::new();
        } else {
            guard.retry_function = Some(Box::new(exec_fn));
            guard.sleep_durations = sleep_durations;
            guard.syncing = true;
            self.cv.notify_one();
        }
    }

    /// Runs `exec_fn` against the wrapped interface under the scheduler lock, without a
    /// stop token. Exposed for read-only or simple mutation access.
    pub fn execute<R>(&self, exec_fn: impl FnOnce(&mut T) -> R) -> R {
        let _state_guard = self.state.lock().expect("retry scheduler mutex poisoned");
        let mut iface_guard = self.iface.lock().expect("retry scheduler interface mutex poisoned");
        exec_fn(&mut iface_guard)
    }

    /// Runs `exec_fn` against the wrapped interface under the scheduler lock, passing a
    /// stop token whose `request_stop` drops the pending scheduled function.
    pub fn execute_with_stop<R>(
        &self,
        exec_fn: impl FnOnce(&mut T, &mut SchedulerStopToken<'_>) -> R,
    ) -> R {
        let mut state_guard = self.state.lock().expect("retry scheduler mutex poisoned");
        let mut iface_guard = self.iface.lock().expect("retry scheduler interface mutex poisoned");

        let result = {
            let state = &mut *state_guard;
            let mut stop_token = SchedulerStopToken::new(|| {
                state.retry_function = None;
                state.sleep_durations = Vec::new();
            });
            let result = exec_fn(&mut iface_guard, &mut stop_token);
            if stop_token.stop_requested() {
                state.retry_function = None;
                state.sleep_durations = Vec::new();
            }
            result
        };
        if state_guard.retry_function.is_none() {
            self.cv.notify_one();
        }
        result
    }

    pub fn is_scheduled(&self) -> bool {
        self.state
            .lock()
            .expect("retry scheduler mutex poisoned")
            .retry_function
            .is_some()
    }

    /// Clears any pending scheduled function and wakes the worker.
    pub fn stop(&self) {
        let mut guard = self.state.lock().expect("retry scheduler mutex poisoned");
        if guard.retry_function.is_some() {
            guard.retry_function = None;
            guard.sleep_durations = Vec::new();
            guard.syncing = true;
            self.cv.notify_one();
        }
    }
}

impl<T> Drop for RetryScheduler<T> {
    fn drop(&mut self) {
        {
            let mut guard = self.state.lock().expect("retry scheduler mutex poisoned");
            guard.keep_alive = false;
            guard.syncing = true;
            self.cv.notify_one();
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn worker_loop<T>(iface: Arc<Mutex<T>>, state: Arc<Mutex<State<T>>>, cv: Arc<Condvar>) {
    let mut guard = state.lock().expect("retry scheduler mutex poisoned");
    loop {
        if !guard.keep_alive {
            return;
        }

        guard.syncing = false;
        let duration = take_next_duration(&mut guard.sleep_durations);

        guard = if duration > Duration::ZERO {
            cv.wait_timeout_while(guard, duration, |s| !s.syncing).unwrap().0
        } else {
            cv.wait_while(guard, |s| !s.syncing).unwrap()
        };

        if !guard.keep_alive {
            return;
        }

        if guard.syncing {
            // Woken up purely to resync sleep timing or to be stopped/rescheduled.
            continue;
        }

        if guard.retry_function.is_none() {
            continue;
        }

        let mut retry_function = guard.retry_function.take().expect("checked above");
        drop(guard);

        let mut iface_guard = iface.lock().expect("retry scheduler interface mutex poisoned");
        let mut stopped = false;
        let result = {
            let iface_ref = &mut *iface_guard;
            let stopped_ref = &mut stopped;
            catch_unwind(AssertUnwindSafe(|| {
                let mut stop_token = SchedulerStopToken::new(|| {
                    *stopped_ref = true;
                });
                retry_function(iface_ref, &mut stop_token);
                stop_token.stop_requested()
            }))
        };
        drop(iface_guard);

        guard = state.lock().expect("retry scheduler mutex poisoned");
        match result {
            Ok(stop_requested) => {
                if stop_requested {
                    guard.retry_function = None;
                    guard.sleep_durations = Vec::new();
                } else {
                    guard.retry_function = Some(retry_function);
                }
            }
            Err(_) => {
                tracing::error!("Exception thrown in the RetryScheduler thread. Stopping scheduler.");
                guard.retry_function = None;
                guard.sleep_durations = Vec::new();
            }
        }
        let _ = stopped;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    #[test]
    fn stop_token_without_request_does_not_run_cleanup() {
        let ran = Arc::new(AtomicUsize::new(0));
        let ran_clone = ran.clone();
        {
            let _token = SchedulerStopToken::new(move || {
                ran_clone.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn stop_token_with_request_runs_cleanup() {
        let ran = Arc::new(AtomicUsize::new(0));
        let ran_clone = ran.clone();
        {
            let mut token = SchedulerStopToken::new(move || {
                ran_clone.fetch_add(1, Ordering::SeqCst);
            });
            token.request_stop();
        }
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn schedule_replaces_previous_function() {
        let scheduler = RetryScheduler::new(0usize);
        scheduler.schedule(
            |_, _| {},
            SchedulerOptions {
                sleep_durations: vec![Duration::from_millis(50)],
                execution: Execution::ScheduledOnly,
            },
        );
        assert!(scheduler.is_scheduled());
        scheduler.schedule(
            |_, stop| stop.request_stop(),
            SchedulerOptions {
                sleep_durations: vec![Duration::from_millis(1)],
                execution: Execution::Immediate,
            },
        );
        assert!(!scheduler.is_scheduled());
    }

    #[test]
    fn back_off_schedule_invokes_exactly_n_times_with_spacing() {
        let invocations = Arc::new(Mutex::new(Vec::<Instant>::new()));
        let invocations_clone = invocations.clone();
        let scheduler = RetryScheduler::new(0usize);

        scheduler.schedule(
            move |_, stop_token| {
                let mut log = invocations_clone.lock().unwrap();
                log.push(Instant::now());
                if log.len() >= 3 {
                    stop_token.request_stop();
                }
            },
            SchedulerOptions {
                sleep_durations: vec![
                    Duration::from_millis(20),
                    Duration::from_millis(20),
                    Duration::from_millis(20),
                ],
                execution: Execution::Immediate,
            },
        );

        std::thread::sleep(Duration::from_millis(200));
        let log = invocations.lock().unwrap();
        assert_eq!(log.len(), 3);
        assert!(log[1].duration_since(log[0]) >= Duration::from_millis(15));
        assert!(log[2].duration_since(log[1]) >= Duration::from_millis(15));
        assert!(!scheduler.is_scheduled());
    }

    #[test]
    fn failure_path_stops_and_allows_subsequent_schedule() {
        let scheduler = RetryScheduler::new(0usize);
        scheduler.schedule(
            |_, _| panic!("boom"),
            SchedulerOptions {
                sleep_durations: vec![Duration::from_millis(10)],
                execution: Execution::Immediate,
            },
        );
        assert!(!scheduler.is_scheduled());

        scheduler.schedule(
            |_, stop| stop.request_stop(),
            SchedulerOptions {
                sleep_durations: vec![Duration::from_millis(10)],
                execution: Execution::Immediate,
            },
        );
        assert!(!scheduler.is_scheduled());
    }

    #[test]
    fn immediate_with_sleep_blocks_calling_thread() {
        let scheduler = RetryScheduler::new(0usize);
        let start = Instant::now();
        scheduler.schedule(
            |_, stop| stop.request_stop(),
            SchedulerOptions {
                sleep_durations: vec![Duration::from_millis(30)],
                execution: Execution::ImmediateWithSleep,
            },
        );
        assert!(start.elapsed() >= Duration::from_millis(25));
    }
}
