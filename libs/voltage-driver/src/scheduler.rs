//! Cooperative round-robin scheduler
//!
//! One pass visits every connection and steps each task that was queued at
//! the start of the pass exactly once. Nothing blocks: a task waiting on I/O
//! reports pending and yields to the next one.

use std::thread;
use std::time::{Duration, Instant};

use errors::{PlcError, Result};
use tracing::trace;

use crate::connection::Connection;
use crate::execution::Execution;
use crate::queue::PassStats;

/// Drives the task queues of a set of connections
#[derive(Debug, Clone)]
pub struct Scheduler {
    passes: u64,
    idle_sleep: Duration,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            passes: 0,
            idle_sleep: Duration::from_millis(1),
        }
    }

    /// Pause between passes in the `run_*` loops
    pub fn with_idle_sleep(mut self, idle_sleep: Duration) -> Self {
        self.idle_sleep = idle_sleep;
        self
    }

    /// Passes run so far
    pub fn passes(&self) -> u64 {
        self.passes
    }

    /// One pass over every connection
    pub fn run_pass<'a, I>(&mut self, connections: I) -> PassStats
    where
        I: IntoIterator<Item = &'a mut Connection>,
    {
        self.passes += 1;
        let mut total = PassStats::default();
        for connection in connections {
            let stats = connection.poll_once();
            total.visited += stats.visited;
            total.completed += stats.completed;
            total.remaining += stats.remaining;
        }
        trace!(
            "Pass {}: {} stepped, {} completed, {} queued",
            self.passes,
            total.visited,
            total.completed,
            total.remaining
        );
        total
    }

    /// Run passes until every queue is empty; returns the passes run
    pub fn run_until_idle(&mut self, connections: &mut [Connection], timeout: Duration) -> Result<u64> {
        let started = Instant::now();
        let mut passes = 0;
        loop {
            let stats = self.run_pass(connections.iter_mut());
            passes += 1;
            if stats.remaining == 0 {
                return Ok(passes);
            }
            if started.elapsed() >= timeout {
                return Err(PlcError::timeout(format!(
                    "{} tasks still queued after {:?}",
                    stats.remaining, timeout
                )));
            }
            if !self.idle_sleep.is_zero() {
                thread::sleep(self.idle_sleep);
            }
        }
    }

    /// Run passes over one connection until `execution` has finished
    pub fn run_until_finished<T>(
        &mut self,
        connection: &mut Connection,
        execution: &Execution<T>,
        timeout: Duration,
    ) -> Result<u64> {
        let started = Instant::now();
        let mut passes = 0;
        while !execution.is_finished() {
            let stats = self.run_pass([&mut *connection]);
            passes += 1;
            if execution.is_finished() {
                break;
            }
            if stats.remaining == 0 {
                return Err(PlcError::internal(format!(
                    "Task {} left the queue without a result",
                    execution.task_id()
                )));
            }
            if started.elapsed() >= timeout {
                return Err(PlcError::timeout(format!(
                    "Task {} not finished after {:?}",
                    execution.task_id(),
                    timeout
                )));
            }
            if !self.idle_sleep.is_zero() {
                thread::sleep(self.idle_sleep);
            }
        }
        Ok(passes)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::testing::{connection_for_tests, TestDriver};

    #[test]
    fn test_connect_end_to_end_three_passes() {
        let (mut connection, _handle) = connection_for_tests(TestDriver::default());
        let connecting = connection.connect().unwrap();
        let mut scheduler = Scheduler::new().with_idle_sleep(Duration::ZERO);

        for _ in 0..3 {
            scheduler.run_pass([&mut connection]);
        }
        assert!(connection.is_connected());
        assert!(connection.queue().is_empty());
        assert!(connecting.finished_successfully());
        assert_eq!(scheduler.passes(), 3);
    }

    #[test]
    fn test_pass_visits_every_connection() {
        let (mut a, _ha) = connection_for_tests(TestDriver::default());
        let (mut b, _hb) = connection_for_tests(TestDriver::default());
        let ca = a.connect().unwrap();
        let cb = b.connect().unwrap();

        let mut scheduler = Scheduler::new();
        let stats = scheduler.run_pass([&mut a, &mut b]);
        assert_eq!(stats.visited, 2);
        assert_eq!(stats.remaining, 2);

        scheduler.run_pass([&mut a, &mut b]);
        scheduler.run_pass([&mut a, &mut b]);
        assert!(ca.finished_successfully());
        assert!(cb.finished_successfully());
    }

    #[test]
    fn test_run_until_idle() {
        let (mut connection, _handle) = connection_for_tests(TestDriver::default());
        let _connecting = connection.connect().unwrap();
        let mut connections = vec![connection];
        let mut scheduler = Scheduler::new().with_idle_sleep(Duration::ZERO);
        let passes = scheduler
            .run_until_idle(&mut connections, Duration::from_secs(1))
            .unwrap();
        assert_eq!(passes, 3);
        assert!(connections[0].is_connected());
    }

    #[test]
    fn test_run_until_finished() {
        let (mut connection, _handle) = connection_for_tests(TestDriver::default());
        let connecting = connection.connect().unwrap();
        let mut scheduler = Scheduler::new().with_idle_sleep(Duration::ZERO);
        scheduler
            .run_until_finished(&mut connection, &connecting, Duration::from_secs(1))
            .unwrap();

        let request = connection.create_read_request(&[("a", "x")]).unwrap();
        let reading = connection.execute_read(request).unwrap();
        let passes = scheduler
            .run_until_finished(&mut connection, &reading, Duration::from_secs(1))
            .unwrap();
        assert_eq!(passes, 2);
        assert!(reading.finished_successfully());
    }
}
