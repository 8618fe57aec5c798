// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::ThreadId;

use threadpool::ThreadPool;

use super::task_scheduler::{
    AbortContinuationImpl, TaskGroupContinuationImpl, TaskGroupId, TaskImpl, TaskScheduler,
};
use crate::common::config;
use crate::common::error::{JoinError, Result};
use crate::novajoin_logging::{debug, warn};

/// Hands out stable, dense indices to the threads that ask for one.
pub struct ThreadIndexer {
    capacity: usize,
    ids: Mutex<HashMap<ThreadId, usize>>,
}

impl ThreadIndexer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            ids: Mutex::new(HashMap::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn index(&self) -> usize {
        let id = std::thread::current().id();
        let mut guard = self.ids.lock().unwrap_or_else(|e| e.into_inner());
        let next = guard.len();
        let idx = *guard.entry(id).or_insert(next);
        if idx >= self.capacity {
            warn!(
                "thread index {} exceeds indexer capacity {}",
                idx, self.capacity
            );
        }
        idx
    }
}

pub type ErrorHandler = Arc<dyn Fn(&JoinError) + Send + Sync>;

enum Mode {
    Pool(ThreadPool),
    /// Every task runs on the thread that starts its group.
    Inline,
}

struct TaskGroup {
    task: TaskImpl,
    continuation: TaskGroupContinuationImpl,
    started: bool,
    remaining: Arc<AtomicUsize>,
}

struct SchedulerShared {
    mode: Mode,
    num_threads: usize,
    indexer: ThreadIndexer,
    groups: Mutex<Vec<TaskGroup>>,
    registration_ended: AtomicBool,
    aborted: AtomicBool,
    in_flight: AtomicUsize,
    idle_lock: Mutex<()>,
    idle_cv: Condvar,
    abort_continuations: Mutex<Vec<AbortContinuationImpl>>,
    first_error: Mutex<Option<JoinError>>,
    error_handler: Mutex<Option<ErrorHandler>>,
}

/// Default `TaskScheduler` backed by a fixed `threadpool` or run inline.
pub struct ThreadPoolTaskScheduler {
    shared: Arc<SchedulerShared>,
}

impl ThreadPoolTaskScheduler {
    pub fn new(num_threads: usize) -> Self {
        let num_threads = num_threads.max(1);
        let pool = ThreadPool::with_name("hash_join_task".to_string(), num_threads);
        Self::with_mode(Mode::Pool(pool), num_threads)
    }

    pub fn inline() -> Self {
        Self::with_mode(Mode::Inline, 1)
    }

    fn with_mode(mode: Mode, num_threads: usize) -> Self {
        Self {
            shared: Arc::new(SchedulerShared {
                mode,
                num_threads,
                indexer: ThreadIndexer::new(num_threads),
                groups: Mutex::new(Vec::new()),
                registration_ended: AtomicBool::new(false),
                aborted: AtomicBool::new(false),
                in_flight: AtomicUsize::new(0),
                idle_lock: Mutex::new(()),
                idle_cv: Condvar::new(),
                abort_continuations: Mutex::new(Vec::new()),
                first_error: Mutex::new(None),
                error_handler: Mutex::new(None),
            }),
        }
    }

    /// Called with every error returned by a task or continuation.
    pub fn set_error_handler(&self, handler: ErrorHandler) {
        let mut guard = self
            .shared
            .error_handler
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *guard = Some(handler);
    }

    pub fn first_error(&self) -> Option<JoinError> {
        self.shared
            .first_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::SeqCst)
    }

    /// Block until no task is queued or running.
    pub fn wait_idle(&self) {
        let guard = self
            .shared
            .idle_lock
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let _guard = self
            .shared
            .idle_cv
            .wait_while(guard, |_| self.shared.in_flight.load(Ordering::SeqCst) > 0)
            .unwrap_or_else(|e| e.into_inner());
    }
}

impl Default for ThreadPoolTaskScheduler {
    fn default() -> Self {
        Self::new(config::exec_threads())
    }
}

impl SchedulerShared {
    fn enter(&self) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
    }

    fn leave(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            {
                let _guard = self.idle_lock.lock().unwrap_or_else(|e| e.into_inner());
                self.idle_cv.notify_all();
            }
            if self.aborted.load(Ordering::SeqCst) {
                self.fire_abort_continuations();
            }
        }
    }

    fn fire_abort_continuations(&self) {
        let continuations = {
            let mut guard = self
                .abort_continuations
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *guard)
        };
        for continuation in continuations {
            continuation();
        }
    }

    fn fail(&self, err: JoinError) {
        warn!("task failed, aborting scheduler: {}", err);
        {
            let mut guard = self.first_error.lock().unwrap_or_else(|e| e.into_inner());
            if guard.is_none() {
                *guard = Some(err.clone());
            }
        }
        let handler = self
            .error_handler
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(handler) = handler {
            handler(&err);
        }
        self.aborted.store(true, Ordering::SeqCst);
    }

    fn run_task(
        &self,
        thread_index: usize,
        task_id: usize,
        task: &TaskImpl,
        continuation: &TaskGroupContinuationImpl,
        remaining: &AtomicUsize,
    ) {
        if !self.aborted.load(Ordering::SeqCst)
            && let Err(err) = task(thread_index, task_id)
        {
            self.fail(err);
        }
        if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.run_continuation(thread_index, continuation);
        }
    }

    fn run_continuation(&self, thread_index: usize, continuation: &TaskGroupContinuationImpl) {
        if self.aborted.load(Ordering::SeqCst) {
            return;
        }
        if let Err(err) = continuation(thread_index) {
            self.fail(err);
        }
    }

    fn start(self: &Arc<Self>, thread_index: usize, group: TaskGroupId, num_tasks: usize) -> Result<()> {
        if self.aborted.load(Ordering::SeqCst) {
            return Ok(());
        }
        if !self.registration_ended.load(Ordering::SeqCst) {
            return Err(JoinError::state(
                "task group started before registration ended",
            ));
        }
        let (task, continuation, remaining) = {
            let mut groups = self.groups.lock().unwrap_or_else(|e| e.into_inner());
            let entry = groups
                .get_mut(group)
                .ok_or_else(|| JoinError::state(format!("unknown task group {}", group)))?;
            if entry.started {
                return Err(JoinError::state(format!(
                    "task group {} already started",
                    group
                )));
            }
            entry.started = true;
            entry.remaining.store(num_tasks, Ordering::SeqCst);
            (
                Arc::clone(&entry.task),
                Arc::clone(&entry.continuation),
                Arc::clone(&entry.remaining),
            )
        };
        debug!("start task group {} with {} tasks", group, num_tasks);

        if num_tasks == 0 {
            self.enter();
            self.run_continuation(thread_index, &continuation);
            self.leave();
            return Ok(());
        }
        match &self.mode {
            Mode::Pool(pool) => {
                for task_id in 0..num_tasks {
                    self.enter();
                    let shared = Arc::clone(self);
                    let task = Arc::clone(&task);
                    let continuation = Arc::clone(&continuation);
                    let remaining = Arc::clone(&remaining);
                    pool.execute(move || {
                        let idx = shared.indexer.index();
                        shared.run_task(idx, task_id, &task, &continuation, &remaining);
                        shared.leave();
                    });
                }
            }
            Mode::Inline => {
                for task_id in 0..num_tasks {
                    self.enter();
                    self.run_task(thread_index, task_id, &task, &continuation, &remaining);
                    self.leave();
                }
            }
        }
        Ok(())
    }
}

impl TaskScheduler for ThreadPoolTaskScheduler {
    fn register_task_group(
        &self,
        task: TaskImpl,
        continuation: TaskGroupContinuationImpl,
    ) -> TaskGroupId {
        if self.shared.registration_ended.load(Ordering::SeqCst) {
            warn!("task group registered after registration ended");
        }
        let mut groups = self
            .shared
            .groups
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        groups.push(TaskGroup {
            task,
            continuation,
            started: false,
            remaining: Arc::new(AtomicUsize::new(0)),
        });
        groups.len() - 1
    }

    fn register_end(&self) {
        self.shared.registration_ended.store(true, Ordering::SeqCst);
    }

    fn start_task_group(
        &self,
        thread_index: usize,
        group: TaskGroupId,
        num_tasks: usize,
    ) -> Result<()> {
        self.shared.start(thread_index, group, num_tasks)
    }

    fn abort(&self, continuation: AbortContinuationImpl) {
        {
            let mut guard = self
                .shared
                .abort_continuations
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            guard.push(continuation);
        }
        self.shared.aborted.store(true, Ordering::SeqCst);
        if self.shared.in_flight.load(Ordering::SeqCst) == 0 {
            self.shared.fire_abort_continuations();
        }
    }

    fn is_aborted(&self) -> bool {
        self.shared.aborted.load(Ordering::SeqCst)
    }

    fn num_threads(&self) -> usize {
        self.shared.num_threads
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    fn counting_group(
        scheduler: &ThreadPoolTaskScheduler,
        sum: Arc<AtomicU64>,
        continuations: Arc<AtomicUsize>,
    ) -> TaskGroupId {
        scheduler.register_task_group(
            Arc::new(move |_, task_id| {
                sum.fetch_add(task_id as u64, Ordering::SeqCst);
                Ok(())
            }),
            Arc::new(move |_| {
                continuations.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        )
    }

    #[test]
    fn pool_runs_every_task_and_one_continuation() {
        let scheduler = ThreadPoolTaskScheduler::new(4);
        let sum = Arc::new(AtomicU64::new(0));
        let conts = Arc::new(AtomicUsize::new(0));
        let group = counting_group(&scheduler, Arc::clone(&sum), Arc::clone(&conts));
        scheduler.register_end();
        scheduler.start_task_group(0, group, 100).unwrap();
        scheduler.wait_idle();
        assert_eq!(sum.load(Ordering::SeqCst), (0..100).sum::<u64>());
        assert_eq!(conts.load(Ordering::SeqCst), 1);
        assert!(scheduler.start_task_group(0, group, 1).is_err());
    }

    #[test]
    fn inline_mode_and_empty_groups() {
        let scheduler = ThreadPoolTaskScheduler::inline();
        let sum = Arc::new(AtomicU64::new(0));
        let conts = Arc::new(AtomicUsize::new(0));
        let a = counting_group(&scheduler, Arc::clone(&sum), Arc::clone(&conts));
        let b = counting_group(&scheduler, Arc::clone(&sum), Arc::clone(&conts));
        assert!(scheduler.start_task_group(0, a, 1).is_err());
        scheduler.register_end();
        scheduler.start_task_group(0, a, 3).unwrap();
        scheduler.start_task_group(0, b, 0).unwrap();
        assert_eq!(sum.load(Ordering::SeqCst), 3);
        assert_eq!(conts.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.in_flight(), 0);
    }

    #[test]
    fn task_error_aborts_and_is_reported() {
        let scheduler = ThreadPoolTaskScheduler::inline();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = Arc::clone(&seen);
        scheduler.set_error_handler(Arc::new(move |_| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
        }));
        let ran = Arc::new(AtomicUsize::new(0));
        let ran_clone = Arc::clone(&ran);
        let group = scheduler.register_task_group(
            Arc::new(move |_, task_id| {
                ran_clone.fetch_add(1, Ordering::SeqCst);
                if task_id == 1 {
                    Err(JoinError::execution("boom"))
                } else {
                    Ok(())
                }
            }),
            Arc::new(|_| Ok(())),
        );
        scheduler.register_end();
        scheduler.start_task_group(0, group, 4).unwrap();
        assert!(scheduler.is_aborted());
        assert_eq!(ran.load(Ordering::SeqCst), 2);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(matches!(scheduler.first_error(), Some(JoinError::Execution(_))));
    }

    #[test]
    fn abort_continuation_runs_once_when_drained() {
        let scheduler = ThreadPoolTaskScheduler::new(2);
        scheduler.register_end();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = Arc::clone(&fired);
        scheduler.abort(Box::new(move || {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        }));
        scheduler.wait_idle();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(scheduler.is_aborted());
    }

    #[test]
    fn indexer_is_stable_per_thread() {
        let indexer = ThreadIndexer::new(2);
        let a = indexer.index();
        assert_eq!(indexer.index(), a);
        let b = std::thread::scope(|s| s.spawn(|| indexer.index()).join().unwrap());
        assert_ne!(a, b);
    }
}
