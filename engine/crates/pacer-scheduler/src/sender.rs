use std::cell::RefCell;
use std::rc::Rc;

use crate::job::{AuxThreadCallback, Job, JobPriority, JobQueue, MainThreadCallback};

/// 调度器的三个队列
pub(crate) struct JobQueues<C> {
    main_thread_priority_jobs: JobQueue<MainThreadCallback<C>>,
    main_thread_jobs: JobQueue<MainThreadCallback<C>>,
    aux_thread_jobs: JobQueue<AuxThreadCallback>,

    next_sequence: u64,
}

impl<C> Default for JobQueues<C> {
    fn default() -> Self {
        Self {
            main_thread_priority_jobs: JobQueue::default(),
            main_thread_jobs: JobQueue::default(),
            aux_thread_jobs: JobQueue::default(),
            next_sequence: 0,
        }
    }
}

impl<C> JobQueues<C> {
    fn next_sequence(&mut self) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        sequence
    }
}

/// 向调度器提交任务的句柄
///
/// 与 [`crate::Scheduler`] 共享同一组队列，只能在主线程使用。
/// 正在执行的主线程任务也可以通过它提交新任务：
/// - 优先任务在本次 `dispatch_jobs` 的优先阶段内执行
/// - 普通任务进入本帧的普通阶段，仍受预算约束
/// - 辅助线程任务在本次 `dispatch_jobs` 结束前提交到线程池
///
/// 优先任务不断提交新的优先任务会让 `dispatch_jobs` 无法返回。
pub struct JobSender<C> {
    queues: Rc<RefCell<JobQueues<C>>>,
}

impl<C> Clone for JobSender<C> {
    fn clone(&self) -> Self {
        Self {
            queues: self.queues.clone(),
        }
    }
}

impl<C> Default for JobSender<C> {
    fn default() -> Self {
        Self {
            queues: Rc::new(RefCell::new(JobQueues::default())),
        }
    }
}

// schedule
impl<C> JobSender<C> {
    /// 本帧必定执行，不受预算限制
    pub fn schedule_main_thread_priority_job<F>(&self, priority: JobPriority, job: F)
    where
        F: FnOnce(&mut C) -> anyhow::Result<()> + 'static,
    {
        let mut queues = self.queues.borrow_mut();
        let job = Job::new(priority, queues.next_sequence(), Box::new(job) as MainThreadCallback<C>);
        queues.main_thread_priority_jobs.push(job);
    }

    /// 受帧预算约束，可能被推迟到之后的帧
    pub fn schedule_main_thread_job<F>(&self, priority: JobPriority, job: F)
    where
        F: FnOnce(&mut C) -> anyhow::Result<()> + 'static,
    {
        let mut queues = self.queues.borrow_mut();
        let job = Job::new(priority, queues.next_sequence(), Box::new(job) as MainThreadCallback<C>);
        queues.main_thread_jobs.push(job);
    }

    /// 下一次提交辅助线程任务时交给线程池，之后调度器不再跟踪它
    pub fn schedule_aux_thread_job<F>(&self, priority: JobPriority, job: F)
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        let mut queues = self.queues.borrow_mut();
        let job = Job::new(priority, queues.next_sequence(), Box::new(job) as AuxThreadCallback);
        queues.aux_thread_jobs.push(job);
    }
}

// 调度器内部使用；借用只在单次 pop 内持有，任务执行时队列可以再次被借用
impl<C> JobSender<C> {
    pub(crate) fn pop_priority_job(&self) -> Option<Job<MainThreadCallback<C>>> {
        self.queues.borrow_mut().main_thread_priority_jobs.pop()
    }

    pub(crate) fn pop_main_thread_job(&self) -> Option<Job<MainThreadCallback<C>>> {
        self.queues.borrow_mut().main_thread_jobs.pop()
    }

    pub(crate) fn pop_aux_thread_job(&self) -> Option<Job<AuxThreadCallback>> {
        self.queues.borrow_mut().aux_thread_jobs.pop()
    }
}

// getters
impl<C> JobSender<C> {
    #[inline]
    pub fn pending_priority_jobs(&self) -> usize {
        self.queues.borrow().main_thread_priority_jobs.len()
    }

    #[inline]
    pub fn pending_main_thread_jobs(&self) -> usize {
        self.queues.borrow().main_thread_jobs.len()
    }

    #[inline]
    pub fn pending_aux_thread_jobs(&self) -> usize {
        self.queues.borrow().aux_thread_jobs.len()
    }
}
