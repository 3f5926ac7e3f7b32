use crate::job::{Job, JobPriority, MainThreadCallback};
use crate::sender::JobSender;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// 超出帧预算时普通主线程任务的处理策略
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerPolicy {
    /// 优先任务执行完后若已超出预算，本帧不再启动任何普通任务
    Strict,
    /// 即使已经超出预算，也至少执行一个普通任务，避免普通队列在持续高负载下饿死
    #[default]
    Relaxed,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// 单帧预算，单位秒
    pub max_frame_time: f64,
    pub policy: SchedulerPolicy,
    /// 辅助线程池的线程数
    pub max_threads: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_frame_time: 1.0 / 60.0,
            policy: SchedulerPolicy::Relaxed,
            max_threads: 4,
        }
    }
}

impl SchedulerConfig {
    /// 非正数视为 0 预算，无穷大或溢出视为无限预算
    pub fn max_frame_duration(&self) -> Duration {
        if self.max_frame_time.is_nan() || self.max_frame_time <= 0.0 {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(self.max_frame_time).unwrap_or(Duration::MAX)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("failed to build aux thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// 主线程任务返回了错误；调度器不会重试，剩余任务保留在队列中
    #[error("main thread job with priority {priority} failed")]
    Job {
        priority: JobPriority,
        #[source]
        source: anyhow::Error,
    },
}

/// 最近一次 `dispatch_jobs` 的统计
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub aux_submitted: usize,
    pub priority_run: usize,
    pub regular_run: usize,
    /// 推迟到下一帧的普通任务数量
    pub regular_deferred: usize,
    pub elapsed: Duration,
}

/// 帧预算调度器
///
/// `C` 是主线程任务执行时可以访问的帧上下文，例如资源中心、GPU 设备等。
/// 主线程任务不要求 `Send`；辅助线程任务必须是 `Send + 'static` 的。
/// 队列与 [`JobSender`] 共享，帧上下文中持有 sender 的任务可以继续提交任务。
pub struct Scheduler<C = ()> {
    max_frame_time: Duration,
    policy: SchedulerPolicy,

    jobs: JobSender<C>,

    aux_thread_pool: rayon::ThreadPool,

    last_stats: DispatchStats,
}
// new & init
impl<C> Scheduler<C> {
    pub fn new(config: &SchedulerConfig) -> Result<Self, SchedulerError> {
        let aux_thread_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.max_threads.max(1))
            .thread_name(|index| format!("Scheduler-Aux-{}", index))
            .build()?;

        log::info!(
            "Scheduler created: max_frame_time = {:?}, policy = {:?}, aux threads = {}",
            config.max_frame_duration(),
            config.policy,
            aux_thread_pool.current_num_threads()
        );

        Ok(Self {
            max_frame_time: config.max_frame_duration(),
            policy: config.policy,
            jobs: JobSender::default(),
            aux_thread_pool,
            last_stats: DispatchStats::default(),
        })
    }
}
// schedule
impl<C> Scheduler<C> {
    /// 本帧必定执行，不受预算限制
    pub fn schedule_main_thread_priority_job<F>(&mut self, priority: JobPriority, job: F)
    where
        F: FnOnce(&mut C) -> anyhow::Result<()> + 'static,
    {
        self.jobs.schedule_main_thread_priority_job(priority, job);
    }

    /// 受帧预算约束，可能被推迟到之后的帧
    pub fn schedule_main_thread_job<F>(&mut self, priority: JobPriority, job: F)
    where
        F: FnOnce(&mut C) -> anyhow::Result<()> + 'static,
    {
        self.jobs.schedule_main_thread_job(priority, job);
    }

    /// 下一次 `dispatch_jobs` 时提交到线程池，之后调度器不再跟踪它
    pub fn schedule_aux_thread_job<F>(&mut self, priority: JobPriority, job: F)
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.jobs.schedule_aux_thread_job(priority, job);
    }

    /// 与调度器共享队列的提交句柄
    #[inline]
    pub fn job_sender(&self) -> JobSender<C> {
        self.jobs.clone()
    }
}
// dispatch
impl<C> Scheduler<C> {
    /// 执行一帧的任务，返回本次调度消耗的时间
    ///
    /// 顺序：提交辅助线程任务 -> 执行全部优先任务 -> 按策略和预算执行普通任务。
    /// 主线程任务在本帧提交的辅助线程任务会在返回前提交到线程池。
    /// 任务返回的错误会直接传播给调用者，剩余任务留在队列中。
    pub fn dispatch_jobs(&mut self, ctx: &mut C) -> Result<Duration, SchedulerError> {
        let _span = tracy_client::span!("Scheduler::dispatch_jobs");
        let start = Instant::now();

        let mut stats = DispatchStats {
            aux_submitted: self.dispatch_aux_thread_jobs(),
            ..Default::default()
        };
        stats.priority_run = self.dispatch_priority_jobs(ctx)?;

        if self.policy == SchedulerPolicy::Strict && self.max_frame_time_exceeded(start) {
            log::debug!(
                "Frame budget exhausted by priority jobs, deferring {} main thread jobs",
                self.jobs.pending_main_thread_jobs()
            );
        } else {
            stats.regular_run = self.dispatch_main_thread_jobs(ctx, start)?;
        }
        stats.aux_submitted += self.dispatch_aux_thread_jobs();

        stats.regular_deferred = self.jobs.pending_main_thread_jobs();
        stats.elapsed = start.elapsed();
        self.last_stats = stats;

        Ok(stats.elapsed)
    }

    fn dispatch_aux_thread_jobs(&mut self) -> usize {
        let _span = tracy_client::span!("Scheduler::dispatch_aux_thread_jobs");
        let mut submitted = 0;
        while let Some(job) = self.jobs.pop_aux_thread_job() {
            let priority = job.priority();
            let callback = job.into_callback();
            self.aux_thread_pool.spawn(move || {
                let _span = tracy_client::span!("Scheduler::aux_job");
                if let Err(e) = callback() {
                    log::error!("Aux thread job with priority {} failed: {:#}", priority, e);
                }
            });
            submitted += 1;
        }
        submitted
    }

    fn dispatch_priority_jobs(&mut self, ctx: &mut C) -> Result<usize, SchedulerError> {
        let _span = tracy_client::span!("Scheduler::dispatch_priority_jobs");
        let mut executed = 0;
        while let Some(job) = self.jobs.pop_priority_job() {
            Self::run_main_thread_job(job, ctx)?;
            executed += 1;
        }
        Ok(executed)
    }

    fn dispatch_main_thread_jobs(&mut self, ctx: &mut C, start: Instant) -> Result<usize, SchedulerError> {
        let _span = tracy_client::span!("Scheduler::dispatch_main_thread_jobs");
        let mut executed = 0;
        while let Some(job) = self.jobs.pop_main_thread_job() {
            Self::run_main_thread_job(job, ctx)?;
            executed += 1;

            // 先执行再检查预算：进入这里的帧至少会执行一个普通任务
            if self.max_frame_time_exceeded(start) {
                let deferred = self.jobs.pending_main_thread_jobs();
                if deferred > 0 {
                    log::debug!("Max frame time exceeded, {} main thread jobs deferred to next frame", deferred);
                }
                break;
            }
        }
        Ok(executed)
    }

    fn run_main_thread_job(job: Job<MainThreadCallback<C>>, ctx: &mut C) -> Result<(), SchedulerError> {
        let priority = job.priority();
        (job.into_callback())(ctx).map_err(|source| SchedulerError::Job { priority, source })
    }

    /// 预算为 0 时视为始终超出
    #[inline]
    fn max_frame_time_exceeded(&self, start: Instant) -> bool {
        start.elapsed() >= self.max_frame_time
    }
}
// getters & setters
impl<C> Scheduler<C> {
    #[inline]
    pub fn policy(&self) -> SchedulerPolicy {
        self.policy
    }

    #[inline]
    pub fn set_policy(&mut self, policy: SchedulerPolicy) {
        self.policy = policy;
    }

    #[inline]
    pub fn max_frame_time(&self) -> Duration {
        self.max_frame_time
    }

    #[inline]
    pub fn set_max_frame_time(&mut self, max_frame_time: Duration) {
        self.max_frame_time = max_frame_time;
    }

    #[inline]
    pub fn pending_priority_jobs(&self) -> usize {
        self.jobs.pending_priority_jobs()
    }

    #[inline]
    pub fn pending_main_thread_jobs(&self) -> usize {
        self.jobs.pending_main_thread_jobs()
    }

    #[inline]
    pub fn pending_aux_thread_jobs(&self) -> usize {
        self.jobs.pending_aux_thread_jobs()
    }

    #[inline]
    pub fn last_dispatch_stats(&self) -> DispatchStats {
        self.last_stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn scheduler(max_frame_time: f64, policy: SchedulerPolicy) -> Scheduler<Vec<i32>> {
        Scheduler::new(&SchedulerConfig {
            max_frame_time,
            policy,
            max_threads: 2,
        })
        .unwrap()
    }

    fn push_value(scheduler: &mut Scheduler<Vec<i32>>, priority: JobPriority, value: i32) {
        scheduler.schedule_main_thread_job(priority, move |log: &mut Vec<i32>| {
            log.push(value);
            Ok(())
        });
    }

    fn push_slow_value(scheduler: &mut Scheduler<Vec<i32>>, priority: JobPriority, value: i32, cost: Duration) {
        scheduler.schedule_main_thread_job(priority, move |log: &mut Vec<i32>| {
            thread::sleep(cost);
            log.push(value);
            Ok(())
        });
    }

    #[test]
    fn test_lower_priority_runs_first() {
        let mut scheduler = scheduler(10.0, SchedulerPolicy::Strict);
        push_value(&mut scheduler, 3, 3);
        push_value(&mut scheduler, 1, 1);
        push_value(&mut scheduler, 2, 2);
        scheduler.schedule_main_thread_priority_job(7, |log: &mut Vec<i32>| {
            log.push(70);
            Ok(())
        });
        scheduler.schedule_main_thread_priority_job(-7, |log: &mut Vec<i32>| {
            log.push(-70);
            Ok(())
        });

        let mut log = Vec::new();
        scheduler.dispatch_jobs(&mut log).unwrap();

        // 优先任务严格先于普通任务
        assert_eq!(log, vec![-70, 70, 1, 2, 3]);
    }

    #[test]
    fn test_equal_priority_keeps_submission_order() {
        let mut scheduler = scheduler(10.0, SchedulerPolicy::Relaxed);
        for value in 0..10 {
            push_value(&mut scheduler, 0, value);
        }

        let mut log = Vec::new();
        scheduler.dispatch_jobs(&mut log).unwrap();
        assert_eq!(log, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_strict_budget_runs_first_job_and_defers_rest() {
        let mut scheduler = scheduler(0.005, SchedulerPolicy::Strict);
        for value in 0..3 {
            push_slow_value(&mut scheduler, value, value, Duration::from_millis(15));
        }

        let mut log = Vec::new();
        scheduler.dispatch_jobs(&mut log).unwrap();
        assert_eq!(log, vec![0]);
        assert_eq!(scheduler.pending_main_thread_jobs(), 2);
        assert_eq!(scheduler.last_dispatch_stats().regular_deferred, 2);

        scheduler.dispatch_jobs(&mut log).unwrap();
        assert_eq!(log, vec![0, 1]);
        assert_eq!(scheduler.pending_main_thread_jobs(), 1);
    }

    #[test]
    fn test_strict_skips_regular_jobs_when_priority_jobs_exhaust_budget() {
        let mut scheduler = scheduler(0.001, SchedulerPolicy::Strict);
        scheduler.schedule_main_thread_priority_job(0, |_: &mut Vec<i32>| {
            thread::sleep(Duration::from_millis(5));
            Ok(())
        });
        push_value(&mut scheduler, 0, 1);

        let mut log = Vec::new();
        scheduler.dispatch_jobs(&mut log).unwrap();
        assert!(log.is_empty());
        assert_eq!(scheduler.pending_main_thread_jobs(), 1);
    }

    #[test]
    fn test_relaxed_runs_one_job_even_when_over_budget() {
        let mut scheduler = scheduler(0.001, SchedulerPolicy::Relaxed);
        scheduler.schedule_main_thread_priority_job(0, |_: &mut Vec<i32>| {
            thread::sleep(Duration::from_millis(5));
            Ok(())
        });
        for value in 0..3 {
            push_value(&mut scheduler, 0, value);
        }

        let mut log = Vec::new();
        scheduler.dispatch_jobs(&mut log).unwrap();
        assert_eq!(log, vec![0]);
        let stats = scheduler.last_dispatch_stats();
        assert_eq!(stats.priority_run, 1);
        assert_eq!(stats.regular_run, 1);
        assert_eq!(stats.regular_deferred, 2);
    }

    #[test]
    fn test_zero_budget_frame_runs_aux_and_priority_jobs_only() {
        let mut scheduler = scheduler(0.0, SchedulerPolicy::Strict);
        let (tx, rx) = crossbeam_channel::unbounded();
        for index in 0..3 {
            let tx = tx.clone();
            scheduler.schedule_aux_thread_job(index, move || {
                tx.send(index)?;
                Ok(())
            });
        }
        for value in 0..2 {
            scheduler.schedule_main_thread_priority_job(value, move |log: &mut Vec<i32>| {
                log.push(value);
                Ok(())
            });
        }
        push_value(&mut scheduler, 0, 100);

        let mut log = Vec::new();
        scheduler.dispatch_jobs(&mut log).unwrap();

        let stats = scheduler.last_dispatch_stats();
        assert_eq!(stats.aux_submitted, 3);
        assert_eq!(stats.priority_run, 2);
        assert_eq!(stats.regular_run, 0);
        assert_eq!(log, vec![0, 1]);
        assert_eq!(scheduler.pending_aux_thread_jobs(), 0);
        assert_eq!(scheduler.pending_main_thread_jobs(), 1);

        let mut received: Vec<_> =
            (0..3).map(|_| rx.recv_timeout(Duration::from_secs(5)).expect("aux job did not run")).collect();
        received.sort();
        assert_eq!(received, vec![0, 1, 2]);
    }

    #[test]
    fn test_job_error_propagates_and_keeps_remaining_jobs() {
        let mut scheduler = scheduler(10.0, SchedulerPolicy::Relaxed);
        push_value(&mut scheduler, 0, 1);
        scheduler.schedule_main_thread_job(1, |_: &mut Vec<i32>| anyhow::bail!("boom"));
        push_value(&mut scheduler, 2, 3);

        let mut log = Vec::new();
        let err = scheduler.dispatch_jobs(&mut log).unwrap_err();
        match err {
            SchedulerError::Job { priority, source } => {
                assert_eq!(priority, 1);
                assert_eq!(source.to_string(), "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(log, vec![1]);
        assert_eq!(scheduler.pending_main_thread_jobs(), 1);

        scheduler.dispatch_jobs(&mut log).unwrap();
        assert_eq!(log, vec![1, 3]);
    }

    #[test]
    fn test_jobs_scheduled_by_running_jobs_run_in_the_same_frame() {
        let mut scheduler = scheduler(10.0, SchedulerPolicy::Strict);
        let sender = scheduler.job_sender();
        let (tx, rx) = crossbeam_channel::unbounded();

        scheduler.schedule_main_thread_priority_job(0, move |log: &mut Vec<i32>| {
            log.push(0);
            sender.schedule_main_thread_job(5, |log: &mut Vec<i32>| {
                log.push(2);
                Ok(())
            });
            sender.schedule_main_thread_priority_job(9, |log: &mut Vec<i32>| {
                log.push(1);
                Ok(())
            });
            sender.schedule_aux_thread_job(0, move || {
                tx.send(42)?;
                Ok(())
            });
            Ok(())
        });

        let mut log = Vec::new();
        scheduler.dispatch_jobs(&mut log).unwrap();
        assert_eq!(log, vec![0, 1, 2]);

        let stats = scheduler.last_dispatch_stats();
        assert_eq!((stats.priority_run, stats.regular_run, stats.aux_submitted), (2, 1, 1));
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 42);
    }

    #[test]
    fn test_with_args_job_keeps_its_priority() {
        let mut scheduler = scheduler(10.0, SchedulerPolicy::Relaxed);
        push_value(&mut scheduler, 2, 2);
        scheduler.schedule_main_thread_job(
            1,
            crate::job::with_args(
                |log: &mut Vec<i32>, values: Vec<i32>| {
                    log.extend(values);
                    Ok(())
                },
                vec![10, 11],
            ),
        );

        let mut log = Vec::new();
        scheduler.dispatch_jobs(&mut log).unwrap();
        assert_eq!(log, vec![10, 11, 2]);
    }

    #[test]
    fn test_max_frame_duration_conversion() {
        let mut config = SchedulerConfig::default();
        config.max_frame_time = f64::INFINITY;
        assert_eq!(config.max_frame_duration(), Duration::MAX);
        config.max_frame_time = -1.0;
        assert_eq!(config.max_frame_duration(), Duration::ZERO);
        config.max_frame_time = 0.5;
        assert_eq!(config.max_frame_duration(), Duration::from_millis(500));
    }
}
