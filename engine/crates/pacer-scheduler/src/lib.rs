//! 帧预算调度器
//!
//! 三个队列：
//! - 主线程优先任务：每帧必定全部执行，不受预算限制
//! - 主线程普通任务：受 `max_frame_time` 预算约束，超出预算的任务推迟到下一帧
//! - 辅助线程任务：每帧提交到 rayon 线程池，不计入帧预算
//!
//! 同优先级任务按提交顺序 (FIFO) 执行。
//! 帧内的任务可以通过 [`JobSender`] 继续提交任务。

pub mod job;
pub mod scheduler;
pub mod sender;

pub use job::{AuxThreadCallback, Job, JobPriority, MainThreadCallback, with_args};
pub use scheduler::{DispatchStats, Scheduler, SchedulerConfig, SchedulerError, SchedulerPolicy};
pub use sender::JobSender;
