use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// 数值越小越先执行
pub type JobPriority = i32;

/// 主线程任务，执行时可以访问调度器的帧上下文
pub type MainThreadCallback<C> = Box<dyn FnOnce(&mut C) -> anyhow::Result<()>>;

/// 辅助线程任务，结果需要由任务自己通过线程安全的 channel 发布
pub type AuxThreadCallback = Box<dyn FnOnce() -> anyhow::Result<()> + Send + 'static>;

/// 一个延迟执行的任务
///
/// 参数通过闭包按值捕获；任务由持有它的队列独占，执行后销毁。
pub struct Job<F> {
    priority: JobPriority,
    /// 提交序号，用于同优先级时保持 FIFO
    sequence: u64,
    callback: F,
}

impl<F> Job<F> {
    pub fn new(priority: JobPriority, sequence: u64, callback: F) -> Self {
        Self {
            priority,
            sequence,
            callback,
        }
    }

    #[inline]
    pub fn priority(&self) -> JobPriority {
        self.priority
    }

    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    #[inline]
    pub fn into_callback(self) -> F {
        self.callback
    }
}

impl<F> PartialEq for Job<F> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}
impl<F> Eq for Job<F> {}

impl<F> PartialOrd for Job<F> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<F> Ord for Job<F> {
    /// BinaryHeap 是大顶堆，这里反转比较结果，使 (priority, sequence) 最小的任务位于堆顶
    fn cmp(&self, other: &Self) -> Ordering {
        other.priority.cmp(&self.priority).then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// 将参数按值绑定到主线程回调上
///
/// ```ignore
/// scheduler.schedule_main_thread_job(0, with_args(|ctx: &mut Ctx, path: PathBuf| ctx.load(path), path));
/// ```
pub fn with_args<C, A, F>(f: F, args: A) -> impl FnOnce(&mut C) -> anyhow::Result<()>
where
    F: FnOnce(&mut C, A) -> anyhow::Result<()>,
{
    move |ctx| f(ctx, args)
}

/// 基于 BinaryHeap 的优先级队列
pub(crate) struct JobQueue<F> {
    heap: BinaryHeap<Job<F>>,
}

impl<F> Default for JobQueue<F> {
    fn default() -> Self {
        Self { heap: BinaryHeap::new() }
    }
}

impl<F> JobQueue<F> {
    #[inline]
    pub fn push(&mut self, job: Job<F>) {
        self.heap.push(job);
    }

    #[inline]
    pub fn pop(&mut self) -> Option<Job<F>> {
        self.heap.pop()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.heap.len()
    }
}
