use std::time::Duration;

use anyhow::Context;
use pacer_asset::{AssetHub, UploadStats};
use pacer_crate_tools::init_log::init_log;
use pacer_gfx::UploadDevice;
use pacer_scheduler::{DispatchStats, JobPriority, JobSender, Scheduler};

use crate::config::EngineConfig;
use crate::outer_app::OuterApp;

/// 资源 finalize 任务的优先级
const LOADING_JOB_PRIORITY: JobPriority = 2;
/// 纹理上传任务的优先级，数值更小，先于 finalize 执行
const TEXTURE_UPLOAD_JOB_PRIORITY: JobPriority = 1;

pub fn panic_handler(info: &std::panic::PanicHookInfo) {
    log::error!("{}", info);
}

/// 使用方提交任务的句柄，主线程任务执行时拿到 [`FrameContext`]
///
/// 在 `update` / `render` 中提交的任务于本帧的 `dispatch_jobs` 内执行：
/// 普通任务受帧预算约束，辅助线程任务在本帧结束前提交到线程池。
#[derive(Clone)]
pub struct FrameJobs {
    sender: JobSender<AppState>,
}

impl FrameJobs {
    pub fn schedule_main_thread_priority_job<F>(&self, priority: JobPriority, job: F)
    where
        F: FnOnce(&mut FrameContext) -> anyhow::Result<()> + 'static,
    {
        self.sender
            .schedule_main_thread_priority_job(priority, move |state: &mut AppState| job(&mut state.frame));
    }

    pub fn schedule_main_thread_job<F>(&self, priority: JobPriority, job: F)
    where
        F: FnOnce(&mut FrameContext) -> anyhow::Result<()> + 'static,
    {
        self.sender
            .schedule_main_thread_job(priority, move |state: &mut AppState| job(&mut state.frame));
    }

    pub fn schedule_aux_thread_job<F>(&self, priority: JobPriority, job: F)
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.sender.schedule_aux_thread_job(priority, job);
    }
}

/// 每帧任务可以访问的主线程状态
pub struct FrameContext {
    pub assets: AssetHub,
    pub device: Box<dyn UploadDevice>,
    pub jobs: FrameJobs,

    /// 已经完成的帧数
    pub frame_index: u64,
    /// 最近一次纹理上传任务的统计
    pub upload_stats: UploadStats,
    /// 最近一次 finalize 任务处理的资源数
    pub finalized_count: usize,
}

/// 调度器的任务上下文
struct AppState {
    frame: FrameContext,
    outer_app: Box<dyn OuterApp>,

    // 普通任务可能被推迟，已经在队列中时不再重复提交
    loading_job_queued: bool,
    upload_job_queued: bool,
}

/// 帧循环
///
/// 每帧：
/// 1. 优先任务：`OuterApp::update`、`OuterApp::render`
/// 2. 普通任务：纹理上传（优先级 1）、资源 finalize（优先级 2），受帧预算约束
/// 3. `dispatch_jobs`，记录本帧耗时作为下一帧的 `frame_time`
pub struct App {
    scheduler: Scheduler<AppState>,
    state: AppState,

    frame_time: Duration,
}

// new & init
impl App {
    pub fn new(config: &EngineConfig, mut outer_app: Box<dyn OuterApp>) -> anyhow::Result<Self> {
        let _span = tracy_client::span!("App::new");

        let scheduler = Scheduler::new(&config.scheduler).context("failed to create scheduler")?;
        let mut device = config.gfx.create_device().context("failed to create upload device")?;
        let assets = AssetHub::new(&config.assets, &config.streaming, device.as_mut())
            .context("failed to create asset hub")?;

        let mut frame = FrameContext {
            assets,
            device,
            jobs: FrameJobs {
                sender: scheduler.job_sender(),
            },
            frame_index: 0,
            upload_stats: UploadStats::default(),
            finalized_count: 0,
        };

        {
            let _span = tracy_client::span!("OuterApp::init");
            outer_app.init(&mut frame).context("failed to init app")?;
        }

        Ok(Self {
            scheduler,
            state: AppState {
                frame,
                outer_app,
                loading_job_queued: false,
                upload_job_queued: false,
            },
            frame_time: Duration::ZERO,
        })
    }

    pub fn init_env() {
        std::panic::set_hook(Box::new(panic_handler));

        init_log();

        tracy_client::Client::start();
        tracy_client::set_thread_name!("MainThread");
    }
}

// destroy
impl App {
    pub fn destroy(self) {
        let Self { state, .. } = self;
        let AppState {
            mut frame,
            mut outer_app,
            ..
        } = state;

        outer_app.on_close(&mut frame);
        drop(outer_app);

        let FrameContext {
            assets, mut device, ..
        } = frame;
        assets.destroy(device.as_mut());
        log::info!("app destroyed");
    }
}

// update
impl App {
    /// 运行直到 `OuterApp::should_exit` 返回 true
    pub fn run(&mut self) -> anyhow::Result<()> {
        while !self.state.outer_app.should_exit(&self.state.frame) {
            self.run_frame()?;
        }
        log::info!("main loop finished after {} frames", self.state.frame.frame_index);
        Ok(())
    }

    /// 调度并执行一帧，返回本帧耗时
    pub fn run_frame(&mut self) -> anyhow::Result<Duration> {
        let _span = tracy_client::span!("App::run_frame");
        let frame_time = self.frame_time;

        self.scheduler.schedule_main_thread_priority_job(0, move |state: &mut AppState| {
            let _span = tracy_client::span!("OuterApp::update");
            state.outer_app.update(&mut state.frame, frame_time)
        });
        self.scheduler.schedule_main_thread_priority_job(0, move |state: &mut AppState| {
            let _span = tracy_client::span!("OuterApp::render");
            state.outer_app.render(&mut state.frame, frame_time)
        });

        // 两个任务都执行完之后才重新提交，零预算下 finalize 不会被上传任务饿死
        if !self.state.upload_job_queued && !self.state.loading_job_queued {
            self.state.upload_job_queued = true;
            self.scheduler.schedule_main_thread_job(TEXTURE_UPLOAD_JOB_PRIORITY, |state: &mut AppState| {
                state.upload_job_queued = false;
                let frame = &mut state.frame;
                frame.upload_stats = frame.assets.process_texture_uploads(frame.device.as_mut())?;
                Ok(())
            });

            self.state.loading_job_queued = true;
            self.scheduler.schedule_main_thread_job(LOADING_JOB_PRIORITY, |state: &mut AppState| {
                state.loading_job_queued = false;
                let frame = &mut state.frame;
                frame.finalized_count = frame.assets.process_loading_queue(frame.device.as_mut())?;
                Ok(())
            });
        }

        self.frame_time = self.scheduler.dispatch_jobs(&mut self.state)?;
        self.state.frame.frame_index += 1;
        tracy_client::frame_mark();

        Ok(self.frame_time)
    }
}

// getters
impl App {
    #[inline]
    pub fn frame(&self) -> &FrameContext {
        &self.state.frame
    }

    #[inline]
    pub fn frame_mut(&mut self) -> &mut FrameContext {
        &mut self.state.frame
    }

    /// 上一帧的调度耗时
    #[inline]
    pub fn frame_time(&self) -> Duration {
        self.frame_time
    }

    #[inline]
    pub fn last_dispatch_stats(&self) -> DispatchStats {
        self.scheduler.last_dispatch_stats()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::path::PathBuf;
    use std::rc::Rc;

    use pacer_asset::{AssetEvent, AssetId, ImageAsset, ImageConfig, LoadStatus};
    use pacer_scheduler::SchedulerPolicy;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        calls: Rc<RefCell<Vec<&'static str>>>,
        texture: Option<PathBuf>,
        texture_id: Option<AssetId>,
        frames: u64,
    }

    impl OuterApp for Recorder {
        fn init(&mut self, ctx: &mut FrameContext) -> anyhow::Result<()> {
            self.calls.borrow_mut().push("init");
            if let Some(path) = &self.texture {
                self.texture_id = Some(ctx.assets.load_from_file::<ImageAsset>(path, ImageConfig::default())?);
            }
            Ok(())
        }

        fn update(&mut self, _ctx: &mut FrameContext, _frame_time: Duration) -> anyhow::Result<()> {
            self.calls.borrow_mut().push("update");
            self.frames += 1;
            Ok(())
        }

        fn render(&mut self, _ctx: &mut FrameContext, _frame_time: Duration) -> anyhow::Result<()> {
            self.calls.borrow_mut().push("render");
            Ok(())
        }

        fn should_exit(&self, ctx: &FrameContext) -> bool {
            match self.texture_id {
                Some(id) => ctx.assets.status(id) == Some(LoadStatus::Loaded),
                None => self.frames >= 3,
            }
        }

        fn on_close(&mut self, _ctx: &mut FrameContext) {
            self.calls.borrow_mut().push("close");
        }
    }

    #[test]
    fn test_update_runs_before_render_every_frame() {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let recorder = Recorder {
            calls: calls.clone(),
            ..Default::default()
        };

        let mut app = App::new(&EngineConfig::default(), Box::new(recorder)).unwrap();
        app.run().unwrap();
        assert_eq!(app.frame().frame_index, 3);
        app.destroy();

        assert_eq!(
            calls.borrow().as_slice(),
            &["init", "update", "render", "update", "render", "update", "render", "close"]
        );
    }

    struct JobSubmitter {
        calls: Rc<RefCell<Vec<&'static str>>>,
        aux_sender: crossbeam_channel::Sender<&'static str>,
    }

    impl OuterApp for JobSubmitter {
        fn init(&mut self, _ctx: &mut FrameContext) -> anyhow::Result<()> {
            Ok(())
        }

        fn update(&mut self, ctx: &mut FrameContext, _frame_time: Duration) -> anyhow::Result<()> {
            self.calls.borrow_mut().push("update");
            if ctx.frame_index == 0 {
                let calls = self.calls.clone();
                ctx.jobs.schedule_main_thread_job(0, move |frame: &mut FrameContext| {
                    calls.borrow_mut().push("job");
                    assert_eq!(frame.frame_index, 0);
                    Ok(())
                });
                let aux_sender = self.aux_sender.clone();
                ctx.jobs.schedule_aux_thread_job(0, move || {
                    aux_sender.send("aux")?;
                    Ok(())
                });
            }
            Ok(())
        }

        fn render(&mut self, _ctx: &mut FrameContext, _frame_time: Duration) -> anyhow::Result<()> {
            self.calls.borrow_mut().push("render");
            Ok(())
        }
    }

    #[test]
    fn test_update_can_schedule_jobs_for_the_same_frame() {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let (aux_sender, aux_receiver) = crossbeam_channel::unbounded();
        let submitter = JobSubmitter {
            calls: calls.clone(),
            aux_sender,
        };

        let mut config = EngineConfig::default();
        config.scheduler.max_frame_time = 10.0;
        let mut app = App::new(&config, Box::new(submitter)).unwrap();
        app.run_frame().unwrap();

        assert_eq!(calls.borrow().as_slice(), &["update", "render", "job"]);
        let stats = app.last_dispatch_stats();
        assert_eq!(stats.aux_submitted, 1);
        assert_eq!(aux_receiver.recv_timeout(Duration::from_secs(5)).unwrap(), "aux");

        app.run_frame().unwrap();
        assert_eq!(calls.borrow().as_slice(), &["update", "render", "job", "update", "render"]);
        app.destroy();
    }

    #[test]
    fn test_frame_loop_streams_texture_under_zero_budget() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checker.png");
        image::RgbaImage::from_fn(32, 32, |x, y| image::Rgba([x as u8, y as u8, 0, 255]))
            .save(&path)
            .unwrap();

        let mut config = EngineConfig::default();
        // 预算为 0 时 relaxed 策略每帧仍然至少执行一个普通任务
        config.scheduler.max_frame_time = 0.0;
        config.scheduler.policy = SchedulerPolicy::Relaxed;

        let recorder = Recorder {
            texture: Some(path),
            ..Default::default()
        };
        let mut app = App::new(&config, Box::new(recorder)).unwrap();

        let mut frames = 0;
        let mut loaded = false;
        while !loaded {
            assert!(frames < 10_000, "texture never finished streaming");
            app.run_frame().unwrap();
            frames += 1;
            loaded = app.frame().assets.events().try_iter().any(|event| matches!(event, AssetEvent::Loaded(_)));
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(app.last_dispatch_stats().regular_run >= 1);
        app.destroy();
    }
}
