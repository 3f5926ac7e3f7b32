use std::time::Duration;

use crate::app::FrameContext;

/// 外部应用接口 trait
///
/// 定义应用生命周期的关键钩子函数。所有钩子都在主线程调用，
/// `update` 与 `render` 作为优先任务每帧必定执行，不受帧预算限制。
/// 钩子内可以通过 `ctx.jobs` 提交自己的任务，这些任务在本帧调度。
pub trait OuterApp {
    fn init(&mut self, ctx: &mut FrameContext) -> anyhow::Result<()>;

    /// 每帧更新逻辑，`frame_time` 为上一帧调度耗时
    fn update(&mut self, ctx: &mut FrameContext, frame_time: Duration) -> anyhow::Result<()>;

    /// 渲染逻辑（可选），在 `update` 之后执行
    fn render(&mut self, _ctx: &mut FrameContext, _frame_time: Duration) -> anyhow::Result<()> {
        Ok(())
    }

    /// 返回 true 时 `App::run` 结束循环
    fn should_exit(&self, _ctx: &FrameContext) -> bool {
        false
    }

    /// 资源卸载之前调用（可选）
    fn on_close(&mut self, _ctx: &mut FrameContext) {}
}
