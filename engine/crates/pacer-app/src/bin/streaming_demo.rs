//! 生成若干不同尺寸的棋盘格 PNG，通过完整的加载 + 流式上传管线加载，打印每帧统计
//!
//! 用法: `streaming_demo [config.toml]`

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use pacer_app::{App, EngineConfig, FrameContext, OuterApp};
use pacer_asset::{AssetEvent, AssetId, ImageAsset, ImageConfig, LoadStatus};
use pacer_crate_tools::resource::PacerPath;

const TEXTURE_SIZES: &[(u32, u32)] = &[(16, 16), (64, 64), (256, 128), (512, 512), (1024, 1024), (2048, 1024)];

fn write_checkerboard(dir: &Path, width: u32, height: u32) -> anyhow::Result<PathBuf> {
    let path = dir.join(format!("checker_{}x{}.png", width, height));
    let cell = (width.min(height) / 8).max(1);
    image::RgbaImage::from_fn(width, height, |x, y| {
        if ((x / cell) + (y / cell)) % 2 == 0 {
            image::Rgba([230, 230, 230, 255])
        } else {
            image::Rgba([40, 40, 40, 255])
        }
    })
    .save(&path)
    .with_context(|| format!("failed to write {:?}", path))?;
    Ok(path)
}

struct StreamingDemo {
    textures: Vec<AssetId>,
    loaded: usize,
    failed: usize,
}

impl OuterApp for StreamingDemo {
    fn init(&mut self, ctx: &mut FrameContext) -> anyhow::Result<()> {
        let dir = PacerPath::temp_path().join("streaming_demo");
        std::fs::create_dir_all(&dir).with_context(|| format!("failed to create {:?}", dir))?;

        for (width, height) in TEXTURE_SIZES {
            let path = write_checkerboard(&dir, *width, *height)?;
            let config = ImageConfig {
                generate_mips: true,
                srgb: true,
            };
            self.textures.push(ctx.assets.load_from_file::<ImageAsset>(&path, config)?);
        }
        log::info!("streaming {} textures from {:?}", self.textures.len(), dir);
        Ok(())
    }

    fn update(&mut self, ctx: &mut FrameContext, frame_time: Duration) -> anyhow::Result<()> {
        for event in ctx.assets.events().try_iter() {
            match event {
                AssetEvent::Loaded(id) => {
                    self.loaded += 1;
                    let image = ctx.assets.get::<ImageAsset>(id)?;
                    log::info!(
                        "frame {}: loaded {}x{} ({} mips)",
                        ctx.frame_index,
                        image.width,
                        image.height,
                        image.mip_levels
                    );
                }
                AssetEvent::Failed(id, message) => {
                    self.failed += 1;
                    log::error!("frame {}: asset {} failed: {}", ctx.frame_index, id, message);
                }
                AssetEvent::Unloaded(_) => {}
            }
        }

        let stats = ctx.upload_stats;
        if stats.submitted > 0 || stats.completed > 0 {
            log::info!(
                "frame {} ({:.3} ms): submitted {}, completed {}, grown {}, deferred {}, staging {} bytes",
                ctx.frame_index,
                frame_time.as_secs_f64() * 1000.0,
                stats.submitted,
                stats.completed,
                stats.grown,
                stats.deferred,
                ctx.assets.streamer().buffers_size()
            );
        }
        Ok(())
    }

    fn should_exit(&self, ctx: &FrameContext) -> bool {
        self.textures
            .iter()
            .all(|id| matches!(ctx.assets.status(*id), Some(LoadStatus::Loaded | LoadStatus::Failed)))
    }

    fn on_close(&mut self, ctx: &mut FrameContext) {
        log::info!(
            "{} loaded, {} failed after {} frames",
            self.loaded,
            self.failed,
            ctx.frame_index
        );
    }
}

fn main() -> anyhow::Result<()> {
    App::init_env();

    let config = match std::env::args().nth(1) {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };

    let demo = StreamingDemo {
        textures: Vec::new(),
        loaded: 0,
        failed: 0,
    };
    let mut app = App::new(&config, Box::new(demo))?;
    let result = app.run();
    app.destroy();
    result
}
