use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use crossbeam_utils::Backoff;
use crossbeam_utils::sync::WaitGroup;

use crate::assets::{self, AssetConfig, LoadData};
use crate::error::AssetError;
use crate::handle::{AssetId, AssetKind, AssetSource};
use crate::loaders::LoaderRegistry;

pub struct LoadRequest {
    pub id: AssetId,
    pub kind: AssetKind,
    pub source: AssetSource,
    pub config: AssetConfig,
}

/// 后台解码的结果，只携带 id，主线程据此找到对应的 slot
pub struct LoadCompletion {
    pub id: AssetId,
    pub result: Result<LoadData, AssetError>,
}

/// 负责管理后台 IO 与解码任务
///
/// ## 架构设计
/// - 内部的 dispatch 线程接收加载请求，分发给 rayon 线程池
/// - 请求队列无界，主线程提交请求永远不会阻塞
/// - 完成队列有界：队列满时工作线程记录警告并阻塞等待，结果永远不会被丢弃
///
/// ## 线程生命周期
/// dispatch 线程的生命周期与 `IoWorker` 绑定。Drop 时：
/// 1. 销毁 `request_sender`，dispatch 线程的 `recv()` 返回错误并退出循环
/// 2. dispatch 线程通过 `WaitGroup` 等待所有已分发的任务完成
/// 3. 主线程一边清空完成队列一边等待 dispatch 线程退出，避免工作线程阻塞在满队列上
pub struct IoWorker {
    request_sender: Option<Sender<LoadRequest>>,
    result_receiver: Receiver<LoadCompletion>,

    dispatch_thread: Option<thread::JoinHandle<()>>,

    /// 已提交但结果尚未进入完成队列的任务数
    in_flight: Arc<AtomicUsize>,
}

// new & init
impl IoWorker {
    pub fn new(max_threads: usize, queue_capacity: usize, loaders: Arc<LoaderRegistry>) -> Result<Self, AssetError> {
        let (request_tx, request_rx) = crossbeam_channel::unbounded::<LoadRequest>();
        let (result_tx, result_rx) = crossbeam_channel::bounded::<LoadCompletion>(queue_capacity.max(1));

        // Rayon 线程池，用于执行实际的加载任务
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(max_threads.max(1))
            .thread_name(|index| format!("Asset-Loader-{}", index))
            .build()?;

        let in_flight = Arc::new(AtomicUsize::new(0));
        let task_in_flight = in_flight.clone();

        // 调度线程，负责接收请求并分发任务
        let dispatch_thread = thread::Builder::new()
            .name("AssetDispatchThread".to_string())
            .spawn(move || {
                let wait_group = WaitGroup::new();

                while let Ok(request) = request_rx.recv() {
                    let _span = tracy_client::span!("IoWorker::dispatch");

                    let result_tx = result_tx.clone();
                    let loaders = loaders.clone();
                    let in_flight = task_in_flight.clone();
                    // 任务结束时闭包销毁，wg_task 随之 drop
                    let wg_task = wait_group.clone();

                    pool.spawn(move || {
                        let id = request.id;
                        let result = load_task(&loaders, request);
                        send_completion(&result_tx, LoadCompletion { id, result });
                        in_flight.fetch_sub(1, Ordering::AcqRel);

                        drop(wg_task);
                    });
                }

                // 等待所有任务完成
                wait_group.wait();
            })
            .map_err(AssetError::Spawn)?;

        Ok(Self {
            request_sender: Some(request_tx),
            result_receiver: result_rx,
            dispatch_thread: Some(dispatch_thread),
            in_flight,
        })
    }
}

// tools
impl IoWorker {
    pub fn request_load(&self, request: LoadRequest) {
        let Some(sender) = &self.request_sender else {
            return;
        };
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        if let Err(e) = sender.send(request) {
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
            log::error!("Failed to send asset load request: {}", e);
        }
    }

    #[inline]
    pub fn try_recv(&self) -> Option<LoadCompletion> {
        self.result_receiver.try_recv().ok()
    }
}

// getters
impl IoWorker {
    /// 仍在后台执行或等待进入完成队列的任务数
    #[inline]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// 完成队列中等待主线程处理的结果数
    #[inline]
    pub fn completed(&self) -> usize {
        self.result_receiver.len()
    }
}

impl Drop for IoWorker {
    fn drop(&mut self) {
        // 必须先 drop sender，否则 recv 会一直阻塞，导致 join 死锁
        self.request_sender = None;

        log::info!("IoWorker is being dropped, waiting for tasks to complete...");
        if let Some(thread) = self.dispatch_thread.take() {
            let backoff = Backoff::new();
            while !thread.is_finished() {
                while self.result_receiver.try_recv().is_ok() {}
                backoff.snooze();
            }
            if thread.join().is_err() {
                log::error!("Failed to join asset dispatch thread");
            }
        }
        log::info!("All asset load tasks completed, IoWorker dropped.");
    }
}

fn send_completion(sender: &Sender<LoadCompletion>, completion: LoadCompletion) {
    match sender.try_send(completion) {
        Ok(()) => {}
        Err(TrySendError::Full(completion)) => {
            log::warn!("Asset completion queue is full, worker blocks until the main thread drains it");
            if sender.send(completion).is_err() {
                log::debug!("Asset completion dropped: receiver is gone");
            }
        }
        Err(TrySendError::Disconnected(_)) => {
            log::debug!("Asset completion dropped: receiver is gone");
        }
    }
}

/// 实际的加载任务 (运行在 Rayon 线程池中)
/// 执行: 读取数据 -> 按 kind 选择 loader 解码
fn load_task(loaders: &LoaderRegistry, request: LoadRequest) -> Result<LoadData, AssetError> {
    let _span = tracy_client::span!("IoWorker::load_task");
    log::debug!("Loading {:?} asset {} from {:?}", request.kind, request.id, request.source);

    let bytes = read_source(&request.source)?;
    assets::decode(request.kind, &bytes, &request.config, loaders)
}

pub(crate) fn read_source(source: &AssetSource) -> Result<Vec<u8>, AssetError> {
    match source {
        AssetSource::Standalone(path) => fs::read(path).map_err(|source| AssetError::Io {
            path: path.clone(),
            source,
        }),
        AssetSource::Packed { archive, offset, size } => {
            let read_range = || -> io::Result<Vec<u8>> {
                let mut file = File::open(archive)?;
                file.seek(SeekFrom::Start(*offset))?;
                let mut bytes = Vec::with_capacity(*size as usize);
                file.take(*size).read_to_end(&mut bytes)?;
                if bytes.len() as u64 != *size {
                    return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "packed asset is truncated"));
                }
                Ok(bytes)
            };
            read_range().map_err(|source| AssetError::Io {
                path: archive.clone(),
                source,
            })
        }
        AssetSource::Internal => Err(AssetError::Io {
            path: PathBuf::new(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "internal assets have no source data"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::{Duration, Instant};

    fn wav_bytes() -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut bytes = io::Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut bytes, spec).unwrap();
            for sample in 0..16i16 {
                writer.write_sample(sample).unwrap();
            }
            writer.finalize().unwrap();
        }
        bytes.into_inner()
    }

    fn recv_all(worker: &IoWorker, count: usize) -> Vec<LoadCompletion> {
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut completions = Vec::new();
        while completions.len() < count {
            assert!(Instant::now() < deadline, "timed out waiting for completions");
            match worker.try_recv() {
                Some(completion) => completions.push(completion),
                None => thread::sleep(Duration::from_millis(1)),
            }
        }
        completions
    }

    #[test]
    fn test_full_queue_never_drops_completions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        fs::write(&path, wav_bytes()).unwrap();

        let worker = IoWorker::new(4, 1, Arc::new(LoaderRegistry::with_builtin_loaders())).unwrap();
        let ids: Vec<_> = (0..8).map(|_| AssetId::new()).collect();
        for id in &ids {
            worker.request_load(LoadRequest {
                id: *id,
                kind: AssetKind::Sound,
                source: AssetSource::Standalone(path.clone()),
                config: AssetConfig::Sound(Default::default()),
            });
        }

        let completions = recv_all(&worker, ids.len());
        for completion in &completions {
            assert!(ids.contains(&completion.id));
            assert!(completion.result.is_ok());
        }
        assert!(worker.try_recv().is_none());
    }

    #[test]
    fn test_read_packed_range() {
        let mut archive = tempfile::NamedTempFile::new().unwrap();
        archive.write_all(b"headerPAYLOADtrailer").unwrap();

        let source = AssetSource::Packed {
            archive: archive.path().to_path_buf(),
            offset: 6,
            size: 7,
        };
        assert_eq!(read_source(&source).unwrap(), b"PAYLOAD");

        let truncated = AssetSource::Packed {
            archive: archive.path().to_path_buf(),
            offset: 16,
            size: 10,
        };
        assert!(matches!(read_source(&truncated), Err(AssetError::Io { .. })));
    }

    #[test]
    fn test_drop_with_pending_work_does_not_hang() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        fs::write(&path, wav_bytes()).unwrap();

        let worker = IoWorker::new(2, 1, Arc::new(LoaderRegistry::with_builtin_loaders())).unwrap();
        for _ in 0..16 {
            worker.request_load(LoadRequest {
                id: AssetId::new(),
                kind: AssetKind::Sound,
                source: AssetSource::Standalone(path.clone()),
                config: AssetConfig::Sound(Default::default()),
            });
        }
        drop(worker);
    }
}
