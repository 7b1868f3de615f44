// 分片上传任务
//
// 状态机：waiting → uploading → {success | error | canceled}
// 重试是 uploading 内部的自循环，不是独立状态。
//
// 资源归属：
// - 每次 upload() 持有一个中止令牌，取消它同时意味着
//   "中止在途传输"和"清掉等待中的重试定时器"
// - 在途结局以共享句柄保存，重复 upload() 返回同一结局而不是二次传输

use std::io::{Read, Seek, SeekFrom};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::chunk::Chunk;
use crate::error::UploadError;
use crate::options::{UploadOptions, UploadSource};
use crate::transport::{Transport, TransportRequest, TransportResponse};

/// 任务状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStatus {
    /// 等待调度
    Waiting,
    /// 上传中（重试期间保持此状态）
    Uploading,
    /// 上传成功
    Success,
    /// 重试耗尽，上传失败
    Error,
    /// 已取消
    Canceled,
}

impl ChunkStatus {
    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ChunkStatus::Success | ChunkStatus::Error | ChunkStatus::Canceled
        )
    }
}

/// 一次上传调用的结局；可克隆，供多个等待者共享
pub type UploadOutcome = Result<TransportResponse, UploadError>;

/// 在途上传的共享句柄
pub type SharedUpload = Shared<BoxFuture<'static, UploadOutcome>>;

/// 分片上传任务
///
/// 持有单个分片的完整生命周期：状态、重试预算、在途传输的中止令牌。
/// 任务在编排器构造时创建一次，之后只被原地修改，从不重建。
pub struct ChunkUploadTask {
    /// 分片信息
    chunk: Chunk,
    /// 源文件
    source: Arc<UploadSource>,
    /// 上传配置（所有任务共享）
    options: Arc<UploadOptions>,
    /// 传输协作者
    transport: Arc<dyn Transport>,
    /// 当前状态
    status: Mutex<ChunkStatus>,
    /// 分片内容哈希，由哈希池写入一次
    hash: Mutex<String>,
    /// 剩余重试次数
    retry_budget: AtomicU32,
    /// 在途上传的中止令牌
    abort_handle: Mutex<Option<CancellationToken>>,
    /// 在途结局句柄，保证 upload() 幂等
    in_flight: Mutex<Option<SharedUpload>>,
}

impl ChunkUploadTask {
    pub(crate) fn new(
        chunk: Chunk,
        source: Arc<UploadSource>,
        options: Arc<UploadOptions>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let retry_count = options.retry_count;
        Self {
            chunk,
            source,
            options,
            transport,
            status: Mutex::new(ChunkStatus::Waiting),
            hash: Mutex::new(String::new()),
            retry_budget: AtomicU32::new(retry_count),
            abort_handle: Mutex::new(None),
            in_flight: Mutex::new(None),
        }
    }

    /// 分片索引
    pub fn index(&self) -> usize {
        self.chunk.index
    }

    /// 分片信息
    pub fn chunk(&self) -> &Chunk {
        &self.chunk
    }

    /// 当前状态
    pub fn status(&self) -> ChunkStatus {
        *self.status.lock()
    }

    /// 分片内容哈希；哈希池尚未写入时为空字符串
    pub fn hash(&self) -> String {
        self.hash.lock().clone()
    }

    pub(crate) fn set_hash(&self, hash: String) {
        *self.hash.lock() = hash;
    }

    /// 剩余重试次数
    pub fn retry_budget(&self) -> u32 {
        self.retry_budget.load(Ordering::SeqCst)
    }

    /// 切换状态并触发 on_update_status 回调
    fn change_status(&self, status: ChunkStatus) {
        *self.status.lock() = status;
        if let Some(callback) = &self.options.callbacks.on_update_status {
            callback(status, self);
        }
    }

    /// 发起上传（幂等）
    ///
    /// 已有在途上传时返回同一结局句柄，不会发起第二次传输；
    /// 结清之后再次调用会重新发起。
    pub fn upload(self: Arc<Self>) -> SharedUpload {
        let mut guard = self.in_flight.lock();
        if let Some(existing) = guard.as_ref() {
            return existing.clone();
        }

        let task = Arc::clone(&self);
        let fut = async move {
            let result = task.run_upload().await;
            // 结清后释放句柄，后续 upload() 可重新发起
            task.in_flight.lock().take();
            result
        }
        .boxed()
        .shared();

        *guard = Some(fut.clone());
        fut
    }

    /// 取消任务
    ///
    /// 仅在 uploading 状态下生效：转入 canceled、中止在途传输、
    /// 清掉等待中的重试定时器。其他状态下为空操作。
    pub fn cancel(&self) {
        {
            let status = self.status.lock();
            if *status != ChunkStatus::Uploading {
                return;
            }
        }

        info!("[分片#{}] 取消上传", self.chunk.index);
        self.change_status(ChunkStatus::Canceled);
        self.in_flight.lock().take();

        if let Some(token) = self.abort_handle.lock().take() {
            token.cancel();
        }
    }

    /// 执行一次上传调用（含重试循环）
    async fn run_upload(&self) -> UploadOutcome {
        self.change_status(ChunkStatus::Uploading);
        // 防御重复派发：预算回满
        self.retry_budget
            .store(self.options.retry_count, Ordering::SeqCst);

        let token = CancellationToken::new();
        *self.abort_handle.lock() = Some(token.clone());

        let result = self.attempt_loop(&token).await;

        // 结清后释放中止令牌
        self.abort_handle.lock().take();

        result
    }

    async fn attempt_loop(&self, token: &CancellationToken) -> UploadOutcome {
        // 分片数据只读一次，重试复用
        let bytes = match self.read_chunk_data().await {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("[分片#{}] {}", self.chunk.index, e);
                self.change_status(ChunkStatus::Error);
                if let Some(callback) = &self.options.callbacks.on_error {
                    callback(&e, self);
                }
                return Err(e);
            }
        };

        loop {
            if token.is_cancelled() {
                return Err(UploadError::Aborted);
            }

            let request = self.build_request(bytes.clone());
            match self.transport.send(request, token.child_token()).await {
                Ok(response) => {
                    info!("[分片#{}] 上传成功", self.chunk.index);
                    self.change_status(ChunkStatus::Success);
                    if let Some(callback) = &self.options.callbacks.on_success {
                        callback(&response, self);
                    }
                    return Ok(response);
                }
                Err(UploadError::Aborted) => {
                    // 中止不走重试，状态由 cancel() 负责
                    debug!("[分片#{}] 传输中止", self.chunk.index);
                    let e = UploadError::Aborted;
                    if let Some(callback) = &self.options.callbacks.on_cancel {
                        callback(&e, self);
                    }
                    return Err(e);
                }
                Err(e) if e.is_retriable() && self.retry_budget.load(Ordering::SeqCst) > 0 => {
                    let remaining = self.retry_budget.fetch_sub(1, Ordering::SeqCst) - 1;
                    warn!(
                        "[分片#{}] 上传失败，{}ms 后重试（剩余 {} 次）: {}",
                        self.chunk.index,
                        self.options.retry_delay.as_millis(),
                        remaining,
                        e
                    );

                    // 重试定时器同样受中止令牌控制
                    tokio::select! {
                        _ = tokio::time::sleep(self.options.retry_delay) => {}
                        _ = token.cancelled() => {
                            debug!("[分片#{}] 重试等待中被取消", self.chunk.index);
                            return Err(UploadError::Aborted);
                        }
                    }
                }
                Err(e) => {
                    error!("[分片#{}] 上传失败，不再重试: {}", self.chunk.index, e);
                    self.change_status(ChunkStatus::Error);
                    if let Some(callback) = &self.options.callbacks.on_error {
                        callback(&e, self);
                    }
                    return Err(e);
                }
            }
        }
    }

    /// 读取分片数据
    async fn read_chunk_data(&self) -> Result<Vec<u8>, UploadError> {
        let path = self.source.path.clone();
        let start = self.chunk.range.start;
        let size = self.chunk.size() as usize;

        tokio::task::spawn_blocking(move || {
            let mut file = std::fs::File::open(&path)
                .map_err(|e| UploadError::Io(format!("无法打开文件 {:?}: {}", path, e)))?;
            file.seek(SeekFrom::Start(start))
                .map_err(|e| UploadError::Io(format!("文件定位失败: {}", e)))?;

            let mut buffer = vec![0u8; size];
            file.read_exact(&mut buffer)
                .map_err(|e| UploadError::Io(format!("读取分片数据失败: {}", e)))?;

            Ok(buffer)
        })
        .await
        .map_err(|e| UploadError::Io(format!("读取任务执行失败: {}", e)))?
    }

    fn build_request(&self, bytes: Vec<u8>) -> TransportRequest {
        TransportRequest {
            url: self.options.url.clone(),
            method: self.options.method.clone(),
            headers: self.options.headers.clone(),
            query: self.options.query.clone(),
            extra_fields: self.options.extra_fields.clone(),
            file_key: self.options.file_key.clone(),
            // filename 带上分片序号，便于服务端区分
            file_name: format!("{}_{}", self.source.file_name, self.chunk.index),
            content_type: self.source.content_type.clone(),
            bytes,
            timeout: self.options.timeout,
            on_progress: self.options.callbacks.on_progress.clone(),
        }
    }
}
