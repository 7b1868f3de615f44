// 上传编排器
//
// 公共入口。流程：
// 1. 构造时同步建立分片计划与任务列表（仅配置非法会失败）
// 2. compute_hashes() 驱动哈希池；上传不会自动等待哈希完成，
//    需要先有哈希的调用方应自行 await（调用方责任）
// 3. upload() 先过整文件钩子，再把全部任务交给受限并发调度器；
//    单分片钩子返回 false 的分片被跳过（不传输、不重试、不报错）
// 4. cancel() 对所有任务广播取消；哈希工作线程不受影响，
//    它们无状态且短生命周期，跑完即退

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::chunk::plan_chunks;
use crate::error::UploadError;
use crate::hash_pool;
use crate::options::{UploadOptions, UploadSource};
use crate::scheduler::{map_limit, MapLimitOptions, Settled};
use crate::task::ChunkUploadTask;
use crate::transport::{Transport, TransportResponse};

/// multipart_upload 的默认分片大小: 5MB
pub const DEFAULT_MULTIPART_CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// 单个分片的最终结局；被钩子跳过的分片以 Fulfilled(None) 出现
pub type ChunkOutcome = Settled<Option<TransportResponse>, UploadError>;

/// 上传编排器
pub struct UploadClient {
    source: Arc<UploadSource>,
    options: Arc<UploadOptions>,
    tasks: Vec<Arc<ChunkUploadTask>>,
}

impl UploadClient {
    /// 构造编排器：同步建立分片计划与任务列表
    ///
    /// # 错误
    /// `parallel < 1` 时返回 `UploadError::Config`
    pub fn new(
        source: UploadSource,
        options: UploadOptions,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, UploadError> {
        if options.parallel < 1 {
            return Err(UploadError::Config(format!(
                "parallel 必须 >= 1，当前为 {}",
                options.parallel
            )));
        }

        let source = Arc::new(source);
        let options = Arc::new(options);

        let tasks: Vec<Arc<ChunkUploadTask>> = plan_chunks(source.total_size, options.chunk_size)
            .into_iter()
            .map(|chunk| {
                Arc::new(ChunkUploadTask::new(
                    chunk,
                    source.clone(),
                    options.clone(),
                    transport.clone(),
                ))
            })
            .collect();

        info!(
            "创建上传编排器: 文件={}, 大小={} bytes, 分片数量={}, 并发={}",
            source.file_name,
            source.total_size,
            tasks.len(),
            options.parallel
        );

        Ok(Self {
            source,
            options,
            tasks,
        })
    }

    /// 任务列表（按分片索引升序）
    pub fn tasks(&self) -> &[Arc<ChunkUploadTask>] {
        &self.tasks
    }

    /// 源文件信息
    pub fn source(&self) -> &UploadSource {
        &self.source
    }

    /// 驱动哈希池计算所有分片哈希
    ///
    /// 上传不会等待哈希完成；需要先有哈希的调用方应先 await 本方法
    pub async fn compute_hashes(&self) -> Result<(), UploadError> {
        hash_pool::compute_hashes(
            &self.source.path,
            &self.tasks,
            self.options.callbacks.on_update_hash.clone(),
        )
        .await
    }

    /// 上传全部分片
    ///
    /// # 返回
    /// 与分片索引同序的结局数组。整文件钩子返回 false 时干净中止，
    /// 返回空数组；配置了 break_if_error 且判定为 true 时整体失败。
    pub async fn upload(&self) -> Result<Vec<ChunkOutcome>, UploadError> {
        // 整文件前置钩子
        if let Some(gate) = &self.options.callbacks.before_upload {
            if !gate(&self.source).await {
                info!(
                    "beforeUpload 钩子返回 false，中止上传: {}",
                    self.source.file_name
                );
                return Ok(Vec::new());
            }
        }

        let mut scheduler_options: MapLimitOptions<Arc<ChunkUploadTask>, UploadError> =
            MapLimitOptions::with_limit(self.options.parallel);
        if let Some(predicate) = self.options.callbacks.break_if_error.clone() {
            scheduler_options.break_if_error =
                Some(Box::new(move |error, task| predicate(error, task)));
        }

        let before_item = self.options.callbacks.before_upload_item.clone();

        map_limit(self.tasks.clone(), scheduler_options, move |task| {
            let before_item = before_item.clone();
            async move {
                // 单分片前置钩子
                if let Some(gate) = &before_item {
                    if !gate(&task).await {
                        debug!("[分片#{}] beforeUploadItem 返回 false，跳过", task.index());
                        return Ok(None);
                    }
                }
                task.upload().await.map(Some)
            }
        })
        .await
    }

    /// 取消全部任务
    ///
    /// 对非 uploading 状态的任务为空操作；不取消哈希计算池
    pub fn cancel(&self) {
        info!("取消上传: {}", self.source.file_name);
        for task in &self.tasks {
            task.cancel();
        }
    }
}

/// 一步完成：构造编排器、后台启动哈希计算、立即开始上传
///
/// 哈希与上传并行推进，互不等待；需要"先哈希后上传"的调用方
/// 应改用 UploadClient 并自行 await compute_hashes()
pub async fn put(
    source: UploadSource,
    options: UploadOptions,
    transport: Arc<dyn Transport>,
) -> Result<Vec<ChunkOutcome>, UploadError> {
    let client = Arc::new(UploadClient::new(source, options, transport)?);

    let hasher = client.clone();
    tokio::spawn(async move {
        if let Err(e) = hasher.compute_hashes().await {
            warn!("哈希计算失败: {}", e);
        }
    });

    client.upload().await
}

/// 分片上传便捷入口：未指定分片大小时默认 5MB
pub async fn multipart_upload(
    source: UploadSource,
    mut options: UploadOptions,
    transport: Arc<dyn Transport>,
) -> Result<Vec<ChunkOutcome>, UploadError> {
    if options.chunk_size == 0 {
        options.chunk_size = DEFAULT_MULTIPART_CHUNK_SIZE;
    }
    put(source, options, transport).await
}
