// 上传配置与生命周期回调
//
// 配置在构造编排器时一次性给定，之后不可变；
// 回调由所有分片任务共享，保持与任务状态机的回调时机一一对应

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;

use crate::error::UploadError;
use crate::task::{ChunkStatus, ChunkUploadTask};
use crate::transport::{ProgressEvent, TransportResponse};

/// 默认重试次数
pub const DEFAULT_RETRY_COUNT: u32 = 3;

/// 默认重试间隔
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1000);

/// 默认调度并发数
pub const DEFAULT_PARALLEL: usize = 3;

/// 传输进度回调
pub type ProgressFn = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

/// 分片上传成功回调
pub type SuccessFn = Arc<dyn Fn(&TransportResponse, &ChunkUploadTask) + Send + Sync>;

/// 分片上传失败 / 取消回调
pub type ErrorFn = Arc<dyn Fn(&UploadError, &ChunkUploadTask) + Send + Sync>;

/// 任务状态变更回调
pub type StatusFn = Arc<dyn Fn(ChunkStatus, &ChunkUploadTask) + Send + Sync>;

/// 哈希进度回调；参数为 true 表示所有工作线程均已完成
pub type HashFn = Arc<dyn Fn(bool) + Send + Sync>;

/// 整文件上传前钩子，返回 false 则干净中止整个上传
pub type BeforeUploadFn = Arc<dyn Fn(&UploadSource) -> BoxFuture<'static, bool> + Send + Sync>;

/// 单分片上传前钩子，返回 false 则跳过该分片（不重试、不报错）
pub type BeforeUploadItemFn =
    Arc<dyn Fn(&Arc<ChunkUploadTask>) -> BoxFuture<'static, bool> + Send + Sync>;

/// 失败中断判定，返回 true 时单个分片的失败升级为整体失败
pub type BreakIfErrorFn =
    Arc<dyn Fn(&UploadError, &Arc<ChunkUploadTask>) -> bool + Send + Sync>;

/// 上传源文件
#[derive(Debug, Clone)]
pub struct UploadSource {
    /// 本地文件路径
    pub path: PathBuf,
    /// 文件名（multipart 表单里的 filename 前缀）
    pub file_name: String,
    /// MIME 类型
    pub content_type: Option<String>,
    /// 文件总大小
    pub total_size: u64,
}

impl UploadSource {
    /// 从本地路径构造上传源，同步读取文件元数据
    pub fn open(path: impl AsRef<Path>) -> Result<Self, UploadError> {
        let path = path.as_ref().to_path_buf();
        let metadata = std::fs::metadata(&path).map_err(UploadError::from_io)?;

        if !metadata.is_file() {
            return Err(UploadError::Io(format!("不是普通文件: {:?}", path)));
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());

        Ok(Self {
            path,
            file_name,
            content_type: None,
            total_size: metadata.len(),
        })
    }

    /// 指定 MIME 类型
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// 生命周期回调集合
///
/// 未设置的回调不产生任何开销；回调在调度线程上同步执行，
/// 两个 before 钩子例外，它们是可等待的异步判定
#[derive(Clone, Default)]
pub struct UploadCallbacks {
    /// 分片传输进度
    pub on_progress: Option<ProgressFn>,
    /// 分片上传成功
    pub on_success: Option<SuccessFn>,
    /// 分片重试耗尽、最终失败
    pub on_error: Option<ErrorFn>,
    /// 分片传输被中止
    pub on_cancel: Option<ErrorFn>,
    /// 任务状态每次变更
    pub on_update_status: Option<StatusFn>,
    /// 哈希池进度：每个工作线程完成一次、全部完成再一次
    pub on_update_hash: Option<HashFn>,
    /// 整文件上传前钩子
    pub before_upload: Option<BeforeUploadFn>,
    /// 单分片上传前钩子
    pub before_upload_item: Option<BeforeUploadItemFn>,
    /// 失败中断判定
    pub break_if_error: Option<BreakIfErrorFn>,
}

/// 上传配置
#[derive(Clone)]
pub struct UploadOptions {
    /// 上传地址
    pub url: String,
    /// HTTP 方法
    pub method: String,
    /// 请求头，原样传给传输层
    pub headers: HashMap<String, String>,
    /// URL 查询参数
    pub query: HashMap<String, String>,
    /// 附加表单字段，原样传给传输层
    pub extra_fields: HashMap<String, String>,
    /// 承载分片数据的表单字段名
    pub file_key: String,
    /// 分片大小，0 表示不分片
    pub chunk_size: u64,
    /// 调度并发数
    pub parallel: usize,
    /// 每个分片的重试预算
    pub retry_count: u32,
    /// 重试间隔
    pub retry_delay: Duration,
    /// 单次请求超时，None 表示不限制
    pub timeout: Option<Duration>,
    /// 生命周期回调
    pub callbacks: UploadCallbacks,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            url: String::new(),
            method: "POST".to_string(),
            headers: HashMap::new(),
            query: HashMap::new(),
            extra_fields: HashMap::new(),
            file_key: "file".to_string(),
            chunk_size: 0,
            parallel: DEFAULT_PARALLEL,
            retry_count: DEFAULT_RETRY_COUNT,
            retry_delay: DEFAULT_RETRY_DELAY,
            timeout: None,
            callbacks: UploadCallbacks::default(),
        }
    }
}
