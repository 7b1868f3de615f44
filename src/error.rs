// 上传错误类型
//
// 错误分类沿用"可重试 / 不可重试"两档：
// - 网络类错误（非 2xx、连接失败、超时）可重试，由任务的重试预算兜底
// - 中止、配置错误、本地读取失败不可重试，立即结清

use thiserror::Error;

/// 上传过程中的错误
///
/// 所有变体都可克隆，以便同一个在途上传的结局分发给多个等待者
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UploadError {
    /// 服务器返回非 2xx 状态码
    #[error("上传请求失败: HTTP {status}: {message}")]
    Transport {
        /// HTTP 状态码
        status: u16,
        /// 响应体（或兜底的描述文本）
        message: String,
    },

    /// 网络错误（连接失败、DNS 解析失败等）
    #[error("网络错误: {0}")]
    Network(String),

    /// 请求超时
    #[error("请求超时")]
    Timeout,

    /// 上传被取消
    #[error("上传已取消")]
    Aborted,

    /// 配置错误（构造时同步抛出，不可恢复）
    #[error("配置错误: {0}")]
    Config(String),

    /// 本地文件读取失败
    #[error("读取文件失败: {0}")]
    Io(String),
}

impl UploadError {
    /// 是否可重试
    ///
    /// 中止永远不重试；配置错误和本地读取失败重试也无济于事
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            UploadError::Transport { .. } | UploadError::Network(_) | UploadError::Timeout
        )
    }

    pub(crate) fn from_io(e: std::io::Error) -> Self {
        UploadError::Io(e.to_string())
    }
}
