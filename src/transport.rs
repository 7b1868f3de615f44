// 网络传输层
//
// Transport 是注入的协作者：执行一次 HTTP 传输，报告进度，
// 并以恰好一种结局结清（成功 / 失败 / 中止）。
// 在途期间必须响应取消令牌，这就是外部可达的 abort 能力。
//
// 默认实现 HttpTransport 基于 reqwest multipart 表单上传

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::UploadError;
use crate::options::ProgressFn;

/// 进度流的帧大小: 64KB
const PROGRESS_FRAME_SIZE: usize = 64 * 1024;

/// 非 2xx 响应体在错误消息里保留的最大长度
const ERROR_BODY_LIMIT: usize = 512;

/// 上传进度事件
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    /// 已发送字节数
    pub loaded: u64,
    /// 总字节数
    pub total: u64,
    /// 百分比 0-100
    pub percent: f64,
}

impl ProgressEvent {
    pub fn new(loaded: u64, total: u64) -> Self {
        let percent = if total > 0 {
            loaded as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        Self {
            loaded,
            total,
            percent,
        }
    }
}

/// 一次传输请求
#[derive(Clone)]
pub struct TransportRequest {
    /// 上传地址
    pub url: String,
    /// HTTP 方法
    pub method: String,
    /// 请求头
    pub headers: HashMap<String, String>,
    /// URL 查询参数
    pub query: HashMap<String, String>,
    /// 附加表单字段
    pub extra_fields: HashMap<String, String>,
    /// 承载分片数据的表单字段名
    pub file_key: String,
    /// multipart 表单里的 filename
    pub file_name: String,
    /// MIME 类型
    pub content_type: Option<String>,
    /// 分片数据
    pub bytes: Vec<u8>,
    /// 单次请求超时
    pub timeout: Option<Duration>,
    /// 进度回调
    pub on_progress: Option<ProgressFn>,
}

/// 传输响应
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    /// HTTP 状态码
    pub status: u16,
    /// 响应体文本
    pub body: String,
}

impl TransportResponse {
    /// 尝试把响应体按 JSON 解析，非 JSON 时返回 None
    pub fn json(&self) -> Option<serde_json::Value> {
        serde_json::from_str(&self.body).ok()
    }
}

/// 网络传输协作者
///
/// 实现约定：
/// - 一次调用恰好报告一种结局（Ok / Err）
/// - 在途期间 `cancel` 触发时尽快以 `UploadError::Aborted` 结清
/// - 进度通过请求里的 on_progress 回调上报
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        request: TransportRequest,
        cancel: CancellationToken,
    ) -> Result<TransportResponse, UploadError>;
}

// =====================================================
// 基于 reqwest 的默认实现
// =====================================================

/// 默认传输实现：multipart/form-data 上传
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// 复用外部的 reqwest 客户端（连接池、代理等配置由调用方掌控）
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// 拼接查询参数
    fn build_url(url: &str, query: &HashMap<String, String>) -> String {
        if query.is_empty() {
            return url.to_string();
        }

        let query_string = query
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        if url.contains('?') {
            format!("{}&{}", url, query_string)
        } else {
            format!("{}?{}", url, query_string)
        }
    }

    /// 把分片数据包装成请求体；设置了进度回调时按帧上报进度
    fn build_body(bytes: Vec<u8>, on_progress: Option<ProgressFn>) -> reqwest::Body {
        let Some(on_progress) = on_progress else {
            return reqwest::Body::from(bytes);
        };

        let total = bytes.len() as u64;
        let frames: Vec<Vec<u8>> = bytes
            .chunks(PROGRESS_FRAME_SIZE)
            .map(|frame| frame.to_vec())
            .collect();

        let mut loaded = 0u64;
        // 迭代器按需消费：每帧被拉走时上报一次进度
        let stream = futures::stream::iter(frames.into_iter().map(move |frame| {
            loaded += frame.len() as u64;
            on_progress(&ProgressEvent::new(loaded, total));
            Ok::<Vec<u8>, std::io::Error>(frame)
        }));

        reqwest::Body::wrap_stream(stream)
    }

    fn classify_error(e: reqwest::Error) -> UploadError {
        if e.is_timeout() {
            UploadError::Timeout
        } else {
            UploadError::Network(e.to_string())
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        request: TransportRequest,
        cancel: CancellationToken,
    ) -> Result<TransportResponse, UploadError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|_| UploadError::Config(format!("非法 HTTP 方法: {}", request.method)))?;
        let url = Self::build_url(&request.url, &request.query);
        let total = request.bytes.len() as u64;

        let body = Self::build_body(request.bytes, request.on_progress.clone());
        let mut part = reqwest::multipart::Part::stream_with_length(body, total)
            .file_name(request.file_name.clone());
        if let Some(content_type) = &request.content_type {
            part = part
                .mime_str(content_type)
                .map_err(|e| UploadError::Config(format!("非法 MIME 类型: {}", e)))?;
        }

        let mut form = reqwest::multipart::Form::new();
        for (key, value) in &request.extra_fields {
            form = form.text(key.clone(), value.clone());
        }
        let form = form.part(request.file_key.clone(), part);

        let mut builder = self.client.request(method.clone(), &url).multipart(form);
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        // 发送与读取响应都受取消令牌控制
        let response = tokio::select! {
            result = builder.send() => result.map_err(Self::classify_error)?,
            _ = cancel.cancelled() => {
                debug!("传输已中止: {} {}", method, url);
                return Err(UploadError::Aborted);
            }
        };

        let status = response.status();
        let body = tokio::select! {
            result = response.text() => result.map_err(Self::classify_error)?,
            _ = cancel.cancelled() => {
                debug!("读取响应时被中止: {} {}", method, url);
                return Err(UploadError::Aborted);
            }
        };

        if status.is_success() {
            return Ok(TransportResponse {
                status: status.as_u16(),
                body,
            });
        }

        // 非 2xx：优先用响应体做错误消息，空响应体时给出兜底描述
        let message = if body.is_empty() {
            format!("fail to {} {} {}", method, url, status.as_u16())
        } else {
            body.chars().take(ERROR_BODY_LIMIT).collect()
        };

        Err(UploadError::Transport {
            status: status.as_u16(),
            message,
        })
    }
}

// =====================================================
// 测试用传输实现
// =====================================================
