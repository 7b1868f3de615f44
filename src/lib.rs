// Chunked Uploader
// 可靠的大文件分片上传引擎
//
// 核心能力：
// - 固定大小分片，分片计划精确覆盖整个文件
// - 哈希计算池：多线程并行计算分片 MD5，不阻塞调度线程
// - 受限并发调度器：限制同时在途的分片数，失败自动重试
// - 协作式取消：中止在途传输、清掉等待中的重试定时器

// 错误类型
pub mod error;

// 分片计划
pub mod chunk;

// 上传配置与回调
pub mod options;

// 哈希计算池
pub mod hash_pool;

// 受限并发调度器
pub mod scheduler;

// 分片上传任务
pub mod task;

// 网络传输层
pub mod transport;

// 上传编排器
pub mod client;

// 导出常用类型
pub use chunk::{plan_chunks, Chunk};
pub use client::{
    multipart_upload, put, ChunkOutcome, UploadClient, DEFAULT_MULTIPART_CHUNK_SIZE,
};
pub use error::UploadError;
pub use hash_pool::{compute_hashes, hash_chunk};
pub use options::{UploadCallbacks, UploadOptions, UploadSource};
pub use scheduler::{map_limit, MapLimitOptions, Settled};
pub use task::{ChunkStatus, ChunkUploadTask};
pub use transport::{
    HttpTransport, ProgressEvent, Transport, TransportRequest, TransportResponse,
};
