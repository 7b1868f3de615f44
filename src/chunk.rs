// 分片计划
//
// 分片规则：
// - chunk_size 为 0 表示不分片，整个文件作为一个分片
// - 分片区间首尾相接，精确覆盖 [0, file_size)，无空洞无重叠
// - 空文件产生一个零长度分片

use std::ops::Range;
use tracing::debug;

/// 单个分片：源文件中一段连续的字节范围
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// 分片索引
    pub index: usize,
    /// 字节范围
    pub range: Range<u64>,
}

impl Chunk {
    pub fn new(index: usize, range: Range<u64>) -> Self {
        Self { index, range }
    }

    /// 分片大小
    pub fn size(&self) -> u64 {
        self.range.end - self.range.start
    }
}

/// 计算分片计划
///
/// # 参数
/// * `file_size` - 文件总大小
/// * `chunk_size` - 分片大小，0 表示不分片
///
/// # 返回
/// 按索引升序排列的分片列表；空文件返回一个零长度分片
pub fn plan_chunks(file_size: u64, chunk_size: u64) -> Vec<Chunk> {
    // 空文件：单个零长度分片，避免除零
    if file_size == 0 {
        return vec![Chunk::new(0, 0..0)];
    }

    let effective = if chunk_size == 0 { file_size } else { chunk_size };

    let mut chunks = Vec::with_capacity(file_size.div_ceil(effective) as usize);
    let mut offset = 0u64;
    let mut index = 0;

    while offset < file_size {
        let end = std::cmp::min(offset + effective, file_size);
        chunks.push(Chunk::new(index, offset..end));
        offset = end;
        index += 1;
    }

    debug!(
        "分片计划: 文件大小={} bytes, 分片大小={} bytes, 分片数量={}",
        file_size,
        effective,
        chunks.len()
    );

    chunks
}
