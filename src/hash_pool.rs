// 哈希计算池
//
// 把分片索引静态切分成连续区间，每个工作线程顺序计算自己区间内
// 各分片的 MD5；线程之间真正并行，与调度线程互不阻塞。
// 每个工作线程完成时触发一次部分进度通知，全部完成后再触发一次最终通知。
//
// 读取失败是致命错误：不重试、不忽略，以失败的池结局上报。

use std::io::{Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::error::UploadError;
use crate::options::HashFn;
use crate::task::ChunkUploadTask;

/// 无法探测 CPU 核心数时的默认工作线程数
const DEFAULT_WORKER_COUNT: usize = 4;

/// 计算单个分片的内容哈希（小写十六进制 MD5）
pub fn hash_chunk(bytes: &[u8]) -> String {
    hex::encode(md5::compute(bytes).0)
}

/// 对任务列表计算全部分片哈希
///
/// 工作线程数取 min(可用并行度, 分片数)；每个线程负责一段连续的
/// 分片区间（按 ceil 均分，末段可能更短甚至为空）。
/// 结果按分片索引合并回任务列表，每个索引只由一个线程写入。
pub async fn compute_hashes(
    path: &Path,
    tasks: &[Arc<ChunkUploadTask>],
    on_update_hash: Option<HashFn>,
) -> Result<(), UploadError> {
    let chunk_count = tasks.len();

    if chunk_count == 0 {
        // 无分片：立即完成，只发最终通知
        if let Some(callback) = &on_update_hash {
            callback(true);
        }
        return Ok(());
    }

    let parallelism = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(DEFAULT_WORKER_COUNT);
    let worker_count = parallelism.min(chunk_count);
    let group_size = chunk_count.div_ceil(worker_count);

    info!(
        "启动哈希计算池: 分片数量={}, 工作线程={}, 每线程分片数={}",
        chunk_count, worker_count, group_size
    );

    let mut join_set: JoinSet<Result<Vec<(usize, String)>, UploadError>> = JoinSet::new();

    for worker_index in 0..worker_count {
        let start = (worker_index * group_size).min(chunk_count);
        let end = ((worker_index + 1) * group_size).min(chunk_count);
        let ranges: Vec<(usize, Range<u64>)> = tasks[start..end]
            .iter()
            .map(|task| (task.index(), task.chunk().range.clone()))
            .collect();
        let path = path.to_path_buf();

        join_set.spawn_blocking(move || hash_group(&path, &ranges));
    }

    let mut finished = 0;
    let mut failure: Option<UploadError> = None;

    while let Some(joined) = join_set.join_next().await {
        let outcome =
            joined.map_err(|e| UploadError::Io(format!("哈希任务执行失败: {}", e)))?;

        match outcome {
            Ok(pairs) => {
                for (index, hash) in pairs {
                    tasks[index].set_hash(hash);
                }
            }
            Err(e) => {
                // 记住首个失败，但让其余线程跑完再上报
                failure.get_or_insert(e);
            }
        }

        finished += 1;
        debug!("哈希工作线程完成: {}/{}", finished, worker_count);

        if let Some(callback) = &on_update_hash {
            callback(false);
        }
    }

    if let Some(e) = failure {
        return Err(e);
    }

    if let Some(callback) = &on_update_hash {
        callback(true);
    }

    Ok(())
}

/// 单个工作线程：顺序读取并哈希自己负责的分片区间
fn hash_group(
    path: &Path,
    ranges: &[(usize, Range<u64>)],
) -> Result<Vec<(usize, String)>, UploadError> {
    if ranges.is_empty() {
        return Ok(Vec::new());
    }

    let mut file = std::fs::File::open(path)
        .map_err(|e| UploadError::Io(format!("无法打开文件 {:?}: {}", path, e)))?;
    let mut results = Vec::with_capacity(ranges.len());

    for (index, range) in ranges {
        file.seek(SeekFrom::Start(range.start))
            .map_err(|e| UploadError::Io(format!("文件定位失败: {}", e)))?;

        let mut buffer = vec![0u8; (range.end - range.start) as usize];
        file.read_exact(&mut buffer)
            .map_err(|e| UploadError::Io(format!("读取分片 #{} 失败: {}", index, e)))?;

        results.push((*index, hash_chunk(&buffer)));
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::plan_chunks;
    use crate::options::{UploadOptions, UploadSource};
    use crate::transport::mock::MockTransport;
    use parking_lot::Mutex;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn build_tasks(
        path: &Path,
        file_size: u64,
        chunk_size: u64,
        options: UploadOptions,
    ) -> Vec<Arc<ChunkUploadTask>> {
        let source = Arc::new(UploadSource {
            path: path.to_path_buf(),
            file_name: "data.bin".to_string(),
            content_type: None,
            total_size: file_size,
        });
        let options = Arc::new(options);
        let transport = MockTransport::always_ok();

        plan_chunks(file_size, chunk_size)
            .into_iter()
            .map(|chunk| {
                Arc::new(ChunkUploadTask::new(
                    chunk,
                    source.clone(),
                    options.clone(),
                    transport.clone(),
                ))
            })
            .collect()
    }

    #[test]
    fn test_hash_chunk_known_values() {
        assert_eq!(hash_chunk(b""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(hash_chunk(b"abc"), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[tokio::test]
    async fn test_pool_matches_sequential_hashing() {
        let mut temp_file = NamedTempFile::new().unwrap();
        let content: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        temp_file.write_all(&content).unwrap();
        temp_file.flush().unwrap();

        let tasks = build_tasks(
            temp_file.path(),
            content.len() as u64,
            7_000,
            UploadOptions::default(),
        );

        compute_hashes(temp_file.path(), &tasks, None).await.unwrap();

        // 并行池的结果必须与顺序计算逐分片一致
        for task in &tasks {
            let range = &task.chunk().range;
            let expected = hash_chunk(&content[range.start as usize..range.end as usize]);
            assert_eq!(task.hash(), expected, "分片 #{} 哈希不一致", task.index());
        }
    }

    #[tokio::test]
    async fn test_empty_file_single_zero_chunk() {
        let temp_file = NamedTempFile::new().unwrap();

        let tasks = build_tasks(temp_file.path(), 0, 0, UploadOptions::default());
        assert_eq!(tasks.len(), 1);

        compute_hashes(temp_file.path(), &tasks, None).await.unwrap();
        // 空内容的 MD5
        assert_eq!(tasks[0].hash(), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[tokio::test]
    async fn test_notifications_partial_then_final() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(&[9u8; 4096]).unwrap();
        temp_file.flush().unwrap();

        let tasks = build_tasks(temp_file.path(), 4096, 512, UploadOptions::default());
        let chunk_count = tasks.len();

        let calls: Arc<Mutex<Vec<bool>>> = Arc::new(Mutex::new(Vec::new()));
        let calls_clone = calls.clone();
        let on_update_hash: HashFn = Arc::new(move |is_final| {
            calls_clone.lock().push(is_final);
        });

        compute_hashes(temp_file.path(), &tasks, Some(on_update_hash))
            .await
            .unwrap();

        let calls = calls.lock();
        let worker_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
            .min(chunk_count);

        // 每个工作线程一次部分通知，最后恰好一次最终通知
        assert_eq!(calls.len(), worker_count + 1);
        assert!(calls[..worker_count].iter().all(|&is_final| !is_final));
        assert!(calls[worker_count]);
    }

    #[tokio::test]
    async fn test_empty_task_list_completes_immediately() {
        let calls: Arc<Mutex<Vec<bool>>> = Arc::new(Mutex::new(Vec::new()));
        let calls_clone = calls.clone();
        let on_update_hash: HashFn = Arc::new(move |is_final| {
            calls_clone.lock().push(is_final);
        });

        compute_hashes(Path::new("/nonexistent"), &[], Some(on_update_hash))
            .await
            .unwrap();

        // 只有最终通知，没有部分通知
        assert_eq!(*calls.lock(), vec![true]);
    }

    #[tokio::test]
    async fn test_missing_file_fails_pool() {
        let temp_file = NamedTempFile::new().unwrap();
        let tasks = build_tasks(temp_file.path(), 1024, 256, UploadOptions::default());

        let result = compute_hashes(Path::new("/nonexistent/data.bin"), &tasks, None).await;
        assert!(matches!(result, Err(UploadError::Io(_))));
    }

    #[tokio::test]
    async fn test_truncated_file_fails_pool() {
        // 计划按 1024 字节建，但文件只有一半内容，read_exact 必然失败
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(&[1u8; 512]).unwrap();
        temp_file.flush().unwrap();

        let tasks = build_tasks(temp_file.path(), 1024, 256, UploadOptions::default());
        let result = compute_hashes(temp_file.path(), &tasks, None).await;
        assert!(matches!(result, Err(UploadError::Io(_))));
    }
}
