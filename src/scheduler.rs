// 并发受限调度器
//
// 对一个有序序列并发执行异步操作，限制同时在途的数量：
// - 只要在途数量低于 limit 且还有未消费的条目，就按序派发下一个
// - 任一条目完成（无论成败）后补位
// - 结果数组的顺序与输入一致，与完成顺序无关
// - break_if_error 判定为 true 时整体立即失败，在途操作不被强制取消

use std::future::Future;

use futures::stream::{FuturesUnordered, StreamExt};
use tracing::debug;

/// 单项执行结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settled<T, E> {
    /// 执行成功
    Fulfilled(T),
    /// 执行失败
    Rejected(E),
}

impl<T, E> Settled<T, E> {
    pub fn is_fulfilled(&self) -> bool {
        matches!(self, Settled::Fulfilled(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Settled::Rejected(_))
    }
}

/// 失败中断判定
pub type BreakPredicate<T, E> = Box<dyn Fn(&E, &T) -> bool + Send + Sync>;

/// 调度器配置
pub struct MapLimitOptions<T, E> {
    /// 最大并发数，至少为 1
    pub limit: usize,
    /// 失败中断判定：返回 true 时整体立即以该错误失败
    pub break_if_error: Option<BreakPredicate<T, E>>,
}

impl<T, E> Default for MapLimitOptions<T, E> {
    fn default() -> Self {
        Self {
            limit: 4,
            break_if_error: None,
        }
    }
}

impl<T, E> MapLimitOptions<T, E> {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit,
            break_if_error: None,
        }
    }
}

/// 以受限并发执行所有条目
///
/// 每个操作都派发到 tokio 运行时上（必须在运行时内调用）。
/// 触发失败中断时整体立即返回该错误，不再派发新条目；
/// 已在途的操作不会被强制取消，它们自行跑到结清。
///
/// # 参数
/// * `items` - 有序条目序列
/// * `options` - 并发上限与失败中断判定
/// * `op` - 每个条目的异步操作
///
/// # 返回
/// 与输入同序的结果数组；空输入立即返回空数组
pub async fn map_limit<T, R, E, F, Fut>(
    items: Vec<T>,
    options: MapLimitOptions<T, E>,
    mut op: F,
) -> Result<Vec<Settled<R, E>>, E>
where
    T: Clone + Send + 'static,
    R: Send + 'static,
    E: Send + 'static,
    F: FnMut(T) -> Fut,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
{
    let limit = options.limit.max(1);
    let total = items.len();

    if total == 0 {
        return Ok(Vec::new());
    }

    let mut results: Vec<Option<Settled<R, E>>> = Vec::with_capacity(total);
    results.resize_with(total, || None);

    let mut pending = items.into_iter().enumerate();
    let mut in_flight = FuturesUnordered::new();

    loop {
        // 补位：在途数量低于 limit 时按输入顺序派发
        while in_flight.len() < limit {
            match pending.next() {
                Some((index, item)) => {
                    let handle = tokio::spawn(op(item.clone()));
                    in_flight.push(async move { (index, item, handle.await) });
                }
                None => break,
            }
        }

        match in_flight.next().await {
            Some((index, item, Ok(outcome))) => match outcome {
                Ok(value) => {
                    results[index] = Some(Settled::Fulfilled(value));
                }
                Err(error) => {
                    if let Some(predicate) = &options.break_if_error {
                        if predicate(&error, &item) {
                            debug!("调度提前中断: 第 {} 项失败", index);
                            return Err(error);
                        }
                    }
                    results[index] = Some(Settled::Rejected(error));
                }
            },
            Some((index, _, Err(join_error))) => {
                // 操作 panic 时在调度方重新抛出；我们从不 abort 已派发的任务
                debug!("调度任务异常: 第 {} 项: {}", index, join_error);
                std::panic::resume_unwind(join_error.into_panic());
            }
            // 在途为空且没有剩余条目
            None => break,
        }
    }

    Ok(results
        .into_iter()
        .map(|entry| entry.expect("所有条目都已结清"))
        .collect())
}
