use std::future::Future;

use tracing::{debug, warn};

// 成功时附带实际尝试次数
#[derive(Debug, Clone)]
pub struct RetryOutcome<T> {
    pub result: T,
    pub attempts: usize,
}

// 失败时携带最后一次的错误
#[derive(Debug)]
pub struct RetryFailure<E> {
    pub error: E,
    pub attempts: usize,
}

/// 按固定顺序依次尝试候选项（主候选在前），
/// 遇到终止性错误立即放弃，全部失败时返回最后一个错误。
#[derive(Debug, Clone)]
pub struct RetryPolicy<C> {
    primary: C,
    fallbacks: Vec<C>,
}

impl<C: Clone> RetryPolicy<C> {
    pub fn new(primary: C, fallbacks: Vec<C>) -> Self {
        Self { primary, fallbacks }
    }

    // 列表为空时返回 None
    pub fn from_candidates(candidates: impl IntoIterator<Item = C>) -> Option<Self> {
        let mut iter = candidates.into_iter();
        let primary = iter.next()?;
        Some(Self::new(primary, iter.collect()))
    }

    pub fn candidate_count(&self) -> usize {
        1 + self.fallbacks.len()
    }

    pub async fn run<F, Fut, T, E, K>(
        &self,
        mut operation: F,
        is_terminal: K,
    ) -> Result<RetryOutcome<T>, RetryFailure<E>>
    where
        F: FnMut(C, usize) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        K: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut attempts = 1;
        let mut error = match operation(self.primary.clone(), attempts).await {
            Ok(result) => return Ok(RetryOutcome { result, attempts }),
            Err(error) => error,
        };

        for candidate in &self.fallbacks {
            if is_terminal(&error) {
                debug!("第 {} 次尝试遇到终止性错误，不再重试", attempts);
                break;
            }
            warn!("第 {} 次尝试失败: {}，切换到下一个候选", attempts, error);

            attempts += 1;
            match operation(candidate.clone(), attempts).await {
                Ok(result) => return Ok(RetryOutcome { result, attempts }),
                Err(e) => error = e,
            }
        }

        Err(RetryFailure { error, attempts })
    }
}
