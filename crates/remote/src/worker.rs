//! 블로킹 작업자 풀
//!
//! 원격 I/O(접속, stat, read)는 블로킹 호출이므로 비동기 런타임 스레드에서
//! 실행하지 않습니다. [`WorkerPool::run`]이 유일한 진입점입니다.
//!
//! - 세마포어 permit으로 동시 블로킹 작업 수를 제한합니다.
//! - 작업은 `spawn_blocking`으로 실행되고, 결과는 호출한 태스크가 소유한
//!   `JoinHandle`을 통해서만 돌아옵니다.
//! - 전체 대기(permit 획득 + 실행)에 타임아웃이 적용됩니다.
//!
//! 타임아웃이 나도 블로킹 스레드는 끝까지 실행되며 permit은 그때 반납됩니다.
//! 따라서 멈춘 호스트가 permit을 점유하는 시간은 커넥터 자체 타임아웃으로
//! 제한됩니다.

use std::sync::Arc;
use std::time::Duration;

use metrics::histogram;
use tailpost_core::metrics as m;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::warn;

use crate::error::RemoteError;

/// 크기가 제한된 블로킹 작업자 풀
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    /// `size`개의 동시 작업을 허용하는 풀을 생성합니다.
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// 풀 크기
    pub fn size(&self) -> usize {
        self.size
    }

    /// 현재 비어 있는 슬롯 수
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// 블로킹 작업을 실행하고 결과를 기다립니다.
    ///
    /// # Errors
    ///
    /// - `RemoteError::Timeout`: `timeout` 안에 끝나지 않음
    /// - `RemoteError::WorkerPool`: 풀이 닫혔거나 작업이 패닉함
    /// - 작업 자체가 반환한 에러
    pub async fn run<T, F>(
        &self,
        operation: &'static str,
        timeout: Duration,
        work: F,
    ) -> Result<T, RemoteError>
    where
        F: FnOnce() -> Result<T, RemoteError> + Send + 'static,
        T: Send + 'static,
    {
        let started = Instant::now();
        let permits = Arc::clone(&self.permits);

        let execution = async move {
            let permit = permits
                .acquire_owned()
                .await
                .map_err(|_| RemoteError::WorkerPool("worker pool closed".to_owned()))?;

            tokio::task::spawn_blocking(move || {
                let _permit = permit;
                work()
            })
            .await
            .map_err(|e| RemoteError::WorkerPool(format!("{operation} task failed: {e}")))?
        };

        let result = match tokio::time::timeout(timeout, execution).await {
            Ok(result) => result,
            Err(_) => {
                warn!(operation, timeout_ms = timeout.as_millis() as u64, "remote operation timed out");
                Err(RemoteError::Timeout {
                    operation,
                    after: timeout,
                })
            }
        };

        histogram!(m::REMOTE_OPERATION_DURATION_SECONDS, "operation" => operation)
            .record(started.elapsed().as_secs_f64());
        result
    }

    /// 풀을 닫습니다. 대기 중이거나 이후의 `run` 호출은 실패합니다.
    pub fn close(&self) {
        self.permits.close();
    }
}
