//! TTL 캐시 -- 만료 시간이 있는 키-값 저장소
//!
//! 호스트별 선호 전송 전략과 알림 dedup 쿨다운에 사용합니다.
//! 시각은 [`tokio::time::Instant`]를 사용하므로 `tokio::time::pause()`로
//! 테스트에서 시간을 제어할 수 있습니다.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use tokio::time::Instant;

/// 항목별 만료 시각을 가지는 캐시
///
/// 만료된 항목은 조회 시 없는 것으로 취급되며, [`purge_expired`](Self::purge_expired)
/// 호출 시 실제로 제거됩니다.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    entries: HashMap<K, (V, Instant)>,
    ttl: Duration,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
{
    /// 기본 TTL로 빈 캐시를 생성합니다.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    /// 기본 TTL
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// 값을 저장합니다. 기존 값과 만료 시각은 덮어씁니다.
    pub fn insert(&mut self, key: K, value: V) {
        let expires_at = Instant::now() + self.ttl;
        self.entries.insert(key, (value, expires_at));
    }

    /// 키가 없거나 만료된 경우에만 저장합니다.
    ///
    /// 저장했으면 `true`, 유효한 항목이 이미 있으면 `false`를 반환합니다.
    pub fn insert_if_absent(&mut self, key: K, value: V) -> bool {
        if self.contains(&key) {
            return false;
        }
        self.insert(key, value);
        true
    }

    /// 만료되지 않은 값을 조회합니다.
    pub fn get(&self, key: &K) -> Option<&V> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|(_, expires_at)| *expires_at > now)
            .map(|(value, _)| value)
    }

    /// 만료되지 않은 항목이 있는지 확인합니다.
    pub fn contains(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// 항목을 제거하고 만료되지 않았던 값을 반환합니다.
    pub fn invalidate(&mut self, key: &K) -> Option<V> {
        let now = Instant::now();
        self.entries
            .remove(key)
            .filter(|(_, expires_at)| *expires_at > now)
            .map(|(value, _)| value)
    }

    /// 만료된 항목을 모두 제거하고 제거 개수를 반환합니다.
    pub fn purge_expired(&mut self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, (_, expires_at)| *expires_at > now);
        before - self.entries.len()
    }

    /// 저장된 항목 수 (만료 후 아직 정리되지 않은 항목 포함)
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 비어 있는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
