use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use config::RateLimitPolicy;
use domain::UserId;

use crate::clock::Clock;

/// 单个限流窗口
#[derive(Debug, Clone, Copy)]
struct RateWindow {
    /// 当前窗口内已放行的次数
    count: u32,
    /// 窗口过期时间
    expires_at: DateTime<Utc>,
}

/// 限流错误类型
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("Too many connections: {current}/{max} connections from {addr}")]
    TooManyConnections { addr: IpAddr, current: u32, max: u32 },
}

/// 按键计数的固定窗口限流器
///
/// 窗口过期后的第一次调用重置计数并开启新窗口。窗口只存在于进程内存中，
/// 进程重启即清空。
pub struct RateLimiter {
    clock: Arc<dyn Clock>,
    windows: Mutex<HashMap<String, RateWindow>>,
}

impl RateLimiter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// 放行返回 true，超限返回 false
    pub fn allow(&self, key: &str, window_ms: u64, max: u32) -> bool {
        let now = self.clock.now();
        let window = Duration::milliseconds(i64::try_from(window_ms).unwrap_or(i64::MAX));
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());

        match windows.get_mut(key) {
            Some(entry) if now < entry.expires_at => {
                if entry.count >= max {
                    return false;
                }
                entry.count += 1;
                true
            }
            _ => {
                windows.insert(
                    key.to_owned(),
                    RateWindow {
                        count: 1,
                        expires_at: now
                            .checked_add_signed(window)
                            .unwrap_or(DateTime::<Utc>::MAX_UTC),
                    },
                );
                true
            }
        }
    }

    /// 按动作和用户检查限流，键格式为 `<action>_<user>`
    pub fn allow_action(&self, action: &str, user_id: UserId, policy: &RateLimitPolicy) -> bool {
        self.allow(&format!("{action}_{user_id}"), policy.window_ms, policy.max)
    }

    /// 当前窗口内的计数；窗口不存在或已过期时为 None
    pub fn current_count(&self, key: &str) -> Option<u32> {
        let now = self.clock.now();
        let windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        windows
            .get(key)
            .filter(|entry| now < entry.expires_at)
            .map(|entry| entry.count)
    }

    /// 清理过期的窗口（防止内存泄漏），返回清理数量
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        let before = windows.len();
        windows.retain(|_, entry| now < entry.expires_at);
        before - windows.len()
    }
}

/// 按来源地址限制并发连接数
#[derive(Debug)]
pub struct ConnectionLimiter {
    max_per_addr: u32,
    connections: Mutex<HashMap<IpAddr, u32>>,
}

impl ConnectionLimiter {
    pub fn new(max_per_addr: u32) -> Arc<Self> {
        Arc::new(Self {
            max_per_addr,
            connections: Mutex::new(HashMap::new()),
        })
    }

    /// 占用一个连接名额；返回的许可在释放时归还名额
    pub fn acquire(self: &Arc<Self>, addr: IpAddr) -> Result<ConnectionPermit, RateLimitError> {
        let mut connections = self.connections.lock().unwrap_or_else(|e| e.into_inner());
        let current = connections.entry(addr).or_insert(0);
        if *current >= self.max_per_addr {
            return Err(RateLimitError::TooManyConnections {
                addr,
                current: *current,
                max: self.max_per_addr,
            });
        }
        *current += 1;
        Ok(ConnectionPermit {
            limiter: Arc::clone(self),
            addr,
        })
    }

    pub fn active(&self, addr: IpAddr) -> u32 {
        let connections = self.connections.lock().unwrap_or_else(|e| e.into_inner());
        connections.get(&addr).copied().unwrap_or(0)
    }

    fn release(&self, addr: IpAddr) {
        let mut connections = self.connections.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(count) = connections.get_mut(&addr) {
            *count = count.saturating_sub(1);
            // 如果连接数为0，从map中移除
            if *count == 0 {
                connections.remove(&addr);
            }
        }
    }
}

/// 连接名额许可
#[derive(Debug)]
pub struct ConnectionPermit {
    limiter: Arc<ConnectionLimiter>,
    addr: IpAddr,
}

impl Drop for ConnectionPermit {
    fn drop(&mut self) {
        self.limiter.release(self.addr);
    }
}
