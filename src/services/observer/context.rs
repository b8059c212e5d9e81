// 调用上下文
//
// 在调用发起前记录时间，调用结束后计算耗时

use chrono::{DateTime, Utc};
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct CallContext {
    pub started_at: DateTime<Utc>,
    start_time: Instant,
}

impl CallContext {
    pub fn start() -> Self {
        Self {
            started_at: Utc::now(),
            start_time: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> i64 {
        self.start_time.elapsed().as_millis() as i64
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::start()
    }
}
