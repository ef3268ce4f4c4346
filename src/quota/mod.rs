//! 按服务划分的配额管理
//!
//! ```text
//!     quota/
//!     ├── mod.rs      (模块组织)
//!     ├── window.rs   (固定窗口与配额规则)
//!     ├── clock.rs    (可注入的时钟)
//!     └── limiter.rs  (RateLimiter 准入控制)
//! ```
//!
//! 每个外部服务一条配额规则，按固定窗口（秒、分、时、日、自然月，UTC）计量。
//! 准入在花费之前完成：`try_acquire` 立即返回，`wait_acquire` 只挂起调用者。

mod clock;
mod limiter;
mod window;

pub use clock::{Clock, ManualClock, SystemClock};
pub use limiter::{QuotaStatus, RateLimiter};
pub use window::{QuotaRule, QuotaUnit, QuotaWindow, WindowPeriod};
