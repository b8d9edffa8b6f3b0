//! ヘルスチェック監視
//!
//! Workerの `/health` を定期的にプローブし、連続失敗が閾値に達したら
//! スーパーバイザーに再起動を依頼する。

pub mod monitor;
pub mod probe;
pub mod resources;

pub use monitor::{HealthMonitor, TickOutcome};
pub use probe::{HealthProbe, ProbeError};
pub use resources::{ResourceSampler, ResourceUsage};
