//! Workerプロセスのリソース使用量サンプリング
//!
//! CPU使用率は前回リフレッシュとの差分で算出されるため、`System`を保持して
//! 同じサンプラーを繰り返し使う。初回サンプルのCPUは0になる。

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// 1回分のリソース使用量
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceUsage {
    /// 常駐メモリ（MB）
    pub memory_mb: f64,
    /// CPU使用率（1コア=100%）
    pub cpu_percent: f32,
}

/// プロセス単位のリソースサンプラー
pub struct ResourceSampler {
    system: System,
}

impl ResourceSampler {
    /// 新しいサンプラーを作成
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    /// 指定PIDのメモリ・CPUを取得
    ///
    /// プロセスが存在しない場合は `None`
    pub fn sample(&mut self, pid: u32) -> Option<ResourceUsage> {
        let pid = Pid::from_u32(pid);
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing().with_memory().with_cpu(),
        );

        let process = self.system.process(pid)?;
        Some(ResourceUsage {
            memory_mb: process.memory() as f64 / BYTES_PER_MB,
            cpu_percent: process.cpu_usage(),
        })
    }
}

impl Default for ResourceSampler {
    fn default() -> Self {
        Self::new()
    }
}
