//! ライフサイクルイベントバス
//!
//! Workerの起動・停止・シグナル送信・再起動・プローブ失敗などのイベントを
//! 購読者（ログ、テスト、ルーター層）にブロードキャストするための基盤

use mermaid_validator_common::types::WorkerStatus;
use serde::Serialize;
use tokio::sync::broadcast;

/// イベントバスのチャネル容量
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// ライフサイクルイベント
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum LifecycleEvent {
    /// ステータス変化
    StatusChanged {
        /// 旧ステータス
        old: WorkerStatus,
        /// 新ステータス
        new: WorkerStatus,
    },
    /// Workerプロセス起動
    Spawned {
        /// プロセスID
        pid: u32,
    },
    /// シグナル送信（SIGTERM / SIGKILL）
    SignalSent {
        /// プロセスID
        pid: u32,
        /// シグナル名
        signal: String,
    },
    /// Workerプロセス終了
    Exited {
        /// プロセスID
        pid: u32,
        /// 終了コード
        code: Option<i32>,
        /// 停止・再起動処理中の終了かどうか
        expected: bool,
    },
    /// ヘルスプローブ失敗
    ProbeFailed {
        /// 連続失敗回数
        consecutive_failures: u32,
        /// 失敗理由
        reason: String,
    },
    /// 再起動開始
    RestartStarted,
    /// 再起動完了
    RestartFinished {
        /// Readyに到達したかどうか
        success: bool,
        /// 起動試行回数
        attempts: u32,
    },
}

/// ライフサイクルイベントバス
#[derive(Clone)]
pub struct LifecycleEvents {
    sender: broadcast::Sender<LifecycleEvent>,
}

impl Default for LifecycleEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleEvents {
    /// 新しいイベントバスを作成
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    /// イベントバスを購読
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }

    /// イベントを発行
    ///
    /// 購読者がいない場合でもエラーにはならない
    pub fn publish(&self, event: LifecycleEvent) {
        let _ = self.sender.send(event);
    }
}
