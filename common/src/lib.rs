//! Mermaid validator common library
//!
//! 設定・エラー・Worker通信プロトコルの共通定義

#![warn(missing_docs)]

/// 設定管理（環境変数）
pub mod config;

/// エラー型定義
pub mod error;

/// 通信プロトコル定義
pub mod protocol;

/// 共通型定義
pub mod types;
