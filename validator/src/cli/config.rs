//! config サブコマンド
//!
//! 環境変数から解決した設定をJSONで表示します。

use clap::Args;
use mermaid_validator_common::config::ValidatorConfig;

/// config サブコマンドの引数
#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Print compact JSON instead of pretty JSON
    #[arg(long, default_value_t = false)]
    pub compact: bool,
}

/// config コマンドを実行
pub fn execute(args: &ConfigArgs, config: &ValidatorConfig) -> Result<(), anyhow::Error> {
    println!("{}", render(args, config)?);
    Ok(())
}

fn render(args: &ConfigArgs, config: &ValidatorConfig) -> serde_json::Result<String> {
    if args.compact {
        serde_json::to_string(config)
    } else {
        serde_json::to_string_pretty(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_compact() {
        let config = ValidatorConfig::new(env!("CARGO_MANIFEST_DIR")).unwrap();
        let json = render(&ConfigArgs { compact: true }, &config).unwrap();

        assert!(!json.contains('\n'));
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["port"], 3001);
        assert_eq!(value["interpreter"], "node");
    }
}
