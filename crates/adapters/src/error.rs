//! Adapter 错误类型

use contracts::{ContractError, StageId};
use thiserror::Error;

/// Adapter 错误
#[derive(Debug, Error)]
pub enum AdapterError {
    /// 外部进程启动失败
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        /// 可执行文件
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// 外部进程非零退出
    #[error("'{program}' exited with {status}: {message}")]
    Exit {
        /// 可执行文件
        program: String,
        /// 退出状态描述
        status: String,
        /// stderr 最后一行（或固定说明）
        message: String,
    },

    /// 进程输出读取失败
    #[error("failed to read output of '{program}': {source}")]
    Output {
        /// 可执行文件
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// command 模式下缺少 stage 命令
    #[error("no command configured for stage '{}'", .stage.key())]
    MissingCommand {
        /// 缺失的 stage
        stage: StageId,
    },
}

/// Adapter Result 类型别名
pub type Result<T> = std::result::Result<T, AdapterError>;

impl AdapterError {
    fn tool_name(&self) -> &str {
        match self {
            Self::Spawn { program, .. }
            | Self::Exit { program, .. }
            | Self::Output { program, .. } => program,
            Self::MissingCommand { .. } => "command",
        }
    }

    /// Message surfaced as the failed stage's detail
    fn detail(&self) -> String {
        match self {
            Self::Exit { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<AdapterError> for ContractError {
    fn from(err: AdapterError) -> Self {
        match &err {
            AdapterError::MissingCommand { .. } => {
                ContractError::config_validation("tools.commands", err.to_string())
            }
            _ => ContractError::tool(err.tool_name(), err.detail()),
        }
    }
}
