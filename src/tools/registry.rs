//! 工具目录与注册表
//!
//! 编排器只依赖 ToolCatalog::invoke(tool_name, args)。ToolRegistry 是按名注册 Tool 的默认实现；
//! 具体工具（查车次、订票、开票等）由宿主进程注册。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::ToolExecutionError;

/// 工具目录：编排器发起工具效果的唯一入口
#[async_trait]
pub trait ToolCatalog: Send + Sync {
    async fn invoke(&self, tool_name: &str, args: Value) -> Result<Value, ToolExecutionError>;
}

/// 单个工具：名称 + 异步执行（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    async fn invoke(&self, args: Value) -> Result<Value, ToolExecutionError>;
}

/// 工具注册表：按名称存储 Arc<dyn Tool>
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }
}

#[async_trait]
impl ToolCatalog for ToolRegistry {
    async fn invoke(&self, tool_name: &str, args: Value) -> Result<Value, ToolExecutionError> {
        let tool = self
            .tools
            .get(tool_name)
            .ok_or_else(|| ToolExecutionError::permanent(format!("Unknown tool: {tool_name}")))?;
        tool.invoke(args).await
    }
}
