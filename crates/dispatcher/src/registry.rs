use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use courier_domain::{TaskPayload, TaskType};
use courier_errors::SchedulerResult;

/// 业务处理器，由外部注册，按任务类型分发
#[async_trait]
pub trait TaskHandler: Send + Sync {
    fn name(&self) -> &str;

    /// 成功时返回可选的文本结果；任何错误都按可重试失败处理
    async fn handle(&self, payload: &TaskPayload) -> SchedulerResult<Option<String>>;
}

#[derive(Clone)]
pub struct TaskHandlerRegistry {
    handlers: Arc<RwLock<HashMap<TaskType, Arc<dyn TaskHandler>>>>,
}

impl TaskHandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// 注册处理器，返回被替换的旧处理器（如有）
    pub async fn register(
        &self,
        task_type: TaskType,
        handler: Arc<dyn TaskHandler>,
    ) -> Option<Arc<dyn TaskHandler>> {
        let mut handlers = self.handlers.write().await;
        handlers.insert(task_type, handler)
    }

    pub async fn unregister(&self, task_type: TaskType) -> bool {
        let mut handlers = self.handlers.write().await;
        handlers.remove(&task_type).is_some()
    }

    pub async fn get(&self, task_type: TaskType) -> Option<Arc<dyn TaskHandler>> {
        let handlers = self.handlers.read().await;
        handlers.get(&task_type).cloned()
    }

    pub async fn contains(&self, task_type: TaskType) -> bool {
        self.handlers.read().await.contains_key(&task_type)
    }

    pub async fn registered_task_types(&self) -> Vec<TaskType> {
        let handlers = self.handlers.read().await;
        let mut types: Vec<TaskType> = handlers.keys().copied().collect();
        types.sort();
        types
    }
}

impl Default for TaskHandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoHandler(&'static str);

    #[async_trait]
    impl TaskHandler for EchoHandler {
        fn name(&self) -> &str {
            self.0
        }

        async fn handle(&self, payload: &TaskPayload) -> SchedulerResult<Option<String>> {
            Ok(Some(payload.task_type().to_string()))
        }
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let registry = TaskHandlerRegistry::new();
        assert!(registry.get(TaskType::CreditGrant).await.is_none());

        let previous = registry
            .register(TaskType::CreditGrant, Arc::new(EchoHandler("first")))
            .await;
        assert!(previous.is_none());

        let previous = registry
            .register(TaskType::CreditGrant, Arc::new(EchoHandler("second")))
            .await;
        assert_eq!(previous.unwrap().name(), "first");

        let handler = registry.get(TaskType::CreditGrant).await.unwrap();
        assert_eq!(handler.name(), "second");
        assert!(registry.contains(TaskType::CreditGrant).await);
    }

    #[tokio::test]
    async fn test_registered_task_types_sorted() {
        let registry = TaskHandlerRegistry::new();
        registry
            .register(TaskType::Custom, Arc::new(EchoHandler("custom")))
            .await;
        registry
            .register(TaskType::CreditGrant, Arc::new(EchoHandler("grant")))
            .await;

        assert_eq!(
            registry.registered_task_types().await,
            vec![TaskType::CreditGrant, TaskType::Custom]
        );

        assert!(registry.unregister(TaskType::Custom).await);
        assert!(!registry.unregister(TaskType::Custom).await);
        assert_eq!(
            registry.registered_task_types().await,
            vec![TaskType::CreditGrant]
        );
    }
}
