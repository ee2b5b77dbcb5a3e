use std::sync::Arc;
use tokio::sync::Mutex;

use crate::bail;
use crate::error::{ErrorKind, SyncResult};
use crate::target::warehouse::QueryClient;

/// Records executed statements instead of running them.
///
/// Statements containing one of the `failing_on` patterns fail with
/// [`ErrorKind::TargetQueryFailed`] and are not recorded.
#[derive(Debug, Clone, Default)]
pub struct RecordingQueryClient {
    statements: Arc<Mutex<Vec<String>>>,
    fail_on: Vec<String>,
}

impl RecordingQueryClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(mut self, pattern: impl Into<String>) -> Self {
        self.fail_on.push(pattern.into());
        self
    }

    pub async fn statements(&self) -> Vec<String> {
        self.statements.lock().await.clone()
    }
}

impl QueryClient for RecordingQueryClient {
    async fn execute(&self, statements: &[String]) -> SyncResult<()> {
        let mut executed = self.statements.lock().await;
        for statement in statements {
            if self
                .fail_on
                .iter()
                .any(|pattern| statement.contains(pattern.as_str()))
            {
                bail!(
                    ErrorKind::TargetQueryFailed,
                    "Injected query failure",
                    statement
                );
            }
            executed.push(statement.clone());
        }

        Ok(())
    }
}
