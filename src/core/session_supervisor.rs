//! 会话监管：外部中止
//!
//! 持有 CancellationToken；用户 Ctrl+C 或批处理整体中止时取消。编排器在每次阶段转移前检查，
//! 不在阶段内部打断。每个会话可取子 token，单独取消不影响其它会话。

use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default)]
pub struct SessionSupervisor {
    cancel_token: CancellationToken,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// 触发取消（用户 Ctrl+C）
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// 创建子 token（用于单个会话）
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_propagates_to_children_only_downward() {
        let supervisor = SessionSupervisor::new();
        let a = supervisor.child_token();
        let b = supervisor.child_token();

        a.cancel();
        assert!(!supervisor.is_cancelled());
        assert!(!b.is_cancelled());

        supervisor.cancel();
        assert!(b.is_cancelled());
        assert!(supervisor.cancel_token().is_cancelled());
    }
}
