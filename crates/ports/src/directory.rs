//! 用户目录与组织成员关系

use async_trait::async_trait;
use horizon_common::{OrgRole, Role, TenantId, UserId};
use horizon_errors::AppResult;

/// 用户目录中的账号摘要
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAccount {
    pub id: UserId,
    pub username: String,
    pub role: Role,
}

/// 用户目录
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_subject_id(&self, id: &UserId) -> AppResult<Option<UserAccount>>;
}

/// 组织成员关系
#[async_trait]
pub trait OrganizationMembership: Send + Sync {
    /// 用户在组织内的角色；非成员或角色无法识别时返回 `None`
    async fn role_of(&self, tenant: &TenantId, user: &UserId) -> AppResult<Option<OrgRole>>;
}
