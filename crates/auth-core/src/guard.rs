//! 授权守卫
//!
//! 只提供角色层级与租户隔离两类原语，更高层的业务规则由调用方组合。

use horizon_common::{OrgRole, TenantId};
use tracing::warn;

use crate::error::{AuthError, AuthResult};
use crate::principal::Principal;

/// 租户守卫：携带租户的凭证只能操作同租户资源，与角色无关
pub fn ensure_same_tenant(principal: &Principal, target: &TenantId) -> AuthResult<()> {
    match principal.tenant_id() {
        Some(tenant) if tenant != target => {
            warn!(
                user_id = %principal.subject_id(),
                tenant_id = %tenant,
                target_tenant_id = %target,
                role = %principal.role(),
                "Cross-tenant access denied"
            );
            Err(AuthError::CrossTenantForbidden)
        }
        _ => Ok(()),
    }
}

/// scope 守卫：会话主体不受 scope 限制，API Key 主体必须精确持有该 scope
pub fn ensure_scope(principal: &Principal, scope: &str) -> AuthResult<()> {
    if !principal.is_api_key() || principal.has_scope(scope) {
        return Ok(());
    }
    Err(AuthError::ScopeInsufficient {
        required: scope.to_string(),
    })
}

/// 组织角色守卫；非成员视为无权限
pub fn ensure_org_role(role: Option<OrgRole>, min: OrgRole) -> AuthResult<()> {
    match role {
        Some(role) if role.at_least(min) => Ok(()),
        Some(role) => Err(AuthError::forbidden(format!(
            "Organization role {} required, have {}",
            min, role
        ))),
        None => Err(AuthError::forbidden("Not a member of the organization")),
    }
}

/// 是否具有管理权限；无法识别的角色字符串视为无权限
pub fn has_admin_privilege(role: &str) -> bool {
    OrgRole::parse_lenient(role).is_some_and(|r| r.has_admin_privilege())
}

/// 是否具有编辑权限（ADMIN、CONTRIBUTOR）；无法识别的角色字符串视为无权限
pub fn has_edit_privilege(role: &str) -> bool {
    OrgRole::parse_lenient(role).is_some_and(|r| r.has_edit_privilege())
}

/// 在边界处严格解析组织角色，未知值作为配置错误暴露
pub fn parse_org_role(role: &str) -> AuthResult<OrgRole> {
    Ok(role.parse::<OrgRole>()?)
}

/// scope 检查宏
#[macro_export]
macro_rules! require_scope {
    ($principal:expr, $scope:expr) => {
        if let Err(e) = $crate::guard::ensure_scope(&$principal, $scope) {
            return Err(::horizon_errors::AppError::from(e));
        }
    };
}

/// 平台角色检查宏
#[macro_export]
macro_rules! require_role {
    ($principal:expr, $role:expr) => {
        if $principal.role() != $role {
            return Err(::horizon_errors::AppError::forbidden(format!(
                "Missing role: {}",
                $role
            )));
        }
    };
}

/// 租户检查宏
#[macro_export]
macro_rules! require_tenant {
    ($principal:expr, $tenant:expr) => {
        if let Err(e) = $crate::guard::ensure_same_tenant(&$principal, $tenant) {
            return Err(::horizon_errors::AppError::from(e));
        }
    };
}
