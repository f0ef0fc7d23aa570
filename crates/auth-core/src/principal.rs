//! 请求主体

use horizon_common::{ApiKeyId, Role, TenantId, UserId};
use serde::Serialize;
use std::collections::BTreeSet;

use crate::api_key::ApiKeyContext;
use crate::claims::Claims;
use crate::error::AuthResult;

/// 主体类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubjectType {
    User,
    ApiKey,
}

/// 每个请求新建、构造后不可变的认证主体
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    subject_type: SubjectType,
    subject_id: UserId,
    tenant_id: Option<TenantId>,
    role: Role,
    scopes: BTreeSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    api_key_id: Option<ApiKeyId>,
}

impl Principal {
    /// 会话主体：没有租户限制，也没有 scope 限制
    pub fn from_session(claims: &Claims) -> AuthResult<Self> {
        Ok(Self {
            subject_type: SubjectType::User,
            subject_id: claims.user_id()?,
            tenant_id: None,
            role: claims.role,
            scopes: BTreeSet::new(),
            api_key_id: None,
        })
    }

    /// API Key 主体：subject 为 Key 的创建者，角色固定为 `Role::Api`
    pub fn from_api_key(context: ApiKeyContext) -> Self {
        Self {
            subject_type: SubjectType::ApiKey,
            subject_id: context.owner_user_id,
            tenant_id: context.tenant_id,
            role: Role::Api,
            scopes: context.scopes,
            api_key_id: Some(context.api_key_id),
        }
    }

    pub fn subject_type(&self) -> SubjectType {
        self.subject_type
    }

    pub fn subject_id(&self) -> &UserId {
        &self.subject_id
    }

    pub fn tenant_id(&self) -> Option<&TenantId> {
        self.tenant_id.as_ref()
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn scopes(&self) -> &BTreeSet<String> {
        &self.scopes
    }

    pub fn api_key_id(&self) -> Option<&ApiKeyId> {
        self.api_key_id.as_ref()
    }

    pub fn is_api_key(&self) -> bool {
        self.subject_type == SubjectType::ApiKey
    }

    /// 精确匹配 scope
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.contains(scope)
    }
}
