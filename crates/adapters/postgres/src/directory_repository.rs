//! 用户目录与组织成员关系（只读）
//!
//! 表结构归用户/组织子系统所有：
//! `users(uuid, username, role)`，`user_organization_links(organization_uuid, user_uuid, role)`。

use async_trait::async_trait;
use horizon_common::{OrgRole, Role, TenantId, UserId};
use horizon_errors::{AppError, AppResult};
use horizon_ports::{OrganizationMembership, UserAccount, UserDirectory};
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    uuid: Uuid,
    username: String,
    role: String,
}

impl TryFrom<UserRow> for UserAccount {
    type Error = AppError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let role = row
            .role
            .parse::<Role>()
            .map_err(|e| AppError::database(format!("Corrupt users row {}: {}", row.uuid, e)))?;
        Ok(UserAccount {
            id: UserId::from_uuid(row.uuid),
            username: row.username,
            role,
        })
    }
}

#[derive(Clone)]
pub struct PostgresUserDirectory {
    pool: PgPool,
}

impl PostgresUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PostgresUserDirectory {
    async fn find_by_subject_id(&self, id: &UserId) -> AppResult<Option<UserAccount>> {
        sqlx::query_as::<_, UserRow>("SELECT uuid, username, role FROM users WHERE uuid = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to find user: {}", e)))?
            .map(UserAccount::try_from)
            .transpose()
    }
}

#[derive(Clone)]
pub struct PostgresMembership {
    pool: PgPool,
}

impl PostgresMembership {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// 无法识别的角色按“无权限”处理
fn org_role_from_column(tenant: &TenantId, user: &UserId, raw: &str) -> Option<OrgRole> {
    let role = OrgRole::parse_lenient(raw);
    if role.is_none() {
        warn!(tenant_id = %tenant, user_id = %user, role = raw, "Unrecognized organization role");
    }
    role
}

#[async_trait]
impl OrganizationMembership for PostgresMembership {
    async fn role_of(&self, tenant: &TenantId, user: &UserId) -> AppResult<Option<OrgRole>> {
        let role: Option<(String,)> = sqlx::query_as(
            "SELECT role FROM user_organization_links WHERE organization_uuid = $1 AND user_uuid = $2",
        )
        .bind(tenant.0)
        .bind(user.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to find membership: {}", e)))?;

        Ok(role.and_then(|(raw,)| org_role_from_column(tenant, user, &raw)))
    }
}
