//! 内存版用户目录与组织成员关系

use async_trait::async_trait;
use horizon_common::{OrgRole, TenantId, UserId};
use horizon_errors::AppResult;
use horizon_ports::{OrganizationMembership, UserAccount, UserDirectory};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::outage::Outage;

#[derive(Debug, Default)]
pub struct MemoryUserDirectory {
    users: Mutex<HashMap<UserId, UserAccount>>,
    outage: Outage,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, account: UserAccount) {
        let mut users = self.users.lock().unwrap_or_else(|e| e.into_inner());
        users.insert(account.id.clone(), account);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.outage.set_unavailable(unavailable);
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn find_by_subject_id(&self, id: &UserId) -> AppResult<Option<UserAccount>> {
        self.outage.check("users.find_by_subject_id").await?;
        let users = self.users.lock().unwrap_or_else(|e| e.into_inner());
        Ok(users.get(id).cloned())
    }
}

#[derive(Debug, Default)]
pub struct MemoryMembership {
    roles: Mutex<HashMap<(TenantId, UserId), OrgRole>>,
    outage: Outage,
}

impl MemoryMembership {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_role(&self, tenant: &TenantId, user: &UserId, role: OrgRole) {
        let mut roles = self.roles.lock().unwrap_or_else(|e| e.into_inner());
        roles.insert((tenant.clone(), user.clone()), role);
    }

    pub fn remove(&self, tenant: &TenantId, user: &UserId) {
        let mut roles = self.roles.lock().unwrap_or_else(|e| e.into_inner());
        roles.remove(&(tenant.clone(), user.clone()));
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.outage.set_unavailable(unavailable);
    }
}

#[async_trait]
impl OrganizationMembership for MemoryMembership {
    async fn role_of(&self, tenant: &TenantId, user: &UserId) -> AppResult<Option<OrgRole>> {
        self.outage.check("memberships.role_of").await?;
        let roles = self.roles.lock().unwrap_or_else(|e| e.into_inner());
        Ok(roles.get(&(tenant.clone(), user.clone())).copied())
    }
}
