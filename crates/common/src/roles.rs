//! 角色定义
//!
//! 平台角色 `Role` 随会话令牌下发；组织角色 `OrgRole` 描述用户在某个租户内的权限。
//! 两者都是封闭枚举：严格解析失败返回 `RoleParseError`，宽松解析失败视为“无权限”。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// 角色解析错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown {kind} role: {value}")]
pub struct RoleParseError {
    pub kind: &'static str,
    pub value: String,
}

/// 平台角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    Moderator,
    User,
    /// API Key 认证的主体固定使用该角色
    Api,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "ADMIN",
            Self::Moderator => "MODERATOR",
            Self::User => "USER",
            Self::Api => "API",
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Self::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = RoleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ADMIN" => Ok(Self::Admin),
            "MODERATOR" => Ok(Self::Moderator),
            "USER" => Ok(Self::User),
            "API" => Ok(Self::Api),
            other => Err(RoleParseError {
                kind: "platform",
                value: other.to_string(),
            }),
        }
    }
}

/// 组织角色
///
/// 权限层级：ADMIN > CONTRIBUTOR / MEMBER > OBSERVER / VIEWER > GUEST
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrgRole {
    Admin,
    Contributor,
    Member,
    Observer,
    Viewer,
    Guest,
}

impl OrgRole {
    pub const ALL: [OrgRole; 6] = [
        Self::Admin,
        Self::Contributor,
        Self::Member,
        Self::Observer,
        Self::Viewer,
        Self::Guest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "ADMIN",
            Self::Contributor => "CONTRIBUTOR",
            Self::Member => "MEMBER",
            Self::Observer => "OBSERVER",
            Self::Viewer => "VIEWER",
            Self::Guest => "GUEST",
        }
    }

    /// 权限等级，数值越大权限越高
    pub fn privilege_level(&self) -> u8 {
        match self {
            Self::Admin => 3,
            Self::Contributor | Self::Member => 2,
            Self::Observer | Self::Viewer => 1,
            Self::Guest => 0,
        }
    }

    /// 是否不低于给定角色
    pub fn at_least(&self, min: OrgRole) -> bool {
        self.privilege_level() >= min.privilege_level()
    }

    /// 是否具有管理权限
    pub fn has_admin_privilege(&self) -> bool {
        matches!(self, Self::Admin)
    }

    /// 是否具有编辑权限（MEMBER 不含编辑权限）
    pub fn has_edit_privilege(&self) -> bool {
        matches!(self, Self::Admin | Self::Contributor)
    }

    /// 宽松解析：忽略大小写与首尾空白，无法识别时返回 `None`（即无权限）
    pub fn parse_lenient(s: &str) -> Option<Self> {
        let normalized = s.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|role| role.as_str() == normalized)
    }
}

impl fmt::Display for OrgRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrgRole {
    type Err = RoleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| RoleParseError {
                kind: "organization",
                value: s.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_org_role_hierarchy() {
        assert!(OrgRole::Admin.at_least(OrgRole::Contributor));
        assert!(OrgRole::Member.at_least(OrgRole::Contributor));
        assert!(OrgRole::Contributor.at_least(OrgRole::Member));
        assert!(OrgRole::Viewer.at_least(OrgRole::Observer));
        assert!(!OrgRole::Viewer.at_least(OrgRole::Member));
        assert!(!OrgRole::Guest.at_least(OrgRole::Viewer));
    }

    #[test]
    fn test_privilege_predicates() {
        assert!(OrgRole::Admin.has_admin_privilege());
        assert!(!OrgRole::Contributor.has_admin_privilege());

        assert!(OrgRole::Admin.has_edit_privilege());
        assert!(OrgRole::Contributor.has_edit_privilege());
        assert!(!OrgRole::Member.has_edit_privilege());
        assert!(!OrgRole::Guest.has_edit_privilege());
    }

    #[test]
    fn test_strict_parse_rejects_unknown() {
        assert_eq!("ADMIN".parse::<OrgRole>().unwrap(), OrgRole::Admin);
        let err = "admin".parse::<OrgRole>().unwrap_err();
        assert_eq!(err.value, "admin");
        assert!("OWNER".parse::<OrgRole>().is_err());
        assert!("SUPERUSER".parse::<Role>().is_err());
    }

    #[test]
    fn test_lenient_parse_degrades_to_no_privilege() {
        assert_eq!(OrgRole::parse_lenient(" viewer "), Some(OrgRole::Viewer));
        assert_eq!(OrgRole::parse_lenient("owner"), None);
        assert_eq!(OrgRole::parse_lenient(""), None);
    }

    #[test]
    fn test_role_serde_uses_upper_case_codes() {
        assert_eq!(serde_json::to_string(&Role::Api).unwrap(), "\"API\"");
        let role: OrgRole = serde_json::from_str("\"CONTRIBUTOR\"").unwrap();
        assert_eq!(role, OrgRole::Contributor);
    }
}
