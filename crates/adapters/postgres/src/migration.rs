//! 数据库迁移
//!
//! 迁移脚本随二进制一起编译（`migrations/*.sql`），启动时按版本顺序应用。

use horizon_errors::{AppError, AppResult};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use std::collections::HashMap;
use tracing::{info, warn};

const MIGRATION_TABLE: &str = "_horizon_migrations";

/// 已应用的迁移记录
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MigrationRecord {
    pub version: i64,
    pub name: String,
    pub applied_at: chrono::DateTime<chrono::Utc>,
    pub checksum: String,
}

/// 迁移定义
#[derive(Debug, Clone)]
pub struct Migration {
    pub version: i64,
    pub name: &'static str,
    pub up_sql: &'static str,
    /// `up_sql` 的 SHA-256，用于发现已应用脚本被修改
    pub checksum: String,
}

impl Migration {
    pub fn new(version: i64, name: &'static str, up_sql: &'static str) -> Self {
        Self {
            version,
            name,
            up_sql,
            checksum: hex::encode(Sha256::digest(up_sql.as_bytes())),
        }
    }
}

/// 本服务拥有的表结构
pub fn schema_migrations() -> Vec<Migration> {
    vec![
        Migration::new(
            1,
            "create_api_keys",
            include_str!("../migrations/0001_create_api_keys.sql"),
        ),
        Migration::new(
            2,
            "create_api_key_usage_logs",
            include_str!("../migrations/0002_create_api_key_usage_logs.sql"),
        ),
    ]
}

/// 迁移结果
#[derive(Debug, Clone, Default)]
pub struct MigrationResult {
    pub applied: Vec<i64>,
    pub skipped: Vec<i64>,
    pub errors: Vec<MigrationError>,
}

impl MigrationResult {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn applied_count(&self) -> usize {
        self.applied.len()
    }
}

/// 单个迁移的失败信息
#[derive(Debug, Clone)]
pub struct MigrationError {
    pub version: i64,
    pub name: String,
    pub error: String,
}

/// 迁移管理器
pub struct MigrationManager {
    pool: PgPool,
}

impl MigrationManager {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 创建迁移记录表
    pub async fn init(&self) -> AppResult<()> {
        let create_sql = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                version BIGINT PRIMARY KEY,
                name VARCHAR(255) NOT NULL,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                checksum VARCHAR(64) NOT NULL
            )
            "#,
            MIGRATION_TABLE
        );

        sqlx::query(&create_sql)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to create migration table: {}", e)))?;
        Ok(())
    }

    pub async fn applied_migrations(&self) -> AppResult<Vec<MigrationRecord>> {
        let sql = format!(
            "SELECT version, name, applied_at, checksum FROM {} ORDER BY version ASC",
            MIGRATION_TABLE
        );

        sqlx::query_as::<_, MigrationRecord>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to get migrations: {}", e)))
    }

    /// 在单个事务中执行迁移脚本并写入记录
    pub async fn apply(&self, migration: &Migration) -> AppResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::database(format!("Failed to begin transaction: {}", e)))?;

        // 脚本可能包含多条语句，走简单查询协议
        sqlx::raw_sql(migration.up_sql)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::database(format!(
                    "Failed to apply migration {}: {}",
                    migration.version, e
                ))
            })?;

        let insert_sql = format!(
            "INSERT INTO {} (version, name, checksum) VALUES ($1, $2, $3)",
            MIGRATION_TABLE
        );
        sqlx::query(&insert_sql)
            .bind(migration.version)
            .bind(migration.name)
            .bind(&migration.checksum)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::database(format!("Failed to record migration: {}", e)))?;

        tx.commit()
            .await
            .map_err(|e| AppError::database(format!("Failed to commit migration: {}", e)))?;

        info!(
            version = migration.version,
            name = migration.name,
            "Migration applied"
        );
        Ok(())
    }

    /// 应用所有未执行的迁移；遇到第一个失败即停止
    pub async fn migrate(&self, migrations: &[Migration]) -> AppResult<MigrationResult> {
        self.init().await?;

        let applied: HashMap<i64, String> = self
            .applied_migrations()
            .await?
            .into_iter()
            .map(|r| (r.version, r.checksum))
            .collect();

        let mut sorted: Vec<_> = migrations.iter().collect();
        sorted.sort_by_key(|m| m.version);

        let mut result = MigrationResult::default();
        for migration in sorted {
            if let Some(checksum) = applied.get(&migration.version) {
                if checksum != &migration.checksum {
                    warn!(
                        version = migration.version,
                        name = migration.name,
                        "Applied migration has been modified"
                    );
                    result.errors.push(MigrationError {
                        version: migration.version,
                        name: migration.name.to_string(),
                        error: "Checksum mismatch - migration has been modified".to_string(),
                    });
                    continue;
                }
                result.skipped.push(migration.version);
                continue;
            }

            if let Err(e) = self.apply(migration).await {
                result.errors.push(MigrationError {
                    version: migration.version,
                    name: migration.name.to_string(),
                    error: e.to_string(),
                });
                break;
            }
            result.applied.push(migration.version);
        }

        Ok(result)
    }
}

/// 应用本服务的全部迁移，任何失败都作为错误返回
pub async fn run_migrations(pool: &PgPool) -> AppResult<MigrationResult> {
    let result = MigrationManager::new(pool.clone())
        .migrate(&schema_migrations())
        .await?;

    if let Some(failure) = result.errors.first() {
        return Err(AppError::database(format!(
            "Migration {} ({}) failed: {}",
            failure.version, failure.name, failure.error
        )));
    }
    Ok(result)
}
