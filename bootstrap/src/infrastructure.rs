//! 基础设施装配
//!
//! 连接 PostgreSQL 与 Redis、执行迁移，并组装认证相关服务。

use std::sync::Arc;

use horizon_adapter_postgres::{
    PostgresApiKeyStore, PostgresConfig, PostgresMembership, PostgresUsageAuditSink,
    PostgresUserDirectory, check_connection as check_postgres, create_pool, run_migrations,
};
use horizon_adapter_redis::{
    RedisRevocationStore, check_connection as check_redis, create_connection_manager,
};
use horizon_auth_core::{
    ApiKeyAuthenticator, ApiKeyPolicy, AuthenticationChain, SignedState, SigningKey, TokenService,
};
use horizon_config::AppConfig;
use horizon_errors::AppResult;
use horizon_ports::UsageAuditSink;
use horizon_telemetry::HealthStatus;
use redis::aio::ConnectionManager;
use secrecy::ExposeSecret;
use sqlx::PgPool;
use tracing::info;

use crate::retry::{RetryConfig, with_retry};

/// 基础设施资源容器
pub struct Infrastructure {
    config: AppConfig,
    postgres_pool: PgPool,
    redis_conn: ConnectionManager,
    token_service: Arc<TokenService>,
    api_keys: Arc<ApiKeyAuthenticator>,
    usage_sink: Arc<dyn UsageAuditSink>,
    state_signer: Option<SignedState>,
}

impl Infrastructure {
    /// 从配置创建基础设施资源（连接带重试）
    pub async fn from_config(config: AppConfig) -> AppResult<Self> {
        let retry_config = RetryConfig::default();

        // 签名密钥最先解析，缺失时不必再去连接外部依赖
        let signing_key = SigningKey::resolve(&config)?;

        let pg_config = PostgresConfig::new(config.database.url.expose_secret())
            .with_max_connections(config.database.max_connections);
        let postgres_pool = with_retry(&retry_config, "PostgreSQL connection", || {
            let cfg = pg_config.clone();
            async move { create_pool(&cfg).await }
        })
        .await?;
        info!(
            max_connections = config.database.max_connections,
            "PostgreSQL connection pool created"
        );

        let migrations = run_migrations(&postgres_pool).await?;
        info!(
            applied = migrations.applied_count(),
            skipped = migrations.skipped.len(),
            "Database migrations complete"
        );

        let redis_url = config.redis.url.clone();
        let redis_conn = with_retry(&retry_config, "Redis connection", || {
            let url = redis_url.expose_secret().clone();
            async move { create_connection_manager(&url).await }
        })
        .await?;
        info!("Redis connection created");

        let revocations = Arc::new(RedisRevocationStore::new(
            redis_conn.clone(),
            config.redis.key_prefix.clone(),
        ));
        let token_service = Arc::new(TokenService::new(
            &config.jwt,
            &signing_key,
            revocations,
            config.api_key.store_timeout(),
        )?);

        let usage_sink: Arc<dyn UsageAuditSink> =
            Arc::new(PostgresUsageAuditSink::new(postgres_pool.clone()));
        let api_keys = Arc::new(ApiKeyAuthenticator::new(
            Arc::new(PostgresApiKeyStore::new(postgres_pool.clone())),
            Arc::new(PostgresUserDirectory::new(postgres_pool.clone())),
            Arc::new(PostgresMembership::new(postgres_pool.clone())),
            usage_sink.clone(),
            ApiKeyPolicy::from_config(&config.api_key),
        ));

        let state_signer = match &config.oauth.state_secret {
            Some(secret) => Some(SignedState::new(secret.expose_secret().as_bytes())?),
            None => {
                info!("oauth.state_secret not configured, signed state disabled");
                None
            }
        };

        info!(
            issuer = %config.jwt.issuer,
            ephemeral_key = signing_key.is_ephemeral(),
            "Authentication services ready"
        );

        Ok(Self {
            config,
            postgres_pool,
            redis_conn,
            token_service,
            api_keys,
            usage_sink,
            state_signer,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn postgres_pool(&self) -> PgPool {
        self.postgres_pool.clone()
    }

    pub fn redis_connection(&self) -> ConnectionManager {
        self.redis_conn.clone()
    }

    pub fn token_service(&self) -> Arc<TokenService> {
        self.token_service.clone()
    }

    pub fn api_keys(&self) -> Arc<ApiKeyAuthenticator> {
        self.api_keys.clone()
    }

    pub fn usage_sink(&self) -> Arc<dyn UsageAuditSink> {
        self.usage_sink.clone()
    }

    pub fn state_signer(&self) -> Option<&SignedState> {
        self.state_signer.as_ref()
    }

    /// API Key 优先、会话令牌兜底的认证链
    pub fn auth_chain(&self) -> AuthenticationChain {
        AuthenticationChain::standard(self.api_keys(), self.token_service())
    }

    /// 就绪检查：PostgreSQL 与 Redis
    pub async fn readiness(&self) -> HealthStatus {
        let mut status = HealthStatus::new();

        match check_postgres(&self.postgres_pool).await {
            Ok(()) => status.add_check("postgres", true, None),
            Err(e) => status.add_check("postgres", false, Some(e.to_string())),
        }
        match check_redis(&self.redis_conn).await {
            Ok(()) => status.add_check("redis", true, None),
            Err(e) => status.add_check("redis", false, Some(e.to_string())),
        }

        status
    }
}
