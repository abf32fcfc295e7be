use crate::ports::{KeyStore, PlanStore, RouteStore, SettingStore, UpstreamStore, UsageStore, UsageSummary, UserStore};
use apigate_core::model::{ApiKey, Plan, Setting, UsageEvent, User};
use apigate_core::route::Route;
use apigate_core::upstream::Upstream;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};

/// SQLite-backed implementation of every typed persistence port, grounded
/// on `r2e-data-sqlx`'s pool/repository pattern. Tables and indexes follow
/// the reference relational schema in §6.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                plan_id TEXT NOT NULL,
                active INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                revoked_at TEXT
            );

            CREATE TABLE IF NOT EXISTS api_keys (
                id TEXT PRIMARY KEY,
                owner_principal_id TEXT NOT NULL,
                prefix TEXT NOT NULL,
                hash BLOB NOT NULL,
                scopes TEXT NOT NULL,
                created_at TEXT NOT NULL,
                expires_at TEXT,
                revoked_at TEXT,
                last_used_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_api_keys_prefix ON api_keys(prefix);
            CREATE INDEX IF NOT EXISTS idx_api_keys_user_id ON api_keys(owner_principal_id);

            CREATE TABLE IF NOT EXISTS plans (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                rate_limit_per_minute INTEGER NOT NULL,
                requests_per_month INTEGER NOT NULL,
                price_monthly REAL NOT NULL,
                overage_price REAL NOT NULL,
                enabled INTEGER NOT NULL,
                is_default INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS routes (
                id TEXT PRIMARY KEY,
                data TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS upstreams (
                id TEXT PRIMARY KEY,
                data TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                encrypted INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS usage_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                principal_id TEXT NOT NULL,
                key_id TEXT NOT NULL,
                route_id TEXT,
                method TEXT NOT NULL,
                path TEXT NOT NULL,
                status_code INTEGER NOT NULL,
                units REAL NOT NULL,
                request_bytes INTEGER NOT NULL,
                response_bytes INTEGER NOT NULL,
                duration_ns INTEGER NOT NULL,
                aborted INTEGER NOT NULL,
                timestamp TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_usage_events_user_ts ON usage_events(principal_id, timestamp);

            CREATE TABLE IF NOT EXISTS analytics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                data TEXT NOT NULL,
                timestamp TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_analytics_ts ON analytics(timestamp);
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn parse_dt(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[async_trait]
impl KeyStore for SqliteStore {
    async fn candidates_by_prefix(&self, prefix: &str) -> anyhow::Result<Vec<ApiKey>> {
        let rows = sqlx::query(
            "SELECT id, owner_principal_id, prefix, hash, scopes, created_at, expires_at, revoked_at, last_used_at FROM api_keys WHERE prefix = ?",
        )
        .bind(prefix)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(row_to_api_key).collect())
    }

    async fn get(&self, id: &str) -> anyhow::Result<Option<ApiKey>> {
        let row = sqlx::query(
            "SELECT id, owner_principal_id, prefix, hash, scopes, created_at, expires_at, revoked_at, last_used_at FROM api_keys WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(row_to_api_key))
    }

    async fn create(&self, key: &ApiKey) -> anyhow::Result<()> {
        let scopes = serde_json::to_string(&key.scopes)?;
        sqlx::query(
            "INSERT INTO api_keys (id, owner_principal_id, prefix, hash, scopes, created_at, expires_at, revoked_at, last_used_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&key.id)
        .bind(&key.owner_principal_id)
        .bind(&key.prefix)
        .bind(&key.hash)
        .bind(scopes)
        .bind(key.created_at.to_rfc3339())
        .bind(key.expires_at.map(|d| d.to_rfc3339()))
        .bind(key.revoked_at.map(|d| d.to_rfc3339()))
        .bind(key.last_used_at.map(|d| d.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn touch_last_used(&self, id: &str, at: DateTime<Utc>) -> anyhow::Result<()> {
        sqlx::query("UPDATE api_keys SET last_used_at = ? WHERE id = ?")
            .bind(at.to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn revoke(&self, id: &str, at: DateTime<Utc>) -> anyhow::Result<()> {
        sqlx::query("UPDATE api_keys SET revoked_at = ? WHERE id = ?")
            .bind(at.to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn row_to_api_key(row: sqlx::sqlite::SqliteRow) -> ApiKey {
    let scopes_json: String = row.get("scopes");
    ApiKey {
        id: row.get("id"),
        owner_principal_id: row.get("owner_principal_id"),
        prefix: row.get("prefix"),
        hash: row.get("hash"),
        scopes: serde_json::from_str(&scopes_json).unwrap_or_default(),
        created_at: parse_dt(&row.get::<String, _>("created_at")),
        expires_at: row.get::<Option<String>, _>("expires_at").map(|s| parse_dt(&s)),
        revoked_at: row.get::<Option<String>, _>("revoked_at").map(|s| parse_dt(&s)),
        last_used_at: row.get::<Option<String>, _>("last_used_at").map(|s| parse_dt(&s)),
    }
}

#[async_trait]
impl UserStore for SqliteStore {
    async fn get(&self, id: &str) -> anyhow::Result<Option<User>> {
        let row = sqlx::query("SELECT id, email, plan_id, active, created_at, revoked_at FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(row_to_user))
    }

    async fn get_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let row = sqlx::query("SELECT id, email, plan_id, active, created_at, revoked_at FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(row_to_user))
    }

    async fn list(&self, limit: i64, offset: i64) -> anyhow::Result<Vec<User>> {
        let rows = sqlx::query("SELECT id, email, plan_id, active, created_at, revoked_at FROM users ORDER BY created_at LIMIT ? OFFSET ?")
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(row_to_user).collect())
    }

    async fn create(&self, user: &User) -> anyhow::Result<()> {
        sqlx::query("INSERT INTO users (id, email, plan_id, active, created_at, revoked_at) VALUES (?, ?, ?, ?, ?, ?)")
            .bind(&user.id)
            .bind(&user.email)
            .bind(&user.plan_id)
            .bind(user.active)
            .bind(user.created_at.to_rfc3339())
            .bind(user.revoked_at.map(|d| d.to_rfc3339()))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update(&self, user: &User) -> anyhow::Result<()> {
        sqlx::query("UPDATE users SET email = ?, plan_id = ?, active = ?, revoked_at = ? WHERE id = ?")
            .bind(&user.email)
            .bind(&user.plan_id)
            .bind(user.active)
            .bind(user.revoked_at.map(|d| d.to_rfc3339()))
            .bind(&user.id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM users WHERE id = ?").bind(id).execute(&self.pool).await?;
        Ok(())
    }
}

fn row_to_user(row: sqlx::sqlite::SqliteRow) -> User {
    User {
        id: row.get("id"),
        email: row.get("email"),
        plan_id: row.get("plan_id"),
        active: row.get("active"),
        created_at: parse_dt(&row.get::<String, _>("created_at")),
        revoked_at: row.get::<Option<String>, _>("revoked_at").map(|s| parse_dt(&s)),
    }
}

#[async_trait]
impl PlanStore for SqliteStore {
    async fn get(&self, id: &str) -> anyhow::Result<Option<Plan>> {
        let row = sqlx::query("SELECT * FROM plans WHERE id = ?").bind(id).fetch_optional(&self.pool).await?;
        Ok(row.map(row_to_plan))
    }

    async fn get_by_name(&self, name: &str) -> anyhow::Result<Option<Plan>> {
        let row = sqlx::query("SELECT * FROM plans WHERE name = ?").bind(name).fetch_optional(&self.pool).await?;
        Ok(row.map(row_to_plan))
    }

    async fn list(&self) -> anyhow::Result<Vec<Plan>> {
        let rows = sqlx::query("SELECT * FROM plans").fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(row_to_plan).collect())
    }

    async fn default_plan(&self) -> anyhow::Result<Option<Plan>> {
        let row = sqlx::query("SELECT * FROM plans WHERE is_default = 1 LIMIT 1").fetch_optional(&self.pool).await?;
        Ok(row.map(row_to_plan))
    }

    async fn upsert(&self, plan: &Plan) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        if plan.is_default {
            sqlx::query("UPDATE plans SET is_default = 0 WHERE id != ?")
                .bind(&plan.id)
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query(
            "INSERT INTO plans (id, name, rate_limit_per_minute, requests_per_month, price_monthly, overage_price, enabled, is_default)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET name=excluded.name, rate_limit_per_minute=excluded.rate_limit_per_minute,
                requests_per_month=excluded.requests_per_month, price_monthly=excluded.price_monthly,
                overage_price=excluded.overage_price, enabled=excluded.enabled, is_default=excluded.is_default",
        )
        .bind(&plan.id)
        .bind(&plan.name)
        .bind(plan.rate_limit_per_minute)
        .bind(plan.requests_per_month as i64)
        .bind(plan.price_monthly)
        .bind(plan.overage_price)
        .bind(plan.enabled)
        .bind(plan.is_default)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM plans WHERE id = ?").bind(id).execute(&self.pool).await?;
        Ok(())
    }
}

fn row_to_plan(row: sqlx::sqlite::SqliteRow) -> Plan {
    Plan {
        id: row.get("id"),
        name: row.get("name"),
        rate_limit_per_minute: row.get::<i64, _>("rate_limit_per_minute") as u32,
        requests_per_month: row.get::<i64, _>("requests_per_month") as u64,
        price_monthly: row.get("price_monthly"),
        overage_price: row.get("overage_price"),
        enabled: row.get("enabled"),
        is_default: row.get("is_default"),
    }
}

#[async_trait]
impl RouteStore for SqliteStore {
    async fn list(&self) -> anyhow::Result<Vec<Route>> {
        let rows = sqlx::query("SELECT data FROM routes").fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .filter_map(|r| serde_json::from_str::<Route>(&r.get::<String, _>("data")).ok())
            .collect())
    }

    async fn get(&self, id: &str) -> anyhow::Result<Option<Route>> {
        let row = sqlx::query("SELECT data FROM routes WHERE id = ?").bind(id).fetch_optional(&self.pool).await?;
        Ok(row.and_then(|r| serde_json::from_str(&r.get::<String, _>("data")).ok()))
    }

    async fn upsert(&self, route: &Route) -> anyhow::Result<()> {
        let data = serde_json::to_string(route)?;
        sqlx::query("INSERT INTO routes (id, data) VALUES (?, ?) ON CONFLICT(id) DO UPDATE SET data = excluded.data")
            .bind(&route.id)
            .bind(data)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM routes WHERE id = ?").bind(id).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl UpstreamStore for SqliteStore {
    async fn list(&self) -> anyhow::Result<Vec<Upstream>> {
        let rows = sqlx::query("SELECT data FROM upstreams").fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .filter_map(|r| serde_json::from_str::<Upstream>(&r.get::<String, _>("data")).ok())
            .collect())
    }

    async fn get(&self, id: &str) -> anyhow::Result<Option<Upstream>> {
        let row = sqlx::query("SELECT data FROM upstreams WHERE id = ?").bind(id).fetch_optional(&self.pool).await?;
        Ok(row.and_then(|r| serde_json::from_str(&r.get::<String, _>("data")).ok()))
    }

    async fn upsert(&self, upstream: &Upstream) -> anyhow::Result<()> {
        let data = serde_json::to_string(upstream)?;
        sqlx::query("INSERT INTO upstreams (id, data) VALUES (?, ?) ON CONFLICT(id) DO UPDATE SET data = excluded.data")
            .bind(&upstream.id)
            .bind(data)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM upstreams WHERE id = ?").bind(id).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl SettingStore for SqliteStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Setting>> {
        let row = sqlx::query("SELECT key, value, encrypted FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(row_to_setting))
    }

    async fn list_prefixed(&self, prefix: &str) -> anyhow::Result<Vec<Setting>> {
        let pattern = format!("{prefix}%");
        let rows = sqlx::query("SELECT key, value, encrypted FROM settings WHERE key LIKE ?")
            .bind(pattern)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(row_to_setting).collect())
    }

    async fn set(&self, setting: &Setting) -> anyhow::Result<()> {
        sqlx::query("INSERT INTO settings (key, value, encrypted) VALUES (?, ?, ?) ON CONFLICT(key) DO UPDATE SET value = excluded.value, encrypted = excluded.encrypted")
            .bind(&setting.key)
            .bind(&setting.value)
            .bind(setting.encrypted)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM settings WHERE key = ?").bind(key).execute(&self.pool).await?;
        Ok(())
    }
}

fn row_to_setting(row: sqlx::sqlite::SqliteRow) -> Setting {
    Setting {
        key: row.get("key"),
        value: row.get("value"),
        encrypted: row.get("encrypted"),
    }
}

#[async_trait]
impl UsageStore for SqliteStore {
    async fn record_batch(&self, events: &[UsageEvent]) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        for event in events {
            sqlx::query(
                "INSERT INTO usage_events (principal_id, key_id, route_id, method, path, status_code, units, request_bytes, response_bytes, duration_ns, aborted, timestamp)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&event.principal_id)
            .bind(&event.key_id)
            .bind(&event.route_id)
            .bind(&event.method)
            .bind(&event.path)
            .bind(event.status_code as i64)
            .bind(event.units)
            .bind(event.request_bytes as i64)
            .bind(event.response_bytes as i64)
            .bind(event.duration_ns as i64)
            .bind(event.aborted)
            .bind(event.timestamp.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_summary(
        &self,
        principal_id: &str,
        month_start: DateTime<Utc>,
        month_end: DateTime<Utc>,
    ) -> anyhow::Result<UsageSummary> {
        let row = sqlx::query(
            "SELECT COUNT(*) as count, COALESCE(SUM(units), 0.0) as units FROM usage_events
             WHERE principal_id = ? AND timestamp >= ? AND timestamp < ?",
        )
        .bind(principal_id)
        .bind(month_start.to_rfc3339())
        .bind(month_end.to_rfc3339())
        .fetch_one(&self.pool)
        .await?;
        Ok(UsageSummary {
            count: row.get::<i64, _>("count") as u64,
            units: row.get("units"),
        })
    }
}
