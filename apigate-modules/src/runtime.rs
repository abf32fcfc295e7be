use crate::schema::{DerivedModule, FieldType, Module};
use apigate_core::error::{ErrorKind, GatewayError};
use apigate_hooks::{Event, EventBus, FunctionRegistry, HookContext, HookDispatcher};
use chrono::Utc;
use dashmap::DashMap;
use serde_json::{json, Map, Value};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;

/// Outcome of `Execute` (§4.9). `meta` surfaces out-of-band values like a
/// raw API key shown exactly once.
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    pub data: Value,
    pub list: Option<Vec<Value>>,
    pub count: Option<u64>,
    pub meta: Value,
}

impl ActionOutcome {
    fn single(data: Value) -> Self {
        Self {
            data,
            list: None,
            count: None,
            meta: Value::Null,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct ListQuery {
    pub limit: i64,
    pub offset: i64,
    pub order_by: Option<String>,
    pub filters: Vec<(String, String)>,
}

/// Loads modules, owns their SQLite-backed storage, and runs the §4.9
/// execution loop: one engine driven by `DerivedModule` metadata instead
/// of a handler per resource type.
pub struct ModuleRuntime {
    modules: DashMap<String, Arc<DerivedModule>>,
    pool: SqlitePool,
    hooks: Arc<HookDispatcher>,
    functions: Arc<FunctionRegistry>,
    events: Arc<EventBus>,
}

impl ModuleRuntime {
    pub async fn new(
        database_url: &str,
        hooks: Arc<HookDispatcher>,
        functions: Arc<FunctionRegistry>,
        events: Arc<EventBus>,
    ) -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new().max_connections(8).connect(database_url).await?;
        Ok(Self {
            modules: DashMap::new(),
            pool,
            hooks,
            functions,
            events,
        })
    }

    /// Load-modules phase: single writer, read-mostly thereafter (§5).
    pub async fn load_module(&self, module: Module) -> anyhow::Result<()> {
        let derived = DerivedModule::derive(module);
        self.ensure_table(&derived).await?;
        self.modules.insert(derived.name.clone(), Arc::new(derived));
        Ok(())
    }

    pub fn module(&self, name: &str) -> Option<Arc<DerivedModule>> {
        self.modules.get(name).map(|m| m.clone())
    }

    pub fn module_names(&self) -> Vec<String> {
        self.modules.iter().map(|m| m.key().clone()).collect()
    }

    pub fn module_by_base_path(&self, base_path: &str) -> Option<Arc<DerivedModule>> {
        self.modules.iter().find(|m| m.value().base_path == base_path).map(|m| m.value().clone())
    }

    async fn ensure_table(&self, module: &DerivedModule) -> anyhow::Result<()> {
        let columns: Vec<String> = module
            .fields
            .iter()
            .map(|(name, field)| {
                let sql_type = field.type_.sql_type();
                if name == "id" {
                    format!("{name} {sql_type} PRIMARY KEY")
                } else {
                    format!("{name} {sql_type}")
                }
            })
            .collect();
        let stmt = format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            module.table_name,
            columns.join(", ")
        );
        sqlx::query(&stmt).execute(&self.pool).await?;
        Ok(())
    }

    /// §4.9 `Execute(ctx, module, action, input)`.
    pub async fn execute(
        &self,
        module_name: &str,
        action_name: &str,
        input: Value,
    ) -> Result<ActionOutcome, GatewayError> {
        let module = self
            .module(module_name)
            .ok_or_else(|| GatewayError::not_found(format!("module '{module_name}' not found")))?;
        if !module.actions.contains_key(action_name) {
            return Err(GatewayError::not_found(format!(
                "action '{action_name}' not found on module '{module_name}'"
            )));
        }

        let start = std::time::Instant::now();
        let mut ctx = HookContext::new(module_name, action_name, input);

        self.hooks
            .dispatch_before(module_name, action_name, &mut ctx)
            .await
            .map_err(|err| GatewayError::validation(err.to_string()))?;

        let result = self.dispatch_action(&module, action_name, &ctx.data).await;

        let (outcome, success, error_text) = match &result {
            Ok(outcome) => (Some(outcome.clone()), true, None),
            Err(err) => (None, false, Some(err.to_string())),
        };

        if let Some(outcome) = &outcome {
            ctx.data = outcome.data.clone();
            ctx.meta = outcome.meta.clone();
        }
        self.hooks.dispatch_after(module_name, action_name, &mut ctx).await;

        self.events.publish(Event {
            name: "analytics".to_string(),
            source_module: module_name.to_string(),
            source_action: action_name.to_string(),
            data: json!({
                "duration_ms": start.elapsed().as_secs_f64() * 1000.0,
                "success": success,
                "error": error_text,
            }),
            meta: ctx.meta.clone(),
            timestamp: Utc::now(),
        });

        let mut outcome = result?;
        outcome.meta = ctx.meta;
        Ok(outcome)
    }

    async fn dispatch_action(
        &self,
        module: &DerivedModule,
        action_name: &str,
        input: &Value,
    ) -> Result<ActionOutcome, GatewayError> {
        match action_name {
            "list" => self.list(module, input).await,
            "get" => self.get_by_lookup(module, input).await,
            "create" => self.create(module, input).await,
            "update" => self.update(module, input).await,
            "delete" => self.delete(module, input).await,
            custom => self.custom(module, custom, input).await,
        }
    }

    async fn list(&self, module: &DerivedModule, input: &Value) -> Result<ActionOutcome, GatewayError> {
        let limit = input.get("limit").and_then(Value::as_i64).unwrap_or(50).clamp(1, 1000);
        let offset = input.get("offset").and_then(Value::as_i64).unwrap_or(0).max(0);
        let order_by = input
            .get("order_by")
            .and_then(Value::as_str)
            .filter(|col| module.fields.contains_key(*col))
            .unwrap_or("created_at");

        let stmt = format!(
            "SELECT * FROM {} ORDER BY {} LIMIT ? OFFSET ?",
            module.table_name, order_by
        );
        let rows = sqlx::query(&stmt)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        let records: Vec<Value> = rows.into_iter().map(|row| row_to_json(module, row)).collect();
        Ok(ActionOutcome {
            count: Some(records.len() as u64),
            data: Value::Null,
            list: Some(records),
            meta: Value::Null,
        })
    }

    async fn get_by_lookup(&self, module: &DerivedModule, input: &Value) -> Result<ActionOutcome, GatewayError> {
        let (column, value) = resolve_lookup_input(module, input)?;
        let stmt = format!("SELECT * FROM {} WHERE {} = ?", module.table_name, column);
        let row = sqlx::query(&stmt).bind(&value).fetch_optional(&self.pool).await.map_err(db_err)?;
        match row {
            Some(row) => Ok(ActionOutcome::single(row_to_json(module, row))),
            None => Err(GatewayError::not_found(format!("{} not found", module.name))),
        }
    }

    async fn create(&self, module: &DerivedModule, input: &Value) -> Result<ActionOutcome, GatewayError> {
        validate_input(module, input, false)?;

        let mut record = Map::new();
        let id = uuid::Uuid::new_v4().to_string();
        record.insert("id".to_string(), json!(id));
        let now = Utc::now().to_rfc3339();
        record.insert("created_at".to_string(), json!(now));
        record.insert("updated_at".to_string(), json!(now));
        for (name, field) in module.creatable_fields() {
            let value = input
                .get(name)
                .cloned()
                .or_else(|| field.default.clone())
                .unwrap_or(Value::Null);
            record.insert(name.to_string(), value);
        }

        let columns = module.column_names();
        let placeholders = vec!["?"; columns.len()].join(", ");
        let stmt = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            module.table_name,
            columns.join(", "),
            placeholders
        );
        let mut query = sqlx::query(&stmt);
        for column in &columns {
            let field = &module.fields[*column];
            let value = record.get(*column).cloned().unwrap_or(Value::Null);
            query = bind_field(query, field.type_, &value);
        }
        query.execute(&self.pool).await.map_err(db_err)?;

        Ok(ActionOutcome::single(Value::Object(record)))
    }

    async fn update(&self, module: &DerivedModule, input: &Value) -> Result<ActionOutcome, GatewayError> {
        let (lookup_column, lookup_value) = resolve_lookup_input(module, input)?;
        validate_input(module, input, true)?;

        let mut assignments = Vec::new();
        let mut values: Vec<(FieldType, Value)> = Vec::new();
        for (name, field) in module.creatable_fields() {
            if let Some(value) = input.get(name) {
                assignments.push(format!("{name} = ?"));
                values.push((field.type_, value.clone()));
            }
        }
        if assignments.is_empty() {
            return self.get_by_lookup(module, input).await;
        }
        assignments.push("updated_at = ?".to_string());
        let now = Utc::now().to_rfc3339();

        let stmt = format!(
            "UPDATE {} SET {} WHERE {} = ?",
            module.table_name,
            assignments.join(", "),
            lookup_column
        );
        let mut query = sqlx::query(&stmt);
        for (field_type, value) in &values {
            query = bind_field(query, *field_type, value);
        }
        query = query.bind(now).bind(&lookup_value);
        let result = query.execute(&self.pool).await.map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(GatewayError::not_found(format!("{} not found", module.name)));
        }

        self.get_by_lookup(module, input).await
    }

    async fn delete(&self, module: &DerivedModule, input: &Value) -> Result<ActionOutcome, GatewayError> {
        let (lookup_column, lookup_value) = resolve_lookup_input(module, input)?;
        let stmt = format!("DELETE FROM {} WHERE {} = ?", module.table_name, lookup_column);
        let result = sqlx::query(&stmt).bind(&lookup_value).execute(&self.pool).await.map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(GatewayError::not_found(format!("{} not found", module.name)));
        }
        Ok(ActionOutcome::single(json!({"deleted": true})))
    }

    /// Custom action (§4.9 step 3): locate by lookup, merge `action.set`
    /// over the input, then `store.Update`.
    async fn custom(&self, module: &DerivedModule, action_name: &str, input: &Value) -> Result<ActionOutcome, GatewayError> {
        let action = module
            .actions
            .get(action_name)
            .ok_or_else(|| GatewayError::not_found(format!("action '{action_name}' not found")))?;

        let mut merged = input.clone();
        if let Value::Object(map) = &mut merged {
            for (key, value) in &action.set {
                map.insert(key.clone(), value.clone());
            }
        }
        self.update(module, &merged).await
    }
}

fn resolve_lookup_input(module: &DerivedModule, input: &Value) -> Result<(String, String), GatewayError> {
    for (name, _) in module.lookup_fields() {
        if let Some(value) = input.get(name).and_then(Value::as_str) {
            return Ok((name.to_string(), value.to_string()));
        }
    }
    Err(GatewayError::validation("no lookup field present in input"))
}

/// Required fields present, enum values in set, declared constraints hold
/// (§4.8). Ref resolution is delegated to the module runtime's caller,
/// which has visibility into sibling modules.
fn validate_input(module: &DerivedModule, input: &Value, is_update: bool) -> Result<(), GatewayError> {
    for (name, field) in module.creatable_fields() {
        let present = input.get(name).map(|v| !v.is_null()).unwrap_or(false);
        if field.required && field.default.is_none() && !present && !is_update {
            return Err(GatewayError::validation(format!("field '{name}' is required")));
        }
        if let (Some(values), Some(actual)) = (&field.values, input.get(name).and_then(Value::as_str)) {
            if !values.iter().any(|v| v == actual) {
                return Err(GatewayError::validation(format!(
                    "field '{name}' must be one of {values:?}"
                )));
            }
        }
        if let (Some(constraints), Some(number)) = (&field.constraints, input.get(name).and_then(Value::as_f64)) {
            if let Some(min) = constraints.min {
                if number < min {
                    return Err(GatewayError::validation(format!("field '{name}' below minimum {min}")));
                }
            }
            if let Some(max) = constraints.max {
                if number > max {
                    return Err(GatewayError::validation(format!("field '{name}' above maximum {max}")));
                }
            }
        }
    }
    Ok(())
}

fn db_err(err: sqlx::Error) -> GatewayError {
    GatewayError::new(ErrorKind::Internal, format!("module storage error: {err}"))
}

fn bind_field<'q>(
    query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    field_type: FieldType,
    value: &Value,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    match field_type {
        FieldType::Int => query.bind(value.as_i64()),
        FieldType::Bool => query.bind(value.as_bool().map(|b| b as i64)),
        FieldType::Float => query.bind(value.as_f64()),
        FieldType::Bytes | FieldType::Secret => {
            query.bind(value.as_str().and_then(|s| base64::Engine::decode(&base64::engine::general_purpose::STANDARD, s).ok()))
        }
        FieldType::Json | FieldType::Strings | FieldType::Ints => {
            query.bind(serde_json::to_string(value).ok())
        }
        _ => query.bind(value.as_str().map(|s| s.to_string())),
    }
}

fn row_to_json(module: &DerivedModule, row: sqlx::sqlite::SqliteRow) -> Value {
    let mut map = Map::new();
    for (name, field) in &module.fields {
        let value = match field.type_ {
            FieldType::Int => row.try_get::<Option<i64>, _>(name.as_str()).ok().flatten().map(Value::from),
            FieldType::Bool => row
                .try_get::<Option<i64>, _>(name.as_str())
                .ok()
                .flatten()
                .map(|v| Value::from(v != 0)),
            FieldType::Float => row.try_get::<Option<f64>, _>(name.as_str()).ok().flatten().map(Value::from),
            FieldType::Bytes | FieldType::Secret => row
                .try_get::<Option<Vec<u8>>, _>(name.as_str())
                .ok()
                .flatten()
                .map(|bytes| Value::from(base64::Engine::encode(&base64::engine::general_purpose::STANDARD, bytes))),
            FieldType::Json | FieldType::Strings | FieldType::Ints => row
                .try_get::<Option<String>, _>(name.as_str())
                .ok()
                .flatten()
                .and_then(|s| serde_json::from_str(&s).ok()),
            _ => row.try_get::<Option<String>, _>(name.as_str()).ok().flatten().map(Value::from),
        }
        .unwrap_or(Value::Null);
        map.insert(name.clone(), value);
    }
    Value::Object(map)
}
