//! PostgreSQL binding for the store traits (tokio-postgres).
//!
//! SQLSTATE classes decide how a failure is reported: class 08 and the admin/crash
//! shutdown codes are connectivity problems, class 42 and 23 are statement rejections.

use std::collections::HashMap;
use std::error::Error as StdError;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;
use tokio_postgres::types::Type;
use tokio_postgres::{Client, Config, NoTls};
use tracing::{debug, error};

use super::{Connection, ConnectionFactory, ConnectionManager, Row, StoreError};

/// Opens tokio-postgres sessions from a parsed connection string.
#[derive(Clone)]
pub struct PostgresConnectionFactory {
    config: Config,
}

impl PostgresConnectionFactory {
    pub fn new(connection_string: &str, connect_timeout: Duration) -> Result<Self> {
        let mut config = connection_string
            .parse::<Config>()
            .context("Failed to parse postgres connection string")?;
        config.connect_timeout(connect_timeout);
        Ok(Self { config })
    }
}

#[async_trait]
impl ConnectionFactory for PostgresConnectionFactory {
    async fn connect(&self) -> Result<Box<dyn Connection>, StoreError> {
        let (client, connection) = self
            .config
            .connect(NoTls)
            .await
            .map_err(|e| match e.as_db_error() {
                Some(_) => map_pg_error(&e),
                None => StoreError::Connect(e.to_string()),
            })?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(target: "pool", "PostgreSQL connection error: {}", e);
            }
        });

        debug!(target: "pool", "Opened PostgreSQL session");
        Ok(Box::new(PostgresConnection { client }))
    }
}

pub struct PostgresConnection {
    client: Client,
}

#[async_trait]
impl Connection for PostgresConnection {
    async fn query(&mut self, sql: &str) -> Result<Vec<Row>, StoreError> {
        let rows = self
            .client
            .query(sql, &[])
            .await
            .map_err(|e| map_pg_error(&e))?;

        rows.iter().map(convert_row).collect()
    }
}

/// Named targets for multi-target execution, one factory per connection id.
pub struct PostgresConnectionManager {
    targets: HashMap<String, PostgresConnectionFactory>,
}

impl PostgresConnectionManager {
    pub fn from_targets(targets: &HashMap<String, String>, connect_timeout: Duration) -> Result<Self> {
        let targets = targets
            .iter()
            .map(|(id, url)| {
                PostgresConnectionFactory::new(url, connect_timeout)
                    .with_context(|| format!("Invalid connection target '{}'", id))
                    .map(|factory| (id.clone(), factory))
            })
            .collect::<Result<HashMap<_, _>>>()?;
        Ok(Self { targets })
    }

    pub fn target_ids(&self) -> impl Iterator<Item = &str> {
        self.targets.keys().map(String::as_str)
    }
}

#[async_trait]
impl ConnectionManager for PostgresConnectionManager {
    async fn get_connection(
        &self,
        connection_id: &str,
    ) -> Result<Option<Box<dyn Connection>>, StoreError> {
        match self.targets.get(connection_id) {
            Some(factory) => factory.connect().await.map(Some),
            None => Ok(None),
        }
    }
}

/// Map a tokio-postgres error onto the closed [`StoreError`] set.
pub fn map_pg_error(err: &tokio_postgres::Error) -> StoreError {
    if let Some(db) = err.as_db_error() {
        let code = db.code().code();
        let message = db.message().to_string();
        return classify_sqlstate(code, message);
    }

    if err.is_closed() {
        return StoreError::ConnectionLost(err.to_string());
    }

    match err.source().and_then(|s| s.downcast_ref::<std::io::Error>()) {
        Some(io) if io.kind() == std::io::ErrorKind::TimedOut => {
            StoreError::Timeout(err.to_string())
        }
        Some(_) => StoreError::ConnectionLost(err.to_string()),
        None => StoreError::Other(err.to_string()),
    }
}

fn classify_sqlstate(code: &str, message: String) -> StoreError {
    match code {
        "57014" => StoreError::Timeout(message),
        "57P01" | "57P02" | "57P03" | "53300" => StoreError::ConnectionLost(message),
        "42501" => StoreError::Permission(message),
        c if c.starts_with("08") => StoreError::ConnectionLost(message),
        c if c.starts_with("42") => StoreError::Syntax(message),
        c if c.starts_with("23") => StoreError::Constraint(message),
        _ => StoreError::Other(format!("{} (SQLSTATE {})", message, code)),
    }
}

fn convert_row(row: &tokio_postgres::Row) -> Result<Row, StoreError> {
    let mut record = Row::with_capacity(row.len());
    for (idx, column) in row.columns().iter().enumerate() {
        let value = column_value(row, idx, column.type_()).map_err(|e| {
            StoreError::Other(format!(
                "Failed to decode column '{}' ({}): {}",
                column.name(),
                column.type_(),
                e
            ))
        })?;
        record.insert(column.name().to_string(), value);
    }
    Ok(record)
}

fn column_value(
    row: &tokio_postgres::Row,
    idx: usize,
    ty: &Type,
) -> Result<Value, tokio_postgres::Error> {
    let value = match *ty {
        Type::BOOL => row.try_get::<_, Option<bool>>(idx)?.map(Value::Bool),
        Type::CHAR => row.try_get::<_, Option<i8>>(idx)?.map(Value::from),
        Type::INT2 => row.try_get::<_, Option<i16>>(idx)?.map(Value::from),
        Type::INT4 => row.try_get::<_, Option<i32>>(idx)?.map(Value::from),
        Type::INT8 => row.try_get::<_, Option<i64>>(idx)?.map(Value::from),
        Type::OID => row.try_get::<_, Option<u32>>(idx)?.map(Value::from),
        Type::FLOAT4 => row
            .try_get::<_, Option<f32>>(idx)?
            .map(|v| float_value(f64::from(v))),
        Type::FLOAT8 => row.try_get::<_, Option<f64>>(idx)?.map(float_value),
        Type::NUMERIC => row.try_get::<_, Option<Decimal>>(idx)?.map(numeric_value),
        Type::JSON | Type::JSONB => row.try_get::<_, Option<Value>>(idx)?,
        Type::TIMESTAMP => row
            .try_get::<_, Option<chrono::NaiveDateTime>>(idx)?
            .map(|ts| Value::String(ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string())),
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx)?
            .map(|ts| Value::String(ts.to_rfc3339())),
        Type::DATE => row
            .try_get::<_, Option<chrono::NaiveDate>>(idx)?
            .map(|d| Value::String(d.to_string())),
        Type::UUID => row
            .try_get::<_, Option<uuid::Uuid>>(idx)?
            .map(|u| Value::String(u.to_string())),
        // Text-like types; anything else surfaces as a decode error
        _ => row.try_get::<_, Option<String>>(idx)?.map(Value::String),
    };
    Ok(value.unwrap_or(Value::Null))
}

fn float_value(v: f64) -> Value {
    serde_json::Number::from_f64(v)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(v.to_string()))
}

/// NUMERIC as its exact decimal text; a JSON number would round through f64.
fn numeric_value(v: Decimal) -> Value {
    Value::String(v.to_string())
}
