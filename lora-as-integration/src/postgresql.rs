//! PostgreSQL sink: one table per event kind, written through a dedicated
//! connection pool.
use crate::{
    error::{IntegrationError, IntegrationResult},
    events::{AckEvent, ErrorEvent, Event, JoinEvent, LocationEvent, StatusEvent, UplinkEvent},
    IntegrationHandler,
};
use async_trait::async_trait;
use sea_orm::{
    sea_query::{Alias, ColumnDef, Query, SimpleExpr, Table, TableCreateStatement},
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr, Value,
};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, time::Duration};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostgresqlConfig {
    pub dsn: String,
    #[serde(default = "PostgresqlConfig::max_open_connections_default")]
    pub max_open_connections: u32,
    #[serde(default)]
    pub max_idle_connections: u32,
    /// Creates the event tables when missing.
    #[serde(default = "PostgresqlConfig::create_tables_default")]
    pub create_tables: bool,
}

impl Default for PostgresqlConfig {
    fn default() -> Self {
        Self {
            dsn: String::new(),
            max_open_connections: Self::max_open_connections_default(),
            max_idle_connections: 0,
            create_tables: Self::create_tables_default(),
        }
    }
}

impl PostgresqlConfig {
    fn max_open_connections_default() -> u32 {
        5
    }

    fn create_tables_default() -> bool {
        true
    }
}

pub struct PostgresqlIntegration {
    db: DatabaseConnection,
}

impl PostgresqlIntegration {
    pub async fn new(config: PostgresqlConfig) -> IntegrationResult<Self> {
        if config.dsn.is_empty() {
            return Err(IntegrationError::Configuration("postgresql dsn is empty".into()));
        }
        let mut opt = ConnectOptions::new(config.dsn.clone());
        opt.max_connections(config.max_open_connections.max(1))
            .min_connections(config.max_idle_connections)
            .connect_timeout(Duration::from_secs(10))
            .sqlx_logging(false);
        let db = Database::connect(opt).await?;

        if config.create_tables {
            for stmt in event_tables() {
                db.execute(db.get_database_backend().build(&stmt)).await?;
            }
        }
        info!("PostgreSQL integration started");
        Ok(Self { db })
    }

    async fn insert(&self, table: &str, row: Vec<(&str, Value)>) -> IntegrationResult<()> {
        let (columns, values): (Vec<_>, Vec<_>) = row.into_iter().unzip();
        let mut stmt = Query::insert();
        stmt.into_table(Alias::new(table))
            .columns(columns.into_iter().map(Alias::new))
            .values(values.into_iter().map(SimpleExpr::Value))
            .map_err(|e| IntegrationError::Database(DbErr::Custom(e.to_string())))?;
        self.db
            .execute(self.db.get_database_backend().build(&stmt))
            .await?;
        Ok(())
    }
}

fn common_columns(
    application_id: u64,
    application_name: &str,
    device_name: &str,
    dev_eui: &[u8],
    tags: &HashMap<String, String>,
) -> IntegrationResult<Vec<(&'static str, Value)>> {
    Ok(vec![
        ("id", Uuid::new_v4().into()),
        ("received_at", chrono::Utc::now().into()),
        ("dev_eui", dev_eui.to_vec().into()),
        ("device_name", device_name.to_string().into()),
        ("application_id", (application_id as i64).into()),
        ("application_name", application_name.to_string().into()),
        ("tags", serde_json::to_value(tags)?.into()),
    ])
}

fn up_row(pl: &UplinkEvent) -> IntegrationResult<Vec<(&'static str, Value)>> {
    let mut row = common_columns(
        pl.application_id,
        &pl.application_name,
        &pl.device_name,
        &pl.dev_eui,
        &pl.tags,
    )?;
    let object: Option<serde_json::Value> = if pl.object_json.is_empty() {
        None
    } else {
        Some(serde_json::from_str(&pl.object_json)?)
    };
    row.extend([
        (
            "frequency",
            (pl.tx_info.as_ref().map(|t| t.frequency).unwrap_or_default() as i64).into(),
        ),
        ("dr", (pl.dr as i16).into()),
        ("adr", pl.adr.into()),
        ("f_cnt", (pl.f_cnt as i64).into()),
        ("f_port", (pl.f_port as i16).into()),
        ("data", pl.data.clone().into()),
        ("rx_info", serde_json::to_value(&pl.rx_info)?.into()),
        ("object", object.into()),
        ("confirmed_uplink", pl.confirmed_uplink.into()),
        ("dev_addr", pl.dev_addr.clone().into()),
    ]);
    Ok(row)
}

fn join_row(pl: &JoinEvent) -> IntegrationResult<Vec<(&'static str, Value)>> {
    let mut row = common_columns(
        pl.application_id,
        &pl.application_name,
        &pl.device_name,
        &pl.dev_eui,
        &pl.tags,
    )?;
    row.push(("dev_addr", pl.dev_addr.clone().into()));
    Ok(row)
}

fn ack_row(pl: &AckEvent) -> IntegrationResult<Vec<(&'static str, Value)>> {
    let mut row = common_columns(
        pl.application_id,
        &pl.application_name,
        &pl.device_name,
        &pl.dev_eui,
        &pl.tags,
    )?;
    row.extend([
        ("acknowledged", pl.acknowledged.into()),
        ("f_cnt", (pl.f_cnt as i64).into()),
    ]);
    Ok(row)
}

fn error_row(pl: &ErrorEvent) -> IntegrationResult<Vec<(&'static str, Value)>> {
    let mut row = common_columns(
        pl.application_id,
        &pl.application_name,
        &pl.device_name,
        &pl.dev_eui,
        &pl.tags,
    )?;
    row.extend([
        ("type", pl.error_type.clone().into()),
        ("error", pl.error.clone().into()),
        ("f_cnt", (pl.f_cnt as i64).into()),
    ]);
    Ok(row)
}

fn status_row(pl: &StatusEvent) -> IntegrationResult<Vec<(&'static str, Value)>> {
    let mut row = common_columns(
        pl.application_id,
        &pl.application_name,
        &pl.device_name,
        &pl.dev_eui,
        &pl.tags,
    )?;
    row.extend([
        ("margin", (pl.margin as i16).into()),
        ("external_power_source", pl.external_power_source.into()),
        ("battery_level_unavailable", pl.battery_level_unavailable.into()),
        ("battery_level", pl.battery_level.into()),
    ]);
    Ok(row)
}

fn location_row(pl: &LocationEvent) -> IntegrationResult<Vec<(&'static str, Value)>> {
    let mut row = common_columns(
        pl.application_id,
        &pl.application_name,
        &pl.device_name,
        &pl.dev_eui,
        &pl.tags,
    )?;
    let loc = pl.location.clone().unwrap_or_default();
    row.extend([
        ("latitude", loc.latitude.into()),
        ("longitude", loc.longitude.into()),
        ("altitude", loc.altitude.into()),
    ]);
    Ok(row)
}

fn event_table(name: &str, extra: Vec<ColumnDef>) -> TableCreateStatement {
    let mut t = Table::create();
    t.table(Alias::new(name))
        .if_not_exists()
        .col(ColumnDef::new(Alias::new("id")).uuid().not_null().primary_key())
        .col(
            ColumnDef::new(Alias::new("received_at"))
                .timestamp_with_time_zone()
                .not_null(),
        )
        .col(ColumnDef::new(Alias::new("dev_eui")).binary().not_null())
        .col(ColumnDef::new(Alias::new("device_name")).string().not_null())
        .col(ColumnDef::new(Alias::new("application_id")).big_integer().not_null())
        .col(ColumnDef::new(Alias::new("application_name")).string().not_null())
        .col(ColumnDef::new(Alias::new("tags")).json().not_null());
    for mut c in extra {
        t.col(&mut c);
    }
    t.to_owned()
}

fn event_tables() -> Vec<TableCreateStatement> {
    let col = |name: &str| ColumnDef::new(Alias::new(name));
    vec![
        event_table(
            "device_up",
            vec![
                col("frequency").big_integer().not_null().to_owned(),
                col("dr").small_integer().not_null().to_owned(),
                col("adr").boolean().not_null().to_owned(),
                col("f_cnt").big_integer().not_null().to_owned(),
                col("f_port").small_integer().not_null().to_owned(),
                col("data").binary().not_null().to_owned(),
                col("rx_info").json().not_null().to_owned(),
                col("object").json().null().to_owned(),
                col("confirmed_uplink").boolean().not_null().to_owned(),
                col("dev_addr").binary().not_null().to_owned(),
            ],
        ),
        event_table(
            "device_join",
            vec![col("dev_addr").binary().not_null().to_owned()],
        ),
        event_table(
            "device_ack",
            vec![
                col("acknowledged").boolean().not_null().to_owned(),
                col("f_cnt").big_integer().not_null().to_owned(),
            ],
        ),
        event_table(
            "device_error",
            vec![
                col("type").string().not_null().to_owned(),
                col("error").text().not_null().to_owned(),
                col("f_cnt").big_integer().not_null().to_owned(),
            ],
        ),
        event_table(
            "device_status",
            vec![
                col("margin").small_integer().not_null().to_owned(),
                col("external_power_source").boolean().not_null().to_owned(),
                col("battery_level_unavailable").boolean().not_null().to_owned(),
                col("battery_level").float().not_null().to_owned(),
            ],
        ),
        event_table(
            "device_location",
            vec![
                col("latitude").double().not_null().to_owned(),
                col("longitude").double().not_null().to_owned(),
                col("altitude").double().not_null().to_owned(),
            ],
        ),
    ]
}

#[async_trait]
impl IntegrationHandler for PostgresqlIntegration {
    fn kind(&self) -> &'static str {
        "postgresql"
    }

    async fn publish(&self, event: Event<'_>) -> IntegrationResult<()> {
        let (table, row) = match event {
            Event::Up(pl) => ("device_up", up_row(pl)?),
            Event::Join(pl) => ("device_join", join_row(pl)?),
            Event::Ack(pl) => ("device_ack", ack_row(pl)?),
            Event::Error(pl) => ("device_error", error_row(pl)?),
            Event::Status(pl) => ("device_status", status_row(pl)?),
            Event::Location(pl) => ("device_location", location_row(pl)?),
        };
        self.insert(table, row).await
    }

    async fn close(&self) -> IntegrationResult<()> {
        self.db.clone().close().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{DbBackend, Statement};

    async fn count(db: &DatabaseConnection, table: &str) -> i64 {
        db.query_one(Statement::from_string(
            DbBackend::Sqlite,
            format!("SELECT COUNT(*) AS c FROM {table}"),
        ))
        .await
        .unwrap()
        .unwrap()
        .try_get::<i64>("", "c")
        .unwrap()
    }

    #[tokio::test]
    async fn events_land_in_their_tables() {
        let h = PostgresqlIntegration::new(PostgresqlConfig {
            dsn: "sqlite::memory:".into(),
            max_open_connections: 1,
            ..Default::default()
        })
        .await
        .unwrap();

        let up = UplinkEvent {
            application_id: 1,
            dev_eui: vec![1, 2, 3, 4, 5, 6, 7, 8],
            f_port: 10,
            data: vec![1, 2, 3],
            object_json: r#"{"temperature":21.5}"#.into(),
            ..Default::default()
        };
        h.send_uplink(&up).await.unwrap();
        h.send_uplink(&up).await.unwrap();
        h.send_status(&StatusEvent {
            dev_eui: vec![1; 8],
            margin: 10,
            battery_level: 75.5,
            ..Default::default()
        })
        .await
        .unwrap();

        assert_eq!(count(&h.db, "device_up").await, 2);
        assert_eq!(count(&h.db, "device_status").await, 1);
        assert_eq!(count(&h.db, "device_join").await, 0);
    }
}
