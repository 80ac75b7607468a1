// src/db/mod.rs
//
// Database writer (receive side, §4.8). Opens lazily on first use,
// bootstraps a fixed reference schema if missing, and persists every
// reconstructed record: current-value rows every cycle, historical rows
// on the 10th. Reference lookups (units, alarm types, recorders) are
// interned in-process and inserted-then-selected on cache miss, so a
// given string only ever triggers one round trip per process lifetime.

use std::collections::HashMap;

use tiberius::{Client, Config};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use crate::device::metadata::TagMetadata;
use crate::device::Device;
use crate::error::{AppError, AppResult};
use crate::lanes::{DataTable, DeviceType};
use crate::logging::severe;

type DbClient = Client<Compat<TcpStream>>;

/// Per-tag cycle counter starts at 9, not 0, so the *first* arrival already
/// trips the "every 10th" branch (9 -> 10). Documented open-question
/// decision #1: kept as the spec's pinned, not-silently-normalized
/// behavior rather than the more intuitive "tenth arrival" reading.
const CYCLE_COUNTER_INIT: u8 = 9;
const CYCLE_COUNTER_TRIGGER: u8 = 10;

pub struct DatabaseWriter {
    db_url: String,
    client: Option<DbClient>,
    units_cache: HashMap<String, i32>,
    alarm_type_cache: HashMap<String, i32>,
    recorder_cache: HashMap<String, i32>,
    known_tag_tables: std::collections::HashSet<String>,
    known_device_tables: std::collections::HashSet<String>,
    cycle_counters: HashMap<String, u8>,
}

impl DatabaseWriter {
    pub fn new(db_url: String) -> Self {
        Self {
            db_url,
            client: None,
            units_cache: HashMap::new(),
            alarm_type_cache: HashMap::new(),
            recorder_cache: HashMap::new(),
            known_tag_tables: std::collections::HashSet::new(),
            known_device_tables: std::collections::HashSet::new(),
            cycle_counters: HashMap::new(),
        }
    }

    /// Force-closes the connection so the next call reopens it. Called by
    /// the dispatcher every 60 cycles as a liveness probe (§4.7); not
    /// meaningful to call mid-transaction (see §9 open question 4).
    pub fn force_close(&mut self) {
        self.client = None;
    }

    async fn connection(&mut self) -> AppResult<&mut DbClient> {
        if self.client.is_none() {
            let config = Config::from_ado_string(&self.db_url).map_err(AppError::Database)?;
            let tcp = TcpStream::connect(config.get_addr()).await?;
            tcp.set_nodelay(true)?;
            let client = Client::connect(config, tcp.compat_write()).await.map_err(AppError::Database)?;
            self.client = Some(client);
            self.bootstrap_schema().await?;
        }
        Ok(self.client.as_mut().unwrap())
    }

    async fn bootstrap_schema(&mut self) -> AppResult<()> {
        let client = self.client.as_mut().expect("connection just opened");
        for ddl in SCHEMA_DDL {
            client.execute(*ddl, &[]).await.map_err(AppError::Database)?;
        }
        Ok(())
    }

    /// Routes a reconstructed record to the device that produced it and
    /// persists it. SQL failures log SEVERE and return without propagating
    /// — the dispatch loop continues regardless.
    pub async fn update_database(&mut self, device: &Device, record: &DataTable) {
        let result = match record.device_type {
            DeviceType::Recorder => self.write_recorder_record(device, record).await,
            DeviceType::ModbusDevice => self.write_modbus_record(device, record).await,
        };
        if let Err(e) = result {
            severe!("[db] write failed for device {}: {}", device.device_id(), e);
        }
    }

    async fn intern_units(&mut self, units: &str) -> AppResult<i32> {
        if let Some(id) = self.units_cache.get(units) {
            return Ok(*id);
        }
        let id = intern(self.client.as_mut().unwrap(), "UnitsTbl", "Units", units).await?;
        self.units_cache.insert(units.to_string(), id);
        Ok(id)
    }

    async fn intern_alarm_type(&mut self, alarm_type: &str) -> AppResult<i32> {
        if let Some(id) = self.alarm_type_cache.get(alarm_type) {
            return Ok(*id);
        }
        let id = intern(self.client.as_mut().unwrap(), "AlarmTypeTbl", "Type", alarm_type).await?;
        self.alarm_type_cache.insert(alarm_type.to_string(), id);
        Ok(id)
    }

    async fn intern_recorder(&mut self, device: &Device) -> AppResult<i32> {
        let key = format!("{}|{}|{}", device.model_name(), device.ip(), device.unit_id());
        if let Some(id) = self.recorder_cache.get(&key) {
            return Ok(*id);
        }
        let client = self.client.as_mut().unwrap();
        let existing = client
            .query(
                "SELECT id FROM RecordersTbl WHERE Model = @P1 AND IPAddress = @P2 AND UnitID = @P3",
                &[&device.model_name(), &device.ip(), &(device.unit_id() as i32)],
            )
            .await
            .map_err(AppError::Database)?
            .into_row()
            .await
            .map_err(AppError::Database)?;
        let id = if let Some(row) = existing {
            row.get::<i32, _>(0).unwrap_or_default()
        } else {
            client
                .execute(
                    "INSERT INTO RecordersTbl (Model, IPAddress, UnitID, ConfigFile) VALUES (@P1, @P2, @P3, @P4)",
                    &[&device.model_name(), &device.ip(), &(device.unit_id() as i32), &device.config_path()],
                )
                .await
                .map_err(AppError::Database)?;
            client
                .query(
                    "SELECT id FROM RecordersTbl WHERE Model = @P1 AND IPAddress = @P2 AND UnitID = @P3",
                    &[&device.model_name(), &device.ip(), &(device.unit_id() as i32)],
                )
                .await
                .map_err(AppError::Database)?
                .into_row()
                .await
                .map_err(AppError::Database)?
                .and_then(|row| row.get::<i32, _>(0))
                .unwrap_or_default()
        };
        self.recorder_cache.insert(key, id);
        Ok(id)
    }

    async fn ensure_tag_row(&mut self, tag: &TagMetadata, recorder_id: i32) -> AppResult<()> {
        let units_id = self.intern_units(&tag.units).await?;
        let mut alarm_ids = [0i32; 4];
        for (i, alarm_type) in tag.alarm_types.iter().enumerate() {
            alarm_ids[i] = self.intern_alarm_type(alarm_type).await?;
        }
        let client = self.client.as_mut().unwrap();
        let exists = client
            .query("SELECT id FROM ListTagsTbl WHERE TagName = @P1", &[&tag.tag])
            .await
            .map_err(AppError::Database)?
            .into_row()
            .await
            .map_err(AppError::Database)?;
        if exists.is_none() {
            client
                .execute(
                    "INSERT INTO ListTagsTbl (TagName, Units, Recorder, Alarm1Type, Alarm2Type, Alarm3Type, Alarm4Type) \
                     VALUES (@P1, @P2, @P3, @P4, @P5, @P6, @P7)",
                    &[
                        &tag.tag,
                        &units_id,
                        &recorder_id,
                        &alarm_ids[0],
                        &alarm_ids[1],
                        &alarm_ids[2],
                        &alarm_ids[3],
                    ],
                )
                .await
                .map_err(AppError::Database)?;
        }
        Ok(())
    }

    async fn ensure_historical_table(&mut self, tag: &str) -> AppResult<()> {
        if self.known_tag_tables.contains(tag) {
            return Ok(());
        }
        let client = self.client.as_mut().unwrap();
        let ddl = format!(
            "IF OBJECT_ID('dbo.{ident}', 'U') IS NULL CREATE TABLE {ident} \
             (Timestamp DATETIME2 NOT NULL, Value FLOAT NOT NULL, \
              Alarm1Status TINYINT NOT NULL, Alarm2Status TINYINT NOT NULL, \
              Alarm3Status TINYINT NOT NULL, Alarm4Status TINYINT NOT NULL)",
            ident = bracket(tag)
        );
        client.execute(ddl.as_str(), &[]).await.map_err(AppError::Database)?;
        self.known_tag_tables.insert(tag.to_string());
        Ok(())
    }

    async fn write_recorder_record(&mut self, device: &Device, record: &DataTable) -> AppResult<()> {
        let tags = device.transmitted_metadata();
        self.connection().await?;
        let recorder_id = self.intern_recorder(device).await?;

        for (tag, point) in tags.iter().zip(record.data.iter()) {
            self.ensure_tag_row(tag, recorder_id).await?;
            self.ensure_historical_table(&tag.tag).await?;

            let alarms = point.alarm_status.unwrap_or([0, 0, 0, 0]);
            let counter_key = format!("recorder:{}:{}", device.device_id(), tag.tag);
            let counter = self.cycle_counters.entry(counter_key.clone()).or_insert(CYCLE_COUNTER_INIT);
            *counter += 1;
            let fire_historical = *counter >= CYCLE_COUNTER_TRIGGER;
            if fire_historical {
                *counter = 0;
            }
            let should_insert = fire_historical;

            let client = self.client.as_mut().unwrap();

            if should_insert {
                let ddl = format!(
                    "INSERT INTO {ident} (Timestamp, Value, Alarm1Status, Alarm2Status, Alarm3Status, Alarm4Status) \
                     VALUES (@P1, @P2, @P3, @P4, @P5, @P6)",
                    ident = bracket(&tag.tag)
                );
                client
                    .execute(
                        ddl.as_str(),
                        &[
                            &record.timestamp.naive_local(),
                            &point.value,
                            &(alarms[0] as i32),
                            &(alarms[1] as i32),
                            &(alarms[2] as i32),
                            &(alarms[3] as i32),
                        ],
                    )
                    .await
                    .map_err(AppError::Database)?;
            }

            upsert_current_value(client, &tag.tag, record.timestamp.naive_local(), point.value, alarms).await?;
        }
        Ok(())
    }

    async fn write_modbus_record(&mut self, device: &Device, record: &DataTable) -> AppResult<()> {
        let tags = device.transmitted_metadata();
        self.connection().await?;

        let table = format!("ModbusDevice{}", device.device_id());
        if !self.known_device_tables.contains(&table) {
            let columns: String = tags
                .iter()
                .map(|t| format!(", {} FLOAT", bracket(&t.tag)))
                .collect();
            let client = self.client.as_mut().unwrap();
            let ddl = format!(
                "IF OBJECT_ID('dbo.{ident}', 'U') IS NULL CREATE TABLE {ident} (Timestamp DATETIME2 NOT NULL{cols})",
                ident = bracket(&table),
                cols = columns
            );
            client.execute(ddl.as_str(), &[]).await.map_err(AppError::Database)?;
            let current_ident = bracket(&format!("{} Current", table));
            let current_cols: String = tags.iter().map(|t| format!(", {} FLOAT", bracket(&t.tag))).collect();
            let ddl_current = format!(
                "IF OBJECT_ID('dbo.{ident}', 'U') IS NULL CREATE TABLE {ident} (Timestamp DATETIME2 NOT NULL{cols})",
                ident = current_ident,
                cols = current_cols
            );
            client.execute(ddl_current.as_str(), &[]).await.map_err(AppError::Database)?;
            self.known_device_tables.insert(table.clone());
        }

        let client = self.client.as_mut().unwrap();
        let col_names: Vec<String> = tags.iter().map(|t| bracket(&t.tag)).collect();
        let insert_cols = col_names.join(", ");
        let placeholders: Vec<String> = (1..=tags.len()).map(|i| format!("@P{}", i + 1)).collect();
        let insert_sql = format!(
            "INSERT INTO {ident} (Timestamp, {cols}) VALUES (@P1, {ph})",
            ident = bracket(&table),
            cols = insert_cols,
            ph = placeholders.join(", ")
        );
        let values: Vec<f64> = record.data.iter().map(|p| p.value).collect();
        let mut params: Vec<&dyn tiberius::ToSql> = Vec::with_capacity(tags.len() + 1);
        let ts = record.timestamp.naive_local();
        params.push(&ts);
        for v in &values {
            params.push(v);
        }
        client.execute(insert_sql.as_str(), &params).await.map_err(AppError::Database)?;

        let current_ident = bracket(&format!("{} Current", table));
        client
            .execute(format!("DELETE FROM {}", current_ident).as_str(), &[])
            .await
            .map_err(AppError::Database)?;
        client.execute(insert_sql.replace(&bracket(&table), &current_ident).as_str(), &params).await.map_err(AppError::Database)?;

        Ok(())
    }
}

async fn upsert_current_value(
    client: &mut DbClient,
    tag: &str,
    timestamp: chrono::NaiveDateTime,
    value: f64,
    alarms: [u8; 4],
) -> AppResult<()> {
    let existing = client
        .query("SELECT id FROM CurrentValuesTbl WHERE TagName = @P1", &[&tag])
        .await
        .map_err(AppError::Database)?
        .into_row()
        .await
        .map_err(AppError::Database)?;
    if existing.is_some() {
        client
            .execute(
                "UPDATE CurrentValuesTbl SET Timestamp = @P1, Value = @P2, \
                 Alarm1Status = @P3, Alarm2Status = @P4, Alarm3Status = @P5, Alarm4Status = @P6 \
                 WHERE TagName = @P7",
                &[
                    &timestamp,
                    &value,
                    &(alarms[0] as i32),
                    &(alarms[1] as i32),
                    &(alarms[2] as i32),
                    &(alarms[3] as i32),
                    &tag,
                ],
            )
            .await
            .map_err(AppError::Database)?;
    } else {
        client
            .execute(
                "INSERT INTO CurrentValuesTbl (TagName, Timestamp, Value, Alarm1Status, Alarm2Status, Alarm3Status, Alarm4Status) \
                 VALUES (@P1, @P2, @P3, @P4, @P5, @P6, @P7)",
                &[
                    &tag,
                    &timestamp,
                    &value,
                    &(alarms[0] as i32),
                    &(alarms[1] as i32),
                    &(alarms[2] as i32),
                    &(alarms[3] as i32),
                ],
            )
            .await
            .map_err(AppError::Database)?;
    }
    Ok(())
}

async fn intern(client: &mut DbClient, table: &str, column: &str, value: &str) -> AppResult<i32> {
    let select = format!("SELECT id FROM {} WHERE {} = @P1", table, column);
    let existing = client
        .query(select.as_str(), &[&value])
        .await
        .map_err(AppError::Database)?
        .into_row()
        .await
        .map_err(AppError::Database)?;
    if let Some(row) = existing {
        return Ok(row.get::<i32, _>(0).unwrap_or_default());
    }
    let insert = format!("INSERT INTO {} ({}) VALUES (@P1)", table, column);
    client.execute(insert.as_str(), &[&value]).await.map_err(AppError::Database)?;
    let row = client
        .query(select.as_str(), &[&value])
        .await
        .map_err(AppError::Database)?
        .into_row()
        .await
        .map_err(AppError::Database)?;
    Ok(row.and_then(|r| r.get::<i32, _>(0)).unwrap_or_default())
}

/// Brackets a SQL Server identifier, doubling any embedded `]` the way
/// `QUOTENAME` does, so arbitrary tag text (spaces, punctuation) is safe to
/// use as a table or column name.
fn bracket(ident: &str) -> String {
    format!("[{}]", ident.replace(']', "]]"))
}

const SCHEMA_DDL: &[&str] = &[
    "IF OBJECT_ID('dbo.RecordersTbl', 'U') IS NULL CREATE TABLE RecordersTbl \
     (id INT IDENTITY PRIMARY KEY, Model NVARCHAR(64) NOT NULL, IPAddress NVARCHAR(64) NOT NULL, \
      UnitID INT NOT NULL, ConfigFile NVARCHAR(260) NOT NULL)",
    "IF OBJECT_ID('dbo.UnitsTbl', 'U') IS NULL CREATE TABLE UnitsTbl \
     (id INT IDENTITY PRIMARY KEY, Units NVARCHAR(64) NOT NULL UNIQUE)",
    "IF OBJECT_ID('dbo.AlarmTypeTbl', 'U') IS NULL CREATE TABLE AlarmTypeTbl \
     (id INT IDENTITY PRIMARY KEY, Type NVARCHAR(64) NOT NULL UNIQUE)",
    "IF OBJECT_ID('dbo.ListTagsTbl', 'U') IS NULL CREATE TABLE ListTagsTbl \
     (id INT IDENTITY PRIMARY KEY, TagName NVARCHAR(128) NOT NULL UNIQUE, Units INT NOT NULL, \
      Recorder INT NOT NULL, Alarm1Type INT NOT NULL, Alarm2Type INT NOT NULL, \
      Alarm3Type INT NOT NULL, Alarm4Type INT NOT NULL, \
      FOREIGN KEY (Units) REFERENCES UnitsTbl(id), FOREIGN KEY (Recorder) REFERENCES RecordersTbl(id))",
    "IF OBJECT_ID('dbo.CurrentValuesTbl', 'U') IS NULL CREATE TABLE CurrentValuesTbl \
     (id INT IDENTITY PRIMARY KEY, TagName NVARCHAR(128) NOT NULL UNIQUE, Timestamp DATETIME2 NOT NULL, \
      Value FLOAT NOT NULL, Alarm1Status TINYINT NOT NULL, Alarm2Status TINYINT NOT NULL, \
      Alarm3Status TINYINT NOT NULL, Alarm4Status TINYINT NOT NULL)",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bracket_doubles_embedded_closing_bracket() {
        assert_eq!(bracket("T_BOILER_1"), "[T_BOILER_1]");
        assert_eq!(bracket("weird]tag"), "[weird]]tag]");
    }

    #[test]
    fn cycle_counter_fires_on_first_and_every_tenth_arrival() {
        // Pins testable property #9 and open-question decision #1: the
        // counter starts at 9, so 9 -> 10 trips on the very first call.
        let mut counter = CYCLE_COUNTER_INIT;
        let mut fired_at = Vec::new();
        for call in 1..=25 {
            counter += 1;
            if counter >= CYCLE_COUNTER_TRIGGER {
                counter = 0;
                fired_at.push(call);
            }
        }
        assert_eq!(fired_at, vec![1, 11, 21]);
    }
}
