use crate::error::AppError;
use crate::models::BillingSnapshot;
use chrono::Utc;
use rusqlite::{params, types::Type, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub struct Storage {
    conn: Connection,
}

/// Flat export row for one recorded snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnapshotRecord {
    pub account_id: String,
    pub account_name: String,
    pub month_to_date: f64,
    pub last_month: f64,
    pub forecast: Option<f64>,
    pub daily_average: f64,
    pub currency: String,
    pub fetched_at: chrono::DateTime<Utc>,
}

impl Storage {
    pub fn open(path: &Path) -> Result<Self, AppError> {
        let conn = Connection::open(path)?;
        let this = Self { conn };
        this.init()?;
        Ok(this)
    }

    fn init(&self) -> Result<(), AppError> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS billing_snapshots (
                id INTEGER PRIMARY KEY,
                account_id TEXT NOT NULL,
                account_name TEXT NOT NULL,
                month_to_date REAL NOT NULL,
                last_month REAL NOT NULL,
                forecast REAL,
                daily_average REAL NOT NULL,
                currency TEXT NOT NULL,
                fetched_at TEXT NOT NULL,
                payload TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS billing_snapshots_account
                ON billing_snapshots (account_id, id);
            "#,
        )?;
        Ok(())
    }

    pub fn record_snapshots(&mut self, snapshots: &[BillingSnapshot]) -> Result<(), AppError> {
        let tx = self.conn.transaction()?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO billing_snapshots (account_id, account_name, month_to_date, last_month, forecast, daily_average, currency, fetched_at, payload)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )?;
            for s in snapshots {
                insert.execute(params![
                    s.account_id,
                    s.account_name,
                    s.month_to_date_cost,
                    s.last_month_cost,
                    s.forecasted_month_cost,
                    s.daily_average,
                    s.currency,
                    s.fetched_at.to_rfc3339(),
                    serde_json::to_string(s)?,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Newest snapshot per account.
    pub fn latest_snapshots(&self) -> Result<Vec<BillingSnapshot>, AppError> {
        let mut stmt = self.conn.prepare(
            "SELECT payload FROM billing_snapshots
             WHERE id IN (SELECT MAX(id) FROM billing_snapshots GROUP BY account_id)
             ORDER BY account_name",
        )?;
        let payloads = stmt
            .query_map([], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        payloads
            .iter()
            .map(|p| serde_json::from_str(p).map_err(AppError::from))
            .collect()
    }

    pub fn export_records(&self) -> Result<Vec<SnapshotRecord>, AppError> {
        let mut stmt = self.conn.prepare(
            "SELECT account_id, account_name, month_to_date, last_month, forecast, daily_average, currency, fetched_at
             FROM billing_snapshots ORDER BY fetched_at DESC, id DESC",
        )?;

        let rows = stmt
            .query_map([], |r| {
                Ok(SnapshotRecord {
                    account_id: r.get(0)?,
                    account_name: r.get(1)?,
                    month_to_date: r.get(2)?,
                    last_month: r.get(3)?,
                    forecast: r.get(4)?,
                    daily_average: r.get(5)?,
                    currency: r.get(6)?,
                    fetched_at: chrono::DateTime::parse_from_rfc3339(&r.get::<_, String>(7)?)
                        .map(|d| d.with_timezone(&Utc))
                        .map_err(|e| {
                            rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e))
                        })?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn export_json(&self) -> Result<String, AppError> {
        Ok(serde_json::to_string_pretty(&self.export_records()?)?)
    }

    pub fn export_csv(&self) -> Result<String, AppError> {
        let mut out = String::from(
            "account_id,account_name,month_to_date,last_month,forecast,daily_average,currency,fetched_at\n",
        );
        for r in self.export_records()? {
            out.push_str(&format!(
                "{},{},{:.2},{:.2},{},{:.2},{},{}\n",
                csv_field(&r.account_id),
                csv_field(&r.account_name),
                r.month_to_date,
                r.last_month,
                r.forecast.map(|f| format!("{f:.2}")).unwrap_or_default(),
                r.daily_average,
                csv_field(&r.currency),
                csv_field(&r.fetched_at.to_rfc3339()),
            ));
        }
        Ok(out)
    }
}

fn csv_field(raw: &str) -> String {
    if raw.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}
