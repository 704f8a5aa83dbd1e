//! SQLite-backed store for normalized demographic analysis records.
//!
//! The normalization core treats this as an external collaborator: it only
//! ever asks for the distinct values of a column (the reference vocabulary)
//! and whether a candidate record already exists. Inserts and SQL rendering
//! live here too, since they are thin wrappers over the same table.

use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::{Connection, params};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecordsError {
    #[error("records database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("unknown column: {0}")]
    UnknownColumn(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The thirteen prediction columns, in table order.
pub const PREDICTION_COLUMNS: [&str; 13] = [
    "prediction_location",
    "prediction_employment",
    "prediction_income",
    "prediction_education",
    "prediction_health",
    "prediction_crime",
    "prediction_environment",
    "prediction_culture",
    "prediction_transportation",
    "prediction_housing",
    "prediction_technology",
    "prediction_social",
    "prediction_economic",
];

/// Columns whose distinct values may be used as reference vocabulary.
const VOCABULARY_COLUMNS: [&str; 4] = ["occupation", "location", "zip_code", "gender"];

/// Prediction column values, one field per table column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Predictions {
    pub location: Option<String>,
    pub employment: Option<String>,
    pub income: Option<String>,
    pub education: Option<String>,
    pub health: Option<String>,
    pub crime: Option<String>,
    pub environment: Option<String>,
    pub culture: Option<String>,
    pub transportation: Option<String>,
    pub housing: Option<String>,
    pub technology: Option<String>,
    pub social: Option<String>,
    pub economic: Option<String>,
}

impl Predictions {
    /// Column name / value pairs in [`PREDICTION_COLUMNS`] order.
    pub fn columns(&self) -> [(&'static str, Option<&str>); 13] {
        [
            ("prediction_location", self.location.as_deref()),
            ("prediction_employment", self.employment.as_deref()),
            ("prediction_income", self.income.as_deref()),
            ("prediction_education", self.education.as_deref()),
            ("prediction_health", self.health.as_deref()),
            ("prediction_crime", self.crime.as_deref()),
            ("prediction_environment", self.environment.as_deref()),
            ("prediction_culture", self.culture.as_deref()),
            ("prediction_transportation", self.transportation.as_deref()),
            ("prediction_housing", self.housing.as_deref()),
            ("prediction_technology", self.technology.as_deref()),
            ("prediction_social", self.social.as_deref()),
            ("prediction_economic", self.economic.as_deref()),
        ]
    }

    /// Set a prediction by its column name.
    pub fn set(&mut self, column: &str, value: String) -> Result<(), RecordsError> {
        let slot = match column {
            "prediction_location" => &mut self.location,
            "prediction_employment" => &mut self.employment,
            "prediction_income" => &mut self.income,
            "prediction_education" => &mut self.education,
            "prediction_health" => &mut self.health,
            "prediction_crime" => &mut self.crime,
            "prediction_environment" => &mut self.environment,
            "prediction_culture" => &mut self.culture,
            "prediction_transportation" => &mut self.transportation,
            "prediction_housing" => &mut self.housing,
            "prediction_technology" => &mut self.technology,
            "prediction_social" => &mut self.social,
            "prediction_economic" => &mut self.economic,
            other => return Err(RecordsError::UnknownColumn(other.to_string())),
        };
        *slot = Some(value);
        Ok(())
    }
}

/// One row of the `demographic_analysis` table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    pub age: Option<i64>,
    pub occupation: Option<String>,
    pub location: Option<String>,
    pub zip_code: Option<String>,
    pub gender: Option<String>,
    pub predictions: Predictions,
}

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS demographic_analysis (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    age INTEGER,
    occupation TEXT,
    location TEXT,
    zip_code TEXT,
    gender TEXT,
    created_at INTEGER NOT NULL,
    prediction_location TEXT,
    prediction_employment TEXT,
    prediction_income TEXT,
    prediction_education TEXT,
    prediction_health TEXT,
    prediction_crime TEXT,
    prediction_environment TEXT,
    prediction_culture TEXT,
    prediction_transportation TEXT,
    prediction_housing TEXT,
    prediction_technology TEXT,
    prediction_social TEXT,
    prediction_economic TEXT
);";

/// Handle to an opened records database.
pub struct RecordsDb {
    conn: Connection,
    path: PathBuf,
}

impl RecordsDb {
    /// Open an existing records database, verifying the table exists.
    pub fn open(path: &Path) -> Result<Self, RecordsError> {
        let conn = Connection::open(path)?;
        let table_exists: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='demographic_analysis'",
            [],
            |row| row.get(0),
        )?;
        if !table_exists {
            return Err(RecordsError::Database(rusqlite::Error::QueryReturnedNoRows));
        }
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    /// Create (or open) a records database, creating the table if needed.
    pub fn create(path: &Path) -> Result<Self, RecordsError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Distinct non-null values of a column, ordered. The reference
    /// vocabulary source: column names are checked against a closed
    /// whitelist, never interpolated from free input.
    pub fn distinct_values(&self, column: &str) -> Result<Vec<String>, RecordsError> {
        if !VOCABULARY_COLUMNS.contains(&column) && !PREDICTION_COLUMNS.contains(&column) {
            return Err(RecordsError::UnknownColumn(column.to_string()));
        }
        let sql = format!(
            "SELECT DISTINCT {column} FROM demographic_analysis
             WHERE {column} IS NOT NULL ORDER BY {column}"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let values = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        tracing::debug!(column, count = values.len(), "loaded reference vocabulary");
        Ok(values)
    }

    /// Whether a record with the same identifying fields already exists.
    pub fn record_exists(&self, record: &Record) -> Result<bool, RecordsError> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS (
                 SELECT 1 FROM demographic_analysis
                 WHERE age IS ?1
                   AND occupation IS ?2
                   AND location IS ?3
                   AND zip_code IS ?4
                   AND gender IS ?5
             )",
            params![
                record.age,
                record.occupation,
                record.location,
                record.zip_code,
                record.gender
            ],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Insert one record, stamping the current time.
    pub fn insert(&self, record: &Record) -> Result<(), RecordsError> {
        let predictions = record.predictions.columns();
        let mut columns: Vec<&str> =
            vec!["age", "occupation", "location", "zip_code", "gender", "created_at"];
        columns.extend(predictions.iter().map(|(name, _)| *name));
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "INSERT INTO demographic_analysis ({}) VALUES ({})",
            columns.join(", "),
            placeholders.join(", ")
        );

        let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![
            Box::new(record.age),
            Box::new(record.occupation.clone()),
            Box::new(record.location.clone()),
            Box::new(record.zip_code.clone()),
            Box::new(record.gender.clone()),
            Box::new(Utc::now().timestamp()),
        ];
        for (_, value) in predictions {
            values.push(Box::new(value.map(str::to_string)));
        }
        self.conn
            .execute(&sql, rusqlite::params_from_iter(values.iter().map(|v| v.as_ref())))?;
        Ok(())
    }

    /// Total number of stored records.
    pub fn len(&self) -> Result<usize, RecordsError> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM demographic_analysis", [], |row| row.get(0))?)
    }

    pub fn is_empty(&self) -> Result<bool, RecordsError> {
        Ok(self.len()? == 0)
    }
}

/// Quote a value for inclusion in rendered SQL text.
fn sql_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn sql_value(value: Option<&str>) -> String {
    match value {
        Some(v) => sql_quote(v),
        None => "NULL".to_string(),
    }
}

/// Render a parameter-free INSERT statement for `.sql` file output.
///
/// Deterministic and fully escaped; the timestamp is left to the database.
pub fn insert_statement(record: &Record) -> String {
    let mut columns: Vec<&str> =
        vec!["age", "occupation", "location", "zip_code", "gender", "created_at"];
    let mut values: Vec<String> = vec![
        record.age.map(|a| a.to_string()).unwrap_or_else(|| "NULL".to_string()),
        sql_value(record.occupation.as_deref()),
        sql_value(record.location.as_deref()),
        sql_value(record.zip_code.as_deref()),
        sql_value(record.gender.as_deref()),
        "strftime('%s','now')".to_string(),
    ];
    for (name, value) in record.predictions.columns() {
        columns.push(name);
        values.push(sql_value(value));
    }
    format!(
        "INSERT INTO demographic_analysis ({})\nVALUES ({});",
        columns.join(", "),
        values.join(", ")
    )
}
