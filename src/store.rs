//! SQLite persistence for patients, readings and predictions.
//!
//! Every query is a single transaction; results come back ordered or empty.
//! The store also owns the one cache in the system: per-patient historical
//! baselines, invalidated whenever a new reading lands for that patient.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, instrument};

use crate::engine::baseline::baseline;
use crate::models::{
    HistoricalBaseline, NewPatient, NewVitals, Patient, Prediction, RiskAssessment, RiskLevel,
    VitalsReading,
};

pub struct PatientStore {
    pool: SqlitePool,
    baseline_cache: DashMap<i64, Option<HistoricalBaseline>>,
}

impl PatientStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("invalid database url: {url}"))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("failed to open database")?;
        let store = Self {
            pool,
            baseline_cache: DashMap::new(),
        };
        store.init_schema().await?;
        Ok(store)
    }

    /// Private in-memory database for tests. A single connection keeps every
    /// query on the same memory instance.
    #[cfg(test)]
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self {
            pool,
            baseline_cache: DashMap::new(),
        };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS patients (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                age INTEGER NOT NULL,
                medical_record_number TEXT NOT NULL UNIQUE,
                created_at INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS patient_readings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                patient_id INTEGER NOT NULL REFERENCES patients(id),
                blood_pressure TEXT NOT NULL,
                heart_rate INTEGER NOT NULL,
                temperature REAL NOT NULL,
                oxygen_saturation REAL NOT NULL,
                recorded_at INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_readings_patient_time
             ON patient_readings (patient_id, recorded_at DESC)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS predictions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                patient_id INTEGER NOT NULL REFERENCES patients(id),
                risk_score REAL NOT NULL,
                risk_level TEXT NOT NULL,
                recommendation TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_predictions_patient_time
             ON predictions (patient_id, created_at DESC)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ===== Patients =====

    #[instrument(skip(self, new))]
    pub async fn create_patient(&self, new: &NewPatient) -> Result<Patient> {
        let created_at = Utc::now();
        let result = sqlx::query(
            "INSERT INTO patients (name, age, medical_record_number, created_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(&new.name)
        .bind(new.age)
        .bind(&new.medical_record_number)
        .bind(created_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .context("failed to insert patient")?;

        Ok(Patient {
            id: result.last_insert_rowid(),
            name: new.name.clone(),
            age: new.age,
            medical_record_number: new.medical_record_number.clone(),
            created_at,
        })
    }

    pub async fn get_patient(&self, id: i64) -> Result<Option<Patient>> {
        let row = sqlx::query("SELECT * FROM patients WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| patient_from_row(&r)).transpose()
    }

    pub async fn find_patient_by_mrn(&self, mrn: &str) -> Result<Option<Patient>> {
        let row = sqlx::query("SELECT * FROM patients WHERE medical_record_number = ?")
            .bind(mrn)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| patient_from_row(&r)).transpose()
    }

    /// One page of patients, newest first, plus the total count.
    pub async fn list_patients(&self, page: i64, per_page: i64) -> Result<(Vec<Patient>, i64)> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM patients")
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query(
            "SELECT * FROM patients ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
        )
        .bind(per_page)
        .bind((page - 1) * per_page)
        .fetch_all(&self.pool)
        .await?;

        let patients = rows
            .iter()
            .map(patient_from_row)
            .collect::<Result<Vec<_>>>()?;
        Ok((patients, total))
    }

    /// Every patient in ascending id order, the iteration order triage relies
    /// on for deterministic tie-breaking.
    pub async fn list_all_patients(&self) -> Result<Vec<Patient>> {
        let rows = sqlx::query("SELECT * FROM patients ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(patient_from_row).collect()
    }

    // ===== Readings =====

    #[instrument(skip(self, vitals), fields(patient_id = patient_id))]
    pub async fn save_reading(
        &self,
        patient_id: i64,
        vitals: &NewVitals,
        recorded_at: DateTime<Utc>,
    ) -> Result<VitalsReading> {
        let result = sqlx::query(
            "INSERT INTO patient_readings
                 (patient_id, blood_pressure, heart_rate, temperature, oxygen_saturation, recorded_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(patient_id)
        .bind(&vitals.blood_pressure)
        .bind(vitals.heart_rate)
        .bind(vitals.temperature)
        .bind(vitals.oxygen_saturation)
        .bind(recorded_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .context("failed to insert reading")?;

        // The cached baseline no longer reflects this patient's history.
        self.baseline_cache.remove(&patient_id);
        debug!(patient_id, "baseline cache invalidated");

        Ok(VitalsReading {
            id: result.last_insert_rowid(),
            patient_id,
            heart_rate: vitals.heart_rate,
            blood_pressure: vitals.blood_pressure.clone(),
            temperature: vitals.temperature,
            oxygen_saturation: vitals.oxygen_saturation,
            recorded_at,
        })
    }

    /// Readings newest first. `None` limit returns the full history.
    pub async fn list_readings(
        &self,
        patient_id: i64,
        limit: Option<i64>,
    ) -> Result<Vec<VitalsReading>> {
        let rows = match limit {
            Some(limit) => {
                sqlx::query(
                    "SELECT * FROM patient_readings WHERE patient_id = ?
                     ORDER BY recorded_at DESC, id DESC LIMIT ?",
                )
                .bind(patient_id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT * FROM patient_readings WHERE patient_id = ?
                     ORDER BY recorded_at DESC, id DESC",
                )
                .bind(patient_id)
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(reading_from_row).collect()
    }

    /// Historical baseline over everything before the most recent reading,
    /// so a prediction request compares the latest snapshot against genuine
    /// history. Cached per patient until the next write.
    pub async fn historical_baseline(&self, patient_id: i64) -> Result<Option<HistoricalBaseline>> {
        if let Some(cached) = self.baseline_cache.get(&patient_id) {
            return Ok(*cached);
        }
        let readings = self.list_readings(patient_id, None).await?;
        let computed = match readings.split_first() {
            Some((_latest, history)) => baseline(history),
            None => None,
        };
        self.baseline_cache.insert(patient_id, computed);
        Ok(computed)
    }

    // ===== Predictions =====

    #[instrument(skip(self, assessment), fields(patient_id = patient_id))]
    pub async fn save_prediction(
        &self,
        patient_id: i64,
        assessment: &RiskAssessment,
    ) -> Result<Prediction> {
        // baseline_analysis is deliberately not stored; it is recomputed on
        // every prediction request.
        let created_at = Utc::now();
        let result = sqlx::query(
            "INSERT INTO predictions (patient_id, risk_score, risk_level, recommendation, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(patient_id)
        .bind(assessment.risk_score)
        .bind(assessment.risk_level.as_str())
        .bind(&assessment.recommendation)
        .bind(created_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .context("failed to insert prediction")?;

        Ok(Prediction {
            id: result.last_insert_rowid(),
            patient_id,
            risk_score: assessment.risk_score,
            risk_level: assessment.risk_level,
            recommendation: assessment.recommendation.clone(),
            created_at,
        })
    }

    pub async fn latest_prediction(&self, patient_id: i64) -> Result<Option<Prediction>> {
        let row = sqlx::query(
            "SELECT * FROM predictions WHERE patient_id = ?
             ORDER BY created_at DESC, id DESC LIMIT 1",
        )
        .bind(patient_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| prediction_from_row(&r)).transpose()
    }

    pub async fn list_predictions(
        &self,
        patient_id: i64,
        limit: Option<i64>,
    ) -> Result<Vec<Prediction>> {
        let rows = match limit {
            Some(limit) => {
                sqlx::query(
                    "SELECT * FROM predictions WHERE patient_id = ?
                     ORDER BY created_at DESC, id DESC LIMIT ?",
                )
                .bind(patient_id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT * FROM predictions WHERE patient_id = ?
                     ORDER BY created_at DESC, id DESC",
                )
                .bind(patient_id)
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(prediction_from_row).collect()
    }
}

// ===== Row mapping =====

fn timestamp_from(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| anyhow!("invalid timestamp: {millis}"))
}

fn patient_from_row(row: &SqliteRow) -> Result<Patient> {
    Ok(Patient {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        age: row.try_get("age")?,
        medical_record_number: row.try_get("medical_record_number")?,
        created_at: timestamp_from(row.try_get("created_at")?)?,
    })
}

fn reading_from_row(row: &SqliteRow) -> Result<VitalsReading> {
    Ok(VitalsReading {
        id: row.try_get("id")?,
        patient_id: row.try_get("patient_id")?,
        heart_rate: row.try_get("heart_rate")?,
        blood_pressure: row.try_get("blood_pressure")?,
        temperature: row.try_get("temperature")?,
        oxygen_saturation: row.try_get("oxygen_saturation")?,
        recorded_at: timestamp_from(row.try_get("recorded_at")?)?,
    })
}

fn prediction_from_row(row: &SqliteRow) -> Result<Prediction> {
    let level: String = row.try_get("risk_level")?;
    Ok(Prediction {
        id: row.try_get("id")?,
        patient_id: row.try_get("patient_id")?,
        risk_score: row.try_get("risk_score")?,
        risk_level: RiskLevel::parse(&level)
            .ok_or_else(|| anyhow!("invalid stored risk level: {level}"))?,
        recommendation: row.try_get("recommendation")?,
        created_at: timestamp_from(row.try_get("created_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn new_patient(mrn: &str) -> NewPatient {
        NewPatient {
            name: "Test Patient".into(),
            age: 45,
            medical_record_number: mrn.into(),
        }
    }

    fn vitals(heart_rate: i32) -> NewVitals {
        NewVitals {
            heart_rate,
            blood_pressure: "120/80".into(),
            temperature: 98.6,
            oxygen_saturation: 98.0,
        }
    }

    fn at(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    #[tokio::test]
    async fn patient_round_trip() {
        let store = PatientStore::in_memory().await.unwrap();
        let created = store.create_patient(&new_patient("MRN-1")).await.unwrap();
        let fetched = store.get_patient(created.id).await.unwrap().unwrap();
        assert_eq!(fetched.name, "Test Patient");
        assert_eq!(fetched.medical_record_number, "MRN-1");

        let by_mrn = store.find_patient_by_mrn("MRN-1").await.unwrap();
        assert_eq!(by_mrn.unwrap().id, created.id);
        assert!(store.find_patient_by_mrn("MRN-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_record_number_is_rejected() {
        let store = PatientStore::in_memory().await.unwrap();
        store.create_patient(&new_patient("MRN-1")).await.unwrap();
        assert!(store.create_patient(&new_patient("MRN-1")).await.is_err());
        // The first row survives.
        assert!(store.find_patient_by_mrn("MRN-1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn readings_come_back_newest_first() {
        let store = PatientStore::in_memory().await.unwrap();
        let patient = store.create_patient(&new_patient("MRN-1")).await.unwrap();
        store.save_reading(patient.id, &vitals(70), at(0)).await.unwrap();
        store.save_reading(patient.id, &vitals(80), at(60)).await.unwrap();
        store.save_reading(patient.id, &vitals(90), at(120)).await.unwrap();

        let last_two = store.list_readings(patient.id, Some(2)).await.unwrap();
        let rates: Vec<i32> = last_two.iter().map(|r| r.heart_rate).collect();
        assert_eq!(rates, vec![90, 80]);

        let all = store.list_readings(patient.id, None).await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn baseline_excludes_the_latest_reading_and_cache_invalidates() {
        let store = PatientStore::in_memory().await.unwrap();
        let patient = store.create_patient(&new_patient("MRN-1")).await.unwrap();

        // No readings at all: no baseline.
        assert!(store.historical_baseline(patient.id).await.unwrap().is_none());

        // One reading: the latest has no history behind it.
        store.save_reading(patient.id, &vitals(40), at(0)).await.unwrap();
        assert!(store.historical_baseline(patient.id).await.unwrap().is_none());

        // Two readings: history is just the older one.
        store.save_reading(patient.id, &vitals(60), at(60)).await.unwrap();
        let b = store.historical_baseline(patient.id).await.unwrap().unwrap();
        assert_eq!(b.avg_heart_rate, Some(40.0));

        // A new write invalidates the cached average.
        store.save_reading(patient.id, &vitals(100), at(120)).await.unwrap();
        let b = store.historical_baseline(patient.id).await.unwrap().unwrap();
        assert_eq!(b.avg_heart_rate, Some(50.0));
    }

    #[tokio::test]
    async fn prediction_round_trip_drops_baseline_analysis() {
        let store = PatientStore::in_memory().await.unwrap();
        let patient = store.create_patient(&new_patient("MRN-1")).await.unwrap();
        let assessment = RiskAssessment {
            risk_score: 0.8,
            risk_level: RiskLevel::High,
            recommendation: "Escalate.".into(),
            baseline_analysis: Some("ephemeral".into()),
        };
        let saved = store.save_prediction(patient.id, &assessment).await.unwrap();
        assert_eq!(saved.risk_level, RiskLevel::High);

        let latest = store.latest_prediction(patient.id).await.unwrap().unwrap();
        assert_eq!(latest.id, saved.id);
        assert!((latest.risk_score - 0.8).abs() < 1e-9);

        let history = store.list_predictions(patient.id, None).await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn pagination_reports_totals() {
        let store = PatientStore::in_memory().await.unwrap();
        for i in 0..5 {
            store
                .create_patient(&new_patient(&format!("MRN-{i}")))
                .await
                .unwrap();
        }
        let (page, total) = store.list_patients(1, 2).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(total, 5);

        let (page, _) = store.list_patients(3, 2).await.unwrap();
        assert_eq!(page.len(), 1);
    }
}
