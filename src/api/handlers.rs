use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::api::ApiError;
use crate::engine::{RiskEngine, TriageInput};
use crate::models::{NewPatient, NewVitals, Patient, Prediction, RiskLevel, VitalsReading};
use crate::store::PatientStore;

// ===== Request / response envelopes =====

#[derive(Debug, Deserialize)]
pub struct PageParams {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_per_page")]
    pub per_page: i64,
}

fn default_page() -> i64 {
    1
}

fn default_per_page() -> i64 {
    10
}

#[derive(Debug, Serialize)]
pub struct PaginatedPatients {
    pub patients: Vec<Patient>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}

#[derive(Debug, Serialize)]
pub struct PatientWithHistory {
    #[serde(flatten)]
    pub patient: Patient,
    pub readings: Vec<VitalsReading>,
    pub predictions: Vec<Prediction>,
}

#[derive(Debug, Deserialize)]
pub struct PredictionRequest {
    pub patient_id: i64,
}

/// Persisted prediction plus the ephemeral baseline analysis, which exists
/// only in this response and is never stored.
#[derive(Debug, Serialize)]
pub struct PredictionResponse {
    pub id: i64,
    pub patient_id: i64,
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    pub recommendation: String,
    pub baseline_analysis: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CopilotRequest {
    pub question: String,
}

// ===== Handlers =====

pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "message": "Florence Patient Monitoring API",
        "status": "running",
    }))
}

pub async fn create_patient(
    store: web::Data<PatientStore>,
    body: web::Json<NewPatient>,
) -> Result<HttpResponse, ApiError> {
    let new = body.into_inner();
    if new.name.trim().is_empty() || new.medical_record_number.trim().is_empty() {
        return Err(ApiError::Validation(
            "name and medical_record_number must be non-empty".into(),
        ));
    }
    if !(0..=150).contains(&new.age) {
        return Err(ApiError::Validation("age must be between 0 and 150".into()));
    }
    if store
        .find_patient_by_mrn(&new.medical_record_number)
        .await?
        .is_some()
    {
        return Err(ApiError::DuplicateRecordNumber);
    }

    let patient = store.create_patient(&new).await?;
    info!(patient_id = patient.id, "patient created");
    Ok(HttpResponse::Created().json(patient))
}

pub async fn list_patients(
    store: web::Data<PatientStore>,
    params: web::Query<PageParams>,
) -> Result<HttpResponse, ApiError> {
    let page = params.page.max(1);
    let per_page = params.per_page.clamp(1, 100);
    let (patients, total) = store.list_patients(page, per_page).await?;
    Ok(HttpResponse::Ok().json(PaginatedPatients {
        patients,
        total,
        page,
        per_page,
        total_pages: (total + per_page - 1) / per_page,
    }))
}

pub async fn get_patient(
    store: web::Data<PatientStore>,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let patient_id = path.into_inner();
    let patient = store
        .get_patient(patient_id)
        .await?
        .ok_or(ApiError::PatientNotFound)?;
    let readings = store.list_readings(patient_id, None).await?;
    let predictions = store.list_predictions(patient_id, None).await?;
    Ok(HttpResponse::Ok().json(PatientWithHistory {
        patient,
        readings,
        predictions,
    }))
}

/// Log a vitals reading. The audit is advisory: the reading is persisted no
/// matter what, and a suspicious audit only adds a warning to the response.
pub async fn log_metrics(
    store: web::Data<PatientStore>,
    engine: web::Data<RiskEngine>,
    path: web::Path<i64>,
    body: web::Json<NewVitals>,
) -> Result<HttpResponse, ApiError> {
    let patient_id = path.into_inner();
    let new = body.into_inner();
    if !(0.0..=100.0).contains(&new.oxygen_saturation) {
        return Err(ApiError::Validation(
            "oxygen_saturation must be between 0 and 100".into(),
        ));
    }
    store
        .get_patient(patient_id)
        .await?
        .ok_or(ApiError::PatientNotFound)?;

    let recorded_at = Utc::now();
    let candidate = VitalsReading {
        id: 0,
        patient_id,
        heart_rate: new.heart_rate,
        blood_pressure: new.blood_pressure.clone(),
        temperature: new.temperature,
        oxygen_saturation: new.oxygen_saturation,
        recorded_at,
    };
    let audit = engine.audit(&candidate).await;
    let reading = store.save_reading(patient_id, &new, recorded_at).await?;

    let mut response = json!({
        "status": "success",
        "message": "Vital signs logged successfully",
        "data": { "reading_id": reading.id },
    });
    if audit.is_suspicious() {
        info!(patient_id, reason = %audit.reason, "reading flagged by auditor");
        response["warning"] = json!(format!("Data flagged as suspicious: {}", audit.reason));
    }
    Ok(HttpResponse::Ok().json(response))
}

pub async fn create_prediction(
    store: web::Data<PatientStore>,
    engine: web::Data<RiskEngine>,
    body: web::Json<PredictionRequest>,
) -> Result<HttpResponse, ApiError> {
    let patient_id = body.patient_id;
    store
        .get_patient(patient_id)
        .await?
        .ok_or(ApiError::PatientNotFound)?;

    let latest = store
        .list_readings(patient_id, Some(1))
        .await?
        .into_iter()
        .next()
        .ok_or(ApiError::NoReadings)?;

    let baseline = store.historical_baseline(patient_id).await?;
    let assessment = engine.score(&latest, baseline.as_ref()).await;
    let prediction = store.save_prediction(patient_id, &assessment).await?;
    info!(
        patient_id,
        risk_level = %prediction.risk_level,
        "prediction stored"
    );

    Ok(HttpResponse::Ok().json(PredictionResponse {
        id: prediction.id,
        patient_id: prediction.patient_id,
        risk_score: prediction.risk_score,
        risk_level: prediction.risk_level,
        recommendation: prediction.recommendation,
        baseline_analysis: assessment.baseline_analysis,
        created_at: prediction.created_at,
    }))
}

/// Rank every patient by urgency. Per-patient reads run concurrently and are
/// all collected before the final sort.
pub async fn triage(
    store: web::Data<PatientStore>,
    engine: web::Data<RiskEngine>,
) -> Result<HttpResponse, ApiError> {
    let patients = store.list_all_patients().await?;
    let store = store.get_ref();

    let inputs = try_join_all(patients.into_iter().map(|patient| async move {
        let recent_readings = store.list_readings(patient.id, Some(2)).await?;
        let latest_prediction = store.latest_prediction(patient.id).await?;
        Ok::<_, anyhow::Error>(TriageInput {
            patient,
            recent_readings,
            latest_prediction,
        })
    }))
    .await?;

    Ok(HttpResponse::Ok().json(engine.rank(&inputs)))
}

pub async fn copilot(
    store: web::Data<PatientStore>,
    engine: web::Data<RiskEngine>,
    path: web::Path<i64>,
    body: web::Json<CopilotRequest>,
) -> Result<HttpResponse, ApiError> {
    let patient_id = path.into_inner();
    let patient = store
        .get_patient(patient_id)
        .await?
        .ok_or(ApiError::PatientNotFound)?;
    let latest = store
        .list_readings(patient_id, Some(1))
        .await?
        .into_iter()
        .next();

    let answer = engine
        .copilot_answer(&patient, latest.as_ref(), &body.question)
        .await;
    Ok(HttpResponse::Ok().json(json!({
        "patient_id": patient_id,
        "answer": answer,
    })))
}
