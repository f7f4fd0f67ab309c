//! Survey routes: operator create/list, public QR lookup, question generation.

use crate::errors::AppError;
use crate::extract::{ApiJson, ApiPath, ApiQuery};
use crate::handlers::AppState;
use crate::models::{
    GenerateSurveyRequest, GenerateSurveyResult, NewSurveyRequest, Survey, SurveyBrief,
    SurveyLanguage,
};
use crate::services::default_questions;
use crate::store::NewSurvey;
use axum::{
    extract::State,
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use utoipa::IntoParams;
use uuid::Uuid;

/// Length of generated QR tokens.
pub const QR_CODE_LEN: usize = 12;

/// Fresh QR token: the first 12 hex digits of a SHA-256 over a random UUID.
pub fn generate_qr_code() -> String {
    let digest = Sha256::digest(Uuid::new_v4().as_bytes());
    let mut token = hex::encode(digest);
    token.truncate(QR_CODE_LEN);
    token
}

impl TryFrom<NewSurveyRequest> for NewSurvey {
    type Error = AppError;

    fn try_from(req: NewSurveyRequest) -> Result<Self, AppError> {
        let business_id = req
            .business_id
            .ok_or_else(|| AppError::Validation("business_id is required".into()))?;
        if req.questions.is_empty() {
            return Err(AppError::Validation(
                "At least one question is required".into(),
            ));
        }
        let languages: Vec<String> = req
            .languages
            .into_iter()
            .map(|l| l.trim().to_lowercase())
            .filter(|l| !l.is_empty())
            .collect();
        if languages.is_empty() {
            return Err(AppError::Validation(
                "At least one language is required".into(),
            ));
        }

        let qr_code = req
            .qr_code
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .unwrap_or_else(generate_qr_code);

        Ok(NewSurvey {
            business_id,
            qr_code,
            questions: req.questions,
            languages,
        })
    }
}

impl TryFrom<GenerateSurveyRequest> for SurveyBrief {
    type Error = AppError;

    fn try_from(req: GenerateSurveyRequest) -> Result<Self, AppError> {
        let present = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        let (Some(business_name), Some(category), Some(description)) = (
            present(req.business_name),
            present(req.category),
            present(req.description),
        ) else {
            return Err(AppError::Validation(
                "Missing required fields: businessName, category, description".into(),
            ));
        };

        let language = req
            .language
            .as_deref()
            .unwrap_or("")
            .parse::<SurveyLanguage>()
            .map_err(|_| AppError::Validation("Invalid language. Must be ar, fr, or en".into()))?;

        Ok(SurveyBrief {
            business_name,
            category,
            description,
            language,
        })
    }
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SurveyScope {
    pub business_id: Option<Uuid>,
}

/// POST /api/v1/surveys
#[utoipa::path(post, path = "/api/v1/surveys", tag = "Surveys",
    request_body = NewSurveyRequest,
    responses(
        (status = 201, description = "Survey created", body = Survey),
        (status = 400, description = "Missing business, questions or languages"),
        (status = 404, description = "Unknown business"),
        (status = 409, description = "QR code already taken"),
    ))]
pub async fn create_survey(
    State(state): State<Arc<AppState>>,
    ApiJson(payload): ApiJson<NewSurveyRequest>,
) -> Result<(StatusCode, Json<Survey>), AppError> {
    let new = NewSurvey::try_from(payload)?;

    if state.store.get_business(new.business_id).await?.is_none() {
        return Err(AppError::NotFound(format!(
            "Business {} not found",
            new.business_id
        )));
    }

    let survey = state.store.create_survey(new).await?;
    tracing::info!(
        "✓ Created survey {} for business {} (qr {})",
        survey.id,
        survey.business_id,
        survey.qr_code
    );
    Ok((StatusCode::CREATED, Json(survey)))
}

/// GET /api/v1/surveys?business_id=
#[utoipa::path(get, path = "/api/v1/surveys", tag = "Surveys",
    params(SurveyScope),
    responses((status = 200, description = "Surveys, newest first", body = Vec<Survey>)))]
pub async fn list_surveys(
    State(state): State<Arc<AppState>>,
    ApiQuery(scope): ApiQuery<SurveyScope>,
) -> Result<Json<Vec<Survey>>, AppError> {
    let business_id = scope
        .business_id
        .ok_or_else(|| AppError::Validation("business_id is required".into()))?;
    Ok(Json(state.store.list_surveys(business_id).await?))
}

/// GET /api/v1/surveys/qr/{qr_code}
///
/// Public lookup used by the respondent page after scanning a QR code.
#[utoipa::path(get, path = "/api/v1/surveys/qr/{qr_code}", tag = "Surveys",
    params(("qr_code" = String, Path, description = "QR token printed on the table card")),
    responses(
        (status = 200, description = "Active survey", body = Survey),
        (status = 403, description = "Survey is inactive"),
        (status = 404, description = "Unknown QR code"),
    ))]
pub async fn get_survey_by_qr(
    State(state): State<Arc<AppState>>,
    ApiPath(qr_code): ApiPath<String>,
) -> Result<Json<Survey>, AppError> {
    let survey = match state.survey_cache.get(&qr_code).await {
        Some(cached) => {
            tracing::debug!("Survey cache hit for {}", qr_code);
            cached
        }
        None => {
            let survey = state
                .store
                .survey_by_qr(&qr_code)
                .await?
                .ok_or_else(|| AppError::NotFound("Survey not found".into()))?;
            state
                .survey_cache
                .insert(qr_code.clone(), survey.clone())
                .await;
            survey
        }
    };

    if !survey.is_active {
        return Err(AppError::Forbidden("Survey is not active".into()));
    }
    Ok(Json(survey))
}

/// POST /api/v1/surveys/generate
///
/// Provider failures still answer 200 with the default questions and
/// `success: false`, so the editor always has something to show.
#[utoipa::path(post, path = "/api/v1/surveys/generate", tag = "Surveys",
    request_body = GenerateSurveyRequest,
    responses(
        (status = 200, description = "Generated or default questions", body = GenerateSurveyResult),
        (status = 400, description = "Missing fields or unsupported language"),
    ))]
pub async fn generate_survey(
    State(state): State<Arc<AppState>>,
    ApiJson(payload): ApiJson<GenerateSurveyRequest>,
) -> Result<Json<GenerateSurveyResult>, AppError> {
    let brief = SurveyBrief::try_from(payload)?;
    tracing::info!("🤖 Generating survey questions for {}", brief.business_name);

    let result = match state.generator.generate_questions(&brief).await {
        Ok(questions) => GenerateSurveyResult {
            success: true,
            questions,
            error: None,
        },
        Err(e) => {
            tracing::warn!("Survey generation failed, serving defaults: {}", e);
            GenerateSurveyResult {
                success: false,
                questions: default_questions(brief.language),
                error: Some(e.to_string()),
            }
        }
    };
    Ok(Json(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Question, QuestionType};

    fn question() -> Question {
        Question {
            kind: QuestionType::Rating,
            text: "How was the couscous?".into(),
            required: true,
            options: None,
        }
    }

    #[test]
    fn generated_qr_codes_are_short_hex_and_distinct() {
        let a = generate_qr_code();
        assert_eq!(a.len(), QR_CODE_LEN);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, generate_qr_code());
    }

    #[test]
    fn survey_needs_questions_and_languages() {
        let base = NewSurveyRequest {
            business_id: Some(Uuid::new_v4()),
            qr_code: None,
            questions: vec![question()],
            languages: vec!["fr".into()],
        };

        let mut no_questions = base.clone();
        no_questions.questions.clear();
        assert!(NewSurvey::try_from(no_questions).is_err());

        let mut no_languages = base.clone();
        no_languages.languages = vec!["  ".into()];
        assert!(NewSurvey::try_from(no_languages).is_err());

        let mut no_business = base.clone();
        no_business.business_id = None;
        assert!(NewSurvey::try_from(no_business).is_err());

        let new = NewSurvey::try_from(base).unwrap();
        assert_eq!(new.qr_code.len(), QR_CODE_LEN);
    }

    #[test]
    fn explicit_qr_code_is_kept() {
        let req = NewSurveyRequest {
            business_id: Some(Uuid::new_v4()),
            qr_code: Some(" table-7 ".into()),
            questions: vec![question()],
            languages: vec!["AR".into()],
        };
        let new = NewSurvey::try_from(req).unwrap();
        assert_eq!(new.qr_code, "table-7");
        assert_eq!(new.languages, vec!["ar".to_string()]);
    }

    #[test]
    fn brief_requires_fields_and_known_language() {
        let req = GenerateSurveyRequest {
            business_name: Some("Chez Karim".into()),
            category: Some("restaurant".into()),
            description: Some("Traditional cuisine".into()),
            language: Some("de".into()),
        };
        assert!(matches!(
            SurveyBrief::try_from(req.clone()),
            Err(AppError::Validation(msg)) if msg.starts_with("Invalid language")
        ));

        let missing = GenerateSurveyRequest {
            category: None,
            ..req.clone()
        };
        assert!(matches!(
            SurveyBrief::try_from(missing),
            Err(AppError::Validation(msg)) if msg.starts_with("Missing required fields")
        ));

        let ok = GenerateSurveyRequest {
            language: Some("fr".into()),
            ..req
        };
        assert_eq!(SurveyBrief::try_from(ok).unwrap().language, SurveyLanguage::Fr);
    }
}
