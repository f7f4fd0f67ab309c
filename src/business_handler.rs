//! Business profile routes.

use crate::errors::AppError;
use crate::extract::{ApiJson, ApiPath, ApiQuery};
use crate::handlers::AppState;
use crate::models::{Business, NewBusinessRequest, UpdateBusinessRequest};
use crate::store::{BusinessChanges, NewBusiness};
use axum::{
    extract::State,
    http::StatusCode,
    Json,
};
use phonenumber::country::Id as CountryId;
use phonenumber::Mode;
use serde::Deserialize;
use std::sync::Arc;
use utoipa::IntoParams;
use uuid::Uuid;

/// Region assumed for numbers written without a country prefix.
pub const DEFAULT_PHONE_REGION: CountryId = CountryId::DZ;

/// Parses a phone number and returns it in E.164 form (`+213555123456`).
///
/// Numbers without a `+` prefix are read as Algerian.
pub fn normalize_phone(raw: &str) -> Result<String, AppError> {
    let raw = raw.trim();
    if raw.len() < 6 {
        return Err(AppError::Validation("Phone number is too short".into()));
    }

    match phonenumber::parse(Some(DEFAULT_PHONE_REGION), raw) {
        Ok(number) if phonenumber::is_valid(&number) => {
            let formatted = number.format().mode(Mode::E164).to_string();
            tracing::debug!("✓ Valid phone: {} → {}", raw, formatted);
            Ok(formatted)
        }
        Ok(_) => {
            tracing::warn!("❌ Invalid phone number: {}", raw);
            Err(AppError::Validation("Invalid phone number".into()))
        }
        Err(e) => {
            tracing::warn!("❌ Failed to parse phone '{}': {:?}", raw, e);
            Err(AppError::Validation("Invalid phone number".into()))
        }
    }
}

/// Accepts absolute http(s) URLs only.
pub fn validate_website(raw: &str) -> Result<String, AppError> {
    let parsed = url::Url::parse(raw.trim())
        .map_err(|_| AppError::Validation("website_url must be a valid URL".into()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed.to_string()),
        _ => Err(AppError::Validation(
            "website_url must use http or https".into(),
        )),
    }
}

fn optional_text(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

impl TryFrom<NewBusinessRequest> for NewBusiness {
    type Error = AppError;

    fn try_from(req: NewBusinessRequest) -> Result<Self, AppError> {
        let name = req.name.trim().to_string();
        if name.is_empty() {
            return Err(AppError::Validation("name is required".into()));
        }
        if req.phone.trim().is_empty() {
            return Err(AppError::Validation("phone is required".into()));
        }

        Ok(NewBusiness {
            phone: normalize_phone(&req.phone)?,
            name,
            category: optional_text(req.category),
            description: optional_text(req.description),
            location: req.location,
            website_url: optional_text(req.website_url)
                .map(|w| validate_website(&w))
                .transpose()?,
            subscription_tier: req.subscription_tier.unwrap_or_default(),
        })
    }
}

impl TryFrom<UpdateBusinessRequest> for BusinessChanges {
    type Error = AppError;

    fn try_from(req: UpdateBusinessRequest) -> Result<Self, AppError> {
        let name = match req.name {
            Some(name) if name.trim().is_empty() => {
                return Err(AppError::Validation("name cannot be empty".into()))
            }
            other => other.map(|n| n.trim().to_string()),
        };

        Ok(BusinessChanges {
            phone: req.phone.as_deref().map(normalize_phone).transpose()?,
            name,
            category: optional_text(req.category),
            description: optional_text(req.description),
            location: req.location,
            website_url: optional_text(req.website_url)
                .map(|w| validate_website(&w))
                .transpose()?,
            is_active: req.is_active,
            subscription_tier: req.subscription_tier,
        })
    }
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PhoneLookup {
    pub phone: Option<String>,
}

/// POST /api/v1/businesses
#[utoipa::path(post, path = "/api/v1/businesses", tag = "Businesses",
    request_body = NewBusinessRequest,
    responses(
        (status = 201, description = "Business created", body = Business),
        (status = 400, description = "Invalid name, phone or website"),
        (status = 409, description = "Phone already registered"),
    ))]
pub async fn create_business(
    State(state): State<Arc<AppState>>,
    ApiJson(payload): ApiJson<NewBusinessRequest>,
) -> Result<(StatusCode, Json<Business>), AppError> {
    let new = NewBusiness::try_from(payload)?;
    let business = state.store.create_business(new).await?;
    tracing::info!("✓ Created business {} ({})", business.id, business.name);
    Ok((StatusCode::CREATED, Json(business)))
}

/// GET /api/v1/businesses?phone=
#[utoipa::path(get, path = "/api/v1/businesses", tag = "Businesses",
    params(PhoneLookup),
    responses(
        (status = 200, description = "Business owning the phone number", body = Business),
        (status = 404, description = "No business with that phone"),
    ))]
pub async fn find_business(
    State(state): State<Arc<AppState>>,
    ApiQuery(lookup): ApiQuery<PhoneLookup>,
) -> Result<Json<Business>, AppError> {
    let raw = lookup
        .phone
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| AppError::Validation("phone is required".into()))?;
    let phone = normalize_phone(&raw)?;

    state
        .store
        .business_by_phone(&phone)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("No business registered for {}", phone)))
}

#[utoipa::path(get, path = "/api/v1/businesses/{id}", tag = "Businesses",
    params(("id" = Uuid, Path, description = "Business ID")),
    responses(
        (status = 200, description = "Business", body = Business),
        (status = 404, description = "Not found"),
    ))]
pub async fn get_business(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<Business>, AppError> {
    state
        .store
        .get_business(id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Business {} not found", id)))
}

/// PUT /api/v1/businesses/{id}
///
/// Partial update; fields left out of the body keep their stored value.
#[utoipa::path(put, path = "/api/v1/businesses/{id}", tag = "Businesses",
    params(("id" = Uuid, Path, description = "Business ID")),
    request_body = UpdateBusinessRequest,
    responses(
        (status = 200, description = "Updated business", body = Business),
        (status = 404, description = "Not found"),
        (status = 409, description = "Phone already registered"),
    ))]
pub async fn update_business(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(payload): ApiJson<UpdateBusinessRequest>,
) -> Result<Json<Business>, AppError> {
    let changes = BusinessChanges::try_from(payload)?;
    let business = state
        .store
        .update_business(id, changes)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Business {} not found", id)))?;
    tracing::info!("✓ Updated business {}", id);
    Ok(Json(business))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SubscriptionTier;

    #[test]
    fn local_numbers_are_read_as_algerian() {
        assert_eq!(normalize_phone("0555 12 34 56").unwrap(), "+213555123456");
        assert_eq!(normalize_phone("+213555123456").unwrap(), "+213555123456");
    }

    #[test]
    fn garbage_phone_numbers_are_rejected() {
        assert!(normalize_phone("12").is_err());
        assert!(normalize_phone("not a phone").is_err());
    }

    #[test]
    fn website_must_be_http() {
        assert!(validate_website("https://chez-karim.dz").is_ok());
        assert!(validate_website("ftp://chez-karim.dz").is_err());
        assert!(validate_website("chez-karim").is_err());
    }

    #[test]
    fn new_business_defaults_to_trial() {
        let req = NewBusinessRequest {
            phone: "0555123456".into(),
            name: "  Chez Karim ".into(),
            website_url: Some("   ".into()),
            ..Default::default()
        };
        let new = NewBusiness::try_from(req).unwrap();
        assert_eq!(new.name, "Chez Karim");
        assert_eq!(new.subscription_tier, SubscriptionTier::Trial);
        assert_eq!(new.website_url, None);
    }

    #[test]
    fn blank_name_is_rejected() {
        let req = NewBusinessRequest {
            phone: "0555123456".into(),
            name: " ".into(),
            ..Default::default()
        };
        assert!(matches!(
            NewBusiness::try_from(req),
            Err(AppError::Validation(_))
        ));

        let update = UpdateBusinessRequest {
            name: Some(String::new()),
            ..Default::default()
        };
        assert!(BusinessChanges::try_from(update).is_err());
    }
}
