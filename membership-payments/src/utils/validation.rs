use axum::{
    extract::{rejection::JsonRejection, FromRequest, Request},
    Json,
};
use serde::de::DeserializeOwned;
use service_core::error::AppError;
use validator::{Validate, ValidationErrors};

use crate::dtos::RequestBody;

/// JSON body that has been normalized and validated before the handler sees it.
pub struct ValidatedJson<T>(pub T);

#[axum::async_trait]
impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + RequestBody + 'static,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e: JsonRejection| {
                AppError::BadRequest(anyhow::anyhow!("Invalid request body: {}", e.body_text()))
            })?;

        Ok(ValidatedJson(validate_body(value)?))
    }
}

/// Normalize then validate a body that was decoded some other way.
pub fn validate_body<T: RequestBody>(mut value: T) -> Result<T, AppError> {
    value.normalize();

    let mut errors = match value.validate() {
        Ok(()) => ValidationErrors::new(),
        Err(errors) => errors,
    };
    value.check(&mut errors);

    if errors.errors().is_empty() {
        Ok(value)
    } else {
        Err(AppError::ValidationError(errors))
    }
}
