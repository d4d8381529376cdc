//! POST /identify: reconcile an email/phone assertion.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use identity_core::{ConsolidatedIdentity, IdentityAssertion, IdentityReconciler};
use serde::{Deserialize, Serialize};
use tracing::Instrument;
use uuid::Uuid;

use crate::error::AppError;

/// Phone numbers arrive either as strings or as bare JSON numbers.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum PhoneNumberInput {
    Text(String),
    Number(serde_json::Number),
}

impl PhoneNumberInput {
    pub fn into_string(self) -> String {
        match self {
            Self::Text(s) => s,
            Self::Number(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone_number: Option<PhoneNumberInput>,
}

impl IdentifyRequest {
    pub fn into_assertion(self) -> IdentityAssertion {
        IdentityAssertion::new(
            self.email,
            self.phone_number.map(PhoneNumberInput::into_string),
        )
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IdentifyResponse {
    pub contact: ConsolidatedIdentity,
}

pub async fn identify(
    State(reconciler): State<Arc<IdentityReconciler>>,
    payload: Result<Json<IdentifyRequest>, JsonRejection>,
) -> Result<Json<IdentifyResponse>, AppError> {
    let request_id = Uuid::new_v4();
    let span = tracing::info_span!("identify", %request_id);

    async move {
        let Json(request) = payload?;
        let assertion = request.into_assertion();
        let contact = reconciler.reconcile(&assertion).await?;
        Ok::<_, AppError>(Json(IdentifyResponse { contact }))
    }
    .instrument(span)
    .await
}
