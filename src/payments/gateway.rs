//! Client for the external checkout-session gateway (Stripe wire shape).

use std::collections::HashMap;

use serde::Deserialize;

use crate::error::AppError;

#[derive(Clone)]
pub struct PaymentGateway {
    client: reqwest::Client,
    base_url: String,
    secret_key: String,
}

/// Everything the gateway needs to charge for a reservation and to rebuild it
/// on the verify path. The metadata round-trips verbatim.
#[derive(Debug, Clone)]
pub struct CheckoutSessionParams {
    pub amount_minor: i64,
    pub currency: String,
    pub product_name: String,
    pub success_url: String,
    pub cancel_url: String,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub payment_status: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl CheckoutSession {
    pub fn is_paid(&self) -> bool {
        self.payment_status == "paid"
    }
}

impl PaymentGateway {
    pub fn new(base_url: &str, secret_key: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            secret_key: secret_key.to_string(),
        }
    }

    pub async fn create_checkout_session(
        &self,
        params: &CheckoutSessionParams,
    ) -> Result<CheckoutSession, AppError> {
        let mut form: Vec<(String, String)> = vec![
            ("mode".into(), "payment".into()),
            ("payment_method_types[0]".into(), "card".into()),
            ("line_items[0][quantity]".into(), "1".into()),
            (
                "line_items[0][price_data][currency]".into(),
                params.currency.clone(),
            ),
            (
                "line_items[0][price_data][product_data][name]".into(),
                params.product_name.clone(),
            ),
            (
                "line_items[0][price_data][unit_amount]".into(),
                params.amount_minor.to_string(),
            ),
            ("success_url".into(), params.success_url.clone()),
            ("cancel_url".into(), params.cancel_url.clone()),
        ];
        for (key, value) in &params.metadata {
            form.push((format!("metadata[{key}]"), value.clone()));
        }

        let resp = self
            .client
            .post(format!("{}/v1/checkout/sessions", self.base_url))
            .bearer_auth(&self.secret_key)
            .form(&form)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(AppError::Internal(format!(
                "Gateway rejected checkout session ({status}): {body}"
            )));
        }

        Ok(resp.json().await?)
    }

    pub async fn retrieve_session(&self, session_id: &str) -> Result<CheckoutSession, AppError> {
        let resp = self
            .client
            .get(format!("{}/v1/checkout/sessions/{session_id}", self.base_url))
            .bearer_auth(&self.secret_key)
            .send()
            .await?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(AppError::NotFound("Checkout session not found".into()));
        }
        if !resp.status().is_success() {
            let status = resp.status();
            return Err(AppError::Internal(format!(
                "Gateway session lookup failed ({status})"
            )));
        }

        Ok(resp.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_paid_flag_follows_payment_status() {
        let paid: CheckoutSession = serde_json::from_str(
            r#"{"id":"cs_123","payment_status":"paid","metadata":{"reservation_id":"abc"}}"#,
        )
        .unwrap();
        assert!(paid.is_paid());
        assert_eq!(paid.metadata["reservation_id"], "abc");

        let unpaid: CheckoutSession =
            serde_json::from_str(r#"{"id":"cs_123","payment_status":"unpaid"}"#).unwrap();
        assert!(!unpaid.is_paid());
        assert!(unpaid.metadata.is_empty());
    }
}
