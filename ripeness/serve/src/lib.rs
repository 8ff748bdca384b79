use std::sync::Arc;

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use ripeness::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub fn app(pipeline: Arc<Pipeline>) -> Router {
    Router::new().route("/predict", post(predict)).with_state(pipeline)
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct PredictQuery {
    /// Any JSON value. Absent, null, or falsy values answer 400.
    pub image_url: Option<Value>,
}

impl PredictQuery {
    fn url(self) -> Result<String> {
        match self.image_url {
            Some(Value::String(url)) if !url.is_empty() => Ok(url),
            Some(value) if !is_empty(&value) => {
                Err(anyhow::format_err!("image_url should be a string, got {value}").into())
            }
            _ => Err(AppError::BadRequest("No image URL provided".into())),
        }
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct PredictReply {
    pub prediction: Ripeness,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ErrorReply {
    pub error: String,
}

async fn predict(
    State(pipeline): State<Arc<Pipeline>>,
    query: std::result::Result<Json<PredictQuery>, JsonRejection>,
) -> Result<Json<PredictReply>> {
    let Json(query) = query.map_err(|rejection| AppError::BadRequest(rejection.body_text()))?;
    let url = query.url()?;
    let prediction =
        tokio::task::spawn_blocking(move || pipeline.predict(&ImageSource::Url(url))).await??;
    Ok(Json(PredictReply { prediction: prediction.label }))
}

type Result<A> = std::result::Result<A, AppError>;

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Internal(anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, error) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Internal(e) => {
                log::warn!("{e:?}");
                (StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}"))
            }
        };
        (status, Json(ErrorReply { error })).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::Internal(err.into())
    }
}
