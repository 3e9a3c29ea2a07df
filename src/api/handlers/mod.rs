pub mod admin;
pub mod auth;
pub mod health;
pub mod payments;
pub mod users;

use axum::{extract::Query, Json};

use crate::error::{Error, Result};

/// Unwrap an optional JSON body, rejecting missing or undecodable payloads.
pub(crate) fn require_payload<T>(payload: Option<Json<T>>) -> Result<T> {
    match payload {
        Some(Json(payload)) => Ok(payload),
        None => Err(Error::InvalidInput("missing or malformed payload".to_string())),
    }
}

pub(crate) fn require_query<T>(query: Option<Query<T>>) -> Result<T> {
    match query {
        Some(Query(query)) => Ok(query),
        None => Err(Error::InvalidInput("malformed query string".to_string())),
    }
}
