use actix_web::{http::header, web, HttpRequest};
use serde_json::Value;
use std::collections::HashMap;

/// Credential-bearing parts of a websocket handshake
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Handshake {
    /// Raw `Authorization` header value
    pub authorization: Option<String>,
    /// `token` query parameter
    pub query_token: Option<String>,
    /// Auth payload sent with the handshake
    pub auth: Option<Value>,
}

impl Handshake {
    /// Capture credential sources from an upgrade request.
    ///
    /// The auth payload travels as a JSON object in the `auth` query parameter;
    /// a value that is not valid JSON is ignored.
    pub fn from_request(req: &HttpRequest) -> Self {
        let authorization = req
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut query = web::Query::<HashMap<String, String>>::from_query(req.query_string())
            .map(|q| q.into_inner())
            .unwrap_or_default();

        let query_token = query.remove("token").filter(|t| !t.is_empty());
        let auth = query
            .remove("auth")
            .and_then(|raw| serde_json::from_str::<Value>(&raw).ok());

        Self {
            authorization,
            query_token,
            auth,
        }
    }

    pub fn with_bearer(token: impl AsRef<str>) -> Self {
        Self {
            authorization: Some(format!("Bearer {}", token.as_ref())),
            ..Self::default()
        }
    }

    /// True if any credential source is populated
    pub fn has_credential(&self) -> bool {
        self.extract_token().is_some()
    }

    pub fn extract_token(&self) -> Option<String> {
        if let Some(header) = &self.authorization {
            let mut parts = header.split(' ');
            if let (Some("Bearer"), Some(token)) = (parts.next(), parts.next()) {
                if !token.is_empty() {
                    return Some(token.to_string());
                }
            }
        }

        if let Some(token) = &self.query_token {
            return Some(token.clone());
        }

        self.auth
            .as_ref()
            .and_then(|auth| auth.get("token"))
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    }
}
