//! API Gateway proxy request and response shapes.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiGatewayResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub headers: Value,
    pub body: String,
}

impl ApiGatewayResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    pub fn body_json(&self) -> Option<Value> {
        serde_json::from_str(&self.body).ok()
    }
}

/// The parts of a proxy request the plotting endpoint reads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiRequest {
    pub method: Option<String>,
    pub query: Vec<(String, String)>,
}

impl ApiRequest {
    /// Reads REST (`httpMethod`) and HTTP API (`requestContext.http.method`)
    /// payloads alike. Anything that is not an object yields an empty request.
    pub fn from_event(event: &Value) -> Self {
        let method = event
            .get("httpMethod")
            .and_then(Value::as_str)
            .or_else(|| {
                event
                    .pointer("/requestContext/http/method")
                    .and_then(Value::as_str)
            })
            .map(str::to_ascii_uppercase);

        let query = event
            .get("queryStringParameters")
            .and_then(Value::as_object)
            .map(|params| {
                params
                    .iter()
                    .filter_map(|(key, value)| {
                        value.as_str().map(|text| (key.clone(), text.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self { method, query }
    }

    /// Invocations without a method (direct or scheduled) count as GET.
    pub fn is_get(&self) -> bool {
        self.method.as_deref().is_none_or(|method| method == "GET")
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

pub fn success_response(status_code: u16, payload: impl Serialize) -> ApiGatewayResponse {
    match serde_json::to_string(&payload) {
        Ok(body) => ApiGatewayResponse {
            status_code,
            headers: json!({"Content-Type": "application/json"}),
            body,
        },
        Err(error) => error_response(
            500,
            json!({
                "error": "serialization_error",
                "message": error.to_string(),
            }),
        ),
    }
}

pub fn error_response(status_code: u16, payload: Value) -> ApiGatewayResponse {
    ApiGatewayResponse {
        status_code,
        headers: json!({"Content-Type": "application/json"}),
        body: payload.to_string(),
    }
}

pub fn validation_error_response(message: &str) -> ApiGatewayResponse {
    error_response(
        400,
        json!({
            "error": "validation_error",
            "message": message,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_rest_api_method_and_query() {
        let request = ApiRequest::from_event(&json!({
            "httpMethod": "get",
            "queryStringParameters": {"window_seconds": "60", "ignored": 5}
        }));

        assert!(request.is_get());
        assert_eq!(request.query_param("window_seconds"), Some("60"));
        assert_eq!(request.query_param("ignored"), None);
    }

    #[test]
    fn reads_http_api_method() {
        let request = ApiRequest::from_event(&json!({
            "requestContext": {"http": {"method": "POST"}},
            "queryStringParameters": null
        }));

        assert!(!request.is_get());
        assert!(request.query.is_empty());
    }

    #[test]
    fn direct_invocation_is_treated_as_get() {
        assert!(ApiRequest::from_event(&json!({})).is_get());
        assert!(ApiRequest::from_event(&Value::Null).is_get());
    }

    #[test]
    fn error_response_carries_json_body() {
        let response = validation_error_response("window_seconds must be a positive integer");
        assert_eq!(response.status_code, 400);
        assert!(!response.is_success());
        let body = response.body_json().expect("json body");
        assert_eq!(body["error"], "validation_error");
    }
}
