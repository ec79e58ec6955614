use serde_json::json;
use simcity_evaluator::Evaluator;
use simcity_purge::{Credentials, PurgeRequest, Purger};

use crate::request::{ApiRequest, ApiResponse};

/// Route handlers for the control API.
pub struct ControlApi {
    evaluator: Evaluator,
    purger: Purger,
}

impl ControlApi {
    pub fn new(evaluator: Evaluator, purger: Purger) -> Self {
        Self { evaluator, purger }
    }

    pub fn handle(&self, request: &ApiRequest) -> ApiResponse {
        let segments = request.segments();
        let method = request.method.as_str();

        match (method, segments.as_slice()) {
            ("GET", ["healthz"]) => ApiResponse::json(200, json!({ "status": "ok" })),
            ("GET", ["replay", run_id, "evaluation"]) => self.evaluation(request, run_id),
            ("POST", ["synthetic", "purge"]) => self.purge(request),
            (_, ["healthz"] | ["replay", _, "evaluation"] | ["synthetic", "purge"]) => {
                ApiResponse::error(405, format!("Method {method} not allowed"))
            }
            _ => ApiResponse::error(404, format!("No route for {}", request.path)),
        }
    }

    fn evaluation(&self, request: &ApiRequest, run_id: &str) -> ApiResponse {
        let variant = request.query_param("variant");
        match self.evaluator.evaluate(run_id, variant.as_deref()) {
            Ok(evaluation) => match serde_json::to_value(&evaluation) {
                Ok(body) => ApiResponse::json(200, body),
                Err(e) => ApiResponse::error(500, format!("Failed to encode evaluation: {e}")),
            },
            Err(e) => {
                if e.status_code() >= 500 {
                    log::error!("Evaluation of {run_id} failed: {e}");
                }
                ApiResponse::error(e.status_code(), e.to_string())
            }
        }
    }

    fn purge(&self, request: &ApiRequest) -> ApiResponse {
        if let Err(e) = self.purger.check_environment() {
            return ApiResponse::error(e.status_code(), e.to_string());
        }

        let body = if request.body.iter().all(u8::is_ascii_whitespace) {
            PurgeRequest::default()
        } else {
            match serde_json::from_slice::<PurgeRequest>(&request.body) {
                Ok(body) => body,
                Err(e) => return ApiResponse::error(400, format!("Invalid purge request: {e}")),
            }
        };

        let credentials = Credentials {
            authorization: request.header("Authorization").map(str::to_string),
            admin_token: request.header("X-Admin-Token").map(str::to_string),
        };

        match self.purger.purge(&credentials, &body) {
            Ok(report) => match serde_json::to_value(&report) {
                Ok(body) => ApiResponse::json(200, body),
                Err(e) => ApiResponse::error(500, format!("Failed to encode purge report: {e}")),
            },
            Err(e) => ApiResponse::error(e.status_code(), e.to_string()),
        }
    }
}
