//! Routes of the join-server API.
mod health;
mod join;

use actix_web::{error::JsonPayloadError, web, HttpRequest};
use lora_as_error::web::WebError;

/// Requests are a few hundred bytes, anything larger is not a Backend
/// Interfaces message.
const MAX_BODY_SIZE: usize = 64 * 1024;

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.configure(health::configure_health_routes)
        .configure(join::configure_join_routes);
}

/// Malformed bodies are answered with a JSON 400 instead of actix' plain text.
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(MAX_BODY_SIZE)
        .error_handler(|err: JsonPayloadError, _req: &HttpRequest| {
            WebError::BadRequest(err.to_string()).into()
        })
}
