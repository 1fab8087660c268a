use crate::AppState;
use actix_web::{web, HttpResponse};
use lora_as_core::joinserver::messages::BackendRequest;
use tracing::{debug, instrument};

pub fn configure_join_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::post().to(join));
}

/// Join and rejoin requests. Failures are reported in the answer's `Result`,
/// the HTTP status is always 200 once the body parsed.
#[instrument(name = "join-api", skip_all)]
async fn join(state: web::Data<AppState>, req: web::Json<BackendRequest>) -> HttpResponse {
    let ans = state.join_server.handle(&req).await;
    debug!(
        transaction_id = ans.transaction_id,
        result = ?ans.result.result_code,
        "Answering join-server request"
    );
    HttpResponse::Ok().json(ans)
}
