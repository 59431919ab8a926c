use axum::{
    http::{header, HeaderValue, Method},
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config;
use crate::handlers::{elevated, protected, public};
use crate::middleware::{require_admin, session_auth_middleware};

/// Full router: public routes, session-protected `/api`, admin-only `/api/admin`
pub fn app() -> Router {
    Router::new()
        .merge(public_routes())
        .merge(protected_routes())
        .merge(elevated_routes().route_layer(middleware::from_fn(require_admin)).route_layer(
            middleware::from_fn(session_auth_middleware),
        ))
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
}

fn public_routes() -> Router {
    Router::new()
        .route("/", get(public::root))
        .route("/health", get(public::health))
        .route("/auth/login", post(public::login))
        .route("/auth/logout", post(public::logout))
        .route("/api/intake", post(public::submit_intake))
}

fn protected_routes() -> Router {
    use protected::{auth, cats, email, history, intake, map, matching, people, places, requests};

    Router::new()
        .route("/api/auth/me", get(auth::me))
        // Entities
        .route("/api/people", get(people::list))
        .route("/api/people/:id", get(people::show).patch(people::update))
        .route("/api/people/:id/merge", post(people::merge))
        .route("/api/cats", get(cats::list))
        .route("/api/cats/:id", get(cats::show).patch(cats::update))
        .route("/api/places", get(places::list))
        .route("/api/places/:id", get(places::show).patch(places::update))
        .route("/api/places/:id/merge", post(places::merge))
        .route("/api/places/:id/colony", get(places::colony))
        .route("/api/places/:id/colony-observations", post(places::add_observation))
        .route("/api/history/:entity_type/:id", get(history::show))
        // Requests
        .route("/api/requests", get(requests::list).post(requests::create))
        .route("/api/requests/:id", get(requests::show).patch(requests::update))
        .route("/api/requests/:id/notes", post(requests::add_note))
        .route("/api/requests/:id/archive", post(requests::archive))
        // Intake queue (submission itself is public)
        .route("/api/intake", get(intake::list))
        .route("/api/intake/:id", get(intake::show).patch(intake::update))
        .route("/api/intake/:id/convert", post(intake::convert))
        // Map
        .route("/api/map/places", get(map::places))
        // Email
        .route("/api/email/templates", get(email::templates))
        .route("/api/email/templates/:key/preview", post(email::preview))
        .route("/api/email/batches", post(email::create_batch))
        .route("/api/email/batches/:id", get(email::show_batch))
        .route("/api/email/batches/:id/send", post(email::send_batch))
        // Person matching
        .route("/api/match-candidates", get(matching::list))
        .route("/api/match-candidates/:id/accept", post(matching::accept))
        .route("/api/match-candidates/:id/reject", post(matching::reject))
        .route_layer(middleware::from_fn(session_auth_middleware))
}

fn elevated_routes() -> Router {
    use elevated::{pipelines, staff};

    Router::new()
        .route("/api/admin/staff", get(staff::list).post(staff::create))
        .route("/api/admin/staff/:id", axum::routing::patch(staff::update))
        .route("/api/admin/pipelines", get(pipelines::list))
        .route("/api/admin/pipelines/:name/run", post(pipelines::run))
        .route("/api/admin/pipeline-runs", get(pipelines::runs))
}

fn cors_layer() -> CorsLayer {
    let origins: Vec<HeaderValue> = config::config()
        .security
        .cors_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
}
