use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::{HeaderMap, Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    AppState,
    error::{AppError, AppResult},
    filter::{Filter, MOVIE_SORT_SAFELIST},
    models::{self, Movie, MovieInput},
    validator::Validator,
};

const EXPECTED_VERSION: &str = "x-expected-version";

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthcheck", get(healthcheck))
        .route("/movies", get(list_movies).post(create_movie))
        .route("/movies/{id}", get(show_movie).patch(update_movie).delete(delete_movie))
        .fallback(not_found)
        .method_not_allowed_fallback(method_not_allowed)
        .with_state(state)
        .layer(CorsLayer::new().allow_origin(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
}

pub async fn healthcheck(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "available",
        "system_info": {
            "environment": state.config.env,
            "version": env!("CARGO_PKG_VERSION"),
        },
    }))
}

pub async fn create_movie(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<MovieInput>, JsonRejection>,
) -> AppResult<Response> {
    let Json(input) = payload?;

    let mut movie = Movie::default();
    input.apply_to(&mut movie);
    validate_movie(&movie)?;

    state.movies.insert(&mut movie).await?;

    let location = format!("/movies/{}", movie.id);
    Ok((StatusCode::CREATED, [(header::LOCATION, location)], Json(json!({ "movie": movie })))
        .into_response())
}

pub async fn show_movie(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<Value>> {
    let id = parse_id(&id)?;
    let movie = state.movies.get(id).await?;
    Ok(Json(json!({ "movie": movie })))
}

pub async fn update_movie(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    payload: Result<Json<MovieInput>, JsonRejection>,
) -> AppResult<Json<Value>> {
    let id = parse_id(&id)?;
    let mut movie = state.movies.get(id).await?;

    if let Some(expected) = headers.get(EXPECTED_VERSION).filter(|h| !h.is_empty()) {
        let expected = expected.to_str().ok().and_then(|s| s.trim().parse::<i32>().ok());
        if expected != Some(movie.version) {
            return Err(AppError::EditConflict);
        }
    }

    let Json(input) = payload?;
    input.apply_to(&mut movie);
    validate_movie(&movie)?;

    movie.version = state.movies.update(&movie).await?;
    Ok(Json(json!({ "movie": movie })))
}

pub async fn delete_movie(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<Value>> {
    let id = parse_id(&id)?;
    state.movies.delete(id).await?;
    Ok(Json(json!({ "message": "movie successfully deleted" })))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    title: Option<String>,
    genres: Option<String>,
    page: Option<String>,
    page_size: Option<String>,
    sort: Option<String>,
}

pub async fn list_movies(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ListQuery>,
) -> AppResult<Json<Value>> {
    let mut v = Validator::new();

    let title = q.title.unwrap_or_default();
    let genres = read_csv(q.genres.as_deref());
    let filter = Filter {
        page: read_int(q.page.as_deref(), "page", 1, &mut v),
        page_size: read_int(q.page_size.as_deref(), "page_size", 20, &mut v),
        sort: q.sort.filter(|s| !s.is_empty()).unwrap_or_else(|| "id".to_string()),
        sort_safelist: MOVIE_SORT_SAFELIST,
    };

    filter.validate(&mut v);
    if !v.valid() {
        return Err(AppError::FailedValidation(v.into_errors()));
    }

    let (movies, metadata) = state.movies.get_all(&title, &genres, &filter).await?;
    Ok(Json(json!({ "metadata": metadata, "movies": movies })))
}

async fn not_found() -> AppError {
    AppError::NotFound
}

async fn method_not_allowed(method: Method) -> AppError {
    AppError::MethodNotAllowed(method)
}

fn validate_movie(movie: &Movie) -> AppResult<()> {
    let mut v = Validator::new();
    movie.validate(&mut v, models::current_year());
    if v.valid() { Ok(()) } else { Err(AppError::FailedValidation(v.into_errors())) }
}

fn parse_id(raw: &str) -> AppResult<i64> {
    raw.parse::<i64>().ok().filter(|id| *id >= 1).ok_or(AppError::NotFound)
}

fn read_int(raw: Option<&str>, key: &str, default: i64, v: &mut Validator) -> i64 {
    match raw {
        None | Some("") => default,
        Some(s) => s.parse().unwrap_or_else(|_| {
            v.add_error(key, "must be an integer value");
            default
        }),
    }
}

fn read_csv(raw: Option<&str>) -> Vec<String> {
    raw.map(|s| {
        s.split(',').map(str::trim).filter(|g| !g.is_empty()).map(str::to_string).collect()
    })
    .unwrap_or_default()
}
