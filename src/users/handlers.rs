use axum::{
    extract::{Path, State},
    http::{header::SET_COOKIE, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::{get, patch},
    Form, Router,
};
use tracing::{error, instrument, warn};
use uuid::Uuid;

use crate::{
    session::{CurrentUser, SessionKeys},
    state::AppState,
    users::{
        dto::{Credentials, NewUser, NewUserForm, Password, SignInForm, UserMutationForm, UsernameChange},
        errors::UserError,
    },
    views::Views,
};

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(home))
        .route("/user", get(list_users))
        .route("/user/new", get(new_user_form).post(create_user))
        .route("/new", get(new_user_form))
        .route("/user/sign-in", get(sign_in_form).post(sign_in))
        .route("/user/sign-out", get(sign_out).post(sign_out))
        .route(
            "/user/:id",
            patch(update_user).delete(delete_user).post(override_user),
        )
        .route("/user/:id/edit", get(edit_user_form))
        .route("/user/:id/delete", get(delete_user_form))
}

// --- read views ---

#[instrument(skip(state, current))]
pub async fn home(State(state): State<AppState>, current: CurrentUser) -> Response {
    render_user_list(&state, &current, "home.html").await
}

#[instrument(skip(state, current))]
pub async fn list_users(State(state): State<AppState>, current: CurrentUser) -> Response {
    render_user_list(&state, &current, "users.html").await
}

async fn render_user_list(state: &AppState, current: &CurrentUser, template: &str) -> Response {
    match state.users.list_users().await {
        Ok(users) => {
            let mut ctx = Views::context(current);
            ctx.insert("users", &users);
            state.views.page(template, &ctx)
        }
        Err(e) => fail(state, current, e),
    }
}

pub async fn new_user_form(State(state): State<AppState>, current: CurrentUser) -> Response {
    state.views.page("new.html", &Views::context(&current))
}

pub async fn sign_in_form(State(state): State<AppState>, current: CurrentUser) -> Response {
    state.views.page("sign_in.html", &Views::context(&current))
}

#[instrument(skip(state, current))]
pub async fn edit_user_form(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<String>,
) -> Response {
    render_user(&state, &current, &id, "edit.html").await
}

#[instrument(skip(state, current))]
pub async fn delete_user_form(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<String>,
) -> Response {
    render_user(&state, &current, &id, "delete.html").await
}

async fn render_user(state: &AppState, current: &CurrentUser, id: &str, template: &str) -> Response {
    let user = match parse_id(id) {
        Ok(id) => state.users.get_user_for_edit(id).await,
        Err(e) => Err(e),
    };
    match user {
        Ok(user) => {
            let mut ctx = Views::context(current);
            ctx.insert("user", &user);
            state.views.page(template, &ctx)
        }
        Err(e) => fail(state, current, e),
    }
}

// --- mutations ---

#[instrument(skip(state, current, form))]
pub async fn create_user(
    State(state): State<AppState>,
    current: CurrentUser,
    Form(form): Form<NewUserForm>,
) -> Response {
    let created = match NewUser::parse(form.username, form.email, form.password) {
        Ok(new_user) => state.users.create_user(new_user).await,
        Err(e) => Err(e),
    };
    match created {
        Ok(_) => Redirect::to("/user").into_response(),
        Err(e) => fail(&state, &current, e),
    }
}

#[instrument(skip(state, current, form))]
pub async fn update_user(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<String>,
    Form(form): Form<UserMutationForm>,
) -> Response {
    apply_update(&state, &current, &id, form).await
}

#[instrument(skip(state, current, form))]
pub async fn delete_user(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<String>,
    Form(form): Form<UserMutationForm>,
) -> Response {
    apply_delete(&state, &current, &id, form).await
}

/// HTML forms can only POST; `_method` selects PATCH or DELETE.
#[instrument(skip(state, current, form), fields(method = ?form.method))]
pub async fn override_user(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<String>,
    Form(form): Form<UserMutationForm>,
) -> Response {
    let method = form.method.as_deref().map(str::to_ascii_uppercase);
    match method.as_deref() {
        Some("PATCH") | Some("PUT") => apply_update(&state, &current, &id, form).await,
        Some("DELETE") => apply_delete(&state, &current, &id, form).await,
        _ => fail(
            &state,
            &current,
            UserError::Validation("Unsupported form method".into()),
        ),
    }
}

async fn apply_update(
    state: &AppState,
    current: &CurrentUser,
    id: &str,
    form: UserMutationForm,
) -> Response {
    let result = async {
        let id = parse_id(id)?;
        let change = UsernameChange::parse(form.username, form.password)?;
        state.users.update_username(id, change).await
    }
    .await;
    match result {
        Ok(_) => Redirect::to("/user").into_response(),
        Err(e) => fail(state, current, e),
    }
}

async fn apply_delete(
    state: &AppState,
    current: &CurrentUser,
    id: &str,
    form: UserMutationForm,
) -> Response {
    let result = async {
        let id = parse_id(id)?;
        let password = Password::required(form.password)?;
        state.users.delete_user(id, &password).await?;
        Ok::<_, UserError>(id)
    }
    .await;
    match result {
        Ok(id) if current.is(id) => (
            [(SET_COOKIE, SessionKeys::expired_cookie())],
            Redirect::to("/user"),
        )
            .into_response(),
        Ok(_) => Redirect::to("/user").into_response(),
        Err(e) => fail(state, current, e),
    }
}

// --- session ---

#[instrument(skip(state, current, form))]
pub async fn sign_in(
    State(state): State<AppState>,
    current: CurrentUser,
    Form(form): Form<SignInForm>,
) -> Response {
    let user = match Credentials::parse(form.username, form.password) {
        Ok(credentials) => state.users.authenticate(credentials).await,
        Err(e) => Err(e),
    };
    let user = match user {
        Ok(u) => u,
        Err(e) => return fail(&state, &current, e),
    };

    match state.session.sign(&user) {
        Ok(token) => (
            [(SET_COOKIE, state.session.cookie(&token))],
            Redirect::to("/user"),
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, user_id = %user.id, "session sign failed");
            state.views.error_page(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Could not start a session",
                &current,
            )
        }
    }
}

pub async fn sign_out() -> Response {
    (
        [(SET_COOKIE, SessionKeys::expired_cookie())],
        Redirect::to("/user"),
    )
        .into_response()
}

// --- helpers ---

/// A path id that is not a UUID cannot name a stored user.
fn parse_id(raw: &str) -> Result<Uuid, UserError> {
    Uuid::parse_str(raw).map_err(|_| UserError::NotFound)
}

fn status_for(e: &UserError) -> StatusCode {
    match e {
        UserError::Validation(_) => StatusCode::BAD_REQUEST,
        UserError::Authentication => StatusCode::UNAUTHORIZED,
        UserError::NotFound => StatusCode::NOT_FOUND,
        UserError::Conflict(_) => StatusCode::CONFLICT,
        UserError::Storage(_) | UserError::Credential(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn fail(state: &AppState, current: &CurrentUser, e: UserError) -> Response {
    let status = status_for(&e);
    let message = if status.is_server_error() {
        error!(error = %e, "request failed");
        "Something went wrong. Please try again.".to_string()
    } else {
        warn!(error = %e, %status, "request rejected");
        e.to_string()
    };
    state.views.error_page(status, &message, current)
}
