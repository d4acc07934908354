//! Server-side HTML rendering.
//!
//! Templates are compiled into the binary and loaded into a single [`Tera`]
//! instance at start-up. Autoescaping is on for every `.html` template, so
//! user-supplied values are always escaped.

use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use tera::{Context, Tera};
use tracing::error;

use crate::session::CurrentUser;

const TEMPLATES: [(&str, &str); 8] = [
    ("base.html", include_str!("../templates/base.html")),
    ("home.html", include_str!("../templates/home.html")),
    ("users.html", include_str!("../templates/users.html")),
    ("new.html", include_str!("../templates/new.html")),
    ("edit.html", include_str!("../templates/edit.html")),
    ("delete.html", include_str!("../templates/delete.html")),
    ("sign_in.html", include_str!("../templates/sign_in.html")),
    ("error.html", include_str!("../templates/error.html")),
];

pub struct Views {
    tera: Tera,
}

impl Views {
    pub fn load() -> Result<Self, tera::Error> {
        let mut tera = Tera::default();
        tera.add_raw_templates(TEMPLATES)?;
        Ok(Self { tera })
    }

    /// Context every page starts from: who is signed in.
    pub fn context(current: &CurrentUser) -> Context {
        let mut ctx = Context::new();
        ctx.insert("current_user", &current.0);
        ctx
    }

    pub fn page(&self, name: &str, ctx: &Context) -> Response {
        self.page_with_status(StatusCode::OK, name, ctx)
    }

    pub fn page_with_status(&self, status: StatusCode, name: &str, ctx: &Context) -> Response {
        match self.tera.render(name, ctx) {
            Ok(body) => (status, Html(body)).into_response(),
            Err(e) => {
                error!(error = ?e, template = name, "template render failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Template error").into_response()
            }
        }
    }

    pub fn error_page(&self, status: StatusCode, message: &str, current: &CurrentUser) -> Response {
        let mut ctx = Self::context(current);
        ctx.insert("status", &status.as_u16());
        ctx.insert("message", message);
        self.page_with_status(status, "error.html", &ctx)
    }
}
