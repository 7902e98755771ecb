use axum::{Json, Router, extract::State, routing::get};
use std::marker::PhantomData;

use super::response::JsonResponse;
use super::routes::RouteModule;
use crate::app::AppContext;
use crate::auth::{AuthProvider, AuthUser, Identity};
use crate::todos::TodoLimitCheck;

/// `GET /todos/limit` for the signed-in user.
pub struct TodoRoutes<P> {
    _provider: PhantomData<P>,
}

impl<P> TodoRoutes<P> {
    pub fn new() -> Self {
        Self {
            _provider: PhantomData,
        }
    }
}

impl<P> Default for TodoRoutes<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> RouteModule for TodoRoutes<P>
where
    P: AuthProvider<User = Identity>,
{
    fn routes(&self) -> Router<AppContext> {
        Router::new().route("/todos/limit", get(todo_limit::<P>))
    }

    fn prefix(&self) -> Option<&str> {
        Some("/api")
    }
}

async fn todo_limit<P>(
    State(ctx): State<AppContext>,
    AuthUser(user): AuthUser<P>,
) -> JsonResponse<TodoLimitCheck>
where
    P: AuthProvider<User = Identity>,
{
    Ok(Json(ctx.usage.check_todo_limit(&user.user_id).await))
}
