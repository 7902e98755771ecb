use axum::Router;

use crate::app::AppContext;

/// A group of routes that share a path prefix.
///
/// Routers returned here still need [`AppContext`]; the state is supplied
/// once the whole application router is assembled.
///
/// # Example
///
/// ```ignore
/// struct TodoRoutes;
///
/// impl RouteModule for TodoRoutes {
///     fn routes(&self) -> Router<AppContext> {
///         Router::new().route("/todos/limit", get(todo_limit))
///     }
/// }
/// ```
pub trait RouteModule {
    fn routes(&self) -> Router<AppContext>;

    /// Optional prefix for every route in the module
    fn prefix(&self) -> Option<&str> {
        None
    }

    /// Nest or merge this module into `router`.
    fn register(self, router: Router<AppContext>) -> Router<AppContext>
    where
        Self: Sized,
    {
        let routes = self.routes();

        match self.prefix() {
            Some(prefix) => router.nest(prefix, routes),
            None => router.merge(routes),
        }
    }
}
