use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::debug;

/// Decides whether a request path belongs to a public (unauthenticated) endpoint.
pub type PublicPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Strip the query string and any trailing slash.
fn normalize(path: &str) -> &str {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    if path.len() > 1 {
        path.trim_end_matches('/')
    } else {
        path
    }
}

/// Public path patterns supplied by the embedding application.
///
/// A pattern ending in `/*` matches the prefix and everything below it; any
/// other pattern must match exactly.
#[derive(Debug, Clone, Default)]
pub struct PublicRoutes {
    exact: Vec<String>,
    prefixes: Vec<String>,
}

impl PublicRoutes {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut routes = Self::default();
        for pattern in patterns {
            let pattern = pattern.as_ref().trim();
            if let Some(prefix) = pattern.strip_suffix("/*") {
                routes.prefixes.push(normalize(prefix).to_string());
            } else if !pattern.is_empty() {
                routes.exact.push(normalize(pattern).to_string());
            }
        }
        routes
    }

    pub fn is_public(&self, path: &str) -> bool {
        let path = normalize(path);
        self.exact.iter().any(|p| p == path)
            || self.prefixes.iter().any(|prefix| {
                path == prefix
                    || path
                        .strip_prefix(prefix.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            })
    }

    pub fn into_predicate(self) -> PublicPredicate {
        Arc::new(move |path| self.is_public(path))
    }
}

/// Whether two request paths name the same endpoint, ignoring query strings
/// and trailing slashes.
pub fn same_path(a: &str, b: &str) -> bool {
    normalize(a) == normalize(b)
}

/// Routes the session coordinator needs to classify 401 responses and to
/// send the view layer back to the login screen.
#[derive(Clone)]
pub struct SessionRoutes {
    pub login_route: String,
    is_public: PublicPredicate,
}

impl SessionRoutes {
    pub fn new(login_route: impl Into<String>, is_public: PublicPredicate) -> Self {
        Self {
            login_route: login_route.into(),
            is_public,
        }
    }

    pub fn is_public(&self, path: &str) -> bool {
        (self.is_public)(path)
    }

    pub fn is_login_route(&self, path: &str) -> bool {
        same_path(path, &self.login_route)
    }
}

impl fmt::Debug for SessionRoutes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRoutes")
            .field("login_route", &self.login_route)
            .finish_non_exhaustive()
    }
}

/// Client-side routing seen from the session layer.
pub trait Navigator: Send + Sync {
    fn current_path(&self) -> String;
    fn navigate(&self, path: &str);
}

/// Send the view layer to the login route unless it is already there.
pub(crate) fn redirect_to_login(navigator: &dyn Navigator, routes: &SessionRoutes) {
    let current = navigator.current_path();
    if routes.is_login_route(&current) {
        debug!(%current, "Already on login route");
        return;
    }
    debug!(from = %current, to = %routes.login_route, "Redirecting to login");
    navigator.navigate(&routes.login_route);
}

/// Navigator that only tracks the current path and the navigation history.
#[derive(Debug)]
pub struct MemoryNavigator {
    history: Mutex<Vec<String>>,
}

impl MemoryNavigator {
    pub fn new(initial: impl Into<String>) -> Self {
        Self {
            history: Mutex::new(vec![initial.into()]),
        }
    }

    /// Every path visited, oldest first, including the initial one.
    pub fn history(&self) -> Vec<String> {
        self.history
            .lock()
            .map(|history| history.clone())
            .unwrap_or_default()
    }
}

impl Navigator for MemoryNavigator {
    fn current_path(&self) -> String {
        self.history
            .lock()
            .ok()
            .and_then(|history| history.last().cloned())
            .unwrap_or_default()
    }

    fn navigate(&self, path: &str) {
        if let Ok(mut history) = self.history.lock() {
            history.push(path.to_string());
        }
    }
}
