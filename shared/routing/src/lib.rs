//! Method and path-pattern routing for the relay's inbound endpoints.
//!
//! Patterns are slash separated. A segment written as `{name}` captures the
//! request segment under `name`; every other segment must match literally.
//! Trailing slashes are ignored on both sides.

use http::Method;
use std::collections::HashMap;

#[derive(Debug, PartialEq)]
enum Segment {
    Literal(String),
    Capture(String),
}

#[derive(Debug)]
struct Pattern {
    segments: Vec<Segment>,
}

impl Pattern {
    fn parse(pattern: &str) -> Self {
        let segments = split(pattern)
            .map(|s| match s.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                Some(name) => Segment::Capture(name.to_string()),
                None => Segment::Literal(s.to_string()),
            })
            .collect();

        Pattern { segments }
    }

    fn captures<'a>(&self, request_path: &'a str) -> Option<Params<'a>> {
        let request_segments: Vec<&'a str> = split(request_path).collect();
        if request_segments.len() != self.segments.len() {
            return None;
        }

        let mut params = HashMap::new();
        for (segment, actual) in self.segments.iter().zip(request_segments) {
            match segment {
                Segment::Literal(expected) if expected != actual => return None,
                Segment::Literal(_) => {}
                Segment::Capture(name) => {
                    params.insert(name.clone(), actual);
                }
            }
        }

        Some(Params(params))
    }
}

fn split(path: &str) -> impl Iterator<Item = &str> {
    path.trim()
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
}

/// Captured path parameters of a matched route.
#[derive(Debug, Default, PartialEq)]
pub struct Params<'a>(HashMap<String, &'a str>);

impl<'a> Params<'a> {
    pub fn get(&self, name: &str) -> Option<&'a str> {
        self.0.get(name).copied()
    }
}

#[derive(Debug, PartialEq)]
pub enum RouteOutcome<'a, A> {
    Matched { action: &'a A, params: Params<'a> },
    /// The path is known but not for this method.
    MethodNotAllowed,
    NotFound,
}

#[derive(Debug)]
struct Route<A> {
    method: Method,
    pattern: Pattern,
    action: A,
}

#[derive(Debug)]
pub struct Router<A> {
    routes: Vec<Route<A>>,
}

impl<A> Default for Router<A> {
    fn default() -> Self {
        Self { routes: Vec::new() }
    }
}

impl<A> Router<A> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `action` for `method` on `pattern`. Earlier routes win.
    pub fn route(mut self, method: Method, pattern: &str, action: A) -> Self {
        self.routes.push(Route {
            method,
            pattern: Pattern::parse(pattern),
            action,
        });
        self
    }

    pub fn resolve<'a>(&'a self, method: &Method, path: &'a str) -> RouteOutcome<'a, A> {
        let mut path_known = false;

        for route in &self.routes {
            let Some(params) = route.pattern.captures(path) else {
                continue;
            };
            if route.method == *method {
                return RouteOutcome::Matched {
                    action: &route.action,
                    params,
                };
            }
            path_known = true;
        }

        if path_known {
            RouteOutcome::MethodNotAllowed
        } else {
            RouteOutcome::NotFound
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    enum Action {
        Webhook,
        Health,
        Purge,
    }

    fn router() -> Router<Action> {
        Router::new()
            .route(Method::POST, "/webhook/{secret_id}", Action::Webhook)
            .route(Method::GET, "/healthz", Action::Health)
            .route(Method::POST, "/admin/cache/purge/{secret_id}", Action::Purge)
    }

    #[test]
    fn test_capture() {
        let router = router();
        match router.resolve(&Method::POST, "/webhook/abc-123") {
            RouteOutcome::Matched { action, params } => {
                assert_eq!(action, &Action::Webhook);
                assert_eq!(params.get("secret_id"), Some("abc-123"));
                assert_eq!(params.get("other"), None);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_trailing_slash_is_ignored() {
        let router = router();
        assert!(matches!(
            router.resolve(&Method::GET, "/healthz/"),
            RouteOutcome::Matched {
                action: Action::Health,
                ..
            }
        ));
    }

    #[test]
    fn test_missing_capture_does_not_match() {
        let router = router();
        assert_eq!(
            router.resolve(&Method::POST, "/webhook/"),
            RouteOutcome::NotFound
        );
        assert_eq!(
            router.resolve(&Method::POST, "/webhook/a/b"),
            RouteOutcome::NotFound
        );
    }

    #[test]
    fn test_method_not_allowed() {
        let router = router();
        assert_eq!(
            router.resolve(&Method::GET, "/webhook/abc"),
            RouteOutcome::MethodNotAllowed
        );
        assert_eq!(
            router.resolve(&Method::DELETE, "/healthz"),
            RouteOutcome::MethodNotAllowed
        );
    }

    #[test]
    fn test_root_pattern() {
        let router = Router::new().route(Method::GET, "/", "index");
        assert!(matches!(
            router.resolve(&Method::GET, "/"),
            RouteOutcome::Matched { action: &"index", .. }
        ));
        assert_eq!(router.resolve(&Method::GET, "/x"), RouteOutcome::NotFound);
    }

    #[test]
    fn test_pattern_parsing() {
        assert!(Pattern::parse("").segments.is_empty());
        assert_eq!(
            Pattern::parse("/admin/{id}/").segments,
            vec![
                Segment::Literal("admin".into()),
                Segment::Capture("id".into())
            ]
        );
    }
}
