//! Applies `apigate_core::transform::Transform` against a live exchange
//! (§4.4). The transform document itself is declared in apigate-core;
//! this module is the proxy-side interpreter the doc comment there points to.

use apigate_core::transform::{Mutation, Transform};
use bytes::Bytes;
use http::HeaderMap;
use serde_json::Value;
use std::collections::HashMap;

/// The mutable parts of a request or response a transform can rewrite.
pub struct Exchange {
    pub method: String,
    pub path: String,
    pub query: HashMap<String, String>,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub content_type_is_json: bool,
}

/// Applies every mutation in `transform.mutations`, in declared order
/// (§4.4). `allow_body` is false for streaming protocols' response
/// transforms, which may only touch headers.
pub fn apply(transform: &Transform, exchange: &mut Exchange, allow_body: bool) {
    for mutation in &transform.mutations {
        apply_one(mutation, exchange, allow_body);
    }
}

fn apply_one(mutation: &Mutation, exchange: &mut Exchange, allow_body: bool) {
    match mutation {
        Mutation::SetHeaders(headers) => {
            for (name, value) in headers {
                if let (Ok(name), Ok(value)) = (
                    http::header::HeaderName::from_bytes(name.as_bytes()),
                    http::header::HeaderValue::from_str(value),
                ) {
                    exchange.headers.insert(name, value);
                }
            }
        }
        Mutation::RemoveHeaders(names) => {
            for name in names {
                if let Ok(name) = http::header::HeaderName::from_bytes(name.as_bytes()) {
                    exchange.headers.remove(name);
                }
            }
        }
        Mutation::AddQuery(params) => {
            for (k, v) in params {
                exchange.query.insert(k.clone(), v.clone());
            }
        }
        Mutation::RewritePath(path) => {
            exchange.path = path.clone();
        }
        Mutation::OverrideMethod(method) => {
            exchange.method = method.to_ascii_uppercase();
        }
        Mutation::SetBodyJsonPath { path, value } => {
            if !allow_body || !exchange.content_type_is_json {
                return;
            }
            mutate_json_body(exchange, |root| {
                set_json_path(root, path, value.clone());
            });
        }
        Mutation::RemoveBodyJsonPath { path } => {
            if !allow_body || !exchange.content_type_is_json {
                return;
            }
            mutate_json_body(exchange, |root| {
                remove_json_path(root, path);
            });
        }
    }
}

fn mutate_json_body(exchange: &mut Exchange, f: impl FnOnce(&mut Value)) {
    let Some(body) = &exchange.body else { return };
    let Ok(mut root) = serde_json::from_slice::<Value>(body) else { return };
    f(&mut root);
    if let Ok(bytes) = serde_json::to_vec(&root) {
        exchange.body = Some(Bytes::from(bytes));
    }
}

/// Dotted path, e.g. `user.name`; intermediate objects are created as needed.
fn set_json_path(root: &mut Value, path: &str, value: Value) {
    let segments: Vec<&str> = path.split('.').collect();
    let mut cursor = root;
    for (i, segment) in segments.iter().enumerate() {
        if !cursor.is_object() {
            *cursor = Value::Object(Default::default());
        }
        let map = cursor.as_object_mut().unwrap();
        if i == segments.len() - 1 {
            map.insert(segment.to_string(), value);
            return;
        }
        cursor = map.entry(segment.to_string()).or_insert_with(|| Value::Object(Default::default()));
    }
}

fn remove_json_path(root: &mut Value, path: &str) {
    let segments: Vec<&str> = path.split('.').collect();
    let Some((last, parents)) = segments.split_last() else { return };
    let mut cursor = root;
    for segment in parents {
        match cursor.get_mut(*segment) {
            Some(next) => cursor = next,
            None => return,
        }
    }
    if let Some(map) = cursor.as_object_mut() {
        map.remove(*last);
    }
}

/// Case-insensitive header predicate lookup used before applying headers,
/// so `SetHeaders` overwrites an existing header regardless of the
/// inbound casing while still emitting the exact declared name (§4.4).
pub fn header_value_ci<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.as_str().eq_ignore_ascii_case(name))
        .and_then(|(_, v)| v.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_exchange() -> Exchange {
        Exchange {
            method: "GET".into(),
            path: "/v1/chat".into(),
            query: HashMap::new(),
            headers: HeaderMap::new(),
            body: None,
            content_type_is_json: true,
        }
    }

    #[test]
    fn set_headers_applies_exact_case() {
        let transform = Transform {
            mutations: vec![Mutation::SetHeaders(HashMap::from([(
                "X-Forwarded-By".to_string(),
                "apigate".to_string(),
            )]))],
        };
        let mut ex = base_exchange();
        apply(&transform, &mut ex, true);
        assert_eq!(header_value_ci(&ex.headers, "x-forwarded-by"), Some("apigate"));
    }

    #[test]
    fn rewrite_path_and_override_method() {
        let transform = Transform {
            mutations: vec![
                Mutation::RewritePath("/v2/chat".to_string()),
                Mutation::OverrideMethod("post".to_string()),
            ],
        };
        let mut ex = base_exchange();
        apply(&transform, &mut ex, true);
        assert_eq!(ex.path, "/v2/chat");
        assert_eq!(ex.method, "POST");
    }

    #[test]
    fn set_body_json_path_creates_nested_object() {
        let transform = Transform {
            mutations: vec![Mutation::SetBodyJsonPath {
                path: "meta.injected".to_string(),
                value: serde_json::json!(true),
            }],
        };
        let mut ex = base_exchange();
        ex.body = Some(Bytes::from_static(b"{}"));
        apply(&transform, &mut ex, true);
        let body: Value = serde_json::from_slice(ex.body.as_ref().unwrap()).unwrap();
        assert_eq!(body["meta"]["injected"], true);
    }

    #[test]
    fn body_mutations_skipped_when_body_not_allowed() {
        let transform = Transform {
            mutations: vec![Mutation::SetBodyJsonPath {
                path: "x".to_string(),
                value: serde_json::json!(1),
            }],
        };
        let mut ex = base_exchange();
        ex.body = Some(Bytes::from_static(b"{}"));
        apply(&transform, &mut ex, false);
        assert_eq!(ex.body.as_deref(), Some(b"{}".as_slice()));
    }

    #[test]
    fn remove_body_json_path_drops_leaf() {
        let transform = Transform {
            mutations: vec![Mutation::RemoveBodyJsonPath { path: "secret".to_string() }],
        };
        let mut ex = base_exchange();
        ex.body = Some(Bytes::from_static(b"{\"secret\":1,\"keep\":2}"));
        apply(&transform, &mut ex, true);
        let body: Value = serde_json::from_slice(ex.body.as_ref().unwrap()).unwrap();
        assert!(body.get("secret").is_none());
        assert_eq!(body["keep"], 2);
    }

    #[test]
    fn body_mutations_skipped_for_non_json_content_type() {
        let transform = Transform {
            mutations: vec![Mutation::SetBodyJsonPath {
                path: "x".to_string(),
                value: serde_json::json!(1),
            }],
        };
        let mut ex = base_exchange();
        ex.content_type_is_json = false;
        ex.body = Some(Bytes::from_static(b"raw-bytes"));
        apply(&transform, &mut ex, true);
        assert_eq!(ex.body.as_deref(), Some(b"raw-bytes".as_slice()));
    }
}
