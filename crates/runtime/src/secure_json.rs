//! JSON parsing that refuses prototype-polluting member names.
//!
//! Subgraph responses are untrusted input. A document carrying `__proto__`
//! or `constructor.prototype` members is rejected outright rather than
//! stitched into a response a JavaScript client may merge into objects.

use bytes::Bytes;
use serde_json::Value;

use crate::fetch::{FetchError, FetchResult};

pub fn parse(bytes: &Bytes) -> FetchResult<Value> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|err| FetchError::InvalidJson(err.to_string()))?;
    check(&value)?;
    Ok(value)
}

fn check(value: &Value) -> FetchResult<()> {
    match value {
        Value::Object(object) => {
            for (key, child) in object {
                if key == "__proto__" {
                    return Err(FetchError::InsecureJson(
                        "forbidden member name \"__proto__\"".to_owned(),
                    ));
                }
                if key == "constructor" && has_member(child, "prototype") {
                    return Err(FetchError::InsecureJson(
                        "forbidden member \"constructor.prototype\"".to_owned(),
                    ));
                }
                check(child)?;
            }
            Ok(())
        }
        Value::Array(items) => {
            for item in items {
                check(item)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn has_member(value: &Value, name: &str) -> bool {
    matches!(value, Value::Object(object) if object.contains_key(name))
}
