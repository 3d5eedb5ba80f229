//! # Identity
//!
//! Deterministic identifiers and correlation tokens.
//!
//! - `job_id` is the hex SHA-256 of `job_type` plus the canonical JSON of
//!   the *validated* parameter map. Submitting the same job twice therefore
//!   yields the same id, which is what makes submission idempotent.
//! - `task_id` is semantic: `{job_id[..8]}-s{stage}-{index}`.
//! - Correlation tokens are 8-char opaque strings stitched through the
//!   message chain for log filtering. They are distinct from the external
//!   request id and from per-invocation ids (which are plain UUIDs and
//!   never leave the log stream).

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Length of the job-id prefix embedded in task ids
const TASK_ID_JOB_PREFIX_LEN: usize = 8;

/// Length of correlation tokens
const CORRELATION_TOKEN_LEN: usize = 8;

/// Compute the deterministic job id for `(job_type, validated_params)`.
///
/// The hash input is `job_type` concatenated with the canonical JSON
/// rendering of the parameters, so two submissions that validate to the
/// same map collapse to one job regardless of field order in the request.
pub fn job_id(job_type: &str, validated_params: &Map<String, Value>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(job_type.as_bytes());
    hasher.update(canonical_json(&Value::Object(validated_params.clone())).as_bytes());
    hex_encode(&hasher.finalize())
}

/// Semantic task id: `{job_id[..8]}-s{stage}-{index}`
pub fn task_id(job_id: &str, stage: u32, index: u32) -> String {
    let prefix = &job_id[..TASK_ID_JOB_PREFIX_LEN.min(job_id.len())];
    format!("{prefix}-s{stage}-{index}")
}

/// 8-char alphanumeric correlation token
pub fn correlation_token() -> String {
    (0..CORRELATION_TOKEN_LEN)
        .map(|_| fastrand::alphanumeric())
        .collect()
}

/// Render a JSON value canonically: object keys sorted recursively, no
/// whitespace. Arrays keep their order (it is semantically significant).
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Keys serialize through serde_json for correct escaping
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
