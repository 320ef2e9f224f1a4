//! Fine-grained reconciliation for nested payloads.
//!
//! Large mostly-unchanged payloads should not be replaced wholesale on
//! every revalidation. [`reconcile`] merges a fresh payload into the
//! previous one in place, touching only the subtrees that actually differ,
//! and reports the changed paths so a consumer can update precisely.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::QueryError;
use crate::outcome::Redirect;

use super::binding::QueryBinding;
use super::registry::QueryRegistry;

/// One step into a JSON tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSeg {
    Key(String),
    Index(usize),
}

/// Location of a change inside a payload, rooted at `$`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct JsonPath(Vec<PathSeg>);

impl JsonPath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn segments(&self) -> &[PathSeg] {
        &self.0
    }

    fn child(&self, seg: PathSeg) -> Self {
        let mut segments = self.0.clone();
        segments.push(seg);
        Self(segments)
    }
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "$")?;
        for seg in &self.0 {
            match seg {
                PathSeg::Key(key) => write!(f, ".{key}")?,
                PathSeg::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

/// Merge `next` into `current` in place, returning the changed paths.
///
/// Unchanged subtrees are left untouched. An empty result means the
/// payloads were structurally equal.
pub fn reconcile(current: &mut Value, next: Value) -> Vec<JsonPath> {
    let mut changes = Vec::new();
    merge(current, next, &JsonPath::root(), &mut changes);
    changes
}

fn merge(current: &mut Value, next: Value, path: &JsonPath, changes: &mut Vec<JsonPath>) {
    match (current, next) {
        (Value::Object(cur), Value::Object(next)) => {
            let removed: Vec<String> = cur
                .keys()
                .filter(|key| !next.contains_key(*key))
                .cloned()
                .collect();
            for key in removed {
                cur.remove(&key);
                changes.push(path.child(PathSeg::Key(key)));
            }
            for (key, value) in next {
                match cur.get_mut(&key) {
                    Some(slot) => {
                        let child = path.child(PathSeg::Key(key));
                        merge(slot, value, &child, changes);
                    }
                    None => {
                        changes.push(path.child(PathSeg::Key(key.clone())));
                        cur.insert(key, value);
                    }
                }
            }
        }
        (Value::Array(cur), Value::Array(next)) => {
            let cur_len = cur.len();
            let next_len = next.len();
            let shared = cur_len.min(next_len);
            let mut incoming = next.into_iter();
            for (index, slot) in cur.iter_mut().take(shared).enumerate() {
                let value = match incoming.next() {
                    Some(value) => value,
                    None => break,
                };
                let child = path.child(PathSeg::Index(index));
                merge(slot, value, &child, changes);
            }
            if next_len > cur_len {
                for (offset, value) in incoming.enumerate() {
                    changes.push(path.child(PathSeg::Index(shared + offset)));
                    cur.push(value);
                }
            } else if cur_len > next_len {
                for removed in next_len..cur_len {
                    changes.push(path.child(PathSeg::Index(removed)));
                }
                cur.truncate(next_len);
            }
        }
        (current, next) => {
            if *current != next {
                *current = next;
                changes.push(path.clone());
            }
        }
    }
}

/// Binding variant for complex/nested result shapes.
///
/// Keeps a local copy of the payload and folds each revalidation into it
/// via [`reconcile`], so consumers see which paths moved instead of a
/// wholesale replacement.
pub struct StoreBinding {
    binding: QueryBinding,
    current: Value,
}

impl StoreBinding {
    pub fn bind(
        registry: Arc<QueryRegistry>,
        name: impl Into<String>,
        args: Value,
    ) -> Result<Self, QueryError> {
        Ok(Self {
            binding: QueryBinding::bind(registry, name, args)?,
            current: Value::Null,
        })
    }

    /// The reconciled payload.
    pub fn value(&self) -> &Value {
        &self.current
    }

    pub fn redirect(&self) -> Option<Redirect> {
        self.binding.redirect()
    }

    /// Suspend until the query settles, then fold the payload in.
    pub async fn sync(&mut self) -> Result<Vec<JsonPath>, QueryError> {
        let view = self.binding.wait_ready().await;
        if let Some(err) = view.error() {
            return Err(err.clone());
        }
        match view.value() {
            Some(payload) => Ok(reconcile(&mut self.current, payload.as_ref().clone())),
            // Redirect settle; the local copy stays as-is.
            None => Ok(Vec::new()),
        }
    }

    /// Wait for the next change notification, then fold it in.
    pub async fn next_update(&mut self) -> Result<Vec<JsonPath>, QueryError> {
        self.binding.changed().await;
        self.sync().await
    }
}
