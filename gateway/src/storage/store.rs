//! Persistent state store.
//!
//! Small JSON documents keyed by scope, with dotted-path access such as
//! `get("state", "hub.properties.manufacturer")`. The module uses it to
//! carry reported identity properties across restarts.

use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::errors::GatewayError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

pub struct StateStore {
    dir: Dir,
    // Serializes read-modify-write cycles on the scope files.
    lock: Mutex<()>,
}

impl StateStore {
    pub fn new(dir: Dir) -> Self {
        Self {
            dir,
            lock: Mutex::new(()),
        }
    }

    /// Read the value at a dotted path; `Null` when the scope or path is
    /// absent.
    pub async fn get(&self, scope: &str, path: &str) -> Result<Value, GatewayError> {
        let _guard = self.lock.lock().await;
        let document = self.read_scope(scope).await?;
        Ok(lookup(&document, path).cloned().unwrap_or(Value::Null))
    }

    /// Write the value at a dotted path, creating intermediate objects as
    /// needed, and persist the scope document.
    pub async fn set(&self, scope: &str, path: &str, value: Value) -> Result<(), GatewayError> {
        let _guard = self.lock.lock().await;
        let mut document = self.read_scope(scope).await?;
        insert(&mut document, path, value)?;
        self.dir.create().await?;
        self.scope_file(scope).write_json(&document).await
    }

    fn scope_file(&self, scope: &str) -> File {
        self.dir.file(&format!("{}.json", scope))
    }

    async fn read_scope(&self, scope: &str) -> Result<Value, GatewayError> {
        let file = self.scope_file(scope);
        if !file.exists().await {
            return Ok(Value::Object(Map::new()));
        }
        file.read_json().await
    }
}

fn lookup<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    let mut cursor = document;
    for segment in path.split('.') {
        cursor = cursor.get(segment)?;
    }
    Some(cursor)
}

fn insert(document: &mut Value, path: &str, value: Value) -> Result<(), GatewayError> {
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|segment| segment.is_empty()) {
        return Err(GatewayError::StorageError(format!(
            "State path {:?} has an empty segment",
            path
        )));
    }

    // split on a non-empty list cannot fail
    let Some((last, parents)) = segments.split_last() else {
        return Err(GatewayError::StorageError("State path is empty".to_string()));
    };

    let mut cursor = document;
    for segment in parents {
        let object = cursor.as_object_mut().ok_or_else(|| non_object(path))?;
        cursor = object
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }

    let object = cursor.as_object_mut().ok_or_else(|| non_object(path))?;
    object.insert((*last).to_string(), value);
    Ok(())
}

fn non_object(path: &str) -> GatewayError {
    GatewayError::StorageError(format!("State path {:?} crosses a non-object value", path))
}
