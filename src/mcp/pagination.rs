//! In-memory windowing of result lists.

use crate::error::ToolError;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageMeta {
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
    pub returned: usize,
}

impl PageMeta {
    pub fn insert_into(&self, meta: &mut Map<String, Value>) {
        meta.insert("total".into(), self.total.into());
        meta.insert("offset".into(), self.offset.into());
        meta.insert("limit".into(), self.limit.into());
        meta.insert("returned".into(), self.returned.into());
    }
}

/// `[min(offset, total), min(total, start + limit))`; a zero limit takes
/// everything after the offset.
pub fn window<T>(items: Vec<T>, limit: usize, offset: usize) -> (Vec<T>, PageMeta) {
    let total = items.len();
    let start = offset.min(total);
    let end = if limit > 0 {
        total.min(start.saturating_add(limit))
    } else {
        total
    };
    let page: Vec<T> = items.into_iter().skip(start).take(end - start).collect();
    let meta = PageMeta {
        total,
        offset,
        limit,
        returned: page.len(),
    };
    (page, meta)
}

/// Window the array under `key` of an object payload.
pub fn trim(mut payload: Value, key: &str, limit: usize, offset: usize) -> Result<(Value, PageMeta), ToolError> {
    let items = match payload.get_mut(key).map(Value::take) {
        Some(Value::Array(items)) => items,
        Some(Value::Null) | None => Vec::new(),
        Some(other) => {
            return Err(ToolError::Internal(format!(
                "expected an array under {key:?}, got {other}"
            )))
        }
    };
    let (page, meta) = window(items, limit, offset);
    if let Value::Object(map) = &mut payload {
        map.insert(key.to_string(), Value::Array(page));
    }
    Ok((payload, meta))
}
