use std::fmt::Debug;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{
    error::Error,
    model::{Document, EntityKind, Exchange},
};

pub use self::{firebase::FirebaseSink, memory::MemorySink};

mod firebase;
mod memory;

/// Hierarchical, path-addressed document store. Writes to one path are
/// atomic; nothing else is promised across paths.
#[async_trait]
pub trait Sink: Send + Sync + Debug {
    async fn get(&self, path: &str) -> Result<Option<Value>, Error>;

    async fn set(&self, path: &str, value: Value) -> Result<(), Error>;

    async fn delete(&self, path: &str) -> Result<(), Error>;
}

pub fn watermark_path(exchange: Exchange, kind: EntityKind) -> String {
    format!("lastUpdate/{}/{}", exchange, kind)
}

/// Last committed block of a stream, `0` when the stream never ran.
pub async fn get_watermark(
    sink: &dyn Sink,
    exchange: Exchange,
    kind: EntityKind,
) -> Result<i64, Error> {
    let path = watermark_path(exchange, kind);
    match sink.get(&path).await? {
        None | Some(Value::Null) => Ok(0),
        Some(Value::Number(n)) => n.as_i64().ok_or_else(|| {
            Error::MalformedRecord(format!("{}: {}", path, n))
        }),
        Some(Value::String(s)) => Ok(s.parse()?),
        Some(other) => {
            Err(Error::MalformedRecord(format!("{}: {}", path, other)))
        },
    }
}

pub async fn set_watermark(
    sink: &dyn Sink,
    exchange: Exchange,
    kind: EntityKind,
    block: i64,
) -> Result<(), Error> {
    sink.set(&watermark_path(exchange, kind), json!(block)).await
}

pub async fn upload<T: Document>(
    sink: &dyn Sink,
    records: &[T],
) -> Result<(), Error> {
    for record in records {
        sink.set(&record.path(), serde_json::to_value(record)?)
            .await?;
    }
    Ok(())
}
