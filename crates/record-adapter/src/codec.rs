//! Model ↔ record conversion.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{AdapterError, AdapterResult};
use crate::record::Record;

/// Turns a model into a storable record and back.
///
/// The adapter only ever sees the encoded record, including its `id` when the
/// model has one.
pub trait RecordCodec<M>: Send + Sync {
    fn encode(&self, model: &M) -> AdapterResult<Record>;

    fn decode(&self, record: Record) -> AdapterResult<M>;
}

/// serde_json codec for any model that serialises to a JSON object.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl<M> RecordCodec<M> for JsonCodec
where
    M: Serialize + DeserializeOwned,
{
    fn encode(&self, model: &M) -> AdapterResult<Record> {
        match serde_json::to_value(model)? {
            Value::Object(map) => Ok(Record::from_map(map)),
            other => Err(AdapterError::Codec(format!(
                "model must serialise to an object, got {}",
                other
            ))),
        }
    }

    fn decode(&self, record: Record) -> AdapterResult<M> {
        Ok(serde_json::from_value(record.into_value())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Post {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        title: String,
    }

    #[test]
    fn encode_omits_unset_id() {
        let record = JsonCodec
            .encode(&Post {
                id: None,
                title: "hello".into(),
            })
            .unwrap();
        assert!(!record.has_id());
        assert_eq!(record.get("title").unwrap(), "hello");
    }

    #[test]
    fn decode_ignores_embedded_side_map() {
        let mut record = Record::new().with("id", "p1").with("title", "hi");
        record.embed("author", serde_json::json!({"id": "u1"}));
        let post: Post = JsonCodec.decode(record).unwrap();
        assert_eq!(post.id.as_deref(), Some("p1"));
    }

    #[test]
    fn non_object_models_are_rejected() {
        let err = RecordCodec::<u32>::encode(&JsonCodec, &7).unwrap_err();
        assert!(matches!(err, AdapterError::Codec(_)));
    }
}
