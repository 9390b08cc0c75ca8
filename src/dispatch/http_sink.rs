use super::{Dispatcher, DispatchError};
use crate::decode::DecodedSnapshot;
use crate::model::PointValue;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Uploads a decoded snapshot as a JSON document to a fixed HTTP endpoint.
pub struct HttpDispatcher {
    url: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct SnapshotRecord<'a> {
    device: &'a str,
    points: BTreeMap<&'a str, serde_json::Value>,
}

fn point_value_json(value: &PointValue) -> serde_json::Value {
    match value {
        PointValue::Uint16(v) => serde_json::Value::from(*v),
        PointValue::Int16(v) => serde_json::Value::from(*v),
        PointValue::Uint32(v) => serde_json::Value::from(*v),
        PointValue::Int32(v) => serde_json::Value::from(*v),
        PointValue::Float32(v) => serde_json::Number::from_f64(f64::from(*v))
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        PointValue::Bool(v) => serde_json::Value::from(*v),
        PointValue::Raw(bytes) => serde_json::Value::String(format!("{bytes:02x?}")),
    }
}

impl HttpDispatcher {
    pub fn new(url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { url, client }
    }
}

#[async_trait]
impl Dispatcher for HttpDispatcher {
    async fn dispatch(&self, snapshot: &DecodedSnapshot) -> Result<(), DispatchError> {
        let points = snapshot
            .points
            .iter()
            .map(|p| {
                let value = match &p.value {
                    Ok(v) => point_value_json(v),
                    Err(e) => serde_json::Value::String(e.clone()),
                };
                (p.name.as_str(), value)
            })
            .collect();
        let record = SnapshotRecord {
            device: &snapshot.device_name,
            points,
        };

        self.client
            .post(&self.url)
            .json(&record)
            .send()
            .await
            .map_err(|e| DispatchError::Http(e.to_string()))?
            .error_for_status()
            .map_err(|e| DispatchError::Http(e.to_string()))?;
        Ok(())
    }
}
