use super::{Dispatcher, DispatchError};
use crate::decode::DecodedSnapshot;
use async_trait::async_trait;
use tracing::info;

/// Default sink: logs the decoded snapshot as a structured event.
#[derive(Default)]
pub struct LogDispatcher;

impl LogDispatcher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Dispatcher for LogDispatcher {
    async fn dispatch(&self, snapshot: &DecodedSnapshot) -> Result<(), DispatchError> {
        for point in &snapshot.points {
            match &point.value {
                Ok(value) => info!(
                    device = %snapshot.device_name,
                    bus_id = %snapshot.bus_id,
                    point = %point.name,
                    value = %value,
                    "point value",
                ),
                Err(e) => info!(
                    device = %snapshot.device_name,
                    bus_id = %snapshot.bus_id,
                    point = %point.name,
                    error = %e,
                    "point decode error",
                ),
            }
        }
        Ok(())
    }
}
