use async_trait::async_trait;

use crate::patient_interface::record::{EventKind, MedicalEvent, RawRecord};
use crate::prelude::{LoaderError, LoaderResult, Reshaper};

/// Validating conversion from raw API records to [`MedicalEvent`]s.
///
/// A batch is accepted whole or rejected on its first invalid record.
#[derive(Debug, Clone, Default)]
pub struct BasicReshaper;

impl BasicReshaper {
    pub fn new() -> Self {
        Self
    }

    fn convert(record: RawRecord) -> LoaderResult<MedicalEvent> {
        let kind = EventKind::parse(&record.kind).ok_or_else(|| {
            LoaderError::Process(format!(
                "record {} has unknown type {:?}",
                record.id, record.kind
            ))
        })?;
        if record.id.is_empty() {
            return Err(LoaderError::Process(format!(
                "record at {} has no id",
                record.time
            )));
        }

        let value = record.payload.get("value").and_then(|v| v.as_f64());
        let text = record
            .payload
            .get("text")
            .and_then(|v| v.as_str())
            .map(str::to_owned);

        if kind.is_numeric() && value.is_none() {
            return Err(LoaderError::Process(format!(
                "record {} ({:?}) carries no numeric value",
                record.id, kind
            )));
        }
        if kind == EventKind::Message && text.is_none() {
            return Err(LoaderError::Process(format!(
                "message {} carries no text",
                record.id
            )));
        }

        Ok(MedicalEvent {
            id: record.id,
            time: record.time,
            kind,
            value,
            text,
        })
    }
}

#[async_trait]
impl Reshaper for BasicReshaper {
    type Event = MedicalEvent;

    async fn reshape(&self, raw: Vec<RawRecord>) -> LoaderResult<Vec<MedicalEvent>> {
        raw.into_iter().map(Self::convert).collect()
    }
}
