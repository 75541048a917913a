use std::io::Write;
use std::sync::Mutex;

use rand::Rng;
use serde::Serialize;

use crate::category::CategoryTagger;
use crate::profile::Unit;
use crate::serialization::rfc3339;
use crate::serialization::serializer::{ChunkSerializer, ProfileSerializer, RunContext};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    ProfileChunk,
    Profile,
    Transaction,
}

/// Item header. `platform` is what ingestion categorizes on before it looks
/// at the payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ItemHeader {
    #[serde(rename = "type")]
    pub item_type: ItemType,
    pub platform: String,
    pub length: usize,
}

#[derive(Clone, Debug)]
pub struct Item {
    pub header: ItemHeader,
    pub payload: Vec<u8>,
}

impl Item {
    pub fn new<T: Serialize>(
        item_type: ItemType,
        tagger: &dyn CategoryTagger,
        payload: &T,
    ) -> crate::Result<Self> {
        let payload = serde_json::to_vec(payload)?;
        Ok(Self {
            header: ItemHeader {
                item_type,
                platform: tagger.platform().to_string(),
                length: payload.len(),
            },
            payload,
        })
    }

    pub fn payload_json(&self) -> crate::Result<serde_json::Value> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeHeader {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    pub sent_at: String,
}

#[derive(Clone, Debug)]
pub struct Envelope {
    pub header: EnvelopeHeader,
    pub items: Vec<Item>,
}

impl Envelope {
    pub fn new(event_id: Option<String>, sent_at: f64) -> Self {
        Self {
            header: EnvelopeHeader {
                event_id,
                sent_at: rfc3339(sent_at),
            },
            items: vec![],
        }
    }

    /// Serializes a finalized unit. A profile travels with its transaction
    /// event, profile item first.
    pub fn for_unit<R: Rng>(
        unit: &Unit,
        index: u64,
        tagger: &dyn CategoryTagger,
        context: &RunContext,
        now: f64,
        rng: &mut R,
    ) -> crate::Result<Self> {
        match unit {
            Unit::Chunk(chunk) => {
                let payload = ChunkSerializer::serialize(chunk, tagger, context, now);
                let mut envelope = Self::new(None, now);
                envelope.push(Item::new(ItemType::ProfileChunk, tagger, &payload)?);
                Ok(envelope)
            }
            Unit::Profile(profile) => {
                let (payload, event) =
                    ProfileSerializer::serialize(profile, index, tagger, context, now, rng);
                let mut envelope = Self::new(Some(event.event_id.clone()), now);
                envelope.push(Item::new(ItemType::Profile, tagger, &payload)?);
                envelope.push(Item::new(ItemType::Transaction, tagger, &event)?);
                Ok(envelope)
            }
        }
    }

    pub fn push(&mut self, item: Item) {
        self.items.push(item);
    }

    /// Newline-delimited wire form: the envelope header, then a header line
    /// and a payload line per item.
    pub fn to_bytes(&self) -> crate::Result<Vec<u8>> {
        let mut bytes = serde_json::to_vec(&self.header)?;
        bytes.push(b'\n');
        for item in self.items.iter() {
            serde_json::to_writer(&mut bytes, &item.header)?;
            bytes.push(b'\n');
            bytes.extend_from_slice(&item.payload);
            bytes.push(b'\n');
        }
        Ok(bytes)
    }
}

/// Where finished envelopes go. Submission is fire and forget: failures are
/// logged by the transport and never reach the generator.
pub trait Transport: Send + Sync {
    fn submit(&self, envelope: Envelope);
}

/// Keeps every submitted envelope in memory.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    envelopes: Mutex<Vec<Envelope>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn envelopes(&self) -> Vec<Envelope> {
        match self.envelopes.lock() {
            Ok(envelopes) => envelopes.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.envelopes.lock().map_or(0, |envelopes| envelopes.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Transport for MemoryTransport {
    fn submit(&self, envelope: Envelope) {
        match self.envelopes.lock() {
            Ok(mut envelopes) => envelopes.push(envelope),
            Err(_) => log::warn!("Transport lock poisoned. Dropping envelope."),
        }
    }
}

/// Writes each envelope to `W` in wire form.
#[derive(Debug)]
pub struct WriterTransport<W> {
    writer: Mutex<W>,
}

impl<W: Write + Send> WriterTransport<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

impl<W: Write + Send> Transport for WriterTransport<W> {
    fn submit(&self, envelope: Envelope) {
        let bytes = match envelope.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("Failed to encode envelope: {}", e);
                return;
            }
        };
        let Ok(mut writer) = self.writer.lock() else {
            log::warn!("Transport lock poisoned. Dropping envelope.");
            return;
        };
        if let Err(e) = writer.write_all(&bytes).and_then(|_| writer.flush()) {
            log::warn!("Failed to write envelope: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::{Platform, PlatformTagger};

    #[derive(Serialize)]
    struct Payload {
        platform: String,
        value: u32,
    }

    #[test]
    fn test_item_header_platform_matches_payload() {
        let tagger = PlatformTagger::new(Platform::new("cocoa"));
        let payload = Payload {
            platform: tagger.platform().to_string(),
            value: 7,
        };
        let item = Item::new(ItemType::ProfileChunk, &tagger, &payload).unwrap();
        assert_eq!(item.header.platform, "cocoa");
        assert_eq!(item.payload_json().unwrap()["platform"], "cocoa");
        assert_eq!(item.header.length, item.payload.len());
    }

    #[test]
    fn test_wire_form() {
        let tagger = PlatformTagger::new(Platform::new("python"));
        let mut envelope = Envelope::new(Some("abc".to_owned()), 0.0);
        envelope.push(Item::new(ItemType::Profile, &tagger, &1u32).unwrap());
        envelope.push(Item::new(ItemType::Transaction, &tagger, &2u32).unwrap());

        let bytes = envelope.to_bytes().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(
            lines[0],
            r#"{"event_id":"abc","sent_at":"1970-01-01T00:00:00.000000Z"}"#
        );
        assert_eq!(lines[1], r#"{"type":"profile","platform":"python","length":1}"#);
        assert_eq!(lines[2], "1");
        assert_eq!(lines[3], r#"{"type":"transaction","platform":"python","length":1}"#);
    }

    #[test]
    fn test_writer_transport_appends() {
        let transport = WriterTransport::new(Vec::new());
        transport.submit(Envelope::new(None, 0.0));
        transport.submit(Envelope::new(None, 0.0));
        let written = transport.writer.into_inner().unwrap();
        assert_eq!(String::from_utf8(written).unwrap().lines().count(), 2);
    }

    #[test]
    fn test_memory_transport() {
        let transport = MemoryTransport::new();
        assert!(transport.is_empty());
        transport.submit(Envelope::new(None, 0.0));
        assert_eq!(transport.len(), 1);
    }
}
