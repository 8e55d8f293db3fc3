//! Shared DOM marker channel. Only useful when publisher and display run
//! in the same document.

use super::{decode_str, Channel, ChannelReader, Delivery, Envelope};
use crate::error::Result;
use crate::media::Document;
use crate::refresh::RefreshToken;
use crate::types::{ChannelKind, LiveState};

pub const MARKER_ELEMENT_ID: &str = "liveStreamData";
pub const MARKER_ATTRIBUTE: &str = "data-json";

pub struct MarkerChannel {
    document: Document,
}

impl MarkerChannel {
    pub fn new(document: Document) -> Self {
        Self { document }
    }
}

impl Channel for MarkerChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::DomMarker
    }

    fn publish(&self, state: &LiveState, _token: RefreshToken) -> Result<Delivery> {
        let json = serde_json::to_string(&Envelope::from_state(state))?;
        self.document
            .set_attribute(MARKER_ELEMENT_ID, MARKER_ATTRIBUTE, json);
        Ok(Delivery::Delivered)
    }
}

pub struct MarkerReader {
    document: Document,
}

impl MarkerReader {
    pub fn new(document: Document) -> Self {
        Self { document }
    }
}

impl ChannelReader for MarkerReader {
    fn kind(&self) -> ChannelKind {
        ChannelKind::DomMarker
    }

    fn read(&self) -> Result<Option<LiveState>> {
        match self.document.attribute(MARKER_ELEMENT_ID, MARKER_ATTRIBUTE) {
            Some(raw) => {
                let envelope: Envelope = decode_str(ChannelKind::DomMarker, &raw)?;
                Ok(Some(envelope.into_state()))
            }
            None => Ok(None),
        }
    }
}
