//! URL-embedded parameters.
//!
//! Publisher side: builds the links handed to a broadcast tool, embedding
//! the snapshot as percent-encoded JSON when it fits under the length
//! limit. Display side: parses the link once at start-up.

use super::{decode_str, Channel, ChannelReader, Delivery};
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::refresh::RefreshToken;
use crate::types::{ChannelKind, LiveState, Settings, Subject, Version};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{debug, warn};
use url::Url;

const DISPLAY_PARAM: &str = "display";
const RECEIVER_PARAM: &str = "receiver";
const OBS_PARAM: &str = "obs";
const PERSON_PARAM: &str = "person";
const SETTINGS_PARAM: &str = "settings";
const TOKEN_PARAM: &str = "t";
const LEGACY_PERSON_PARAM: &str = "personData";
const LEGACY_SETTINGS_PARAM: &str = "settingsData";

/// Links the control panel hands out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DisplayLinks {
    /// Plain display page; resolves through the ambient channels.
    pub display: String,
    /// Stable link that polls instead of waiting for messages.
    pub receiver: String,
    /// What to paste into the broadcast tool: the self-contained link if
    /// the last snapshot fit, otherwise the receiver link.
    pub obs: String,
    /// Self-contained link of the last snapshot, if it fit.
    pub direct: Option<String>,
}

pub struct UrlChannel {
    base: Url,
    max_length: usize,
    links: RwLock<DisplayLinks>,
}

impl UrlChannel {
    pub fn new(base_url: &str, max_length: usize) -> Result<Self> {
        let base = Url::parse(base_url).map_err(|e| {
            SyncError::InvalidOperation(format!("Invalid base_url '{}': {}", base_url, e))
        })?;

        let display = with_query(&base, &[(DISPLAY_PARAM, "true")]);
        let receiver = with_query(
            &base,
            &[(DISPLAY_PARAM, "true"), (OBS_PARAM, "true"), (RECEIVER_PARAM, "true")],
        );

        Ok(Self {
            base,
            max_length,
            links: RwLock::new(DisplayLinks {
                obs: display.clone(),
                display,
                receiver,
                direct: None,
            }),
        })
    }

    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        Self::new(&config.base_url, config.max_url_length)
    }

    pub fn links(&self) -> DisplayLinks {
        self.links.read().clone()
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// The self-contained link for a snapshot, regardless of length.
    pub fn encode(&self, state: &LiveState, token: RefreshToken) -> Result<String> {
        let person = serde_json::to_string(state.subject())?;
        let settings = serde_json::to_string(state.settings())?;
        let token = token.to_string();
        Ok(with_query(
            &self.base,
            &[
                (DISPLAY_PARAM, "true"),
                (OBS_PARAM, "true"),
                (PERSON_PARAM, &person),
                (SETTINGS_PARAM, &settings),
                (TOKEN_PARAM, &token),
            ],
        ))
    }

    fn checked(&self, state: &LiveState, token: RefreshToken) -> Result<String> {
        let link = self.encode(state, token)?;
        if link.len() > self.max_length {
            return Err(SyncError::EncodingTooLarge {
                encoded: link.len(),
                limit: self.max_length,
            });
        }
        Ok(link)
    }
}

fn with_query(base: &Url, pairs: &[(&str, &str)]) -> String {
    let mut url = base.clone();
    {
        let mut query = url.query_pairs_mut();
        query.clear();
        for (key, value) in pairs {
            query.append_pair(key, value);
        }
    }
    url.into()
}

impl Channel for UrlChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::UrlParameters
    }

    fn admit(&self, state: &LiveState, token: RefreshToken) -> Result<()> {
        self.checked(state, token).map(|_| ())
    }

    fn omitted(&self, state: &LiveState, _token: RefreshToken) {
        let mut links = self.links.write();
        warn!(
            version = %state.version(),
            limit = self.max_length,
            "snapshot too large for a direct link, handing out the receiver link"
        );
        links.obs = links.receiver.clone();
        links.direct = None;
    }

    fn publish(&self, state: &LiveState, token: RefreshToken) -> Result<Delivery> {
        let link = match self.checked(state, token) {
            Ok(link) => link,
            Err(e) => {
                self.omitted(state, token);
                return Err(e);
            }
        };

        debug!(version = %state.version(), length = link.len(), "direct link updated");
        let mut links = self.links.write();
        links.obs = link.clone();
        links.direct = Some(link);
        Ok(Delivery::Delivered)
    }
}

/// Mode flags carried by a display link.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DisplayParams {
    /// `display=true`: this context is a display surface.
    pub display: bool,
    /// `receiver=true`: resolve by polling rather than messages.
    pub receiver: bool,
    /// `obs=true`: transparent rendering hint for the renderer.
    pub obs: bool,
}

/// A display link, parsed once.
pub struct UrlReader {
    params: DisplayParams,
    snapshot: Option<LiveState>,
    error: Option<String>,
}

impl UrlReader {
    /// Parse an absolute link or a bare `?query`.
    pub fn parse(link: &str) -> Result<Self> {
        let url = Url::parse(link)
            .or_else(|_| Url::parse("http://localhost/").and_then(|base| base.join(link)))
            .map_err(|e| SyncError::malformed(ChannelKind::UrlParameters, e))?;

        let pairs: HashMap<String, String> = url.query_pairs().into_owned().collect();
        let flag = |name: &str| pairs.get(name).map(String::as_str) == Some("true");
        let params = DisplayParams {
            display: flag(DISPLAY_PARAM),
            receiver: flag(RECEIVER_PARAM),
            obs: flag(OBS_PARAM),
        };

        let (snapshot, error) = match decode_snapshot(&pairs) {
            Ok(snapshot) => (snapshot, None),
            Err(e) => {
                warn!(error = %e, "ignoring malformed snapshot in display link");
                (None, Some(e.to_string()))
            }
        };

        Ok(Self {
            params,
            snapshot,
            error,
        })
    }

    pub fn params(&self) -> &DisplayParams {
        &self.params
    }
}

fn decode_snapshot(pairs: &HashMap<String, String>) -> Result<Option<LiveState>> {
    let person = pairs
        .get(PERSON_PARAM)
        .or_else(|| pairs.get(LEGACY_PERSON_PARAM));
    let settings = pairs
        .get(SETTINGS_PARAM)
        .or_else(|| pairs.get(LEGACY_SETTINGS_PARAM));

    let (Some(person), Some(settings)) = (person, settings) else {
        return Ok(None);
    };

    let subject: Subject = decode_str(ChannelKind::UrlParameters, person)?;
    let settings: Settings = decode_str(ChannelKind::UrlParameters, settings)?;
    let version = match pairs.get(TOKEN_PARAM) {
        Some(raw) => Version::parse(raw).ok_or_else(|| {
            SyncError::malformed(ChannelKind::UrlParameters, format!("bad token {:?}", raw))
        })?,
        None => Version(0),
    };

    Ok(Some(LiveState::new(subject, settings, version)))
}

impl ChannelReader for UrlReader {
    fn kind(&self) -> ChannelKind {
        ChannelKind::UrlParameters
    }

    fn read(&self) -> Result<Option<LiveState>> {
        match &self.error {
            Some(message) => Err(SyncError::malformed(ChannelKind::UrlParameters, message)),
            None => Ok(self.snapshot.clone()),
        }
    }
}
