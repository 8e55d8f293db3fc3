//! Core types for live-state synchronization.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Ordering stamp of a live state. The only thing staleness arbitration
/// looks at.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Version(pub u64);

impl fmt::Debug for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Version {
    pub fn next(self) -> Self {
        Version(self.0 + 1)
    }

    /// Parse a decimal version marker as written by the storage and URL
    /// channels.
    pub fn parse(s: &str) -> Option<Self> {
        s.trim().parse::<u64>().ok().map(Version)
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Identifier of a person in the operator's list.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PersonId(pub u64);

impl fmt::Debug for PersonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PersonId({})", self.0)
    }
}

/// A person as consumed by the live-state subsystem.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Person {
    pub id: PersonId,
    pub name: String,
    pub surname: Option<String>,
    pub title: Option<String>,
}

impl Person {
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id: PersonId(id),
            name: name.into(),
            surname: None,
            title: None,
        }
    }

    pub fn with_surname(mut self, surname: impl Into<String>) -> Self {
        self.surname = Some(surname.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Name and surname joined for display.
    pub fn full_name(&self) -> String {
        match &self.surname {
            Some(surname) => format!("{} {}", self.name, surname),
            None => self.name.clone(),
        }
    }
}

/// Who is live: a person or the explicit "nobody" sentinel.
///
/// There is no `Option<Subject>` anywhere in the crate. Absence is
/// [`Subject::Empty`], and every channel encodes it the same way.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "Option<SubjectWire>", into = "SubjectWire")]
pub enum Subject {
    Person(Person),
    #[default]
    Empty,
}

impl Subject {
    pub fn is_empty(&self) -> bool {
        matches!(self, Subject::Empty)
    }

    pub fn person(&self) -> Option<&Person> {
        match self {
            Subject::Person(p) => Some(p),
            Subject::Empty => None,
        }
    }
}

impl From<Person> for Subject {
    fn from(person: Person) -> Self {
        Subject::Person(person)
    }
}

/// JSON shape of a subject. The sentinel is `{"id":0,"name":"","isEmpty":true}`.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubjectWire {
    #[serde(default)]
    id: u64,
    #[serde(default)]
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    surname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    is_empty: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

fn non_blank(s: Option<String>) -> Option<String> {
    s.filter(|s| !s.trim().is_empty())
}

impl TryFrom<Option<SubjectWire>> for Subject {
    type Error = String;

    fn try_from(wire: Option<SubjectWire>) -> Result<Self, Self::Error> {
        // Legacy writers use `null` for "nobody live".
        let Some(wire) = wire else {
            return Ok(Subject::Empty);
        };
        if wire.is_empty {
            return Ok(Subject::Empty);
        }
        if wire.name.trim().is_empty() {
            return Err(format!("person {} has a blank name", wire.id));
        }
        Ok(Subject::Person(Person {
            id: PersonId(wire.id),
            name: wire.name,
            surname: non_blank(wire.surname),
            title: non_blank(wire.title),
        }))
    }
}

impl From<Subject> for SubjectWire {
    fn from(subject: Subject) -> Self {
        match subject {
            Subject::Person(p) => SubjectWire {
                id: p.id.0,
                name: p.name,
                surname: p.surname,
                title: p.title,
                is_empty: false,
            },
            Subject::Empty => SubjectWire {
                id: 0,
                name: String::new(),
                surname: None,
                title: None,
                is_empty: true,
            },
        }
    }
}

/// Opaque display settings snapshot.
///
/// Cheap to clone and never mutated in place: [`Settings::with`] returns a
/// new snapshot.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Settings(Arc<Map<String, Value>>);

impl Settings {
    pub fn new(map: Map<String, Value>) -> Self {
        Settings(Arc::new(map))
    }

    /// The styling snapshot a fresh control panel starts with.
    pub fn defaults() -> Self {
        let value = serde_json::json!({
            "showName": true,
            "showTitles": true,
            "displayStyle": "gradient",
            "textStyle": "bold",
            "borderStyle": "thin",
            "textShadow": true,
            "boxShadow": true,
            "decorativeElements": true,
            "displayWidth": 400,
            "displayHeight": 120,
            "fontSize": 30,
            "titleFontSize": 20,
            "cornerRadius": 8,
            "padding": 16,
            "animation": "fade",
            "centeredText": false,
        });
        match value {
            Value::Object(map) => Settings::new(map),
            _ => Settings::default(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// A copy of this snapshot with one key replaced.
    pub fn with(&self, key: impl Into<String>, value: Value) -> Self {
        let mut map = (*self.0).clone();
        map.insert(key.into(), value);
        Settings::new(map)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for Settings {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.as_ref().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Settings {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = Option::<Map<String, Value>>::deserialize(deserializer)?;
        Ok(Settings::new(map.unwrap_or_default()))
    }
}

/// Immutable `(subject, settings, version)` snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LiveState {
    #[serde(default)]
    subject: Subject,
    #[serde(default)]
    settings: Settings,
    version: Version,
}

impl LiveState {
    pub fn new(subject: impl Into<Subject>, settings: Settings, version: Version) -> Self {
        Self {
            subject: subject.into(),
            settings,
            version,
        }
    }

    /// A "nobody live" snapshot.
    pub fn empty(settings: Settings, version: Version) -> Self {
        Self::new(Subject::Empty, settings, version)
    }

    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn is_empty(&self) -> bool {
        self.subject.is_empty()
    }

    /// Same subject and settings, different stamp.
    pub fn restamped(&self, version: Version) -> Self {
        Self {
            subject: self.subject.clone(),
            settings: self.settings.clone(),
            version,
        }
    }

    /// Whether two snapshots carry the same payload, ignoring version.
    pub fn same_payload(&self, other: &LiveState) -> bool {
        self.subject == other.subject && self.settings == other.settings
    }
}

/// Transport media, in the fixed precedence order the resolver uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    RemoteStore,
    DirectMessage,
    DomMarker,
    PersistentStorage,
    UrlParameters,
}

impl ChannelKind {
    /// All channels, highest precedence first.
    pub const ALL: [ChannelKind; 5] = [
        ChannelKind::RemoteStore,
        ChannelKind::DirectMessage,
        ChannelKind::DomMarker,
        ChannelKind::PersistentStorage,
        ChannelKind::UrlParameters,
    ];

    /// Lower is tried first.
    pub fn precedence(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            ChannelKind::RemoteStore => "remote-store",
            ChannelKind::DirectMessage => "direct-message",
            ChannelKind::DomMarker => "dom-marker",
            ChannelKind::PersistentStorage => "persistent-storage",
            ChannelKind::UrlParameters => "url-parameters",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Identity of one browsing context (control panel, preview, embed).
///
/// Storage change events are only delivered to contexts other than the
/// writer's.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(pub u64);

static NEXT_CONTEXT: AtomicU64 = AtomicU64::new(1);

impl ContextId {
    pub fn fresh() -> Self {
        ContextId(NEXT_CONTEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Debug for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sentinel_wire_form() {
        let encoded = serde_json::to_value(Subject::Empty).unwrap();
        assert_eq!(encoded, json!({"id": 0, "name": "", "isEmpty": true}));

        let decoded: Subject = serde_json::from_value(encoded).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_null_subject_normalizes_to_sentinel() {
        let decoded: Subject = serde_json::from_value(Value::Null).unwrap();
        assert_eq!(decoded, Subject::Empty);
    }

    #[test]
    fn test_person_ignores_list_flags() {
        let decoded: Subject = serde_json::from_value(json!({
            "id": 2,
            "name": "Ada",
            "surname": "",
            "title": "Host",
            "selected": true,
            "streaming": true
        }))
        .unwrap();

        let person = decoded.person().unwrap();
        assert_eq!(person.id, PersonId(2));
        assert_eq!(person.surname, None);
        assert_eq!(person.title.as_deref(), Some("Host"));
    }

    #[test]
    fn test_blank_name_rejected() {
        let result: Result<Subject, _> = serde_json::from_value(json!({"id": 3, "name": "  "}));
        assert!(result.is_err());
    }

    #[test]
    fn test_settings_are_copy_on_write() {
        let base = Settings::defaults();
        let changed = base.with("fontSize", json!(42));

        assert_eq!(base.get("fontSize"), Some(&json!(30)));
        assert_eq!(changed.get("fontSize"), Some(&json!(42)));
        assert_eq!(base.len(), changed.len());
    }

    #[test]
    fn test_null_settings_decode_as_empty() {
        let settings: Settings = serde_json::from_value(Value::Null).unwrap();
        assert!(settings.is_empty());
    }

    #[test]
    fn test_channel_precedence_order() {
        let mut kinds = ChannelKind::ALL.to_vec();
        kinds.reverse();
        kinds.sort_by_key(|k| k.precedence());
        assert_eq!(kinds, ChannelKind::ALL.to_vec());
    }

    #[test]
    fn test_restamp_keeps_payload() {
        let state = LiveState::new(Person::new(1, "Ada"), Settings::defaults(), Version(5));
        let later = state.restamped(Version(9));
        assert!(state.same_payload(&later));
        assert_eq!(later.version(), Version(9));
    }
}
