use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Number, Value};

/// Interest in a named event, declared by an agent when it registers.
/// Stored verbatim for event routing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    #[serde(rename = "eventName", alias = "event")]
    pub event_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<Number>,
    #[serde(
        rename = "allowHorizontalScale",
        alias = "horizontalScall",
        alias = "horizontalScale",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub allow_horizontal_scale: Option<bool>,
    /// Descriptor keys with no dedicated field, kept as sent.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Subscription {
    pub fn new(event_name: impl Into<String>) -> Self {
        Self {
            event_name: event_name.into(),
            delay: None,
            allow_horizontal_scale: None,
            extra: Map::new(),
        }
    }

    pub fn with_delay(mut self, delay: impl Into<Number>) -> Self {
        self.delay = Some(delay.into());
        self
    }

    pub fn with_horizontal_scale(mut self, allow: bool) -> Self {
        self.allow_horizontal_scale = Some(allow);
        self
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawSubscriptions {
    Many(Vec<Subscription>),
    One(Subscription),
    Encoded(String),
}

impl RawSubscriptions {
    fn into_list(self) -> Result<Vec<Subscription>, serde_json::Error> {
        match self {
            RawSubscriptions::Many(list) => Ok(list),
            RawSubscriptions::One(single) => Ok(vec![single]),
            RawSubscriptions::Encoded(text) => {
                match serde_json::from_str::<Option<RawSubscriptions>>(&text)? {
                    None | Some(RawSubscriptions::Encoded(_)) => Ok(Vec::new()),
                    Some(nested) => nested.into_list(),
                }
            }
        }
    }
}

/// Accepts `null`, a lone descriptor, a list, or a JSON-encoded string of
/// either, and always yields an ordered list.
pub fn deserialize_subscriptions<'de, D>(deserializer: D) -> Result<Vec<Subscription>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<RawSubscriptions>::deserialize(deserializer)? {
        None => Ok(Vec::new()),
        Some(raw) => raw.into_list().map_err(D::Error::custom),
    }
}

/// One registered agent as persisted in its prefix's directory document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRecord {
    #[serde(rename = "uuid")]
    pub id: String,
    pub name: String,
    #[serde(rename = "prefix", default, skip_serializing_if = "Option::is_none")]
    pub environment_prefix: Option<String>,
    #[serde(
        rename = "subscribeTo",
        default,
        deserialize_with = "deserialize_subscriptions"
    )]
    pub subscriptions: Vec<Subscription>,
    #[serde(rename = "lastActivity")]
    pub last_activity_at: u64,
    #[serde(rename = "aliveSince")]
    pub registered_at: u64,
}

impl AgentRecord {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        environment_prefix: Option<String>,
        subscriptions: Vec<Subscription>,
        now: u64,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            environment_prefix,
            subscriptions,
            last_activity_at: now,
            registered_at: now,
        }
    }

    /// Records activity. The timestamp always moves forward, even when the
    /// clock has not ticked since the previous update.
    pub fn update_heartbeat(&mut self, now: u64) -> u64 {
        self.last_activity_at = now.max(self.last_activity_at.saturating_add(1));
        self.last_activity_at
    }

    pub fn idle_for(&self, now: u64) -> u64 {
        now.saturating_sub(self.last_activity_at)
    }

    pub fn is_idle(&self, now: u64, threshold_millis: u64) -> bool {
        self.idle_for(now) > threshold_millis
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn heartbeat_strictly_increases() {
        let mut record = AgentRecord::new("u1", "foo", None, Vec::new(), 100);
        assert_eq!(record.update_heartbeat(100), 101);
        assert_eq!(record.update_heartbeat(50), 102);
        assert_eq!(record.update_heartbeat(500), 500);
        assert_eq!(record.registered_at, 100);
    }

    #[test]
    fn idleness_is_strictly_greater_than_threshold() {
        let record = AgentRecord::new("u1", "foo", None, Vec::new(), 0);
        assert!(!record.is_idle(7_200_000, 7_200_000));
        assert!(record.is_idle(7_201_000, 7_200_000));
    }

    #[test]
    fn record_uses_directory_document_field_names() {
        let record = AgentRecord::new(
            "u1",
            "foo",
            Some("dev".into()),
            vec![Subscription::new("bar").with_delay(3600)],
            7,
        );
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            json!({
                "uuid": "u1",
                "name": "foo",
                "prefix": "dev",
                "subscribeTo": [{ "eventName": "bar", "delay": 3600 }],
                "lastActivity": 7,
                "aliveSince": 7
            })
        );
    }

    #[test]
    fn lone_descriptor_becomes_single_element_list() {
        let record: AgentRecord = serde_json::from_value(json!({
            "uuid": "u1",
            "name": "foo",
            "subscribeTo": { "event": "foo", "horizontalScall": false },
            "lastActivity": 1,
            "aliveSince": 1
        }))
        .unwrap();
        assert_eq!(
            record.subscriptions,
            vec![Subscription::new("foo").with_horizontal_scale(false)]
        );
    }

    #[test]
    fn missing_null_and_encoded_subscriptions_are_accepted() {
        let missing: AgentRecord = serde_json::from_value(json!({
            "uuid": "u1", "name": "foo", "lastActivity": 1, "aliveSince": 1
        }))
        .unwrap();
        assert!(missing.subscriptions.is_empty());

        let null: AgentRecord = serde_json::from_value(json!({
            "uuid": "u1", "name": "foo", "subscribeTo": null, "lastActivity": 1, "aliveSince": 1
        }))
        .unwrap();
        assert!(null.subscriptions.is_empty());

        let encoded: AgentRecord = serde_json::from_value(json!({
            "uuid": "u1",
            "name": "foo",
            "subscribeTo": "[{\"eventName\":\"a\"},{\"eventName\":\"b\",\"delay\":5}]",
            "lastActivity": 1,
            "aliveSince": 1
        }))
        .unwrap();
        assert_eq!(
            encoded.subscriptions,
            vec![Subscription::new("a"), Subscription::new("b").with_delay(5)]
        );

        let encoded_null: AgentRecord = serde_json::from_value(json!({
            "uuid": "u1", "name": "foo", "subscribeTo": "null", "lastActivity": 1, "aliveSince": 1
        }))
        .unwrap();
        assert!(encoded_null.subscriptions.is_empty());
    }

    #[test]
    fn descriptor_keeps_fractional_delay_and_unknown_keys() {
        let raw = json!({ "eventName": "bar", "delay": 0.5, "extra": 1 });
        let subscription: Subscription = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(subscription.delay.as_ref().and_then(Number::as_f64), Some(0.5));
        assert_eq!(subscription.extra.get("extra"), Some(&json!(1)));
        assert_eq!(serde_json::to_value(&subscription).unwrap(), raw);
    }
}
