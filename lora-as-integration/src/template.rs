use crate::{
    error::{IntegrationError, IntegrationResult},
    events::EventType,
};
use handlebars::Handlebars;
use lora_as_lorawan::EUI64;
use serde_json::json;

const TEMPLATE_NAME: &str = "topic";

/// A compiled topic or routing-key template.
///
/// Templates use Handlebars syntax with the `ApplicationID`, `DevEUI` and
/// `EventType` variables, e.g. `application/{{ApplicationID}}/device/{{DevEUI}}/event/{{EventType}}`.
/// Missing variables render as empty strings.
pub struct TopicTemplate {
    source: String,
    registry: Handlebars<'static>,
}

impl std::fmt::Debug for TopicTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("TopicTemplate").field(&self.source).finish()
    }
}

impl TopicTemplate {
    pub fn new(source: &str) -> IntegrationResult<Self> {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(false);
        // topics and keys are plain text
        registry.register_escape_fn(handlebars::no_escape);
        registry
            .register_template_string(TEMPLATE_NAME, source)
            .map_err(|e| {
                IntegrationError::Configuration(format!("invalid template '{source}': {e}"))
            })?;
        Ok(Self {
            source: source.to_string(),
            registry,
        })
    }

    #[inline]
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn render(&self, application_id: u64, dev_eui: &str, event: Option<EventType>) -> String {
        let data = json!({
            "ApplicationID": application_id.to_string(),
            "DevEUI": dev_eui,
            "EventType": event.map(|e| e.as_str()).unwrap_or_default(),
        });
        self.registry
            .render(TEMPLATE_NAME, &data)
            .unwrap_or_default()
    }

    /// Subscription pattern with the identifiers replaced by `wildcard`
    /// (`+` for MQTT, `*` for AMQP).
    pub fn filter(&self, wildcard: &str) -> String {
        let data = json!({
            "ApplicationID": wildcard,
            "DevEUI": wildcard,
            "EventType": wildcard,
        });
        self.registry
            .render(TEMPLATE_NAME, &data)
            .unwrap_or_default()
    }

    /// Recovers `(ApplicationID, DevEUI)` from a concrete topic. Literal
    /// segments must match exactly.
    pub fn extract(&self, topic: &str, separator: char) -> Option<(i64, EUI64)> {
        let pattern: Vec<&str> = self.source.split(separator).collect();
        let parts: Vec<&str> = topic.split(separator).collect();
        if pattern.len() != parts.len() {
            return None;
        }

        let mut application_id = None;
        let mut dev_eui = None;
        for (p, v) in pattern.iter().zip(parts.iter()) {
            match variable(p) {
                Some("ApplicationID") => application_id = Some(v.parse::<i64>().ok()?),
                Some("DevEUI") => dev_eui = Some(v.parse::<EUI64>().ok()?),
                Some(_) => {}
                None if p == v => {}
                None => return None,
            }
        }
        Some((application_id?, dev_eui?))
    }
}

/// Name of the variable when the segment is exactly `{{ Name }}`.
fn variable(segment: &str) -> Option<&str> {
    segment
        .strip_prefix("{{")
        .and_then(|s| s.strip_suffix("}}"))
        .map(str::trim)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EVENT: &str = "application/{{ApplicationID}}/device/{{DevEUI}}/event/{{EventType}}";
    const COMMAND: &str = "application/{{ApplicationID}}/device/{{DevEUI}}/command/down";

    #[test]
    fn renders_event_topic() {
        let t = TopicTemplate::new(EVENT).unwrap();
        assert_eq!(
            t.render(1, "0102030405060708", Some(EventType::Up)),
            "application/1/device/0102030405060708/event/up"
        );
    }

    #[test]
    fn builds_subscription_filters() {
        let t = TopicTemplate::new(COMMAND).unwrap();
        assert_eq!(t.filter("+"), "application/+/device/+/command/down");

        let t = TopicTemplate::new("application.{{ApplicationID}}.device.{{DevEUI}}.command.down")
            .unwrap();
        assert_eq!(t.filter("*"), "application.*.device.*.command.down");
    }

    #[test]
    fn extracts_identifiers() {
        let t = TopicTemplate::new(COMMAND).unwrap();
        let (app, dev) = t
            .extract("application/12/device/0102030405060708/command/down", '/')
            .unwrap();
        assert_eq!(app, 12);
        assert_eq!(dev.to_string(), "0102030405060708");

        assert!(t
            .extract("application/12/device/0102030405060708/command/up", '/')
            .is_none());
        assert!(t.extract("application/x/device/0102030405060708/command/down", '/').is_none());
    }

    #[test]
    fn rejects_unbalanced_template() {
        assert!(TopicTemplate::new("application/{{#if}}").is_err());
    }
}
