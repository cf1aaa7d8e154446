//! Subscription match filters.
//!
//! A subscription's filter definition is a set of optional regular
//! expressions over the enriched delivery: event type, topic, context and
//! group. Definitions are compiled once at subscription build time
//! ([`SubscriptionFilter::compile`]); matching is then allocation-free per
//! delivery. Non-matching deliveries are dropped silently — no error, no
//! re-queue.

use regex::Regex;

use crate::types::EventDelivery;

/// Uncompiled filter definition, as stored on the subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterDef {
    /// Regex over the event's wire name (`message_confirmed`, ...).
    pub events: Option<String>,
    /// Regex over the enriched message's topic.
    pub topic: Option<String>,
    /// Regex over the enriched message's context.
    pub context: Option<String>,
    /// Regex over the enriched message's group.
    pub group: Option<String>,
}

/// Error compiling a filter definition.
#[derive(Debug, thiserror::Error)]
pub enum FilterCompileError {
    /// One of the filter regexes failed to compile.
    #[error("invalid {field} filter: {source}")]
    InvalidRegex {
        /// Which filter field was invalid.
        field: &'static str,
        /// The underlying regex error.
        source: regex::Error,
    },
}

/// Compiled subscription filter.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionFilter {
    events: Option<Regex>,
    topic: Option<Regex>,
    context: Option<Regex>,
    group: Option<Regex>,
}

fn compile_field(
    field: &'static str,
    pattern: Option<&str>,
) -> Result<Option<Regex>, FilterCompileError> {
    pattern
        .map(|p| Regex::new(p).map_err(|source| FilterCompileError::InvalidRegex { field, source }))
        .transpose()
}

impl SubscriptionFilter {
    /// Compiles a filter definition.
    ///
    /// # Errors
    ///
    /// Returns [`FilterCompileError::InvalidRegex`] naming the first field
    /// whose pattern is not a valid regex.
    pub fn compile(def: &FilterDef) -> Result<Self, FilterCompileError> {
        Ok(Self {
            events: compile_field("events", def.events.as_deref())?,
            topic: compile_field("topic", def.topic.as_deref())?,
            context: compile_field("context", def.context.as_deref())?,
            group: compile_field("group", def.group.as_deref())?,
        })
    }

    /// Returns `true` when the delivery passes every configured filter.
    ///
    /// Topic, context and group are taken from the enriched message; an
    /// event with no message matches those filters against the empty string.
    #[must_use]
    pub fn matches(&self, delivery: &EventDelivery) -> bool {
        if let Some(events) = &self.events {
            if !events.is_match(delivery.event.event_type.wire_name()) {
                return false;
            }
        }

        let (topic, context, group) = match &delivery.message {
            Some(msg) => (
                msg.header.topic.as_str(),
                msg.header.context.as_str(),
                msg.header.group.as_deref().unwrap_or(""),
            ),
            None => ("", "", ""),
        };

        if let Some(filter) = &self.topic {
            if !filter.is_match(topic) {
                return false;
            }
        }
        if let Some(filter) = &self.context {
            if !filter.is_match(context) {
                return false;
            }
        }
        if let Some(filter) = &self.group {
            if !filter.is_match(group) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Event, EventType, Message, SubscriptionRef};
    use uuid::Uuid;

    fn delivery(event_type: EventType, message: Option<Message>) -> EventDelivery {
        EventDelivery {
            event: Event::new(1, event_type, "ns1", Some(Uuid::new_v4())),
            subscription: SubscriptionRef {
                id: Uuid::new_v4(),
                namespace: "ns1".into(),
                name: "sub1".into(),
            },
            message,
            data_ref: None,
        }
    }

    fn message(topic: &str, context: &str, group: Option<&str>) -> Message {
        let mut msg = Message::default();
        msg.header.topic = topic.into();
        msg.header.context = context.into();
        msg.header.group = group.map(Into::into);
        msg
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = SubscriptionFilter::compile(&FilterDef::default()).unwrap();
        assert!(filter.matches(&delivery(EventType::MessageConfirmed, None)));
        assert!(filter.matches(&delivery(
            EventType::MessageRejected,
            Some(message("t", "c", Some("g")))
        )));
    }

    #[test]
    fn test_event_type_filter() {
        let filter = SubscriptionFilter::compile(&FilterDef {
            events: Some("^message_confirmed$".into()),
            ..FilterDef::default()
        })
        .unwrap();
        assert!(filter.matches(&delivery(EventType::MessageConfirmed, None)));
        assert!(!filter.matches(&delivery(EventType::MessageRejected, None)));
    }

    #[test]
    fn test_topic_and_context_filters_use_enriched_message() {
        let filter = SubscriptionFilter::compile(&FilterDef {
            topic: Some("^orders$".into()),
            context: Some("^eu-".into()),
            ..FilterDef::default()
        })
        .unwrap();

        assert!(filter.matches(&delivery(
            EventType::MessageConfirmed,
            Some(message("orders", "eu-west", None))
        )));
        assert!(!filter.matches(&delivery(
            EventType::MessageConfirmed,
            Some(message("invoices", "eu-west", None))
        )));
        // No enriched message: topic is the empty string.
        assert!(!filter.matches(&delivery(EventType::MessageConfirmed, None)));
    }

    #[test]
    fn test_group_filter_matches_message_group() {
        let filter = SubscriptionFilter::compile(&FilterDef {
            group: Some("^settlement$".into()),
            ..FilterDef::default()
        })
        .unwrap();

        assert!(filter.matches(&delivery(
            EventType::MessageConfirmed,
            Some(message("t", "c", Some("settlement")))
        )));
        assert!(!filter.matches(&delivery(
            EventType::MessageConfirmed,
            Some(message("t", "c", None))
        )));
    }

    #[test]
    fn test_group_filter_accepting_empty_matches_groupless() {
        let filter = SubscriptionFilter::compile(&FilterDef {
            group: Some("^$".into()),
            ..FilterDef::default()
        })
        .unwrap();
        assert!(filter.matches(&delivery(
            EventType::MessageConfirmed,
            Some(message("t", "c", None))
        )));
    }

    #[test]
    fn test_invalid_regex_names_field() {
        let err = SubscriptionFilter::compile(&FilterDef {
            topic: Some("(".into()),
            ..FilterDef::default()
        })
        .unwrap_err();
        assert!(err.to_string().contains("topic"));
    }
}
