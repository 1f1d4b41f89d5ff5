//! Frame normalization.
//!
//! The producer sends each frame in one of three shapes:
//!
//! - `[["game:ball_hit", {...}], ["game:update_state", {...}]]` (array of pairs)
//! - `{"event": "game:goal_scored", "data": {...}}` (event/data envelope)
//! - `{"sos:version": "2.0", "game:initialized": "ok"}` (flat map)
//!
//! A frame is first classified into a [`FrameShape`] and then flattened into
//! `(event name, payload)` pairs. Anything else yields no pairs; this module
//! never fails.

use serde_json::{Map, Value};

/// The recognized shapes of a decoded frame, in priority order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameShape<'a> {
    /// An array whose every element is a `[name, payload]` pair.
    ArrayOfPairs(&'a [Value]),
    /// An object with a string `event` field and a `data` field.
    EventDataObject { event: &'a str, data: &'a Value },
    /// An object whose keys are event names.
    FlatMap(&'a Map<String, Value>),
    /// Primitives, `null`, and arrays containing anything but pairs.
    Unrecognized,
}

impl FrameShape<'_> {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::ArrayOfPairs(_) => "array-of-pairs",
            Self::EventDataObject { .. } => "event-data",
            Self::FlatMap(_) => "flat-map",
            Self::Unrecognized => "unrecognized",
        }
    }
}

/// Split a `[name, payload]` element, if it is one.
fn as_pair(value: &Value) -> Option<(&str, &Value)> {
    match value.as_array()?.as_slice() {
        [Value::String(name), payload] => Some((name.as_str(), payload)),
        _ => None,
    }
}

/// Classify a decoded frame.
///
/// An array is only accepted when every element is a pair; a single
/// malformed element makes the whole frame unrecognized.
pub fn classify(raw: &Value) -> FrameShape<'_> {
    match raw {
        Value::Array(items) if items.iter().all(|item| as_pair(item).is_some()) => {
            FrameShape::ArrayOfPairs(items)
        }
        Value::Object(map) => match (map.get("event"), map.get("data")) {
            (Some(Value::String(event)), Some(data)) => FrameShape::EventDataObject {
                event: event.as_str(),
                data,
            },
            _ => FrameShape::FlatMap(map),
        },
        _ => FrameShape::Unrecognized,
    }
}

/// Lazily flatten a borrowed frame into `(name, payload)` pairs.
pub fn normalize(raw: &Value) -> Events<'_> {
    let inner = match classify(raw) {
        FrameShape::ArrayOfPairs(items) => EventsInner::Pairs(items.iter()),
        FrameShape::EventDataObject { event, data } => EventsInner::Single(Some((event, data))),
        FrameShape::FlatMap(map) => EventsInner::Map(map.iter()),
        FrameShape::Unrecognized => EventsInner::Empty,
    };
    Events { inner }
}

/// Lazily flatten an owned frame into owned `(name, payload)` pairs.
///
/// Same classification as [`normalize`], without cloning payloads.
pub fn into_events(raw: Value) -> IntoEvents {
    let shape = match classify(&raw) {
        FrameShape::ArrayOfPairs(_) => Shape::Pairs,
        FrameShape::EventDataObject { .. } => Shape::Single,
        FrameShape::FlatMap(_) => Shape::Map,
        FrameShape::Unrecognized => Shape::Empty,
    };

    let inner = match (shape, raw) {
        (Shape::Pairs, Value::Array(items)) => IntoEventsInner::Pairs(items.into_iter()),
        (Shape::Single, Value::Object(mut map)) => {
            let data = map.remove("data").unwrap_or(Value::Null);
            match map.remove("event") {
                Some(Value::String(event)) => IntoEventsInner::Single(Some((event, data))),
                _ => IntoEventsInner::Empty,
            }
        }
        (Shape::Map, Value::Object(map)) => IntoEventsInner::Map(map.into_iter()),
        _ => IntoEventsInner::Empty,
    };
    IntoEvents { inner }
}

#[derive(Clone, Copy)]
enum Shape {
    Pairs,
    Single,
    Map,
    Empty,
}

/// Iterator returned by [`normalize`].
pub struct Events<'a> {
    inner: EventsInner<'a>,
}

enum EventsInner<'a> {
    Pairs(std::slice::Iter<'a, Value>),
    Single(Option<(&'a str, &'a Value)>),
    Map(serde_json::map::Iter<'a>),
    Empty,
}

impl<'a> Iterator for Events<'a> {
    type Item = (&'a str, &'a Value);

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.inner {
            EventsInner::Pairs(items) => items.by_ref().find_map(as_pair),
            EventsInner::Single(single) => single.take(),
            EventsInner::Map(entries) => entries.next().map(|(k, v)| (k.as_str(), v)),
            EventsInner::Empty => None,
        }
    }
}

/// Iterator returned by [`into_events`].
pub struct IntoEvents {
    inner: IntoEventsInner,
}

enum IntoEventsInner {
    Pairs(std::vec::IntoIter<Value>),
    Single(Option<(String, Value)>),
    Map(serde_json::map::IntoIter),
    Empty,
}

impl Iterator for IntoEvents {
    type Item = (String, Value);

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.inner {
            IntoEventsInner::Pairs(items) => items.by_ref().find_map(|item| match item {
                Value::Array(pair) => {
                    let mut pair = pair.into_iter();
                    match (pair.next(), pair.next(), pair.next()) {
                        (Some(Value::String(name)), Some(payload), None) => Some((name, payload)),
                        _ => None,
                    }
                }
                _ => None,
            }),
            IntoEventsInner::Single(single) => single.take(),
            IntoEventsInner::Map(entries) => entries.next(),
            IntoEventsInner::Empty => None,
        }
    }
}
