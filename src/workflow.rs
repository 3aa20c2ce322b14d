//! Event types, events, triggers and alerts.

use reqwest::Method;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info};

use crate::client::Client;
use crate::error::{Error, Result};
use crate::model::{Alert, Envelope, Event, EventType, Trigger};
use crate::util::append_query;

/// Event types already resolved, keyed by root name.
///
/// Owned by the caller and handed to [`Client::event_type`]. Entries are never
/// evicted. Safe to share between threads: resolutions through one cache run
/// one at a time, so a root is registered at most once.
#[derive(Debug, Default)]
pub struct EventTypeCache {
    entries: Mutex<HashMap<String, EventType>>,
    resolving: Mutex<()>,
}

impl EventTypeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, root: &str) -> Option<EventType> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(root)
            .cloned()
    }

    pub fn insert(&self, root: &str, event_type: EventType) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(root.to_string(), event_type);
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Versioned event type name, `"{root}:{version}"`.
pub fn versioned_name(root: &str, version: usize) -> String {
    format!("{}:{}", root, version)
}

/// Picks the event type to use for `root`/`mapping` among `known`.
///
/// Walks versions from 0. A version whose name and mapping both match is
/// reused. Versions taken by a different mapping are skipped. Returns
/// `Err(name)` with the first unused name when nothing matches.
fn resolve_version(
    root: &str,
    mapping: &BTreeMap<String, String>,
    known: &[EventType],
) -> std::result::Result<EventType, String> {
    let mut version = 0;
    loop {
        let name = versioned_name(root, version);
        let mut taken = false;
        for et in known.iter().filter(|et| et.name == name) {
            taken = true;
            if et.mapping == *mapping {
                return Ok(et.clone());
            }
        }
        if !taken {
            return Err(name);
        }
        version += 1;
    }
}

impl Client {
    /// Finds, or registers, the event type for `root` with exactly `mapping`,
    /// remembering the answer in `cache`.
    pub fn event_type(
        &self,
        root: &str,
        mapping: &BTreeMap<String, String>,
        cache: &EventTypeCache,
    ) -> Result<EventType> {
        if root.trim().is_empty() {
            return Err(Error::InvalidArgument("event type root is empty".to_string()));
        }
        if let Some(hit) = cache.lookup(root) {
            return Ok(hit);
        }

        let _resolving = cache
            .resolving
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // Another thread may have finished while we waited.
        if let Some(hit) = cache.lookup(root) {
            return Ok(hit);
        }

        let known = self.event_types()?;
        let result = match resolve_version(root, mapping, &known) {
            Ok(found) => {
                debug!(name = %found.name, "found matching event type");
                found
            }
            Err(name) => {
                info!(%name, "no matching event type; adding");
                self.add_event_type(&EventType {
                    name,
                    mapping: mapping.clone(),
                    ..Default::default()
                })?
            }
        };

        cache.insert(root, result.clone());
        Ok(result)
    }

    /// All event types known to the gateway.
    pub fn event_types(&self) -> Result<Vec<EventType>> {
        let url = append_query(&self.endpoint("eventType"), &[("perPage", "10000")]);
        Ok(self.get_json::<Envelope<Vec<EventType>>>(&url)?.value.data)
    }

    pub fn add_event_type(&self, event_type: &EventType) -> Result<EventType> {
        Ok(self
            .post_json::<_, Envelope<EventType>>(Method::POST, &self.endpoint("eventType"), event_type)?
            .value
            .data)
    }

    /// Events of one event type.
    pub fn events(&self, event_type_id: &str) -> Result<Vec<Event>> {
        let url = append_query(&self.endpoint("event"), &[("eventTypeId", event_type_id)]);
        Ok(self.get_json::<Envelope<Vec<Event>>>(&url)?.value.data)
    }

    pub fn add_event(&self, event: &Event) -> Result<Event> {
        if event.event_type_id.trim().is_empty() {
            return Err(Error::InvalidArgument("event has no event type id".to_string()));
        }
        Ok(self
            .post_json::<_, Envelope<Event>>(Method::POST, &self.endpoint("event"), event)?
            .value
            .data)
    }

    pub fn add_trigger(&self, trigger: &Trigger) -> Result<Trigger> {
        if trigger.condition.event_type_ids.is_empty() {
            return Err(Error::InvalidArgument("trigger watches no event types".to_string()));
        }
        Ok(self
            .post_json::<_, Envelope<Trigger>>(Method::POST, &self.endpoint("trigger"), trigger)?
            .value
            .data)
    }

    /// Alerts raised by one trigger.
    pub fn alerts(&self, trigger_id: &str) -> Result<Vec<Alert>> {
        let url = append_query(&self.endpoint("alert"), &[("triggerId", trigger_id)]);
        Ok(self.get_json::<Envelope<Vec<Alert>>>(&url)?.value.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientConfig;
    use crate::model::{TriggerCondition, TriggerJob};
    use crate::transport::{HttpRequest, HttpResponse, RequestBody, ScriptedTransport, Transport};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn client(t: &Arc<ScriptedTransport>) -> Client {
        let cfg = ClientConfig {
            url: "http://gw".to_string(),
            key: "k".to_string(),
            verify: true,
        };
        Client::with_transport(cfg, t.clone())
    }

    fn mapping(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn et(name: &str, id: &str, m: &[(&str, &str)]) -> EventType {
        EventType {
            event_type_id: Some(id.to_string()),
            name: name.to_string(),
            mapping: mapping(m),
            ..Default::default()
        }
    }

    #[test]
    fn test_resolve_version() {
        let m = mapping(&[("cloudCover", "float")]);
        let known = vec![
            et("harvest:0", "a", &[("other", "string")]),
            et("harvest:1", "b", &[("cloudCover", "float")]),
        ];
        assert_eq!(resolve_version("harvest", &m, &known).unwrap().event_type_id.as_deref(), Some("b"));

        let m2 = mapping(&[("new", "integer")]);
        assert_eq!(resolve_version("harvest", &m2, &known).unwrap_err(), "harvest:2");
        assert_eq!(resolve_version("fresh", &m2, &known).unwrap_err(), "fresh:0");
    }

    #[test]
    fn test_event_type_uses_cache() {
        let listing = json!({"data": [
            {"eventTypeId": "et-1", "name": "scene:0", "mapping": {"id": "string"}}
        ]});
        let t = Arc::new(ScriptedTransport::json_bodies([listing.to_string()]));
        let c = client(&t);
        let cache = EventTypeCache::new();
        let m = mapping(&[("id", "string")]);

        let first = c.event_type("scene", &m, &cache).unwrap();
        assert_eq!(first.event_type_id.as_deref(), Some("et-1"));
        let second = c.event_type("scene", &m, &cache).unwrap();
        assert_eq!(second, first);
        assert_eq!(t.calls(), 1);
        assert_eq!(cache.len(), 1);
        assert!(t.requests()[0].url.contains("perPage=10000"));
    }

    #[test]
    fn test_event_type_registers_next_version() {
        let listing = json!({"data": [
            {"eventTypeId": "et-1", "name": "scene:0", "mapping": {"id": "string"}}
        ]});
        let created = json!({"data": {"eventTypeId": "et-2", "name": "scene:1", "mapping": {"id": "integer"}}});
        let t = Arc::new(ScriptedTransport::json_bodies([listing.to_string(), created.to_string()]));
        let cache = EventTypeCache::new();

        let got = client(&t)
            .event_type("scene", &mapping(&[("id", "integer")]), &cache)
            .unwrap();
        assert_eq!(got.event_type_id.as_deref(), Some("et-2"));

        let post = &t.requests()[1];
        assert_eq!(post.method, Method::POST);
        assert_eq!(post.url, "http://gw/eventType");
        let RequestBody::Json(body) = &post.body else {
            panic!("expected JSON body");
        };
        let sent: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(sent["name"], "scene:1");
        assert_eq!(cache.lookup("scene"), Some(got));
    }

    /// Holds every listing request long enough for a second caller to arrive.
    struct SlowListing(ScriptedTransport);

    impl Transport for SlowListing {
        fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
            if request.method == Method::GET {
                std::thread::sleep(Duration::from_millis(100));
            }
            self.0.send(request)
        }
    }

    #[test]
    fn test_event_type_registers_once_across_threads() {
        let inner = ScriptedTransport::json_bodies([
            r#"{"data":[]}"#,
            r#"{"data":{"eventTypeId":"et-1","name":"scene:0","mapping":{}}}"#,
        ])
        .with_fallback(HttpResponse::json(
            200,
            r#"{"data":{"eventTypeId":"et-dup","name":"scene:0","mapping":{}}}"#,
        ));
        let t = Arc::new(SlowListing(inner));
        let cfg = ClientConfig {
            url: "http://gw".to_string(),
            key: "k".to_string(),
            verify: true,
        };
        let c = Arc::new(Client::with_transport(cfg, t.clone()));
        let cache = Arc::new(EventTypeCache::new());

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let (c, cache) = (c.clone(), cache.clone());
                std::thread::spawn(move || c.event_type("scene", &BTreeMap::new(), &cache))
            })
            .collect();
        for h in handles {
            let et = h.join().unwrap().unwrap();
            assert_eq!(et.event_type_id.as_deref(), Some("et-1"));
        }

        let posts = t
            .0
            .requests()
            .iter()
            .filter(|r| r.method == Method::POST)
            .count();
        assert_eq!(posts, 1);
        assert_eq!(t.0.calls(), 2);
    }

    #[test]
    fn test_events_and_alerts() {
        let t = Arc::new(ScriptedTransport::json_bodies([
            r#"{"data":[{"eventId":"e1","eventTypeId":"et-1","data":{"n":1}}]}"#,
            r#"{"data":[{"alertId":"a1","triggerId":"t1","jobId":"j1"}]}"#,
        ]));
        let c = client(&t);
        let events = c.events("et-1").unwrap();
        assert_eq!(events[0].data["n"], json!(1));
        let alerts = c.alerts("t1").unwrap();
        assert_eq!(alerts[0].job_id.as_deref(), Some("j1"));

        let reqs = t.requests();
        assert_eq!(reqs[0].url, "http://gw/event?eventTypeId=et-1");
        assert_eq!(reqs[1].url, "http://gw/alert?triggerId=t1");
    }

    #[test]
    fn test_add_event_and_trigger_validate() {
        let t = Arc::new(ScriptedTransport::json_bodies([
            r#"{"data":{"eventId":"e9","eventTypeId":"et-1"}}"#,
            r#"{"data":{"triggerId":"t9","name":"watch","enabled":true,
                "condition":{"eventTypeIds":["et-1"],"query":{}},"job":{"jobType":{}}}}"#,
        ]));
        let c = client(&t);

        assert!(matches!(c.add_event(&Event::default()), Err(Error::InvalidArgument(_))));
        assert!(matches!(c.add_trigger(&Trigger::default()), Err(Error::InvalidArgument(_))));
        assert_eq!(t.calls(), 0);

        let ev = c
            .add_event(&Event {
                event_type_id: "et-1".to_string(),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(ev.event_id.as_deref(), Some("e9"));

        let trig = c
            .add_trigger(&Trigger {
                name: "watch".to_string(),
                enabled: true,
                condition: TriggerCondition {
                    event_type_ids: vec!["et-1".to_string()],
                    query: json!({"query": {"bool": {"filter": []}}}),
                },
                job: TriggerJob {
                    job_type: json!({"type": "execute-service"}),
                },
                ..Default::default()
            })
            .unwrap();
        assert_eq!(trig.trigger_id.as_deref(), Some("t9"));
    }
}
