//! Rule-based fan-out.
//!
//! An emit evaluates its rules against one registry [`Snapshot`], so a
//! connection that comes or goes mid-evaluation is either matched against
//! every rule or against none. Each matched connection then gets its own
//! delivery task: a slow or dead recipient never holds up the others.

use std::sync::Arc;

use magicsocket_core::{ClientId, Frame, RoutingKey, SocketError, TopicSet};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::connection::Connection;
use super::registry::{ConnectionRegistry, Snapshot};
use crate::metrics::{EMIT_DELIVERIES_TOTAL, EMIT_FAILURES_TOTAL, EMIT_TOTAL};

/// Topic predicate of an [`EmitRule`].
///
/// `AllOf` and `AnyOf` are different policies: `AllOf(["x", "y"])` needs
/// both labels, `AnyOf(["x", "y"])` needs one of them. An empty set in
/// either matches every connection.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TopicFilter {
    /// Every topic set matches.
    #[default]
    Any,
    /// Connection topics must include all of these.
    AllOf(TopicSet),
    /// Connection topics must include at least one of these.
    AnyOf(TopicSet),
}

impl TopicFilter {
    /// Whether a connection tagged with `topics` passes.
    pub fn matches(&self, topics: &TopicSet) -> bool {
        match self {
            Self::Any => true,
            Self::AllOf(required) => topics.is_superset_of(required),
            Self::AnyOf(wanted) => wanted.is_empty() || topics.intersects(wanted),
        }
    }
}

/// One match rule: key allow-list AND topic predicate.
///
/// ```json
/// { "keys": ["c1", "c2"], "topics": { "anyOf": ["news"] } }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EmitRule {
    /// Allowed routing keys. Empty allows every key.
    pub keys: Vec<RoutingKey>,
    /// Topic predicate.
    pub topics: TopicFilter,
}

impl EmitRule {
    /// Rule matching every connection.
    pub fn all() -> Self {
        Self::default()
    }

    /// Rule matching exactly these keys.
    pub fn keys<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<RoutingKey>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
            topics: TopicFilter::Any,
        }
    }

    /// Rule matching connections tagged with every one of `topics`.
    pub fn all_of(topics: impl Into<TopicSet>) -> Self {
        Self {
            keys: Vec::new(),
            topics: TopicFilter::AllOf(topics.into()),
        }
    }

    /// Rule matching connections tagged with any of `topics`.
    pub fn any_of(topics: impl Into<TopicSet>) -> Self {
        Self {
            keys: Vec::new(),
            topics: TopicFilter::AnyOf(topics.into()),
        }
    }

    /// Replace the topic predicate.
    #[must_use]
    pub fn with_topics(mut self, topics: TopicFilter) -> Self {
        self.topics = topics;
        self
    }

    /// Whether a connection with this key and topic set matches.
    pub fn matches(&self, key: &RoutingKey, topics: &TopicSet) -> bool {
        (self.keys.is_empty() || self.keys.contains(key)) && self.topics.matches(topics)
    }
}

/// Connections in `snapshot` matched by at least one rule.
///
/// No rules at all means everyone. Each connection appears once no matter
/// how many rules it satisfies.
pub fn select_targets(snapshot: &Snapshot, rules: &[EmitRule]) -> Vec<Arc<Connection>> {
    snapshot
        .iter()
        .filter(|view| {
            rules.is_empty() || rules.iter().any(|rule| rule.matches(&view.key, &view.topics))
        })
        .map(|view| Arc::clone(&view.connection))
        .collect()
}

type Delivery = JoinHandle<(ClientId, Result<(), SocketError>)>;

/// In-flight fan-out returned by [`ConnectionRegistry::emit`].
///
/// Dropping it detaches the deliveries; they still run to completion.
#[derive(Debug)]
pub struct Emission {
    targets: Vec<ClientId>,
    deliveries: Vec<Delivery>,
}

impl Emission {
    /// Ids of the matched connections.
    pub fn targets(&self) -> &[ClientId] {
        &self.targets
    }

    /// Number of matched connections.
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Whether nothing matched.
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Wait for every delivery to finish.
    pub async fn wait(self) -> EmitReport {
        let mut report = EmitReport::default();
        for delivery in self.deliveries {
            match delivery.await {
                Ok((id, Ok(()))) => report.delivered.push(id),
                Ok((id, Err(err))) => report.failed.push((id, err)),
                Err(err) => warn!(error = %err, "delivery task aborted"),
            }
        }
        report
    }
}

/// Per-target outcome of an emit.
#[derive(Debug, Default)]
pub struct EmitReport {
    /// Targets whose transport accepted the frame.
    pub delivered: Vec<ClientId>,
    /// Targets that failed, with the reason.
    pub failed: Vec<(ClientId, SocketError)>,
}

impl EmitReport {
    /// Whether every target was reached.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

impl ConnectionRegistry {
    /// Send `frame` to every connection matched by any of `rules`.
    ///
    /// The lock is held only to take the snapshot. Must be called from
    /// within a Tokio runtime.
    pub fn emit(&self, rules: &[EmitRule], frame: Frame) -> Emission {
        let snapshot = self.snapshot();
        let targets = select_targets(&snapshot, rules);
        drop(snapshot);

        counter!(EMIT_TOTAL).increment(1);
        debug!(
            rules = rules.len(),
            targets = targets.len(),
            kind = frame.kind(),
            bytes = frame.len(),
            "emitting frame"
        );

        let ids = targets.iter().map(|conn| conn.id().clone()).collect();
        let deliveries = targets
            .into_iter()
            .map(|conn| {
                let frame = frame.clone();
                tokio::spawn(async move {
                    let result = conn.send(frame).await;
                    match &result {
                        Ok(()) => counter!(EMIT_DELIVERIES_TOTAL).increment(1),
                        Err(err) => {
                            counter!(EMIT_FAILURES_TOTAL).increment(1);
                            if err.is_expected() {
                                debug!(client_id = %conn.id(), error = %err, "delivery skipped");
                            } else {
                                warn!(client_id = %conn.id(), error = %err, "delivery failed");
                            }
                        }
                    }
                    (conn.id().clone(), result)
                })
            })
            .collect();

        Emission {
            targets: ids,
            deliveries,
        }
    }

    /// Serialize `value` to JSON and emit it as a text frame.
    pub fn emit_json<T: Serialize + ?Sized>(
        &self,
        rules: &[EmitRule],
        value: &T,
    ) -> Result<Emission, serde_json::Error> {
        Ok(self.emit(rules, Frame::json(value)?))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use assert_matches::assert_matches;
    use parking_lot::Mutex;

    use super::*;
    use crate::transport::memory::{self, Peer};
    use crate::websocket::hooks::ConnectionHooks;
    use crate::websocket::registry::Registration;

    async fn add(registry: &Arc<ConnectionRegistry>, registration: Registration) -> (ClientId, Peer) {
        add_with_capacity(registry, registration, memory::DEFAULT_CAPACITY).await
    }

    async fn add_with_capacity(
        registry: &Arc<ConnectionRegistry>,
        registration: Registration,
        capacity: usize,
    ) -> (ClientId, Peer) {
        let (transport, peer) = memory::pair_with_capacity(capacity);
        let id = registry.register(registration, transport).await.unwrap();
        (id, peer)
    }

    fn keys_of(registry: &ConnectionRegistry, rules: &[EmitRule]) -> BTreeSet<String> {
        select_targets(&registry.snapshot(), rules)
            .iter()
            .map(|conn| conn.key().into_inner())
            .collect()
    }

    #[test]
    fn topic_filter_policies_are_distinct() {
        let x = TopicSet::from(["x"]);
        let xy = TopicSet::from(["x", "y"]);
        let y = TopicSet::from(["y"]);

        let any_x = TopicFilter::AnyOf(TopicSet::from(["x"]));
        assert!(any_x.matches(&x) && any_x.matches(&xy) && !any_x.matches(&y));

        let all_xy = TopicFilter::AllOf(TopicSet::from(["x", "y"]));
        assert!(!all_xy.matches(&x) && all_xy.matches(&xy) && !all_xy.matches(&y));

        let any_xy = TopicFilter::AnyOf(TopicSet::from(["x", "y"]));
        assert!(any_xy.matches(&x) && any_xy.matches(&xy) && any_xy.matches(&y));
    }

    #[test]
    fn empty_predicates_match_everything() {
        let none = TopicSet::new();
        assert!(TopicFilter::Any.matches(&none));
        assert!(TopicFilter::AllOf(TopicSet::new()).matches(&none));
        assert!(TopicFilter::AnyOf(TopicSet::new()).matches(&none));
        assert!(EmitRule::all().matches(&RoutingKey::from("anyone"), &none));
    }

    #[test]
    fn rule_requires_key_and_topics() {
        let rule = EmitRule::keys(["c1"]).with_topics(TopicFilter::AllOf(TopicSet::from(["t"])));
        assert!(rule.matches(&RoutingKey::from("c1"), &TopicSet::from(["t", "u"])));
        assert!(!rule.matches(&RoutingKey::from("c1"), &TopicSet::from(["u"])));
        assert!(!rule.matches(&RoutingKey::from("c2"), &TopicSet::from(["t"])));
    }

    #[test]
    fn rule_serde_shape() {
        let rule: EmitRule =
            serde_json::from_str(r#"{"keys":["c1"],"topics":{"anyOf":["a","b"]}}"#).unwrap();
        assert_eq!(rule.keys, vec![RoutingKey::from("c1")]);
        assert_eq!(rule.topics, TopicFilter::AnyOf(TopicSet::from(["a", "b"])));

        let bare: EmitRule = serde_json::from_str("{}").unwrap();
        assert_eq!(bare, EmitRule::all());

        let all_of: EmitRule = serde_json::from_str(r#"{"topics":{"allOf":["x"]}}"#).unwrap();
        assert_eq!(all_of, EmitRule::all_of(["x"]));

        let json = serde_json::to_value(EmitRule::all()).unwrap();
        assert_eq!(json, serde_json::json!({"keys": [], "topics": "any"}));
    }

    #[tokio::test]
    async fn any_of_and_all_of_select_different_targets() {
        let registry = Arc::new(ConnectionRegistry::new());
        let _a = add(&registry, Registration::new("a").with_topics(["x"])).await;
        let _b = add(&registry, Registration::new("b").with_topics(["x", "y"])).await;
        let _c = add(&registry, Registration::new("c").with_topics(["y"])).await;

        assert_eq!(
            keys_of(&registry, &[EmitRule::any_of(["x"])]),
            BTreeSet::from(["a".to_string(), "b".to_string()])
        );
        assert_eq!(
            keys_of(&registry, &[EmitRule::all_of(["x", "y"])]),
            BTreeSet::from(["b".to_string()])
        );
    }

    #[tokio::test]
    async fn targets_are_union_without_duplicates() {
        let registry = Arc::new(ConnectionRegistry::new());
        let _a = add(&registry, Registration::new("a").with_topics(["x"])).await;
        let _b = add(&registry, Registration::new("b").with_topics(["y"])).await;
        let _c = add(&registry, Registration::new("c")).await;

        let rules = [EmitRule::keys(["a", "b"]), EmitRule::any_of(["x", "y"])];
        let targets = select_targets(&registry.snapshot(), &rules);
        assert_eq!(targets.len(), 2);
    }

    #[tokio::test]
    async fn no_rules_means_everyone() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (_a, mut pa) = add(&registry, Registration::new("a")).await;
        let (_b, mut pb) = add(&registry, Registration::new("b").with_topics(["t"])).await;

        let report = registry.emit(&[], Frame::text("all")).wait().await;

        assert_eq!(report.delivered.len(), 2);
        assert_eq!(pa.recv().await, Some(Frame::text("all")));
        assert_eq!(pb.recv().await, Some(Frame::text("all")));
    }

    #[tokio::test]
    async fn keyed_emit_fires_outgoing_once_and_skips_others() {
        let registry = Arc::new(ConnectionRegistry::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let hooks = ConnectionHooks::new().on_outgoing(move |frame| {
            sink.lock().push(frame.clone());
            Ok(())
        });
        let other_calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&other_calls);
        let other_hooks = ConnectionHooks::new().on_outgoing(move |_| {
            let _ = counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let (c1, mut p1) = add(
            &registry,
            Registration::new("c1").with_topics(["t1", "t2"]).with_hooks(hooks),
        )
        .await;
        let (_c2, mut p2) = add(&registry, Registration::new("c2").with_hooks(other_hooks)).await;

        let emission = registry.emit(&[EmitRule::keys(["c1"])], Frame::text("hello"));
        assert_eq!(emission.targets(), &[c1.clone()]);
        let report = emission.wait().await;

        assert_eq!(report.delivered, vec![c1]);
        assert!(report.is_complete());
        assert_eq!(*seen.lock(), vec![Frame::text("hello")]);
        assert_eq!(p1.recv().await, Some(Frame::text("hello")));
        assert_eq!(other_calls.load(Ordering::SeqCst), 0);
        assert!(p2.try_recv().is_none());
    }

    #[tokio::test]
    async fn renamed_away_key_matches_nothing() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (id, mut peer) = add(&registry, Registration::new("c1")).await;
        registry.rename(&id, "c2").unwrap();

        let emission = registry.emit(&[EmitRule::keys(["c1"])], Frame::text("stale"));
        assert!(emission.is_empty());
        assert!(emission.wait().await.delivered.is_empty());

        let report = registry.emit(&[EmitRule::keys(["c2"])], Frame::text("fresh")).wait().await;
        assert_eq!(report.delivered, vec![id]);
        assert_eq!(peer.recv().await, Some(Frame::text("fresh")));
    }

    #[tokio::test]
    async fn torn_down_target_does_not_block_live_one() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (a, _pa) = add(&registry, Registration::new("a")).await;
        let (b, mut pb) = add(&registry, Registration::new("b")).await;

        // Take the snapshot first so A is still a target, then tear A down.
        let snapshot = registry.snapshot();
        registry.remove(&a).await;
        let targets = select_targets(&snapshot, &[]);
        assert_eq!(targets.len(), 2);

        let mut failed = 0;
        for conn in targets {
            match conn.send(Frame::text("hi")).await {
                Ok(()) => assert_eq!(conn.id(), &b),
                Err(err) => {
                    assert_matches!(err, SocketError::TransportClosed { .. });
                    failed += 1;
                }
            }
        }
        assert_eq!(failed, 1);
        assert_eq!(pb.recv().await, Some(Frame::text("hi")));
    }

    #[tokio::test]
    async fn failed_recipient_is_reported_not_raised() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (a, mut pa) = add(&registry, Registration::new("a")).await;
        let (b, mut pb) = add(&registry, Registration::new("b")).await;
        // A's peer stops reading; its next write fails.
        pa.hang_up();

        let report = registry.emit(&[], Frame::text("x")).wait().await;

        assert_eq!(report.delivered, vec![b]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, a);
        assert_eq!(pb.recv().await, Some(Frame::text("x")));
    }

    #[tokio::test]
    async fn stalled_recipient_does_not_delay_others() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (_slow, _slow_peer) = add_with_capacity(&registry, Registration::new("slow"), 1).await;
        let (_fast, mut fast_peer) = add(&registry, Registration::new("fast")).await;

        // Fill the slow peer's buffer so every further write to it waits.
        let _ = registry.emit(&[EmitRule::keys(["slow"])], Frame::text("fill")).wait().await;
        let pending = registry.emit(&[], Frame::text("second"));

        let got = tokio::time::timeout(Duration::from_secs(1), fast_peer.recv()).await.unwrap();
        assert_eq!(got, Some(Frame::text("second")));

        // Registry operations are not blocked by the stuck delivery either.
        assert!(registry.contains_key("slow"));
        let (_late, _late_peer) = add(&registry, Registration::new("late")).await;

        registry.stop().await;
        let report = tokio::time::timeout(Duration::from_secs(1), pending.wait()).await.unwrap();
        assert_eq!(report.delivered.len(), 1);
        assert_eq!(report.failed.len(), 1);
    }

    #[tokio::test]
    async fn emit_json_sends_text() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (_id, mut peer) = add(&registry, Registration::new("c1")).await;

        let emission = registry
            .emit_json(&[EmitRule::all()], &serde_json::json!({"event": "tick", "n": 1}))
            .unwrap();
        let _ = emission.wait().await;

        let frame = peer.recv().await.unwrap();
        assert_matches!(frame, Frame::Text(ref text) if text == r#"{"event":"tick","n":1}"#);
    }

    #[tokio::test]
    async fn dropped_emission_still_delivers() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (_id, mut peer) = add(&registry, Registration::new("c1")).await;

        drop(registry.emit(&[], Frame::text("detached")));

        let got = tokio::time::timeout(Duration::from_secs(1), peer.recv()).await.unwrap();
        assert_eq!(got, Some(Frame::text("detached")));
    }
}
