//! Same-document proxy reconciliation.
//!
//! A bidirectional reference may be written as a URI (`doc.xml#b`) on one
//! side and an identifier on the other. The URI side produces a proxy even
//! though its target lives in the same document; once the target has been
//! read, the proxy is swapped for it so both ends agree.

use crate::base::NodeId;
use crate::graph::{IdentifierIndex, InsertAt, Resource, ValueSetter};
use crate::meta::{Metamodel, Value};

#[derive(Debug, Default)]
pub struct SameDocumentProxies {
    proxies: Vec<NodeId>,
}

impl SameDocumentProxies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `proxy` if its URI points into `resource`'s own document.
    pub fn track_if_same_document(&mut self, resource: &Resource, proxy: NodeId) -> bool {
        let same = resource
            .node(proxy)
            .proxy_uri()
            .is_some_and(|uri| resource.is_same_document(uri));
        if same {
            self.proxies.push(proxy);
        }
        same
    }

    pub fn tracked(&self) -> &[NodeId] {
        &self.proxies
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    pub fn clear(&mut self) {
        self.proxies.clear();
    }

    /// Swap every resolvable tracked proxy for its local target.
    ///
    /// For each proxy the first set reference with an opposite identifies
    /// the holder. If the holder's opposite list already contains the target
    /// (the other side was read as an identifier), the target is moved into
    /// the proxy's slot and the proxy is dropped. Otherwise the proxy is
    /// replaced through an opposite-aware mutation. Reconciled proxies stop
    /// being tracked; the rest are kept for a later pass.
    pub fn reconcile(&mut self, meta: &Metamodel, resource: &mut Resource) -> usize {
        let mut reconciled = 0;
        let proxies = std::mem::take(&mut self.proxies);
        for proxy in proxies {
            if reconcile_one(meta, resource, proxy) {
                reconciled += 1;
            } else {
                self.proxies.push(proxy);
            }
        }
        if reconciled > 0 {
            tracing::debug!(reconciled, remaining = self.proxies.len(), "reconciled same-document proxies");
        }
        reconciled
    }
}

fn reconcile_one(meta: &Metamodel, resource: &mut Resource, proxy: NodeId) -> bool {
    let Some(fragment) = resource
        .node(proxy)
        .proxy_uri()
        .and_then(|uri| uri.split_once('#'))
        .map(|(_, fragment)| fragment.to_string())
    else {
        return false;
    };

    let ty = resource.node(proxy).ty();
    let candidate = meta.all_features(ty).into_iter().find_map(|feature| {
        let def = meta.feature(feature);
        let opposite = def.opposite?;
        (def.is_reference() && resource.node(proxy).is_set(feature)).then_some((feature, opposite))
    });
    let Some((feature, opposite)) = candidate else {
        return false;
    };

    let Some(resolved) = resource.lookup(meta, &fragment) else {
        return false;
    };
    if resolved == proxy {
        return false;
    }
    let Some(holder) = resource.node(proxy).get_one(feature).and_then(Value::as_node) else {
        return false;
    };

    if meta.feature(opposite).many {
        if let Some(resolved_index) = resource.index_of(holder, opposite, resolved) {
            // The other side already linked the real object; keep it where
            // the proxy was and drop the duplicate.
            if let Some(proxy_index) = resource.index_of(holder, opposite, proxy) {
                resource.move_value(holder, opposite, proxy_index, resolved_index);
                let stale = if proxy_index > resolved_index {
                    proxy_index - 1
                } else {
                    proxy_index + 1
                };
                resource.remove_at(meta, holder, opposite, stale);
            }
            return true;
        }
    }

    let linked_back = if meta.feature(feature).many {
        resource.get(resolved, feature).contains(&Value::Node(holder))
    } else {
        resource.node(resolved).get_one(feature).and_then(Value::as_node) == Some(holder)
    };
    if !linked_back {
        if meta.feature(opposite).many {
            if let Some(index) = resource.index_of(holder, opposite, proxy) {
                resource.replace_at(meta, holder, opposite, index, resolved);
            }
        } else if let Err(err) =
            resource.set_value(meta, holder, opposite, Some(Value::Node(resolved)), InsertAt::Whole)
        {
            tracing::warn!(%err, ?proxy, "could not replace same-document proxy");
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::{FeatureId, TypeId};
    use crate::graph::ObjectFactory;
    use url::Url;

    struct Fixture {
        meta: Metamodel,
        person: TypeId,
        friends: FeatureId,
        friend_of: FeatureId,
    }

    fn fixture() -> Fixture {
        let mut meta = Metamodel::new();
        let pkg = meta.add_package("urn:people", "p");
        let person = meta.add_type(pkg, "Person", &[]);
        let friends = meta.add_reference(person, "friends", person, false);
        meta.feature_mut(friends).many = true;
        let friend_of = meta.add_reference(person, "friendOf", person, false);
        meta.feature_mut(friend_of).many = true;
        meta.set_opposites(friends, friend_of);
        Fixture {
            meta,
            person,
            friends,
            friend_of,
        }
    }

    fn resource() -> Resource {
        Resource::with_uri(Url::parse("file:///people.xml").unwrap())
    }

    fn proxy_for(f: &Fixture, res: &mut Resource, holder: NodeId, literal: &str) -> NodeId {
        let proxy = res.create(&f.meta, f.person).unwrap();
        res.make_proxy(proxy, literal);
        res.set_value(&f.meta, holder, f.friends, Some(Value::Node(proxy)), InsertAt::Append)
            .unwrap();
        proxy
    }

    #[test]
    fn test_tracks_only_same_document_proxies() {
        let f = fixture();
        let mut res = resource();
        let holder = res.create(&f.meta, f.person).unwrap();
        let local = proxy_for(&f, &mut res, holder, "#b");
        let remote = proxy_for(&f, &mut res, holder, "other.xml#b");

        let mut proxies = SameDocumentProxies::new();
        assert!(proxies.track_if_same_document(&res, local));
        assert!(!proxies.track_if_same_document(&res, remote));
        assert_eq!(proxies.tracked(), &[local]);
    }

    #[test]
    fn test_duplicate_from_identifier_side_is_collapsed() {
        let f = fixture();
        let mut res = resource();
        let a = res.create(&f.meta, f.person).unwrap();
        let proxy = proxy_for(&f, &mut res, a, "people.xml#b");

        // b names a by identifier, which also appended b to a.friends.
        let b = res.create(&f.meta, f.person).unwrap();
        res.set_id(b, "b");
        res.set_value(&f.meta, b, f.friend_of, Some(Value::Node(a)), InsertAt::Append)
            .unwrap();
        assert_eq!(res.get(a, f.friends), &[Value::Node(proxy), Value::Node(b)]);

        let mut proxies = SameDocumentProxies::new();
        proxies.track_if_same_document(&res, proxy);
        assert_eq!(proxies.reconcile(&f.meta, &mut res), 1);

        assert_eq!(res.get(a, f.friends), &[Value::Node(b)]);
        assert!(res.get(proxy, f.friend_of).is_empty());
        assert!(proxies.is_empty());
    }

    #[test]
    fn test_missing_back_link_replaces_proxy() {
        let f = fixture();
        let mut res = resource();
        let a = res.create(&f.meta, f.person).unwrap();
        let proxy = proxy_for(&f, &mut res, a, "#b");
        let b = res.create(&f.meta, f.person).unwrap();
        res.set_id(b, "b");

        let mut proxies = SameDocumentProxies::new();
        proxies.track_if_same_document(&res, proxy);
        proxies.reconcile(&f.meta, &mut res);

        assert_eq!(res.get(a, f.friends), &[Value::Node(b)]);
        assert_eq!(res.get(b, f.friend_of), &[Value::Node(a)]);
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let f = fixture();
        let mut res = resource();
        let a = res.create(&f.meta, f.person).unwrap();
        let proxy = proxy_for(&f, &mut res, a, "#b");

        let mut proxies = SameDocumentProxies::new();
        proxies.track_if_same_document(&res, proxy);

        // Target not read yet: the proxy stays tracked.
        assert_eq!(proxies.reconcile(&f.meta, &mut res), 0);
        assert_eq!(proxies.len(), 1);

        let b = res.create(&f.meta, f.person).unwrap();
        res.set_id(b, "b");
        assert_eq!(proxies.reconcile(&f.meta, &mut res), 1);
        let after_first = res.get(a, f.friends).to_vec();
        assert_eq!(proxies.reconcile(&f.meta, &mut res), 0);
        assert_eq!(res.get(a, f.friends), after_first.as_slice());
    }

    #[test]
    fn test_proxy_without_opposite_stays() {
        let mut meta = Metamodel::new();
        let pkg = meta.add_package("urn:x", "x");
        let ty = meta.add_type(pkg, "T", &[]);
        let link = meta.add_reference(ty, "link", ty, false);
        let mut res = resource();
        let holder = res.create(&meta, ty).unwrap();
        let proxy = res.create(&meta, ty).unwrap();
        res.make_proxy(proxy, "#t");
        res.set_value(&meta, holder, link, Some(Value::Node(proxy)), InsertAt::Whole)
            .unwrap();
        let target = res.create(&meta, ty).unwrap();
        res.set_id(target, "t");

        let mut proxies = SameDocumentProxies::new();
        proxies.track_if_same_document(&res, proxy);
        assert_eq!(proxies.reconcile(&meta, &mut res), 0);
        assert_eq!(res.get(holder, link), &[Value::Node(proxy)]);
    }
}
