//! Reference ledger: identifier references waiting for their target.
//!
//! Identifiers that cannot be resolved when they are read are staged here
//! with the ordinal they had in the document, then resolved in later
//! passes. A non-final pass keeps whatever is still missing; the final pass
//! reports it as [`DiagnosticKind::UnresolvedReference`](super::DiagnosticKind).

use rustc_hash::FxHashSet;
use smol_str::SmolStr;

use super::diagnostics::DiagnosticCollector;
use crate::base::{FeatureId, LineCol, NodeId};
use crate::graph::{IdentifierIndex, InsertAt, ValueSetter};
use crate::meta::{Metamodel, Value};

/// At most this many unresolved identifiers from one value are recorded
/// individually; more become a single batched entry.
pub const REFERENCE_THRESHOLD: usize = 5;

/// A staged identifier and the list position it belongs at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingId {
    pub identifier: SmolStr,
    pub index: usize,
}

impl PendingId {
    pub fn new(identifier: &str, index: usize) -> Self {
        Self {
            identifier: SmolStr::new(identifier),
            index,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SingleReference {
    pub holder: NodeId,
    pub feature: FeatureId,
    pub identifier: SmolStr,
    pub index: usize,
    pub position: LineCol,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManyReference {
    pub holder: NodeId,
    pub feature: FeatureId,
    pub identifiers: Vec<PendingId>,
    pub position: LineCol,
}

/// Outcome of one resolution pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResolveSummary {
    pub resolved: usize,
    pub unresolved: usize,
}

#[derive(Debug, Default)]
pub struct ReferenceLedger {
    singles: Vec<SingleReference>,
    many: Vec<ManyReference>,
}

impl ReferenceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_single(
        &mut self,
        holder: NodeId,
        feature: FeatureId,
        identifier: SmolStr,
        index: usize,
        position: LineCol,
    ) {
        self.singles.push(SingleReference {
            holder,
            feature,
            identifier,
            index,
            position,
        });
    }

    pub fn record_many(
        &mut self,
        holder: NodeId,
        feature: FeatureId,
        identifiers: Vec<PendingId>,
        position: LineCol,
    ) {
        self.many.push(ManyReference {
            holder,
            feature,
            identifiers,
            position,
        });
    }

    /// Record everything staged for one feature value, draining `staged`.
    pub fn commit(
        &mut self,
        holder: NodeId,
        feature: FeatureId,
        staged: &mut Vec<PendingId>,
        position: LineCol,
    ) {
        if staged.is_empty() {
            return;
        }
        if staged.len() <= REFERENCE_THRESHOLD {
            for pending in staged.drain(..) {
                self.record_single(holder, feature, pending.identifier, pending.index, position);
            }
        } else {
            self.record_many(holder, feature, staged.drain(..).collect(), position);
        }
    }

    /// Identifiers still pending for one holder's feature.
    pub fn pending_count(&self, holder: NodeId, feature: FeatureId) -> usize {
        let singles = self
            .singles
            .iter()
            .filter(|r| r.holder == holder && r.feature == feature)
            .count();
        let many: usize = self
            .many
            .iter()
            .filter(|r| r.holder == holder && r.feature == feature)
            .map(|r| r.identifiers.len())
            .sum();
        singles + many
    }

    pub fn singles(&self) -> &[SingleReference] {
        &self.singles
    }

    pub fn many(&self) -> &[ManyReference] {
        &self.many
    }

    pub fn len(&self) -> usize {
        self.singles.len() + self.many.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.singles.clear();
        self.many.clear();
    }

    /// Resolve what can be resolved.
    ///
    /// Resolved entries are removed and assigned at their recorded index. In
    /// a non-final pass an entry stays put while an earlier entry for the
    /// same holder and feature is still missing, so insertion order matches
    /// document order. A batched entry is only applied mid-stream once all
    /// of its identifiers resolve. The final pass drains the ledger,
    /// reporting every missing identifier and still applying the resolved
    /// part of each batch.
    pub fn try_resolve_all<G>(
        &mut self,
        meta: &Metamodel,
        graph: &mut G,
        final_pass: bool,
        diagnostics: &mut DiagnosticCollector,
    ) -> ResolveSummary
    where
        G: IdentifierIndex + ValueSetter + ?Sized,
    {
        let mut summary = ResolveSummary::default();
        let mut blocked: FxHashSet<(NodeId, FeatureId)> = FxHashSet::default();

        let singles = std::mem::take(&mut self.singles);
        for reference in singles {
            let key = (reference.holder, reference.feature);
            let target = if !final_pass && blocked.contains(&key) {
                None
            } else {
                graph.lookup(meta, &reference.identifier)
            };
            match target {
                Some(target) => {
                    summary.resolved += 1;
                    let at = insert_at(meta, reference.feature, reference.index);
                    if let Err(err) =
                        graph.set_value(meta, reference.holder, reference.feature, Some(Value::Node(target)), at)
                    {
                        diagnostics.illegal_value(&err, reference.holder, reference.feature, reference.position);
                    }
                }
                None if final_pass => {
                    summary.unresolved += 1;
                    diagnostics.unresolved_reference(
                        &reference.identifier,
                        reference.holder,
                        reference.feature,
                        reference.position,
                    );
                }
                None => {
                    blocked.insert(key);
                    self.singles.push(reference);
                }
            }
        }

        let many = std::mem::take(&mut self.many);
        for reference in many {
            let key = (reference.holder, reference.feature);
            if !final_pass && blocked.contains(&key) {
                self.many.push(reference);
                continue;
            }

            let mut resolved = Vec::with_capacity(reference.identifiers.len());
            let mut missing = Vec::new();
            for pending in &reference.identifiers {
                match graph.lookup(meta, &pending.identifier) {
                    Some(target) => resolved.push((target, pending.index)),
                    None => missing.push(&pending.identifier),
                }
            }

            if !missing.is_empty() && !final_pass {
                blocked.insert(key);
                self.many.push(reference);
                continue;
            }

            for identifier in missing {
                summary.unresolved += 1;
                diagnostics.unresolved_reference(identifier, reference.holder, reference.feature, reference.position);
            }
            summary.resolved += resolved.len();
            for err in graph.set_many_values(meta, reference.holder, reference.feature, &resolved) {
                diagnostics.illegal_value(&err, reference.holder, reference.feature, reference.position);
            }
        }

        summary
    }
}

fn insert_at(meta: &Metamodel, feature: FeatureId, index: usize) -> InsertAt {
    if meta.feature(feature).many {
        InsertAt::Index(index)
    } else {
        InsertAt::Whole
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::TypeId;
    use crate::graph::{ObjectFactory, Resource};
    use crate::load::DiagnosticKind;

    struct Fixture {
        meta: Metamodel,
        item: TypeId,
        refs: FeatureId,
        single: FeatureId,
    }

    fn fixture() -> Fixture {
        let mut meta = Metamodel::new();
        let pkg = meta.add_package("urn:t", "t");
        let item = meta.add_type(pkg, "Item", &[]);
        let refs = meta.add_reference(item, "refs", item, false);
        meta.feature_mut(refs).many = true;
        let single = meta.add_reference(item, "next", item, false);
        Fixture {
            meta,
            item,
            refs,
            single,
        }
    }

    fn stage(ids: &[&str]) -> Vec<PendingId> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| PendingId::new(id, i))
            .collect()
    }

    #[test]
    fn test_threshold_splits_single_and_many() {
        let holder = NodeId::new(0);
        let feature = FeatureId::new(0);
        let mut ledger = ReferenceLedger::new();

        let mut staged = stage(&["a", "b", "c", "d", "e"]);
        ledger.commit(holder, feature, &mut staged, LineCol::UNKNOWN);
        assert_eq!(ledger.singles().len(), 5);
        assert!(ledger.many().is_empty());
        assert!(staged.is_empty());

        let mut staged = stage(&["a", "b", "c", "d", "e", "f"]);
        ledger.commit(holder, feature, &mut staged, LineCol::UNKNOWN);
        assert_eq!(ledger.many().len(), 1);
        assert_eq!(ledger.many()[0].identifiers.len(), 6);
        assert_eq!(ledger.pending_count(holder, feature), 11);
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let f = fixture();
        let mut res = Resource::new();
        let holder = res.create(&f.meta, f.item).unwrap();
        let target = res.create(&f.meta, f.item).unwrap();
        res.set_id(target, "t1");

        let mut ledger = ReferenceLedger::new();
        let mut diags = DiagnosticCollector::new();
        ledger.record_single(holder, f.refs, "t1".into(), 0, LineCol::UNKNOWN);

        let first = ledger.try_resolve_all(&f.meta, &mut res, false, &mut diags);
        let second = ledger.try_resolve_all(&f.meta, &mut res, false, &mut diags);

        assert_eq!(first.resolved, 1);
        assert_eq!(second, ResolveSummary::default());
        assert_eq!(res.get(holder, f.refs), &[Value::Node(target)]);
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_final_pass_reports_with_position() {
        let f = fixture();
        let mut res = Resource::new();
        let holder = res.create(&f.meta, f.item).unwrap();

        let mut ledger = ReferenceLedger::new();
        let mut diags = DiagnosticCollector::new();
        ledger.record_single(holder, f.single, "ghost".into(), 0, LineCol::new(3, 7));

        let mid = ledger.try_resolve_all(&f.meta, &mut res, false, &mut diags);
        assert_eq!(mid.unresolved, 0);
        assert_eq!(ledger.len(), 1);
        assert!(diags.is_empty());

        let end = ledger.try_resolve_all(&f.meta, &mut res, true, &mut diags);
        assert_eq!(end.unresolved, 1);
        assert!(ledger.is_empty());
        let diag = &diags.diagnostics()[0];
        assert_eq!(diag.kind, DiagnosticKind::UnresolvedReference);
        assert_eq!(diag.position, LineCol::new(3, 7));
        assert_eq!(diag.node, Some(holder));
    }

    #[test]
    fn test_batch_is_all_or_nothing_mid_stream() {
        let f = fixture();
        let mut res = Resource::new();
        let holder = res.create(&f.meta, f.item).unwrap();
        let names = ["a", "b", "c", "d", "e", "f"];
        let nodes: Vec<_> = names
            .iter()
            .map(|name| {
                let node = res.create(&f.meta, f.item).unwrap();
                res.set_id(node, name);
                node
            })
            .collect();

        let mut ledger = ReferenceLedger::new();
        let mut diags = DiagnosticCollector::new();
        let mut staged = stage(&["a", "b", "c", "d", "e", "f", "g"]);
        ledger.commit(holder, f.refs, &mut staged, LineCol::UNKNOWN);

        ledger.try_resolve_all(&f.meta, &mut res, false, &mut diags);
        assert!(res.get(holder, f.refs).is_empty());
        assert_eq!(ledger.many().len(), 1);

        let end = ledger.try_resolve_all(&f.meta, &mut res, true, &mut diags);
        assert_eq!(end.resolved, 6);
        assert_eq!(end.unresolved, 1);
        let expected: Vec<_> = nodes.iter().map(|&n| Value::Node(n)).collect();
        assert_eq!(res.get(holder, f.refs), expected.as_slice());
    }

    #[test]
    fn test_blocked_entries_keep_document_order() {
        let f = fixture();
        let mut res = Resource::new();
        let holder = res.create(&f.meta, f.item).unwrap();
        let a = res.create(&f.meta, f.item).unwrap();
        let b = res.create(&f.meta, f.item).unwrap();
        let c = res.create(&f.meta, f.item).unwrap();
        res.set_id(b, "b");
        res.set_id(c, "c");

        // "c" was resolved immediately at ordinal 2.
        res.set_value(&f.meta, holder, f.refs, Some(Value::Node(c)), InsertAt::Index(2))
            .unwrap();

        let mut ledger = ReferenceLedger::new();
        let mut diags = DiagnosticCollector::new();
        let mut staged = stage(&["a", "b"]);
        ledger.commit(holder, f.refs, &mut staged, LineCol::UNKNOWN);

        // "b" must not jump ahead of the still-missing "a".
        ledger.try_resolve_all(&f.meta, &mut res, false, &mut diags);
        assert_eq!(res.get(holder, f.refs), &[Value::Node(c)]);

        res.set_id(a, "a");
        ledger.try_resolve_all(&f.meta, &mut res, true, &mut diags);
        assert_eq!(
            res.get(holder, f.refs),
            &[Value::Node(a), Value::Node(b), Value::Node(c)]
        );
        assert!(diags.is_empty());
    }
}
