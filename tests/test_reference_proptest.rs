//! Property tests for the event driver and identifier references.
//!
//! - The element stack always mirrors the nesting depth, whatever mix of
//!   known, unknown and reference elements arrives.
//! - IDREF lists end up in token order no matter where their targets appear,
//!   on either side of the staging threshold.
#![cfg(feature = "proptest")]

use proptest::prelude::*;
use xmi::base::{FeatureId, LineCol};
use xmi::load::{
    DiagnosticKind, LoadOptions, REFERENCE_THRESHOLD, UnknownFeaturePolicy, XmlEvent, XmlHandler, load_str,
};
use xmi::meta::{Metamodel, Value};

// ============================================================================
// FIXTURES
// ============================================================================

fn refs_metamodel() -> (Metamodel, FeatureId, FeatureId) {
    let mut meta = Metamodel::new();
    let pkg = meta.add_package("", "t");
    let root = meta.add_type(pkg, "root", &[]);
    let a_type = meta.add_type(pkg, "A", &[]);
    let b_type = meta.add_type(pkg, "B", &[]);
    let a = meta.add_reference(root, "a", a_type, true);
    meta.feature_mut(a).many = true;
    let b = meta.add_reference(root, "b", b_type, true);
    meta.feature_mut(b).many = true;
    meta.add_reference(a_type, "ref", b_type, false);
    let refs = meta.add_reference(a_type, "refs", b_type, false);
    meta.feature_mut(refs).many = true;
    (meta, a, refs)
}

// ============================================================================
// PROPTEST STRATEGIES
// ============================================================================

const NAMES: &[&str] = &["a", "b", "ref", "refs", "item", "zzz"];

#[derive(Clone, Debug)]
struct Tree {
    name: &'static str,
    text: bool,
    children: Vec<Tree>,
}

/// Strategy for element trees mixing declared and undeclared names.
fn arb_tree() -> impl Strategy<Value = Tree> {
    let leaf = (prop::sample::select(NAMES), any::<bool>()).prop_map(|(name, text)| Tree {
        name,
        text,
        children: Vec::new(),
    });
    leaf.prop_recursive(4, 48, 4, |inner| {
        (prop::sample::select(NAMES), any::<bool>(), prop::collection::vec(inner, 0..4)).prop_map(
            |(name, text, children)| Tree { name, text, children },
        )
    })
}

/// Strategy for an id list, a placement order for its targets, and how many
/// targets come before the referencing element.
fn arb_placement() -> impl Strategy<Value = (Vec<String>, Vec<String>, usize)> {
    (1usize..=2 * REFERENCE_THRESHOLD + 2).prop_flat_map(|count| {
        let ids: Vec<String> = (0..count).map(|i| format!("x{i}")).collect();
        (Just(ids.clone()), Just(ids).prop_shuffle(), 0..=count)
    })
}

fn feed(handler: &mut XmlHandler<'_>, tree: &Tree, depth: usize) -> Result<(), TestCaseError> {
    let at = LineCol::UNKNOWN;
    handler
        .handle_event(
            XmlEvent::StartElement {
                name: tree.name,
                attributes: &[],
            },
            at,
        )
        .unwrap();
    prop_assert_eq!(handler.stack_depth(), depth + 1);

    for child in &tree.children {
        if tree.text {
            handler.handle_event(XmlEvent::Characters("x1"), at).unwrap();
        }
        feed(handler, child, depth + 1)?;
    }
    if tree.text {
        handler.handle_event(XmlEvent::Characters("x2"), at).unwrap();
    }

    handler.handle_event(XmlEvent::EndElement { name: tree.name }, at).unwrap();
    prop_assert_eq!(handler.stack_depth(), depth);
    Ok(())
}

// ============================================================================
// PROPERTIES
// ============================================================================

proptest! {
    #[test]
    fn prop_stack_depth_matches_nesting(
        children in prop::collection::vec(arb_tree(), 0..4),
        record in any::<bool>(),
    ) {
        let (mut meta, _, _) = refs_metamodel();
        let policy = if record { UnknownFeaturePolicy::Record } else { UnknownFeaturePolicy::Report };
        let mut handler = XmlHandler::new(&mut meta, LoadOptions::default().with_unknown_features(policy));

        let root = Tree { name: "root", text: false, children };
        feed(&mut handler, &root, 0)?;
        handler.handle_event(XmlEvent::EndDocument, LineCol::UNKNOWN).unwrap();

        let outcome = handler.finish();
        prop_assert_eq!(outcome.resource.contents().len(), 1);
        for diagnostic in &outcome.diagnostics {
            prop_assert!(matches!(
                diagnostic.kind,
                DiagnosticKind::FeatureNotFound | DiagnosticKind::UnresolvedReference
            ));
        }
    }

    #[test]
    fn prop_reference_order_matches_tokens(
        (ids, placement, before) in arb_placement(),
        defer in any::<bool>(),
    ) {
        let (mut meta, a, refs) = refs_metamodel();
        let targets = |ids: &[String]| -> String {
            ids.iter().map(|id| format!("<b id=\"{id}\"/>")).collect()
        };
        let xml = format!(
            r#"<root>{}<a refs="{}"/>{}</root>"#,
            targets(&placement[..before]),
            ids.join(" "),
            targets(&placement[before..]),
        );

        let options = LoadOptions::default().with_defer_idref_resolution(defer);
        let outcome = load_str(&mut meta, &xml, options).unwrap();
        prop_assert!(outcome.diagnostics.is_empty());

        let root = outcome.resource.contents()[0];
        let holder = outcome.resource.get(root, a)[0].as_node().unwrap();
        let loaded: Vec<String> = outcome
            .resource
            .get(holder, refs)
            .iter()
            .filter_map(Value::as_node)
            .filter_map(|node| outcome.resource.node(node).id().map(str::to_string))
            .collect();
        prop_assert_eq!(loaded, ids);
    }
}
