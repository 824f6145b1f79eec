//! Element context stack.
//!
//! One [`Frame`] per open element, so the stack depth always equals the XML
//! nesting depth. Every peek returns `None` on an empty stack rather than
//! failing.

use smol_str::SmolStr;

use crate::base::{FeatureId, NodeId, TypeId};

/// Where mixed text, comments and CDATA go.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MixedTarget {
    /// Before the root element: buffered until the root exists.
    Prolog,
    /// A mixed feature map of an open object.
    Node { node: NodeId, feature: FeatureId },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameKind {
    /// An object under construction. `simple` receives its text content.
    Object {
        node: NodeId,
        simple: Option<FeatureId>,
    },
    /// A data-valued feature whose text is assigned at the end tag.
    Scalar { holder: NodeId, feature: FeatureId },
    /// An IDREF carrier whose identifiers are resolved at the end tag.
    /// `proxy_type` comes from an explicit `xsi:type`.
    Reference {
        holder: NodeId,
        feature: FeatureId,
        proxy_type: Option<TypeId>,
    },
    /// Open content recorded on an extension node.
    Unknown { node: NodeId },
    /// Skipped subtree.
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub mixed: Option<MixedTarget>,
    pub name: SmolStr,
}

impl Frame {
    pub fn new(kind: FrameKind, name: &str) -> Self {
        Self {
            kind,
            mixed: None,
            name: SmolStr::new(name),
        }
    }

    pub fn error(name: &str) -> Self {
        Self::new(FrameKind::Error, name)
    }

    pub fn with_mixed(mut self, mixed: Option<MixedTarget>) -> Self {
        self.mixed = mixed;
        self
    }

    /// The object this frame makes current, if any.
    pub fn object(&self) -> Option<NodeId> {
        match self.kind {
            FrameKind::Object { node, .. } | FrameKind::Unknown { node } => Some(node),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct ElementStack {
    frames: Vec<Frame>,
}

impl ElementStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    pub fn pop(&mut self) -> Option<Frame> {
        self.frames.pop()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn peek(&self) -> Option<&Frame> {
        self.frames.last()
    }

    pub fn peek_kind(&self) -> Option<FrameKind> {
        self.peek().map(|frame| frame.kind)
    }

    pub fn peek_object(&self) -> Option<NodeId> {
        self.peek().and_then(Frame::object)
    }

    pub fn peek_mixed(&self) -> Option<MixedTarget> {
        self.peek().and_then(|frame| frame.mixed)
    }

    pub fn is_error(&self) -> bool {
        matches!(self.peek_kind(), Some(FrameKind::Error))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Frame> {
        self.frames.iter()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}
