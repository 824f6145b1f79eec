//! The SAX-style event vocabulary the handler consumes.

use std::borrow::Cow;

/// An attribute as it appears on a start tag, already unescaped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct XmlAttribute<'a> {
    /// Raw qualified name (`prefix:local` or `local`).
    pub name: Cow<'a, str>,
    pub value: Cow<'a, str>,
}

impl<'a> XmlAttribute<'a> {
    pub fn new(name: impl Into<Cow<'a, str>>, value: impl Into<Cow<'a, str>>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// One parser event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum XmlEvent<'a> {
    StartDocument,
    EndDocument,
    /// Delivered before the start tag that declares it.
    StartPrefixMapping { prefix: &'a str, uri: &'a str },
    /// Accepted for SAX sources that send it; bindings end with their element.
    EndPrefixMapping { prefix: &'a str },
    StartElement {
        name: &'a str,
        attributes: &'a [XmlAttribute<'a>],
    },
    EndElement { name: &'a str },
    Characters(&'a str),
    Comment(&'a str),
    StartCdata,
    EndCdata,
    ProcessingInstruction { target: &'a str, data: &'a str },
    Doctype(&'a str),
}

/// Optional facts about the document the event source may know.
pub trait DocumentInfo {
    fn encoding(&self) -> Option<&str> {
        None
    }

    fn xml_version(&self) -> Option<&str> {
        None
    }

    /// System id (usually the document URI) used to locate diagnostics.
    fn system_id(&self) -> Option<&str> {
        None
    }
}

/// Document facts gathered from the XML declaration.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DocumentProlog {
    pub encoding: Option<String>,
    pub xml_version: Option<String>,
    pub system_id: Option<String>,
}

impl DocumentInfo for DocumentProlog {
    fn encoding(&self) -> Option<&str> {
        self.encoding.as_deref()
    }

    fn xml_version(&self) -> Option<&str> {
        self.xml_version.as_deref()
    }

    fn system_id(&self) -> Option<&str> {
        self.system_id.as_deref()
    }
}

/// Split a qualified name into prefix and local part.
pub(crate) fn split_qname(name: &str) -> (Option<&str>, &str) {
    match name.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_qname() {
        assert_eq!(split_qname("xsi:type"), (Some("xsi"), "type"));
        assert_eq!(split_qname("item"), (None, "item"));
    }

    #[test]
    fn test_document_info_defaults() {
        struct Bare;
        impl DocumentInfo for Bare {}

        assert_eq!(Bare.encoding(), None);
        assert_eq!(Bare.system_id(), None);

        let prolog = DocumentProlog {
            encoding: Some("UTF-8".into()),
            ..DocumentProlog::default()
        };
        assert_eq!(prolog.encoding(), Some("UTF-8"));
        assert_eq!(prolog.xml_version(), None);
    }
}
