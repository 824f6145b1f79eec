//! Load configuration.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// What to do with elements and attributes no metadata describes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(rename_all = "snake_case"))]
pub enum UnknownFeaturePolicy {
    /// Emit `FeatureNotFound` and skip the subtree.
    #[default]
    Report,
    /// Keep the content on an extension node of the owning object.
    Record,
}

/// How non-containment references appear in documents.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(rename_all = "snake_case"))]
pub enum ReferenceStyle {
    /// `<ref href="doc.xml#id"/>`
    #[default]
    Attribute,
    /// `<ref>doc.xml#id</ref>`
    Encoded,
}

/// Which resolution step wins when a name matches both a declared feature
/// and a wildcard.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(rename_all = "snake_case"))]
pub enum FeaturePrecedence {
    #[default]
    DeclaredFirst,
    WildcardFirst,
}

/// Options controlling a load.
///
/// ```
/// use xmi::load::{LoadOptions, UnknownFeaturePolicy};
///
/// let options = LoadOptions::default()
///     .with_unknown_features(UnknownFeaturePolicy::Record)
///     .with_id_attribute("uuid");
/// assert!(options.extended_metadata());
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct LoadOptions {
    pub extended_metadata: bool,
    pub unknown_features: UnknownFeaturePolicy,
    /// Attach top-level objects only at document end.
    pub defer_attachment: bool,
    /// Stage every identifier reference, even ones already resolvable.
    pub defer_idref_resolution: bool,
    pub reference_style: ReferenceStyle,
    /// Load elements from unknown namespaces as open content.
    pub process_any_xml: bool,
    /// Ask the metadata loader for packages named by schema locations.
    pub process_schema_locations: bool,
    pub feature_precedence: FeaturePrecedence,
    pub id_attribute: String,
    pub idref_attribute: String,
    pub href_attribute: String,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            extended_metadata: false,
            unknown_features: UnknownFeaturePolicy::Report,
            defer_attachment: false,
            defer_idref_resolution: false,
            reference_style: ReferenceStyle::Attribute,
            process_any_xml: false,
            process_schema_locations: false,
            feature_precedence: FeaturePrecedence::DeclaredFirst,
            id_attribute: "id".to_string(),
            idref_attribute: "idref".to_string(),
            href_attribute: "href".to_string(),
        }
    }
}

impl LoadOptions {
    /// Whether extended metadata (wildcards, document roots, demanded
    /// packages) is in effect. Recording unknown features, processing any
    /// XML and processing schema locations all imply it.
    pub fn extended_metadata(&self) -> bool {
        self.extended_metadata
            || self.unknown_features == UnknownFeaturePolicy::Record
            || self.process_any_xml
            || self.process_schema_locations
    }

    pub fn with_extended_metadata(mut self, enabled: bool) -> Self {
        self.extended_metadata = enabled;
        self
    }

    pub fn with_unknown_features(mut self, policy: UnknownFeaturePolicy) -> Self {
        self.unknown_features = policy;
        self
    }

    pub fn with_defer_attachment(mut self, enabled: bool) -> Self {
        self.defer_attachment = enabled;
        self
    }

    pub fn with_defer_idref_resolution(mut self, enabled: bool) -> Self {
        self.defer_idref_resolution = enabled;
        self
    }

    pub fn with_reference_style(mut self, style: ReferenceStyle) -> Self {
        self.reference_style = style;
        self
    }

    pub fn with_process_any_xml(mut self, enabled: bool) -> Self {
        self.process_any_xml = enabled;
        self
    }

    pub fn with_process_schema_locations(mut self, enabled: bool) -> Self {
        self.process_schema_locations = enabled;
        self
    }

    pub fn with_feature_precedence(mut self, precedence: FeaturePrecedence) -> Self {
        self.feature_precedence = precedence;
        self
    }

    pub fn with_id_attribute(mut self, name: impl Into<String>) -> Self {
        self.id_attribute = name.into();
        self
    }

    pub fn with_idref_attribute(mut self, name: impl Into<String>) -> Self {
        self.idref_attribute = name.into();
        self
    }

    pub fn with_href_attribute(mut self, name: impl Into<String>) -> Self {
        self.href_attribute = name.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = LoadOptions::default();
        assert!(!options.extended_metadata());
        assert_eq!(options.unknown_features, UnknownFeaturePolicy::Report);
        assert_eq!(options.id_attribute, "id");
        assert_eq!(options.reference_style, ReferenceStyle::Attribute);
    }

    #[test]
    fn test_record_implies_extended_metadata() {
        let options = LoadOptions::default().with_unknown_features(UnknownFeaturePolicy::Record);
        assert!(options.extended_metadata());
        assert!(!options.extended_metadata);
    }

    #[test]
    fn test_any_xml_implies_extended_metadata() {
        assert!(LoadOptions::default().with_process_any_xml(true).extended_metadata());
        assert!(
            LoadOptions::default()
                .with_process_schema_locations(true)
                .extended_metadata()
        );
    }
}
