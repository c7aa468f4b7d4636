use std::fmt;

use crate::error::BuildError;

/// Attribute key holding the logical name of the service.
pub const SERVICE_NAME: &str = "service.name";

const TELEMETRY_SDK_LANGUAGE: &str = "telemetry.sdk.language";
const TELEMETRY_SDK_NAME: &str = "telemetry.sdk.name";
const TELEMETRY_SDK_VERSION: &str = "telemetry.sdk.version";
const DEFAULT_SERVICE_NAME: &str = "unknown_service";

/// A typed resource attribute value.
#[derive(Clone, Debug, PartialEq)]
pub enum AttributeValue {
    /// String value.
    String(String),

    /// Boolean value.
    Bool(bool),

    /// Signed integer value.
    I64(i64),

    /// Floating-point value.
    F64(f64),
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::String(s) => f.write_str(s),
            AttributeValue::Bool(b) => write!(f, "{b}"),
            AttributeValue::I64(i) => write!(f, "{i}"),
            AttributeValue::F64(v) => write!(f, "{v}"),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::String(value.to_owned())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::String(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::I64(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::F64(value)
    }
}

/// Immutable attributes identifying the process producing telemetry.
///
/// A `Resource` is built once at startup and attached, by reference, to every exported batch.
/// Attributes are kept sorted by key, and keys are guaranteed to be unique and non-empty.
#[derive(Clone, Debug, PartialEq)]
pub struct Resource {
    attributes: Vec<(String, AttributeValue)>,
}

impl Resource {
    /// Creates a [`ResourceBuilder`].
    pub fn builder() -> ResourceBuilder {
        ResourceBuilder::default()
    }

    /// Gets the value of the given attribute.
    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes
            .binary_search_by(|(k, _)| k.as_str().cmp(key))
            .ok()
            .map(|idx| &self.attributes[idx].1)
    }

    /// Gets the value of the `service.name` attribute.
    pub fn service_name(&self) -> Option<&str> {
        match self.get(SERVICE_NAME) {
            Some(AttributeValue::String(name)) => Some(name.as_str()),
            _ => None,
        }
    }

    /// Iterates over all attributes, in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttributeValue)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Returns the number of attributes.
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    /// Returns `true` if there are no attributes.
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

impl Default for Resource {
    fn default() -> Self {
        let mut attributes = Vec::new();
        push_defaults(&mut attributes);
        attributes.sort_by(|a, b| a.0.cmp(&b.0));
        Resource { attributes }
    }
}

/// Builder for a [`Resource`].
///
/// When not overridden, `service.name` defaults to `unknown_service`, and the SDK identification
/// attributes (`telemetry.sdk.*`) are filled in.
#[derive(Debug, Default)]
pub struct ResourceBuilder {
    attributes: Vec<(String, AttributeValue)>,
    service_name: Option<String>,
}

impl ResourceBuilder {
    /// Sets the `service.name` attribute.
    ///
    /// Takes precedence over a `service.name` passed to [`with_attribute`][Self::with_attribute].
    #[must_use]
    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    /// Adds an attribute.
    #[must_use]
    pub fn with_attribute(
        mut self,
        key: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }

    /// Builds the resource.
    ///
    /// # Errors
    ///
    /// If an attribute key is empty, or the same key was added more than once, an error will be
    /// returned.
    pub fn build(self) -> Result<Resource, BuildError> {
        let ResourceBuilder { mut attributes, service_name } = self;

        if let Some(name) = service_name {
            attributes.retain(|(k, _)| k != SERVICE_NAME);
            attributes.push((SERVICE_NAME.to_owned(), AttributeValue::String(name)));
        }

        if attributes.iter().any(|(k, _)| k.is_empty()) {
            return Err(BuildError::InvalidResource {
                reason: "attribute keys must not be empty".to_owned(),
            });
        }

        attributes.sort_by(|a, b| a.0.cmp(&b.0));
        if let Some(pair) = attributes.windows(2).find(|pair| pair[0].0 == pair[1].0) {
            return Err(BuildError::InvalidResource {
                reason: format!("duplicate attribute key `{}`", pair[0].0),
            });
        }

        push_defaults(&mut attributes);
        attributes.sort_by(|a, b| a.0.cmp(&b.0));

        Ok(Resource { attributes })
    }
}

// Adds default attributes for any keys not already present.
fn push_defaults(attributes: &mut Vec<(String, AttributeValue)>) {
    let defaults = [
        (SERVICE_NAME, DEFAULT_SERVICE_NAME),
        (TELEMETRY_SDK_LANGUAGE, "rust"),
        (TELEMETRY_SDK_NAME, env!("CARGO_PKG_NAME")),
        (TELEMETRY_SDK_VERSION, env!("CARGO_PKG_VERSION")),
    ];

    for (key, value) in defaults {
        if !attributes.iter().any(|(k, _)| k == key) {
            attributes.push((key.to_owned(), AttributeValue::from(value)));
        }
    }
}
