use std::{borrow::Cow, fmt, sync::Arc};

use scc::{hash_map::Entry, HashMap};
use tracing::{debug, warn};

use crate::{
    data::{CounterSnapshot, Metric, MetricData, ScopeMetrics},
    error::MetricsError,
    instrument::{Counter, Histogram, InstrumentDescriptor, InstrumentKind},
    storage::{validate_boundaries, AtomicCounter, AtomicHistogram, DEFAULT_BOUNDARIES},
};

/// Name and version of the component that created a set of instruments.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct InstrumentationScope {
    name: String,
    version: Option<String>,
}

impl InstrumentationScope {
    /// Creates a new `InstrumentationScope` with no version.
    pub fn new(name: impl Into<String>) -> Self {
        InstrumentationScope { name: name.into(), version: None }
    }

    /// Sets the scope version.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Returns the scope name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the scope version, if any.
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }
}

impl fmt::Display for InstrumentationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}@{}", self.name, version),
            None => f.write_str(&self.name),
        }
    }
}

impl From<&str> for InstrumentationScope {
    fn from(name: &str) -> Self {
        InstrumentationScope::new(name)
    }
}

#[derive(Clone)]
enum Storage {
    Counter(Arc<AtomicCounter>),
    Histogram(Arc<AtomicHistogram>),
}

#[derive(Clone)]
struct Registered {
    descriptor: InstrumentDescriptor,
    storage: Storage,
}

/// Creates and owns the instruments of one instrumentation scope.
///
/// Each instrument name maps to exactly one instrument for the lifetime of the meter: registering
/// a name again with the same kind returns a handle to the existing aggregate, while registering it
/// with a different kind fails.
///
/// `Meter` is cheap to clone, and all clones share the same instruments.
#[derive(Clone)]
pub struct Meter {
    scope: Arc<InstrumentationScope>,
    instruments: Arc<HashMap<String, Registered>>,
}

impl Meter {
    pub(crate) fn new(scope: InstrumentationScope) -> Self {
        Meter { scope: Arc::new(scope), instruments: Arc::new(HashMap::new()) }
    }

    /// Returns the instrumentation scope of this meter.
    pub fn scope(&self) -> &InstrumentationScope {
        &self.scope
    }

    /// Creates, or gets, the counter with the given name.
    ///
    /// # Errors
    ///
    /// If the name is empty, or is already used by an instrument of another kind, an error will be
    /// returned.
    pub fn create_counter(&self, name: &str, description: &str) -> Result<Counter, MetricsError> {
        self.register_counter(name, description, "")
    }

    /// Creates, or gets, the histogram with the given name.
    ///
    /// When `boundaries` is `None`, [`DEFAULT_BOUNDARIES`] are used. If a histogram with this name
    /// already exists, it is returned as-is, even when its boundaries differ from the ones given.
    ///
    /// # Errors
    ///
    /// If the name is empty, if the boundaries are not finite and strictly ascending, or if the
    /// name is already used by an instrument of another kind, an error will be returned.
    pub fn create_histogram(
        &self,
        name: &str,
        description: &str,
        unit: &str,
        boundaries: Option<&[f64]>,
    ) -> Result<Histogram, MetricsError> {
        self.register_histogram(name, description, unit, boundaries)
    }

    /// Starts building a counter.
    pub fn counter<'a>(&self, name: impl Into<Cow<'a, str>>) -> CounterBuilder<'_, 'a> {
        CounterBuilder {
            meter: self,
            name: name.into(),
            description: Cow::Borrowed(""),
            unit: Cow::Borrowed(""),
        }
    }

    /// Starts building a histogram.
    pub fn histogram<'a>(&self, name: impl Into<Cow<'a, str>>) -> HistogramBuilder<'_, 'a> {
        HistogramBuilder {
            meter: self,
            name: name.into(),
            description: Cow::Borrowed(""),
            unit: Cow::Borrowed(""),
            boundaries: None,
        }
    }

    pub(crate) fn register_counter(
        &self,
        name: &str,
        description: &str,
        unit: &str,
    ) -> Result<Counter, MetricsError> {
        let registered = self.register(name, InstrumentKind::Counter, || {
            let descriptor =
                InstrumentDescriptor::new(name, description, unit, InstrumentKind::Counter);
            Ok(Registered { descriptor, storage: Storage::Counter(Arc::new(AtomicCounter::new())) })
        })?;

        match registered.storage {
            Storage::Counter(inner) => Ok(Counter::from_arc(inner)),
            Storage::Histogram(_) => {
                Err(conflict(name, InstrumentKind::Histogram, InstrumentKind::Counter))
            }
        }
    }

    pub(crate) fn register_histogram(
        &self,
        name: &str,
        description: &str,
        unit: &str,
        boundaries: Option<&[f64]>,
    ) -> Result<Histogram, MetricsError> {
        if let Some(bounds) = boundaries {
            validate_boundaries(bounds)?;
        }

        let registered = self.register(name, InstrumentKind::Histogram, || {
            let bounds = boundaries.unwrap_or(DEFAULT_BOUNDARIES);
            let descriptor =
                InstrumentDescriptor::new(name, description, unit, InstrumentKind::Histogram);
            let histogram = AtomicHistogram::new(bounds)?;
            Ok(Registered { descriptor, storage: Storage::Histogram(Arc::new(histogram)) })
        })?;

        match registered.storage {
            Storage::Histogram(inner) => {
                if let Some(bounds) = boundaries {
                    if inner.bounds() != bounds {
                        warn!(
                            scope = %self.scope,
                            instrument = name,
                            "Histogram already registered with other boundaries, keeping them."
                        );
                    }
                }
                Ok(Histogram::from_arc(inner))
            }
            Storage::Counter(_) => {
                Err(conflict(name, InstrumentKind::Counter, InstrumentKind::Histogram))
            }
        }
    }

    fn register<F>(
        &self,
        name: &str,
        kind: InstrumentKind,
        init: F,
    ) -> Result<Registered, MetricsError>
    where
        F: FnOnce() -> Result<Registered, MetricsError>,
    {
        if name.is_empty() {
            return Err(MetricsError::invalid_argument("instrument name must not be empty"));
        }

        if let Some(existing) = self.instruments.read(name, |_, registered| registered.clone()) {
            return Ok(existing);
        }

        // Build the instrument before touching the map, so a validation failure leaves no trace.
        let candidate = init()?;
        let registered = match self.instruments.entry(name.to_owned()) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                debug!(scope = %self.scope, instrument = name, %kind, "Registered instrument.");
                entry.insert_entry(candidate).get().clone()
            }
        };

        Ok(registered)
    }

    /// Flushes every instrument of this meter.
    ///
    /// Instruments that saw no activity are still reported, with zero values.
    pub(crate) fn collect(&self) -> ScopeMetrics {
        let mut registered = Vec::with_capacity(self.instruments.len());
        self.instruments.scan(|_, instrument| registered.push(instrument.clone()));
        registered.sort_by(|a, b| a.descriptor.name().cmp(b.descriptor.name()));

        let metrics = registered
            .into_iter()
            .map(|Registered { descriptor, storage }| {
                let data = match storage {
                    Storage::Counter(counter) => {
                        MetricData::Counter(CounterSnapshot { value: counter.flush() })
                    }
                    Storage::Histogram(histogram) => MetricData::Histogram(histogram.flush()),
                };
                Metric { descriptor, data }
            })
            .collect();

        ScopeMetrics { scope: InstrumentationScope::clone(&self.scope), metrics }
    }
}

impl fmt::Debug for Meter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Meter")
            .field("scope", &self.scope)
            .field("instruments", &self.instruments.len())
            .finish()
    }
}

fn conflict(name: &str, existing: InstrumentKind, requested: InstrumentKind) -> MetricsError {
    MetricsError::ConfigurationConflict { name: name.to_owned(), existing, requested }
}

/// Builder for a [`Counter`].
#[must_use]
pub struct CounterBuilder<'m, 'a> {
    meter: &'m Meter,
    name: Cow<'a, str>,
    description: Cow<'a, str>,
    unit: Cow<'a, str>,
}

impl<'m, 'a> CounterBuilder<'m, 'a> {
    /// Sets the description.
    pub fn with_description(mut self, description: impl Into<Cow<'a, str>>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the unit.
    pub fn with_unit(mut self, unit: impl Into<Cow<'a, str>>) -> Self {
        self.unit = unit.into();
        self
    }

    /// Registers the counter.
    ///
    /// # Errors
    ///
    /// See [`Meter::create_counter`].
    pub fn build(self) -> Result<Counter, MetricsError> {
        self.meter.register_counter(&self.name, &self.description, &self.unit)
    }
}

/// Builder for a [`Histogram`].
#[must_use]
pub struct HistogramBuilder<'m, 'a> {
    meter: &'m Meter,
    name: Cow<'a, str>,
    description: Cow<'a, str>,
    unit: Cow<'a, str>,
    boundaries: Option<Vec<f64>>,
}

impl<'m, 'a> HistogramBuilder<'m, 'a> {
    /// Sets the description.
    pub fn with_description(mut self, description: impl Into<Cow<'a, str>>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the unit.
    pub fn with_unit(mut self, unit: impl Into<Cow<'a, str>>) -> Self {
        self.unit = unit.into();
        self
    }

    /// Sets the bucket boundaries.
    ///
    /// Defaults to [`DEFAULT_BOUNDARIES`].
    pub fn with_boundaries(mut self, boundaries: impl Into<Vec<f64>>) -> Self {
        self.boundaries = Some(boundaries.into());
        self
    }

    /// Registers the histogram.
    ///
    /// # Errors
    ///
    /// See [`Meter::create_histogram`].
    pub fn build(self) -> Result<Histogram, MetricsError> {
        self.meter.register_histogram(
            &self.name,
            &self.description,
            &self.unit,
            self.boundaries.as_deref(),
        )
    }
}
