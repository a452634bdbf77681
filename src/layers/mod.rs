//! Layers: reusable wrappers that own named parameters and buffers and
//! delegate their computation to a descriptor.
//!
//! A layer keeps its state in a [`Registry`]. Optional entries that are
//! switched off by configuration are still registered, as [`Slot::Absent`],
//! so the set of names a layer exposes never depends on its configuration.
//!
//! ```rust
//! use briny_autograd::layers::{Layer, LinearConfig};
//!
//! let with_bias = LinearConfig::new(4, 2).init().unwrap();
//! let without = LinearConfig::new(4, 2).with_bias(false).init().unwrap();
//! assert_eq!(with_bias.num_parameters(), without.num_parameters());
//! assert_eq!(without.describe(), "in_features=4, out_features=2, bias=false");
//! ```

mod linear;
mod scale;

pub use self::linear::{Linear, LinearConfig};
pub use self::scale::Scale;

use crate::error::{Error, Result};
use crate::tensors::Ten64;
use crate::var::Var;

/// A registered entry that may have been left out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot<T> {
    /// The entry holds a value.
    Present(T),
    /// The entry is registered but intentionally empty.
    Absent,
}

impl<T> Slot<T> {
    /// `true` for [`Slot::Present`].
    #[must_use]
    pub const fn is_present(&self) -> bool {
        matches!(self, Self::Present(_))
    }

    /// Borrows the value, if any.
    #[must_use]
    pub const fn as_ref(&self) -> Slot<&T> {
        match self {
            Self::Present(value) => Slot::Present(value),
            Self::Absent => Slot::Absent,
        }
    }

    /// Converts into an `Option`.
    #[must_use]
    pub fn into_option(self) -> Option<T> {
        match self {
            Self::Present(value) => Some(value),
            Self::Absent => None,
        }
    }
}

impl<T> From<Option<T>> for Slot<T> {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Absent, Self::Present)
    }
}

/// Whether a registry entry is trained or only carried along.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    /// Receives gradients and is updated by training.
    Parameter,
    /// Persistent state that is never differentiated.
    Buffer,
}

#[derive(Debug, Clone)]
pub(crate) struct Entry {
    pub(crate) name: String,
    pub(crate) kind: EntryKind,
    pub(crate) value: Slot<Var>,
}

/// Ordered collection of a layer's named parameters and buffers.
///
/// Names are unique across both kinds, non-empty, and may not contain `.`.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    entries: Vec<Entry>,
}

impl Registry {
    /// An empty registry.
    #[must_use]
    pub const fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Registers a trainable parameter, or an absent placeholder for `None`.
    ///
    /// Returns the handle of the new parameter so the layer can keep it.
    ///
    /// # Errors
    /// [`Error::InvalidName`] or [`Error::DuplicateName`].
    pub fn register_parameter(&mut self, name: &str, value: Option<Ten64>) -> Result<Option<Var>> {
        self.register(name, EntryKind::Parameter, value.map(Var::parameter))
    }

    /// Registers a buffer, or an absent placeholder for `None`.
    ///
    /// # Errors
    /// [`Error::InvalidName`] or [`Error::DuplicateName`].
    pub fn register_buffer(&mut self, name: &str, value: Option<Ten64>) -> Result<Option<Var>> {
        self.register(name, EntryKind::Buffer, value.map(Var::new))
    }

    fn register(&mut self, name: &str, kind: EntryKind, value: Option<Var>) -> Result<Option<Var>> {
        if name.is_empty() || name.contains('.') {
            return Err(Error::InvalidName(name.to_owned()));
        }
        if self.entries.iter().any(|entry| entry.name == name) {
            return Err(Error::DuplicateName(name.to_owned()));
        }
        self.entries.push(Entry {
            name: name.to_owned(),
            kind,
            value: value.clone().into(),
        });
        Ok(value)
    }

    /// The parameter called `name`; `None` if it is registered as absent.
    ///
    /// # Errors
    /// [`Error::UnknownName`] if no parameter has that name.
    pub fn parameter(&self, name: &str) -> Result<Option<Var>> {
        self.lookup(name, EntryKind::Parameter)
            .map(|entry| entry.value.clone().into_option())
    }

    /// The buffer called `name`; `None` if it is registered as absent.
    ///
    /// # Errors
    /// [`Error::UnknownName`] if no buffer has that name.
    pub fn buffer(&self, name: &str) -> Result<Option<Var>> {
        self.lookup(name, EntryKind::Buffer)
            .map(|entry| entry.value.clone().into_option())
    }

    /// Replaces a buffer's value (or clears it with `None`).
    ///
    /// # Errors
    /// [`Error::UnknownName`] if no buffer has that name.
    pub fn set_buffer(&mut self, name: &str, value: Option<Ten64>) -> Result<()> {
        let index = self
            .entries
            .iter()
            .position(|entry| entry.kind == EntryKind::Buffer && entry.name == name)
            .ok_or_else(|| Error::UnknownName(name.to_owned()))?;
        self.entries[index].value = value.map(Var::new).into();
        Ok(())
    }

    fn lookup(&self, name: &str, kind: EntryKind) -> Result<&Entry> {
        self.entries
            .iter()
            .find(|entry| entry.kind == kind && entry.name == name)
            .ok_or_else(|| Error::UnknownName(name.to_owned()))
    }

    /// Every parameter in registration order, absent ones included.
    #[must_use]
    pub fn named_parameters(&self) -> Vec<(&str, Slot<&Var>)> {
        self.named(EntryKind::Parameter)
    }

    /// Every buffer in registration order, absent ones included.
    #[must_use]
    pub fn named_buffers(&self) -> Vec<(&str, Slot<&Var>)> {
        self.named(EntryKind::Buffer)
    }

    fn named(&self, kind: EntryKind) -> Vec<(&str, Slot<&Var>)> {
        self.entries
            .iter()
            .filter(|entry| entry.kind == kind)
            .map(|entry| (entry.name.as_str(), entry.value.as_ref()))
            .collect()
    }

    /// Handles of the present parameters, in registration order.
    #[must_use]
    pub fn parameters(&self) -> Vec<Var> {
        self.entries
            .iter()
            .filter(|entry| entry.kind == EntryKind::Parameter)
            .filter_map(|entry| entry.value.clone().into_option())
            .collect()
    }

    /// Number of registered parameter names, absent ones included.
    #[must_use]
    pub fn num_parameters(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.kind == EntryKind::Parameter)
            .count()
    }

    /// Total element count of the present parameters.
    #[must_use]
    pub fn num_elements(&self) -> usize {
        self.parameters().iter().map(Var::numel).sum()
    }

    /// Clears the accumulated gradient of every parameter.
    pub fn zero_grad(&self) {
        for parameter in self.parameters() {
            parameter.zero_grad();
        }
    }

    pub(crate) fn entries(&self) -> &[Entry] {
        &self.entries
    }
}

/// A module that owns state in a [`Registry`] and computes through a descriptor.
pub trait Layer {
    /// What `forward` consumes.
    type Input;
    /// What `forward` produces.
    type Output;

    /// The layer's parameters and buffers.
    fn registry(&self) -> &Registry;

    /// Mutable access to the layer's parameters and buffers.
    fn registry_mut(&mut self) -> &mut Registry;

    /// Runs the layer by applying its descriptor to `input` and its state.
    ///
    /// # Errors
    /// Whatever the descriptor reports.
    fn forward(&self, input: &Self::Input) -> Result<Self::Output>;

    /// One-line summary of the layer's configuration.
    fn describe(&self) -> String;

    /// See [`Registry::named_parameters`].
    fn named_parameters(&self) -> Vec<(&str, Slot<&Var>)> {
        self.registry().named_parameters()
    }

    /// See [`Registry::parameters`].
    fn parameters(&self) -> Vec<Var> {
        self.registry().parameters()
    }

    /// See [`Registry::num_parameters`].
    fn num_parameters(&self) -> usize {
        self.registry().num_parameters()
    }

    /// See [`Registry::zero_grad`].
    fn zero_grad(&self) {
        self.registry().zero_grad();
    }
}

/// Plain gradient descent: `p -= lr * p.grad` for every present parameter
/// that has a gradient, then clears all gradients.
pub fn sgd<L: Layer + ?Sized>(layer: &L, lr: f64) {
    for parameter in layer.parameters() {
        let Some(grad) = parameter.grad() else {
            continue;
        };
        let grad = grad.value();
        parameter.update_(|data| {
            for (w, g) in data.iter_mut().zip(&grad.data) {
                *w -= lr * g;
            }
        });
    }
    layer.zero_grad();
}
