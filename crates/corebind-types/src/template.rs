//! Immutable component templates.
//!
//! A template is produced by the component loader from a binary image; the
//! binder only reads it.  Method addresses are device addresses on the
//! processor the template was loaded for.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::conventions::{
    self, DESCRIPTOR_SIZE_ATTR, EVENT_SIZE_ATTR, FIFO_ADDRESS_ATTR, FIFO_PARAM_SIZE_ATTR,
    HELPER_INTERFACE,
};

/// Class tag carried by every template.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComponentClass {
    #[default]
    Ordinary,
    /// One process-wide instance, bound by many logical clients.
    Singleton,
    /// Part of the processor firmware; never loaded or unloaded.
    Firmware,
}

/// An interface type: a name and the ordered list of its methods.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceType {
    pub name: String,
    pub methods: Vec<String>,
}

impl InterfaceType {
    pub fn new(name: impl Into<String>, methods: &[&str]) -> Self {
        Self {
            name: name.into(),
            methods: methods.iter().map(|m| m.to_string()).collect(),
        }
    }

    pub fn method_count(&self) -> usize {
        self.methods.len()
    }
}

/// A required interface declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredInterface {
    pub name: String,
    pub itf: InterfaceType,
    /// Number of elements for array-typed requirements (1 otherwise).
    pub collection_size: usize,
    /// The component tolerates this requirement being unbound, and it may be
    /// rewired while the component runs.
    pub optional: bool,
    /// Bound once for the lifetime of the component; only singletons may
    /// serve it.
    pub is_static: bool,
    /// Wired by the engine itself; may be rewired while running.
    pub intrinsic: bool,
}

impl RequiredInterface {
    pub fn new(name: impl Into<String>, itf: InterfaceType) -> Self {
        Self {
            name: name.into(),
            itf,
            collection_size: 1,
            optional: false,
            is_static: false,
            intrinsic: false,
        }
    }

    pub fn collection(mut self, size: usize) -> Self {
        self.collection_size = size.max(1);
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn static_binding(mut self) -> Self {
        self.is_static = true;
        self
    }

    pub fn intrinsic(mut self) -> Self {
        self.intrinsic = true;
        self
    }
}

/// A provided interface declaration with its resolved method addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvidedInterface {
    pub name: String,
    pub itf: InterfaceType,
    pub collection_size: usize,
    /// `method_addresses[index][method]`.
    pub method_addresses: Vec<Vec<u32>>,
}

impl ProvidedInterface {
    /// Declare a single-element provided interface whose methods are laid out
    /// consecutively from `base`.
    pub fn new(name: impl Into<String>, itf: InterfaceType, base: u32) -> Self {
        let addresses = method_layout(&itf, base);
        Self {
            name: name.into(),
            itf,
            collection_size: 1,
            method_addresses: vec![addresses],
        }
    }

    /// Turn this interface into a collection of `size` elements, each with
    /// its own method table.
    pub fn collection(mut self, size: usize) -> Self {
        let size = size.max(1);
        let base = self
            .method_addresses
            .first()
            .and_then(|m| m.first().copied())
            .unwrap_or(0);
        self.method_addresses = (0..size)
            .map(|i| method_layout(&self.itf, base + (i as u32) * 0x100))
            .collect();
        self.collection_size = size;
        self
    }

    pub fn methods(&self, index: usize) -> Option<&[u32]> {
        self.method_addresses.get(index).map(Vec::as_slice)
    }
}

fn method_layout(itf: &InterfaceType, base: u32) -> Vec<u32> {
    (0..itf.method_count() as u32).map(|m| base + m * 4).collect()
}

/// Immutable descriptor of a loadable component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentTemplate {
    pub name: String,
    pub class: ComponentClass,
    pub requires: Vec<RequiredInterface>,
    pub provides: Vec<ProvidedInterface>,
    /// Attribute defaults published by the template (sizes, FIFO address
    /// slots, …).  Instances get a private mutable copy.
    pub attributes: BTreeMap<String, u32>,
}

impl ComponentTemplate {
    pub fn new(name: impl Into<String>, class: ComponentClass) -> Self {
        Self {
            name: name.into(),
            class,
            requires: Vec::new(),
            provides: Vec::new(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn requires(mut self, itf: RequiredInterface) -> Self {
        self.requires.push(itf);
        self
    }

    pub fn provides(mut self, itf: ProvidedInterface) -> Self {
        self.provides.push(itf);
        self
    }

    pub fn attribute(mut self, name: impl Into<String>, value: u32) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    pub fn is_singleton(&self) -> bool {
        self.class == ComponentClass::Singleton
    }

    pub fn required_slot(&self, name: &str) -> Option<usize> {
        self.requires.iter().position(|r| r.name == name)
    }

    pub fn provided_slot(&self, name: &str) -> Option<usize> {
        self.provides.iter().position(|p| p.name == name)
    }

    // ────────────────────────────────────────────────────────────────────
    // Helper templates, as the proxy generator would emit them
    // ────────────────────────────────────────────────────────────────────

    /// Trace proxy for `itf`: requires and provides [`HELPER_INTERFACE`].
    pub fn trace_helper(itf: &InterfaceType, base: u32) -> Self {
        Self::new(conventions::trace_template_name(&itf.name), ComponentClass::Ordinary)
            .requires(RequiredInterface::new(HELPER_INTERFACE, itf.clone()))
            .provides(ProvidedInterface::new(HELPER_INTERFACE, itf.clone(), base))
    }

    /// Event helper for `itf`, publishing `event_size` payload words.
    pub fn event_helper(itf: &InterfaceType, base: u32, event_size: u32) -> Self {
        Self::new(conventions::event_template_name(&itf.name), ComponentClass::Ordinary)
            .requires(RequiredInterface::new(HELPER_INTERFACE, itf.clone()))
            .provides(ProvidedInterface::new(HELPER_INTERFACE, itf.clone(), base))
            .attribute(EVENT_SIZE_ATTR, event_size)
    }

    /// Client-side stub for `itf`, marshalling `param_size` words per call.
    pub fn stub(itf: &InterfaceType, base: u32, param_size: u32) -> Self {
        Self::new(conventions::stub_template_name(&itf.name), ComponentClass::Ordinary)
            .provides(ProvidedInterface::new(HELPER_INTERFACE, itf.clone(), base))
            .attribute(FIFO_PARAM_SIZE_ATTR, param_size)
            .attribute(FIFO_ADDRESS_ATTR, 0)
    }

    /// Client-side stub that marshals towards a foreign ABI described by a
    /// `descriptor_size`-word descriptor.
    pub fn foreign_stub(itf: &InterfaceType, base: u32, param_size: u32, descriptor_size: u32) -> Self {
        Self::stub(itf, base, param_size).attribute(DESCRIPTOR_SIZE_ATTR, descriptor_size)
    }

    /// Server-side skeleton for `itf`.
    pub fn skeleton(itf: &InterfaceType, base: u32, param_size: u32) -> Self {
        Self::new(conventions::skeleton_template_name(&itf.name), ComponentClass::Ordinary)
            .requires(RequiredInterface::new(HELPER_INTERFACE, itf.clone()))
            .provides(ProvidedInterface::new(HELPER_INTERFACE, itf.clone(), base))
            .attribute(FIFO_PARAM_SIZE_ATTR, param_size)
            .attribute(EVENT_SIZE_ATTR, param_size)
            .attribute(FIFO_ADDRESS_ATTR, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm() -> InterfaceType {
        InterfaceType::new("audio.pcm", &["open", "write", "close"])
    }

    #[test]
    fn provided_methods_are_laid_out_from_base() {
        let p = ProvidedInterface::new("pcm", pcm(), 0x1000);
        assert_eq!(p.methods(0), Some(&[0x1000, 0x1004, 0x1008][..]));
        assert_eq!(p.methods(1), None);
    }

    #[test]
    fn collection_gives_each_element_its_own_table() {
        let p = ProvidedInterface::new("pcm", pcm(), 0x1000).collection(2);
        assert_eq!(p.collection_size, 2);
        assert_eq!(p.methods(1), Some(&[0x1100, 0x1104, 0x1108][..]));
    }

    #[test]
    fn slot_lookup_by_name() {
        let t = ComponentTemplate::new("mixer", ComponentClass::Ordinary)
            .requires(RequiredInterface::new("out", pcm()))
            .requires(RequiredInterface::new("log", pcm()).optional())
            .provides(ProvidedInterface::new("in", pcm(), 0x2000));
        assert_eq!(t.required_slot("log"), Some(1));
        assert_eq!(t.provided_slot("in"), Some(0));
        assert_eq!(t.required_slot("in"), None);
        assert!(!t.is_singleton());
    }

    #[test]
    fn helper_templates_follow_naming_convention() {
        let itf = pcm();
        assert_eq!(ComponentTemplate::trace_helper(&itf, 0).name, "_tr.audio.pcm");
        assert_eq!(ComponentTemplate::event_helper(&itf, 0, 4).name, "_ev.audio.pcm");
        let stub = ComponentTemplate::stub(&itf, 0, 6);
        assert_eq!(stub.name, "_st.audio.pcm");
        assert_eq!(stub.attributes.get(FIFO_PARAM_SIZE_ATTR), Some(&6));
        assert_eq!(ComponentTemplate::skeleton(&itf, 0, 6).name, "_sk.audio.pcm");
    }
}
