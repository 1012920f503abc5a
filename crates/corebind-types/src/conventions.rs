//! Naming conventions shared by the binder and generated helper components.
//!
//! Helper templates are looked up by prefixing the interface type name, e.g.
//! the trace proxy for `audio.api.pcm` is `_tr.audio.api.pcm`.  Helpers
//! publish sizing information through well-known attributes.

/// Template prefix of trace (instrumentation) helpers.
pub const TRACE_PREFIX: &str = "_tr.";
/// Template prefix of asynchronous event helpers.
pub const EVENT_PREFIX: &str = "_ev.";
/// Template prefix of distributed client-side stubs.
pub const STUB_PREFIX: &str = "_st.";
/// Template prefix of distributed server-side skeletons.
pub const SKELETON_PREFIX: &str = "_sk.";

/// Interface name every helper uses for both its outward requirement and its
/// provided entry point.
pub const HELPER_INTERFACE: &str = "target";

/// Event payload size, in words, published by event helpers and skeletons.
pub const EVENT_SIZE_ATTR: &str = "event_size";
/// Param FIFO element size, in words, published by stubs and skeletons.
pub const FIFO_PARAM_SIZE_ATTR: &str = "fifo_param_size";
/// Attribute slot a stub or skeleton reads its FIFO device address from.
pub const FIFO_ADDRESS_ATTR: &str = "fifo";
/// Size of the marshalling descriptor of proxies that speak a foreign ABI.
pub const DESCRIPTOR_SIZE_ATTR: &str = "descriptor_size";

pub fn trace_template_name(type_name: &str) -> String {
    format!("{TRACE_PREFIX}{type_name}")
}

pub fn event_template_name(type_name: &str) -> String {
    format!("{EVENT_PREFIX}{type_name}")
}

pub fn stub_template_name(type_name: &str) -> String {
    format!("{STUB_PREFIX}{type_name}")
}

pub fn skeleton_template_name(type_name: &str) -> String {
    format!("{SKELETON_PREFIX}{type_name}")
}
