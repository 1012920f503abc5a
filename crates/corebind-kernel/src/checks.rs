//! Sanity checks run before every bind and unbind.
//!
//! Each check either passes or reports one specific [`BindError`]; none of
//! them mutates anything.  [`check_valid_binding`] runs the client and
//! server checks plus the rules that relate the two:
//!
//! | Rule | Error |
//! |---|---|
//! | Client slot exists, server interface is provided | `NotFound` |
//! | Required and provided interface types are equal | `IllegalBinding` |
//! | A static requirement only targets a singleton server | `IllegalBinding` |
//! | Slot is unbound, or already bound to this very singleton | `AlreadyBound` |
//! | Client is stopped, unless the requirement is optional or intrinsic | `NotStopped` |

use corebind_hal::ComponentInstance;
use corebind_types::{BindError, InterfaceDesc, ProvidedInterface, RequiredInterface};

use crate::interface_table::{InterfaceRefTable, RefTarget};

/// Outcome of a passing client check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientCheck {
    /// The slot may be bound.
    Proceed,
    /// The slot is already bound to the requested singleton; binding again
    /// only counts the extra client.
    SameSingletonTarget,
}

/// Outcome of a passing unbinding check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnbindCheck {
    Proceed,
    /// Optional requirement that is not bound; unbinding is a no-op.
    AlreadyUnbound,
}

/// The requirement `desc` names on `client`.
///
/// # Errors
///
/// [`BindError::NotFound`] when the slot or collection index does not exist.
pub fn requirement<'a>(
    client: &'a ComponentInstance,
    desc: &InterfaceDesc,
) -> Result<&'a RequiredInterface, BindError> {
    client
        .template
        .requires
        .get(desc.slot)
        .filter(|r| desc.index < r.collection_size && desc.component == client.id)
        .ok_or_else(|| BindError::NotFound(desc.to_string()))
}

/// Check that `desc` is a provided interface element of `server`.
pub fn check_valid_server<'a>(
    server: &'a ComponentInstance,
    desc: &InterfaceDesc,
) -> Result<&'a ProvidedInterface, BindError> {
    server
        .template
        .provides
        .get(desc.slot)
        .filter(|p| desc.index < p.collection_size && desc.component == server.id)
        .ok_or_else(|| BindError::NotFound(desc.to_string()))
}

/// Check that `desc` on `client` may be bound, optionally to `server`.
pub fn check_valid_client(
    client: &ComponentInstance,
    table: &InterfaceRefTable,
    desc: &InterfaceDesc,
    server: Option<(&ComponentInstance, &InterfaceDesc)>,
) -> Result<ClientCheck, BindError> {
    let required = requirement(client, desc)?;
    let entry = table
        .get(desc.slot, desc.index)
        .ok_or_else(|| BindError::NotFound(desc.to_string()))?;

    if entry.target.is_bound() {
        return match (&entry.target, server) {
            (RefTarget::Server(bound), Some((instance, wanted)))
                if bound == wanted && instance.template.is_singleton() =>
            {
                Ok(ClientCheck::SameSingletonTarget)
            }
            _ => Err(BindError::AlreadyBound(desc.to_string())),
        };
    }

    if !(required.optional || required.intrinsic) && !client.state().is_stopped() {
        return Err(BindError::NotStopped(client.id));
    }
    Ok(ClientCheck::Proceed)
}

/// Full check of a client → server binding.
pub fn check_valid_binding(
    client: &ComponentInstance,
    table: &InterfaceRefTable,
    client_desc: &InterfaceDesc,
    server: &ComponentInstance,
    server_desc: &InterfaceDesc,
) -> Result<ClientCheck, BindError> {
    let required = requirement(client, client_desc)?;
    let provided = check_valid_server(server, server_desc)?;

    if required.itf.name != provided.itf.name {
        return Err(BindError::IllegalBinding(format!(
            "{client_desc} requires {} but {server_desc} provides {}",
            required.itf.name, provided.itf.name
        )));
    }
    if required.is_static && !server.template.is_singleton() {
        return Err(BindError::IllegalBinding(format!(
            "static requirement {client_desc} can only target a singleton"
        )));
    }
    check_valid_client(client, table, client_desc, Some((server, server_desc)))
}

/// Check that `desc` on `client` may be unbound.
pub fn check_valid_unbinding(
    client: &ComponentInstance,
    table: &InterfaceRefTable,
    desc: &InterfaceDesc,
) -> Result<UnbindCheck, BindError> {
    let required = requirement(client, desc)?;
    let entry = table
        .get(desc.slot, desc.index)
        .ok_or_else(|| BindError::NotFound(desc.to_string()))?;
    // Only an optional singleton requirement may be unbound twice.
    let singleton_slot = required.optional && required.is_static;
    match (entry.target.is_bound(), singleton_slot) {
        (true, _) => Ok(UnbindCheck::Proceed),
        (false, true) => Ok(UnbindCheck::AlreadyUnbound),
        (false, false) => Err(BindError::NotFound(format!("{desc} is not bound"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface_table::{BindingPayload, InterfaceRef};
    use corebind_types::{
        ComponentClass, ComponentId, ComponentState, ComponentTemplate, InterfaceType, MemoryDomain,
        Priority, ProcessorId,
    };
    use std::sync::Arc;

    fn pcm() -> InterfaceType {
        InterfaceType::new("audio.pcm", &["open", "write"])
    }

    fn instance(id: u32, template: ComponentTemplate) -> ComponentInstance {
        let inst = ComponentInstance::new(
            ComponentId(id),
            template.name.clone(),
            Arc::new(template),
            MemoryDomain { id: 1, processor: ProcessorId(1) },
            Priority::Normal,
            0x100 * id,
            0xdead,
        );
        inst.set_state(ComponentState::Stopped);
        inst
    }

    fn client() -> ComponentInstance {
        instance(
            1,
            ComponentTemplate::new("mixer", ComponentClass::Ordinary)
                .requires(RequiredInterface::new("output", pcm()))
                .requires(RequiredInterface::new("monitor", pcm()).optional())
                .requires(RequiredInterface::new("clock", pcm()).static_binding())
                .requires(RequiredInterface::new("ctl", InterfaceType::new("ctl", &["set"])))
                .requires(RequiredInterface::new("ticker", pcm()).static_binding().optional()),
        )
    }

    fn server(class: ComponentClass) -> ComponentInstance {
        instance(
            2,
            ComponentTemplate::new("sink", class)
                .provides(ProvidedInterface::new("input", pcm(), 0x4000)),
        )
    }

    fn req(slot: usize, name: &str) -> InterfaceDesc {
        InterfaceDesc { component: ComponentId(1), slot, index: 0, name: name.into() }
    }

    fn prov() -> InterfaceDesc {
        InterfaceDesc { component: ComponentId(2), slot: 0, index: 0, name: "input".into() }
    }

    #[test]
    fn valid_binding_passes() {
        let c = client();
        let table = InterfaceRefTable::for_template(&c.template);
        let s = server(ComponentClass::Ordinary);
        let result = check_valid_binding(&c, &table, &req(0, "output"), &s, &prov());
        assert_eq!(result, Ok(ClientCheck::Proceed));
    }

    #[test]
    fn missing_slots_are_not_found() {
        let c = client();
        let table = InterfaceRefTable::for_template(&c.template);
        let s = server(ComponentClass::Ordinary);
        let bad_client = InterfaceDesc { index: 4, ..req(0, "output") };
        assert!(matches!(
            check_valid_binding(&c, &table, &bad_client, &s, &prov()),
            Err(BindError::NotFound(_))
        ));
        let bad_server = InterfaceDesc { slot: 3, ..prov() };
        assert!(matches!(
            check_valid_binding(&c, &table, &req(0, "output"), &s, &bad_server),
            Err(BindError::NotFound(_))
        ));
    }

    #[test]
    fn type_mismatch_is_illegal() {
        let c = client();
        let table = InterfaceRefTable::for_template(&c.template);
        let s = server(ComponentClass::Ordinary);
        assert!(matches!(
            check_valid_binding(&c, &table, &req(3, "ctl"), &s, &prov()),
            Err(BindError::IllegalBinding(_))
        ));
    }

    #[test]
    fn static_requirement_needs_singleton() {
        let c = client();
        let table = InterfaceRefTable::for_template(&c.template);
        let ordinary = server(ComponentClass::Ordinary);
        assert!(matches!(
            check_valid_binding(&c, &table, &req(2, "clock"), &ordinary, &prov()),
            Err(BindError::IllegalBinding(_))
        ));
        let singleton = server(ComponentClass::Singleton);
        assert!(check_valid_binding(&c, &table, &req(2, "clock"), &singleton, &prov()).is_ok());
    }

    #[test]
    fn running_client_is_not_stopped_unless_optional() {
        let c = client();
        c.set_state(ComponentState::Runnable);
        let table = InterfaceRefTable::for_template(&c.template);
        let s = server(ComponentClass::Ordinary);
        assert_eq!(
            check_valid_binding(&c, &table, &req(0, "output"), &s, &prov()),
            Err(BindError::NotStopped(ComponentId(1)))
        );
        assert!(check_valid_binding(&c, &table, &req(1, "monitor"), &s, &prov()).is_ok());
    }

    #[test]
    fn bound_slot_is_already_bound_except_same_singleton() {
        let c = client();
        let mut table = InterfaceRefTable::for_template(&c.template);
        table
            .set(
                &req(0, "output"),
                InterfaceRef {
                    target: RefTarget::Server(prov()),
                    binding: Some(BindingPayload::Synchronous),
                },
            )
            .unwrap();

        let ordinary = server(ComponentClass::Ordinary);
        assert!(matches!(
            check_valid_binding(&c, &table, &req(0, "output"), &ordinary, &prov()),
            Err(BindError::AlreadyBound(_))
        ));

        let singleton = server(ComponentClass::Singleton);
        assert_eq!(
            check_valid_binding(&c, &table, &req(0, "output"), &singleton, &prov()),
            Ok(ClientCheck::SameSingletonTarget)
        );
        // A void bind is never a same-target rebind.
        assert!(matches!(
            check_valid_client(&c, &table, &req(0, "output"), None),
            Err(BindError::AlreadyBound(_))
        ));
    }

    #[test]
    fn unbinding_rules() {
        let c = client();
        let mut table = InterfaceRefTable::for_template(&c.template);
        assert!(matches!(
            check_valid_unbinding(&c, &table, &req(0, "output")),
            Err(BindError::NotFound(_))
        ));
        assert_eq!(
            check_valid_unbinding(&c, &table, &req(4, "ticker")),
            Ok(UnbindCheck::AlreadyUnbound)
        );
        // Optional alone is not enough: the slot must be a singleton one.
        assert!(matches!(
            check_valid_unbinding(&c, &table, &req(1, "monitor")),
            Err(BindError::NotFound(_))
        ));
        table
            .set(
                &req(0, "output"),
                InterfaceRef { target: RefTarget::Void, binding: Some(BindingPayload::Void) },
            )
            .unwrap();
        assert_eq!(
            check_valid_unbinding(&c, &table, &req(0, "output")),
            Ok(UnbindCheck::Proceed)
        );
    }
}
