//! [`ComponentInstance`] – a running unit of code on one processor – and the
//! per-call [`DispatchTable`] a client calls its required interfaces through.
//!
//! # Dispatch table layout
//!
//! A table holds one `this` word followed by one address word per method,
//! stored as 32-bit halves of 64-bit cells.  When the table starts on an
//! 8-byte boundary, `this` and the first method share cell 0 and are
//! replaced together by a single 64-bit store, so a concurrent caller reads
//! either the old pair or the new pair, never a mix.  Remaining methods are
//! written as 64-bit pairs in ascending order.
//!
//! An unaligned table puts `this` in the upper half of cell 0 and the first
//! method in cell 1.  The pair is then written with two stores and a caller
//! that races the rewrite may observe a torn pair; such clients must be
//! stopped before they are rebound.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use corebind_types::{
    BindError, ComponentId, ComponentState, ComponentTemplate, MemoryDomain, Priority, ProcessorId,
};
use parking_lot::Mutex;

// ────────────────────────────────────────────────────────────────────────────
// DispatchTable
// ────────────────────────────────────────────────────────────────────────────

/// Call-through table of one required interface element.
#[derive(Debug)]
pub struct DispatchTable {
    cells: Box<[AtomicU64]>,
    /// 0 when word 0 (`this`) starts a cell, 1 when it is the upper half.
    offset: usize,
    /// `1 + method count`.
    words: usize,
}

#[inline]
fn pack(low: u32, high: u32) -> u64 {
    (low as u64) | ((high as u64) << 32)
}

impl DispatchTable {
    /// An 8-byte aligned table for `methods` methods, every method pointing at
    /// `void_method` and `this` cleared.
    pub fn aligned(methods: usize, void_method: u32) -> Self {
        Self::with_offset(methods, void_method, 0)
    }

    /// A table that starts on a 4-byte boundary only.
    pub fn unaligned(methods: usize, void_method: u32) -> Self {
        Self::with_offset(methods, void_method, 1)
    }

    fn with_offset(methods: usize, void_method: u32, offset: usize) -> Self {
        let words = methods + 1;
        let cells = (words + offset).div_ceil(2);
        let table = Self {
            cells: (0..cells).map(|_| AtomicU64::new(0)).collect(),
            offset,
            words,
        };
        table.write(0, &vec![void_method; methods]);
        table
    }

    pub fn is_aligned(&self) -> bool {
        self.offset == 0
    }

    pub fn method_count(&self) -> usize {
        self.words - 1
    }

    /// Replace the whole binding: `this` and every method address.
    ///
    /// `methods` shorter than the table leaves trailing entries untouched;
    /// extra entries are ignored.
    pub fn write(&self, this: u32, methods: &[u32]) {
        let word = |w: usize| -> Option<u32> {
            if w == 0 {
                Some(this)
            } else {
                methods.get(w - 1).copied()
            }
        };
        for (c, cell) in self.cells.iter().enumerate() {
            let lo_word = (2 * c).checked_sub(self.offset);
            let hi_word = 2 * c + 1 - self.offset;
            let current = cell.load(Ordering::Acquire);
            let lo = match lo_word.filter(|&w| w < self.words).and_then(word) {
                Some(v) => v,
                None => current as u32,
            };
            let hi = match Some(hi_word).filter(|&w| w < self.words).and_then(word) {
                Some(v) => v,
                None => (current >> 32) as u32,
            };
            cell.store(pack(lo, hi), Ordering::Release);
        }
    }

    fn load_word(&self, w: usize) -> u32 {
        let p = w + self.offset;
        let cell = self.cells[p / 2].load(Ordering::Acquire);
        if p % 2 == 0 { cell as u32 } else { (cell >> 32) as u32 }
    }

    pub fn this(&self) -> u32 {
        self.load_word(0)
    }

    pub fn method(&self, index: usize) -> Option<u32> {
        (index + 1 < self.words).then(|| self.load_word(index + 1))
    }

    /// Read `this` and the first method the way a caller does.  On an
    /// aligned table this is a single 64-bit load.
    pub fn head(&self) -> (u32, Option<u32>) {
        if self.offset == 0 {
            let cell = self.cells[0].load(Ordering::Acquire);
            let first = (self.words > 1).then_some((cell >> 32) as u32);
            (cell as u32, first)
        } else {
            (self.this(), self.method(0))
        }
    }

    pub fn methods(&self) -> Vec<u32> {
        (1..self.words).map(|w| self.load_word(w)).collect()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// ComponentInstance
// ────────────────────────────────────────────────────────────────────────────

/// A component instantiated by the loader on one processor.
///
/// Owned by the component table of whichever loader created it; the binder
/// only holds [`ComponentId`] handles and reaches the instance through the
/// [`Loader`][crate::loader::Loader].
#[derive(Debug)]
pub struct ComponentInstance {
    pub id: ComponentId,
    pub name: String,
    pub template: Arc<ComponentTemplate>,
    pub domain: MemoryDomain,
    pub priority: Priority,
    /// "this" handle, meaningful only on the owning processor.
    pub this: u32,
    state: Mutex<ComponentState>,
    attributes: Mutex<BTreeMap<String, u32>>,
    /// `dispatch[slot][index]`, one table per required interface element.
    dispatch: Vec<Vec<DispatchTable>>,
}

impl ComponentInstance {
    /// Build an instance whose dispatch tables all point at `void_method`.
    pub fn new(
        id: ComponentId,
        name: impl Into<String>,
        template: Arc<ComponentTemplate>,
        domain: MemoryDomain,
        priority: Priority,
        this: u32,
        void_method: u32,
    ) -> Self {
        let dispatch = template
            .requires
            .iter()
            .map(|r| {
                (0..r.collection_size)
                    .map(|_| DispatchTable::aligned(r.itf.method_count(), void_method))
                    .collect()
            })
            .collect();
        let attributes = Mutex::new(template.attributes.clone());
        Self {
            id,
            name: name.into(),
            template,
            domain,
            priority,
            this,
            state: Mutex::new(ComponentState::Instantiated),
            attributes,
            dispatch,
        }
    }

    pub fn processor(&self) -> ProcessorId {
        self.domain.processor
    }

    pub fn state(&self) -> ComponentState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: ComponentState) {
        *self.state.lock() = state;
    }

    pub fn attribute(&self, name: &str) -> Option<u32> {
        self.attributes.lock().get(name).copied()
    }

    /// Write an attribute the template declares.
    ///
    /// # Errors
    ///
    /// [`BindError::NotFound`] when the template publishes no such attribute.
    pub fn set_attribute(&self, name: &str, value: u32) -> Result<(), BindError> {
        match self.attributes.lock().get_mut(name) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(BindError::NotFound(format!("{}.{name}", self.name))),
        }
    }

    pub fn dispatch(&self, slot: usize, index: usize) -> Option<&DispatchTable> {
        self.dispatch.get(slot).and_then(|s| s.get(index))
    }

    /// Resolved method addresses of provided interface `slot`, element `index`.
    pub fn provided_methods(&self, slot: usize, index: usize) -> Option<&[u32]> {
        self.template.provides.get(slot).and_then(|p| p.methods(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corebind_types::{ComponentClass, InterfaceType, ProvidedInterface, RequiredInterface};
    use std::sync::atomic::AtomicBool;
    use std::thread;

    const VOID: u32 = 0xdead_0000;

    #[test]
    fn fresh_table_points_at_void() {
        let t = DispatchTable::aligned(3, VOID);
        assert_eq!(t.this(), 0);
        assert_eq!(t.methods(), vec![VOID; 3]);
        assert_eq!(t.head(), (0, Some(VOID)));
    }

    #[test]
    fn write_replaces_every_word() {
        for table in [DispatchTable::aligned(4, VOID), DispatchTable::unaligned(4, VOID)] {
            table.write(0x10, &[1, 2, 3, 4]);
            assert_eq!(table.this(), 0x10);
            assert_eq!(table.methods(), vec![1, 2, 3, 4]);
            assert_eq!(table.method(4), None);
        }
    }

    #[test]
    fn methodless_interface_only_has_this() {
        let t = DispatchTable::aligned(0, VOID);
        t.write(7, &[]);
        assert_eq!(t.head(), (7, None));
        assert_eq!(t.method_count(), 0);
    }

    #[test]
    fn aligned_head_is_never_torn() {
        let table = Arc::new(DispatchTable::aligned(5, VOID));
        let old = (0x100, [0xa0, 0xa4, 0xa8, 0xac, 0xb0]);
        let new = (0x200, [0xc0, 0xc4, 0xc8, 0xcc, 0xd0]);
        table.write(old.0, &old.1);

        let stop = Arc::new(AtomicBool::new(false));
        let reader = {
            let table = table.clone();
            let stop = stop.clone();
            thread::spawn(move || {
                let mut samples = 0u64;
                while !stop.load(Ordering::Relaxed) {
                    let head = table.head();
                    assert!(
                        head == (old.0, Some(old.1[0])) || head == (new.0, Some(new.1[0])),
                        "torn head observed: {head:x?}"
                    );
                    samples += 1;
                }
                samples
            })
        };

        for i in 0..20_000 {
            if i % 2 == 0 {
                table.write(new.0, &new.1);
            } else {
                table.write(old.0, &old.1);
            }
        }
        stop.store(true, Ordering::Relaxed);
        assert!(reader.join().unwrap() > 0);
    }

    #[test]
    fn instance_tables_follow_template() {
        let itf = InterfaceType::new("pcm", &["open", "close"]);
        let template = Arc::new(
            ComponentTemplate::new("mixer", ComponentClass::Ordinary)
                .requires(RequiredInterface::new("out", itf.clone()).collection(2))
                .provides(ProvidedInterface::new("in", itf, 0x4000))
                .attribute("fifo", 0),
        );
        let domain = MemoryDomain { id: 1, processor: ProcessorId(1) };
        let inst = ComponentInstance::new(ComponentId(1), "m", template, domain, Priority::Normal, 0x99, VOID);

        assert_eq!(inst.processor(), ProcessorId(1));
        assert_eq!(inst.state(), ComponentState::Instantiated);
        assert!(inst.dispatch(0, 1).is_some());
        assert!(inst.dispatch(0, 2).is_none());
        assert_eq!(inst.provided_methods(0, 0), Some(&[0x4000, 0x4004][..]));

        inst.set_attribute("fifo", 0x8000).unwrap();
        assert_eq!(inst.attribute("fifo"), Some(0x8000));
        assert!(matches!(inst.set_attribute("nope", 1), Err(BindError::NotFound(_))));
    }
}
