//! Mark-sweep collector over a handle arena.
//!
//! Heap objects live in `slots`, addressed by stable [`Handle`]s. The allocation
//! pool is a dense list with one entry per live object; sweeping compacts it by
//! moving the last entry into each freed position.

use super::object::{ClassRef, Object};
use super::VmError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(u32);

impl Handle {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HeapObject {
    Str(Box<[u8]>),
    Instance { class: ClassRef, members: Vec<Object> },
}

#[derive(Debug)]
struct Slot {
    object: HeapObject,
    pool_index: usize,
}

#[derive(Debug, Clone, Copy)]
struct PoolEntry {
    handle: Handle,
    marked: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcStats {
    pub collections: usize,
    pub freed: usize,
    pub allocated: usize,
}

#[derive(Debug)]
pub struct Heap {
    slots: Vec<Option<Slot>>,
    free: Vec<u32>,
    pool: Vec<PoolEntry>,
    capacity: usize,
    threshold: usize,
    stats: GcStats,
}

impl Heap {
    pub fn new(capacity: usize, threshold: usize) -> Self {
        Heap {
            slots: Vec::new(),
            free: Vec::new(),
            pool: Vec::new(),
            capacity,
            threshold: threshold.min(capacity),
            stats: GcStats::default(),
        }
    }

    /// Number of objects in the allocation pool.
    pub fn live(&self) -> usize {
        self.pool.len()
    }

    pub fn stats(&self) -> GcStats {
        self.stats
    }

    /// Registers a new object. Collects first when the pool has reached the
    /// threshold; fails if it is still full afterwards.
    pub fn alloc(&mut self, object: HeapObject, roots: &[Object]) -> Result<Handle, VmError> {
        if self.pool.len() >= self.threshold {
            self.collect(roots);
        }
        if self.pool.len() >= self.capacity {
            return Err(VmError::OutOfMemory { capacity: self.capacity });
        }

        let pool_index = self.pool.len();
        let slot = Slot { object, pool_index };
        let handle = match self.free.pop() {
            Some(index) => {
                self.slots[index as usize] = Some(slot);
                Handle(index)
            }
            None => {
                self.slots.push(Some(slot));
                Handle((self.slots.len() - 1) as u32)
            }
        };
        self.pool.push(PoolEntry { handle, marked: false });
        self.stats.allocated += 1;
        Ok(handle)
    }

    pub fn get(&self, handle: Handle) -> Option<&HeapObject> {
        self.slots.get(handle.index())?.as_ref().map(|s| &s.object)
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut HeapObject> {
        self.slots.get_mut(handle.index())?.as_mut().map(|s| &mut s.object)
    }

    pub fn string(&self, handle: Handle) -> Option<&[u8]> {
        match self.get(handle)? {
            HeapObject::Str(bytes) => Some(bytes),
            HeapObject::Instance { .. } => None,
        }
    }

    pub fn instance(&self, handle: Handle) -> Option<(ClassRef, &[Object])> {
        match self.get(handle)? {
            HeapObject::Instance { class, members } => Some((*class, members)),
            HeapObject::Str(_) => None,
        }
    }

    pub fn instance_members_mut(&mut self, handle: Handle) -> Option<&mut Vec<Object>> {
        match self.get_mut(handle)? {
            HeapObject::Instance { members, .. } => Some(members),
            HeapObject::Str(_) => None,
        }
    }

    /// Marks everything reachable from `roots` and frees the rest. Returns the
    /// number of objects freed.
    pub fn collect(&mut self, roots: &[Object]) -> usize {
        let before = self.pool.len();
        let marked = self.mark(roots);
        let freed = self.sweep();
        self.stats.collections += 1;
        self.stats.freed += freed;
        log::debug!(
            "gc #{}: {before} objects, {marked} reachable, {freed} freed",
            self.stats.collections
        );
        freed
    }

    fn mark(&mut self, roots: &[Object]) -> usize {
        let mut work: Vec<Handle> = Vec::new();
        for root in roots {
            push_refs(root, &mut work);
        }

        let mut marked = 0;
        while let Some(handle) = work.pop() {
            let Some(slot) = self.slots.get(handle.index()).and_then(Option::as_ref) else {
                continue;
            };
            let entry = &mut self.pool[slot.pool_index];
            if entry.marked {
                continue;
            }
            entry.marked = true;
            marked += 1;
            if let HeapObject::Instance { members, .. } = &slot.object {
                for member in members {
                    push_refs(member, &mut work);
                }
            }
        }
        marked
    }

    fn sweep(&mut self) -> usize {
        let mut freed = 0;
        let mut i = 0;
        while i < self.pool.len() {
            if self.pool[i].marked {
                self.pool[i].marked = false;
                i += 1;
                continue;
            }
            let dead = self.pool.swap_remove(i);
            self.slots[dead.handle.index()] = None;
            self.free.push(dead.handle.0);
            freed += 1;
            // The former last entry now sits at `i` and is examined next.
            if let Some(moved) = self.pool.get(i) {
                if let Some(slot) = self.slots[moved.handle.index()].as_mut() {
                    slot.pool_index = i;
                }
            }
        }
        freed
    }
}

/// Queues the heap objects a value refers to, following bound-method receivers.
fn push_refs(object: &Object, work: &mut Vec<Handle>) {
    let mut current = object;
    loop {
        match current {
            Object::Method(bound) => current = &bound.receiver,
            other => {
                work.extend(other.handle());
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::bytecode::Callee;
    use crate::vm::object::{BoundMethod, FunctionRef, StrRef};

    fn string(text: &str) -> HeapObject {
        HeapObject::Str(text.as_bytes().into())
    }

    fn instance(members: Vec<Object>) -> HeapObject {
        HeapObject::Instance { class: ClassRef(4), members }
    }

    /// Every pool entry's slot points back at it.
    fn assert_consistent(heap: &Heap) {
        for (i, entry) in heap.pool.iter().enumerate() {
            let slot = heap.slots[entry.handle.index()].as_ref().unwrap();
            assert_eq!(slot.pool_index, i);
            assert!(!entry.marked);
        }
    }

    #[test]
    fn unreachable_objects_are_freed() {
        let mut heap = Heap::new(16, 16);
        let kept = heap.alloc(string("kept"), &[]).unwrap();
        heap.alloc(string("lost"), &[]).unwrap();
        heap.alloc(string("lost too"), &[]).unwrap();

        let roots = [Object::String(StrRef::Heap(kept))];
        assert_eq!(heap.collect(&roots), 2);
        assert_eq!(heap.live(), 1);
        assert_eq!(heap.string(kept), Some(&b"kept"[..]));
        assert_consistent(&heap);
    }

    #[test]
    fn instances_keep_their_members_alive() {
        let mut heap = Heap::new(16, 16);
        let name = heap.alloc(string("inner"), &[]).unwrap();
        let child = heap.alloc(instance(vec![Object::String(StrRef::Heap(name))]), &[]).unwrap();
        let parent = heap.alloc(instance(vec![Object::Instance(child), Object::Number(1)]), &[]).unwrap();
        heap.alloc(string("garbage"), &[]).unwrap();

        let freed = heap.collect(&[Object::Instance(parent)]);
        assert_eq!(freed, 1);
        assert_eq!(heap.live(), 3);
        assert!(heap.string(name).is_some());
        assert_consistent(&heap);
    }

    #[test]
    fn cycles_are_collected_when_unreachable() {
        let mut heap = Heap::new(16, 16);
        let a = heap.alloc(instance(vec![Object::NONE]), &[]).unwrap();
        let b = heap.alloc(instance(vec![Object::Instance(a)]), &[]).unwrap();
        heap.instance_members_mut(a).unwrap()[0] = Object::Instance(b);

        assert_eq!(heap.collect(&[Object::Instance(a)]), 0);
        assert_eq!(heap.collect(&[]), 2);
        assert_eq!(heap.live(), 0);
    }

    #[test]
    fn bound_method_receiver_is_a_root() {
        let mut heap = Heap::new(16, 16);
        let receiver = heap.alloc(instance(Vec::new()), &[]).unwrap();
        let method = Object::Method(Rc::new(BoundMethod {
            function: FunctionRef { callee: Callee::User { entry: 0 }, arity: 1 },
            receiver: Object::Instance(receiver),
        }));
        assert_eq!(heap.collect(&[method]), 0);
        assert_eq!(heap.live(), 1);
    }

    #[test]
    fn sweep_examines_the_moved_entry() {
        let mut heap = Heap::new(16, 16);
        let handles: Vec<Handle> = (0..6).map(|i| heap.alloc(string(&i.to_string()), &[]).unwrap()).collect();
        // Free the first entry and the last two, so the last entry is both moved and dead.
        let roots: Vec<Object> = handles[1..4].iter().map(|h| Object::String(StrRef::Heap(*h))).collect();
        assert_eq!(heap.collect(&roots), 3);
        assert_eq!(heap.live(), 3);
        for h in &handles[1..4] {
            assert!(heap.get(*h).is_some());
        }
        assert_consistent(&heap);
    }

    #[test]
    fn threshold_triggers_collection_and_capacity_is_enforced() {
        let mut heap = Heap::new(3, 2);
        heap.alloc(string("a"), &[]).unwrap();
        heap.alloc(string("b"), &[]).unwrap();
        // Reaching the threshold collects both unrooted strings first.
        let c = heap.alloc(string("c"), &[]).unwrap();
        assert_eq!(heap.stats().collections, 1);
        assert_eq!(heap.live(), 1);

        let roots = [Object::String(StrRef::Heap(c))];
        let d = heap.alloc(string("d"), &roots).unwrap();
        let roots = [Object::String(StrRef::Heap(c)), Object::String(StrRef::Heap(d))];
        let e = heap.alloc(string("e"), &roots).unwrap();
        let roots = [
            Object::String(StrRef::Heap(c)),
            Object::String(StrRef::Heap(d)),
            Object::String(StrRef::Heap(e)),
        ];
        assert!(matches!(heap.alloc(string("f"), &roots), Err(VmError::OutOfMemory { capacity: 3 })));
    }

    #[test]
    fn freed_handles_are_reused() {
        let mut heap = Heap::new(4, 4);
        let first = heap.alloc(string("x"), &[]).unwrap();
        heap.collect(&[]);
        let second = heap.alloc(string("y"), &[]).unwrap();
        assert_eq!(first, second);
        assert_eq!(heap.string(second), Some(&b"y"[..]));
    }
}
