//! Mutably-insertable instruction streams with stable handles.
//!
//! An [`InstructionStream`] is an arena-backed doubly linked list: a
//! [`Handle`] addresses one instruction and stays valid across any number
//! of insertions before or after any other instruction. Instructions are
//! never removed, so a handle obtained during classification can be used
//! as an insertion anchor after arbitrary earlier rewrites.

use crate::instruction::Instruction;

/// Stable address of one instruction within a stream.
///
/// The `Default` handle addresses the first-allocated instruction; it is
/// only meaningful as a placeholder while decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Handle(u32);

impl Handle {
    /// Raw arena index, for diagnostics only.
    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone)]
struct Node {
    inst: Instruction,
    prev: Option<Handle>,
    next: Option<Handle>,
}

/// Ordered instruction sequence for one method body.
#[derive(Debug, Clone, Default)]
pub struct InstructionStream {
    nodes: Vec<Node>,
    head: Option<Handle>,
    tail: Option<Handle>,
}

impl InstructionStream {
    /// Create an empty stream.
    pub fn new() -> Self {
        InstructionStream::default()
    }

    fn alloc(&mut self, inst: Instruction) -> Handle {
        let h = Handle(self.nodes.len() as u32);
        self.nodes.push(Node {
            inst,
            prev: None,
            next: None,
        });
        h
    }

    fn node(&self, h: Handle) -> &Node {
        &self.nodes[h.0 as usize]
    }

    fn node_mut(&mut self, h: Handle) -> &mut Node {
        &mut self.nodes[h.0 as usize]
    }

    /// Append an instruction at the end of the stream.
    pub fn push_back(&mut self, inst: Instruction) -> Handle {
        let h = self.alloc(inst);
        match self.tail {
            Some(t) => {
                self.node_mut(t).next = Some(h);
                self.node_mut(h).prev = Some(t);
            }
            None => self.head = Some(h),
        }
        self.tail = Some(h);
        h
    }

    /// Insert an instruction immediately before `at`.
    ///
    /// `at` keeps addressing the same instruction afterwards.
    pub fn insert_before(&mut self, at: Handle, inst: Instruction) -> Handle {
        let h = self.alloc(inst);
        let prev = self.node(at).prev;
        self.node_mut(h).prev = prev;
        self.node_mut(h).next = Some(at);
        self.node_mut(at).prev = Some(h);
        match prev {
            Some(p) => self.node_mut(p).next = Some(h),
            None => self.head = Some(h),
        }
        h
    }

    /// Insert an instruction immediately after `at`.
    pub fn insert_after(&mut self, at: Handle, inst: Instruction) -> Handle {
        let h = self.alloc(inst);
        let next = self.node(at).next;
        self.node_mut(h).next = next;
        self.node_mut(h).prev = Some(at);
        self.node_mut(at).next = Some(h);
        match next {
            Some(n) => self.node_mut(n).prev = Some(h),
            None => self.tail = Some(h),
        }
        h
    }

    /// First instruction, if any.
    #[inline]
    pub fn first(&self) -> Option<Handle> {
        self.head
    }

    /// Last instruction, if any.
    #[inline]
    pub fn last(&self) -> Option<Handle> {
        self.tail
    }

    /// Successor of `h` in stream order.
    #[inline]
    pub fn next(&self, h: Handle) -> Option<Handle> {
        self.node(h).next
    }

    /// Predecessor of `h` in stream order.
    #[inline]
    pub fn prev(&self, h: Handle) -> Option<Handle> {
        self.node(h).prev
    }

    /// The instruction at `h`.
    #[inline]
    pub fn get(&self, h: Handle) -> &Instruction {
        &self.node(h).inst
    }

    /// Mutable access to the instruction at `h`.
    #[inline]
    pub fn get_mut(&mut self, h: Handle) -> &mut Instruction {
        &mut self.node_mut(h).inst
    }

    /// Number of instructions.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when the stream holds no instructions.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterate `(handle, instruction)` in stream order.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            stream: self,
            cursor: self.head,
        }
    }
}

/// In-order iterator over a stream.
pub struct Iter<'a> {
    stream: &'a InstructionStream,
    cursor: Option<Handle>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (Handle, &'a Instruction);

    fn next(&mut self) -> Option<Self::Item> {
        let h = self.cursor?;
        self.cursor = self.stream.next(h);
        Some((h, self.stream.get(h)))
    }
}
