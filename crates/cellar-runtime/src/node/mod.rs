//! This module defines the [Node], the header every heap-resident structure starts with.
//!
//! Node headers live in the node pool and never move, so a [NodeRef] stays valid for as long as
//! the node is alive. Small contents are stored inline in the header; anything larger lives in a
//! data block obtained from the size-class pools and is reallocated as the node grows.

use std::any::Any;
use std::mem::{self, size_of, MaybeUninit};
use std::ptr::{self, NonNull};
use std::slice;

use bitflags::bitflags;

use crate::action::Dispatcher;
use crate::cell::Cell;
use crate::error::{inconsistent, Result, RuntimeError};
use crate::heap::Heap;
use crate::pool::{Block, LIVE_BYTE};
use crate::symbol::Symbol;

pub mod series;

/// Bytes of content a node stores in its own header.
pub const INLINE_BYTES: usize = size_of::<Cell>();

/// Smallest capacity a node grows to once it has to grow at all.
pub const MIN_GROWTH: usize = 8;

/// Runs when a handle's resource is released or its node is collected.
pub type Cleaner = fn(Box<dyn Any>);

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct NodeFlags: u16 {
        /// Lifetime is decided by the collector.
        const MANAGED = 1 << 0;
        /// Reached during the current mark phase.
        const MARKED = 1 << 1;
        /// Children already traced during the current mark phase.
        const SCANNED = 1 << 2;
        const FROZEN = 1 << 3;
        /// Content lives in a separate data block.
        const DYNAMIC = 1 << 4;
        /// Content or resource was explicitly released.
        const RELEASED = 1 << 5;
        const FIXED_SIZE = 1 << 6;
    }
}

impl NodeFlags {
    /// Flags only the runtime sets; they are dropped from the flags passed to [Heap::make_node].
    const INTERNAL: NodeFlags = NodeFlags::MARKED
        .union(NodeFlags::SCANNED)
        .union(NodeFlags::DYNAMIC)
        .union(NodeFlags::RELEASED);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Flavor {
    Binary,
    /// UTF-8 bytes.
    Text,
    /// Symbols naming the slots of an object varlist.
    Keylist,
    Array,
    /// Exactly one cell, used by deeply quoted values.
    Pairing,
    /// Slot 0 is the archetype of the context, the rest are its variables.
    Varlist,
    /// Slot 0 is the action archetype, the rest are parameter cells.
    Paramlist,
    /// Slot 0 is the action archetype, the rest are dispatcher-specific details.
    Details,
    /// No content, only a host resource.
    Handle,
}

impl Flavor {
    pub fn width(self) -> usize {
        match self {
            Flavor::Binary | Flavor::Text | Flavor::Handle => 1,
            Flavor::Keylist => size_of::<Symbol>(),
            Flavor::Array
            | Flavor::Pairing
            | Flavor::Varlist
            | Flavor::Paramlist
            | Flavor::Details => size_of::<Cell>(),
        }
    }

    pub fn holds_cells(self) -> bool {
        matches!(
            self,
            Flavor::Array | Flavor::Pairing | Flavor::Varlist | Flavor::Paramlist | Flavor::Details
        )
    }
}

/// First back-reference slot of a node. The flavor decides which variant it carries.
pub enum Link {
    None,
    /// Source file of an array, as a text node. Traced.
    Filename(NodeRef),
    /// Keys of an object varlist. Traced.
    Keylist(NodeRef),
    /// Parameters of a details node or of a frame varlist. Traced.
    Paramlist(NodeRef),
    /// Host data of a handle. Not traced.
    Resource(Option<Box<dyn Any>>),
}

impl Link {
    pub fn traced(&self) -> Option<NodeRef> {
        match self {
            Link::Filename(node) | Link::Keylist(node) | Link::Paramlist(node) => Some(*node),
            Link::None | Link::Resource(_) => None,
        }
    }
}

/// Second back-reference slot of a node.
pub enum Misc {
    None,
    /// Source line of an array.
    Line(u32),
    /// Dispatcher of a details node and its metadata object. Only `meta` is traced.
    Action {
        dispatcher: std::cell::Cell<Dispatcher>,
        meta: Option<NodeRef>,
    },
    /// Cleanup for the resource of a handle.
    Cleaner(Option<Cleaner>),
}

impl Misc {
    pub fn traced(&self) -> Option<NodeRef> {
        match self {
            Misc::Action { meta, .. } => *meta,
            Misc::None | Misc::Line(_) | Misc::Cleaner(_) => None,
        }
    }
}

#[derive(Clone, Copy)]
#[repr(C, align(16))]
pub(crate) struct InlineBuf([MaybeUninit<u8>; INLINE_BYTES]);

impl InlineBuf {
    const fn new() -> Self {
        InlineBuf([MaybeUninit::uninit(); INLINE_BYTES])
    }
}

pub(crate) enum Content {
    Inline(InlineBuf),
    Dynamic(Block),
}

impl Content {
    fn bytes(&self) -> usize {
        match self {
            Content::Inline(_) => INLINE_BYTES,
            Content::Dynamic(block) => block.bytes,
        }
    }

    fn ptr(&self) -> *const u8 {
        match self {
            Content::Inline(buf) => buf.0.as_ptr().cast(),
            Content::Dynamic(block) => block.ptr.as_ptr(),
        }
    }

    fn ptr_mut(&mut self) -> *mut u8 {
        match self {
            Content::Inline(buf) => buf.0.as_mut_ptr().cast(),
            Content::Dynamic(block) => block.ptr.as_ptr(),
        }
    }
}

/// The header of a heap-resident structure. The marker byte must stay the first field: the
/// collector tells live node units from free ones by it.
#[repr(C)]
pub struct Node {
    marker: u8,
    flavor: Flavor,
    flags: NodeFlags,
    width: u32,
    len: usize,
    content: Content,
    pub(crate) link: Link,
    pub(crate) misc: Misc,
}

/// Identity of a live node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeRef(NonNull<Node>);

impl NodeRef {
    pub(crate) fn from_unit(unit: NonNull<u8>) -> Self {
        NodeRef(unit.cast())
    }

    pub(crate) fn unit(self) -> NonNull<u8> {
        self.0.cast()
    }

    /// Whether the unit still holds a live node. The unit may have been reused for another node.
    pub(crate) fn is_live(self) -> bool {
        unsafe { self.0.as_ptr().cast::<u8>().read() == LIVE_BYTE }
    }

    /// Placeholder for fields that are filled right after construction. Never dereferenced.
    pub(crate) fn dangling() -> Self {
        NodeRef(NonNull::dangling())
    }

    fn checked(self) -> NonNull<Node> {
        if !self.is_live() {
            inconsistent("access to a node that was already freed");
        }

        self.0
    }

    /// The flags field alone, for the collector.
    ///
    /// # Safety
    /// The node must be live and no reference to its header may be held across the write.
    pub(crate) unsafe fn flags_ptr(self) -> *mut NodeFlags {
        ptr::addr_of_mut!((*self.checked().as_ptr()).flags)
    }

    /// Nodes the two back-reference slots keep alive.
    ///
    /// # Safety
    /// The node must be live.
    pub(crate) unsafe fn traced_slots(self) -> (Option<NodeRef>, Option<NodeRef>) {
        let node = self.checked().as_ptr();
        let link = &*ptr::addr_of!((*node).link);
        let misc = &*ptr::addr_of!((*node).misc);
        (link.traced(), misc.traced())
    }

    /// Cells of the node without borrowing its header, or nothing when the node holds no cells.
    ///
    /// # Safety
    /// The node must be live and must not be mutated while the slice is alive.
    pub(crate) unsafe fn traced_cells<'a>(self) -> &'a [Cell] {
        let node = self.checked().as_ptr();
        let flavor = *ptr::addr_of!((*node).flavor);
        let flags = *ptr::addr_of!((*node).flags);

        if !flavor.holds_cells() || flags.contains(NodeFlags::RELEASED) {
            return &[];
        }

        let len = *ptr::addr_of!((*node).len);
        let content = &*ptr::addr_of!((*node).content);
        slice::from_raw_parts(content.ptr().cast(), len)
    }
}

impl Node {
    pub fn flavor(&self) -> Flavor {
        self.flavor
    }

    pub fn flags(&self) -> NodeFlags {
        self.flags
    }

    pub(crate) fn flags_mut(&mut self) -> &mut NodeFlags {
        &mut self.flags
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn width(&self) -> usize {
        self.width as usize
    }

    /// Elements that fit without reallocating.
    pub fn capacity(&self) -> usize {
        self.content.bytes() / self.width()
    }

    pub fn is_dynamic(&self) -> bool {
        self.flags.contains(NodeFlags::DYNAMIC)
    }

    pub fn is_frozen(&self) -> bool {
        self.flags.contains(NodeFlags::FROZEN)
    }

    pub fn is_released(&self) -> bool {
        self.flags.contains(NodeFlags::RELEASED)
    }

    pub fn is_managed(&self) -> bool {
        self.flags.contains(NodeFlags::MANAGED)
    }

    pub(crate) fn check_readable(&self) -> Result<()> {
        if self.is_released() {
            return Err(RuntimeError::Unavailable);
        }

        Ok(())
    }

    pub(crate) fn check_mutable(&self) -> Result<()> {
        self.check_readable()?;

        if self.is_frozen() {
            return Err(RuntimeError::FrozenSeries);
        }

        Ok(())
    }
}

impl Heap {
    pub fn node(&self, node: NodeRef) -> &Node {
        unsafe { &*node.checked().as_ptr() }
    }

    pub(crate) fn node_mut(&mut self, node: NodeRef) -> &mut Node {
        unsafe { &mut *node.checked().as_ptr() }
    }

    /// Creates a node able to hold `capacity` elements. Small capacities, zero included, are kept
    /// inline and do not allocate a data block.
    pub fn make_node(&mut self, flavor: Flavor, capacity: usize, flags: NodeFlags) -> NodeRef {
        let width = flavor.width();
        let bytes = capacity * width;

        let content = if bytes <= INLINE_BYTES {
            Content::Inline(InlineBuf::new())
        } else {
            Content::Dynamic(self.alloc_data(bytes))
        };

        let mut flags = flags - NodeFlags::INTERNAL;
        if matches!(content, Content::Dynamic(_)) {
            flags |= NodeFlags::DYNAMIC;
        }

        let pool = self.pools.node_pool();
        let unit = self.pools.alloc_unit(pool);
        let node = NodeRef::from_unit(unit);

        unsafe {
            node.0.as_ptr().write(Node {
                marker: LIVE_BYTE,
                flavor,
                flags,
                width: width as u32,
                len: 0,
                content,
                link: Link::None,
                misc: Misc::None,
            });
        }

        self.charge(self.pools.pool(pool).width());
        node
    }

    pub(crate) fn alloc_data(&mut self, bytes: usize) -> Block {
        let block = self.pools.alloc_block(bytes);
        self.charge(block.bytes);
        block
    }

    /// Makes room for at least `capacity` elements. Asking for no more than the current capacity
    /// changes nothing; asking for less than the current length is an error.
    pub fn grow(&mut self, node: NodeRef, capacity: usize) -> Result<()> {
        let target = self.node(node);
        target.check_mutable()?;

        let len = target.len;
        let width = target.width();

        if capacity < len {
            return Err(RuntimeError::BadCapacity {
                requested: capacity,
                len,
            });
        }

        if capacity <= target.capacity() {
            return Ok(());
        }

        if target.flags.contains(NodeFlags::FIXED_SIZE) {
            inconsistent("grow on a fixed-size node");
        }

        let bytes = capacity
            .checked_mul(width)
            .filter(|bytes| *bytes <= isize::MAX as usize)
            .ok_or(RuntimeError::BadCapacity {
                requested: capacity,
                len,
            })?;

        let block = self.alloc_data(bytes);
        self.move_content(node, Content::Dynamic(block));

        tracing::trace!(?node, capacity, "grew node");
        Ok(())
    }

    /// Grows geometrically so that `needed` elements fit.
    pub fn ensure_capacity(&mut self, node: NodeRef, needed: usize) -> Result<()> {
        let current = self.node(node).capacity();

        if needed <= current {
            return Ok(());
        }

        self.grow(node, needed.max(current * 2).max(MIN_GROWTH))
    }

    /// Moves the content into the smallest storage that still holds it.
    pub fn shrink_to_fit(&mut self, node: NodeRef) -> Result<()> {
        let target = self.node(node);
        target.check_mutable()?;

        if !target.is_dynamic() {
            return Ok(());
        }

        let needed = target.len * target.width();
        let current = target.content.bytes();

        if needed <= INLINE_BYTES {
            self.move_content(node, Content::Inline(InlineBuf::new()));
            return Ok(());
        }

        let fitting = match self.pools.class_for(needed) {
            Some(id) => self.pools.pool(id).width(),
            None => needed.div_ceil(crate::config::UNIT_ALIGN) * crate::config::UNIT_ALIGN,
        };

        if fitting < current {
            let block = self.alloc_data(needed);
            self.move_content(node, Content::Dynamic(block));
        }

        Ok(())
    }

    /// Copies the live elements into `content`, installs it and frees the previous block.
    fn move_content(&mut self, node: NodeRef, mut content: Content) {
        let target = self.node_mut(node);
        let bytes = target.len * target.width();

        unsafe { ptr::copy_nonoverlapping(target.content.ptr(), content.ptr_mut(), bytes) }

        target.flags.set(
            NodeFlags::DYNAMIC,
            matches!(content, Content::Dynamic(_)),
        );

        let old = mem::replace(&mut target.content, content);

        if let Content::Dynamic(block) = old {
            unsafe { self.pools.free_block(block) }
        }
    }

    /// Hands the node over to the collector.
    pub fn manage(&mut self, node: NodeRef) {
        self.node_mut(node).flags.insert(NodeFlags::MANAGED);
    }

    /// Frees a node that the collector does not track.
    pub fn free_unmanaged(&mut self, node: NodeRef) {
        if self.node(node).is_managed() {
            inconsistent("explicit free of a managed node");
        }

        self.free_node(node);
    }

    pub fn freeze_node(&mut self, node: NodeRef) {
        self.node_mut(node).flags.insert(NodeFlags::FROZEN);
    }

    pub fn is_frozen_node(&self, node: NodeRef) -> bool {
        self.node(node).is_frozen()
    }

    /// Drops the content and resource of a node while keeping the node itself, so that later
    /// accesses fail with [RuntimeError::Unavailable] instead of reading freed memory.
    pub fn release(&mut self, node: NodeRef) {
        if self.node(node).is_released() {
            return;
        }

        self.take_resources(node);
        self.node_mut(node).flags.insert(NodeFlags::RELEASED);

        tracing::debug!(?node, "released node");
    }

    /// Whether `node` still names a live unit of the node pool.
    pub fn is_live(&self, node: NodeRef) -> bool {
        self.pools.pool(self.pools.node_pool()).contains(node.unit()) && node.is_live()
    }

    fn take_resources(&mut self, node: NodeRef) {
        let target = self.node_mut(node);

        let content = mem::replace(&mut target.content, Content::Inline(InlineBuf::new()));
        target.flags.remove(NodeFlags::DYNAMIC);
        target.len = 0;

        let resource = match &mut target.link {
            Link::Resource(resource) => resource.take(),
            _ => None,
        };

        let cleaner = match target.misc {
            Misc::Cleaner(cleaner) => cleaner,
            _ => None,
        };

        if let Content::Dynamic(block) = content {
            unsafe { self.pools.free_block(block) }
        }

        match (resource, cleaner) {
            (Some(resource), Some(clean)) => clean(resource),
            (Some(resource), None) => drop(resource),
            (None, _) => {}
        }
    }

    /// Releases everything the node holds and returns its unit to the node pool.
    pub(crate) fn free_node(&mut self, node: NodeRef) {
        self.take_resources(node);

        unsafe {
            ptr::drop_in_place(node.checked().as_ptr());
            let pool = self.pools.node_pool();
            self.pools.free_unit(pool, node.unit());
        }

        tracing::trace!(?node, "freed node");
    }
}
