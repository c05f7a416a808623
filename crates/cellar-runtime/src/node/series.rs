//! Element access on nodes, and the series operations values expose on top of it.

use std::slice;

use super::{Flavor, Link, Misc, Node, NodeRef};
use crate::cell::{Binding, Cell, CellFlags, Kind, Layout, Value};
use crate::error::{inconsistent, Result, RuntimeError};
use crate::heap::Heap;
use crate::symbol::Symbol;

impl Node {
    pub fn bytes(&self) -> Result<&[u8]> {
        self.check_readable()?;
        self.expect_width(1);
        Ok(unsafe { slice::from_raw_parts(self.content.ptr(), self.len) })
    }

    pub fn cells(&self) -> Result<&[Cell]> {
        self.check_readable()?;
        self.expect_cells();
        Ok(unsafe { slice::from_raw_parts(self.content.ptr().cast(), self.len) })
    }

    pub fn cells_mut(&mut self) -> Result<&mut [Cell]> {
        self.check_mutable()?;
        Ok(self.cells_unguarded())
    }

    /// Cells of a node the runtime owns, such as a frame or the details of an action. Ignores
    /// the frozen bit.
    pub(crate) fn cells_unguarded(&mut self) -> &mut [Cell] {
        self.expect_cells();
        unsafe { slice::from_raw_parts_mut(self.content.ptr_mut().cast(), self.len) }
    }

    pub fn symbols(&self) -> Result<&[Symbol]> {
        self.check_readable()?;

        if self.flavor != Flavor::Keylist {
            inconsistent("symbols read from a node that is not a keylist");
        }

        Ok(unsafe { slice::from_raw_parts(self.content.ptr().cast(), self.len) })
    }

    /// Appends one cell. Capacity must already be there.
    pub(crate) fn push_cell(&mut self, cell: Cell) {
        self.expect_cells();
        self.expect_room(1);

        unsafe {
            self.content
                .ptr_mut()
                .cast::<Cell>()
                .add(self.len)
                .write(cell)
        }

        self.len += 1;
    }

    pub(crate) fn push_bytes(&mut self, bytes: &[u8]) {
        self.expect_width(1);
        self.expect_room(bytes.len());

        unsafe {
            self.content
                .ptr_mut()
                .add(self.len)
                .copy_from_nonoverlapping(bytes.as_ptr(), bytes.len())
        }

        self.len += bytes.len();
    }

    pub(crate) fn push_symbol(&mut self, symbol: Symbol) {
        self.expect_room(1);

        unsafe {
            self.content
                .ptr_mut()
                .cast::<Symbol>()
                .add(self.len)
                .write(symbol)
        }

        self.len += 1;
    }

    /// Cells and bytes have no drop glue, so shortening only moves the length.
    pub(crate) fn truncate(&mut self, len: usize) {
        self.len = self.len.min(len);
    }

    fn expect_cells(&self) {
        if !self.flavor.holds_cells() {
            inconsistent(format!("cells read from a {:?} node", self.flavor));
        }
    }

    fn expect_width(&self, width: usize) {
        if self.width() != width {
            inconsistent(format!("{:?} node has no {width}-byte elements", self.flavor));
        }
    }

    fn expect_room(&self, extra: usize) {
        if self.len + extra > self.capacity() {
            inconsistent("push past the capacity of a node");
        }
    }
}

/// Byte offset of the `index`-th character, or the length when the text is shorter. Positions
/// in text count characters, so they never fall inside an encoded character.
fn char_offset(text: &str, index: usize) -> usize {
    text.char_indices()
        .nth(index)
        .map(|(offset, _)| offset)
        .unwrap_or(text.len())
}

impl Heap {
    /// The node behind a series value, refusing non-series kinds.
    pub(crate) fn series_node(&self, value: &Value) -> Result<NodeRef> {
        match (value.datatype(), value.layout(), value.node()) {
            (
                Kind::Text | Kind::Issue | Kind::Binary | Kind::Block | Kind::Group,
                Layout::Series,
                Some(node),
            ) => Ok(node),
            (found, ..) => Err(RuntimeError::expected("series", found)),
        }
    }

    /// Like [Heap::series_node], also refusing const views and unmodifiable nodes.
    fn writable_series(&self, value: &Value) -> Result<NodeRef> {
        let node = self.series_node(value)?;

        if value.has_flag(CellFlags::CONST) {
            return Err(RuntimeError::ConstValue);
        }

        self.node(node).check_mutable()?;
        Ok(node)
    }

    fn specifier_of(value: &Cell) -> Option<NodeRef> {
        match value.binding() {
            Binding::Context(varlist) => Some(varlist),
            _ => None,
        }
    }

    pub fn append(&mut self, series: &Value, item: &Value) -> Result<()> {
        match series.datatype() {
            Kind::Block | Kind::Group => {
                let node = self.writable_series(series)?;
                let len = self.node(node).len();

                self.ensure_capacity(node, len + 1)?;
                self.node_mut(node).push_cell(item.copied().into_cell());
                Ok(())
            }
            Kind::Text | Kind::Issue => {
                let text = self.form(item);
                self.append_text(series, &text)
            }
            Kind::Binary => match item.datatype() {
                Kind::Binary => {
                    let bytes = self.bytes_of(item)?;
                    self.append_bytes(series, &bytes)
                }
                Kind::Integer => {
                    let byte = u8::try_from(item.as_integer()?).map_err(|_| {
                        RuntimeError::expected("integer from 0 to 255", Kind::Integer)
                    })?;
                    self.append_bytes(series, &[byte])
                }
                Kind::Text => {
                    let text = self.text_of(item)?;
                    self.append_bytes(series, text.as_bytes())
                }
                found => Err(RuntimeError::expected("binary, integer or text", found)),
            },
            found => Err(RuntimeError::expected("series", found)),
        }
    }

    pub fn append_text(&mut self, series: &Value, text: &str) -> Result<()> {
        match series.datatype() {
            Kind::Text | Kind::Issue => self.append_bytes_unchecked(series, text.as_bytes()),
            found => Err(RuntimeError::expected("text", found)),
        }
    }

    pub fn append_bytes(&mut self, series: &Value, bytes: &[u8]) -> Result<()> {
        match series.datatype() {
            Kind::Binary => self.append_bytes_unchecked(series, bytes),
            Kind::Text | Kind::Issue => {
                std::str::from_utf8(bytes).map_err(|_| RuntimeError::InvalidUtf8)?;
                self.append_bytes_unchecked(series, bytes)
            }
            found => Err(RuntimeError::expected("binary", found)),
        }
    }

    fn append_bytes_unchecked(&mut self, series: &Value, bytes: &[u8]) -> Result<()> {
        let node = self.writable_series(series)?;
        let len = self.node(node).len();

        self.ensure_capacity(node, len + bytes.len())?;
        self.node_mut(node).push_bytes(bytes);
        Ok(())
    }

    /// Overwrites the element at `index`, counted from the position of `series`.
    pub fn poke(&mut self, series: &Value, index: usize, item: &Value) -> Result<()> {
        if !series.datatype().is_array() {
            return Err(RuntimeError::expected("block or group", series.datatype()));
        }

        let node = self.writable_series(series)?;
        let cells = self.node_mut(node).cells_mut()?;
        let len = cells.len();

        let position = series
            .index()
            .checked_add(index)
            .ok_or(RuntimeError::OutOfRange { index, len })?;

        match cells.get_mut(position) {
            Some(cell) => cell.copy_from(item),
            None => Err(RuntimeError::OutOfRange {
                index: position,
                len,
            }),
        }
    }

    /// Removes everything from the position of `series` to its tail.
    pub fn clear(&mut self, series: &Value) -> Result<()> {
        let node = self.writable_series(series)?;
        let target = self.node(node);

        let len = match target.flavor() {
            Flavor::Text => {
                let text =
                    std::str::from_utf8(target.bytes()?).map_err(|_| RuntimeError::InvalidUtf8)?;

                char_offset(text, series.index())
            }
            _ => series.index(),
        };

        self.node_mut(node).truncate(len);
        Ok(())
    }

    pub fn length_of(&self, series: &Value) -> Result<usize> {
        let node = self.series_node(series)?;
        let target = self.node(node);

        match target.flavor() {
            Flavor::Text => {
                let text = self.str_of(target, series.index())?;
                Ok(text.chars().count())
            }
            Flavor::Binary => Ok(target.bytes()?.len().saturating_sub(series.index())),
            _ => Ok(target.cells()?.len().saturating_sub(series.index())),
        }
    }

    /// The element at `index` from the position of an array, resolved against the array's
    /// binding.
    pub fn at(&self, series: &Value, index: usize) -> Result<Value> {
        if !series.datatype().is_array() {
            return Err(RuntimeError::expected("block or group", series.datatype()));
        }

        let node = self.series_node(series)?;
        let cells = self.node(node).cells()?;
        let position = series
            .index()
            .checked_add(index)
            .ok_or(RuntimeError::OutOfRange {
                index,
                len: cells.len(),
            })?;

        cells
            .get(position)
            .map(|cell| self.derelativize(cell, Self::specifier_of(series)))
            .ok_or(RuntimeError::OutOfRange {
                index: position,
                len: cells.len(),
            })
    }

    pub fn values_of(&self, series: &Value) -> Result<Vec<Value>> {
        if !series.datatype().is_array() {
            return Err(RuntimeError::expected("block or group", series.datatype()));
        }

        let node = self.series_node(series)?;
        let specifier = Self::specifier_of(series);

        Ok(self.node(node).cells()?[series.index().min(self.node(node).len())..]
            .iter()
            .map(|cell| self.derelativize(cell, specifier))
            .collect())
    }

    /// Text of a node from the `index`-th character on.
    pub(crate) fn str_of<'a>(&self, node: &'a Node, index: usize) -> Result<&'a str> {
        let bytes = node.bytes()?;
        let text = std::str::from_utf8(bytes).map_err(|_| RuntimeError::InvalidUtf8)?;

        Ok(&text[char_offset(text, index)..])
    }

    /// Text content of a text, issue or char value.
    pub fn text_of(&self, value: &Value) -> Result<String> {
        match (value.datatype(), value.layout()) {
            (Kind::Text | Kind::Issue, Layout::Series) => {
                let node = self.series_node(value)?;
                Ok(self.str_of(self.node(node), value.index())?.to_owned())
            }
            (Kind::Issue | Kind::Char, Layout::Inline) => Ok(value.inline_str()?.to_owned()),
            (found, _) => Err(RuntimeError::expected("text", found)),
        }
    }

    pub fn bytes_of(&self, value: &Value) -> Result<Vec<u8>> {
        match value.datatype() {
            Kind::Binary => {
                let node = self.series_node(value)?;
                let bytes = self.node(node).bytes()?;
                Ok(bytes[value.index().min(bytes.len())..].to_vec())
            }
            found => Err(RuntimeError::expected("binary", found)),
        }
    }

    /// Freezes the node a value references. Values without a node are immutable already.
    pub fn freeze(&mut self, value: &Value) -> Result<()> {
        if let Some(node) = value.node() {
            self.node(node).check_readable()?;
            self.freeze_node(node);
        }

        Ok(())
    }

    pub fn is_frozen(&self, value: &Value) -> bool {
        value
            .node()
            .map(|node| self.is_frozen_node(node))
            .unwrap_or(true)
    }

    /// Records where an array came from.
    pub fn set_origin(&mut self, array: &Value, file: &str, line: u32) -> Result<()> {
        if !array.datatype().is_array() {
            return Err(RuntimeError::expected("block or group", array.datatype()));
        }

        let node = self.writable_series(array)?;

        let filename = self.make_text(file);
        let Some(filename) = filename.node() else {
            inconsistent("text value without a node");
        };

        let target = self.node_mut(node);
        target.link = Link::Filename(filename);
        target.misc = Misc::Line(line);
        Ok(())
    }

    pub fn origin(&self, array: &Value) -> Option<(String, u32)> {
        let node = self.node(self.series_node(array).ok()?);

        match (&node.link, &node.misc) {
            (Link::Filename(file), Misc::Line(line)) => {
                let name = self.str_of(self.node(*file), 0).ok()?;
                Some((name.to_owned(), *line))
            }
            _ => None,
        }
    }
}
