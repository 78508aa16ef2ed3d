//! Layout and named slot bookkeeping for one render.

use std::collections::HashMap;

use kstring::KString;

use crate::template::output::OutputStack;
use crate::warn;

pub const DEFAULT_SLOT: &str = "content";

#[derive(Debug)]
pub struct SlotState {
    layout: Option<String>,
    slots: HashMap<KString, String>,
    current: KString,
    stack: Vec<KString>,
    /// Output level right after each open slot's buffer was
    /// started, innermost last.
    open: Vec<usize>,
}

impl Default for SlotState {
    fn default() -> Self {
        SlotState {
            layout: None,
            slots: HashMap::new(),
            current: KString::from_static(DEFAULT_SLOT),
            stack: Vec::new(),
            open: Vec::new(),
        }
    }
}

impl SlotState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_layout(&mut self, file: impl Into<String>) {
        self.layout = Some(file.into());
    }

    /// Claims the layout reference; afterwards none is set.
    pub fn take_layout(&mut self) -> Option<String> {
        self.layout.take()
    }

    pub fn current(&self) -> &str {
        &self.current
    }

    /// Number of slots currently being captured.
    pub fn depth(&self) -> usize {
        self.open.len()
    }

    pub fn start_slot(&mut self, output: &mut OutputStack, name: &str) {
        let previous = std::mem::replace(&mut self.current, KString::from_ref(name));
        self.stack.push(previous);
        output.start();
        self.open.push(output.level());
    }

    /// End the innermost slot. Slots whose buffers sit at or below
    /// `floor` belong to an enclosing template and are left alone.
    pub fn end_slot(&mut self, output: &mut OutputStack, floor: usize) {
        match self.open.last().copied() {
            Some(level) if level > floor => {
                self.open.pop();
                // Buffers opened after the slot (and not closed) are
                // folded into it.
                while output.level() > level {
                    let inner = output.get_clean().unwrap_or_default();
                    output.write(&inner);
                }
                let content = if output.level() == level {
                    output.get_clean().unwrap_or_default()
                } else {
                    warn!("slot {:?} lost its output buffer", self.current.as_str());
                    String::new()
                };
                let name = std::mem::replace(
                    &mut self.current,
                    self.stack.pop().unwrap_or_else(|| KString::from_static(DEFAULT_SLOT)));
                self.slots.insert(name, content);
            }
            Some(_) => {
                warn!("endslot for slot {:?} which was started by an enclosing template",
                      self.current.as_str());
            }
            None => {
                warn!("endslot without a started slot");
                self.current = self.stack.pop().unwrap_or_else(
                    || KString::from_static(DEFAULT_SLOT));
            }
        }
    }

    /// End all slots whose buffers were opened above `level`
    /// (e.g. started but not ended within one template).
    pub fn close_dangling(&mut self, output: &mut OutputStack, level: usize) {
        while let Some(&open_level) = self.open.last() {
            if open_level <= level {
                break
            }
            warn!("slot {:?} was not ended, ending it", self.current.as_str());
            self.end_slot(output, level);
        }
    }

    /// Forget slots opened above `level` without storing anything,
    /// for when their buffers have been discarded after an error.
    pub fn abandon_above(&mut self, level: usize) {
        while let Some(&open_level) = self.open.last() {
            if open_level <= level {
                break
            }
            self.open.pop();
            self.current = self.stack.pop().unwrap_or_else(
                || KString::from_static(DEFAULT_SLOT));
        }
    }

    pub fn slot<'s>(&'s self, name: &str, default: &'s str) -> &'s str {
        self.slots.get(name).map(|s| s.as_str()).unwrap_or(default)
    }

    pub fn has_slot(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    pub fn set_slot(&mut self, name: &str, content: String) {
        self.slots.insert(KString::from_ref(name), content);
    }

    pub fn reset_current(&mut self) {
        self.current = KString::from_static(DEFAULT_SLOT);
    }

    pub fn clear_slots(&mut self) {
        self.slots.clear();
    }

    /// Back to the initial state. Open slot buffers are not touched;
    /// they belong to the output stack's owner.
    pub fn reset(&mut self) {
        self.layout = None;
        self.slots.clear();
        self.current = KString::from_static(DEFAULT_SLOT);
        self.stack.clear();
        self.open.clear();
    }

    pub fn is_pristine(&self) -> bool {
        self.layout.is_none()
            && self.slots.is_empty()
            && self.current.as_str() == DEFAULT_SLOT
            && self.stack.is_empty()
            && self.open.is_empty()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn t_nested_slots_are_lifo() {
        let mut out = OutputStack::new();
        let mut s = SlotState::new();
        out.start();
        out.write("body ");
        s.start_slot(&mut out, "outer");
        out.write("o1 ");
        s.start_slot(&mut out, "inner");
        assert_eq!(s.current(), "inner");
        out.write("i");
        s.end_slot(&mut out, 0);
        assert_eq!(s.current(), "outer");
        out.write("o2");
        s.end_slot(&mut out, 0);
        assert_eq!(s.current(), DEFAULT_SLOT);
        assert_eq!(s.slot("inner", ""), "i");
        assert_eq!(s.slot("outer", ""), "o1 o2");
        assert_eq!(out.get_clean().as_deref(), Some("body "));
        assert_eq!(out.level(), 0);
    }

    #[test]
    fn t_end_without_start_keeps_enclosing_buffer() {
        let mut out = OutputStack::new();
        let mut s = SlotState::new();
        out.start();
        out.write("page");
        s.end_slot(&mut out, 0);
        assert_eq!(s.current(), DEFAULT_SLOT);
        assert_eq!(out.level(), 1);
        assert!(!s.has_slot(DEFAULT_SLOT));
        assert_eq!(out.get_clean().as_deref(), Some("page"));
    }

    #[test]
    fn t_end_respects_floor() {
        let mut out = OutputStack::new();
        let mut s = SlotState::new();
        s.start_slot(&mut out, "outer");
        out.start();
        let floor = out.level();
        out.write("inner template");
        s.end_slot(&mut out, floor);
        assert_eq!(s.current(), "outer");
        assert_eq!(s.depth(), 1);
        assert_eq!(out.get_clean().as_deref(), Some("inner template"));
        s.end_slot(&mut out, 0);
        assert_eq!(s.slot("outer", "-"), "");
        assert_eq!(s.current(), DEFAULT_SLOT);
    }

    #[test]
    fn t_slot_default() {
        let mut s = SlotState::new();
        assert_eq!(s.slot("sidebar", "none"), "none");
        s.set_slot("sidebar", "<ul></ul>".into());
        assert_eq!(s.slot("sidebar", "none"), "<ul></ul>");
    }

    #[test]
    fn t_close_dangling() {
        let mut out = OutputStack::new();
        let mut s = SlotState::new();
        out.start();
        let base = out.level();
        s.start_slot(&mut out, "a");
        out.write("x");
        s.start_slot(&mut out, "b");
        out.write("y");
        s.close_dangling(&mut out, base);
        assert_eq!(out.level(), base);
        assert_eq!(s.slot("b", ""), "y");
        assert_eq!(s.slot("a", ""), "x");
        assert_eq!(s.depth(), 0);
    }

    #[test]
    fn t_reset() {
        let mut out = OutputStack::new();
        let mut s = SlotState::new();
        s.set_layout("layout.tpl");
        s.start_slot(&mut out, "a");
        assert!(!s.is_pristine());
        s.reset();
        assert!(s.is_pristine());
        assert_eq!(s.take_layout(), None);
    }
}
