//! Nested output capture buffers.

/// A stack of capture buffers. Output goes to the innermost buffer,
/// or to the base sink when no buffer is open.
#[derive(Debug, Default)]
pub struct OutputStack {
    sink: String,
    buffers: Vec<String>,
}

impl OutputStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new capture buffer.
    pub fn start(&mut self) {
        self.buffers.push(String::new());
    }

    /// Number of open buffers.
    pub fn level(&self) -> usize {
        self.buffers.len()
    }

    pub fn write(&mut self, s: &str) {
        if let Some(top) = self.buffers.last_mut() {
            top.push_str(s);
        } else {
            self.sink.push_str(s);
        }
    }

    /// Close the innermost buffer and return its contents; None if no
    /// buffer is open.
    pub fn get_clean(&mut self) -> Option<String> {
        self.buffers.pop()
    }

    /// Close the innermost buffer, discarding its contents.
    pub fn end_clean(&mut self) -> bool {
        self.buffers.pop().is_some()
    }

    /// Discard buffers until `level` remain.
    pub fn unwind_to(&mut self, level: usize) {
        while self.buffers.len() > level {
            self.buffers.pop();
        }
    }

    /// Everything written so far, sink first then every open buffer
    /// from the outermost in, without closing anything.
    pub fn collect_all(&self) -> String {
        let mut out = self.sink.clone();
        for buf in &self.buffers {
            out.push_str(buf);
        }
        out
    }
}
