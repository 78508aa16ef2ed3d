//! Rendering of template files: layouts, slots, components and
//! partials.
//!
//! A top-level render gets its own [`RenderState`]; everything a
//! render may leave behind (open buffers, slot contents, the layout
//! reference) lives there and is cleared when the render finishes,
//! successfully or not.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use kstring::KString;
use serde_json::{Map, Value};

use crate::acontext::RequestInfo;
use crate::helpers::{self, HelperCx};
use crate::session::SessionHandle;
use crate::template::error::TemplateError;
use crate::template::output::OutputStack;
use crate::template::slots::{SlotState, DEFAULT_SLOT};
use crate::template::syntax::{parse, BinOp, Expr, Node};
use crate::template::value::{Scope, Val};
use crate::warn;

/// What a render knows about the request it is serving.
#[derive(Debug, Clone, Default)]
pub struct RenderEnv {
    pub request: RequestInfo,
    pub session: Option<SessionHandle>,
    /// `flash_get` leaves flashes in the session (responses nobody
    /// reads, e.g. to HEAD requests).
    pub keep_flashes: bool,
}

#[derive(Debug)]
pub struct RenderState {
    pub output: OutputStack,
    pub slots: SlotState,
    pub timers: HashMap<KString, Instant>,
    pub env: RenderEnv,
}

impl RenderState {
    pub fn new(env: RenderEnv) -> Self {
        RenderState {
            output: OutputStack::new(),
            slots: SlotState::new(),
            timers: HashMap::new(),
            env,
        }
    }
}

/// The file name for a template name in dot notation, relative to
/// the template root: `blog.post` is `blog/post.tpl`. Names ending in
/// `.tpl` are file names already.
pub fn template_file_name(name: &str) -> String {
    if name.ends_with(".tpl") {
        name.to_string()
    } else {
        format!("{}.tpl", name.replace('.', "/"))
    }
}

#[derive(Debug, Clone)]
pub struct Renderer {
    root: PathBuf,
    public_dir: PathBuf,
    base_url: String,
}

impl Renderer {
    pub fn new(
        root: impl Into<PathBuf>,
        public_dir: impl Into<PathBuf>,
        base_url: impl Into<String>,
    ) -> Self {
        Renderer {
            root: root.into(),
            public_dir: public_dir.into(),
            base_url: base_url.into(),
        }
    }

    pub fn root(&self) -> &Path { &self.root }
    pub fn public_dir(&self) -> &Path { &self.public_dir }
    pub fn base_url(&self) -> &str { &self.base_url }

    /// Render the template `name` (dot notation) with `data`, wrapped
    /// in its layout if it names one.
    pub fn render_template(
        &self,
        name: &str,
        data: Map<String, Value>,
        env: RenderEnv,
    ) -> Result<String, TemplateError> {
        let mut state = RenderState::new(env);
        self.render_with_state(&mut state, name, &data)
    }

    /// Like `render_template` but with caller-provided state, which is
    /// left with balanced buffers and no slot state afterwards.
    pub fn render_with_state(
        &self,
        state: &mut RenderState,
        name: &str,
        data: &Map<String, Value>,
    ) -> Result<String, TemplateError> {
        let base = state.output.level();
        let result = self.render_page(state, name, data);
        state.output.unwind_to(base);
        state.slots.reset();
        result
    }

    fn render_page(
        &self,
        state: &mut RenderState,
        name: &str,
        data: &Map<String, Value>,
    ) -> Result<String, TemplateError> {
        let file = template_file_name(name);
        let path = self.root.join(&file);
        if !path.is_file() {
            return Err(TemplateError::TemplateNotFound(path))
        }
        let content = self.capture_file(state, &path, &file, Scope::new(data.clone()))
            .map_err(|e| TemplateError::Rendering {
                template: file.clone(),
                source: Box::new(e),
            })?;

        let layout = match state.slots.take_layout() {
            None => return Ok(content),
            Some(layout) => layout,
        };
        state.slots.set_slot(DEFAULT_SLOT, content);
        let layout_path = self.root.join(&layout);
        if !layout_path.is_file() {
            return Err(TemplateError::LayoutNotFound(layout_path))
        }
        state.slots.reset_current();
        let output = self.capture_file(state, &layout_path, &layout, Scope::new(data.clone()))
            .map_err(|e| TemplateError::LayoutRendering {
                layout: layout.clone(),
                source: Box::new(e),
            })?;
        if let Some(further) = state.slots.take_layout() {
            warn!("layout {layout:?} names a layout itself ({further:?}), ignoring that");
        }
        state.slots.clear_slots();
        Ok(output)
    }

    /// Render a component, either writing its output into the current
    /// buffer or returning it (`capture`).
    pub fn component(
        &self,
        state: &mut RenderState,
        name: &str,
        data: Map<String, Value>,
        capture: bool,
    ) -> Result<Option<String>, TemplateError> {
        let file = template_file_name(name);
        let path = self.root.join(&file);
        if !path.is_file() {
            return Err(TemplateError::ComponentNotFound(path))
        }
        let output = self.capture_file(state, &path, &file, Scope::new(data))
            .map_err(|e| TemplateError::Component {
                component: name.to_string(),
                source: Box::new(e),
            })?;
        Ok(emit(state, output, capture))
    }

    /// Include a partial, either into the current buffer or returning
    /// its output (`capture`). Errors pass through unwrapped.
    pub fn partial(
        &self,
        state: &mut RenderState,
        name: &str,
        data: Map<String, Value>,
        capture: bool,
    ) -> Result<Option<String>, TemplateError> {
        let file = template_file_name(name);
        let path = self.root.join(&file);
        if !path.is_file() {
            return Err(TemplateError::PartialNotFound(path))
        }
        let output = self.capture_file(state, &path, &file, Scope::new(data))?;
        Ok(emit(state, output, capture))
    }

    /// Execute a template file inside a fresh capture buffer and return
    /// what it wrote. On error all buffers and slots opened since are
    /// discarded.
    fn capture_file(
        &self,
        state: &mut RenderState,
        path: &Path,
        template: &str,
        mut scope: Scope,
    ) -> Result<String, TemplateError> {
        let base = state.output.level();
        state.output.start();
        // Slots at or below the file's own buffer belong to enclosing
        // templates.
        let floor = base + 1;
        let result = load(path, template)
            .and_then(|nodes| self.exec(&nodes, &mut scope, state, floor));
        match result {
            Ok(()) => {
                state.slots.close_dangling(&mut state.output, floor);
                // Buffers left open by the template end up in its output.
                while state.output.level() > floor {
                    let inner = state.output.get_clean().unwrap_or_default();
                    state.output.write(&inner);
                }
                Ok(state.output.get_clean().unwrap_or_default())
            }
            Err(e) => {
                state.output.unwind_to(base);
                state.slots.abandon_above(base);
                Err(e)
            }
        }
    }

    fn exec(
        &self,
        nodes: &[Node],
        scope: &mut Scope,
        state: &mut RenderState,
        floor: usize,
    ) -> Result<(), TemplateError> {
        for node in nodes {
            match node {
                Node::Text(s) => state.output.write(s),
                Node::Output { expr, raw, line } => {
                    let v = self.eval(expr, scope, state, *line)?;
                    if *raw {
                        state.output.write(&v.display());
                    } else {
                        state.output.write(&v.escaped());
                    }
                }
                Node::Statement { expr, line } => {
                    let v = self.eval(expr, scope, state, *line)?;
                    if !v.is_null() {
                        state.output.write(&v.escaped());
                    }
                }
                Node::Layout { file, line } => {
                    let file = self.eval(file, scope, state, *line)?;
                    state.slots.set_layout(file.display());
                }
                Node::SlotStart { name, line } => {
                    let name = self.eval(name, scope, state, *line)?;
                    state.slots.start_slot(&mut state.output, &name.display());
                }
                Node::SlotEnd { .. } => {
                    state.slots.end_slot(&mut state.output, floor);
                }
                Node::If { branches, otherwise, line } => {
                    let mut taken = None;
                    for (cond, body) in branches {
                        if self.eval(cond, scope, state, *line)?.is_truthy() {
                            taken = Some(body);
                            break
                        }
                    }
                    self.exec(taken.unwrap_or(otherwise), scope, state, floor)?;
                }
                Node::For { key, var, iterable, body, line } => {
                    let items: Vec<(Value, Value)> =
                        match self.eval(iterable, scope, state, *line)?.into_data() {
                            Value::Null => Vec::new(),
                            Value::Array(items) => items.into_iter().enumerate()
                                .map(|(i, v)| (Value::from(i), v))
                                .collect(),
                            Value::Object(map) => map.into_iter()
                                .map(|(k, v)| (Value::String(k), v))
                                .collect(),
                            other => return Err(TemplateError::Eval {
                                line: *line,
                                message: format!("{} can't be iterated over",
                                                 type_name(&other)),
                            }),
                        };
                    let len = items.len();
                    for (i, (k, v)) in items.into_iter().enumerate() {
                        let mut frame = Map::new();
                        if let Some(key) = key {
                            frame.insert(key.clone(), k);
                        }
                        frame.insert(var.clone(), v);
                        frame.insert("loop".into(), serde_json::json!({
                            "index": i,
                            "first": i == 0,
                            "last": i + 1 == len,
                        }));
                        scope.push(frame);
                        let result = self.exec(body, scope, state, floor);
                        scope.pop();
                        result?;
                    }
                }
                Node::Set { name, expr, line } => {
                    let v = self.eval(expr, scope, state, *line)?;
                    scope.set(name, v);
                }
                Node::Component { name, data, line } => {
                    let name = self.eval(name, scope, state, *line)?;
                    let data = self.eval_data(data.as_ref(), scope, state, *line)?;
                    self.component(state, &name.display(), data, false)?;
                }
                Node::Partial { name, data, line } => {
                    let name = self.eval(name, scope, state, *line)?;
                    let data = self.eval_data(data.as_ref(), scope, state, *line)?;
                    self.partial(state, &name.display(), data, false)?;
                }
            }
        }
        Ok(())
    }

    /// The map given after `with`, empty if none.
    fn eval_data(
        &self,
        expr: Option<&Expr>,
        scope: &Scope,
        state: &mut RenderState,
        line: usize,
    ) -> Result<Map<String, Value>, TemplateError> {
        match expr {
            None => Ok(Map::new()),
            Some(expr) => match self.eval(expr, scope, state, line)?.into_data() {
                Value::Object(map) => Ok(map),
                Value::Null => Ok(Map::new()),
                other => Err(TemplateError::Eval {
                    line,
                    message: format!("data must be a map, got {}", type_name(&other)),
                }),
            },
        }
    }

    pub(crate) fn eval(
        &self,
        expr: &Expr,
        scope: &Scope,
        state: &mut RenderState,
        line: usize,
    ) -> Result<Val, TemplateError> {
        Ok(match expr {
            Expr::Literal(v) => Val::Data(v.clone()),
            Expr::Path(path) => scope.lookup(path).unwrap_or_else(Val::null),
            Expr::Call { name, args } => {
                let helper = helpers::lookup(name).ok_or_else(
                    || TemplateError::UnknownHelper(name.clone()))?;
                let mut vals = Vec::with_capacity(args.len());
                for arg in args {
                    vals.push(self.eval(arg, scope, state, line)?);
                }
                let mut hcx = HelperCx { renderer: self, state: &mut *state, line };
                helper(&mut hcx, vals)?
            }
            Expr::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.eval(item, scope, state, line)?.into_data());
                }
                Val::Data(Value::Array(out))
            }
            Expr::Map(entries) => {
                let mut out = Map::new();
                for (k, item) in entries {
                    out.insert(k.clone(), self.eval(item, scope, state, line)?.into_data());
                }
                Val::Data(Value::Object(out))
            }
            Expr::Not(e) => Val::from(!self.eval(e, scope, state, line)?.is_truthy()),
            Expr::Binary { op, lhs, rhs } => {
                let a = self.eval(lhs, scope, state, line)?;
                match op {
                    BinOp::And => Val::from(
                        a.is_truthy() && self.eval(rhs, scope, state, line)?.is_truthy()),
                    BinOp::Or => Val::from(
                        a.is_truthy() || self.eval(rhs, scope, state, line)?.is_truthy()),
                    BinOp::Eq => Val::from(a.loose_eq(&self.eval(rhs, scope, state, line)?)),
                    BinOp::Ne => Val::from(!a.loose_eq(&self.eval(rhs, scope, state, line)?)),
                }
            }
        })
    }
}

fn emit(state: &mut RenderState, output: String, capture: bool) -> Option<String> {
    if capture {
        Some(output)
    } else {
        state.output.write(&output);
        None
    }
}

fn load(path: &Path, template: &str) -> Result<Vec<Node>, TemplateError> {
    let src = std::fs::read_to_string(path).map_err(
        |source| TemplateError::Io { path: path.to_owned(), source })?;
    parse(&src, template)
}

pub(crate) fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a map",
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use serde_json::json;
    use std::fs;

    fn site(files: &[(&str, &str)]) -> Result<(tempfile::TempDir, Renderer)> {
        let dir = tempfile::tempdir()?;
        for (name, content) in files {
            let path = dir.path().join(name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, content)?;
        }
        let renderer = Renderer::new(dir.path(), dir.path().join("public"), "/");
        Ok((dir, renderer))
    }

    fn data(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn t_dot_notation() {
        assert_eq!(template_file_name("home"), "home.tpl");
        assert_eq!(template_file_name("blog.post"), "blog/post.tpl");
        assert_eq!(template_file_name("layout.tpl"), "layout.tpl");
    }

    #[test]
    fn t_no_layout_returns_output_exactly() -> Result<()> {
        let (_dir, r) = site(&[("plain.tpl", "Hi {{ name }} & {{ tag }}!\n")])?;
        let out = r.render_template("plain", data(json!({"name": "Bob", "tag": "<b>"})),
                                    RenderEnv::default())?;
        assert_eq!(out, "Hi Bob & &lt;b&gt;!\n");
        Ok(())
    }

    #[test]
    fn t_layout_with_slots() -> Result<()> {
        let (_dir, r) = site(&[
            ("layout.tpl",
             "<title>{{ pageTitle }}</title>[{{ slot('sidebar', 'none') }}]\
              <main>{{ slot('content') }}</main>{{ local }}"),
            ("page.tpl",
             "{% layout 'layout.tpl' %}\n{% set local = 'x' %}\
              Body{% slot 'sidebar' %}side{% endslot %}."),
        ])?;
        let mut state = RenderState::new(RenderEnv::default());
        let d = data(json!({"pageTitle": "T"}));
        let out = r.render_with_state(&mut state, "page", &d)?;
        // the layout sees the original data, not `local`
        assert_eq!(out, "<title>T</title>[side]<main>Body.</main>");
        assert!(state.slots.is_pristine());
        assert_eq!(state.output.level(), 0);
        Ok(())
    }

    #[test]
    fn t_no_leftover_state_between_renders() -> Result<()> {
        let (_dir, r) = site(&[
            ("layout.tpl", "L[{{ slot('side', 'empty') }}]{{ slot('content') }}"),
            ("a.tpl", "{% layout 'layout.tpl' %}{% slot 'side' %}S{% endslot %}A"),
            ("b.tpl", "B[{{ slot('side', 'empty') }}]"),
        ])?;
        let mut state = RenderState::new(RenderEnv::default());
        assert_eq!(r.render_with_state(&mut state, "a", &Map::new())?, "L[S]A");
        assert_eq!(r.render_with_state(&mut state, "b", &Map::new())?, "B[empty]");
        Ok(())
    }

    #[test]
    fn t_missing_files() -> Result<()> {
        let (dir, r) = site(&[
            ("nolayout.tpl", "{% layout 'gone.tpl' %}x"),
            ("usecomp.tpl", "a{% component 'components.gone' %}b"),
        ])?;
        let e = r.render_template("nope", Map::new(), RenderEnv::default()).err().unwrap();
        assert_eq!(e.to_string(), format!("Template file not found: {}",
                                          dir.path().join("nope.tpl").to_string_lossy()));
        let e = r.render_template("nolayout", Map::new(), RenderEnv::default()).err().unwrap();
        assert_eq!(e.to_string(), format!("Layout file not found: {}",
                                          dir.path().join("gone.tpl").to_string_lossy()));
        let e = r.render_template("usecomp", Map::new(), RenderEnv::default()).err().unwrap();
        assert_eq!(e.to_string(), format!(
            "Error rendering template 'usecomp.tpl': Component file not found: {}",
            dir.path().join("components/gone.tpl").to_string_lossy()));
        Ok(())
    }

    #[test]
    fn t_failing_render_unwinds() -> Result<()> {
        let (_dir, r) = site(&[
            ("components/bad.tpl", "{% slot 'x' %}partial output {{ nosuchhelper() }}"),
            ("page.tpl", "{% slot 's' %}a{% component 'components.bad' %}{% endslot %}"),
        ])?;
        let mut state = RenderState::new(RenderEnv::default());
        state.output.start();
        let e = r.render_with_state(&mut state, "page", &Map::new()).err().unwrap();
        assert_eq!(e.to_string(),
                   "Error rendering template 'page.tpl': Error rendering component \
                    'components.bad': unknown helper \"nosuchhelper\"");
        assert_eq!(state.output.level(), 1);
        assert!(state.slots.is_pristine());
        Ok(())
    }

    #[test]
    fn t_failing_layout_unwinds() -> Result<()> {
        let (_dir, r) = site(&[
            ("layout.tpl", "L{% slot 'z' %}{{ nope() }}"),
            ("page.tpl", "{% layout 'layout.tpl' %}{% slot 'z' %}Z{% endslot %}body"),
            ("next.tpl", "[{{ slot('z', 'none') }}]{{ slot('content') }}"),
        ])?;
        let mut state = RenderState::new(RenderEnv::default());
        let e = r.render_with_state(&mut state, "page", &Map::new()).err().unwrap();
        assert_eq!(e.to_string(),
                   "Error rendering layout 'layout.tpl': unknown helper \"nope\"");
        assert_eq!(state.output.level(), 0);
        assert!(state.slots.is_pristine());
        assert_eq!(r.render_with_state(&mut state, "next", &Map::new())?, "[none]");
        Ok(())
    }

    #[test]
    fn t_missing_partial() -> Result<()> {
        let (dir, r) = site(&[
            ("page.tpl", "a{% slot 's' %}{% partial 'partials.gone' %}"),
        ])?;
        let mut state = RenderState::new(RenderEnv::default());
        let e = r.render_with_state(&mut state, "page", &Map::new()).err().unwrap();
        assert_eq!(e.to_string(), format!(
            "Error rendering template 'page.tpl': Partial file not found: {}",
            dir.path().join("partials/gone.tpl").to_string_lossy()));
        assert_eq!(state.output.level(), 0);
        assert!(state.slots.is_pristine());
        Ok(())
    }

    #[test]
    fn t_layout_naming_a_layout_is_ignored() -> Result<()> {
        let (_dir, r) = site(&[
            ("outer.tpl", "OUTER"),
            ("inner.tpl", "{% layout 'outer.tpl' %}<{{ slot('content') }}>"),
            ("page.tpl", "{% layout 'inner.tpl' %}x"),
        ])?;
        let mut state = RenderState::new(RenderEnv::default());
        assert_eq!(r.render_with_state(&mut state, "page", &Map::new())?, "<x>");
        assert_eq!(state.output.level(), 0);
        assert!(state.slots.is_pristine());
        Ok(())
    }

    #[test]
    fn t_set_in_loop_outlives_the_loop() -> Result<()> {
        let (_dir, r) = site(&[(
            "x.tpl",
            "{% for i in items %}{% set last = i %}{% endfor %}[{{ last }}]{{ i }}"
        )])?;
        let out = r.render_template("x", data(json!({"items": [1, 2, 3]})),
                                    RenderEnv::default())?;
        assert_eq!(out, "[3]");
        Ok(())
    }

    #[test]
    fn t_component_sees_only_its_data() -> Result<()> {
        let (_dir, r) = site(&[
            ("components/alert.tpl", "<div class=\"{{ type }}\">{{ message }}{{ secret }}</div>"),
            ("page.tpl",
             "{% component 'components.alert' with { type: 'info', message: msg } %}\
              {{ component_capture('components.alert', { type: 'x' }) }}"),
        ])?;
        let out = r.render_template("page", data(json!({"msg": "<hi>", "secret": "s"})),
                                    RenderEnv::default())?;
        assert_eq!(out, "<div class=\"info\">&lt;hi&gt;</div><div class=\"x\"></div>");
        Ok(())
    }

    #[test]
    fn t_partials() -> Result<()> {
        let (_dir, r) = site(&[
            ("partials/footer.tpl", "(c) {{ year }}"),
            ("page.tpl", "<p>{% partial 'partials.footer' with { year: 2024 } %}</p>\
                          {% set f = partial_capture('partials.footer', { year: 1 }) %}{{ f }}"),
        ])?;
        let out = r.render_template("page", Map::new(), RenderEnv::default())?;
        assert_eq!(out, "<p>(c) 2024</p>(c) 1");
        Ok(())
    }

    #[test]
    fn t_loops_and_conditions() -> Result<()> {
        let (_dir, r) = site(&[(
            "list.tpl",
            "{% for item in items %}{% if loop.first %}[{% endif %}{{ loop.index }}={{ item }}\
             {% if not loop.last %},{% else %}]{% endif %}{% endfor %}\
             {% for k, v in user %}{{ k }}:{{ v }};{% endfor %}\
             {% if missing or items.1 == 'b' %}yes{% endif %}"
        )])?;
        let out = r.render_template(
            "list", data(json!({"items": ["a", "b"], "user": {"age": 30}})),
            RenderEnv::default())?;
        assert_eq!(out, "[0=a,1=b]age:30;yes");
        Ok(())
    }

    #[test]
    fn t_iterating_a_scalar_fails() -> Result<()> {
        let (_dir, r) = site(&[("x.tpl", "\n{% for i in n %}{% endfor %}")])?;
        let e = r.render_template("x", data(json!({"n": 3})), RenderEnv::default())
            .err().unwrap();
        assert_eq!(e.to_string(),
                   "Error rendering template 'x.tpl': line 2: a number can't be iterated over");
        Ok(())
    }

    #[test]
    fn t_endslot_without_slot_falls_back() -> Result<()> {
        let (_dir, r) = site(&[("x.tpl", "a{% endslot %}b")])?;
        assert_eq!(r.render_template("x", Map::new(), RenderEnv::default())?, "ab");
        Ok(())
    }

    #[test]
    fn t_dangling_slot_is_closed() -> Result<()> {
        let (_dir, r) = site(&[
            ("layout.tpl", "{{ slot('content') }}|{{ slot('tail') }}"),
            ("x.tpl", "{% layout 'layout.tpl' %}main{% slot 'tail' %}rest"),
        ])?;
        assert_eq!(r.render_template("x", Map::new(), RenderEnv::default())?, "main|rest");
        Ok(())
    }
}
