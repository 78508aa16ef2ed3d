use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("Template file not found: {}", .0.to_string_lossy())]
    TemplateNotFound(PathBuf),
    #[error("Layout file not found: {}", .0.to_string_lossy())]
    LayoutNotFound(PathBuf),
    #[error("Component file not found: {}", .0.to_string_lossy())]
    ComponentNotFound(PathBuf),
    #[error("Partial file not found: {}", .0.to_string_lossy())]
    PartialNotFound(PathBuf),
    #[error("reading template {}: {source}", .path.to_string_lossy())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("syntax error in {template} line {line}: {message}")]
    Syntax {
        template: String,
        line: usize,
        message: String,
    },
    #[error("unknown helper {0:?}")]
    UnknownHelper(String),
    #[error("{helper}(): {message}")]
    HelperArgs {
        helper: &'static str,
        message: String,
    },
    #[error("line {line}: {message}")]
    Eval {
        line: usize,
        message: String,
    },
    #[error("Error rendering template '{template}': {source}")]
    Rendering {
        template: String,
        #[source]
        source: Box<TemplateError>,
    },
    #[error("Error rendering layout '{layout}': {source}")]
    LayoutRendering {
        layout: String,
        #[source]
        source: Box<TemplateError>,
    },
    #[error("Error rendering component '{component}': {source}")]
    Component {
        component: String,
        #[source]
        source: Box<TemplateError>,
    },
    /// Not a failure: `dd()` stopped the render; carries all output
    /// produced up to that point plus the dump.
    #[error("rendering halted by dd()")]
    Halt(String),
    /// Not a failure either: `redirect()` asks for a redirect
    /// response instead of the page.
    #[error("redirect to {location:?} with status {status}")]
    Redirect {
        location: String,
        status: u16,
    },
}

impl TemplateError {
    /// The halt output if this error is, or wraps, a `dd()` halt.
    pub fn halted(&self) -> Option<&str> {
        match self {
            TemplateError::Halt(output) => Some(output),
            TemplateError::Rendering { source, .. }
            | TemplateError::LayoutRendering { source, .. }
            | TemplateError::Component { source, .. } => source.halted(),
            _ => None
        }
    }

    /// Location and status if this error is, or wraps, a redirect
    /// request.
    pub fn redirected(&self) -> Option<(&str, u16)> {
        match self {
            TemplateError::Redirect { location, status } => Some((location.as_str(), *status)),
            TemplateError::Rendering { source, .. }
            | TemplateError::LayoutRendering { source, .. }
            | TemplateError::Component { source, .. } => source.redirected(),
            _ => None
        }
    }

    pub(crate) fn args(helper: &'static str, message: impl Into<String>) -> Self {
        TemplateError::HelperArgs { helper, message: message.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn t_messages_nest() {
        let e = TemplateError::Rendering {
            template: "home.tpl".into(),
            source: Box::new(TemplateError::Component {
                component: "components.alert".into(),
                source: Box::new(TemplateError::ComponentNotFound(
                    PathBuf::from("/t/components/alert.tpl"))),
            }),
        };
        assert_eq!(e.to_string(),
                   "Error rendering template 'home.tpl': Error rendering component \
                    'components.alert': Component file not found: /t/components/alert.tpl");
        assert_eq!(e.halted(), None);
        assert_eq!(e.redirected(), None);
    }

    #[test]
    fn t_halted_through_wrappers() {
        let e = TemplateError::Rendering {
            template: "x.tpl".into(),
            source: Box::new(TemplateError::Halt("dump".into())),
        };
        assert_eq!(e.halted(), Some("dump"));
        let e = TemplateError::Component {
            component: "c".into(),
            source: Box::new(TemplateError::Redirect { location: "/x".into(), status: 303 }),
        };
        assert_eq!(e.redirected(), Some(("/x", 303)));
        assert_eq!(e.halted(), None);
    }
}
