//! Download page rendering.
//!
//! Pages are [upon] templates. A folder may ship its own `template.html`;
//! everything else gets the embedded default. Template variables:
//!
//! | Variable                   | Description                            |
//! |----------------------------|----------------------------------------|
//! | `url`                      | Public base url, without trailing `/`  |
//! | `download.id`              | Download id                            |
//! | `download.title`           | Title, or the folder name              |
//! | `download.description`     | Description text, if any               |
//! | `download.files[].id`      | File id                                |
//! | `download.files[].name`    | File name                              |
//! | `download.files[].description` | Short file description, if any     |
//! | `download.files[].url`     | Public path of the file                |
//! | `download.files[].size`    | Size in bytes                          |
//! | `download.files[].mime_type` | Guessed MIME type                    |
//!
//! Values are written verbatim; use the `html` formatter to escape them.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use fetchtrack_model::File;
use upon::{Engine, Template};

const DEFAULT_TEMPLATE: &str = include_str!("../templates/page.html");

pub(crate) struct PageRenderer {
    engine: Engine<'static>,
    default: Template<'static>,
    url: String,
}
impl PageRenderer {
    pub(crate) fn new(url: impl Into<String>) -> Result<Self> {
        let mut engine = Engine::new();
        addons::configure(&mut engine);
        let default = engine.compile(DEFAULT_TEMPLATE).or_raise(|| ErrorKind::Template)?;
        Ok(Self {
            engine,
            default,
            url: url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Render with the folder-provided template source, or the default one.
    pub(crate) fn render(
        &self,
        source: Option<String>,
        id: &str,
        title: &str,
        description: Option<&str>,
        files: &[File],
    ) -> Result<String> {
        let context = self.context(id, title, description, files);
        let rendered = match source {
            Some(source) => {
                let template = self.engine.compile(source).or_raise(|| ErrorKind::Template)?;
                template.render(&self.engine, context).to_string()
            },
            None => self.default.render(&self.engine, context).to_string(),
        };
        rendered.or_raise(|| ErrorKind::Template)
    }

    fn context(&self, id: &str, title: &str, description: Option<&str>, files: &[File]) -> upon::Value {
        let files = files
            .iter()
            .map(|file| {
                upon::value! {
                    id: &file.id,
                    name: &file.name,
                    description: optional(file.description.as_deref()),
                    url: &file.url,
                    size: file.size,
                    mime_type: &file.mime_type,
                }
            })
            .collect();
        upon::value! {
            url: &self.url,
            download: upon::value! {
                id: id,
                title: title,
                description: optional(description),
                files: upon::Value::List(files),
            },
        }
    }
}

fn optional(value: Option<&str>) -> upon::Value {
    value.map_or(upon::Value::None, |value| upon::Value::String(value.to_string()))
}

mod addons {
    use std::fmt::Write;
    use upon::{Engine, Value, fmt as upon_fmt};

    /// Escapes the characters that matter inside HTML text and attributes.
    fn html_formatter(f: &mut upon_fmt::Formatter<'_>, value: &Value) -> upon_fmt::Result {
        match value {
            Value::String(s) => {
                for c in s.chars() {
                    match c {
                        '&' => f.write_str("&amp;")?,
                        '<' => f.write_str("&lt;")?,
                        '>' => f.write_str("&gt;")?,
                        '"' => f.write_str("&quot;")?,
                        '\'' => f.write_str("&#39;")?,
                        c => f.write_char(c)?,
                    }
                }
            },
            v => upon_fmt::default(f, v)?,
        };
        Ok(())
    }

    pub(crate) fn configure(engine: &mut Engine<'_>) {
        engine.add_formatter("html", html_formatter);
    }
}
