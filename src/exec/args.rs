// src/exec/args.rs

//! Process arguments with per-argument quoting, path normalisation and log
//! visibility.
//!
//! Arguments are passed to the OS as a real argv; quoting only affects the
//! rendered command line used for logs. Visibility never changes what is
//! executed: shell invocations use [`ArgList::shell_words`].

use tracing::level_filters::LevelFilter;

/// Lowest log verbosity at which an argument may appear in rendered command
/// lines. Anything hidden is rendered as `***`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArgVisibility {
    #[default]
    Always,
    Debug,
    Trace,
    /// Secrets: never rendered.
    Never,
}

impl ArgVisibility {
    fn visible_at(self, filter: LevelFilter) -> bool {
        match self {
            ArgVisibility::Always => true,
            ArgVisibility::Debug => filter >= LevelFilter::DEBUG,
            ArgVisibility::Trace => filter >= LevelFilter::TRACE,
            ArgVisibility::Never => false,
        }
    }
}

/// How a `key value` pair is joined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairStyle {
    /// Two separate arguments: `key value`.
    Separate,
    /// One argument: `key=value`.
    Equals,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PathStyle {
    #[default]
    AsIs,
    ForwardSlashes,
    Native,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArgFlags {
    /// Always quote the value in rendered command lines.
    pub quote: bool,
    pub path: PathStyle,
    pub visibility: ArgVisibility,
}

impl ArgFlags {
    pub fn quoted() -> Self {
        Self {
            quote: true,
            ..Self::default()
        }
    }

    pub fn secret() -> Self {
        Self {
            visibility: ArgVisibility::Never,
            ..Self::default()
        }
    }

    pub fn with_path(mut self, path: PathStyle) -> Self {
        self.path = path;
        self
    }

    pub fn with_visibility(mut self, visibility: ArgVisibility) -> Self {
        self.visibility = visibility;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Arg {
    value: String,
    /// Length of the `key=` prefix of an `Equals` pair; rendering quotes
    /// only what follows it.
    key_len: usize,
    quote: bool,
    visibility: ArgVisibility,
}

impl Arg {
    fn rendered(&self) -> String {
        let (key, value) = self.value.split_at(self.key_len);
        if self.quote || needs_quotes(value) {
            format!("{key}{}", quote(value))
        } else {
            self.value.clone()
        }
    }
}

/// Ordered argument list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArgList {
    args: Vec<Arg>,
}

impl ArgList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, value: impl Into<String>, flags: ArgFlags) {
        let value = normalize_path(value.into(), flags.path);
        self.args.push(Arg {
            value,
            key_len: 0,
            quote: flags.quote,
            visibility: flags.visibility,
        });
    }

    pub fn push_pair(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
        style: PairStyle,
        flags: ArgFlags,
    ) {
        let key = key.into();
        let value = normalize_path(value.into(), flags.path);
        match style {
            PairStyle::Separate => {
                self.args.push(Arg {
                    value: key,
                    key_len: 0,
                    quote: false,
                    visibility: flags.visibility,
                });
                self.args.push(Arg {
                    value,
                    key_len: 0,
                    quote: flags.quote,
                    visibility: flags.visibility,
                });
            }
            PairStyle::Equals => {
                let key_len = key.len() + 1;
                self.args.push(Arg {
                    value: format!("{key}={value}"),
                    key_len,
                    quote: flags.quote,
                    visibility: flags.visibility,
                });
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    /// Raw values in order, as passed to the OS.
    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.args.iter().map(|a| a.value.as_str())
    }

    /// Render the arguments for a log line at the given verbosity.
    pub fn render(&self, filter: LevelFilter) -> String {
        self.args
            .iter()
            .map(|a| {
                if a.visibility.visible_at(filter) {
                    a.rendered()
                } else {
                    "***".to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Every value quoted for the platform shell, secrets included. Only for
    /// building the command that is executed; never log this.
    pub fn shell_words(&self) -> String {
        self.args
            .iter()
            .map(|a| shell_quote(&a.value))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn needs_quotes(value: &str) -> bool {
    value.is_empty() || value.chars().any(char::is_whitespace)
}

/// Double-quote a value, escaping embedded quotes and the backslashes that
/// precede them.
pub fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    let mut backslashes = 0;
    for c in value.chars() {
        match c {
            '\\' => backslashes += 1,
            '"' => {
                out.extend(std::iter::repeat_n('\\', backslashes * 2 + 1));
                out.push('"');
                backslashes = 0;
                continue;
            }
            _ => {}
        }
        if c != '\\' {
            out.extend(std::iter::repeat_n('\\', backslashes));
            backslashes = 0;
            out.push(c);
        }
    }
    out.extend(std::iter::repeat_n('\\', backslashes * 2));
    out.push('"');
    out
}

/// Quote one word so `sh -c` (or `cmd /C` on Windows) passes it through
/// literally.
fn shell_quote(value: &str) -> String {
    if cfg!(windows) {
        quote(value)
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}

fn normalize_path(value: String, style: PathStyle) -> String {
    match style {
        PathStyle::AsIs => value,
        PathStyle::ForwardSlashes => value.replace('\\', "/"),
        PathStyle::Native => {
            if std::path::MAIN_SEPARATOR == '/' {
                value.replace('\\', "/")
            } else {
                value.replace('/', "\\")
            }
        }
    }
}
