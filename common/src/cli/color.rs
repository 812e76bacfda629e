//! ANSI color policy for log output.
//!
//! Precedence, highest first: an explicit `Always`/`Never`, then `NO_COLOR`,
//! then `EMACS` (inferior shells render escapes badly), then TTY detection.

use std::env;
use std::fmt;
use std::str::FromStr;

/// When to emit ANSI colors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ColorWhen {
    /// Color only when the stream is a terminal
    #[default]
    Auto,

    Always,

    Never,
}

/// Environment variables that influence `Auto`, captured once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColorEnv {
    // ---
    pub no_color: bool,
    pub emacs: bool,
}

impl ColorEnv {
    // ---
    /// Reads `NO_COLOR` and `EMACS` from the process environment.
    pub fn from_process() -> Self {
        // ---
        Self {
            no_color: env::var_os("NO_COLOR").is_some(),
            emacs: env::var_os("EMACS").is_some(),
        }
    }
}

impl ColorWhen {
    // ---
    /// Decides whether to color a stream, given the environment and
    /// whether that stream is attached to a terminal.
    pub fn resolve(self, env: ColorEnv, is_tty: bool) -> bool {
        // ---
        match self {
            ColorWhen::Always => true,
            ColorWhen::Never => false,
            ColorWhen::Auto => !env.no_color && !env.emacs && is_tty,
        }
    }

    /// Resolves the policy for stderr, where tracing output goes.
    pub fn should_color_stderr(self) -> bool {
        self.resolve(ColorEnv::from_process(), atty::is(atty::Stream::Stderr))
    }
}

impl FromStr for ColorWhen {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // ---
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(ColorWhen::Auto),
            "always" => Ok(ColorWhen::Always),
            "never" => Ok(ColorWhen::Never),
            other => Err(format!("unknown color mode '{other}' (expected auto, always or never)")),
        }
    }
}

impl fmt::Display for ColorWhen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // ---
        let name = match self {
            ColorWhen::Auto => "auto",
            ColorWhen::Always => "always",
            ColorWhen::Never => "never",
        };
        f.write_str(name)
    }
}
