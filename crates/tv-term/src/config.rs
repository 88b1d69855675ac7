// SPDX-License-Identifier: MIT
//
// Host configuration: what to run and how to pace it.
//
// Defaults come first, then the environment, then command-line flags. The
// environment is passed in as a lookup function so tests never depend on
// the real process environment.

use std::path::PathBuf;
use std::time::Duration;

use crate::convert::{Quirks, TermCap};
use crate::emulator::DEFAULT_ESCAPE_LIMIT;
use crate::error::{Error, Result};

/// Shell used when `$SHELL` is unset.
pub const FALLBACK_SHELL: &str = "/bin/sh";

/// `TERM` exported to the child unless overridden.
pub const DEFAULT_TERM: &str = "xterm-256color";

/// Palette size reported for a direct-colour terminal.
pub const DIRECT_COLOR_COUNT: u32 = 1 << 24;

/// Runtime configuration for the terminal host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Program and arguments to run in the pty.
    pub command: Vec<String>,
    /// `TERM` value for the child.
    pub term: String,
    /// Minimum time between physical flushes. Default: 1/60 s.
    pub frame_interval: Duration,
    /// How long one idle tick may wait for child output or stdin.
    /// Default: 8.3 ms.
    pub tick_interval: Duration,
    /// Bound on a buffered escape sequence.
    pub escape_limit: usize,
    /// Colours the host terminal can show.
    pub color_count: u32,
    /// Whether the host terminal accepts 24-bit colour.
    pub truecolor: bool,
    /// Where to write the trace log, if anywhere.
    pub log_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            command: vec![FALLBACK_SHELL.to_owned()],
            term: DEFAULT_TERM.to_owned(),
            frame_interval: Duration::from_micros(16_667),
            tick_interval: Duration::from_micros(8_333),
            escape_limit: DEFAULT_ESCAPE_LIMIT,
            color_count: 256,
            truecolor: false,
            log_path: None,
        }
    }
}

impl Config {
    /// Build a configuration from an environment lookup and the program's
    /// arguments (without `argv[0]`).
    ///
    /// Recognized flags: `--colors N`, `--fps N`, `--term NAME`,
    /// `--truecolor`, `--no-truecolor`. The first non-flag argument, or
    /// everything after `--`, is the command.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] for an unknown flag or a bad value,
    /// [`Error::EmptyCommand`] when `--` is followed by nothing.
    pub fn from_env_and_args<I>(env: impl Fn(&str) -> Option<String>, args: I) -> Result<Self>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let mut config = Self::default();

        if let Some(shell) = env("SHELL").filter(|s| !s.is_empty()) {
            config.command = vec![shell];
        }
        config.color_count = detect_color_count(env("TERM").as_deref());
        config.truecolor = env("COLORTERM").is_some_and(|v| v == "truecolor" || v == "24bit");
        config.log_path = env("TVTERM_LOG").filter(|s| !s.is_empty()).map(PathBuf::from);

        let mut args = args.into_iter().map(Into::into);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--colors" => config.color_count = parse_value(&arg, args.next())?,
                "--fps" => {
                    let fps: u32 = parse_value(&arg, args.next())?;
                    if fps == 0 {
                        return Err(Error::InvalidArgument("--fps must be positive".into()));
                    }
                    config.frame_interval = Duration::from_secs(1) / fps;
                }
                "--term" => {
                    config.term = args
                        .next()
                        .ok_or_else(|| Error::InvalidArgument("--term needs a value".into()))?;
                }
                "--truecolor" => config.truecolor = true,
                "--no-truecolor" => config.truecolor = false,
                "--" => {
                    let rest: Vec<String> = args.collect();
                    if rest.is_empty() {
                        return Err(Error::EmptyCommand);
                    }
                    config.command = rest;
                    break;
                }
                flag if flag.starts_with('-') => {
                    return Err(Error::InvalidArgument(format!("unknown flag `{flag}`")));
                }
                _ => {
                    config.command = std::iter::once(arg).chain(args).collect();
                    break;
                }
            }
        }

        tracing::debug!(?config, "configuration resolved");
        Ok(config)
    }

    /// The capability descriptor for this session.
    #[must_use]
    pub fn caps(&self) -> TermCap {
        TermCap::negotiate(self.truecolor, self.color_count, Quirks::empty())
    }
}

fn parse_value<T: std::str::FromStr>(flag: &str, value: Option<String>) -> Result<T> {
    let value = value.ok_or_else(|| Error::InvalidArgument(format!("{flag} needs a value")))?;
    value
        .parse()
        .map_err(|_| Error::InvalidArgument(format!("{flag}: `{value}` is not a number")))
}

/// Palette size implied by a `TERM` value.
#[must_use]
pub fn detect_color_count(term: Option<&str>) -> u32 {
    let Some(term) = term.filter(|t| !t.is_empty()) else {
        return 0;
    };
    if term.ends_with("-direct") || term.contains("truecolor") {
        DIRECT_COLOR_COUNT
    } else if term.contains("256color") {
        256
    } else if term.contains("16color") {
        16
    } else if term == "dumb" || term == "vt100" {
        0
    } else {
        8
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::ColourTier;
    use pretty_assertions::assert_eq;

    fn env_of(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |key| pairs.iter().find(|(k, _)| *k == key).map(|(_, v)| (*v).to_owned())
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    // ── Defaults ────────────────────────────────────────────────────────

    #[test]
    fn defaults() {
        let c = Config::default();
        assert_eq!(c.command, vec!["/bin/sh"]);
        assert_eq!(c.term, "xterm-256color");
        assert_eq!(c.frame_interval, Duration::from_micros(16_667));
        assert_eq!(c.tick_interval, Duration::from_micros(8_333));
        assert_eq!(c.escape_limit, 256);
    }

    #[test]
    fn environment_is_applied() {
        let env = env_of(&[
            ("SHELL", "/bin/zsh"),
            ("TERM", "xterm-256color"),
            ("COLORTERM", "truecolor"),
            ("TVTERM_LOG", "/tmp/tv.log"),
        ]);
        let c = Config::from_env_and_args(env, Vec::<String>::new()).unwrap();
        assert_eq!(c.command, vec!["/bin/zsh"]);
        assert_eq!(c.color_count, 256);
        assert!(c.truecolor);
        assert_eq!(c.log_path, Some(PathBuf::from("/tmp/tv.log")));
        assert_eq!(c.caps().tier(), ColourTier::Direct);
    }

    // ── Flags ───────────────────────────────────────────────────────────

    #[test]
    fn flags_override_environment() {
        let env = env_of(&[("COLORTERM", "24bit"), ("TERM", "xterm")]);
        let c = Config::from_env_and_args(env, ["--no-truecolor", "--colors", "16", "--fps", "30"]).unwrap();
        assert!(!c.truecolor);
        assert_eq!(c.color_count, 16);
        assert_eq!(c.frame_interval, Duration::from_secs(1) / 30);
        assert_eq!(c.caps().tier(), ColourTier::Indexed16);
    }

    #[test]
    fn command_after_separator_or_first_word() {
        let c = Config::from_env_and_args(no_env, ["--truecolor", "--", "vim", "--clean"]).unwrap();
        assert_eq!(c.command, vec!["vim", "--clean"]);
        let c = Config::from_env_and_args(no_env, ["--term", "vt100", "top", "-d", "1"]).unwrap();
        assert_eq!(c.command, vec!["top", "-d", "1"]);
        assert_eq!(c.term, "vt100");
    }

    #[test]
    fn bad_arguments_are_rejected() {
        assert!(matches!(
            Config::from_env_and_args(no_env, ["--bogus"]),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            Config::from_env_and_args(no_env, ["--fps", "0"]),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            Config::from_env_and_args(no_env, ["--colors", "many"]),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            Config::from_env_and_args(no_env, ["--colors"]),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(Config::from_env_and_args(no_env, ["--"]), Err(Error::EmptyCommand)));
    }

    // ── Colour detection ────────────────────────────────────────────────

    #[test]
    fn color_count_from_term() {
        assert_eq!(detect_color_count(Some("xterm-direct")), DIRECT_COLOR_COUNT);
        assert_eq!(detect_color_count(Some("xterm-truecolor")), DIRECT_COLOR_COUNT);
        assert_eq!(detect_color_count(Some("tmux-256color")), 256);
        assert_eq!(detect_color_count(Some("rxvt-16color")), 16);
        assert_eq!(detect_color_count(Some("xterm")), 8);
        assert_eq!(detect_color_count(Some("dumb")), 0);
        assert_eq!(detect_color_count(Some("vt100")), 0);
        assert_eq!(detect_color_count(None), 0);
    }

    #[test]
    fn monochrome_term_gives_no_colour_tier() {
        let c = Config::from_env_and_args(env_of(&[("TERM", "dumb")]), Vec::<String>::new()).unwrap();
        assert_eq!(c.caps().tier(), ColourTier::NoColour);
    }
}
