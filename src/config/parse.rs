//! The `key=value` parameter language.
//!
//! ```text
//! tick=<ms> wait=<ms> play=<ms>
//! snap=<intervalMs>[,<maxSaved>[,<maxFailed>]]
//! path=<dir|auto>
//! link=<graph>,<producer>,<consumer>
//! pads=<producerOut>,<consumerIn>,<consumerOut>
//! pipe=<stage> ! <stage> ...
//! args=<file>
//! ```
//!
//! Words following a `pipe=` token that are not themselves a known
//! parameter continue the graph spec, so `pipe=videotestsrc ! fakesink`
//! can be passed unquoted.

use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{
    CaptureParams, LinkTargets, PadNames, PipelineSpec, SnapshotPolicy, AUTO_FOLDER_NAME,
    MAX_NAME_LEN,
};
use crate::FrameSaverError;

/// Parameter keys understood by [`CaptureParams::apply_token`].
pub const KNOWN_KEYS: &[&str] = &[
    "tick", "wait", "snap", "play", "path", "link", "pads", "pipe", "args",
];

/// Leading word of the single-argument plugin form.
pub const PLUGIN_PREFIX: &str = "PLUGIN";

/// How deep `args=` files may include each other.
const MAX_ARGS_DEPTH: usize = 8;

/// What a single parameter token changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamChange {
    /// `tick=`
    Tick,
    /// `wait=`, with the value it replaced.
    Wait {
        /// Wait before this change.
        previous: Duration,
    },
    /// `snap=`
    Snapshot,
    /// `play=`
    Play,
    /// `path=`
    Folder,
    /// `link=`
    Link,
    /// `pads=`
    Pads,
    /// `pipe=`
    Pipeline,
    /// `args=`, with the number of parameters read from the file.
    ArgsFile {
        /// Parameters applied from the file.
        applied: usize,
    },
    /// An unknown key, logged and skipped.
    Ignored {
        /// The unknown key.
        key: String,
    },
}

impl CaptureParams {
    /// Parses command-line style arguments on top of the defaults, then
    /// validates the result.
    pub fn from_args<I, S>(args: I) -> Result<Self, FrameSaverError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut params = Self::default();
        params.apply_args(args)?;
        params.validate()?;
        Ok(params)
    }

    /// Applies arguments in order; later values win.
    ///
    /// A single argument of the form `PLUGIN <text>` is treated as the
    /// whitespace-separated parameter text.
    pub fn apply_args<I, S>(&mut self, args: I) -> Result<(), FrameSaverError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args: Vec<String> = args.into_iter().map(|a| a.as_ref().to_string()).collect();
        let mut words: Vec<&str> = args.iter().flat_map(|a| a.split_whitespace()).collect();
        if args.len() == 1 && words.first() == Some(&PLUGIN_PREFIX) {
            words.remove(0);
        }

        for token in join_pipe_words(&words)? {
            self.apply_token(&token, 0)?;
        }
        Ok(())
    }

    /// Applies one `key=value` token.
    pub fn apply_token(&mut self, token: &str, depth: usize) -> Result<ParamChange, FrameSaverError> {
        let (key, value) = token
            .split_once('=')
            .ok_or_else(|| FrameSaverError::config(format!("expected key=value, got '{token}'")))?;
        let key = key.trim();
        let value = value.trim();

        let change = match key {
            "tick" => {
                self.tick = parse_millis(key, value)?;
                ParamChange::Tick
            }
            "wait" => {
                let previous = self.wait;
                self.wait = parse_millis(key, value)?;
                ParamChange::Wait { previous }
            }
            "play" => {
                self.play = parse_millis(key, value)?;
                ParamChange::Play
            }
            "snap" => {
                self.snapshot = parse_snapshot(value)?;
                ParamChange::Snapshot
            }
            "path" => {
                self.folder = parse_folder(value)?;
                ParamChange::Folder
            }
            "link" => {
                let defaults = LinkTargets::default();
                let [graph, producer, consumer] = parse_names(
                    key,
                    value,
                    [&defaults.graph, &defaults.producer, &defaults.consumer],
                )?;
                self.link = LinkTargets {
                    graph,
                    producer,
                    consumer,
                };
                ParamChange::Link
            }
            "pads" => {
                let defaults = PadNames::default();
                let [producer_out, consumer_in, consumer_out] = parse_names(
                    key,
                    value,
                    [
                        &defaults.producer_out,
                        &defaults.consumer_in,
                        &defaults.consumer_out,
                    ],
                )?;
                self.pads = PadNames {
                    producer_out,
                    consumer_in,
                    consumer_out,
                };
                ParamChange::Pads
            }
            "pipe" => {
                self.pipeline = parse_pipeline(value)?;
                ParamChange::Pipeline
            }
            "args" => ParamChange::ArgsFile {
                applied: self.apply_args_file(Path::new(value), depth + 1)?,
            },
            other => {
                tracing::warn!(key = other, "ignoring unknown parameter");
                ParamChange::Ignored {
                    key: other.to_string(),
                }
            }
        };
        Ok(change)
    }

    /// Reads parameters from a file, one per line.
    ///
    /// Lines must start with a letter; anything else is a comment. A
    /// trailing backslash joins the following line.
    pub fn apply_args_file(&mut self, path: &Path, depth: usize) -> Result<usize, FrameSaverError> {
        if depth > MAX_ARGS_DEPTH {
            return Err(FrameSaverError::config(format!(
                "args files nested deeper than {MAX_ARGS_DEPTH} at {}",
                path.display()
            )));
        }
        let text = std::fs::read_to_string(path).map_err(|e| FrameSaverError::io(path, e))?;
        let lines = args_file_lines(&text);
        tracing::debug!(path = %path.display(), count = lines.len(), "reading args file");
        for line in &lines {
            self.apply_token(line, depth)?;
        }
        Ok(lines.len())
    }

    /// Applies one token to a copy, validates it, and commits on success.
    ///
    /// On error `self` is unchanged.
    pub fn update(&mut self, token: &str) -> Result<ParamChange, FrameSaverError> {
        let mut candidate = self.clone();
        let change = candidate.apply_token(token.trim(), 0)?;
        candidate.validate()?;
        *self = candidate;
        Ok(change)
    }

    /// Canonical `key=value` echo of a change, reflecting current values.
    pub fn echo(&self, change: &ParamChange) -> String {
        match change {
            ParamChange::Tick => format!("tick={}", self.tick.as_millis()),
            ParamChange::Wait { .. } => format!("wait={}", self.wait.as_millis()),
            ParamChange::Snapshot => format!("snap={}", self.snapshot),
            ParamChange::Play => format!("play={}", self.play.as_millis()),
            ParamChange::Folder => format!("path={}", self.folder.display()),
            ParamChange::Link => format!("link={}", self.link),
            ParamChange::Pads => format!("pads={}", self.pads),
            ParamChange::Pipeline => format!("pipe={}", self.pipeline.kind()),
            ParamChange::ArgsFile { applied } => format!("args={applied}"),
            ParamChange::Ignored { key } => format!("{key}=(ignored)"),
        }
    }
}

fn is_key_like(key: &str) -> bool {
    key.starts_with(|c: char| c.is_ascii_alphabetic())
        && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Groups words into tokens, folding graph-spec words into `pipe=`.
fn join_pipe_words(words: &[&str]) -> Result<Vec<String>, FrameSaverError> {
    let mut tokens: Vec<String> = Vec::new();
    let mut in_pipe = false;

    for word in words {
        let key = word.split_once('=').map(|(k, _)| k);
        let known = key.is_some_and(|k| KNOWN_KEYS.contains(&k));
        let starts_token = known || (!in_pipe && key.is_some_and(is_key_like));

        match tokens.last_mut() {
            Some(last) if in_pipe && !starts_token => {
                last.push(' ');
                last.push_str(word);
            }
            _ if starts_token => {
                in_pipe = key == Some("pipe");
                tokens.push((*word).to_string());
            }
            _ => {
                return Err(FrameSaverError::config(format!(
                    "expected key=value, got '{word}'"
                )))
            }
        }
    }
    Ok(tokens)
}

fn args_file_lines(text: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut pending: Option<String> = None;

    for raw in text.lines() {
        let line = raw.trim();
        let (body, continues) = match line.strip_suffix('\\') {
            Some(body) => (body.trim_end(), true),
            None => (line, false),
        };

        let joined = match pending.take() {
            Some(mut acc) if !line.is_empty() => {
                acc.push(' ');
                acc.push_str(body);
                acc
            }
            Some(acc) => {
                lines.push(acc);
                continue;
            }
            None if line.starts_with(|c: char| c.is_ascii_alphabetic()) => body.to_string(),
            None => continue,
        };

        if continues {
            pending = Some(joined);
        } else {
            lines.push(joined);
        }
    }
    lines.extend(pending);
    lines
}

fn parse_millis(key: &str, value: &str) -> Result<Duration, FrameSaverError> {
    value
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| FrameSaverError::config(format!("{key}= expects milliseconds, got '{value}'")))
}

fn parse_snapshot(value: &str) -> Result<SnapshotPolicy, FrameSaverError> {
    let parts: Vec<&str> = value.split(',').map(str::trim).collect();
    if parts.is_empty() || parts.len() > 3 {
        return Err(FrameSaverError::config(format!(
            "snap= expects 1 to 3 numbers, got '{value}'"
        )));
    }
    let number = |i: usize| -> Result<u64, FrameSaverError> {
        match parts.get(i) {
            None => Ok(0),
            Some(part) => part.parse::<u64>().map_err(|_| {
                FrameSaverError::config(format!("snap= expects numbers, got '{part}'"))
            }),
        }
    };
    let quota = |i: usize| -> Result<u32, FrameSaverError> {
        u32::try_from(number(i)?)
            .map_err(|_| FrameSaverError::config(format!("snap= quota too large in '{value}'")))
    };
    Ok(SnapshotPolicy {
        interval: Duration::from_millis(number(0)?),
        max_saved: quota(1)?,
        max_failed: quota(2)?,
    })
}

fn parse_folder(value: &str) -> Result<PathBuf, FrameSaverError> {
    match value {
        "" => Err(FrameSaverError::config("path= must not be empty")),
        "auto" => Ok(std::env::temp_dir().join(AUTO_FOLDER_NAME)),
        other => Ok(PathBuf::from(other)),
    }
}

fn parse_names(key: &str, value: &str, defaults: [&str; 3]) -> Result<[String; 3], FrameSaverError> {
    let parts: Vec<&str> = value.split(',').map(str::trim).collect();
    let [a, b, c] = parts.as_slice() else {
        return Err(FrameSaverError::config(format!(
            "{key}= expects three comma-separated names, got '{value}'"
        )));
    };

    let resolve = |name: &str, default: &str| -> Result<String, FrameSaverError> {
        if name.is_empty() {
            return Err(FrameSaverError::config(format!("{key}= contains an empty name")));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(FrameSaverError::config(format!(
                "{key}= name longer than {MAX_NAME_LEN} characters"
            )));
        }
        Ok(if name == "auto" { default } else { name }.to_string())
    };

    Ok([
        resolve(a, defaults[0])?,
        resolve(b, defaults[1])?,
        resolve(c, defaults[2])?,
    ])
}

fn parse_pipeline(value: &str) -> Result<PipelineSpec, FrameSaverError> {
    let text = value.split_whitespace().collect::<Vec<_>>().join(" ");
    if !text.contains('!') {
        return Err(FrameSaverError::config(format!(
            "pipe= needs '!' between stages, got '{text}'"
        )));
    }
    Ok(if text.starts_with('!') {
        PipelineSpec::Parent(text)
    } else {
        PipelineSpec::Custom(text)
    })
}
