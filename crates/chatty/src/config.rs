use std::path::{Path, PathBuf};

use thiserror::Error;

/// Longest accepted value for path-valued options.
pub const MAX_PATH_LEN: usize = 128;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file")]
    Io(#[from] std::io::Error),
    #[error("syntax error at line {line}")]
    Syntax { line: usize },
    #[error("unknown option `{key}` at line {line}")]
    UnknownKey { key: String, line: usize },
    #[error("bad value for `{key}` at line {line}")]
    BadValue { key: String, line: usize },
    #[error("missing required option `{0}`")]
    Missing(&'static str),
}

/// Server options, all required.
///
/// The on-disk format is `key = value` with `#` comment lines; values may be
/// wrapped in single or double quotes. Unknown keys abort startup rather
/// than being skipped, so a typo cannot silently fall back to a default.
#[derive(Debug, Clone)]
pub struct Config {
    /// Stream socket to bind.
    pub unix_path: PathBuf,
    /// Upper bound on simultaneously connected users.
    pub max_connections: usize,
    /// Worker thread count.
    pub threads_in_pool: usize,
    /// Largest text payload, in bytes.
    pub max_msg_size: usize,
    /// Largest file payload, in kilobytes.
    pub max_file_size: usize,
    /// Per-user history capacity.
    pub max_hist_msgs: usize,
    /// Directory receiving file payloads.
    pub dir_name: PathBuf,
    /// Append target for statistics dumps.
    pub stat_file_name: PathBuf,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        Self::parse(&std::fs::read_to_string(path)?)
    }

    /// File size limit in bytes (the option is expressed in kilobytes).
    pub fn max_file_bytes(&self) -> usize {
        self.max_file_size * 1024
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut builder = Builder::default();
        for (idx, raw_line) in text.lines().enumerate() {
            let line = idx + 1;
            let trimmed = raw_line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let Some((key, value)) = trimmed.split_once('=') else {
                return Err(ConfigError::Syntax { line });
            };
            let key = key.trim();
            let value = unquote(value.trim()).ok_or(ConfigError::Syntax { line })?;
            if key.is_empty() || value.is_empty() {
                return Err(ConfigError::Syntax { line });
            }
            builder.set(key, value, line)?;
        }
        builder.finish()
    }
}

/// Strips one matching pair of single or double quotes, if present.
fn unquote(value: &str) -> Option<&str> {
    let bytes = value.as_bytes();
    match bytes.first() {
        Some(&q @ (b'"' | b'\'')) => {
            if bytes.len() >= 2 && bytes[bytes.len() - 1] == q {
                Some(&value[1..value.len() - 1])
            } else {
                None
            }
        }
        _ => Some(value),
    }
}

#[derive(Default)]
struct Builder {
    unix_path: Option<PathBuf>,
    max_connections: Option<usize>,
    threads_in_pool: Option<usize>,
    max_msg_size: Option<usize>,
    max_file_size: Option<usize>,
    max_hist_msgs: Option<usize>,
    dir_name: Option<PathBuf>,
    stat_file_name: Option<PathBuf>,
}

impl Builder {
    fn set(&mut self, key: &str, value: &str, line: usize) -> Result<(), ConfigError> {
        match key {
            "UnixPath" => self.unix_path = Some(path_value(key, value, line)?),
            "MaxConnections" => self.max_connections = Some(int_value(key, value, line)?),
            "ThreadsInPool" => self.threads_in_pool = Some(int_value(key, value, line)?),
            "MaxMsgSize" => self.max_msg_size = Some(int_value(key, value, line)?),
            "MaxFileSize" => self.max_file_size = Some(int_value(key, value, line)?),
            "MaxHistMsgs" => self.max_hist_msgs = Some(int_value(key, value, line)?),
            "DirName" => self.dir_name = Some(path_value(key, value, line)?),
            "StatFileName" => self.stat_file_name = Some(path_value(key, value, line)?),
            _ => return Err(ConfigError::UnknownKey { key: key.to_owned(), line }),
        }
        Ok(())
    }

    fn finish(self) -> Result<Config, ConfigError> {
        Ok(Config {
            unix_path: self.unix_path.ok_or(ConfigError::Missing("UnixPath"))?,
            max_connections: self.max_connections.ok_or(ConfigError::Missing("MaxConnections"))?,
            threads_in_pool: self.threads_in_pool.ok_or(ConfigError::Missing("ThreadsInPool"))?,
            max_msg_size: self.max_msg_size.ok_or(ConfigError::Missing("MaxMsgSize"))?,
            max_file_size: self.max_file_size.ok_or(ConfigError::Missing("MaxFileSize"))?,
            max_hist_msgs: self.max_hist_msgs.ok_or(ConfigError::Missing("MaxHistMsgs"))?,
            dir_name: self.dir_name.ok_or(ConfigError::Missing("DirName"))?,
            stat_file_name: self.stat_file_name.ok_or(ConfigError::Missing("StatFileName"))?,
        })
    }
}

fn int_value(key: &str, value: &str, line: usize) -> Result<usize, ConfigError> {
    match value.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::BadValue { key: key.to_owned(), line }),
    }
}

fn path_value(key: &str, value: &str, line: usize) -> Result<PathBuf, ConfigError> {
    if value.len() > MAX_PATH_LEN {
        return Err(ConfigError::BadValue { key: key.to_owned(), line });
    }
    Ok(PathBuf::from(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = "\
# server options
UnixPath = /tmp/chatty.sock
MaxConnections = 32
ThreadsInPool = 8
MaxMsgSize = 512
MaxFileSize = 1024
MaxHistMsgs = 16
DirName = /tmp/chatty-files
StatFileName = /tmp/chatty.stats
";

    #[test]
    fn parses_a_complete_file() {
        let cfg = Config::parse(FULL).unwrap();
        assert_eq!(cfg.unix_path, PathBuf::from("/tmp/chatty.sock"));
        assert_eq!(cfg.max_connections, 32);
        assert_eq!(cfg.threads_in_pool, 8);
        assert_eq!(cfg.max_msg_size, 512);
        assert_eq!(cfg.max_file_size, 1024);
        assert_eq!(cfg.max_file_bytes(), 1024 * 1024);
        assert_eq!(cfg.max_hist_msgs, 16);
    }

    #[test]
    fn quotes_and_spacing_are_tolerated() {
        let text = FULL.replace("/tmp/chatty.sock", "\"/tmp/chatty.sock\"")
            .replace("MaxConnections = 32", "   MaxConnections=32   ");
        let cfg = Config::parse(&text).unwrap();
        assert_eq!(cfg.unix_path, PathBuf::from("/tmp/chatty.sock"));
        assert_eq!(cfg.max_connections, 32);
    }

    #[test]
    fn single_quotes_work_too() {
        let text = FULL.replace("/tmp/chatty-files", "'/tmp/chatty-files'");
        let cfg = Config::parse(&text).unwrap();
        assert_eq!(cfg.dir_name, PathBuf::from("/tmp/chatty-files"));
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let text = format!("\n\n# leading comment\n{FULL}\n   # trailing\n");
        assert!(Config::parse(&text).is_ok());
    }

    #[test]
    fn unknown_key_is_an_error() {
        let text = format!("{FULL}SomethingElse = 1\n");
        assert!(matches!(
            Config::parse(&text),
            Err(ConfigError::UnknownKey { key, line: 10 }) if key == "SomethingElse"
        ));
    }

    #[test]
    fn missing_key_is_an_error() {
        let text = FULL.replace("MaxHistMsgs = 16\n", "");
        assert!(matches!(Config::parse(&text), Err(ConfigError::Missing("MaxHistMsgs"))));
    }

    #[test]
    fn zero_and_junk_ints_are_rejected() {
        for bad in ["0", "-3", "many"] {
            let text = FULL.replace("ThreadsInPool = 8", &format!("ThreadsInPool = {bad}"));
            assert!(matches!(
                Config::parse(&text),
                Err(ConfigError::BadValue { ref key, .. }) if key == "ThreadsInPool"
            ));
        }
    }

    #[test]
    fn unterminated_quote_is_a_syntax_error() {
        let text = FULL.replace("/tmp/chatty.sock", "\"/tmp/chatty.sock");
        assert!(matches!(Config::parse(&text), Err(ConfigError::Syntax { line: 2 })));
    }

    #[test]
    fn over_long_path_is_rejected() {
        let long = "x".repeat(MAX_PATH_LEN + 1);
        let text = FULL.replace("/tmp/chatty-files", &long);
        assert!(matches!(
            Config::parse(&text),
            Err(ConfigError::BadValue { ref key, .. }) if key == "DirName"
        ));
    }

    #[test]
    fn missing_equals_is_a_syntax_error() {
        let text = format!("{FULL}JustAKey\n");
        assert!(matches!(Config::parse(&text), Err(ConfigError::Syntax { .. })));
    }
}
