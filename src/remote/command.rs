//! Builds the shell scripts the store runs on the host and parses what they print.
//!
//! Every user-supplied value that reaches a script goes through [quote], and every script is
//! passed to the host as a single quoted argument of `sh -c`. Values therefore reach the remote
//! command as data no matter which shell metacharacters they contain.

use crate::core::schema;
use crate::error::ValidationError;
use std::path::Path;
use std::process::Output;

/// What a remote command did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandResult {
    /// [None] if the command was killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

impl From<Output> for CommandResult {
    fn from(output: Output) -> Self {
        CommandResult {
            exit_code: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
        }
    }
}

/// Quotes `value` for a POSIX shell. `field` names the value in the error if it can't be quoted.
pub fn quote(field: &str, value: &str) -> Result<String, ValidationError> {
    shlex::try_quote(value)
        .map(|quoted| quoted.into_owned())
        .map_err(|_| ValidationError::new(field, "must not contain a NUL byte"))
}

/// A POSIX `sh` script in which every embedded value is already quoted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Script(String);

impl Script {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the command line that runs this script: `[sudo -n ]sh -c '<script>'`.
    ///
    /// `sudo -n` fails instead of prompting, so a missing sudoers entry surfaces as a command
    /// failure rather than a hung session.
    pub fn command_line(&self, sudo: bool) -> Result<String, ValidationError> {
        let script = quote("command", &self.0)?;
        let prefix = if sudo { "sudo -n " } else { "" };
        Ok(format!("{prefix}sh -c {script}"))
    }
}

/// Writes `content` to `path` atomically: the content goes to a temporary file in the same
/// directory, which is then renamed over `path`. Readers see the old file or the new one, never a
/// partial write. The temporary file is removed if any step fails.
///
/// If `replaced` names a different path, that file is removed after the rename, so moving an
/// artifact is one remote invocation.
///
/// Fails with exit code 3 before creating anything if `path` is a directory, since `mv` would
/// otherwise move the temporary file into it.
pub fn write_file(path: &str, content: &str, replaced: Option<&str>) -> Result<Script, ValidationError> {
    let (dir, name) = split_path(path)?;
    let template = match dir {
        "/" => format!("/.{name}.XXXXXX"),
        _ => format!("{dir}/.{name}.XXXXXX"),
    };

    let template = quote("path", &template)?;
    let content = quote("content", content)?;
    let quoted_path = quote("path", path)?;

    let remove_replaced = match replaced {
        Some(old) if old != path => {
            schema::validate_path(old)?;
            format!(" && rm -f -- {}", quote("path", old)?)
        }
        _ => String::new(),
    };

    Ok(Script(format!(
        "if [ -d {quoted_path} ]; then printf '%s is a directory\\n' {quoted_path} >&2; exit 3; fi; \
        tmp=$(mktemp {template}) \
        && printf '%s' {content} > \"$tmp\" \
        && chmod 0644 \"$tmp\" \
        && mv -f -- \"$tmp\" {quoted_path}{remove_replaced} \
        || {{ rc=$?; [ -z \"$tmp\" ] || rm -f \"$tmp\"; exit \"$rc\"; }}"
    )))
}

/// Checks `path` and prints its content in one round trip.
///
/// Prints `present` and a newline followed by the content, or `absent` and a newline.
///
/// A path that doesn't stat may still exist behind a directory that can't be searched, so before
/// printing `absent` the script walks up to the nearest ancestor that exists. If that ancestor is
/// a directory without search permission, absence can't be established and the script exits
/// with 4. A path that exists but is not a regular file exits with 3. See [parse_read].
pub fn read_file(path: &str) -> Result<Script, ValidationError> {
    let (dir, _) = split_path(path)?;
    let dir = quote("path", dir)?;
    let path = quote("path", path)?;

    Ok(Script(format!(
        "if [ -f {path} ]; then printf 'present\\n' && cat -- {path}; \
        elif [ -e {path} ] || [ -L {path} ]; then printf '%s is not a regular file\\n' {path} >&2; exit 3; \
        else d={dir}; \
        while [ ! -e \"$d\" ] && [ ! -L \"$d\" ]; do d=$(dirname \"$d\"); done; \
        if [ -d \"$d\" ] && [ ! -x \"$d\" ]; then printf 'cannot search %s\\n' \"$d\" >&2; exit 4; fi; \
        printf 'absent\\n'; fi"
    )))
}

/// Removes `path`. Succeeds if it doesn't exist.
pub fn remove_file(path: &str) -> Result<Script, ValidationError> {
    schema::validate_path(path)?;
    Ok(Script(format!("rm -f -- {}", quote("path", path)?)))
}

/// The parsed output of [read_file].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    Present(String),
    Absent,
}

/// Parses the standard output of a successful [read_file] script. The error describes output
/// that matches neither form.
pub fn parse_read(stdout: &[u8]) -> Result<ReadOutcome, String> {
    let text = std::str::from_utf8(stdout).map_err(|e| format!("content is not valid UTF-8: {e}"))?;

    if let Some(content) = text.strip_prefix("present\n") {
        Ok(ReadOutcome::Present(content.to_string()))
    } else if text == "absent\n" {
        Ok(ReadOutcome::Absent)
    } else {
        let first: String = text.lines().next().unwrap_or("").chars().take(60).collect();
        Err(format!("expected a presence marker, got {first:?}"))
    }
}

fn split_path(path: &str) -> Result<(&str, &str), ValidationError> {
    schema::validate_path(path)?;

    let p = Path::new(path);
    let dir = p.parent().and_then(Path::to_str);
    let name = p.file_name().and_then(|n| n.to_str());

    match (dir, name) {
        (Some(dir), Some(name)) => Ok((dir, name)),
        _ => Err(ValidationError::new("path", "must name a file, not a directory")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    /// Runs `script` with the system `sh` and returns its standard output.
    fn sh(script: &str) -> String {
        let output = Command::new("sh").arg("-c").arg(script).output().unwrap();
        assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
        String::from_utf8(output.stdout).unwrap()
    }

    #[test]
    fn quoted_values_survive_the_shell_unchanged() {
        let values = [
            "",
            "plain",
            "two words",
            "it's",
            "a'; touch /tmp/vhostctl-canary; echo '",
            "$(id) `id` ${HOME}",
            "back\\slash \"double\"",
            "line one\nline two\n",
            "glob * ? [a-z] ~",
            "semi; pipe | amp & redirect > <",
            "ünïcödé ✓",
            "-n",
        ];

        for value in values {
            let quoted = quote("value", value).unwrap();
            assert_eq!(value, sh(&format!("printf '%s' {quoted}")), "{quoted}");
        }
    }

    #[test]
    fn nul_is_a_validation_error() {
        let error = quote("server_name", "a\0b").unwrap_err();
        assert_eq!("server_name", error.field);
    }

    #[test]
    fn command_line_survives_a_second_shell() {
        let script = Script("printf '%s' 'it'\\''s'".into());
        assert_eq!("it's", sh(&script.command_line(false).unwrap()));
    }

    #[test]
    fn sudo_prefix() {
        let script = remove_file("/etc/site/blog.conf").unwrap();
        assert!(script.command_line(true).unwrap().starts_with("sudo -n sh -c "));
        assert!(script.command_line(false).unwrap().starts_with("sh -c "));
    }

    #[test]
    fn write_uses_a_sibling_temporary_file() {
        let script = write_file("/etc/site/blog.conf", "x", None).unwrap();
        let template = quote("path", "/etc/site/.blog.conf.XXXXXX").unwrap();
        assert!(script.as_str().contains(&format!("tmp=$(mktemp {template})")));
        assert!(!script.as_str().contains("&& rm -f"));
    }

    #[test]
    fn write_refuses_a_directory_before_creating_anything() {
        let script = write_file("/etc/site/blog.conf", "x", None).unwrap();
        let path = quote("path", "/etc/site/blog.conf").unwrap();
        assert!(script.as_str().starts_with(&format!("if [ -d {path} ]; then")));
        let guard = script.as_str().find("exit 3").unwrap();
        assert!(guard < script.as_str().find("mktemp").unwrap());
    }

    #[test]
    fn write_in_root_directory() {
        let script = write_file("/blog.conf", "x", None).unwrap();
        let template = quote("path", "/.blog.conf.XXXXXX").unwrap();
        assert!(script.as_str().contains(&format!("tmp=$(mktemp {template})")));
    }

    #[test]
    fn read_checks_the_nearest_existing_ancestor() {
        let script = read_file("/a/b/blog.conf").unwrap();
        let dir = quote("path", "/a/b").unwrap();
        assert!(script.as_str().contains(&format!("else d={dir}; ")));
        assert!(script.as_str().contains("do d=$(dirname \"$d\"); done"));

        let walk = script.as_str().find("while").unwrap();
        let unsearchable = script.as_str().find("exit 4").unwrap();
        let absent = script.as_str().find("printf 'absent").unwrap();
        assert!(walk < unsearchable && unsearchable < absent);
    }

    #[test]
    fn write_removes_replaced_path() {
        let script = write_file("/etc/b.conf", "x", Some("/etc/a.conf")).unwrap();
        let new = quote("path", "/etc/b.conf").unwrap();
        let old = quote("path", "/etc/a.conf").unwrap();
        assert!(script
            .as_str()
            .contains(&format!("mv -f -- \"$tmp\" {new} && rm -f -- {old}")));

        let same = write_file("/etc/b.conf", "x", Some("/etc/b.conf")).unwrap();
        assert!(!same.as_str().contains("&& rm -f"));
    }

    #[test]
    fn relative_paths_are_rejected() {
        assert_eq!("path", write_file("blog.conf", "x", None).unwrap_err().field);
        assert_eq!("path", read_file("blog.conf").unwrap_err().field);
        assert_eq!("path", remove_file("").unwrap_err().field);
    }

    mod parse {
        use super::*;

        #[test]
        fn present() {
            assert_eq!(
                Ok(ReadOutcome::Present("server {\n}\n".into())),
                parse_read(b"present\nserver {\n}\n"),
            );
        }

        #[test]
        fn present_and_empty() {
            assert_eq!(Ok(ReadOutcome::Present(String::new())), parse_read(b"present\n"));
        }

        #[test]
        fn absent() {
            assert_eq!(Ok(ReadOutcome::Absent), parse_read(b"absent\n"));
        }

        #[test]
        fn no_output_is_not_absence() {
            assert!(parse_read(b"").is_err());
        }

        #[test]
        fn content_resembling_a_marker() {
            assert_eq!(
                Ok(ReadOutcome::Present("absent\n".into())),
                parse_read(b"present\nabsent\n"),
            );
        }

        #[test]
        fn invalid_utf8() {
            let error = parse_read(b"present\n\xff\xfe").unwrap_err();
            assert!(error.contains("UTF-8"), "{error}");
        }
    }
}
