//! Shell selection and argument splitting.

use crate::process::types::ProcessError;

/// Get the shell command and arguments used to run a script.
///
/// `/bin/sh -c` on Unix and `cmd.exe /C` on Windows unless `override_shell`
/// names another shell, in which case the flag is picked from its name.
pub fn get_shell(override_shell: Option<&str>) -> (String, Vec<String>) {
  if let Some(shell) = override_shell {
    let args = if shell.contains("powershell") || shell.contains("pwsh") {
      vec!["-NoProfile".to_string(), "-Command".to_string()]
    } else if shell.contains("cmd") {
      vec!["/C".to_string()]
    } else {
      vec!["-c".to_string()]
    };
    return (shell.to_string(), args);
  }

  #[cfg(unix)]
  {
    ("/bin/sh".to_string(), vec!["-c".to_string()])
  }

  #[cfg(windows)]
  {
    ("cmd.exe".to_string(), vec!["/C".to_string()])
  }
}

/// Split an argument string into individual arguments.
///
/// Whitespace separates arguments. Single and double quotes group text and
/// are removed. A backslash outside single quotes escapes the next character;
/// on Windows only a following quote, so paths keep their separators.
pub fn split_args(args: &str) -> Result<Vec<String>, ProcessError> {
  let mut out = Vec::new();
  let mut current = String::new();
  let mut in_arg = false;
  let mut quote: Option<char> = None;
  let mut chars = args.chars().peekable();

  while let Some(c) = chars.next() {
    match (quote, c) {
      (Some(q), c) if c == q => quote = None,
      (Some('\''), c) => current.push(c),
      (_, '\\') if cfg!(windows) && !matches!(chars.peek(), Some('"' | '\'')) => {
        current.push(c);
        in_arg = true;
      }
      (_, '\\') => match chars.next() {
        Some(escaped) => {
          current.push(escaped);
          in_arg = true;
        }
        None => return Err(ProcessError::InvalidArgs(format!("trailing backslash in `{args}`"))),
      },
      (Some(_), c) => current.push(c),
      (None, '"' | '\'') => {
        quote = Some(c);
        in_arg = true;
      }
      (None, c) if c.is_whitespace() => {
        if in_arg {
          out.push(std::mem::take(&mut current));
          in_arg = false;
        }
      }
      (None, c) => {
        current.push(c);
        in_arg = true;
      }
    }
  }

  if let Some(q) = quote {
    return Err(ProcessError::InvalidArgs(format!("unterminated {q} quote in `{args}`")));
  }
  if in_arg {
    out.push(current);
  }
  Ok(out)
}
